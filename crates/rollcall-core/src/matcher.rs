//! Match engine: nearest enrolled embedding under a Euclidean tolerance.

use crate::types::{Embedding, MatchResult};
use std::collections::BTreeMap;

/// Default Euclidean tolerance, calibrated for 128-d dlib-style descriptors.
///
/// Tolerances are model-specific; extractors publish their own through
/// [`ModelProfile`](crate::extractor::ModelProfile).
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Enrolled embeddings keyed by identity. Sorted iteration makes tie-breaks
/// deterministic.
pub type Gallery = BTreeMap<String, Embedding>;

/// Strategy for comparing a candidate embedding against enrolled embeddings.
pub trait Matcher {
    fn compare(&self, candidate: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult;
}

/// Minimum-L2-distance matcher.
///
/// Visits every gallery entry. A match requires `distance < tolerance`
/// (strict). Equidistant entries resolve to the lowest identity id. Entries
/// whose dimension or model version differs from the candidate are not
/// comparable and skipped. An unknown model version is not a mismatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, candidate: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult {
        let mut best: Option<(&str, f32)> = None;

        for (identity, enrolled) in gallery {
            if enrolled.dimension() != candidate.dimension() {
                tracing::warn!(
                    identity = identity.as_str(),
                    expected = candidate.dimension(),
                    found = enrolled.dimension(),
                    "skipping enrolled embedding with mismatched dimension"
                );
                continue;
            }
            if let (Some(expected), Some(found)) =
                (&candidate.model_version, &enrolled.model_version)
            {
                if expected != found {
                    tracing::warn!(
                        identity = identity.as_str(),
                        expected = expected.as_str(),
                        found = found.as_str(),
                        "skipping enrolled embedding from another model"
                    );
                    continue;
                }
            }

            let distance = candidate.euclidean_distance(enrolled);
            if best.map_or(true, |(_, nearest)| distance < nearest) {
                best = Some((identity.as_str(), distance));
            }
        }

        match best {
            Some((identity, distance)) if distance < tolerance => {
                MatchResult::matched(identity, distance)
            }
            Some((_, distance)) => MatchResult::no_match(distance),
            None => MatchResult::no_match(f32::INFINITY),
        }
    }
}
