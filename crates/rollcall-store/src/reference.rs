//! Directories of reference photos named `<name>_<identity>.<jpg|jpeg|png>`.
//!
//! Bulk alternative to one-by-one enrollment: every readable photo with a
//! detectable face contributes its first face's embedding under the identity
//! encoded in its file name. Anything else is skipped with a warning.

use crate::enrollment::EnrollmentStore;
use crate::error::StoreError;
use rollcall_core::{normalize, DescriptorExtractor, Embedding, Gallery};
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Display name and identity parsed from a reference file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceName {
    pub name: String,
    pub identity: String,
}

impl ReferenceName {
    /// Parse `John_R001.jpg` into name `John`, identity `R001`.
    ///
    /// The identity is everything after the first underscore, so it may
    /// itself contain underscores. Extension matching is case-insensitive.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if !EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)) {
            return None;
        }
        let (name, identity) = stem.split_once('_')?;
        if name.is_empty() || identity.is_empty() || identity.trim() != identity {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            identity: identity.to_string(),
        })
    }
}

/// Outcome of [`ReferenceDirectory::import_into`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: Vec<String>,
    /// Identities that were already enrolled.
    pub already_enrolled: Vec<String>,
    /// Files skipped as unreadable, faceless or misnamed.
    pub skipped_files: usize,
}

pub struct ReferenceDirectory {
    root: PathBuf,
}

impl ReferenceDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reference files in name order. Misnamed files are logged and counted.
    fn entries(&self) -> Result<(Vec<(PathBuf, ReferenceName)>, usize), StoreError> {
        let mut paths = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        paths.sort();

        let mut misnamed = 0;
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(ReferenceName::parse);
            match parsed {
                Some(name) => entries.push((path, name)),
                None => {
                    tracing::warn!(path = %path.display(), "skipping reference file: expected <name>_<identity>.<jpg|jpeg|png>");
                    misnamed += 1;
                }
            }
        }
        Ok((entries, misnamed))
    }

    /// Embedding of the first face in `path`, or `None` (logged) when the file
    /// cannot contribute one.
    fn describe(path: &Path, extractor: &mut dyn DescriptorExtractor) -> Option<Embedding> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable reference file");
                return None;
            }
        };
        let image = match normalize(&bytes) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping undecodable reference image");
                return None;
            }
        };
        match extractor.extract(&image) {
            Ok(faces) => {
                let first = faces.into_iter().next();
                if first.is_none() {
                    tracing::warn!(path = %path.display(), "skipping reference image: no face detected");
                }
                first
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping reference image: extraction failed");
                None
            }
        }
    }

    /// Build a gallery from every usable reference photo.
    ///
    /// When two files name the same identity, the first in name order wins.
    pub fn scan(&self, extractor: &mut dyn DescriptorExtractor) -> Result<Gallery, StoreError> {
        let (entries, _) = self.entries()?;
        let mut gallery = Gallery::new();
        for (path, name) in entries {
            if gallery.contains_key(&name.identity) {
                tracing::warn!(path = %path.display(), identity = %name.identity, "duplicate reference identity ignored");
                continue;
            }
            if let Some(embedding) = Self::describe(&path, extractor) {
                gallery.insert(name.identity, embedding);
            }
        }
        tracing::info!(root = %self.root.display(), identities = gallery.len(), "scanned reference directory");
        Ok(gallery)
    }

    /// Enroll every usable reference photo whose identity is not yet in
    /// `store`. Existing enrollments are never replaced.
    pub fn import_into(
        &self,
        extractor: &mut dyn DescriptorExtractor,
        store: &dyn EnrollmentStore,
    ) -> Result<ImportSummary, StoreError> {
        let (entries, misnamed) = self.entries()?;
        let mut summary = ImportSummary {
            skipped_files: misnamed,
            ..Default::default()
        };

        for (path, name) in entries {
            if summary.imported.contains(&name.identity)
                || summary.already_enrolled.contains(&name.identity)
            {
                continue;
            }
            if store.load(&name.identity)?.is_some() {
                summary.already_enrolled.push(name.identity);
                continue;
            }
            let Some(embedding) = Self::describe(&path, extractor) else {
                summary.skipped_files += 1;
                continue;
            };
            match store.save(&name.identity, &embedding) {
                Ok(_) => summary.imported.push(name.identity),
                Err(StoreError::DuplicateIdentity(id)) => summary.already_enrolled.push(id),
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            root = %self.root.display(),
            imported = summary.imported.len(),
            already_enrolled = summary.already_enrolled.len(),
            skipped = summary.skipped_files,
            "reference directory imported"
        );
        Ok(summary)
    }
}
