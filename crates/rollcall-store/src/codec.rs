//! Embedding BLOB layout: `dimension` consecutive little-endian IEEE-754
//! `f32` values, nothing else.

const F32_BYTES: usize = std::mem::size_of::<f32>();

pub(crate) fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `None` when the blob length disagrees with `dimension`.
pub(crate) fn decode(blob: &[u8], dimension: usize) -> Option<Vec<f32>> {
    if blob.len() != dimension.checked_mul(F32_BYTES)? {
        return None;
    }
    Some(
        blob.chunks_exact(F32_BYTES)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
