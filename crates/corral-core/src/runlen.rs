//! Run-length decoding for per-node shape arrays.
//!
//! The scheduler compresses per-node values (socket/core shapes, memory
//! limits) into parallel `value[]` / `rep_count[]` arrays, where
//! `rep_count[k]` consecutive nodes share `value[k]`. Both credential
//! creation and projection decode these; the helpers here are the single
//! implementation.

/// Index into a value array for the node at `node_index`.
///
/// Walks `rep_counts` accumulating node coverage; returns `None` when the
/// counts do not cover `node_index`.
#[must_use]
pub fn rep_index(rep_counts: &[u32], node_index: u32) -> Option<usize> {
    let mut covered: u64 = 0;
    for (i, &count) in rep_counts.iter().enumerate() {
        covered += u64::from(count);
        if u64::from(node_index) < covered {
            return Some(i);
        }
    }
    None
}

/// Length of the smallest `rep_counts` prefix covering `nhosts` nodes.
///
/// Returns `rep_counts.len()` when the counts never reach `nhosts`, and
/// `0` for an empty array.
#[must_use]
pub fn effective_len(rep_counts: &[u32], nhosts: u32) -> usize {
    let mut covered: u64 = 0;
    for (i, &count) in rep_counts.iter().enumerate() {
        covered += u64::from(count);
        if covered >= u64::from(nhosts) {
            return i + 1;
        }
    }
    rep_counts.len()
}
