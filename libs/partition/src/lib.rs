//! Frame-range partitioning.
//!
//! Splits an inclusive frame range into at most `parallelism` contiguous
//! batches for parallel execution. Guarantees:
//!
//! - Batches fully cover `[start, end]` with no overlaps
//! - Frames ascend within and across batches
//! - No batch is empty, and there are never more batches than frames
//! - Batch sizes differ by at most one (remainder spread over the leading
//!   batches)

use farm_types::FrameRange;

/// Split `[start, end]` (inclusive) into at most `parallelism` batches.
///
/// `parallelism` is clamped to `[1, frame_count]`, so a request for more
/// workers than frames yields one single-frame batch per frame, and
/// `parallelism <= 1` yields exactly one batch containing the whole range.
pub fn partition_frames(start: i64, end: i64, parallelism: u32) -> Vec<FrameRange> {
    debug_assert!(start <= end, "frame range must be non-empty");

    let frame_count = (end - start + 1).max(1);
    let batches = i64::from(parallelism).clamp(1, frame_count);

    let base = frame_count / batches;
    let remainder = frame_count % batches;

    let mut ranges = Vec::with_capacity(batches as usize);
    let mut cursor = start;

    for index in 0..batches {
        // The first `remainder` batches absorb one extra frame each.
        let size = base + i64::from(index < remainder);
        ranges.push(FrameRange::new(cursor, cursor + size - 1));
        cursor += size;
    }

    ranges
}
