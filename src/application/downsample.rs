// Min/max bucket decimation for depth-ordered rows
use crate::domain::curve::Row;

/// Decimate `rows` to at most `target_points`, keeping each bucket's minimum
/// and maximum so spikes survive heavy downsampling.
///
/// Inputs already within budget (or a non-positive target) come back
/// unchanged, which makes the function idempotent.
pub fn downsample_minmax(rows: Vec<Row>, target_points: usize) -> Vec<Row> {
    if target_points == 0 || rows.len() <= target_points {
        return rows;
    }

    let len = rows.len();
    let buckets = (target_points / 2).max(1);
    let mut out = Vec::with_capacity(buckets * 2);

    for bucket in 0..buckets {
        let start = bucket * len / buckets;
        let end = (bucket + 1) * len / buckets;
        if start >= end {
            continue;
        }

        let (min_idx, max_idx) = extrema(&rows[start..end]);
        let (min_idx, max_idx) = (start + min_idx, start + max_idx);

        if min_idx == max_idx {
            out.push(rows[min_idx]);
            continue;
        }

        let (first, second) = if rows[min_idx].depth <= rows[max_idx].depth {
            (rows[min_idx], rows[max_idx])
        } else {
            (rows[max_idx], rows[min_idx])
        };
        out.push(first);
        out.push(second);
    }

    dedupe_consecutive(&mut out);
    out
}

/// Drop rows identical to their predecessor.
pub fn dedupe_consecutive(rows: &mut Vec<Row>) {
    rows.dedup_by(|current, previous| current.same_sample(previous));
}

// Index of the minimum and maximum value; first occurrence wins ties
fn extrema(bucket: &[Row]) -> (usize, usize) {
    let mut min_idx = 0;
    let mut max_idx = 0;
    for (idx, row) in bucket.iter().enumerate().skip(1) {
        if row.value < bucket[min_idx].value {
            min_idx = idx;
        }
        if row.value > bucket[max_idx].value {
            max_idx = idx;
        }
    }
    (min_idx, max_idx)
}
