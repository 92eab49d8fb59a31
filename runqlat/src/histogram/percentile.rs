//! Approximate percentiles over bucketed counts.
//!
//! Both modes walk the sorted buckets accumulating counts until the requested rank is
//! reached; they differ only in what they report for the winning bucket:
//!
//! - [`Mode::BucketFloor`] returns the bucket's slot as is.
//! - [`Mode::Interpolated`] places the value linearly between the winning slot and the
//!   next one, assuming observations are spread evenly inside the bucket.
//!
//! Neither is an exact order statistic. Queries that have no meaningful answer return a
//! [`QueryError`] instead of a placeholder value.

use thiserror::Error;

use super::{Bucket, Histogram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    BucketFloor,
    Interpolated,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    /// Slot of the bucket holding the requested rank.
    Slot(u64),
    /// Position interpolated inside the winning bucket.
    Interpolated(f64),
}

impl Estimate {
    pub fn value(&self) -> f64 {
        match *self {
            Estimate::Slot(slot) => slot as f64,
            Estimate::Interpolated(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum QueryError {
    #[error("histogram is empty")]
    EmptyHistogram,
    #[error("percentile {0} is outside [0, 100]")]
    PercentileOutOfRange(f64),
    #[error("histogram has no observations")]
    ZeroTotal,
    #[error("{bins} bins but {counts} counts")]
    LengthMismatch { bins: usize, counts: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimator {
    mode: Mode,
}

/// Winning bucket and the cumulative counts just before and including it.
#[derive(Debug, Clone, Copy)]
struct Hit {
    index: usize,
    prev: u64,
    curr: u64,
}

impl Estimator {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn bucket_floor() -> Self {
        Self::new(Mode::BucketFloor)
    }

    pub fn interpolated() -> Self {
        Self::new(Mode::Interpolated)
    }

    /// Estimates the `percentile`-th value of a sorted histogram.
    pub fn estimate(&self, histogram: &Histogram, percentile: f64) -> Result<Estimate, QueryError> {
        let buckets = histogram.buckets();
        if buckets.is_empty() {
            return Err(QueryError::EmptyHistogram);
        }
        // NaN fails `contains` as well.
        if !(0.0..=100.0).contains(&percentile) {
            return Err(QueryError::PercentileOutOfRange(percentile));
        }
        let total = histogram.total();
        if total == 0 {
            return Err(QueryError::ZeroTotal);
        }

        match self.mode {
            Mode::BucketFloor => {
                let rank = (total as f64 * percentile / 100.0).floor() as u64;
                if rank == 0 {
                    return Ok(Estimate::Slot(buckets[0].slot));
                }
                let hit = locate(buckets, |cumulative| cumulative >= rank)
                    .unwrap_or_else(|| last_hit(buckets, total));
                Ok(Estimate::Slot(buckets[hit.index].slot))
            }
            Mode::Interpolated => {
                let threshold = total as f64 * (percentile / 100.0);
                let hit = locate(buckets, |cumulative| cumulative as f64 >= threshold)
                    .unwrap_or_else(|| last_hit(buckets, total));

                let bin_start = buckets[hit.index].slot as f64;
                // The last bucket is open-ended; log2 buckets double in width.
                let bin_end = match buckets.get(hit.index + 1) {
                    Some(next) => next.slot as f64,
                    None => bin_start * 2.0,
                };
                let fraction = if hit.curr == hit.prev {
                    0.0
                } else {
                    (threshold - hit.prev as f64) / (hit.curr - hit.prev) as f64
                };

                Ok(Estimate::Interpolated(
                    bin_start + fraction * (bin_end - bin_start),
                ))
            }
        }
    }
}

/// First bucket whose running total satisfies `reached`.
fn locate(buckets: &[Bucket], reached: impl Fn(u64) -> bool) -> Option<Hit> {
    let mut cumulative = 0u64;
    for (index, bucket) in buckets.iter().enumerate() {
        let prev = cumulative;
        cumulative = cumulative.saturating_add(bucket.count);
        if reached(cumulative) {
            return Some(Hit {
                index,
                prev,
                curr: cumulative,
            });
        }
    }
    None
}

fn last_hit(buckets: &[Bucket], total: u64) -> Hit {
    let index = buckets.len() - 1;
    Hit {
        index,
        prev: total.saturating_sub(buckets[index].count),
        curr: total,
    }
}
