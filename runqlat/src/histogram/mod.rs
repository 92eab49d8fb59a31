//! Per-entity log2 latency histograms.
//!
//! A [`HistogramSnapshot`] is built from one pass over a [`SampleSource`], used for one
//! report and then dropped. Nothing is carried between passes: counters are cumulative on
//! the producer side, so each snapshot already reflects everything observed so far.

use std::collections::{BTreeMap, HashMap};

use log::warn;
use serde::Deserialize;

use crate::source::{EntityId, Sample, SampleSource, SourceError};

pub mod percentile;

pub use percentile::{Estimate, Estimator, Mode, QueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub slot: u64,
    pub count: u64,
}

impl Bucket {
    pub fn new(slot: u64, count: u64) -> Self {
        Self { slot, count }
    }
}

/// Buckets of a single entity.
///
/// Ordered by slot once [`Histogram::sort`] has run. Slots are unique unless the snapshot
/// was built with [`DuplicatePolicy::Keep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    buckets: Vec<Bucket>,
}

impl Histogram {
    /// Pairs parallel `bins` and `counts` columns into a sorted histogram.
    pub fn from_parts(bins: &[u64], counts: &[u64]) -> Result<Self, QueryError> {
        if bins.len() != counts.len() {
            return Err(QueryError::LengthMismatch {
                bins: bins.len(),
                counts: counts.len(),
            });
        }
        let mut histogram: Self = bins
            .iter()
            .zip(counts)
            .map(|(&slot, &count)| Bucket::new(slot, count))
            .collect();
        histogram.sort();
        Ok(histogram)
    }

    pub fn push(&mut self, bucket: Bucket) {
        self.buckets.push(bucket);
    }

    /// Orders buckets by slot, then by count for equal slots, so the result does not depend
    /// on the order the source produced them in.
    pub fn sort(&mut self) {
        self.buckets
            .sort_unstable_by(|a, b| a.slot.cmp(&b.slot).then(a.count.cmp(&b.count)));
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.buckets
            .iter()
            .fold(0u64, |acc, b| acc.saturating_add(b.count))
    }
}

impl FromIterator<Bucket> for Histogram {
    fn from_iter<I: IntoIterator<Item = Bucket>>(iter: I) -> Self {
        Self {
            buckets: iter.into_iter().collect(),
        }
    }
}

/// What to do with several records for the same `(entity, slot)` within one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Add the counts together into a single bucket.
    #[default]
    Sum,
    /// Keep every record as its own bucket.
    Keep,
}

#[derive(Debug, Clone, Default)]
pub struct HistogramSnapshot {
    histograms: BTreeMap<EntityId, Histogram>,
    skipped: usize,
}

impl HistogramSnapshot {
    pub fn get(&self, entity: EntityId) -> Option<&Histogram> {
        self.histograms.get(&entity)
    }

    /// Histograms in ascending entity order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Histogram)> {
        self.histograms.iter().map(|(id, h)| (*id, h))
    }

    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Records dropped as malformed while building.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Groups already collected samples by entity. Every error item counts as a skipped
/// record; the returned histograms are sorted.
pub fn from_samples<I>(samples: I, policy: DuplicatePolicy) -> HistogramSnapshot
where
    I: IntoIterator<Item = Result<Sample, SourceError>>,
{
    let mut builder = Builder::new(policy);
    for sample in samples {
        builder.accept(sample);
    }
    builder.finish()
}

/// Runs one pass over `source` and builds a sorted snapshot.
///
/// Returns the source error unchanged when the source is unavailable; nothing is retried.
pub fn build<S>(source: &mut S, policy: DuplicatePolicy) -> Result<HistogramSnapshot, SourceError>
where
    S: SampleSource + ?Sized,
{
    let mut builder = Builder::new(policy);
    let mut fatal = None;
    source.visit(&mut |record| {
        if fatal.is_some() {
            return;
        }
        match record {
            Err(e) if !e.is_recoverable() => fatal = Some(e),
            record => builder.accept(record),
        }
    })?;

    match fatal {
        Some(e) => Err(e),
        None => Ok(builder.finish()),
    }
}

struct Builder {
    policy: DuplicatePolicy,
    summed: HashMap<(EntityId, u64), u64>,
    kept: BTreeMap<EntityId, Histogram>,
    skipped: usize,
}

impl Builder {
    fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            summed: HashMap::new(),
            kept: BTreeMap::new(),
            skipped: 0,
        }
    }

    fn accept(&mut self, record: Result<Sample, SourceError>) {
        let sample = match record {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Skipping record: {}", e);
                self.skipped += 1;
                return;
            }
        };

        match self.policy {
            DuplicatePolicy::Sum => {
                let count = self.summed.entry((sample.entity, sample.slot)).or_insert(0);
                *count = count.saturating_add(sample.count);
            }
            DuplicatePolicy::Keep => {
                self.kept
                    .entry(sample.entity)
                    .or_default()
                    .push(Bucket::new(sample.slot, sample.count));
            }
        }
    }

    fn finish(self) -> HistogramSnapshot {
        let mut histograms = self.kept;
        for ((entity, slot), count) in self.summed {
            histograms
                .entry(entity)
                .or_default()
                .push(Bucket::new(slot, count));
        }
        for histogram in histograms.values_mut() {
            histogram.sort();
        }
        HistogramSnapshot {
            histograms,
            skipped: self.skipped,
        }
    }
}
