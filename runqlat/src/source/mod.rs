//! Sample sources feeding the histogram builder.
//!
//! A source hands out `(entity, slot, count)` triples where `count` is the cumulative
//! number of observations for that key since the source was opened. The producer keeps
//! mutating its counters while a pass reads them, so every pass is an eventually
//! consistent view: a counter may be observed mid-update and a key may be missed or seen
//! twice. Consumers treat each pass as approximate and independent of the previous one.

use thiserror::Error;

pub mod bpf;

pub use bpf::BpfMapSource;

pub type EntityId = u32;

/// One observation read from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub entity: EntityId,
    pub slot: u64,
    pub count: u64,
}

impl Sample {
    pub fn new(entity: EntityId, slot: u64, count: u64) -> Self {
        Self {
            entity,
            slot,
            count,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// The source cannot be opened or read at all. Fatal for the pipeline.
    #[error("sample source unavailable: {0}")]
    Unavailable(String),
    /// A single record could not be decoded. The pass continues without it.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

impl SourceError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::MalformedRecord(_))
    }
}

pub trait SampleSource {
    /// Runs one full pass over the source, handing every record to `visit`.
    ///
    /// Per-record decode failures are delivered as `Err(MalformedRecord)` items; an `Err`
    /// return means the source itself could not be read.
    fn visit(
        &mut self,
        visit: &mut dyn FnMut(Result<Sample, SourceError>),
    ) -> Result<(), SourceError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Replays a fixed list of records on every pass.
    #[derive(Default)]
    pub struct ScriptedSource {
        pub records: Vec<Result<Sample, String>>,
        pub unavailable: bool,
        /// Report the source as lost once this many records have been handed out.
        pub lost_after: Option<usize>,
        pub passes: usize,
    }

    impl ScriptedSource {
        pub fn from_samples(samples: &[(EntityId, u64, u64)]) -> Self {
            Self {
                records: samples
                    .iter()
                    .map(|&(e, s, c)| Ok(Sample::new(e, s, c)))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl SampleSource for ScriptedSource {
        fn visit(
            &mut self,
            visit: &mut dyn FnMut(Result<Sample, SourceError>),
        ) -> Result<(), SourceError> {
            self.passes += 1;
            if self.unavailable {
                return Err(SourceError::Unavailable("scripted failure".to_string()));
            }
            for (index, record) in self.records.iter().enumerate() {
                if self.lost_after == Some(index) {
                    visit(Err(SourceError::Unavailable("map closed mid-pass".to_string())));
                }
                visit(record.clone().map_err(SourceError::MalformedRecord));
            }
            Ok(())
        }
    }
}
