use aya::Ebpf;
use aya::maps::{HashMap, Map, MapData};
use log::debug;
use runqlat_common::{CompactPidKey, PidKey};
use serde::Deserialize;

use super::{Sample, SampleSource, SourceError};

/// Key/value layout of the histogram map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum KeyLayout {
    /// `{ u32 id; u64 slot; }` -> `u64`
    #[default]
    Wide,
    /// `{ u32 id; u32 slot; }` -> `u32`
    Compact,
}

/// Reads the histogram hash map of a loaded object.
///
/// Owns the `Ebpf` handle so the attached programs stay alive for as long as the source
/// is polled. No coordination with the kernel side: entries may be updated, inserted or
/// deleted while a pass iterates them.
pub struct BpfMapSource {
    bpf: Ebpf,
    map_name: String,
    layout: KeyLayout,
}

impl BpfMapSource {
    pub fn new(bpf: Ebpf, map_name: impl Into<String>, layout: KeyLayout) -> Self {
        Self {
            bpf,
            map_name: map_name.into(),
            layout,
        }
    }

    fn map(&self) -> Result<&Map, SourceError> {
        self.bpf
            .map(&self.map_name)
            .ok_or_else(|| SourceError::Unavailable(format!("map {} not found", self.map_name)))
    }
}

impl SampleSource for BpfMapSource {
    fn visit(
        &mut self,
        visit: &mut dyn FnMut(Result<Sample, SourceError>),
    ) -> Result<(), SourceError> {
        let map = self.map()?;
        let mut entries = 0usize;

        match self.layout {
            KeyLayout::Wide => {
                let dist: HashMap<&MapData, PidKey, u64> = HashMap::try_from(map)
                    .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.map_name)))?;
                for entry in dist.iter() {
                    entries += 1;
                    visit(
                        entry
                            .map(|(key, count)| Sample::new(key.id, key.slot, count))
                            .map_err(|e| SourceError::MalformedRecord(e.to_string())),
                    );
                }
            }
            KeyLayout::Compact => {
                let dist: HashMap<&MapData, CompactPidKey, u32> = HashMap::try_from(map)
                    .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.map_name)))?;
                for entry in dist.iter() {
                    entries += 1;
                    visit(
                        entry
                            .map(|(key, count)| {
                                Sample::new(key.id, u64::from(key.slot), u64::from(count))
                            })
                            .map_err(|e| SourceError::MalformedRecord(e.to_string())),
                    );
                }
            }
        }

        debug!("Read {} entries from map {}", entries, self.map_name);
        Ok(())
    }
}
