use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::lsa::LsaType;

const SEQ_FILE_NAME: &str = "sequence-numbers.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SeqCounters {
    name: u64,
    adjacency: u64,
    coordinate: u64,
}

/// Per-type sequence counters for this router's own LSAs, persisted on
/// every increment. A restart must never reuse or regress a sequence
/// number, otherwise stale flooded copies would look authoritative.
#[derive(Debug)]
pub struct SequencingManager {
    path: PathBuf,
    counters: SeqCounters,
}

impl SequencingManager {
    pub fn load_or_init(state_dir: &Path) -> anyhow::Result<Self> {
        let path = state_dir.join(SEQ_FILE_NAME);
        let counters = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let counters: SeqCounters = serde_json::from_str(&content)?;
                info!(
                    "loaded sequence counters from {}: name={} adjacency={} coordinate={}",
                    path.display(),
                    counters.name,
                    counters.adjacency,
                    counters.coordinate
                );
                counters
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no sequence file at {}, starting from zero", path.display());
                SeqCounters::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, counters })
    }

    pub fn current(&self, lsa_type: LsaType) -> u64 {
        match lsa_type {
            LsaType::Name => self.counters.name,
            LsaType::Adjacency => self.counters.adjacency,
            LsaType::Coordinate => self.counters.coordinate,
        }
    }

    /// Bump the counter for one LSA type and persist before returning the
    /// new value.
    pub fn increment(&mut self, lsa_type: LsaType) -> anyhow::Result<u64> {
        let counter = match lsa_type {
            LsaType::Name => &mut self.counters.name,
            LsaType::Adjacency => &mut self.counters.adjacency,
            LsaType::Coordinate => &mut self.counters.coordinate,
        };
        *counter += 1;
        let value = *counter;
        self.persist()?;
        Ok(value)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(&self.counters)?;
        // Write-then-rename so a crash mid-write cannot truncate the file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
