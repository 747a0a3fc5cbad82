// PROCBENCH RESULT STORE
// LABEL -> LIST OF PARSED RECORDS, SHARED BY EVERY RUNNER THREAD.
//
// ONE MUTEX AROUND THE WHOLE MAP. INSERTS ARE A HANDFUL PER SECOND, SO A
// SINGLE WRITER AT A TIME COSTS NOTHING. THE MAP ITSELF NEVER LEAVES THIS
// MODULE; CALLERS GET CLONES.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parse::StatMap;

// ONE COMPLETED RUN. FIELD NAME -> RAW KERNEL VALUE. IMMUTABLE.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord(StatMap);

impl ResultRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<StatMap> for ResultRecord {
    fn from(map: StatMap) -> Self {
        Self(map)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write results to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Snapshot = BTreeMap<String, Vec<ResultRecord>>;

#[derive(Debug, Default)]
pub struct ResultStore {
    data: Mutex<Snapshot>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A PANICKED INSERTER CANNOT LEAVE THE MAP HALF-UPDATED (push IS THE ONLY
    // MUTATION), SO A POISONED LOCK IS STILL SAFE TO USE
    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, label: &str, record: ResultRecord) {
        let mut data = self.lock();
        data.entry(label.to_string()).or_default().push(record);
    }

    // TOTAL RECORDS ACROSS ALL LABELS
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label_count(&self) -> usize {
        self.lock().len()
    }

    pub fn records(&self, label: &str) -> Vec<ResultRecord> {
        self.lock().get(label).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&*self.lock())?)
    }

    // WRITE TO A SIBLING TEMP FILE, fsync, THEN RENAME OVER THE TARGET.
    // ON SUCCESS THE FILE AT `path` IS COMPLETE; ON FAILURE IT IS UNTOUCHED.
    pub fn serialize(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json()?;
        let tmp = temp_path(path);

        let written = write_synced(&tmp, json.as_bytes()).and_then(|()| fs::rename(&tmp, path));
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.write_all(b"\n")?;
    file.sync_all()
}
