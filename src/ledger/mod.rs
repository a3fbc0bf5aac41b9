//! Result ledger
//!
//! Two newline-delimited JSON files under the output directory:
//! `sync-succeed` is the durable progress checkpoint and is never truncated,
//! `sync-failed` is informational and is reset at the start of a migration
//! run. Membership in the success file is the only thing that makes an image
//! count as already migrated.

pub mod outcome;

pub use outcome::{MigrationOutcome, OutcomeStatus};

use crate::error::{MigratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

pub const SUCCESS_FILE: &str = "sync-succeed";
pub const FAILURE_FILE: &str = "sync-failed";

/// How the ledger treats the failure file when it is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    /// Keep previous failure records
    #[default]
    Sync,
    /// Start the failure file from scratch
    Migration,
}

/// Open handle on the two ledger files
#[derive(Debug)]
pub struct Ledger {
    success_path: PathBuf,
    failure_path: PathBuf,
    success: Mutex<File>,
    failure: Mutex<File>,
}

impl Ledger {
    /// Create the output directory and both files if absent; truncate the
    /// failure file in [`LedgerMode::Migration`].
    pub async fn open(output_dir: &Path, mode: LedgerMode) -> Result<Self> {
        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            MigratorError::Ledger(format!("cannot create {}: {}", output_dir.display(), e))
        })?;

        let success_path = output_dir.join(SUCCESS_FILE);
        let failure_path = output_dir.join(FAILURE_FILE);

        if mode == LedgerMode::Migration {
            File::create(&failure_path).await.map_err(|e| {
                MigratorError::Ledger(format!("cannot reset {}: {}", failure_path.display(), e))
            })?;
        }

        let success = open_append(&success_path).await?;
        let failure = open_append(&failure_path).await?;

        Ok(Self {
            success_path,
            failure_path,
            success: Mutex::new(success),
            failure: Mutex::new(failure),
        })
    }

    pub fn success_path(&self) -> &Path {
        &self.success_path
    }

    pub fn failure_path(&self) -> &Path {
        &self.failure_path
    }

    /// Append one outcome to the matching file.
    ///
    /// Write failures are logged and swallowed; the return value only says
    /// whether the record reached the file.
    pub async fn append(&self, outcome: &MigrationOutcome) -> bool {
        match self.try_append(outcome).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    image = %format!("{}:{}", outcome.image_name, outcome.image_tag),
                    error = %e,
                    "ledger write failed, outcome not recorded"
                );
                false
            }
        }
    }

    async fn try_append(&self, outcome: &MigrationOutcome) -> Result<()> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');

        let file = if outcome.is_success() { &self.success } else { &self.failure };
        let mut file = file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| MigratorError::Ledger(e.to_string()))?;
        file.flush().await.map_err(|e| MigratorError::Ledger(e.to_string()))?;
        Ok(())
    }

    /// Identities of every image recorded in the success file
    pub async fn load_prior_successes(&self) -> Result<SuccessIndex> {
        let _guard = self.success.lock().await;
        Ok(SuccessIndex::from_outcomes(&read_outcomes(&self.success_path).await?))
    }
}

async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| MigratorError::Ledger(format!("cannot open {}: {}", path.display(), e)))
}

/// Read every well-formed record from a ledger file.
///
/// A missing file reads as empty. Lines that do not parse are skipped.
pub async fn read_outcomes(path: &Path) -> Result<Vec<MigrationOutcome>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).lines();
    let mut outcomes = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MigrationOutcome>(&line) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = line_no, error = %e, "skipping malformed ledger line");
            }
        }
    }
    Ok(outcomes)
}

/// Set of already-migrated identities, keyed both ways
#[derive(Debug, Default, Clone)]
pub struct SuccessIndex {
    by_name_tag: HashSet<(String, String)>,
    by_id: HashSet<i64>,
}

impl SuccessIndex {
    pub fn from_outcomes(outcomes: &[MigrationOutcome]) -> Self {
        let mut index = Self::default();
        for outcome in outcomes.iter().filter(|o| o.is_success()) {
            index
                .by_name_tag
                .insert((outcome.image_name.clone(), outcome.image_tag.clone()));
            if let Some(id) = outcome.image_id {
                index.by_id.insert(id);
            }
        }
        index
    }

    pub fn contains_name_tag(&self, name: &str, tag: &str) -> bool {
        self.by_name_tag.contains(&(name.to_string(), tag.to_string()))
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.by_id.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.by_name_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name_tag.is_empty()
    }
}
