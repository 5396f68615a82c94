//! On-disk run records so `status` can report runs started by another
//! process.

use std::path::PathBuf;

use anyhow::Context;
use casmig_core::{MigrationConfig, MigrationProgress, MigrationResult, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last known state of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: RunId,
    pub source: String,
    pub target: String,
    pub config: MigrationConfig,
    pub created_at: DateTime<Utc>,
    pub progress: Option<MigrationProgress>,
    pub result: Option<MigrationResult>,
}

impl RunRecord {
    pub fn new(run_id: RunId, source: String, target: String, config: MigrationConfig) -> Self {
        RunRecord {
            run_id,
            source,
            target,
            config,
            created_at: Utc::now(),
            progress: None,
            result: None,
        }
    }
}

/// Directory holding one `<run_id>.json` per run.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StateDir { root: root.into() }
    }

    /// `$TMPDIR/casmig-runs`, used when no directory is configured.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("casmig-runs")
    }

    fn path_for(&self, id: &RunId) -> PathBuf {
        self.root.join(format!("{}.json", id.as_str()))
    }

    /// Write the record through a temporary file so readers never see a
    /// partial document.
    pub async fn save(&self, record: &RunRecord) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating state dir {}", self.root.display()))?;
        let path = self.path_for(&record.run_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    pub async fn load(&self, id: &RunId) -> anyhow::Result<Option<RunRecord>> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let record = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(record))
    }
}
