//! Persisted, human-readable files under the process base directory
//! (spec §6): the `bridges` inventory table and per-VM instance files.

use std::path::Path;

use tracing::error;

use crate::error::Result;

pub struct BridgeRow {
    pub name: String,
    pub pre_exist: bool,
    pub vlans: Vec<i32>,
}

/// Rewrite the `bridges` inventory file. Called on every bridge-set change
/// (spec §4.3). Failure to write is a fatal host condition for the caller
/// per spec §7 ("cannot write bridges file ... terminate the process") —
/// we surface the error and let the caller decide, rather than panicking
/// directly, so tests can exercise the failure path.
pub async fn write_bridges_file(path: &Path, rows: &[BridgeRow]) -> Result<()> {
    let mut out = String::new();
    out.push_str(&format!("{:<20} {:<10} VLANS\n", "NAME", "PRE_EXIST"));
    for row in rows {
        let vlans = row
            .vlans
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&format!(
            "{:<20} {:<10} {}\n",
            row.name, row.pre_exist, vlans
        ));
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, out).await.map_err(|e| {
        error!(path = %path.display(), error = %e, "failed to persist bridges inventory file");
        e.into()
    })
}

/// Write one of the small per-instance files (`config`, `name`, `state`,
/// `taps`, ...) under `<instance_path>/<file>`.
pub async fn write_instance_file(instance_path: &Path, file: &str, contents: &str) -> Result<()> {
    tokio::fs::create_dir_all(instance_path).await?;
    tokio::fs::write(instance_path.join(file), contents).await?;
    Ok(())
}

pub async fn read_instance_file(instance_path: &Path, file: &str) -> Result<String> {
    Ok(tokio::fs::read_to_string(instance_path.join(file)).await?)
}
