//! Persisted map of VM name -> [`VmHandle`], the CLI's own bookkeeping
//! layered on top of whatever state each backend keeps in its work
//! directory.

use std::collections::HashMap;
use std::path::PathBuf;

use miette::{IntoDiagnostic, Result};
use vm_manager::VmHandle;

pub type Store = HashMap<String, VmHandle>;

fn store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vmctl")
        .join("state.json")
}

pub async fn load_store() -> Result<Store> {
    let path = store_path();
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => serde_json::from_str(&text).into_diagnostic(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Store::new()),
        Err(e) => Err(e).into_diagnostic(),
    }
}

pub async fn save_store(store: &Store) -> Result<()> {
    let path = store_path();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.into_diagnostic()?;
    }
    let text = serde_json::to_string_pretty(store).into_diagnostic()?;
    tokio::fs::write(&path, text).await.into_diagnostic()
}
