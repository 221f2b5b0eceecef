use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::error::{Result, VmError};

/// Single producer of unused host interface names `<prefix>N`, skipping any
/// name already present under `/sys/class/net`.
///
/// Exposes a single-consumer blocking `next_name`; the internal lock gives
/// callers atomicity-by-construction for "give me a fresh tap name" even
/// when many launches race for one.
#[derive(Debug)]
pub struct TapAllocator {
    prefix: String,
    next: AtomicU64,
    draw_lock: Mutex<()>,
}

impl TapAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
            draw_lock: Mutex::new(()),
        }
    }

    /// Draw the next name not already present on the host.
    ///
    /// Fatal only if `stat` fails for a reason other than "not found".
    pub async fn next_name(&self) -> Result<String> {
        let _guard = self.draw_lock.lock().await;
        loop {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            let candidate = format!("{}{n}", self.prefix);
            if !interface_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

async fn interface_exists(name: &str) -> Result<bool> {
    let path = Path::new("/sys/class/net").join(name);
    match tokio::fs::metadata(&path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(VmError::ExternalToolFailure {
            tool: "stat".into(),
            stderr: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn draws_distinct_increasing_names() {
        let alloc = TapAllocator::new("test_tap_does_not_exist_");
        let a = alloc.next_name().await.unwrap();
        let b = alloc.next_name().await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("test_tap_does_not_exist_"));
    }
}
