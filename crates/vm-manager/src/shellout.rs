use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, VmError};

/// Captured output of a shelled-out command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Every `ovs-*` invocation is globally serialized: OVS tolerates concurrent
/// callers but inventory-type edits (`--id=@x create ...`) must not
/// interleave. Leaf lock — may be acquired under any other lock (§5).
static OVS_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Runs an external binary with captured stdout/stderr.
///
/// Abstracted behind a trait so bridge/KVM unit tests can substitute a fake
/// without touching the real `ip`/`ovs-vsctl`/`qemu-system-x86_64` binaries.
pub trait Runner: fmt::Debug + Send + Sync {
    fn run<'a>(
        &'a self,
        program: &'a Path,
        args: &'a [String],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput>>;
}

/// Real `tokio::process::Command`-backed runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run<'a>(
        &'a self,
        program: &'a Path,
        args: &'a [String],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput>> {
        Box::pin(async move {
            debug!(program = %program.display(), ?args, "shell-out");
            let fut = tokio::process::Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .output();

            let output = tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| VmError::ExternalToolFailure {
                    tool: program.display().to_string(),
                    stderr: format!("timed out after {timeout:?}"),
                })?
                .map_err(|e| VmError::ExternalToolFailure {
                    tool: program.display().to_string(),
                    stderr: e.to_string(),
                })?;

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                success: output.status.success(),
            })
        })
    }
}

/// Run a command, serialized against every other OVS invocation process-wide.
pub async fn run_ovs_serialized(
    runner: &dyn Runner,
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput> {
    let _guard = OVS_LOCK.lock().await;
    runner.run(program, args, timeout).await
}

/// Run a command without the OVS serialization lock (`ip`, `dhcp`, ...).
pub async fn run(
    runner: &dyn Runner,
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput> {
    runner.run(program, args, timeout).await
}

/// `ip tuntap add` reports a pre-existing device this way; distinguish it
/// from a genuine failure so callers can decide whether the caller-supplied
/// name should be treated as already theirs.
pub fn classify_tuntap_stderr(stderr: &str) -> Option<VmError> {
    if stderr.contains("Device or resource busy") {
        Some(VmError::AlreadyExists {
            what: "tap interface".into(),
            detail: stderr.trim().to_string(),
        })
    } else {
        None
    }
}

/// OVS reports a pre-existing port/bridge this way.
pub fn is_ovs_already_exists(stderr: &str) -> bool {
    stderr.contains("already exists")
}

pub fn tool_failure(tool: &str, out: &CommandOutput) -> VmError {
    VmError::ExternalToolFailure {
        tool: tool.to_string(),
        stderr: out.stderr.clone(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted runner: returns the next queued [`CommandOutput`] for each
    /// call, recording the invocation for assertions.
    #[derive(Debug, Default)]
    pub struct FakeRunner {
        pub calls: StdMutex<Vec<(String, Vec<String>)>>,
        pub responses: StdMutex<VecDeque<Result<CommandOutput>>>,
    }

    impl FakeRunner {
        pub fn push_ok(&self, stdout: &str) {
            self.responses.lock().unwrap().push_back(Ok(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                success: true,
            }));
        }

        pub fn push_err(&self, stderr: &str) {
            self.responses.lock().unwrap().push_back(Ok(CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                success: false,
            }));
        }
    }

    impl Runner for FakeRunner {
        fn run<'a>(
            &'a self,
            program: &'a Path,
            args: &'a [String],
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<CommandOutput>> {
            self.calls
                .lock()
                .unwrap()
                .push((program.display().to_string(), args.to_vec()));
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(CommandOutput {
                        success: true,
                        ..Default::default()
                    })
                });
            Box::pin(async move { next })
        }
    }
}
