//! Minimal QEMU Machine Protocol client over a UNIX domain socket.
//!
//! QMP is JSON-lines: each command is a single-line JSON object, each
//! reply or event is a single-line JSON object terminated by `\n`. The
//! greeting and `qmp_capabilities` negotiation run once at connect time.
//! Full codec correctness (out-of-band commands, every QAPI type) is a
//! named, out-of-scope collaborator — this client knows the handful of
//! commands the supervisor and backends actually issue plus raw
//! passthrough for anything else.

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::error::{Result, VmError};

/// An asynchronous QMP event, decoded just enough to expose its name.
#[derive(Debug, Clone)]
pub struct QmpEvent {
    pub name: String,
    pub data: Value,
}

pub struct QmpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl QmpClient {
    /// Connect and complete the capabilities handshake. Returns
    /// [`VmError::QmpUnavailable`] style [`VmError::Io`] if the socket
    /// isn't there yet; callers that need dial-with-retry (the KVM
    /// supervisor's launch path) loop this themselves.
    pub async fn connect(path: &Path, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| VmError::Qmp(format!("connect to {} timed out", path.display())))??;

        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        // Greeting banner.
        let _greeting = client.read_line_json().await?;

        client
            .call("qmp_capabilities", None)
            .await
            .map_err(|e| VmError::Qmp(format!("capabilities negotiation failed: {e}")))?;

        Ok(client)
    }

    async fn read_line_json(&mut self) -> Result<Value> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(VmError::Qmp("QMP socket closed".into()));
        }
        serde_json::from_str(&line).map_err(Into::into)
    }

    /// Issue a raw QMP command, skipping any asynchronous events that
    /// arrive before the matching reply.
    pub async fn call(&mut self, execute: &str, arguments: Option<Value>) -> Result<Value> {
        let mut cmd = json!({ "execute": execute });
        if let Some(args) = arguments {
            cmd["arguments"] = args;
        }
        let mut line = serde_json::to_string(&cmd)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        loop {
            let reply = self.read_line_json().await?;
            if reply.get("event").is_some() {
                continue;
            }
            if let Some(err) = reply.get("error") {
                return Err(VmError::Qmp(err.to_string()));
            }
            return Ok(reply.get("return").cloned().unwrap_or(Value::Null));
        }
    }

    pub async fn query_status(&mut self) -> Result<String> {
        let ret = self.call("query-status", None).await?;
        Ok(ret
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    pub async fn cont(&mut self) -> Result<()> {
        self.call("cont", None).await.map(|_| ())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.call("stop", None).await.map(|_| ())
    }

    pub async fn system_powerdown(&mut self) -> Result<()> {
        self.call("system_powerdown", None).await.map(|_| ())
    }

    pub async fn quit(&mut self) -> Result<()> {
        self.call("quit", None).await.map(|_| ())
    }

    /// `migrate "exec:cat <file>"`.
    pub async fn migrate_exec(&mut self, file: &str) -> Result<()> {
        self.call("migrate", Some(json!({ "uri": format!("exec:cat {file}") })))
            .await
            .map(|_| ())
    }

    pub async fn query_migrate(&mut self) -> Result<Value> {
        self.call("query-migrate", None).await
    }

    pub async fn device_del(&mut self, id: &str) -> Result<()> {
        self.call("device_del", Some(json!({ "id": id })))
            .await
            .map(|_| ())
    }

    pub async fn drive_del(&mut self, id: &str) -> Result<()> {
        self.call("human-monitor-command", Some(json!({ "command-line": format!("drive_del {id}") })))
            .await
            .map(|_| ())
    }

    pub async fn blockdev_add(&mut self, node_name: &str, path: &str) -> Result<()> {
        self.call(
            "blockdev-add",
            Some(json!({ "driver": "qcow2", "node-name": node_name, "file": {
                "driver": "file", "filename": path
            }})),
        )
        .await
        .map(|_| ())
    }

    pub async fn device_add(&mut self, id: &str, driver: &str, drive: &str) -> Result<()> {
        self.call(
            "device_add",
            Some(json!({ "id": id, "driver": driver, "drive": drive })),
        )
        .await
        .map(|_| ())
    }

    /// Spawn a background task forwarding every subsequent event line to
    /// `tx` until the socket closes. Consumes the client since after this
    /// point only the reader task owns the stream; callers that need both
    /// commands and events should keep a separate client for commands.
    pub fn spawn_event_logger(mut self) -> mpsc::Receiver<QmpEvent> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            loop {
                match self.read_line_json().await {
                    Ok(v) => {
                        if let Some(name) = v.get("event").and_then(Value::as_str) {
                            let data = v.get("data").cloned().unwrap_or(Value::Null);
                            if tx
                                .send(QmpEvent {
                                    name: name.to_string(),
                                    data,
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        rx
    }
}
