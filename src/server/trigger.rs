//! Newline-delimited command listener for PLCs and line controllers.
//!
//! Each line is either JSON (`{"command": "INSPECT", "image_path": "..."}`) or plain
//! text (`INSPECT /path/to/image.png`). Every request gets exactly one JSON line back.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{InspectionService, VERSION, stopped};

/// One parsed request line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TriggerMessage {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl TriggerMessage {
    /// JSON when the line parses as a JSON object, otherwise `COMMAND [path]`.
    pub fn parse(raw: &str) -> Self {
        if let Ok(message) = serde_json::from_str::<TriggerMessage>(raw) {
            return message;
        }
        let mut parts = raw.split_whitespace();
        Self {
            command: parts.next().unwrap_or_default().to_string(),
            image_path: parts.next().map(str::to_string),
            parameters: None,
        }
    }
}

/// Listener counters.
#[derive(Debug, Default)]
pub struct TriggerStats {
    total_connections: AtomicU64,
    total_triggers: AtomicU64,
    active_connections: AtomicU64,
    failed_connections: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStatsSnapshot {
    pub total_connections: u64,
    pub total_triggers: u64,
    pub active_connections: u64,
    pub failed_connections: u64,
}

impl TriggerStats {
    pub fn snapshot(&self) -> TriggerStatsSnapshot {
        TriggerStatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_triggers: self.total_triggers.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active count when a session ends, however it ends.
struct ActiveGuard(Arc<TriggerStats>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

enum Reply {
    Continue(Value),
    Close(Value),
}

#[derive(Clone)]
pub struct TriggerListener {
    service: Arc<InspectionService>,
    stats: Arc<TriggerStats>,
    idle_timeout: Duration,
    max_connections: u64,
}

impl TriggerListener {
    pub fn new(service: Arc<InspectionService>) -> Self {
        let config = service.server_config();
        let idle_timeout = Duration::from_secs(config.trigger_idle_timeout_secs);
        let max_connections = config.max_connections as u64;
        Self {
            service,
            stats: Arc::new(TriggerStats::default()),
            idle_timeout,
            max_connections,
        }
    }

    /// Accept connections until `stop` is raised.
    pub async fn serve(self, listener: TcpListener, stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        let shutdown = stopped(stop);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => self.admit(socket, peer),
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        self.stats.failed_connections.fetch_add(1, Ordering::Relaxed);
                    }
                },
            }
        }
        info!("trigger listener stopped");
        Ok(())
    }

    fn admit(&self, socket: TcpStream, peer: SocketAddr) {
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        if self.stats.active_connections.load(Ordering::Relaxed) >= self.max_connections {
            warn!(%peer, "max connections reached, rejecting");
            self.stats.failed_connections.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        let guard = ActiveGuard(self.stats.clone());
        let session = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            info!(%peer, "trigger connection opened");
            if let Err(e) = session.run_session(socket, peer).await {
                warn!(%peer, error = %e, "trigger session error");
            }
            info!(%peer, "trigger connection closed");
        });
    }

    async fn run_session(&self, socket: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match tokio::time::timeout(self.idle_timeout, lines.next_line()).await {
                Err(_) => {
                    debug!(%peer, "idle timeout");
                    return Ok(());
                }
                Ok(line) => match line? {
                    Some(line) => line,
                    None => return Ok(()),
                },
            };
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            debug!(%peer, message = line, "trigger received");

            self.stats.total_triggers.fetch_add(1, Ordering::Relaxed);
            let (response, close) = match self.handle(TriggerMessage::parse(line)).await {
                Reply::Continue(v) => (v, false),
                Reply::Close(v) => (v, true),
            };
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            if close {
                writer.shutdown().await?;
                return Ok(());
            }
        }
    }

    async fn handle(&self, message: TriggerMessage) -> Reply {
        let command = message.command.to_ascii_uppercase();
        info!(command = %command, "trigger command");
        match command.as_str() {
            "INSPECT" => Reply::Continue(self.inspect(message.image_path).await),
            "STATUS" => Reply::Continue(self.status()),
            "STATISTICS" => Reply::Continue(self.statistics()),
            "STOP" => Reply::Close(json!({"status": "ok", "message": "Session closed"})),
            _ => Reply::Continue(error_reply(format!("Unknown command: {}", message.command))),
        }
    }

    async fn inspect(&self, image_path: Option<String>) -> Value {
        let Some(path) = image_path.filter(|p| !p.is_empty()) else {
            return error_reply("image_path is required".to_string());
        };
        let service = self.service.clone();
        let outcome = tokio::task::spawn_blocking(move || service.inspect_path(&path)).await;
        match outcome {
            Ok(Ok(result)) if result.success => {
                info!(judgment = result.judgment(), defects = result.defects.len(), "inspection via trigger");
                json!({"status": "ok", "result": result.to_json()})
            }
            Ok(Ok(result)) => error_reply(result.error_message),
            Ok(Err(e)) => error_reply(e.to_string()),
            Err(e) => error_reply(format!("Exception: {e}")),
        }
    }

    fn status(&self) -> Value {
        let config = self.service.server_config();
        json!({
            "status": "ok",
            "server_info": {
                "version": VERSION,
                "running": true,
                "trigger_handler_running": true,
                "api_server_running": config.rest_enabled,
                "trigger_port": config.trigger_port,
                "api_port": config.rest_port,
            }
        })
    }

    fn statistics(&self) -> Value {
        let controller = self.service.controller().statistics();
        let listener = self.stats.snapshot();
        json!({
            "status": "ok",
            "statistics": {
                "total_inspections": controller.total_inspections,
                "total_defects": controller.total_defects_found,
                "total_ng_count": controller.total_ng_count,
                "average_processing_time": controller.average_processing_time_ms,
                "trigger_total_connections": listener.total_connections,
                "trigger_total_triggers": listener.total_triggers,
                "trigger_active_connections": listener.active_connections,
                "trigger_failed_connections": listener.failed_connections,
            }
        })
    }
}

fn error_reply(message: String) -> Value {
    json!({"status": "error", "message": message})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_messages() {
        let message = TriggerMessage::parse(r#"{"command":"INSPECT","image_path":"a.png"}"#);
        assert_eq!(message.command, "INSPECT");
        assert_eq!(message.image_path.as_deref(), Some("a.png"));
    }

    #[test]
    fn falls_back_to_text() {
        let message = TriggerMessage::parse("INSPECT  /tmp/b.png");
        assert_eq!(message.command, "INSPECT");
        assert_eq!(message.image_path.as_deref(), Some("/tmp/b.png"));
        assert_eq!(TriggerMessage::parse("STATUS").image_path, None);
    }

    #[test]
    fn json_without_command_is_empty_command() {
        assert_eq!(TriggerMessage::parse(r#"{"image_path":"x"}"#).command, "");
    }
}
