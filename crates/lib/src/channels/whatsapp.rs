//! WhatsApp channel: drives an external bridge process over JSON lines.
//!
//! The bridge owns the WhatsApp Web session (pairing, auth, delivery). It prints one
//! JSON event per line on stdout (`qr`, `ready`, `message`, ...) and reads one JSON
//! command per line on stdin (`send`).

use crate::channels::inbound::InboundMessage;
use crate::channels::registry::ChannelHandle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

/// How long a reply may wait on the bridge's stdin before it is given up.
pub const BRIDGE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Event printed by the bridge on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeEvent {
    /// Pairing code to scan from the phone (first login only).
    Qr { data: String },
    /// Session is usable.
    Ready,
    /// A chat message.
    Message {
        #[serde(rename = "chatId")]
        chat_id: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        body: String,
        #[serde(default, rename = "fromMe")]
        from_me: bool,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
}

/// Command written to the bridge on stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeCommand<'a> {
    Send {
        #[serde(rename = "chatId")]
        chat_id: &'a str,
        text: &'a str,
        #[serde(rename = "quotedMessageId", skip_serializing_if = "Option::is_none")]
        quoted_message_id: Option<&'a str>,
    },
}

/// Parse one stdout line. Non-JSON output and unknown event types yield None.
pub fn parse_bridge_line(line: &str) -> Option<BridgeEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// WhatsApp channel connector: spawns the bridge, forwards messages, writes replies to its stdin.
pub struct WhatsAppChannel {
    id: String,
    command: String,
    args: Vec<String>,
    auth_dir: PathBuf,
    running: AtomicBool,
    shutdown: Notify,
    stdin: Mutex<Option<ChildStdin>>,
    write_timeout: Duration,
}

impl WhatsAppChannel {
    pub fn new(command: impl Into<String>, args: Vec<String>, auth_dir: PathBuf) -> Self {
        Self {
            id: "whatsapp".to_string(),
            command: command.into(),
            args,
            auth_dir,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            stdin: Mutex::new(None),
            write_timeout: BRIDGE_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the bridge and start forwarding its messages to the bot. Returns a handle to await on shutdown.
    pub async fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Result<JoinHandle<()>> {
        std::fs::create_dir_all(&self.auth_dir).with_context(|| {
            format!("creating whatsapp auth directory {}", self.auth_dir.display())
        })?;
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("WABOT_AUTH_DIR", &self.auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning whatsapp bridge `{}`", self.command))?;
        let stdout = child
            .stdout
            .take()
            .context("whatsapp bridge stdout not captured")?;
        *self.stdin.lock().await = child.stdin.take();
        self.running.store(true, Ordering::SeqCst);
        log::info!("whatsapp channel: bridge started ({})", self.command);
        Ok(tokio::spawn(async move {
            run_bridge_loop(self, child, stdout, inbound_tx).await;
        }))
    }

    /// Write one command line. Fails once the channel is stopped, and when the bridge
    /// does not take the line within the write timeout (the stdin lock is held meanwhile).
    async fn write_command(&self, command: &BridgeCommand<'_>) -> Result<(), String> {
        if !self.running() {
            return Err("whatsapp bridge not running".to_string());
        }
        let mut line = serde_json::to_string(command).map_err(|e| e.to_string())?;
        line.push('\n');
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| "whatsapp bridge not running".to_string())?;
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => {
                log::warn!(
                    "whatsapp: bridge did not accept a command within {:?}",
                    self.write_timeout
                );
                Err("whatsapp bridge write timed out".to_string())
            }
        }
    }

    /// Send a text message to a chat, optionally quoting one of its messages.
    pub async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        quoted_message_id: Option<&str>,
    ) -> Result<(), String> {
        self.write_command(&BridgeCommand::Send {
            chat_id,
            text,
            quoted_message_id,
        })
        .await
    }

    /// Act on one bridge event. Returns false when the bot side has gone away.
    async fn handle_event(
        &self,
        event: BridgeEvent,
        inbound_tx: &mpsc::Sender<InboundMessage>,
    ) -> bool {
        match event {
            BridgeEvent::Qr { data } => {
                log::info!("whatsapp: pairing code received, scan it with the phone");
                print_pairing_code(&data);
            }
            BridgeEvent::Ready => log::info!("whatsapp bot is ready"),
            BridgeEvent::Message {
                chat_id,
                id,
                body,
                from_me,
            } => {
                if from_me {
                    return true;
                }
                let inbound = InboundMessage {
                    channel_id: self.id.clone(),
                    conversation_id: chat_id,
                    message_id: id,
                    text: body,
                };
                if inbound_tx.send(inbound).await.is_err() {
                    log::debug!("whatsapp: inbound channel closed, stopping loop");
                    return false;
                }
            }
            BridgeEvent::AuthFailure { message } => {
                log::warn!("whatsapp authentication failed: {}", message)
            }
            BridgeEvent::Disconnected { reason } => {
                log::warn!("whatsapp disconnected: {}", reason)
            }
        }
        true
    }
}

async fn run_bridge_loop(
    channel: Arc<WhatsAppChannel>,
    mut child: Child,
    stdout: ChildStdout,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            _ = channel.shutdown.notified() => {
                let _ = child.kill().await;
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match parse_bridge_line(&line) {
                        Some(event) => {
                            if !channel.handle_event(event, &inbound_tx).await {
                                let _ = child.kill().await;
                                break;
                            }
                        }
                        None => {
                            if !line.trim().is_empty() {
                                log::debug!("whatsapp bridge: {}", line.trim());
                            }
                        }
                    },
                    Ok(None) => {
                        match child.wait().await {
                            Ok(status) => log::warn!("whatsapp bridge exited: {}", status),
                            Err(e) => log::warn!("whatsapp bridge wait failed: {}", e),
                        }
                        break;
                    }
                    Err(e) => {
                        log::warn!("whatsapp bridge read error: {}", e);
                        let _ = child.kill().await;
                        break;
                    }
                }
            }
        }
    }
    channel.running.store(false, Ordering::SeqCst);
    channel.stdin.lock().await.take();
    log::info!("whatsapp channel: bridge loop stopped");
}

/// Render a pairing code as Unicode half blocks (two module rows per text line).
pub fn render_pairing_code(data: &str) -> Option<String> {
    let code = qrcode::QrCode::new(data.as_bytes()).ok()?;
    let width = code.width() as i32;
    let dark: Vec<bool> = code
        .into_colors()
        .into_iter()
        .map(|c| c == qrcode::Color::Dark)
        .collect();
    let at = |x: i32, y: i32| -> bool {
        x >= 0 && y >= 0 && x < width && y < width && dark[(y * width + x) as usize]
    };
    let quiet = 1;
    let mut out = String::new();
    let mut y = -quiet;
    while y < width + quiet {
        for x in -quiet..width + quiet {
            out.push(match (at(x, y), at(x, y + 1)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
        y += 2;
    }
    Some(out)
}

fn print_pairing_code(data: &str) {
    match render_pairing_code(data) {
        Some(rendered) => {
            eprintln!();
            eprintln!("Scan this code with WhatsApp (Settings > Linked Devices > Link a Device):");
            eprintln!();
            for line in rendered.lines() {
                eprintln!("  {}", line);
            }
            eprintln!();
        }
        None => {
            log::warn!("whatsapp: failed to render pairing code");
            eprintln!("pairing code: {}", data);
        }
    }
}

#[async_trait]
impl ChannelHandle for WhatsAppChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        self.send_text(conversation_id, text, None).await
    }

    async fn reply_to(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), String> {
        self.send_text(conversation_id, text, Some(message_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_event() {
        let event =
            parse_bridge_line(r#"{"type":"message","chatId":"123@c.us","id":"ABC","body":"!ping"}"#);
        assert_eq!(
            event,
            Some(BridgeEvent::Message {
                chat_id: "123@c.us".into(),
                id: Some("ABC".into()),
                body: "!ping".into(),
                from_me: false,
            })
        );
    }

    #[test]
    fn parses_lifecycle_events() {
        assert_eq!(parse_bridge_line(r#"{"type":"ready"}"#), Some(BridgeEvent::Ready));
        assert_eq!(
            parse_bridge_line(r#" {"type":"qr","data":"2@xyz"} "#),
            Some(BridgeEvent::Qr { data: "2@xyz".into() })
        );
        assert_eq!(
            parse_bridge_line(r#"{"type":"disconnected","reason":"LOGOUT"}"#),
            Some(BridgeEvent::Disconnected { reason: "LOGOUT".into() })
        );
        assert_eq!(
            parse_bridge_line(r#"{"type":"authFailure","message":"bad session"}"#),
            Some(BridgeEvent::AuthFailure { message: "bad session".into() })
        );
    }

    #[test]
    fn ignores_logs_and_unknown_types() {
        assert_eq!(parse_bridge_line("Loading session..."), None);
        assert_eq!(parse_bridge_line(""), None);
        assert_eq!(parse_bridge_line(r#"{"type":"battery","level":40}"#), None);
    }

    #[test]
    fn send_command_json() {
        let cmd = BridgeCommand::Send {
            chat_id: "123@c.us",
            text: "Pong!",
            quoted_message_id: Some("ABC"),
        };
        let v: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "type": "send",
                "chatId": "123@c.us",
                "text": "Pong!",
                "quotedMessageId": "ABC"
            })
        );
        let plain = BridgeCommand::Send {
            chat_id: "1",
            text: "hi",
            quoted_message_id: None,
        };
        let v = serde_json::to_value(&plain).unwrap();
        assert!(v.get("quotedMessageId").is_none());
    }

    #[test]
    fn pairing_code_renders_square_block() {
        let rendered = render_pairing_code("2@abcdef,ghijkl,mnopqr").unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(!lines.is_empty());
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
        assert!(rendered.contains('█') || rendered.contains('▀') || rendered.contains('▄'));
    }

    #[tokio::test]
    async fn send_without_bridge_fails() {
        let channel = WhatsAppChannel::new("node", vec![], std::env::temp_dir());
        assert!(channel.send_message("1", "hi").await.is_err());
        assert!(!channel.running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwards_messages_and_writes_replies() {
        let auth_dir = std::env::temp_dir().join(format!("wabot-bridge-test-{}", uuid::Uuid::new_v4()));
        let script = r#"
echo 'starting bridge'
echo '{"type":"ready"}'
echo '{"type":"message","chatId":"c1","body":"mine","fromMe":true}'
echo '{"type":"message","chatId":"c1","id":"m1","body":"!ping"}'
exec cat > "$WABOT_AUTH_DIR/sent.jsonl"
"#;
        let channel = Arc::new(WhatsAppChannel::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            auth_dir.clone(),
        ));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = channel.clone().start_inbound(tx).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("message within 5s")
            .expect("inbound channel open");
        assert_eq!(msg.channel_id, "whatsapp");
        assert_eq!(msg.conversation_id, "c1");
        assert_eq!(msg.message_id.as_deref(), Some("m1"));
        assert_eq!(msg.text, "!ping");

        assert!(channel.running());
        channel.reply_to("c1", "m1", "Pong!").await.unwrap();

        let sent_path = auth_dir.join("sent.jsonl");
        let mut sent = String::new();
        for _ in 0..100 {
            sent = std::fs::read_to_string(&sent_path).unwrap_or_default();
            if sent.ends_with('\n') {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let v: serde_json::Value = serde_json::from_str(sent.trim()).expect("one JSON line");
        assert_eq!(v["type"], "send");
        assert_eq!(v["chatId"], "c1");
        assert_eq!(v["text"], "Pong!");
        assert_eq!(v["quotedMessageId"], "m1");

        channel.stop();
        // Rejected right away, before the loop has released the bridge.
        assert!(channel.send_message("c1", "after stop").await.is_err());
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stops within 5s")
            .unwrap();
        assert!(!channel.running());
        assert!(channel.send_message("c1", "late").await.is_err());
        let _ = std::fs::remove_dir_all(&auth_dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_bridge_write_times_out() {
        let auth_dir =
            std::env::temp_dir().join(format!("wabot-bridge-test-{}", uuid::Uuid::new_v4()));
        // Never reads stdin, so the pipe fills up.
        let script = "echo '{\"type\":\"ready\"}'; exec sleep 30";
        let channel = Arc::new(
            WhatsAppChannel::new(
                "sh",
                vec!["-c".to_string(), script.to_string()],
                auth_dir.clone(),
            )
            .with_write_timeout(Duration::from_millis(200)),
        );
        let (tx, _rx) = mpsc::channel(8);
        let handle = channel.clone().start_inbound(tx).await.unwrap();

        let big = "x".repeat(1024 * 1024);
        let err = tokio::time::timeout(Duration::from_secs(5), channel.send_message("c1", &big))
            .await
            .expect("send gives up within 5s")
            .unwrap_err();
        assert!(err.contains("timed out"), "{err}");

        channel.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stops within 5s")
            .unwrap();
        let _ = std::fs::remove_dir_all(&auth_dir);
    }
}
