//! Chat commands: parse message text into a [`Command`], then run it.
//!
//! Matching is on the trimmed, lower-cased text. `!download` is a prefix match and
//! its URL is taken from that same lower-cased text unless the downloader is set to
//! preserve URL case.

use crate::channels::ReplySink;
use crate::download::{spawn_download, DownloadOutcome, Downloader};
use chrono::{DateTime, Local, TimeZone};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const PONG: &str = "Pong!";
pub const GREETING: &str = "Hello! How can I assist you today?";
pub const MISSING_URL: &str = "Please provide a valid URL to download.";
pub const HELP_TEXT: &str = "Here are the available commands:\n\
!ping - Responds with Pong!\n\
!hello - Greets you\n\
!time - Shows current time\n\
!download <url> - Downloads a file (audio/video/APK)";

const DOWNLOAD_PREFIX: &str = "!download ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Hello,
    Time,
    Help,
    /// `!download <url>` with a non-empty URL.
    Download(String),
    /// `!download` with nothing after it.
    DownloadMissingUrl,
    /// Anything else; ignored.
    Unknown,
}

/// Parse with the default normalization: the URL is lower-cased along with the rest.
pub fn parse_command(text: &str) -> Command {
    parse_command_with(text, false)
}

/// Parse a message. With `preserve_url_case` the `!download` URL is cut from the
/// original text instead of the lower-cased one.
pub fn parse_command_with(text: &str, preserve_url_case: bool) -> Command {
    let normalized = text.trim().to_lowercase();
    match normalized.as_str() {
        "!ping" => Command::Ping,
        "!hello" => Command::Hello,
        "!time" => Command::Time,
        "!help" => Command::Help,
        "!download" => Command::DownloadMissingUrl,
        _ => {
            let source = if preserve_url_case {
                text
            } else {
                normalized.as_str()
            };
            match download_argument(source) {
                Some(url) if !url.is_empty() => Command::Download(url),
                Some(_) => Command::DownloadMissingUrl,
                None => Command::Unknown,
            }
        }
    }
}

/// Text after a case-insensitive `!download ` prefix, trimmed.
fn download_argument(text: &str) -> Option<String> {
    let t = text.trim_start();
    let head = t.get(..DOWNLOAD_PREFIX.len())?;
    if head.eq_ignore_ascii_case(DOWNLOAD_PREFIX) {
        Some(t[DOWNLOAD_PREFIX.len()..].trim().to_string())
    } else {
        None
    }
}

/// `The current time is: 3:04:05 PM`
pub fn time_reply<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    format!("The current time is: {}", now.format("%-I:%M:%S %p"))
}

/// Run a parsed command against the chat it came from.
///
/// Static replies are sent before this returns. A download is spawned and its task
/// handle returned; its outcome is replied through the same sink when it finishes.
pub async fn dispatch(
    command: Command,
    sink: Arc<dyn ReplySink>,
    downloader: &Arc<Downloader>,
) -> Option<JoinHandle<DownloadOutcome>> {
    let text = match command {
        Command::Ping => PONG.to_string(),
        Command::Hello => GREETING.to_string(),
        Command::Time => time_reply(&Local::now()),
        Command::Help => HELP_TEXT.to_string(),
        Command::DownloadMissingUrl => MISSING_URL.to_string(),
        Command::Download(url) => return Some(spawn_download(downloader.clone(), url, sink)),
        Command::Unknown => return None,
    };
    if let Err(e) = sink.reply(&text).await {
        log::warn!("command reply failed: {}", e);
    }
    None
}

/// Parse and dispatch one message text.
pub async fn handle_text(
    text: &str,
    sink: Arc<dyn ReplySink>,
    downloader: &Arc<Downloader>,
) -> Option<JoinHandle<DownloadOutcome>> {
    let command = parse_command_with(text, downloader.preserve_url_case());
    log::debug!("command: {:?}", command);
    dispatch(command, sink, downloader).await
}
