//! File downloader: stream an HTTP GET response into the downloads directory.
//!
//! One request produces exactly one [`DownloadOutcome`]. There are no retries and no
//! timeout; by default a failed transfer may leave a partial file behind.

use crate::channels::ReplySink;
use crate::config::DownloadsConfig;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

/// Reply sent when the file could not be written.
pub const REPLY_WRITE_FAILED: &str = "Error downloading the file.";
/// Reply sent when the HTTP request or the response body failed.
pub const REPLY_REQUEST_FAILED: &str = "Error occurred while downloading the file.";

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("cannot derive a file name from {0}")]
    InvalidFileName(String),
    #[error("creating downloads directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("opening {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
    #[error("reading response body: {0}")]
    Body(#[source] reqwest::Error),
}

impl DownloadError {
    /// True when the failure is on the disk side rather than the HTTP side.
    pub fn is_write_error(&self) -> bool {
        matches!(
            self,
            DownloadError::InvalidFileName(_)
                | DownloadError::CreateDir { .. }
                | DownloadError::Open { .. }
                | DownloadError::Write { .. }
        )
    }
}

/// Terminal result of one download request.
#[derive(Debug)]
pub enum DownloadOutcome {
    Success { file_name: String },
    Failure { reason: DownloadError },
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success { .. })
    }

    /// Text reported back to the chat.
    pub fn reply_text(&self) -> String {
        match self {
            DownloadOutcome::Success { file_name } => {
                format!("Download complete! File saved as: {}", file_name)
            }
            DownloadOutcome::Failure { reason } if reason.is_write_error() => {
                REPLY_WRITE_FAILED.to_string()
            }
            DownloadOutcome::Failure { .. } => REPLY_REQUEST_FAILED.to_string(),
        }
    }
}

/// A requested transfer: source URL and where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub file_name: String,
    pub destination: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: &str, directory: &Path, strip_query: bool) -> Result<Self, DownloadError> {
        let file_name = derive_file_name(url, strip_query)?;
        Ok(Self {
            url: url.to_string(),
            destination: directory.join(&file_name),
            file_name,
        })
    }
}

/// Final path segment of the URL string (trailing slashes ignored).
///
/// The query string stays part of the name unless `strip_query` is set, so
/// `http://host/file.txt?token=abc` yields `file.txt?token=abc`.
pub fn derive_file_name(url: &str, strip_query: bool) -> Result<String, DownloadError> {
    let mut s = url;
    if strip_query {
        if let Some(i) = s.find(|c: char| c == '?' || c == '#') {
            s = &s[..i];
        }
    }
    let s = s.trim_end_matches('/');
    let name = match s.rfind('/') {
        Some(i) => &s[i + 1..],
        None => s,
    };
    if name.is_empty() || name == "." || name == ".." {
        return Err(DownloadError::InvalidFileName(url.to_string()));
    }
    Ok(name.to_string())
}

/// Streams URLs into the downloads directory.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    directory: PathBuf,
    create_directory: bool,
    strip_query: bool,
    remove_partial: bool,
    preserve_url_case: bool,
}

impl Downloader {
    pub fn new(config: &DownloadsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            directory: config.directory.clone(),
            create_directory: config.create_directory,
            strip_query: config.strip_query,
            remove_partial: config.remove_partial,
            preserve_url_case: config.preserve_url_case,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Whether `!download` URLs keep the case they were sent with.
    pub fn preserve_url_case(&self) -> bool {
        self.preserve_url_case
    }

    pub fn request(&self, url: &str) -> Result<DownloadRequest, DownloadError> {
        DownloadRequest::new(url, &self.directory, self.strip_query)
    }

    /// Download `url` into the downloads directory and report how it ended.
    pub async fn download(&self, url: &str) -> DownloadOutcome {
        let request = match self.request(url) {
            Ok(r) => r,
            Err(reason) => return DownloadOutcome::Failure { reason },
        };
        match self.fetch(&request).await {
            Ok(()) => DownloadOutcome::Success {
                file_name: request.file_name,
            },
            Err(reason) => DownloadOutcome::Failure { reason },
        }
    }

    async fn fetch(&self, request: &DownloadRequest) -> Result<(), DownloadError> {
        if self.create_directory {
            tokio::fs::create_dir_all(&self.directory)
                .await
                .map_err(|source| DownloadError::CreateDir {
                    path: self.directory.clone(),
                    source,
                })?;
        }
        let file = tokio::fs::File::create(&request.destination)
            .await
            .map_err(|source| DownloadError::Open {
                path: request.destination.clone(),
                source,
            })?;
        let result = self.stream_into(request, file).await;
        if result.is_err() && self.remove_partial {
            if let Err(e) = tokio::fs::remove_file(&request.destination).await {
                log::debug!(
                    "download: removing partial file {}: {}",
                    request.destination.display(),
                    e
                );
            }
        }
        result
    }

    /// Copy the response body into `file` chunk by chunk. The file is closed when this returns.
    async fn stream_into(
        &self,
        request: &DownloadRequest,
        mut file: tokio::fs::File,
    ) -> Result<(), DownloadError> {
        let write_err = |source: std::io::Error| DownloadError::Write {
            path: request.destination.clone(),
            source,
        };
        let res = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(DownloadError::Request)?;
        if !res.status().is_success() {
            return Err(DownloadError::Status(res.status()));
        }
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(DownloadError::Body)?;
            file.write_all(&chunk).await.map_err(write_err)?;
        }
        file.flush().await.map_err(write_err)?;
        Ok(())
    }
}

/// Run a download in its own task; the outcome is logged and replied exactly once.
pub fn spawn_download(
    downloader: Arc<Downloader>,
    url: String,
    sink: Arc<dyn ReplySink>,
) -> JoinHandle<DownloadOutcome> {
    tokio::spawn(async move {
        log::info!("download started: {}", url);
        let outcome = downloader.download(&url).await;
        match &outcome {
            DownloadOutcome::Success { file_name } => {
                log::info!("download complete: {} saved as {}", url, file_name)
            }
            DownloadOutcome::Failure { reason } => {
                log::error!("download failed for {}: {}", url, reason)
            }
        }
        if let Err(e) = sink.reply(&outcome.reply_text()).await {
            log::warn!("download: reply failed: {}", e);
        }
        outcome
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_path_segment() {
        assert_eq!(
            derive_file_name("http://example.com/files/file.txt", false).unwrap(),
            "file.txt"
        );
        assert_eq!(
            derive_file_name("https://example.com/dir/", false).unwrap(),
            "dir"
        );
        assert_eq!(
            derive_file_name("http://example.com", false).unwrap(),
            "example.com"
        );
    }

    #[test]
    fn query_kept_unless_stripped() {
        let url = "http://example.com/file.txt?token=abc";
        assert_eq!(derive_file_name(url, false).unwrap(), "file.txt?token=abc");
        assert_eq!(derive_file_name(url, true).unwrap(), "file.txt");
        assert_eq!(
            derive_file_name("http://example.com/a.apk#top", true).unwrap(),
            "a.apk"
        );
    }

    #[test]
    fn empty_or_dot_names_rejected() {
        for url in ["/", "", "http://example.com/..", "http://example.com/./"] {
            assert!(
                matches!(
                    derive_file_name(url, false),
                    Err(DownloadError::InvalidFileName(_))
                ),
                "{url}"
            );
        }
    }

    #[test]
    fn request_joins_directory() {
        let req = DownloadRequest::new("http://h/song.mp3", Path::new("downloads"), false).unwrap();
        assert_eq!(req.file_name, "song.mp3");
        assert_eq!(req.destination, PathBuf::from("downloads/song.mp3"));
        assert_eq!(req.url, "http://h/song.mp3");
    }

    #[test]
    fn reply_text_by_failure_side() {
        let ok = DownloadOutcome::Success {
            file_name: "file.txt".into(),
        };
        assert_eq!(ok.reply_text(), "Download complete! File saved as: file.txt");
        assert!(ok.is_success());

        let write = DownloadOutcome::Failure {
            reason: DownloadError::Open {
                path: PathBuf::from("downloads/x"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
        };
        assert_eq!(write.reply_text(), REPLY_WRITE_FAILED);

        let bad_name = DownloadOutcome::Failure {
            reason: DownloadError::InvalidFileName("/".into()),
        };
        assert_eq!(bad_name.reply_text(), REPLY_WRITE_FAILED);

        let status = DownloadOutcome::Failure {
            reason: DownloadError::Status(reqwest::StatusCode::NOT_FOUND),
        };
        assert_eq!(status.reply_text(), REPLY_REQUEST_FAILED);
        assert!(!status.is_success());
    }
}
