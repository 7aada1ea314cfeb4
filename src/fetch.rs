//! Download of the JSON document from the management endpoint.

use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::types::RemoteDocument;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound on the buffer reserved from a server-supplied Content-Length.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Something that produces the document to back up.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetches the current document.
    async fn fetch(&self) -> Result<RemoteDocument, BackupError>;
}

/// Fetches the document over HTTP(S) with Basic authentication.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl HttpSource {
    /// Builds a source for the endpoint derived from `config`.
    pub fn new(config: &BackupConfig) -> Result<Self, BackupError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("snapguard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: config.backup_url(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Endpoint this source downloads from.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(&self) -> Result<RemoteDocument, BackupError> {
        info!("Connecting to {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| classify_request_error(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(BackupError::Transport(format!(
                    "Authentication rejected by {} (HTTP {}); check BACKUP_USERNAME and \
                     BACKUP_PASSWORD",
                    self.url, status
                )));
            }
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::Transport(format!(
                "Download from {} failed: HTTP {}\nResponse: {}",
                self.url,
                status,
                preview(&body)
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
        {
            debug!(
                "Response content-type is {:?}, parsing as JSON anyway",
                content_type
            );
        }

        let pb = progress_spinner();
        let reserve = response.content_length().unwrap_or(0).min(MAX_PREALLOC);
        let mut body = Vec::with_capacity(reserve as usize);
        let mut byte_stream = response.bytes_stream();
        while let Some(piece) = byte_stream.next().await {
            let chunk = piece.map_err(|e| classify_request_error(&self.url, e))?;
            body.extend_from_slice(&chunk);
            if let Some(ref pb) = pb {
                pb.set_position(body.len() as u64);
            }
        }
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        if let Err(e) = serde_json::from_slice::<serde::de::IgnoredAny>(&body) {
            return Err(BackupError::Parse(format!(
                "Response from {} is not valid JSON: {}",
                self.url, e
            )));
        }

        info!("Downloaded {} bytes", body.len());
        Ok(RemoteDocument { body, content_type })
    }
}

fn classify_request_error(url: &str, e: reqwest::Error) -> BackupError {
    if e.is_timeout() {
        BackupError::Transport(format!("Request to {} timed out: {}", url, e))
    } else if e.is_connect() {
        BackupError::Transport(format!(
            "Could not connect to {}: {}\n\
             Possible causes:\n\
             - the server is not running or the port is closed\n\
             - a firewall blocks the connection\n\
             - BACKUP_URL is wrong",
            url, e
        ))
    } else {
        BackupError::Transport(format!("Request to {} failed: {}", url, e))
    }
}

/// First 500 characters of a response body, for diagnostics.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(500).collect()
}

/// Byte counter shown only when someone is watching the terminal.
fn progress_spinner() -> Option<indicatif::ProgressBar> {
    if !atty::is(atty::Stream::Stderr) {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) =
        indicatif::ProgressStyle::default_spinner().template("{spinner:.cyan} ⬇️  {bytes} {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}
