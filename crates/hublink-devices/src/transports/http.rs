/*!
 * HTTP hub transport.
 *
 * Talks to a hub over its JSON-over-HTTP interface with reqwest.
 */
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use hublink_core::error::{Error, Result};

use crate::transport::HubTransport;

/// A hub reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpHub {
    url: String,
    client: reqwest::Client,
}

impl HttpHub {
    /// Create a transport for the hub at `url`, e.g. `http://127.0.0.1:4444`
    pub fn new<S: Into<String>>(url: S) -> Result<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::invalid_argument(format!("{} is not an HTTP URL", url)));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::io(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { url, client })
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        debug!("GET {}{}", self.url, path);
        let response = self
            .client
            .get(format!("{}{}", self.url, path))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(path, response.status())?;
        response.bytes().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl HubTransport for HttpHub {
    fn url(&self) -> &str {
        &self.url
    }

    async fn send_command(&self, path: &str) -> Result<Bytes> {
        self.get(path).await
    }

    async fn download(&self, path: &str) -> Result<Bytes> {
        self.get(path).await
    }

    async fn upload(&self, path: &str, content: &[u8]) -> Result<()> {
        debug!("POST {}{} ({} bytes)", self.url, path, content.len());
        let response = self
            .client
            .post(format!("{}{}", self.url, path))
            .body(content.to_vec())
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(path, response.status())
    }
}

fn check_status(path: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        404 => Err(Error::not_found(format!("hub has no resource {}", path))),
        401 | 403 => Err(Error::io(format!("hub refused access to {} ({})", path, status))),
        _ => Err(Error::io(format!("hub answered {} to {}", status, path))),
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(e.to_string())
    } else {
        Error::io(e.to_string())
    }
}
