/*!
 * Embedded filesystem of a module.
 *
 * Listing, removal and formatting are module commands; file contents travel
 * through the hub's download and upload endpoints.
 */
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use hublink_core::error::{Error, Result, StatusCode};

use super::FunctionClass;
use crate::function::FunctionProxy;
use crate::schema::{AttributeSpec, Encoding, FunctionSchema};
use crate::transport::paths;

/// Schema of the `Files` class
pub static SCHEMA: FunctionSchema = FunctionSchema {
    class_name: "Files",
    attributes: &[
        AttributeSpec::new("filesCount", Encoding::Integer),
        AttributeSpec::new("freeSpace", Encoding::Integer).immediate(),
    ],
};

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// CRC-32 of the content
    pub crc: i64,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    res: String,
}

/// A module filesystem
#[derive(Debug, Clone)]
pub struct Files {
    proxy: Arc<FunctionProxy>,
}

impl FunctionClass for Files {
    fn schema() -> &'static FunctionSchema {
        &SCHEMA
    }

    fn from_proxy(proxy: Arc<FunctionProxy>) -> Self {
        Self { proxy }
    }

    fn proxy(&self) -> &Arc<FunctionProxy> {
        &self.proxy
    }
}

impl Files {
    /// Number of stored files
    pub async fn files_count(&self) -> Result<i64> {
        self.proxy.get_integer("filesCount").await
    }

    /// Free space, in bytes; read from the device on every call
    pub async fn free_space(&self) -> Result<i64> {
        self.proxy.get_integer("freeSpace").await
    }

    /// Files whose name matches `pattern`; an empty pattern lists everything
    pub async fn get_list(&self, pattern: &str) -> Result<Vec<FileRecord>> {
        let result = self.list(pattern).await;
        self.proxy.guard(result, Vec::new())
    }

    /// Whether a file named `name` exists
    pub async fn file_exists(&self, name: &str) -> Result<bool> {
        if name.is_empty() {
            return Ok(false);
        }
        let result = self
            .list(name)
            .await
            .map(|records| records.iter().any(|r| r.name == name));
        self.proxy.guard(result, false)
    }

    /// Content of a file
    pub async fn download(&self, name: &str) -> Result<Bytes> {
        let result = self
            .proxy
            .download(|id| paths::file_download(id.module(), name))
            .await;
        self.proxy.guard(result, Bytes::new())
    }

    /// Store a file, replacing any file with the same name
    pub async fn upload(&self, name: &str, content: &[u8]) -> Result<StatusCode> {
        let result = if name.is_empty() {
            Err(Error::invalid_argument("file name must not be empty"))
        } else {
            self.proxy
                .upload(|id| paths::file_upload(id.module(), name), content)
                .await
        };
        self.proxy.guard_status(result)
    }

    /// Delete a file
    pub async fn remove(&self, name: &str) -> Result<StatusCode> {
        let result = self
            .proxy
            .send_command(|id| paths::files_remove(id.module(), name))
            .await
            .map(|_| ());
        self.proxy.guard_status(result)
    }

    /// Erase the whole filesystem
    pub async fn format_fs(&self) -> Result<StatusCode> {
        let result = self
            .proxy
            .send_command(|id| paths::files_format(id.module()))
            .await
            .and_then(|body| {
                let reply: CommandReply = serde_json::from_slice(&body)?;
                match reply.res.as_str() {
                    "ok" => Ok(()),
                    other => Err(Error::io(format!("format failed: '{}'", other))),
                }
            });
        if result.is_ok() {
            info!("Formatted filesystem of {}", self.proxy.identifier());
        }
        self.proxy.guard_status(result)
    }

    async fn list(&self, pattern: &str) -> Result<Vec<FileRecord>> {
        let body = self
            .proxy
            .send_command(|id| paths::files_list(id.module(), pattern))
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
