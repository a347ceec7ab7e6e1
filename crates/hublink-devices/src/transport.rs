/*!
 * Hub transport abstraction.
 *
 * The hub is an external process; the runtime only needs three capabilities
 * from it: send a command and read the reply, download a file, and upload a
 * file. Requests are URL paths with query parameters, replies are JSON or raw
 * bytes.
 */
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

use hublink_core::error::Result;

/// Capabilities a hub connection must provide
#[async_trait]
pub trait HubTransport: Send + Sync + Debug {
    /// Root URL of the hub; identifies it within a context
    fn url(&self) -> &str;

    /// Send a command path and return the raw reply
    async fn send_command(&self, path: &str) -> Result<Bytes>;

    /// Fetch a file
    async fn download(&self, path: &str) -> Result<Bytes>;

    /// Store a file
    async fn upload(&self, path: &str, content: &[u8]) -> Result<()>;
}

/// Request paths understood by hubs
pub mod paths {
    /// Inventory of every module and function known to a hub
    pub const SERVICES: &str = "/api/services.json";

    /// Bulk read of every attribute of one function
    pub fn function_load(serial: &str, function: &str) -> String {
        format!("/bySerial/{}/api/{}.json", serial, function)
    }

    /// Write of one attribute
    pub fn function_set(serial: &str, function: &str, attribute: &str, value: &str) -> String {
        format!(
            "/bySerial/{}/api/{}?{}={}",
            serial,
            function,
            attribute,
            escape(value)
        )
    }

    /// Listing of files matching `pattern` on a module filesystem
    pub fn files_list(serial: &str, pattern: &str) -> String {
        format!("/bySerial/{}/files.json?a=dir&f={}", serial, escape(pattern))
    }

    /// Removal of one file
    pub fn files_remove(serial: &str, name: &str) -> String {
        format!("/bySerial/{}/files.json?a=del&f={}", serial, escape(name))
    }

    /// Reinitialisation of a module filesystem
    pub fn files_format(serial: &str) -> String {
        format!("/bySerial/{}/files.json?a=format", serial)
    }

    /// Raw content of one file
    pub fn file_download(serial: &str, name: &str) -> String {
        format!("/bySerial/{}/{}", serial, escape(name))
    }

    /// Destination of an uploaded file
    pub fn file_upload(serial: &str, name: &str) -> String {
        format!("/bySerial/{}/upload.html?f={}", serial, escape(name))
    }

    /// Percent-encode everything except unreserved URL characters
    pub fn escape(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for byte in value.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    escaped.push(byte as char)
                }
                _ => escaped.push_str(&format!("%{:02X}", byte)),
            }
        }
        escaped
    }

    /// Reverse [`escape`]; malformed sequences are kept as they are
    pub fn unescape(value: &str) -> String {
        let bytes = value.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' && i + 2 < bytes.len() {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(b);
                    i += 3;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}
