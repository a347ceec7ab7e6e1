/*!
 * In-process simulated hub.
 *
 * Answers the same request paths as a real hub from an in-memory model of
 * modules, functions and files. Every request is counted per path, and
 * latency or failures can be injected, which makes it the transport of choice
 * for tests.
 */
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Map, Value as Json};
use tracing::trace;

use hublink_core::error::{Error, Result};

use crate::events::HubNotification;
use crate::hardware_id::HardwareId;
use crate::inventory::{FunctionEntry, ModuleEntry, ServicesReply};
use crate::schema::{ADVERTISED_VALUE, LOGICAL_NAME};
use crate::transport::{paths, HubTransport};

/// Bytes of flash a simulated filesystem pretends to have
pub const SIMULATED_FLASH_SIZE: i64 = 64 * 1024;

#[derive(Debug, Clone)]
struct SimFunction {
    class: String,
    function_id: String,
    attributes: Map<String, Json>,
}

#[derive(Debug, Clone)]
struct SimModule {
    entry: ModuleEntry,
    functions: Vec<SimFunction>,
    files: BTreeMap<String, Vec<u8>>,
}

impl SimModule {
    fn function_mut(&mut self, function_id: &str) -> Result<&mut SimFunction> {
        let serial = self.entry.serial_number.clone();
        self.functions
            .iter_mut()
            .find(|f| f.function_id == function_id)
            .ok_or_else(|| Error::not_found(format!("{} has no function {}", serial, function_id)))
    }

    fn entries(&self) -> Vec<(String, FunctionEntry)> {
        self.functions
            .iter()
            .map(|f| {
                let text = |name: &str| match f.attributes.get(name) {
                    Some(Json::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                (
                    f.class.clone(),
                    FunctionEntry {
                        hardware_id: HardwareId::new(self.entry.serial_number.as_str(), f.function_id.as_str()),
                        logical_name: text(LOGICAL_NAME),
                        advertised_value: text(ADVERTISED_VALUE),
                    },
                )
            })
            .collect()
    }

    /// Keep the attributes of a `Files` function in line with the stored files
    fn sync_files(&mut self) {
        let count = self.files.len() as i64;
        let used: i64 = self.files.values().map(|c| c.len() as i64).sum();
        for function in self.functions.iter_mut().filter(|f| f.class == "Files") {
            function.attributes.insert("filesCount".into(), json!(count));
            function
                .attributes
                .insert("freeSpace".into(), json!((SIMULATED_FLASH_SIZE - used).max(0)));
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    modules: Vec<SimModule>,
    unplugged: Vec<SimModule>,
    requests: HashMap<String, usize>,
    latency: Duration,
    failure: Option<Error>,
}

impl SimState {
    fn module_mut(&mut self, serial: &str) -> Result<&mut SimModule> {
        self.modules
            .iter_mut()
            .find(|m| m.entry.serial_number == serial)
            .ok_or_else(|| Error::offline(format!("module {} is not connected", serial)))
    }
}

/// A hub living in memory
#[derive(Debug)]
pub struct SimulatedHub {
    url: String,
    state: Mutex<SimState>,
}

impl SimulatedHub {
    /// Create an empty hub answering at `url`
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Builder form of [`SimulatedHub::add_module`]
    pub fn with_module(self, serial: &str, logical_name: &str, product_name: &str) -> Self {
        // A fresh hub is never poisoned
        let _ = self.add_module(serial, logical_name, product_name);
        self
    }

    /// Builder form of [`SimulatedHub::add_function`]
    pub fn with_function(self, serial: &str, class: &str, function_id: &str, attributes: Json) -> Self {
        let _ = self.add_function(serial, class, function_id, attributes);
        self
    }

    /// Plug in a module with no functions
    pub fn add_module(&self, serial: &str, logical_name: &str, product_name: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.modules.iter().any(|m| m.entry.serial_number == serial) {
            return Err(Error::invalid_argument(format!("module {} already exists", serial)));
        }
        state.modules.push(SimModule {
            entry: ModuleEntry {
                serial_number: serial.to_string(),
                logical_name: logical_name.to_string(),
                product_name: product_name.to_string(),
                hub_url: self.url.clone(),
            },
            functions: Vec::new(),
            files: BTreeMap::new(),
        });
        Ok(())
    }

    /// Add a function to a module; `attributes` is the JSON object a load returns
    pub fn add_function(
        &self,
        serial: &str,
        class: &str,
        function_id: &str,
        attributes: Json,
    ) -> Result<HardwareId> {
        let attributes = match attributes {
            Json::Object(map) => map,
            Json::Null => Map::new(),
            other => {
                return Err(Error::invalid_argument(format!(
                    "function attributes must be a JSON object, got {}",
                    other
                )))
            }
        };

        let mut state = self.lock()?;
        let module = state.module_mut(serial)?;
        module.functions.push(SimFunction {
            class: class.to_string(),
            function_id: function_id.to_string(),
            attributes,
        });
        module.sync_files();
        Ok(HardwareId::new(serial, function_id))
    }

    /// Change an attribute as the device itself would
    pub fn set_attribute(&self, hardware_id: &str, name: &str, value: Json) -> Result<()> {
        let id = HardwareId::parse(hardware_id)?;
        let mut state = self.lock()?;
        let function = state.module_mut(id.module())?.function_mut(id.function())?;
        function.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// The raw wire value of an attribute
    pub fn attribute(&self, hardware_id: &str, name: &str) -> Option<Json> {
        let id = HardwareId::parse(hardware_id).ok()?;
        let mut state = self.lock().ok()?;
        let function = state.module_mut(id.module()).ok()?.function_mut(id.function()).ok()?;
        function.attributes.get(name).cloned()
    }

    /// Disconnect a module; returns false if it is not plugged in
    pub fn unplug(&self, serial: &str) -> bool {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        match state.modules.iter().position(|m| m.entry.serial_number == serial) {
            Some(index) => {
                let module = state.modules.remove(index);
                state.unplugged.push(module);
                true
            }
            None => false,
        }
    }

    /// Reconnect a module previously unplugged
    pub fn replug(&self, serial: &str) -> bool {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        match state.unplugged.iter().position(|m| m.entry.serial_number == serial) {
            Some(index) => {
                let module = state.unplugged.remove(index);
                state.modules.push(module);
                true
            }
            None => false,
        }
    }

    /// The notification a hub would push when `serial` is plugged in
    pub fn arrival_notification(&self, serial: &str) -> Option<HubNotification> {
        let mut state = self.lock().ok()?;
        let module = state.module_mut(serial).ok()?;
        Some(HubNotification::Arrival {
            module: module.entry.clone(),
            functions: module.entries(),
        })
    }

    /// Delay applied to every request
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut state) = self.lock() {
            state.latency = latency;
        }
    }

    /// Make every request fail with `error` until cleared with `None`
    pub fn fail_with(&self, error: Option<Error>) {
        if let Ok(mut state) = self.lock() {
            state.failure = error;
        }
    }

    /// Number of requests received for an exact path
    pub fn request_count(&self, path: &str) -> usize {
        self.lock()
            .map(|s| s.requests.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of bulk loads received for a function
    pub fn load_count(&self, hardware_id: &HardwareId) -> usize {
        self.request_count(&paths::function_load(hardware_id.module(), hardware_id.function()))
    }

    /// Number of requests received for any path
    pub fn total_requests(&self) -> usize {
        self.lock().map(|s| s.requests.values().sum()).unwrap_or(0)
    }

    /// Store a file on a module filesystem
    pub fn put_file(&self, serial: &str, name: &str, content: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        let module = state.module_mut(serial)?;
        module.files.insert(name.to_string(), content.to_vec());
        module.sync_files();
        Ok(())
    }

    /// Content of a file on a module filesystem
    pub fn file(&self, serial: &str, name: &str) -> Option<Vec<u8>> {
        let mut state = self.lock().ok()?;
        state.module_mut(serial).ok()?.files.get(name).cloned()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| Error::io("Failed to lock simulated hub state"))
    }

    /// Count the request, then apply injected latency and failure
    async fn admit(&self, path: &str) -> Result<()> {
        let (latency, failure) = {
            let mut state = self.lock()?;
            *state.requests.entry(path.to_string()).or_insert(0) += 1;
            (state.latency, state.failure.clone())
        };
        trace!("{} <- {}", self.url, path);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn handle_command(&self, path: &str) -> Result<Bytes> {
        let mut state = self.lock()?;
        if path == paths::SERVICES {
            let mut reply = ServicesReply::default();
            for module in &state.modules {
                reply.white_pages.push(module.entry.clone());
                for (class, entry) in module.entries() {
                    reply.yellow_pages.entry(class).or_default().push(entry);
                }
            }
            return Ok(Bytes::from(serde_json::to_vec(&reply)?));
        }

        let (serial, resource, query) = split_path(path)?;
        let module = state.module_mut(serial)?;

        if let Some(api) = resource.strip_prefix("api/") {
            if let Some(function_id) = api.strip_suffix(".json") {
                let function = module.function_mut(function_id)?;
                return Ok(Bytes::from(serde_json::to_vec(&function.attributes)?));
            }
            let function = module.function_mut(api)?;
            for (name, text) in query {
                let value = match function.attributes.get(&name) {
                    Some(Json::Number(_)) => parse_number(&text)
                        .ok_or_else(|| Error::invalid_argument(format!("{} is not a number", text)))?,
                    _ => Json::String(text),
                };
                function.attributes.insert(name, value);
            }
            return Ok(Bytes::from(serde_json::to_vec(&function.attributes)?));
        }

        if resource == "files.json" {
            let arg = |key: &str| {
                query
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            };
            let reply = match arg("a").as_str() {
                "dir" => {
                    let pattern = arg("f");
                    let listing: Vec<Json> = module
                        .files
                        .iter()
                        .filter(|(name, _)| matches_pattern(&pattern, name))
                        .map(|(name, content)| {
                            json!({"name": name, "size": content.len(), "crc": crc32(content)})
                        })
                        .collect();
                    Json::Array(listing)
                }
                "del" => {
                    module.files.remove(&arg("f"));
                    module.sync_files();
                    json!({"res": "ok"})
                }
                "format" => {
                    module.files.clear();
                    module.sync_files();
                    json!({"res": "ok"})
                }
                other => {
                    return Err(Error::invalid_argument(format!("unknown files action '{}'", other)))
                }
            };
            return Ok(Bytes::from(serde_json::to_vec(&reply)?));
        }

        Err(Error::not_found(format!("no such resource {}", path)))
    }
}

#[async_trait]
impl HubTransport for SimulatedHub {
    fn url(&self) -> &str {
        &self.url
    }

    async fn send_command(&self, path: &str) -> Result<Bytes> {
        self.admit(path).await?;
        self.handle_command(path)
    }

    async fn download(&self, path: &str) -> Result<Bytes> {
        self.admit(path).await?;
        let (serial, resource, _) = split_path(path)?;
        let name = paths::unescape(resource);
        let mut state = self.lock()?;
        let module = state.module_mut(serial)?;
        module
            .files
            .get(&name)
            .map(|content| Bytes::from(content.clone()))
            .ok_or_else(|| Error::not_found(format!("no file {} on {}", name, serial)))
    }

    async fn upload(&self, path: &str, content: &[u8]) -> Result<()> {
        self.admit(path).await?;
        let (serial, resource, query) = split_path(path)?;
        if resource != "upload.html" {
            return Err(Error::not_found(format!("no such resource {}", path)));
        }
        let name = query
            .into_iter()
            .find(|(k, _)| k == "f")
            .map(|(_, v)| v)
            .ok_or_else(|| Error::invalid_argument("upload without a file name"))?;

        let mut state = self.lock()?;
        let module = state.module_mut(serial)?;
        module.files.insert(name, content.to_vec());
        module.sync_files();
        Ok(())
    }
}

/// Split `/bySerial/{serial}/{resource}?{query}`
fn split_path(path: &str) -> Result<(&str, &str, Vec<(String, String)>)> {
    let rest = path
        .strip_prefix("/bySerial/")
        .ok_or_else(|| Error::not_found(format!("no such resource {}", path)))?;
    let (serial, rest) = rest
        .split_once('/')
        .ok_or_else(|| Error::not_found(format!("no such resource {}", path)))?;
    let (resource, query) = rest.split_once('?').unwrap_or((rest, ""));
    let query = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (paths::unescape(k), paths::unescape(v))
        })
        .collect();
    Ok((serial, resource, query))
}

fn parse_number(text: &str) -> Option<Json> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(json!(i));
    }
    text.parse::<f64>().ok().and_then(|f| serde_json::Number::from_f64(f).map(Json::Number))
}

/// Match a file name against an empty pattern, an exact name or one `*` wildcard
fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        _ if pattern.is_empty() => true,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len() && name.starts_with(prefix) && name.ends_with(suffix)
        }
        None => pattern == name,
    }
}

/// CRC-32 (IEEE) of a file, as reported in listings
fn crc32(content: &[u8]) -> i64 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in content {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    i64::from(!crc)
}
