/*!
 * Generic function proxy.
 *
 * A [`FunctionProxy`] stands for one addressable function (sensor, actuator,
 * filesystem) on one module. It is parameterised by a [`FunctionSchema`], so
 * a single type serves every device class. Attribute reads go through the
 * proxy's [`AttributeCache`]; a bulk load refreshes every attribute in one
 * round trip and runs under a per-proxy async mutex, so concurrent readers of
 * an expired proxy share a single load.
 */
use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use hublink_core::error::{Error, Result, StatusCode};
use hublink_core::logging::operation_span;
use hublink_core::types::Value;
use hublink_core::utils::with_timeout;

use crate::cache::AttributeCache;
use crate::context::{Context, ContextInner};
use crate::hardware_id::HardwareId;
use crate::schema::{
    CachePolicy, FunctionSchema, ADVERTISED_VALUE, INVALID_DOUBLE, INVALID_ENUM, INVALID_INT,
    INVALID_STRING,
};
use crate::transport::paths;

/// Whether a function can currently be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reachability {
    /// Never resolved
    Unknown,
    /// Resolved at some point, not reachable now
    Offline,
    /// Reachable; attribute reads succeed
    Online,
}

/// Observer invoked from the caller's event pump when a function's advertised value changes
pub type ValueCallback = Arc<dyn Fn(&Arc<FunctionProxy>, &str) + Send + Sync>;

/// Proxy for one function of one module
pub struct FunctionProxy {
    schema: &'static FunctionSchema,
    identifier: String,
    context: Weak<ContextInner>,
    cache: Mutex<AttributeCache>,
    reachability: RwLock<Reachability>,
    hardware_id: RwLock<Option<HardwareId>>,
    value_callback: RwLock<Option<ValueCallback>>,
}

impl fmt::Debug for FunctionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionProxy")
            .field("class", &self.schema.class_name)
            .field("identifier", &self.identifier)
            .field("reachability", &self.reachability())
            .field("hardware_id", &self.last_hardware_id())
            .finish()
    }
}

impl FunctionProxy {
    pub(crate) fn new(
        schema: &'static FunctionSchema,
        identifier: String,
        context: Weak<ContextInner>,
        validity: Duration,
    ) -> Self {
        Self {
            schema,
            identifier,
            context,
            cache: Mutex::new(AttributeCache::new(validity)),
            reachability: RwLock::new(Reachability::Unknown),
            hardware_id: RwLock::new(None),
            value_callback: RwLock::new(None),
        }
    }

    /// The class schema of this function
    pub fn schema(&self) -> &'static FunctionSchema {
        self.schema
    }

    /// The class name of this function
    pub fn class_name(&self) -> &'static str {
        self.schema.class_name
    }

    /// The identifier this proxy was created with
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The owning context, unless it has been dropped
    pub fn context(&self) -> Result<Context> {
        self.context
            .upgrade()
            .map(Context::from_inner)
            .ok_or_else(|| Error::not_initialized("the owning context no longer exists"))
    }

    /// Current reachability, without any I/O
    pub fn reachability(&self) -> Reachability {
        self.reachability
            .read()
            .map(|r| *r)
            .unwrap_or(Reachability::Unknown)
    }

    pub(crate) fn set_reachability(&self, new_state: Reachability) {
        if let Ok(mut state) = self.reachability.write() {
            if *state != new_state {
                debug!(
                    "{} '{}' is now {:?} (was {:?})",
                    self.schema.class_name, self.identifier, new_state, *state
                );
                *state = new_state;
            }
        }
    }

    /// The hardware ID found by the most recent successful resolution
    pub fn last_hardware_id(&self) -> Option<HardwareId> {
        self.hardware_id.read().ok().and_then(|id| id.clone())
    }

    pub(crate) fn set_hardware_id(&self, hardware_id: HardwareId) {
        if let Ok(mut id) = self.hardware_id.write() {
            *id = Some(hardware_id);
        }
    }

    /// Resolve the identifier against the current inventory
    pub fn hardware_id(&self) -> Result<HardwareId> {
        let ctx = self.context()?;
        let result = ctx.resolve(self.schema.class_name, &self.identifier);
        match &result {
            Ok(id) => self.set_hardware_id(id.clone()),
            Err(e) => self.mark_failure(e),
        }
        result
    }

    /// Register the observer for advertised value changes, replacing any previous one
    pub fn register_value_callback<F>(&self, callback: F)
    where
        F: Fn(&Arc<FunctionProxy>, &str) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.value_callback.write() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Remove the value observer
    pub fn unregister_value_callback(&self) {
        if let Ok(mut slot) = self.value_callback.write() {
            *slot = None;
        }
    }

    pub(crate) fn value_callback(&self) -> Option<ValueCallback> {
        self.value_callback.read().ok().and_then(|cb| cb.clone())
    }

    /// Whether a value observer is registered
    pub fn has_value_callback(&self) -> bool {
        self.value_callback().is_some()
    }

    /// The validity window applied to loads
    pub async fn cache_validity(&self) -> Duration {
        self.cache.lock().await.validity()
    }

    /// Change the validity window; takes effect at the next load
    pub async fn set_cache_validity(&self, validity: Duration) {
        self.cache.lock().await.set_validity(validity);
    }

    /// Drop every cached value so the next read of any attribute reloads
    pub async fn invalidate(&self) {
        self.cache.lock().await.clear();
    }

    /// Reload every attribute now, whatever the cache state
    pub async fn load(&self) -> Result<()> {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await
    }

    /// Reload every attribute now and keep the result for `validity`
    ///
    /// The proxy's own validity window applies again from the next load.
    pub async fn load_with_validity(&self, validity: Duration) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let previous = cache.validity();
        cache.set_validity(validity);
        let result = self.refresh(&mut cache).await;
        cache.set_validity(previous);
        result
    }

    /// Whether the function answers; true without I/O while the cache is valid
    pub async fn is_online(&self) -> bool {
        let mut cache = self.cache.lock().await;
        if self.reachability() == Reachability::Online && !cache.is_expired(Instant::now()) {
            return true;
        }
        self.refresh(&mut cache).await.is_ok()
    }

    /// Read an attribute, loading first if its cache policy requires it
    ///
    /// Failures are always returned as `Err`, whatever the context's error mode.
    pub async fn get_raw(&self, attribute: &str) -> Result<Value> {
        let spec = self.schema.attribute(attribute)?;
        let mut cache = self.cache.lock().await;
        if cache.needs_load(spec, Instant::now()) {
            self.refresh(&mut cache).await?;
        }
        cache.get(spec.name).cloned().ok_or_else(|| {
            Error::serialization(format!(
                "{} '{}' did not report {}",
                self.schema.class_name, self.identifier, spec.name
            ))
        })
    }

    /// Read an attribute, honouring the context's error mode
    pub async fn get(&self, attribute: &str) -> Result<Value> {
        let invalid = self
            .schema
            .attribute(attribute)
            .map(|spec| spec.invalid())
            .unwrap_or(Value::Null);
        let result = self.get_raw(attribute).await;
        self.guard(result, invalid)
    }

    /// Read a numeric attribute as a float
    pub async fn get_float(&self, attribute: &str) -> Result<f64> {
        let result = self
            .get_raw(attribute)
            .await
            .and_then(|v| v.as_float().ok_or_else(|| self.type_error(attribute, "number", &v)));
        self.guard(result, INVALID_DOUBLE)
    }

    /// Read an integer attribute
    pub async fn get_integer(&self, attribute: &str) -> Result<i64> {
        let result = self
            .get_raw(attribute)
            .await
            .and_then(|v| v.as_integer().ok_or_else(|| self.type_error(attribute, "integer", &v)));
        self.guard(result, INVALID_INT)
    }

    /// Read an enumerated attribute as its numeric code
    pub async fn get_enum(&self, attribute: &str) -> Result<i64> {
        let result = self
            .get_raw(attribute)
            .await
            .and_then(|v| v.as_integer().ok_or_else(|| self.type_error(attribute, "integer", &v)));
        self.guard(result, INVALID_ENUM)
    }

    /// Read a string attribute
    pub async fn get_string(&self, attribute: &str) -> Result<String> {
        let result = self.get_raw(attribute).await.and_then(|v| match v {
            Value::String(s) => Ok(s),
            other => Err(self.type_error(attribute, "string", &other)),
        });
        self.guard(result, INVALID_STRING.to_string())
    }

    /// Write an attribute with one synchronous round trip
    ///
    /// The cache is not updated with the written value; the next timed read reloads.
    /// Failures are always returned as `Err`.
    pub async fn set_raw(&self, attribute: &str, value: Value) -> Result<()> {
        let spec = self.schema.attribute(attribute)?;
        let text = spec.encode(&value)?;
        let ctx = self.context()?;

        // Holding the cache lock keeps a concurrent load from caching pre-write values
        let mut cache = self.cache.lock().await;
        let (hardware_id, hub) = ctx.route(self.schema.class_name, &self.identifier).map_err(|e| {
            self.mark_failure(&e);
            e
        })?;

        let path = paths::function_set(hardware_id.module(), hardware_id.function(), spec.name, &text);
        debug!("Setting {}.{} = {}", hardware_id, spec.name, text);
        with_timeout(ctx.request_timeout(), hub.send_command(&path))
            .instrument(operation_span("set", &hardware_id.to_string()))
            .await
            .map_err(|e| {
                warn!("Failed to set {}.{}: {}", hardware_id, spec.name, e);
                self.mark_failure(&e);
                e
            })?;

        cache.expire();
        if spec.policy != CachePolicy::Timed {
            cache.forget(spec.name);
        }
        Ok(())
    }

    /// Write an attribute, honouring the context's error mode
    pub async fn set(&self, attribute: &str, value: Value) -> Result<StatusCode> {
        let result = self.set_raw(attribute, value).await;
        match self.context() {
            Ok(ctx) => ctx.report_status(result),
            Err(e) => Err(e),
        }
    }

    /// Send a module-level command built from the resolved hardware ID
    pub async fn send_command<F>(&self, build_path: F) -> Result<Bytes>
    where
        F: FnOnce(&HardwareId) -> String,
    {
        let ctx = self.context()?;
        let (hardware_id, hub) = self.route(&ctx)?;
        let path = build_path(&hardware_id);
        self.observe(with_timeout(ctx.request_timeout(), hub.send_command(&path)).await)
    }

    /// Download a file from the function's module
    pub async fn download<F>(&self, build_path: F) -> Result<Bytes>
    where
        F: FnOnce(&HardwareId) -> String,
    {
        let ctx = self.context()?;
        let (hardware_id, hub) = self.route(&ctx)?;
        let path = build_path(&hardware_id);
        self.observe(with_timeout(ctx.request_timeout(), hub.download(&path)).await)
    }

    /// Upload a file to the function's module
    pub async fn upload<F>(&self, build_path: F, content: &[u8]) -> Result<()>
    where
        F: FnOnce(&HardwareId) -> String,
    {
        let ctx = self.context()?;
        let (hardware_id, hub) = self.route(&ctx)?;
        let path = build_path(&hardware_id);
        self.observe(with_timeout(ctx.request_timeout(), hub.upload(&path, content)).await)
    }

    /// Apply the context's error mode to a read result
    pub fn guard<T>(&self, result: Result<T>, invalid: T) -> Result<T> {
        match self.context() {
            Ok(ctx) => ctx.report(result, invalid),
            Err(e) => result.map_err(|_| e),
        }
    }

    /// Apply the context's error mode to a write result
    pub fn guard_status(&self, result: Result<()>) -> Result<StatusCode> {
        match self.context() {
            Ok(ctx) => ctx.report_status(result),
            Err(e) => Err(e),
        }
    }

    fn route(&self, ctx: &Context) -> Result<(HardwareId, Arc<dyn crate::transport::HubTransport>)> {
        ctx.route(self.schema.class_name, &self.identifier).map_err(|e| {
            self.mark_failure(&e);
            e
        })
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.set_reachability(Reachability::Online),
            Err(e) => self.mark_failure(e),
        }
        result
    }

    fn mark_failure(&self, error: &Error) {
        if error.is_unreachable() {
            self.set_reachability(Reachability::Offline);
        }
    }

    fn type_error(&self, attribute: &str, expected: &str, value: &Value) -> Error {
        Error::serialization(format!(
            "{} of {} '{}' is {}, expected {}",
            attribute,
            self.schema.class_name,
            self.identifier,
            value.kind(),
            expected
        ))
    }

    /// Bulk load into `cache`; the caller holds the cache lock
    async fn refresh(&self, cache: &mut AttributeCache) -> Result<()> {
        let ctx = self.context()?;
        let (hardware_id, hub) = self.route(&ctx)?;
        let path = paths::function_load(hardware_id.module(), hardware_id.function());

        debug!("Loading {}", hardware_id);
        let body = with_timeout(ctx.request_timeout(), hub.send_command(&path))
            .instrument(operation_span("load", &hardware_id.to_string()))
            .await
            .map_err(|e| {
                warn!("Failed to load {}: {}", hardware_id, e);
                self.mark_failure(&e);
                e
            })?;

        let json: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&body)?;
        let mut values = Vec::new();
        for spec in self.schema.all_attributes() {
            if let Some(raw) = json.get(spec.name) {
                match spec.decode(raw) {
                    Ok(value) => values.push((spec.name, value)),
                    Err(e) => {
                        warn!("{}: {}", hardware_id, e);
                        values.push((spec.name, spec.invalid()));
                    }
                }
            }
        }

        let changed = cache.update(values, Instant::now());
        self.set_hardware_id(hardware_id.clone());
        self.set_reachability(Reachability::Online);

        if self.has_value_callback() {
            let advertised = changed
                .iter()
                .any(|(name, previous)| *name == ADVERTISED_VALUE && previous.is_some());
            if advertised {
                if let Some(Value::String(value)) = cache.get(ADVERTISED_VALUE) {
                    ctx.queue_value_change(self, &hardware_id, value.clone());
                }
            }
        }
        Ok(())
    }
}
