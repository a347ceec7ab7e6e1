/*!
 * The hublink context.
 *
 * A [`Context`] owns everything one application scope needs to talk to its
 * hubs: the registered transports, the merged inventory, the proxy registry,
 * the pending events and the error-reporting mode. Contexts are independent;
 * two of them never share proxies or caches.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use hublink_core::config::{Config, HubConfig};
use hublink_core::error::{Error, ErrorMode, Result, StatusCode};
use hublink_core::event::EventQueue;
use hublink_core::logging::{component_span, operation_span};
use hublink_core::utils::with_timeout;

use crate::enumeration;
use crate::events::{DeviceCallback, HubEvent, HubEventKind, HubNotification};
use crate::function::{FunctionProxy, Reachability};
use crate::hardware_id::HardwareId;
use crate::inventory::{Inventory, InventoryDiff, ModuleEntry, ServicesReply};
use crate::registry::FunctionRegistry;
use crate::resolver;
use crate::schema::FunctionSchema;
use crate::transport::{paths, HubTransport};

/// State shared by a context and its proxies
pub(crate) struct ContextInner {
    id: Uuid,
    config: HubConfig,
    active: AtomicBool,
    hubs: RwLock<Vec<Arc<dyn HubTransport>>>,
    inventory: RwLock<Inventory>,
    registry: FunctionRegistry,
    events: EventQueue<HubEvent>,
    arrival_callback: RwLock<Option<DeviceCallback>>,
    removal_callback: RwLock<Option<DeviceCallback>>,
    last_status: Mutex<(StatusCode, String)>,
}

/// Handle to one hublink scope; clones share the same state
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("hubs", &self.hub_urls())
            .field("proxies", &self.inner.registry.len())
            .field("pending_events", &self.inner.events.len())
            .finish()
    }
}

impl Context {
    /// Create a context from hub settings
    pub fn new(config: HubConfig) -> Result<Self> {
        config.validate()?;
        let inner = ContextInner {
            id: Uuid::new_v4(),
            events: EventQueue::with_capacity(config.event_queue_capacity),
            config,
            active: AtomicBool::new(true),
            hubs: RwLock::new(Vec::new()),
            inventory: RwLock::new(Inventory::new()),
            registry: FunctionRegistry::new(),
            arrival_callback: RwLock::new(None),
            removal_callback: RwLock::new(None),
            last_status: Mutex::new((StatusCode::Success, String::new())),
        };
        debug!("Created context {}", inner.id);
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create a context from a full configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.hub.clone())
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    /// Unique identifier of this context
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The hub settings this context was created with
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// How failures reach the caller
    pub fn error_mode(&self) -> ErrorMode {
        self.inner.config.error_mode
    }

    /// Upper bound on a single hub request
    pub fn request_timeout(&self) -> Duration {
        self.inner.config.request_timeout()
    }

    /// Whether the context has not been torn down
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// URLs of the registered hubs
    pub fn hub_urls(&self) -> Vec<String> {
        self.inner
            .hubs
            .read()
            .map(|hubs| hubs.iter().map(|h| h.url().to_string()).collect())
            .unwrap_or_default()
    }

    /// A snapshot of the current inventory
    pub fn inventory(&self) -> Result<Inventory> {
        Ok(self.read_inventory()?.clone())
    }

    /// Register a hub and fetch its inventory
    ///
    /// Registering a URL twice is a no-op. If the first inventory fetch fails
    /// the hub is not kept.
    pub async fn register_hub(&self, hub: Arc<dyn HubTransport>) -> Result<()> {
        self.ensure_active()?;
        let url = hub.url().to_string();
        {
            let mut hubs = self.write_hubs()?;
            if hubs.iter().any(|h| h.url() == url) {
                debug!("Hub {} is already registered", url);
                return Ok(());
            }
            hubs.push(hub.clone());
        }

        let span = component_span("context", Some(&self.inner.id.to_string()));
        let fetched = self.fetch_inventory(hub).instrument(span).await;
        let inventory = match fetched {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!("Failed to register hub {}: {}", url, e);
                self.write_hubs()?.retain(|h| h.url() != url);
                self.record(&e);
                return Err(e);
            }
        };

        info!("Registered hub {} with {} modules", url, inventory.modules().len());
        self.update_inventory(|current| {
            let mut merged = current.clone();
            if self.hub_urls().contains(&url) {
                merged.merge(inventory);
            } else {
                debug!("Hub {} was unregistered while fetching its inventory", url);
            }
            merged
        })
    }

    /// Forget a hub; its modules are reported as removed
    pub fn unregister_hub(&self, url: &str) -> Result<bool> {
        let removed = {
            let mut hubs = self.write_hubs()?;
            let before = hubs.len();
            hubs.retain(|h| h.url() != url);
            hubs.len() != before
        };
        if !removed {
            return Ok(false);
        }

        info!("Unregistered hub {}", url);
        self.update_inventory(|current| {
            let mut remaining = current.clone();
            let serials: Vec<String> = current
                .modules()
                .iter()
                .filter(|m| m.hub_url == url)
                .map(|m| m.serial_number.clone())
                .collect();
            for serial in serials {
                remaining.remove_module(&serial);
            }
            remaining
        })?;
        Ok(true)
    }

    /// Refetch the inventory of every hub and queue what changed
    ///
    /// A hub that fails to answer keeps its previous modules; the first
    /// failure is returned after the others have been applied.
    pub async fn update_device_list(&self) -> Result<()> {
        self.ensure_active()?;
        let hubs: Vec<Arc<dyn HubTransport>> = self.read_hubs()?.clone();
        if hubs.is_empty() {
            let e = Error::not_initialized("no hub registered");
            self.record(&e);
            return Err(e);
        }

        let span = component_span("context", Some(&self.inner.id.to_string()));
        let replies = join_all(hubs.iter().map(|hub| self.fetch_inventory(hub.clone())))
            .instrument(span)
            .await;

        let mut fresh = HashMap::new();
        let mut first_error = None;
        for (hub, reply) in hubs.iter().zip(replies) {
            match reply {
                Ok(inventory) => {
                    fresh.insert(hub.url().to_string(), inventory);
                }
                Err(e) => {
                    warn!("Failed to update device list of {}: {}", hub.url(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        // Hubs registered or removed while fetching are taken from the live list
        self.update_inventory(|current| {
            let mut merged = Inventory::new();
            for url in self.hub_urls() {
                match fresh.remove(&url) {
                    Some(inventory) => merged.merge(inventory),
                    None => merged.merge(current.modules_of_hub(&url)),
                }
            }
            merged
        })?;
        match first_error {
            Some(e) => {
                self.record(&e);
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Apply a notification pushed by a hub
    pub fn notify(&self, notification: HubNotification) -> Result<()> {
        self.ensure_active()?;
        self.update_inventory(|current| {
            let mut updated = current.clone();
            match notification {
                HubNotification::Arrival { module, functions } => {
                    updated.add_module(module, functions);
                }
                HubNotification::Removal { serial_number } => {
                    updated.remove_module(&serial_number);
                }
                HubNotification::ValueChange { hardware_id, value } => {
                    updated.set_advertised_value(&hardware_id, &value);
                }
            }
            updated
        })
    }

    /// Return the proxy for `identifier` in the class described by `schema`
    ///
    /// The proxy is created on first use. Resolution failures do not fail this
    /// call; the proxy is simply offline until its function appears.
    pub fn find_function(
        &self,
        schema: &'static FunctionSchema,
        identifier: &str,
    ) -> Result<Arc<FunctionProxy>> {
        self.ensure_active()?;
        let validity = self.inner.config.cache_validity();
        let context = Arc::downgrade(&self.inner);
        let (proxy, created) = self.inner.registry.find_or_create(
            schema.class_name,
            identifier,
            |identifier| FunctionProxy::new(schema, identifier, context, validity),
        )?;

        if created {
            self.update_reachability(&proxy);
        }
        Ok(proxy)
    }

    /// Every proxy handed out so far
    pub fn functions(&self) -> Result<Vec<Arc<FunctionProxy>>> {
        self.inner.registry.proxies()
    }

    /// The first function of `class`
    pub fn first(&self, class: &str) -> Result<Option<HardwareId>> {
        let inventory = self.read_inventory()?;
        Ok(enumeration::first(&inventory, class))
    }

    /// The function of `class` following `current`
    pub fn next(&self, class: &str, current: &HardwareId) -> Result<Option<HardwareId>> {
        let inventory = self.read_inventory()?;
        Ok(enumeration::next(&inventory, class, current))
    }

    /// Observe module arrivals
    pub fn register_device_arrival_callback<F>(&self, callback: F)
    where
        F: Fn(&ModuleEntry) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.arrival_callback.write() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Observe module removals
    pub fn register_device_removal_callback<F>(&self, callback: F)
    where
        F: Fn(&ModuleEntry) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.removal_callback.write() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Number of events waiting for the pump
    pub fn pending_events(&self) -> usize {
        self.inner.events.len()
    }

    /// Deliver every pending event to its callback; returns how many were delivered
    ///
    /// Callbacks run on the caller's task, with no context lock held.
    pub fn handle_events(&self) -> Result<usize> {
        let events = self.inner.events.drain()?;
        let mut delivered = 0;
        for event in events {
            if self.dispatch(event)? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Pump events until `duration` has elapsed
    ///
    /// Events queued while sleeping are delivered at least every millisecond.
    pub async fn sleep(&self, duration: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + duration;
        let mut delivered = self.handle_events()?;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(delivered);
            }
            let step = (deadline - now).min(Duration::from_millis(1));
            tokio::time::sleep(step).await;
            delivered += self.handle_events()?;
        }
    }

    /// The status and message of the most recent failure
    pub fn last_status(&self) -> (StatusCode, String) {
        self.inner
            .last_status
            .lock()
            .map(|status| status.clone())
            .unwrap_or((StatusCode::IoError, "status lock poisoned".to_string()))
    }

    /// Release every hub, proxy and pending event
    ///
    /// Proxies still held by callers become offline and report `NotInitialized`.
    pub fn teardown(&self) -> Result<()> {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for proxy in self.inner.registry.proxies()? {
            proxy.set_reachability(Reachability::Offline);
        }
        self.inner.registry.clear()?;
        self.inner.events.clear()?;
        self.write_hubs()?.clear();
        *self
            .inner
            .inventory
            .write()
            .map_err(|_| Error::io("Failed to acquire write lock on inventory"))? = Inventory::new();
        if let Ok(mut slot) = self.inner.arrival_callback.write() {
            *slot = None;
        }
        if let Ok(mut slot) = self.inner.removal_callback.write() {
            *slot = None;
        }
        info!("Context {} torn down", self.inner.id);
        Ok(())
    }

    /// Resolve an identifier against the current inventory
    pub(crate) fn resolve(&self, class: &str, identifier: &str) -> Result<HardwareId> {
        self.ensure_active()?;
        let inventory = self.read_inventory()?;
        resolver::resolve(&inventory, class, identifier)
    }

    /// Resolve an identifier and find the hub its module is attached to
    pub(crate) fn route(
        &self,
        class: &str,
        identifier: &str,
    ) -> Result<(HardwareId, Arc<dyn HubTransport>)> {
        self.ensure_active()?;
        let (hardware_id, hub_url) = {
            let inventory = self.read_inventory()?;
            let hardware_id = resolver::resolve(&inventory, class, identifier)?;
            let hub_url = inventory
                .module(hardware_id.module())
                .map(|m| m.hub_url.clone())
                .unwrap_or_default();
            (hardware_id, hub_url)
        };

        let hub = self
            .read_hubs()?
            .iter()
            .find(|h| h.url() == hub_url)
            .cloned()
            .ok_or_else(|| {
                Error::offline(format!("hub {} of {} is not registered", hub_url, hardware_id))
            })?;
        Ok((hardware_id, hub))
    }

    /// Queue a value event for a proxy whose load saw a new advertised value
    pub(crate) fn queue_value_change(&self, proxy: &FunctionProxy, hardware_id: &HardwareId, value: String) {
        self.queue(HubEventKind::ValueChanged {
            class: proxy.class_name(),
            identifier: proxy.identifier().to_string(),
            hardware_id: hardware_id.clone(),
            value,
        });
    }

    /// Apply the error mode to a read result
    pub(crate) fn report<T>(&self, result: Result<T>, invalid: T) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.record(&e);
                match self.error_mode() {
                    ErrorMode::Propagate => Err(e),
                    ErrorMode::StatusCodes => Ok(invalid),
                }
            }
        }
    }

    /// Apply the error mode to a write result
    pub(crate) fn report_status(&self, result: Result<()>) -> Result<StatusCode> {
        match result {
            Ok(()) => Ok(StatusCode::Success),
            Err(e) => {
                self.record(&e);
                match self.error_mode() {
                    ErrorMode::Propagate => Err(e),
                    ErrorMode::StatusCodes => Ok(e.status()),
                }
            }
        }
    }

    fn record(&self, error: &Error) {
        debug!("Recording status {} for: {}", error.status(), error);
        if let Ok(mut status) = self.inner.last_status.lock() {
            *status = (error.status(), error.to_string());
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::not_initialized("the context has been torn down"))
        }
    }

    async fn fetch_inventory(&self, hub: Arc<dyn HubTransport>) -> Result<Inventory> {
        let body = with_timeout(self.request_timeout(), hub.send_command(paths::SERVICES))
            .instrument(operation_span("services", hub.url()))
            .await?;
        let reply = ServicesReply::from_slice(&body)?;
        Ok(Inventory::from_reply(hub.url(), reply))
    }

    /// Rebuild the inventory from its current state, queue the differences and
    /// refresh reachability
    ///
    /// `update` runs under the inventory write lock, so concurrent updates are
    /// applied one after the other and never overwrite each other.
    fn update_inventory<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&Inventory) -> Inventory,
    {
        let diff = {
            let mut inventory = self
                .inner
                .inventory
                .write()
                .map_err(|_| Error::io("Failed to acquire write lock on inventory"))?;
            let updated = update(&inventory);
            let diff = inventory.diff(&updated);
            *inventory = updated;
            diff
        };
        if diff.is_empty() {
            return Ok(());
        }
        self.queue_diff(diff)?;

        for proxy in self.inner.registry.proxies()? {
            self.update_reachability(&proxy);
        }
        Ok(())
    }

    fn queue_diff(&self, diff: InventoryDiff) -> Result<()> {
        for module in diff.removed {
            info!("Module {} removed", module.serial_number);
            self.queue(HubEventKind::DeviceRemoval(module));
        }
        for module in diff.arrived {
            info!("Module {} arrived", module.serial_number);
            self.queue(HubEventKind::DeviceArrival(module));
        }
        if diff.value_changes.is_empty() {
            return Ok(());
        }

        let observed: Vec<Arc<FunctionProxy>> = self
            .inner
            .registry
            .proxies()?
            .into_iter()
            .filter(|p| p.has_value_callback())
            .collect();
        for (hardware_id, value) in diff.value_changes {
            for proxy in observed
                .iter()
                .filter(|p| p.last_hardware_id().as_ref() == Some(&hardware_id))
            {
                self.queue_value_change(proxy, &hardware_id, value.clone());
            }
        }
        Ok(())
    }

    fn update_reachability(&self, proxy: &FunctionProxy) {
        match self.resolve(proxy.class_name(), proxy.identifier()) {
            Ok(hardware_id) => {
                proxy.set_hardware_id(hardware_id);
                proxy.set_reachability(Reachability::Online);
            }
            Err(_) => proxy.set_reachability(Reachability::Offline),
        }
    }

    fn queue(&self, kind: HubEventKind) {
        if let Err(e) = self.inner.events.push(HubEvent::new(kind)) {
            warn!("Failed to queue event: {}", e);
        }
    }

    fn dispatch(&self, event: HubEvent) -> Result<bool> {
        match event.kind {
            HubEventKind::DeviceArrival(module) => {
                let callback = self.inner.arrival_callback.read().ok().and_then(|c| c.clone());
                Ok(callback.map(|cb| cb(&module)).is_some())
            }
            HubEventKind::DeviceRemoval(module) => {
                let callback = self.inner.removal_callback.read().ok().and_then(|c| c.clone());
                Ok(callback.map(|cb| cb(&module)).is_some())
            }
            HubEventKind::ValueChanged {
                class,
                identifier,
                value,
                ..
            } => {
                let proxy = match self.inner.registry.get(class, &identifier)? {
                    Some(proxy) => proxy,
                    None => return Ok(false),
                };
                Ok(proxy.value_callback().map(|cb| cb(&proxy, &value)).is_some())
            }
        }
    }

    fn read_inventory(&self) -> Result<std::sync::RwLockReadGuard<'_, Inventory>> {
        self.inner
            .inventory
            .read()
            .map_err(|_| Error::io("Failed to acquire read lock on inventory"))
    }

    fn read_hubs(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Arc<dyn HubTransport>>>> {
        self.inner
            .hubs
            .read()
            .map_err(|_| Error::io("Failed to acquire read lock on hub list"))
    }

    fn write_hubs(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn HubTransport>>>> {
        self.inner
            .hubs
            .write()
            .map_err(|_| Error::io("Failed to acquire write lock on hub list"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use futures::future::join_all;
    use serde_json::json;
    use test_log::test;

    use crate::classes::testing::{context_with, hub_config};
    use crate::classes::{CurrentLoopOutput, FunctionClass, SoundLevel};
    use crate::schema::INVALID_DOUBLE;
    use crate::transports::SimulatedHub;

    fn loop_attributes(advertised: &str) -> serde_json::Value {
        json!({
            "logicalName": "",
            "advertisedValue": advertised,
            "current": 262144,
            "currentTransition": "0:0",
            "currentAtStartUp": 262144,
            "loopPower": 2
        })
    }

    fn hub() -> Arc<SimulatedHub> {
        let hub = SimulatedHub::new("mem://hub")
            .with_module("LOOPTX01-00001", "TX1", "Loop-Tx")
            .with_function("LOOPTX01-00001", "CurrentLoopOutput", "currentLoopOutput", loop_attributes("4.000"));
        for n in 1..=3 {
            let serial = format!("SOUND001-0000{}", n);
            hub.add_module(&serial, "", "Sound-Meter").unwrap();
            hub.add_function(&serial, "SoundLevel", "soundLevel", json!({"currentValue": 65536 * n}))
                .unwrap();
        }
        Arc::new(hub)
    }

    fn loop_id() -> HardwareId {
        HardwareId::new("LOOPTX01-00001", "currentLoopOutput")
    }

    #[test(tokio::test)]
    async fn test_find_returns_the_same_proxy() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let a = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();
        let b = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();
        assert!(Arc::ptr_eq(a.proxy(), b.proxy()));
        assert_eq!(a.reachability(), Reachability::Online);

        let other = context_with(&hub, ErrorMode::Propagate).await;
        let c = CurrentLoopOutput::find(&other, "TX1.currentLoopOutput").unwrap();
        assert!(!Arc::ptr_eq(a.proxy(), c.proxy()));
        assert_ne!(ctx.id(), other.id());
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_validity_window() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();
        out.set_cache_validity(Duration::from_millis(1000)).await;

        assert_eq!(out.current().await.unwrap(), 4.0);
        assert_eq!(hub.load_count(&loop_id()), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(out.current().await.unwrap(), 4.0);
        assert_eq!(hub.load_count(&loop_id()), 1);

        tokio::time::advance(Duration::from_millis(700)).await;
        assert_eq!(out.current().await.unwrap(), 4.0);
        assert_eq!(hub.load_count(&loop_id()), 2);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_concurrent_reads_share_one_load() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        hub.set_latency(Duration::from_millis(50));
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();

        let reads = join_all((0..8).map(|_| out.current())).await;
        assert!(reads.iter().all(|r| r.as_ref().ok() == Some(&4.0)));
        assert_eq!(hub.load_count(&loop_id()), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_failed_load_keeps_cached_values() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();
        assert_eq!(out.current().await.unwrap(), 4.0);

        tokio::time::advance(Duration::from_secs(2)).await;
        hub.set_latency(Duration::from_secs(5));
        assert!(matches!(out.current().await, Err(Error::Timeout(_))));
        assert_eq!(out.reachability(), Reachability::Offline);
        assert_eq!(ctx.last_status().0, StatusCode::Timeout);

        hub.set_latency(Duration::ZERO);
        hub.set_attribute("LOOPTX01-00001.currentLoopOutput", "current", json!(327680))
            .unwrap();
        assert_eq!(out.current().await.unwrap(), 5.0);
        assert_eq!(out.reachability(), Reachability::Online);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_explicit_load_and_invalidate() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();

        assert_eq!(
            out.load_with_validity(Duration::from_millis(100)).await.unwrap(),
            StatusCode::Success
        );
        out.current().await.unwrap();
        assert_eq!(hub.load_count(&loop_id()), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        out.current().await.unwrap();
        assert_eq!(hub.load_count(&loop_id()), 2);

        out.proxy().invalidate().await;
        out.logical_name().await.unwrap();
        assert_eq!(hub.load_count(&loop_id()), 3);
        assert_eq!(out.load().await.unwrap(), StatusCode::Success);
        assert_eq!(hub.load_count(&loop_id()), 4);
    }

    #[test(tokio::test)]
    async fn test_enumeration_visits_each_function_once() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;

        let mut seen = Vec::new();
        let mut cursor = SoundLevel::first(&ctx).unwrap();
        while let Some(meter) = cursor {
            seen.push(meter.hardware_id().unwrap());
            cursor = meter.next().unwrap();
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].module(), "SOUND001-00003");
        assert!(CurrentLoopOutput::first(&ctx).unwrap().is_some());
    }

    #[test(tokio::test)]
    async fn test_offline_function_returns_sentinel() {
        let hub = Arc::new(SimulatedHub::new("mem://hub"));
        let ctx = context_with(&hub, ErrorMode::StatusCodes).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();
        assert_eq!(out.reachability(), Reachability::Offline);
        assert_eq!(out.current().await.unwrap(), INVALID_DOUBLE);
        assert_eq!(ctx.last_status().0, StatusCode::NotFound);
    }

    #[test(tokio::test)]
    async fn test_arrival_and_removal_callbacks_run_from_the_pump() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();
        ctx.handle_events().unwrap();

        let log = Arc::new(StdMutex::new(Vec::new()));
        let arrivals = log.clone();
        ctx.register_device_arrival_callback(move |m| {
            arrivals.lock().unwrap().push(format!("+{}", m.serial_number))
        });
        let removals = log.clone();
        ctx.register_device_removal_callback(move |m| {
            removals.lock().unwrap().push(format!("-{}", m.serial_number))
        });

        hub.unplug("LOOPTX01-00001");
        ctx.update_device_list().await.unwrap();
        assert_eq!(out.reachability(), Reachability::Offline);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(ctx.handle_events().unwrap(), 1);

        hub.replug("LOOPTX01-00001");
        ctx.update_device_list().await.unwrap();
        assert_eq!(out.reachability(), Reachability::Online);
        ctx.handle_events().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["-LOOPTX01-00001", "+LOOPTX01-00001"]);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_value_callbacks() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();
        ctx.handle_events().unwrap();
        let values = Arc::new(StdMutex::new(Vec::new()));
        let sink = values.clone();
        out.register_value_callback(move |_, value| sink.lock().unwrap().push(value.to_string()));

        ctx.notify(HubNotification::ValueChange {
            hardware_id: loop_id(),
            value: "7.000".to_string(),
        })
        .unwrap();
        assert_eq!(ctx.pending_events(), 1);

        // A load that sees a new advertised value queues an event too
        out.advertised_value().await.unwrap();
        hub.set_attribute("LOOPTX01-00001.currentLoopOutput", "advertisedValue", json!("9.000"))
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        out.advertised_value().await.unwrap();

        assert_eq!(ctx.sleep(Duration::from_millis(5)).await.unwrap(), 2);
        assert_eq!(*values.lock().unwrap(), vec!["7.000", "9.000"]);
    }

    #[test(tokio::test)]
    async fn test_notifications_update_reachability() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1").unwrap();
        assert_eq!(out.reachability(), Reachability::Online);
        assert_eq!(ctx.handle_events().unwrap(), 0);

        ctx.notify(HubNotification::Removal {
            serial_number: "LOOPTX01-00001".to_string(),
        })
        .unwrap();
        assert_eq!(out.reachability(), Reachability::Offline);

        let arrival = hub.arrival_notification("LOOPTX01-00001").unwrap();
        ctx.notify(arrival).unwrap();
        assert_eq!(out.reachability(), Reachability::Online);
        assert_eq!(ctx.pending_events(), 2);
    }

    #[test(tokio::test)]
    async fn test_functions_are_routed_to_their_hub() {
        let first = hub();
        let second = Arc::new(
            SimulatedHub::new("mem://second")
                .with_module("LOOPTX01-00009", "TX9", "Loop-Tx")
                .with_function("LOOPTX01-00009", "CurrentLoopOutput", "currentLoopOutput", loop_attributes("9.000")),
        );
        let ctx = context_with(&first, ErrorMode::Propagate).await;
        ctx.register_hub(second.clone()).await.unwrap();
        ctx.register_hub(second.clone()).await.unwrap();
        assert_eq!(ctx.hub_urls().len(), 2);

        let remote = CurrentLoopOutput::find(&ctx, "TX9.currentLoopOutput").unwrap();
        assert_eq!(remote.advertised_value().await.unwrap(), "9.000");
        assert_eq!(second.load_count(&HardwareId::new("LOOPTX01-00009", "currentLoopOutput")), 1);

        assert!(ctx.unregister_hub("mem://second").unwrap());
        assert!(!ctx.unregister_hub("mem://second").unwrap());
        assert_eq!(remote.reachability(), Reachability::Offline);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_update_device_list_keeps_hub_registered_meanwhile() {
        let first = hub();
        let second = Arc::new(
            SimulatedHub::new("mem://second")
                .with_module("LOOPTX01-00009", "TX9", "Loop-Tx")
                .with_function("LOOPTX01-00009", "CurrentLoopOutput", "currentLoopOutput", loop_attributes("9.000")),
        );
        let ctx = context_with(&first, ErrorMode::Propagate).await;
        ctx.handle_events().unwrap();
        let removals = Arc::new(StdMutex::new(Vec::new()));
        let seen = removals.clone();
        ctx.register_device_removal_callback(move |m| seen.lock().unwrap().push(m.serial_number.clone()));
        first.set_latency(Duration::from_millis(100));

        let (updated, registered) = tokio::join!(ctx.update_device_list(), ctx.register_hub(second.clone()));
        updated.unwrap();
        registered.unwrap();

        let inventory = ctx.inventory().unwrap();
        assert!(inventory.module("LOOPTX01-00009").is_some());
        assert_eq!(inventory.modules().len(), 5);
        let remote = CurrentLoopOutput::find(&ctx, "TX9.currentLoopOutput").unwrap();
        assert_eq!(remote.reachability(), Reachability::Online);

        ctx.handle_events().unwrap();
        assert!(removals.lock().unwrap().is_empty());
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_find_from_many_tasks_yields_one_proxy() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(async move { CurrentLoopOutput::find(&ctx, " TX1.currentLoopOutput").unwrap() })
            })
            .collect();
        let found: Vec<CurrentLoopOutput> = join_all(tasks).await.into_iter().map(|t| t.unwrap()).collect();

        assert!(found.iter().all(|f| Arc::ptr_eq(f.proxy(), found[0].proxy())));
        assert_eq!(ctx.functions().unwrap().len(), 1);
        assert_eq!(found[0].reachability(), Reachability::Online);
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_concurrent_notifications_are_all_applied() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;

        let tasks: Vec<_> = (1..=3)
            .map(|n| {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    ctx.notify(HubNotification::Removal {
                        serial_number: format!("SOUND001-0000{}", n),
                    })
                })
            })
            .collect();
        for task in join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let inventory = ctx.inventory().unwrap();
        assert!(inventory.functions("SoundLevel").is_empty());
        assert_eq!(inventory.modules().len(), 1);
    }

    #[test(tokio::test)]
    async fn test_register_hub_failure() {
        let hub = hub();
        hub.fail_with(Some(Error::io("connection refused")));
        let ctx = Context::new(hub_config(ErrorMode::Propagate)).unwrap();
        assert!(ctx.register_hub(hub.clone()).await.is_err());
        assert!(ctx.hub_urls().is_empty());
        assert_eq!(ctx.last_status().0, StatusCode::IoError);
        assert!(matches!(ctx.update_device_list().await, Err(Error::NotInitialized(_))));
    }

    #[test(tokio::test)]
    async fn test_teardown() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();

        ctx.teardown().unwrap();
        assert!(!ctx.is_active());
        assert_eq!(out.reachability(), Reachability::Offline);
        assert!(matches!(out.current().await, Err(Error::NotInitialized(_))));
        assert!(CurrentLoopOutput::find(&ctx, "TX1").is_err());
        assert!(ctx.inventory().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = hub_config(ErrorMode::Propagate);
        config.request_timeout_ms = 0;
        assert!(matches!(Context::new(config), Err(Error::Config(_))));
    }
}
