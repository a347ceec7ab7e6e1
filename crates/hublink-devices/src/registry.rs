/*!
 * Function registry for hublink.
 *
 * Every proxy a context hands out is interned here, keyed by class name and
 * trimmed identifier, so asking twice for the same function yields the same
 * proxy and therefore the same cache.
 */
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use hublink_core::error::{Error, Result};

use crate::function::FunctionProxy;

type Key = (&'static str, String);

/// Interned proxies of one context
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    proxies: RwLock<HashMap<Key, Arc<FunctionProxy>>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the proxy registered for `(class, identifier)`, creating it if needed
    ///
    /// Lookup and insertion happen under one write lock, so concurrent callers
    /// always end up with the same proxy. The flag is true when the proxy was
    /// created by this call.
    pub fn find_or_create<F>(
        &self,
        class: &'static str,
        identifier: &str,
        create: F,
    ) -> Result<(Arc<FunctionProxy>, bool)>
    where
        F: FnOnce(String) -> FunctionProxy,
    {
        let identifier = identifier.trim();
        let mut proxies = self.proxies.write().map_err(|_| {
            Error::io("Failed to acquire write lock on function registry")
        })?;

        if let Some(proxy) = proxies.get(&(class, identifier.to_string())) {
            return Ok((proxy.clone(), false));
        }

        let proxy = Arc::new(create(identifier.to_string()));
        proxies.insert((class, identifier.to_string()), proxy.clone());
        debug!("Registered {} proxy for '{}'", class, identifier);
        Ok((proxy, true))
    }

    /// The proxy registered for `(class, identifier)`, if any
    pub fn get(&self, class: &'static str, identifier: &str) -> Result<Option<Arc<FunctionProxy>>> {
        let proxies = self.proxies.read().map_err(|_| {
            Error::io("Failed to acquire read lock on function registry")
        })?;

        Ok(proxies.get(&(class, identifier.trim().to_string())).cloned())
    }

    /// Every registered proxy
    pub fn proxies(&self) -> Result<Vec<Arc<FunctionProxy>>> {
        let proxies = self.proxies.read().map_err(|_| {
            Error::io("Failed to acquire read lock on function registry")
        })?;

        Ok(proxies.values().cloned().collect())
    }

    /// Number of registered proxies
    pub fn len(&self) -> usize {
        self.proxies.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Whether no proxy is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every proxy; proxies still held by callers keep working on their own
    pub fn clear(&self) -> Result<()> {
        self.proxies
            .write()
            .map_err(|_| Error::io("Failed to acquire write lock on function registry"))?
            .clear();
        Ok(())
    }
}
