/*!
 * Typed device classes.
 *
 * Each class is a thin wrapper around a [`FunctionProxy`] created with the
 * class's static schema. The operations every class shares live in the
 * [`FunctionClass`] trait; the class modules only add typed accessors.
 */
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use hublink_core::error::{Error, Result, StatusCode};
use hublink_core::types::Value;

use crate::context::Context;
use crate::function::{FunctionProxy, Reachability};
use crate::hardware_id::HardwareId;
use crate::schema::{FunctionSchema, ADVERTISED_VALUE, LOGICAL_NAME};

pub mod current_loop_output;
pub mod files;
pub mod power_output;
pub mod sound_level;
pub mod threshold;

pub use current_loop_output::{CurrentLoopOutput, LoopPower};
pub use files::{FileRecord, Files};
pub use power_output::{PowerOutput, Voltage};
pub use sound_level::SoundLevel;
pub use threshold::{Threshold, ThresholdState};

/// Every schema shipped with the crate
pub fn schemas() -> [&'static FunctionSchema; 5] {
    [
        &current_loop_output::SCHEMA,
        &power_output::SCHEMA,
        &sound_level::SCHEMA,
        &threshold::SCHEMA,
        &files::SCHEMA,
    ]
}

/// An enumerated attribute with a numeric wire code
pub trait AttributeEnum: Sized + Copy {
    /// The variant reported when the attribute cannot be read
    const INVALID: Self;

    /// Decode a wire code; unknown codes map to [`AttributeEnum::INVALID`]
    fn from_code(code: i64) -> Self;

    /// The wire code of this variant
    fn code(self) -> i64;
}

/// Operations shared by every device class
#[async_trait]
pub trait FunctionClass: Sized + Send + Sync + 'static {
    /// The schema of the class
    fn schema() -> &'static FunctionSchema;

    /// Wrap a proxy created with [`FunctionClass::schema`]
    fn from_proxy(proxy: Arc<FunctionProxy>) -> Self;

    /// The underlying proxy
    fn proxy(&self) -> &Arc<FunctionProxy>;

    /// The function named `identifier`; it may be offline
    fn find(ctx: &Context, identifier: &str) -> Result<Self> {
        Ok(Self::from_proxy(ctx.find_function(Self::schema(), identifier)?))
    }

    /// The first function of the class, if any
    fn first(ctx: &Context) -> Result<Option<Self>> {
        match ctx.first(Self::schema().class_name)? {
            Some(id) => Ok(Some(Self::find(ctx, &id.to_string())?)),
            None => Ok(None),
        }
    }

    /// The next function of the class, if any
    fn next(&self) -> Result<Option<Self>> {
        let proxy = self.proxy();
        let ctx = proxy.context()?;
        let current = match proxy.hardware_id() {
            Ok(id) => id,
            Err(e) => proxy.last_hardware_id().ok_or(e)?,
        };
        match ctx.next(Self::schema().class_name, &current)? {
            Some(id) => Ok(Some(Self::find(&ctx, &id.to_string())?)),
            None => Ok(None),
        }
    }

    /// Whether the function answers
    async fn is_online(&self) -> bool {
        self.proxy().is_online().await
    }

    /// Reachability as last observed, without I/O
    fn reachability(&self) -> Reachability {
        self.proxy().reachability()
    }

    /// The canonical hardware ID of the function
    fn hardware_id(&self) -> Result<HardwareId> {
        self.proxy().hardware_id()
    }

    /// Reload every attribute now
    async fn load(&self) -> Result<StatusCode> {
        let result = self.proxy().load().await;
        self.proxy().guard_status(result)
    }

    /// Reload every attribute now and keep the result for `validity`
    async fn load_with_validity(&self, validity: Duration) -> Result<StatusCode> {
        let result = self.proxy().load_with_validity(validity).await;
        self.proxy().guard_status(result)
    }

    /// Change how long a load stays valid
    async fn set_cache_validity(&self, validity: Duration) {
        self.proxy().set_cache_validity(validity).await
    }

    /// The user-assigned name
    async fn logical_name(&self) -> Result<String> {
        self.proxy().get_string(LOGICAL_NAME).await
    }

    /// Rename the function
    async fn set_logical_name(&self, name: &str) -> Result<StatusCode> {
        self.proxy().set(LOGICAL_NAME, Value::from(name)).await
    }

    /// The short state summary
    async fn advertised_value(&self) -> Result<String> {
        self.proxy().get_string(ADVERTISED_VALUE).await
    }

    /// Observe advertised value changes; delivered by the context's event pump
    fn register_value_callback<F>(&self, callback: F)
    where
        F: Fn(&Self, &str) + Send + Sync + 'static,
    {
        self.proxy()
            .register_value_callback(move |proxy, value| callback(&Self::from_proxy(proxy.clone()), value));
    }
}

/// Read an enumerated attribute
pub(crate) async fn get_enum<E: AttributeEnum>(proxy: &FunctionProxy, attribute: &str) -> Result<E> {
    proxy.get_enum(attribute).await.map(E::from_code)
}

/// Write an enumerated attribute; the invalid variant is rejected
pub(crate) async fn set_enum<E: AttributeEnum + PartialEq>(
    proxy: &FunctionProxy,
    attribute: &str,
    value: E,
) -> Result<StatusCode> {
    if value == E::INVALID {
        let result = Err(Error::invalid_argument(format!("cannot write an invalid {}", attribute)));
        return proxy.guard_status(result);
    }
    proxy.set(attribute, Value::Integer(value.code())).await
}
