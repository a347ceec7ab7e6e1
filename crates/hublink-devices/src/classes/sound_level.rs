/*!
 * Sound level meter.
 *
 * Besides the current level the meter keeps the lowest and highest values seen
 * since the last reset. `unit` and `label` rarely change and are loaded once.
 */
use std::sync::Arc;

use hublink_core::error::{Error, Result, StatusCode};
use hublink_core::types::Value;

use super::FunctionClass;
use crate::function::FunctionProxy;
use crate::schema::{AttributeSpec, Encoding, FunctionSchema};

/// Schema of the `SoundLevel` class
pub static SCHEMA: FunctionSchema = FunctionSchema {
    class_name: "SoundLevel",
    attributes: &[
        AttributeSpec::new("unit", Encoding::Text).lazy(),
        AttributeSpec::new("currentValue", Encoding::Fixed),
        AttributeSpec::new("lowestValue", Encoding::Fixed).writable(),
        AttributeSpec::new("highestValue", Encoding::Fixed).writable(),
        AttributeSpec::new("currentRawValue", Encoding::Fixed).immediate(),
        AttributeSpec::new("label", Encoding::Text).lazy().writable(),
        AttributeSpec::new("integrationTime", Encoding::Integer)
            .writable()
            .range(0.0, i32::MAX as f64),
    ],
};

/// A sound level function
#[derive(Debug, Clone)]
pub struct SoundLevel {
    proxy: Arc<FunctionProxy>,
}

impl FunctionClass for SoundLevel {
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

impl SoundLevel {
    /// Measuring unit, e.g. `dB`
    pub async fn unit(&self) -> Result<String> {
        self.proxy.get_string("unit").await
    }

    /// Current level
    pub async fn current_value(&self) -> Result<f64> {
        self.proxy.get_float("currentValue").await
    }

    /// Lowest level since the last reset
    pub async fn lowest_value(&self) -> Result<f64> {
        self.proxy.get_float("lowestValue").await
    }

    /// Overwrite the recorded lowest level
    pub async fn set_lowest_value(&self, value: f64) -> Result<StatusCode> {
        self.proxy.set("lowestValue", Value::Float(value)).await
    }

    /// Highest level since the last reset
    pub async fn highest_value(&self) -> Result<f64> {
        self.proxy.get_float("highestValue").await
    }

    /// Overwrite the recorded highest level
    pub async fn set_highest_value(&self, value: f64) -> Result<StatusCode> {
        self.proxy.set("highestValue", Value::Float(value)).await
    }

    /// Uncalibrated level, read from the device on every call
    pub async fn current_raw_value(&self) -> Result<f64> {
        self.proxy.get_float("currentRawValue").await
    }

    /// Free-form label of the measurement
    pub async fn label(&self) -> Result<String> {
        self.proxy.get_string("label").await
    }

    /// Change the label
    pub async fn set_label(&self, label: &str) -> Result<StatusCode> {
        self.proxy.set("label", Value::from(label)).await
    }

    /// Integration time, in ms
    pub async fn integration_time(&self) -> Result<i64> {
        self.proxy.get_integer("integrationTime").await
    }

    /// Change the integration time
    pub async fn set_integration_time(&self, millis: i64) -> Result<StatusCode> {
        self.proxy.set("integrationTime", Value::Integer(millis)).await
    }

    /// Restart the lowest/highest tracking from the current level
    pub async fn reset_extremes(&self) -> Result<StatusCode> {
        let current = self.proxy.get_raw("currentValue").await;
        let current = match current.and_then(|v| {
            v.as_float()
                .ok_or_else(|| Error::serialization("currentValue is not a number"))
        }) {
            Ok(value) => value,
            Err(e) => return self.proxy.guard_status(Err(e)),
        };

        let status = self.set_lowest_value(current).await?;
        if !status.is_success() {
            return Ok(status);
        }
        self.set_highest_value(current).await
    }
}
