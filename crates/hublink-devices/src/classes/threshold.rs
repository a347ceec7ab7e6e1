/*!
 * Threshold function: watches another sensor and switches between a safe and
 * an alert state with hysteresis.
 */
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use hublink_core::error::{Result, StatusCode};
use hublink_core::types::Value;

use super::{get_enum, AttributeEnum, FunctionClass};
use crate::function::FunctionProxy;
use crate::schema::{AttributeSpec, Encoding, FunctionSchema};

/// Schema of the `Threshold` class
pub static SCHEMA: FunctionSchema = FunctionSchema {
    class_name: "Threshold",
    attributes: &[
        AttributeSpec::new("thresholdState", Encoding::Enum),
        AttributeSpec::new("targetSensor", Encoding::Text).writable(),
        AttributeSpec::new("alertLevel", Encoding::Fixed).writable(),
        AttributeSpec::new("safeLevel", Encoding::Fixed).writable(),
    ],
};

/// State of a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdState {
    /// The watched value is on the safe side
    Safe,
    /// The watched value crossed the alert level
    Alert,
    /// Could not be read
    Invalid,
}

impl AttributeEnum for ThresholdState {
    const INVALID: Self = ThresholdState::Invalid;

    fn from_code(code: i64) -> Self {
        match code {
            0 => ThresholdState::Safe,
            1 => ThresholdState::Alert,
            _ => ThresholdState::Invalid,
        }
    }

    fn code(self) -> i64 {
        match self {
            ThresholdState::Safe => 0,
            ThresholdState::Alert => 1,
            ThresholdState::Invalid => -1,
        }
    }
}

/// A threshold function
#[derive(Debug, Clone)]
pub struct Threshold {
    proxy: Arc<FunctionProxy>,
}

impl FunctionClass for Threshold {
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

impl Threshold {
    /// Current state
    pub async fn threshold_state(&self) -> Result<ThresholdState> {
        get_enum(&self.proxy, "thresholdState").await
    }

    /// Hardware ID of the watched sensor
    pub async fn target_sensor(&self) -> Result<String> {
        self.proxy.get_string("targetSensor").await
    }

    /// Change the watched sensor
    pub async fn set_target_sensor(&self, sensor: &str) -> Result<StatusCode> {
        self.proxy.set("targetSensor", Value::from(sensor)).await
    }

    /// Level that triggers the alert state
    pub async fn alert_level(&self) -> Result<f64> {
        self.proxy.get_float("alertLevel").await
    }

    /// Change the alert level
    pub async fn set_alert_level(&self, level: f64) -> Result<StatusCode> {
        self.proxy.set("alertLevel", Value::Float(level)).await
    }

    /// Level that brings the state back to safe
    pub async fn safe_level(&self) -> Result<f64> {
        self.proxy.get_float("safeLevel").await
    }

    /// Change the safe level
    pub async fn set_safe_level(&self, level: f64) -> Result<StatusCode> {
        self.proxy.set("safeLevel", Value::Float(level)).await
    }
}
