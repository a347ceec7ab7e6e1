/*!
 * Switchable power output.
 */
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use hublink_core::error::{Result, StatusCode};

use super::{get_enum, set_enum, AttributeEnum, FunctionClass};
use crate::function::FunctionProxy;
use crate::schema::{AttributeSpec, Encoding, FunctionSchema};

/// Schema of the `PowerOutput` class
pub static SCHEMA: FunctionSchema = FunctionSchema {
    class_name: "PowerOutput",
    attributes: &[AttributeSpec::new("voltage", Encoding::Enum)
        .writable()
        .range(0.0, 4.0)],
};

/// Output voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Voltage {
    /// Output disabled
    Off,
    /// 3.3 V
    Out3V3,
    /// 5 V
    Out5V,
    /// 4.7 V
    Out4V7,
    /// 1.8 V
    Out1V8,
    /// Could not be read
    Invalid,
}

impl AttributeEnum for Voltage {
    const INVALID: Self = Voltage::Invalid;

    fn from_code(code: i64) -> Self {
        match code {
            0 => Voltage::Off,
            1 => Voltage::Out3V3,
            2 => Voltage::Out5V,
            3 => Voltage::Out4V7,
            4 => Voltage::Out1V8,
            _ => Voltage::Invalid,
        }
    }

    fn code(self) -> i64 {
        match self {
            Voltage::Off => 0,
            Voltage::Out3V3 => 1,
            Voltage::Out5V => 2,
            Voltage::Out4V7 => 3,
            Voltage::Out1V8 => 4,
            Voltage::Invalid => -1,
        }
    }
}

/// A power output function
#[derive(Debug, Clone)]
pub struct PowerOutput {
    proxy: Arc<FunctionProxy>,
}

impl FunctionClass for PowerOutput {
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

impl PowerOutput {
    /// The selected output voltage
    pub async fn voltage(&self) -> Result<Voltage> {
        get_enum(&self.proxy, "voltage").await
    }

    /// Select the output voltage
    pub async fn set_voltage(&self, voltage: Voltage) -> Result<StatusCode> {
        set_enum(&self.proxy, "voltage", voltage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use hublink_core::error::{Error, ErrorMode};

    use crate::classes::testing::context_with;
    use crate::transports::SimulatedHub;

    fn hub() -> Arc<SimulatedHub> {
        Arc::new(
            SimulatedHub::new("mem://hub")
                .with_module("POWER001-00001", "", "Power-Out")
                .with_function(
                    "POWER001-00001",
                    "PowerOutput",
                    "powerOutput",
                    json!({"logicalName": "", "advertisedValue": "OFF", "voltage": 0}),
                ),
        )
    }

    #[tokio::test]
    async fn test_voltage_round_trip_through_hub() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = PowerOutput::find(&ctx, "powerOutput").unwrap();

        assert_eq!(out.voltage().await.unwrap(), Voltage::Off);
        assert_eq!(out.set_voltage(Voltage::Out5V).await.unwrap(), StatusCode::Success);
        assert_eq!(hub.attribute("POWER001-00001.powerOutput", "voltage"), Some(json!(2)));
        assert_eq!(out.voltage().await.unwrap(), Voltage::Out5V);
    }

    #[tokio::test]
    async fn test_invalid_voltage_is_rejected_before_io() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = PowerOutput::find(&ctx, "POWER001-00001").unwrap();
        let before = hub.total_requests();

        assert!(matches!(
            out.set_voltage(Voltage::Invalid).await,
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(hub.total_requests(), before);
    }

    #[tokio::test]
    async fn test_status_code_mode() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::StatusCodes).await;
        let out = PowerOutput::find(&ctx, "powerOutput").unwrap();

        hub.unplug("POWER001-00001");
        assert_eq!(out.set_voltage(Voltage::Out3V3).await.unwrap(), StatusCode::Offline);
        assert_eq!(out.voltage().await.unwrap(), Voltage::Invalid);
        assert_eq!(ctx.last_status().0, StatusCode::Offline);
    }
}
