/*!
 * 4-20 mA current loop output.
 */
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use hublink_core::error::{Error, Result, StatusCode};
use hublink_core::types::Value;

use super::{get_enum, AttributeEnum, FunctionClass};
use crate::function::FunctionProxy;
use crate::schema::{encode_fixed, AttributeSpec, Encoding, FunctionSchema};

/// Lowest loop current accepted, in mA
pub const MIN_CURRENT: f64 = 3.0;
/// Highest loop current accepted, in mA
pub const MAX_CURRENT: f64 = 21.0;

/// Schema of the `CurrentLoopOutput` class
pub static SCHEMA: FunctionSchema = FunctionSchema {
    class_name: "CurrentLoopOutput",
    attributes: &[
        AttributeSpec::new("current", Encoding::Fixed)
            .writable()
            .range(MIN_CURRENT, MAX_CURRENT),
        AttributeSpec::new("currentTransition", Encoding::Text)
            .immediate()
            .writable(),
        AttributeSpec::new("currentAtStartUp", Encoding::Fixed)
            .writable()
            .range(MIN_CURRENT, MAX_CURRENT),
        AttributeSpec::new("loopPower", Encoding::Enum),
    ],
};

/// Power state of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopPower {
    /// No power on the loop
    NoPower,
    /// Loop powered, but below the level needed for full range
    LowPower,
    /// Loop powered correctly
    PowerOk,
    /// Could not be read
    Invalid,
}

impl AttributeEnum for LoopPower {
    const INVALID: Self = LoopPower::Invalid;

    fn from_code(code: i64) -> Self {
        match code {
            0 => LoopPower::NoPower,
            1 => LoopPower::LowPower,
            2 => LoopPower::PowerOk,
            _ => LoopPower::Invalid,
        }
    }

    fn code(self) -> i64 {
        match self {
            LoopPower::NoPower => 0,
            LoopPower::LowPower => 1,
            LoopPower::PowerOk => 2,
            LoopPower::Invalid => -1,
        }
    }
}

/// A current loop output function
#[derive(Debug, Clone)]
pub struct CurrentLoopOutput {
    proxy: Arc<FunctionProxy>,
}

impl FunctionClass for CurrentLoopOutput {
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

impl CurrentLoopOutput {
    /// Loop current, in mA
    pub async fn current(&self) -> Result<f64> {
        self.proxy.get_float("current").await
    }

    /// Drive the loop to `milliamps` immediately
    pub async fn set_current(&self, milliamps: f64) -> Result<StatusCode> {
        self.proxy.set("current", Value::Float(milliamps)).await
    }

    /// The transition in progress, as `target:remaining_ms`
    pub async fn current_transition(&self) -> Result<String> {
        self.proxy.get_string("currentTransition").await
    }

    /// Start a raw transition command
    pub async fn set_current_transition(&self, transition: &str) -> Result<StatusCode> {
        self.proxy.set("currentTransition", Value::from(transition)).await
    }

    /// Current applied at power-up, in mA
    pub async fn current_at_start_up(&self) -> Result<f64> {
        self.proxy.get_float("currentAtStartUp").await
    }

    /// Change the current applied at power-up
    pub async fn set_current_at_start_up(&self, milliamps: f64) -> Result<StatusCode> {
        self.proxy.set("currentAtStartUp", Value::Float(milliamps)).await
    }

    /// Power state of the loop
    pub async fn loop_power(&self) -> Result<LoopPower> {
        get_enum(&self.proxy, "loopPower").await
    }

    /// Move smoothly to `target_ma` over `duration_ms`
    pub async fn current_move(&self, target_ma: f64, duration_ms: u32) -> Result<StatusCode> {
        if !target_ma.is_finite() || !(MIN_CURRENT..=MAX_CURRENT).contains(&target_ma) {
            let result = Err(Error::invalid_argument(format!(
                "target current {} is outside [{}, {}]",
                target_ma, MIN_CURRENT, MAX_CURRENT
            )));
            return self.proxy.guard_status(result);
        }
        match encode_fixed(target_ma) {
            Ok(raw) => self.set_current_transition(&format!("{}:{}", raw, duration_ms)).await,
            Err(e) => self.proxy.guard_status(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio_test::assert_ok;

    use hublink_core::error::ErrorMode;

    use crate::classes::testing::context_with;
    use crate::hardware_id::HardwareId;
    use crate::schema::{INVALID_DOUBLE, INVALID_STRING};
    use crate::transports::SimulatedHub;

    fn hub() -> Arc<SimulatedHub> {
        Arc::new(
            SimulatedHub::new("mem://hub")
                .with_module("LOOPTX01-00001", "TX1", "Loop-Tx")
                .with_function(
                    "LOOPTX01-00001",
                    "CurrentLoopOutput",
                    "currentLoopOutput",
                    json!({
                        "logicalName": "pump",
                        "advertisedValue": "4.000",
                        "current": 262144,
                        "currentTransition": "0:0",
                        "currentAtStartUp": 262144,
                        "loopPower": 2
                    }),
                ),
        )
    }

    #[tokio::test]
    async fn test_typed_reads() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();

        assert_eq!(out.current().await.unwrap(), 4.0);
        assert_eq!(out.current_at_start_up().await.unwrap(), 4.0);
        assert_eq!(out.loop_power().await.unwrap(), LoopPower::PowerOk);
        assert_eq!(out.logical_name().await.unwrap(), "pump");
        assert_eq!(out.advertised_value().await.unwrap(), "4.000");
        assert_eq!(
            out.hardware_id().unwrap(),
            HardwareId::new("LOOPTX01-00001", "currentLoopOutput")
        );
    }

    #[tokio::test]
    async fn test_set_current_writes_fixed_point() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "pump").unwrap();

        assert_eq!(out.set_current(12.5).await.unwrap(), StatusCode::Success);
        assert_eq!(
            hub.attribute("LOOPTX01-00001.currentLoopOutput", "current"),
            Some(json!(819200))
        );
        assert_eq!(out.current().await.unwrap(), 12.5);

        assert!(matches!(out.set_current(25.0).await, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_current_move() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "pump").unwrap();

        assert_ok!(out.current_move(20.0, 1500).await);
        assert_eq!(
            hub.attribute("LOOPTX01-00001.currentLoopOutput", "currentTransition"),
            Some(json!("1310720:1500"))
        );
        assert_eq!(out.current_transition().await.unwrap(), "1310720:1500");
        assert!(out.current_move(2.0, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_transition_is_read_on_every_call() {
        let hub = hub();
        let ctx = context_with(&hub, ErrorMode::Propagate).await;
        let out = CurrentLoopOutput::find(&ctx, "pump").unwrap();
        let id = HardwareId::new("LOOPTX01-00001", "currentLoopOutput");

        out.current_transition().await.unwrap();
        out.current_transition().await.unwrap();
        out.current().await.unwrap();
        assert_eq!(hub.load_count(&id), 2);
    }

    #[tokio::test]
    async fn test_offline_reads_return_sentinels() {
        let hub = Arc::new(SimulatedHub::new("mem://hub"));
        let ctx = context_with(&hub, ErrorMode::StatusCodes).await;
        let out = CurrentLoopOutput::find(&ctx, "TX1.currentLoopOutput").unwrap();

        assert_eq!(out.current().await.unwrap(), INVALID_DOUBLE);
        assert_eq!(out.loop_power().await.unwrap(), LoopPower::Invalid);
        assert_eq!(out.logical_name().await.unwrap(), INVALID_STRING);
        assert_eq!(out.set_current(10.0).await.unwrap(), StatusCode::NotFound);
        assert_eq!(ctx.last_status().0, StatusCode::NotFound);
        assert!(!out.is_online().await);

        assert_eq!(out.current_move(30.0, 10).await.unwrap(), StatusCode::InvalidArgument);
    }

    #[test]
    fn test_loop_power_codes() {
        for power in [LoopPower::NoPower, LoopPower::LowPower, LoopPower::PowerOk] {
            assert_eq!(LoopPower::from_code(power.code()), power);
        }
        assert_eq!(LoopPower::from_code(7), LoopPower::Invalid);
    }
}
