//! Simulated device driver
//!
//! Stands in for hardware during development: every primitive becomes a log
//! line, and the rendering operations sleep for a configurable step so
//! playback has realistic shape without motors or audio. `hutchd` runs with
//! this driver by default.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};

use super::traits::{DeviceDriver, DeviceError, Led, LedEffect};

/// Hardware stand-in that logs and sleeps.
#[derive(Clone, Debug)]
pub struct SimDriver {
    step: Duration,
}

impl SimDriver {
    /// Driver with the given simulated step duration.
    pub fn new(step: Duration) -> Self {
        SimDriver { step }
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        SimDriver::new(Duration::from_millis(250))
    }
}

#[async_trait]
impl DeviceDriver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    async fn move_ears(&self, left: u8, right: u8) -> Result<(), DeviceError> {
        debug!(left, right, "ears moved");
        Ok(())
    }

    async fn set_led(&self, led: Led, effect: LedEffect) -> Result<(), DeviceError> {
        debug!(led = %led, effect = ?effect, "led set");
        Ok(())
    }

    async fn play_sequence(&self, sequence: Value) -> Result<(), DeviceError> {
        // One step per item of an array payload; anything else counts as one.
        let steps = sequence.as_array().map_or(1, |items| items.len().max(1));
        info!(steps, "playing sequence");
        sleep(self.step * steps as u32).await;
        Ok(())
    }

    async fn render_info(&self, animation: Value) -> Result<(), DeviceError> {
        let frames = animation
            .get("colors")
            .and_then(Value::as_array)
            .map_or(1, |frames| frames.len().max(1));
        debug!(frames, "ambient pass rendered");
        sleep(self.step).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn rendering_operations_complete() {
        let driver = SimDriver::new(Duration::from_millis(1));
        driver
            .play_sequence(json!([{"audio": ["a.mp3"]}, {"audio": ["b.mp3"]}]))
            .await
            .unwrap();
        driver
            .render_info(json!({"tempo": 25, "colors": [{"left": "00ff00"}]}))
            .await
            .unwrap();
        driver.move_ears(0, 0).await.unwrap();
        driver.set_led(Led::Bottom, LedEffect::Off).await.unwrap();
    }
}
