//! Device capability interface
//!
//! The narrow contract between the control core and whatever renders ears,
//! LEDs, and sound, whether real hardware or the bundled simulator. The core
//! passes `sequence` and `animation` payloads through as opaque JSON and only
//! cares about completion and failure.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Fixed LED positions on the shell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Led {
    /// Left front.
    Left,
    /// Center front.
    Center,
    /// Right front.
    Right,
    /// Underside.
    Bottom,
    /// Nose tip.
    Nose,
}

impl Led {
    /// Every LED position, for whole-shell effects.
    pub const ALL: [Led; 5] = [Led::Left, Led::Center, Led::Right, Led::Bottom, Led::Nose];

    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Led::Left => "left",
            Led::Center => "center",
            Led::Right => "right",
            Led::Bottom => "bottom",
            Led::Nose => "nose",
        }
    }
}

impl fmt::Display for Led {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 8-bit RGB color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Build a color from channel values.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

/// What one LED should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedEffect {
    /// Dark.
    Off,
    /// Steady color.
    Solid(Rgb),
    /// Slow breathing pulse of the color.
    Pulse(Rgb),
}

/// Driver-reported failure. Never fatal to the daemon: a failed sequence is
/// answered with an error response and the queue moves on.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The driver could not complete the operation.
    #[error("device fault: {0}")]
    Fault(String),
}

/// Capability contract the core drives the appliance through.
///
/// Posture primitives (`move_ears`, `set_led`) are expected to be quick; the
/// two rendering operations are the long-running ones. `render_info` may be
/// cancelled at any await point when the appliance leaves the idle state, and
/// the core may issue posture primitives immediately after such a
/// cancellation; drivers serialize internally if their transport needs it.
/// `play_sequence` is never cancelled.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Human-readable driver name for logs.
    fn name(&self) -> &str;

    /// Move both ears to absolute positions (motor steps; 0 = home).
    async fn move_ears(&self, left: u8, right: u8) -> Result<(), DeviceError>;

    /// Apply an effect to one LED.
    async fn set_led(&self, led: Led, effect: LedEffect) -> Result<(), DeviceError>;

    /// Render one command sequence to completion.
    async fn play_sequence(&self, sequence: Value) -> Result<(), DeviceError>;

    /// Render one full pass of an ambient animation, resolving when the
    /// device is ready for the next pass.
    async fn render_info(&self, animation: Value) -> Result<(), DeviceError>;
}
