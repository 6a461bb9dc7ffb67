//! Device capability interface and bundled drivers
//!
//! [`traits`] defines the contract the animator drives outputs through;
//! [`sim`] is the logging/sleeping stand-in used when no hardware is
//! attached. Posture constants live here rather than in any one driver:
//! drivers execute primitives, the animator decides postures.

pub mod sim;
pub mod traits;

pub use sim::SimDriver;
pub use traits::{DeviceDriver, DeviceError, Led, LedEffect, Rgb};

/// Ear position considered home (fully forward).
pub const EAR_HOME: u8 = 0;

/// Folded ear position used for the sleep posture.
pub const EAR_REST: u8 = 10;

/// Bottom-LED pulse applied as part of the boot posture.
pub const BOOT_PULSE_COLOR: Rgb = Rgb::new(255, 0, 255);
