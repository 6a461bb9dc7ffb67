//! Hutch Core - Control Daemon Internals for a Small Interactive Appliance
//!
//! This crate provides everything the appliance daemon does apart from
//! process management: the TCP protocol, the global state machine, the
//! command scheduler, ambient info animations, and the device capability
//! boundary. The `hutchd` binary is a thin wrapper around [`Server`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Clients                              │
//! │   ┌────────────┐   ┌────────────┐   ┌────────────────────┐   │
//! │   │ services   │   │ web relay  │   │  test harnesses    │   │
//! │   └─────┬──────┘   └─────┬──────┘   └─────────┬──────────┘   │
//! │         │                │                    │              │
//! │         └────────────────┴────────────────────┘              │
//! │                          │                                   │
//! │              line-delimited JSON over TCP                    │
//! └──────────────────────────┼───────────────────────────────────┘
//!                            │
//! ┌──────────────────────────┼───────────────────────────────────┐
//! │                     HUTCH CORE                               │
//! │   ┌──────────────────────┴─────────────────────────────────┐ │
//! │   │                  Server (accept loop)                  │ │
//! │   │        one session task per connection, select!        │ │
//! │   └──────────────────────┬─────────────────────────────────┘ │
//! │                 mpsc<AnimatorEvent>                          │
//! │   ┌──────────────────────┴─────────────────────────────────┐ │
//! │   │                       Animator                         │ │
//! │   │  ┌───────────┐  ┌──────────────┐  ┌─────────────────┐  │ │
//! │   │  │   state   │  │ CommandQueue │  │  InfoRegistry   │  │ │
//! │   │  │  machine  │  │    (FIFO)    │  │  (round robin)  │  │ │
//! │   │  └───────────┘  └──────────────┘  └─────────────────┘  │ │
//! │   └──────────────────────┬─────────────────────────────────┘ │
//! │                          │                                   │
//! │                  Arc<dyn DeviceDriver>                       │
//! │              (ears, LEDs, sequence playback)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Server`]: TCP front end; owns the accept loop and connection tasks
//! - [`Animator`]: single-owner actor holding all mutable daemon state
//! - [`Request`] / [`ServerMessage`]: the wire protocol's two directions
//! - [`AnimatorState`]: the `idle` / `asleep` / `playing` state machine
//! - [`DeviceDriver`]: capability boundary to the physical outputs
//! - [`HutchConfig`]: layered configuration (defaults, file, env, CLI)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! use hutch_core::{AnimatorConfig, Server, ServerConfig, SimDriver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let driver = Arc::new(SimDriver::default());
//!     let mut server =
//!         Server::bind(ServerConfig::default(), AnimatorConfig::default(), driver).await?;
//!
//!     let shutdown = Arc::new(AtomicBool::new(false));
//!     // Flip `shutdown` from a signal handler to stop gracefully.
//!     server.run(shutdown).await
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`protocol`]: line framing and the typed message shapes
//! - [`session`]: session identities and the outbound-channel registry
//! - [`scheduler`]: the FIFO command queue with lazy expiration
//! - [`infos`]: named ambient animations and their rotation
//! - [`device`]: the driver trait, the simulator, posture constants
//! - [`animator`]: the actor that owns state, queue, and rotation
//! - [`server`]: TCP accept loop and per-connection tasks
//! - [`config`]: TOML file loading with env and CLI layering
//!
//! # No Hardware Dependencies
//!
//! This crate never touches GPIO, PWM, or audio devices. Everything physical
//! sits behind [`DeviceDriver`], so the full daemon runs on a developer
//! machine with the bundled simulator.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod animator;
pub mod config;
pub mod device;
pub mod infos;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use animator::{Animator, AnimatorConfig, AnimatorEvent};
pub use device::{DeviceDriver, DeviceError, Led, LedEffect, Rgb, SimDriver};
pub use infos::InfoRegistry;
pub use protocol::{
    encode, parse_request, AnimatorState, ErrorClass, Expiration, LineDecoder, ProtocolViolation,
    Request, ResponseStatus, ServerMessage,
};
pub use scheduler::{CommandQueue, PendingCommand};
pub use server::{Server, ServerConfig, DEFAULT_PORT};
pub use session::{BroadcastOutcome, SendFailure, SessionHandle, SessionId, SessionRegistry};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, DeviceConfig, HutchConfig, HutchToml,
};
