//! Remote simulation-environment daemon.
//!
//! `gymd` hosts reinforcement-learning style simulations and exposes them to
//! clients over a TCP or Unix socket. A client selects a simulation by name,
//! receives an opaque instance identifier, and then resets, steps, seeds,
//! samples, records, and finally closes that instance by sending JSON request
//! records on the same connection.
//!
//! The crate is layered leaf-first:
//!
//! - [`simulation`] is the capability interface over the engine, with a
//!   built-in engine and a recording decorator.
//! - [`registry`] maps instance identifiers to live simulations and is the
//!   single source of truth for which instances exist.
//! - [`framing`] splits the inbound byte stream into request records and
//!   frames (optionally compressed) replies.
//! - [`dispatch`] evaluates each record against an ordered probe table and
//!   drives one session per connection.
//!
//! The bootstrap sequence loads configuration through [`gym_config`],
//! initialises structured telemetry, prepares the socket, and starts the
//! listener. Health reporting hooks emit structured events at each stage.
//! On shutdown every instance still registered is closed.

mod bootstrap;
pub mod dispatch;
pub mod framing;
mod health;
mod process;
pub mod registry;
pub mod simulation;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
