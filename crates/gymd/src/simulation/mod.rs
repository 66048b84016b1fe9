//! Capability interface over the simulation engine.
//!
//! The daemon never talks to an engine directly: the registry owns boxed
//! [`Simulation`] handles created through a [`SimulationEngine`], and the
//! dispatcher drives them through registry-mediated calls. Tests substitute
//! their own engines at this seam.
//!
//! A [`RecordingSimulation`] decorates any handle, persisting trajectories
//! while delegating the simulation itself to the wrapped handle.

mod builtin;
mod errors;
mod recording;
mod space;
mod video;

use camino::Utf8Path;
use serde_json::{Map, Value};

pub use self::builtin::BuiltinEngine;
pub use self::errors::EngineError;
pub use self::recording::{
    EpisodeRecorder, RecordingOptions, RecordingSimulation, start_recording,
};
pub use self::space::{Space, SpaceDescription, WIRE_INFINITY, wire_float};
pub use self::video::VIDEO_EXTENSION;

/// Outcome of advancing a simulation by one action.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Observation after the action was applied.
    pub observation: Value,
    /// Reward earned by the action.
    pub reward: f64,
    /// Whether the episode has ended.
    pub done: bool,
    /// Auxiliary diagnostics reported by the engine.
    pub info: Map<String, Value>,
}

/// A live simulation instance.
pub trait Simulation: Send {
    /// Name the instance was created with.
    fn name(&self) -> &str;

    /// Starts a new episode and returns the initial observation.
    fn reset(&mut self) -> Result<Value, EngineError>;

    /// Applies an action. When `render` is set the engine renders the
    /// resulting state.
    fn step(&mut self, action: &Value, render: bool) -> Result<Transition, EngineError>;

    /// Reseeds the instance's random source.
    fn seed(&mut self, seed: u64) -> Result<(), EngineError>;

    /// Draws a random action from the action space.
    fn sample_action(&mut self) -> Value;

    /// The instance's action space.
    fn action_space(&self) -> Space;

    /// The instance's observation space.
    fn observation_space(&self) -> Space;

    /// Text rendering of the current state, when the engine supports it.
    fn render(&self) -> Option<String> {
        None
    }

    /// Stops an active recording.
    fn stop_recording(&mut self) -> Result<(), EngineError> {
        Err(EngineError::NotRecording)
    }

    /// Whether a recording is currently active.
    fn is_recording(&self) -> bool {
        false
    }

    /// Directory the instance records into, if it was ever recorded.
    fn recording_directory(&self) -> Option<&Utf8Path> {
        None
    }

    /// Hands a recorder to an instance that is already wrapped for
    /// recording. Instances that cannot adopt it hand it back.
    fn adopt_recorder(&mut self, recorder: EpisodeRecorder) -> Option<EpisodeRecorder> {
        Some(recorder)
    }

    /// Releases engine resources. Called exactly once, on removal.
    fn close(&mut self) {}
}

/// Factory for simulation instances.
#[cfg_attr(test, mockall::automock)]
pub trait SimulationEngine: Send + Sync {
    /// Creates a fresh instance of the named simulation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSimulation`] when the engine does not
    /// recognise `name`.
    fn make(&self, name: &str) -> Result<Box<dyn Simulation>, EngineError>;
}
