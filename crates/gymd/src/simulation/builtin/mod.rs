//! Built-in simulations served when no external engine is wired in.
//!
//! The catalog mirrors a handful of classic control tasks. Each instance owns
//! a `ChaCha8Rng` so `env.seed` makes episodes reproducible.

mod cart_pole;
mod n_chain;
mod point_mass;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::{Map, Value};

use super::{EngineError, Simulation, SimulationEngine};

use self::cart_pole::CartPole;
use self::n_chain::NChain;
use self::point_mass::PointMass;

/// Simulation names understood by [`BuiltinEngine`].
pub const BUILTIN_SIMULATIONS: &[&str] = &["CartPole-v0", "CartPole-v1", "NChain-v0", "PointMass-v0"];

/// Engine exposing the built-in catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinEngine;

impl BuiltinEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Names this engine can instantiate.
    #[must_use]
    pub fn catalog(&self) -> &'static [&'static str] {
        BUILTIN_SIMULATIONS
    }
}

impl SimulationEngine for BuiltinEngine {
    fn make(&self, name: &str) -> Result<Box<dyn Simulation>, EngineError> {
        match name {
            "CartPole-v0" => Ok(Box::new(CartPole::new(name, 200))),
            "CartPole-v1" => Ok(Box::new(CartPole::new(name, 500))),
            "NChain-v0" => Ok(Box::new(NChain::new(name, 1000))),
            "PointMass-v0" => Ok(Box::new(PointMass::new(name, 200))),
            other => Err(EngineError::unknown_simulation(other)),
        }
    }
}

/// Step bookkeeping shared by the built-in simulations.
#[derive(Debug, Clone)]
struct EpisodeClock {
    limit: u32,
    steps: u32,
    started: bool,
    finished: bool,
}

impl EpisodeClock {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            steps: 0,
            started: false,
            finished: false,
        }
    }

    fn restart(&mut self) {
        self.steps = 0;
        self.started = true;
        self.finished = false;
    }

    /// Records one step. Fails when the episode was never reset.
    fn tick(&mut self) -> Result<(), EngineError> {
        if !self.started {
            return Err(EngineError::NeedsReset);
        }
        self.steps = self.steps.saturating_add(1);
        Ok(())
    }

    fn truncated(&self) -> bool {
        self.steps >= self.limit
    }

    /// Closes the episode, building the info map. `terminal` marks a natural
    /// end; hitting the step limit is reported as truncation.
    fn finish(&mut self, terminal: bool) -> (bool, Map<String, Value>) {
        let mut info = Map::new();
        let truncated = !terminal && self.truncated();
        if truncated {
            info.insert("TimeLimit.truncated".to_owned(), Value::Bool(true));
        }
        let done = terminal || truncated;
        self.finished = self.finished || done;
        (done, info)
    }
}

fn fresh_rng() -> ChaCha8Rng {
    ChaCha8Rng::from_entropy()
}
