//! Slippery chain exploration task.
//!
//! The agent walks a chain of states. Moving forward from the last state pays
//! a large reward; moving backward returns to the start for a small one. With
//! probability [`SLIP`] the chosen action is swapped.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};

use super::{EpisodeClock, fresh_rng};
use crate::simulation::{EngineError, Simulation, Space, Transition};

const CHAIN_LENGTH: u64 = 5;
const SLIP: f64 = 0.2;
const SMALL_REWARD: f64 = 2.0;
const LARGE_REWARD: f64 = 10.0;

const FORWARD: u64 = 0;

pub(super) struct NChain {
    name: String,
    rng: ChaCha8Rng,
    clock: EpisodeClock,
    state: u64,
}

impl NChain {
    pub(super) fn new(name: &str, limit: u32) -> Self {
        Self {
            name: name.to_owned(),
            rng: fresh_rng(),
            clock: EpisodeClock::new(limit),
            state: 0,
        }
    }

    fn transition(&mut self, forward: bool) -> f64 {
        if !forward {
            self.state = 0;
            return SMALL_REWARD;
        }
        if self.state + 1 < CHAIN_LENGTH {
            self.state += 1;
            0.0
        } else {
            LARGE_REWARD
        }
    }
}

impl Simulation for NChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) -> Result<Value, EngineError> {
        self.state = 0;
        self.clock.restart();
        Ok(json!(self.state))
    }

    fn step(&mut self, action: &Value, _render: bool) -> Result<Transition, EngineError> {
        let choice = self.action_space().discrete_action(action)?;
        self.clock.tick()?;
        let slipped = self.rng.gen_bool(SLIP);
        let forward = (choice == FORWARD) != slipped;
        let reward = self.transition(forward);
        let (done, info) = self.clock.finish(false);
        Ok(Transition {
            observation: json!(self.state),
            reward,
            done,
            info,
        })
    }

    fn seed(&mut self, seed: u64) -> Result<(), EngineError> {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        Ok(())
    }

    fn sample_action(&mut self) -> Value {
        self.action_space().sample(&mut self.rng)
    }

    fn action_space(&self) -> Space {
        Space::Discrete { n: 2 }
    }

    fn observation_space(&self) -> Space {
        Space::Discrete { n: CHAIN_LENGTH }
    }

    fn render(&self) -> Option<String> {
        let cells: String = (0..CHAIN_LENGTH)
            .map(|cell| if cell == self.state { "[x]" } else { "[ ]" })
            .collect();
        Some(cells)
    }
}
