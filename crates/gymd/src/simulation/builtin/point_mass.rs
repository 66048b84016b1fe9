//! One-dimensional point mass steered towards the origin.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};

use super::{EpisodeClock, fresh_rng};
use crate::simulation::{EngineError, Simulation, Space, Transition};

const DT: f64 = 0.1;
const ESCAPE_RADIUS: f64 = 10.0;
const MAX_THRUST: f64 = 1.0;

pub(super) struct PointMass {
    name: String,
    rng: ChaCha8Rng,
    clock: EpisodeClock,
    position: f64,
    velocity: f64,
}

impl PointMass {
    pub(super) fn new(name: &str, limit: u32) -> Self {
        Self {
            name: name.to_owned(),
            rng: fresh_rng(),
            clock: EpisodeClock::new(limit),
            position: 0.0,
            velocity: 0.0,
        }
    }

    fn observation(&self) -> Value {
        json!([self.position, self.velocity])
    }
}

impl Simulation for PointMass {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) -> Result<Value, EngineError> {
        self.position = self.rng.gen_range(-1.0..1.0);
        self.velocity = 0.0;
        self.clock.restart();
        Ok(self.observation())
    }

    fn step(&mut self, action: &Value, _render: bool) -> Result<Transition, EngineError> {
        let thrust = self
            .action_space()
            .box_action(action)?
            .first()
            .copied()
            .unwrap_or_default();
        self.clock.tick()?;
        self.velocity += DT * thrust;
        self.position += DT * self.velocity;
        let (done, info) = self.clock.finish(self.position.abs() > ESCAPE_RADIUS);
        Ok(Transition {
            observation: self.observation(),
            reward: -(self.position * self.position),
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
        Space::uniform_box(vec![1], -MAX_THRUST, MAX_THRUST)
    }

    fn observation_space(&self) -> Space {
        Space::uniform_box(vec![2], f64::NEG_INFINITY, f64::INFINITY)
    }

    fn render(&self) -> Option<String> {
        Some(format!(
            "position {:+.3} velocity {:+.3}",
            self.position, self.velocity
        ))
    }
}
