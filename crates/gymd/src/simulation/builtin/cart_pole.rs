//! Classic cart-pole balancing task.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Value, json};

use super::{EpisodeClock, fresh_rng};
use crate::simulation::{EngineError, Simulation, Space, Transition};

const GRAVITY: f64 = 9.8;
const MASS_CART: f64 = 1.0;
const MASS_POLE: f64 = 0.1;
const TOTAL_MASS: f64 = MASS_CART + MASS_POLE;
const HALF_POLE_LENGTH: f64 = 0.5;
const POLE_MASS_LENGTH: f64 = MASS_POLE * HALF_POLE_LENGTH;
const FORCE_MAG: f64 = 10.0;
const TAU: f64 = 0.02;
const THETA_THRESHOLD: f64 = 12.0 * 2.0 * std::f64::consts::PI / 360.0;
const X_THRESHOLD: f64 = 2.4;
const RENDER_WIDTH: usize = 41;

pub(super) struct CartPole {
    name: String,
    rng: ChaCha8Rng,
    clock: EpisodeClock,
    // x, x_dot, theta, theta_dot
    state: [f64; 4],
}

impl CartPole {
    pub(super) fn new(name: &str, limit: u32) -> Self {
        Self {
            name: name.to_owned(),
            rng: fresh_rng(),
            clock: EpisodeClock::new(limit),
            state: [0.0; 4],
        }
    }

    fn observation(&self) -> Value {
        json!(self.state)
    }

    fn out_of_bounds(&self) -> bool {
        let [x, _, theta, _] = self.state;
        !(-X_THRESHOLD..=X_THRESHOLD).contains(&x)
            || !(-THETA_THRESHOLD..=THETA_THRESHOLD).contains(&theta)
    }

    fn integrate(&mut self, push_right: bool) {
        let [x, x_dot, theta, theta_dot] = self.state;
        let force = if push_right { FORCE_MAG } else { -FORCE_MAG };
        let (sin_theta, cos_theta) = theta.sin_cos();
        let temp = (force + POLE_MASS_LENGTH * theta_dot * theta_dot * sin_theta) / TOTAL_MASS;
        let theta_acc = (GRAVITY * sin_theta - cos_theta * temp)
            / (HALF_POLE_LENGTH * (4.0 / 3.0 - MASS_POLE * cos_theta * cos_theta / TOTAL_MASS));
        let x_acc = temp - POLE_MASS_LENGTH * theta_acc * cos_theta / TOTAL_MASS;
        self.state = [
            x + TAU * x_dot,
            x_dot + TAU * x_acc,
            theta + TAU * theta_dot,
            theta_dot + TAU * theta_acc,
        ];
    }
}

impl Simulation for CartPole {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) -> Result<Value, EngineError> {
        for value in &mut self.state {
            *value = self.rng.gen_range(-0.05..0.05);
        }
        self.clock.restart();
        Ok(self.observation())
    }

    fn step(&mut self, action: &Value, render: bool) -> Result<Transition, EngineError> {
        let choice = self.action_space().discrete_action(action)?;
        let already_finished = self.clock.finished;
        self.clock.tick()?;
        self.integrate(choice == 1);
        let (done, info) = self.clock.finish(self.out_of_bounds());
        if render {
            tracing::trace!(frame = ?self.render(), "cart-pole frame");
        }
        Ok(Transition {
            observation: self.observation(),
            reward: if already_finished { 0.0 } else { 1.0 },
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
        let high = vec![
            X_THRESHOLD * 2.0,
            f64::from(f32::MAX),
            THETA_THRESHOLD * 2.0,
            f64::from(f32::MAX),
        ];
        Space::Box {
            shape: vec![4],
            low: high.iter().map(|bound| -bound).collect(),
            high,
        }
    }

    fn render(&self) -> Option<String> {
        let [x, _, theta, _] = self.state;
        let span = (RENDER_WIDTH - 1) as f64;
        let column = (((x + X_THRESHOLD) / (2.0 * X_THRESHOLD)) * span)
            .clamp(0.0, span)
            .round() as usize;
        let mut track: Vec<char> = vec!['-'; RENDER_WIDTH];
        if let Some(cell) = track.get_mut(column) {
            *cell = '#';
        }
        let track: String = track.into_iter().collect();
        Some(format!("{track} pole {:+.1}deg", theta.to_degrees()))
    }
}
