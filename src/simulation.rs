//! Simulated detector.
//!
//! Provides a [`Node`] that produces noisy samples into a channel while a step is
//! running, for demonstrations and tests without physical hardware.
//!
//! The sampling task is spawned with [`tokio::task::spawn_local`] because channels
//! live on the orchestrator thread, so the measurement must be driven inside a
//! [`tokio::task::LocalSet`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::channel::ChannelRef;
use crate::config::SimulationConfig;
use crate::gate::Gates;
use crate::measure::{Node, NodeEvents};

/// Simulated detector feeding a direct channel.
///
/// While a step runs, one sample is added every `sample_interval`. After every step
/// the detector can hold the step gate for `step_hold`, like a device that needs time
/// to read out.
///
/// # Example
///
/// ```rust,ignore
/// let detector = SimulatedDetector::new(channel, gates.clone())
///     .with_sample_interval(Duration::from_millis(10));
/// builder.node(Rc::new(detector));
/// ```
#[derive(Debug)]
pub struct SimulatedDetector {
    channel: ChannelRef,
    gates: Gates,
    sample_interval: Duration,
    step_hold: Duration,
    baseline: f64,
    noise: f64,
    seed: Option<u64>,
    sampler: Rc<RefCell<Option<JoinHandle<()>>>>,
    steps: Rc<Cell<usize>>,
}

impl SimulatedDetector {
    /// Detector writing into `channel`, holding gates from `gates`.
    pub fn new(channel: ChannelRef, gates: Gates) -> Self {
        Self {
            channel,
            gates,
            sample_interval: Duration::from_millis(100),
            step_hold: Duration::ZERO,
            baseline: 100.0,
            noise: 5.0,
            seed: None,
            sampler: Rc::new(RefCell::new(None)),
            steps: Rc::new(Cell::new(0)),
        }
    }

    /// Detector configured from the simulation section.
    pub fn from_config(channel: ChannelRef, gates: Gates, config: &SimulationConfig) -> Self {
        Self::new(channel, gates)
            .with_sample_interval(config.sample_interval)
            .with_step_hold(config.step_hold)
    }

    /// Time between two samples.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Hold the step gate this long after every step.
    pub fn with_step_hold(mut self, hold: Duration) -> Self {
        self.step_hold = hold;
        self
    }

    /// Mean and maximum deviation of the samples.
    pub fn with_signal(mut self, baseline: f64, noise: f64) -> Self {
        self.baseline = baseline;
        self.noise = noise.abs();
        self
    }

    /// Seed the noise generator for reproducible samples.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of steps acquired so far.
    pub fn steps_acquired(&self) -> usize {
        self.steps.get()
    }

    fn stop_sampling(sampler: &RefCell<Option<JoinHandle<()>>>) {
        if let Some(task) = sampler.borrow_mut().take() {
            task.abort();
        }
    }
}

impl Node for SimulatedDetector {
    fn connect_to_measurement(&self, events: &NodeEvents) {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let rng_seed: u64 = rng.gen();

        let channel = self.channel.clone();
        let sampler = self.sampler.clone();
        let steps = self.steps.clone();
        let period = self.sample_interval;
        let (baseline, noise) = (self.baseline, self.noise);
        events.started.connect(move |()| {
            let step = steps.get();
            steps.set(step + 1);

            let channel = channel.clone();
            let mut rng = StdRng::seed_from_u64(rng_seed.wrapping_add(step as u64));
            let task = tokio::task::spawn_local(async move {
                let mut ticks = interval(period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticks.tick().await;
                loop {
                    ticks.tick().await;
                    let sample = baseline + noise * rng.gen_range(-1.0..=1.0);
                    match channel.try_borrow_mut() {
                        Ok(mut channel) => channel.add_data(sample),
                        Err(_) => warn!("detector channel busy, sample dropped"),
                    }
                }
            });
            debug!(step, "detector sampling");
            if let Some(previous) = sampler.borrow_mut().replace(task) {
                previous.abort();
            }
        });

        let sampler = self.sampler.clone();
        let gates = self.gates.clone();
        let hold = self.step_hold;
        events.stopped.connect(move |()| {
            SimulatedDetector::stop_sampling(&sampler);
            if hold.is_zero() {
                return;
            }

            let guard = gates.step.hold();
            tokio::task::spawn_local(async move {
                tokio::time::sleep(hold).await;
                debug!(hold_ms = hold.as_millis() as u64, "detector readout done");
                drop(guard);
            });
        });

        let sampler = self.sampler.clone();
        events.finalized.connect(move |()| SimulatedDetector::stop_sampling(&sampler));
    }
}
