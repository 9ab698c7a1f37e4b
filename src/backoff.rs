//! Fibonacci backoff with jitter for waiter polling.
//!
//! Nominal delays grow as a Fibonacci sequence from `initial_delay`, capped at
//! `max_delay`. Each emitted delay is perturbed by up to
//! `±randomisation_factor` of its nominal value so waiters on the same key
//! drift apart instead of hitting the store in lockstep.

use std::time::Duration;

use rand::Rng;

/// Parameters of the polling backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the nominal delay used as jitter range, clamped to `[0, 1]`.
    pub randomisation_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
            randomisation_factor: 0.5,
        }
    }
}

impl BackoffConfig {
    /// Begin a fresh delay sequence. Every waiter gets its own.
    pub fn start(&self) -> Backoff {
        Backoff {
            nominal: Fibonacci::new(self.initial_delay, self.max_delay),
            randomisation_factor: self.randomisation_factor.clamp(0.0, 1.0),
        }
    }
}

/// Unbounded sequence of capped Fibonacci delays: 1, 1, 2, 3, 5, ... units.
#[derive(Debug, Clone)]
pub struct Fibonacci {
    previous: Duration,
    next: Duration,
    max: Duration,
}

impl Fibonacci {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            previous: Duration::ZERO,
            next: initial,
            max,
        }
    }
}

impl Iterator for Fibonacci {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next.min(self.max);
        self.next = self.previous.saturating_add(delay);
        self.previous = delay;
        Some(delay)
    }
}

/// A single waiter's delay schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    nominal: Fibonacci,
    randomisation_factor: f64,
}

impl Backoff {
    /// Next jittered delay.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal.next().unwrap_or(self.nominal.max);
        jitter(&mut rand::thread_rng(), nominal, self.randomisation_factor)
    }
}

/// Perturb `nominal` by a uniform factor in `[-factor, +factor]`.
pub fn jitter<R: Rng + ?Sized>(rng: &mut R, nominal: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || nominal.is_zero() {
        return nominal;
    }
    let factor = factor.min(1.0);
    let offset = rng.gen_range(-factor..=factor);
    nominal.mul_f64(1.0 + offset)
}
