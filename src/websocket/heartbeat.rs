//! Heartbeat Monitor
//!
//! Two halves that never talk to each other directly:
//!
//! - [`Heartbeat`] ticks inside the outbound pump and produces Ping frames.
//! - [`ReadDeadline`] bounds every inbound read and is pushed forward
//!   whenever a Pong arrives.
//!
//! A peer that stops answering pings lets the read deadline lapse; the
//! inbound pump then fails like any other read error and the connection is
//! unregistered. The heartbeat itself never unregisters anything.

use axum::extract::ws::Message;
use std::future::Future;
use std::time::Duration;
use tokio::time::{error::Elapsed, interval_at, timeout_at, Instant, Interval, MissedTickBehavior};

/// Timing for pings, pongs and writes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatConfig {
    /// How long a read may wait before the peer is considered dead
    pub pong_wait: Duration,
    /// Interval between pings, shorter than `pong_wait`
    pub ping_period: Duration,
    /// Upper bound for a single frame write
    pub write_wait: Duration,
}

impl HeartbeatConfig {
    /// Build a config whose ping period is `ratio * pong_wait`
    ///
    /// `ratio` is clamped into `(0, 1)` so a ping always lands before the
    /// read deadline.
    pub fn new(pong_wait: Duration, write_wait: Duration, ratio: f64) -> Self {
        let ratio = if ratio.is_finite() { ratio.clamp(0.05, 0.95) } else { 0.9 };

        Self {
            pong_wait,
            ping_period: pong_wait.mul_f64(ratio),
            write_wait,
        }
    }

    /// Longest time a silent peer can stay registered
    pub fn reclaim_bound(&self) -> Duration {
        self.ping_period + self.pong_wait
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(10), 0.9)
    }
}

/// Inbound read deadline, re-armed by pongs
#[derive(Debug)]
pub struct ReadDeadline {
    window: Duration,
    deadline: Instant,
}

impl ReadDeadline {
    /// Arm a deadline `window` from now
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Instant::now() + window,
        }
    }

    /// Push the deadline to `window` from now
    pub fn extend(&mut self) {
        self.deadline = Instant::now() + self.window;
    }

    /// Run a read, failing if the deadline passes first
    pub async fn read<F: Future>(&self, read: F) -> Result<F::Output, Elapsed> {
        timeout_at(self.deadline, read).await
    }
}

/// Ping ticker driven by the outbound pump
#[derive(Debug)]
pub struct Heartbeat {
    interval: Interval,
}

impl Heartbeat {
    /// First tick fires one full `period` from now
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// The keepalive frame sent every ping period
    pub fn ping_frame() -> Message {
        Message::Ping(Vec::new())
    }
}
