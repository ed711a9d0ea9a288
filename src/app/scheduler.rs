//! Periodic ticking of a session's state machine.
//!
//! Gate status callbacks already tick the session, but time-based guards
//! (the handshake timeout) only fire when something evaluates them. A
//! [`TickScheduler`] decides when that happens; [`spawn_ticker`] runs the
//! loop until its token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::session::Session;

/// Default interval between ticks (500 ms).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

pub struct TickSchedulerConfig {
    pub tick_interval: Duration,
}

impl Default for TickSchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Trait for controlling when the session is ticked.
#[async_trait]
pub trait TickScheduler: Send + Sync {
    /// Wait until the next tick should happen.
    async fn next_tick(&mut self);
}

/// A simple interval-based scheduler.
pub struct IntervalScheduler {
    interval: tokio::time::Interval,
}

impl IntervalScheduler {
    pub fn new(config: TickSchedulerConfig) -> Self {
        let mut interval = tokio::time::interval(config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl TickScheduler for IntervalScheduler {
    async fn next_tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Tick `session` on every scheduler beat until `cancel` fires.
pub fn spawn_ticker<S>(
    session: Arc<Session>,
    mut scheduler: S,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: TickScheduler + 'static,
{
    tokio::spawn(async move {
        info!("[spawn_ticker] Ticking session with {}", session.station());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = scheduler.next_tick() => session.tick(),
            }
        }
        info!("[spawn_ticker] Ticker stopped");
    })
}
