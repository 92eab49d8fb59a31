//! Periodic collect-and-report loop.
//!
//! ```text
//! Idle --tick--> Collecting --> Rendering --> Idle
//!   \__ cancelled (between cycles) --> stopped
//! ```
//!
//! Cancellation is only observed while idle: a cycle that has started always finishes and
//! flushes its report.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::histogram::{self, DuplicatePolicy};
use crate::render::{self, ReportOptions};
use crate::source::SampleSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Collecting,
    Rendering,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Stop after this many completed cycles.
    pub iterations: Option<u64>,
    pub duplicate_policy: DuplicatePolicy,
    pub report: ReportOptions,
    pub timestamp: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            iterations: None,
            duplicate_policy: DuplicatePolicy::default(),
            report: ReportOptions::default(),
            timestamp: false,
        }
    }
}

/// Why [`Poller::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    Cancelled { cycles: u64 },
    Completed { cycles: u64 },
}

pub struct Poller<S, W> {
    source: S,
    out: W,
    config: PollerConfig,
    state: PollerState,
}

impl<S, W> Poller<S, W>
where
    S: SampleSource,
    W: Write,
{
    pub fn new(source: S, out: W, config: PollerConfig) -> Self {
        Self {
            source,
            out,
            config,
            state: PollerState::Idle,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Runs cycles on a fixed interval until `cancel` fires or the iteration limit is hit.
    ///
    /// The first cycle runs one interval after start. An unavailable source ends the loop
    /// with an error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PollerExit> {
        let period = self.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        info!("Polling every {:?}", period);
        loop {
            if self.config.iterations.is_some_and(|limit| cycles >= limit) {
                return Ok(PollerExit::Completed { cycles });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Poller cancelled after {} cycles", cycles);
                    return Ok(PollerExit::Cancelled { cycles });
                }
                _ = ticker.tick() => {
                    self.cycle()?;
                    cycles += 1;
                }
            }
        }
    }

    /// One collect-sort-render pass.
    pub fn cycle(&mut self) -> Result<()> {
        self.state = PollerState::Collecting;
        let snapshot = histogram::build(&mut self.source, self.config.duplicate_policy);
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.state = PollerState::Idle;
                return Err(e).context("Failed to collect histogram snapshot");
            }
        };
        if snapshot.skipped() > 0 {
            warn!("Skipped {} malformed records", snapshot.skipped());
        }
        debug!("Collected histograms for {} entities", snapshot.len());

        self.state = PollerState::Rendering;
        let mut report = String::new();
        if self.config.timestamp {
            report.push_str(&format!("{}\n", chrono::Local::now().format("%H:%M:%S")));
        }
        report.push_str(&render::render_report(&snapshot, &self.config.report));
        let written = self
            .out
            .write_all(report.as_bytes())
            .and_then(|_| self.out.flush());
        self.state = PollerState::Idle;
        written.context("Failed to write report")
    }
}
