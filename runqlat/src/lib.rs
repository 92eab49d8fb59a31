pub mod histogram;
pub mod poller;
pub mod probes;
pub mod render;
pub mod settings;
pub mod source;

use anyhow::{Context, Result};
use aya::Ebpf;
use aya_log::EbpfLogger;
use log::{debug, info, warn};
use tokio::signal;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio_util::sync::CancellationToken;

use crate::poller::{Poller, PollerConfig, PollerExit};
use crate::probes::{Probe, RunqueueLatencyProbe};
use crate::settings::Settings;
use crate::source::BpfMapSource;

pub struct RunqlatEngine {
    pub settings: Settings,
    bpf: Ebpf,
}

impl RunqlatEngine {
    pub fn new(settings: Settings) -> Result<Self> {
        bump_memlock_rlimit()?;
        let path = settings.object_path();
        let mut bpf = Ebpf::load_file(&path)
            .with_context(|| format!("Failed to load BPF object {}", path.display()))?;
        if let Err(e) = EbpfLogger::init(&mut bpf) {
            debug!("eBPF logger not initialized: {}", e);
        }
        Ok(Self { settings, bpf })
    }

    /// Attaches the probes and reports until a signal arrives or the iteration limit is
    /// reached.
    pub async fn run(mut self) -> Result<()> {
        RunqueueLatencyProbe::default().attach(&mut self.bpf)?;

        let config = poller_config(&self.settings);
        let source = BpfMapSource::new(
            self.bpf,
            self.settings.map_name(),
            self.settings.key_layout,
        );
        let poller = Poller::new(source, std::io::stdout(), config);

        let cancel = CancellationToken::new();
        let run = poller.run(cancel.child_token());
        tokio::pin!(run);

        println!("Tracking process run queue latency... Hit Ctrl-C to end.");
        let exit = tokio::select! {
            exit = &mut run => exit?,
            res = shutdown_signal() => {
                res?;
                info!("Exiting...");
                cancel.cancel();
                // Lets a report that is being written finish before the process exits.
                run.await?
            }
        };

        match exit {
            PollerExit::Completed { cycles } => info!("Done after {} reports", cycles),
            PollerExit::Cancelled { cycles } => debug!("Stopped after {} reports", cycles),
        }
        Ok(())
    }
}

pub fn poller_config(settings: &Settings) -> PollerConfig {
    PollerConfig {
        interval: settings.interval(),
        iterations: settings.iterations,
        duplicate_policy: settings.duplicate_policy,
        report: settings.report_options(),
        timestamp: settings.timestamp(),
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut terminate =
        unix_signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

fn bump_memlock_rlimit() -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to increase rlimit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::DuplicatePolicy;
    use crate::settings::OutputSettings;
    use std::time::Duration;

    #[test]
    fn test_poller_config_from_settings() {
        let settings = Settings {
            interval_secs: Some(2),
            iterations: Some(1),
            duplicate_policy: DuplicatePolicy::Keep,
            output: OutputSettings {
                p99: Some(true),
                timestamp: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        let config = poller_config(&settings);

        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.iterations, Some(1));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Keep);
        assert!(config.report.p99);
        assert!(config.timestamp);
    }
}
