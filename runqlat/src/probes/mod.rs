use std::path::Path;

use anyhow::{Context, Result};
use aya::{Ebpf, programs::RawTracePoint};
use log::{info, warn};

pub mod runqueue;

pub use runqueue::RunqueueLatencyProbe;

pub trait Probe {
    fn attach(&self, bpf: &mut Ebpf) -> Result<()>;
}

pub struct RawTracepointConfig<'a> {
    pub program_name: &'a str,
    pub category: &'a str,
    pub name: &'a str,
}

const TRACEFS_MOUNT_POINTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// `None` when no tracefs is mounted and the question cannot be answered.
fn tracepoint_exists(bases: &[&str], category: &str, name: &str) -> Option<bool> {
    let mounted: Vec<&Path> = bases
        .iter()
        .map(Path::new)
        .filter(|base| base.join("events").is_dir())
        .collect();
    if mounted.is_empty() {
        return None;
    }
    Some(
        mounted
            .iter()
            .any(|base| base.join("events").join(category).join(name).exists()),
    )
}

/// Loads and attaches a raw tracepoint program.
///
/// Returns `Ok(false)` when tracefs shows the tracepoint does not exist on this kernel.
pub fn attach_raw_tracepoint(bpf: &mut Ebpf, config: RawTracepointConfig) -> Result<bool> {
    if tracepoint_exists(&TRACEFS_MOUNT_POINTS, config.category, config.name) == Some(false) {
        warn!(
            "Tracepoint {}:{} not available; skipping {}",
            config.category, config.name, config.program_name
        );
        return Ok(false);
    }

    info!("Loading program {}", config.program_name);
    let program: &mut RawTracePoint = bpf
        .program_mut(config.program_name)
        .with_context(|| format!("Failed to find {} program", config.program_name))?
        .try_into()?;
    program.load()?;
    program
        .attach(config.name)
        .with_context(|| format!("Failed to attach {}", config.name))?;
    Ok(true)
}
