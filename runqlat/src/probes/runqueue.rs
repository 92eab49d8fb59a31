//! Run queue latency probe.
//!
//! The object records a wakeup timestamp per thread on `sched_wakeup`/`sched_wakeup_new`
//! and, on `sched_switch`, adds the time the incoming thread spent runnable to the
//! `(tgid, slot)` counter of the histogram map. Userspace only attaches the programs and
//! reads the map.

use anyhow::{Result, bail};
use aya::Ebpf;
use log::info;
use runqlat_common::SCHED_TRACEPOINTS;

use crate::probes::{Probe, RawTracepointConfig, attach_raw_tracepoint};

/// Without `sched_switch` nothing is ever recorded.
const REQUIRED_TRACEPOINT: &str = "sched_switch";

pub struct RunqueueLatencyProbe {
    pub tracepoints: Vec<&'static str>,
}

impl Default for RunqueueLatencyProbe {
    fn default() -> Self {
        Self {
            tracepoints: SCHED_TRACEPOINTS.to_vec(),
        }
    }
}

impl Probe for RunqueueLatencyProbe {
    fn attach(&self, bpf: &mut Ebpf) -> Result<()> {
        let mut attached = Vec::new();
        for &name in &self.tracepoints {
            let ok = attach_raw_tracepoint(
                bpf,
                RawTracepointConfig {
                    program_name: name,
                    category: "sched",
                    name,
                },
            )?;
            if ok {
                info!("Attached raw tracepoint: sched/{}", name);
                attached.push(name);
            }
        }

        if !attached.contains(&REQUIRED_TRACEPOINT) {
            bail!("{} could not be attached", REQUIRED_TRACEPOINT);
        }
        info!("RunqueueLatencyProbe attached ({})", attached.join(", "));
        Ok(())
    }
}
