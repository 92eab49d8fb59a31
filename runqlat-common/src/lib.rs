#![no_std]

/// Name of the histogram map exported by the run queue latency object.
pub const DIST_MAP: &str = "dist";

/// Raw tracepoints the object exposes programs for. Program name equals tracepoint name.
pub const SCHED_TRACEPOINTS: [&str; 3] = ["sched_wakeup", "sched_wakeup_new", "sched_switch"];

/// Histogram key with a 64-bit slot. The kernel struct is `{ u32 id; u64 slot; }`, so the
/// compiler inserts four bytes of padding after `id`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PidKey {
    pub id: u32,
    pub _pad: u32,
    pub slot: u64,
}

/// Histogram key with a 32-bit slot, paired with `u32` counters.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactPidKey {
    pub id: u32,
    pub slot: u32,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for PidKey {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for CompactPidKey {}
