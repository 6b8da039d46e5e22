//! Counters the core accumulates as a side effect of normal operation.
//!
//! This is not the statistics aggregator (out of scope); it is the raw set
//! of counts §7 says the core itself must keep so a collaborator can sample
//! them.

/// Running totals updated by the decoder, reassembler, and connection tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub fragments_completed: u64,
    pub fragments_invalid: u64,
    pub fragments_expired: u64,
    pub connections_created: u64,
    pub connections_expired: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }
}
