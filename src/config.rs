//! Runtime-tunable knobs for the engine, gathered into one options struct.
//!
//! Unlike the teacher's protocol builders, which construct individual wire
//! headers field by field, these are whole-engine resource limits: they are
//! read once at [`crate::engine::Engine::new`] and never mutated afterward, so
//! a flat struct validated up front is a better fit than a fluent builder.

/// Options controlling hash table sizing, expiry timers, and pool ceilings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of buckets in the connection hash table. Must be a power of two.
    pub hash_table_size: usize,
    /// Maximum number of live TCP connections.
    pub max_connections: usize,
    /// Seconds of inactivity after which a connection is purged.
    pub idle_timeout_s: u64,
    /// Seconds a closed connection is retained to absorb straggling packets.
    pub time_wait_s: u64,
    /// Maximum out-of-order segments queued per stream before a gap is forced.
    pub max_queued_segments_per_stream: usize,
    /// Maximum fragments tracked within a single fragmented packet.
    pub max_fragments_per_packet: usize,
    /// Maximum number of fragmented packets tracked concurrently.
    pub max_fragmented_packets: usize,
    /// Seconds since the first fragment after which a fragmented packet ages out.
    pub fragment_max_age_s: u64,
}

/// Reasons an [`EngineConfig`] fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("hash_table_size must be a power of two, got {0}")]
    HashTableSizeNotPowerOfTwo(usize),
    #[error("idle_timeout_s must be at least 5, got {0}")]
    IdleTimeoutTooLow(u64),
    #[error("time_wait_s must be at least 1, got {0}")]
    TimeWaitTooLow(u64),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_table_size: 4096,
            max_connections: 1 << 20,
            idle_timeout_s: 7200,
            time_wait_s: 120,
            max_queued_segments_per_stream: 4096,
            max_fragments_per_packet: 8192,
            max_fragmented_packets: 1024,
            fragment_max_age_s: 30,
        }
    }
}

impl EngineConfig {
    /// Checks the invariants described in §6: power-of-two hash table size,
    /// and minimum timer values below which expiry would thrash.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.hash_table_size.is_power_of_two() || self.hash_table_size < 256 {
            return Err(ConfigError::HashTableSizeNotPowerOfTwo(self.hash_table_size));
        }
        if self.idle_timeout_s < 5 {
            return Err(ConfigError::IdleTimeoutTooLow(self.idle_timeout_s));
        }
        if self.time_wait_s < 1 {
            return Err(ConfigError::TimeWaitTooLow(self.time_wait_s));
        }
        Ok(())
    }
}
