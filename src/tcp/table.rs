//! The TCP connection hash table, grounded in
//! `examples/original_source/net/ip/tcp/{hash.h,connections.{h,cpp}}`: a
//! commutative hash over the unordered endpoint pair buckets connections
//! into stacks of handles, backed by a [`Slab`] free pool capped at
//! `max_connections`.

use crate::address::Endpoint;
use crate::slab::{Key, PoolExhausted, Slab};
use thiserror::Error;

use super::connection::{Direction, Flags, State, TcpConnection};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error("connection pool is exhausted")]
    Full(#[from] PoolExhausted),
}

/// One-at-a-time hash (Jenkins), folded over a byte buffer.
fn jenkins_one_at_a_time(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &b in bytes {
        hash = hash.wrapping_add(b as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}

/// Hashes the unordered pair `(a, b)` so that `bucket_hash(a, b) ==
/// bucket_hash(b, a)`: both endpoints of a flow land in the same bucket
/// regardless of which side sent the packet being looked up.
fn bucket_hash(a: &Endpoint, b: &Endpoint) -> u32 {
    let (lo, hi) = if a.address.order_bytes() <= b.address.order_bytes() {
        (a, b)
    } else {
        (b, a)
    };
    let (p_lo, p_hi) = (lo.port.min(hi.port), lo.port.max(hi.port));

    let mut buf = Vec::with_capacity(17 * 2 + 4);
    buf.extend_from_slice(&lo.address.order_bytes());
    buf.extend_from_slice(&hi.address.order_bytes());
    buf.extend_from_slice(&((p_lo as u32) << 16 | p_hi as u32).to_be_bytes());
    jenkins_one_at_a_time(&buf)
}

fn endpoints_match(conn: &TcpConnection, a: &Endpoint, b: &Endpoint) -> bool {
    (conn.client == *a && conn.server == *b) || (conn.client == *b && conn.server == *a)
}

/// A bucketed hash table of tracked TCP connections.
pub struct ConnectionTable {
    buckets: Vec<Vec<Key>>,
    mask: u32,
    slots: Slab<TcpConnection>,
    idle_timeout_s: u64,
    time_wait_s: u64,
    next_id: u64,
}

impl ConnectionTable {
    /// `hash_table_size` must be a power of two; `max_connections` bounds the
    /// backing slab.
    pub fn new(hash_table_size: usize, max_connections: usize, idle_timeout_s: u64, time_wait_s: u64) -> Self {
        assert!(hash_table_size.is_power_of_two(), "hash_table_size must be a power of two");
        Self {
            buckets: vec![Vec::new(); hash_table_size],
            mask: (hash_table_size - 1) as u32,
            slots: Slab::with_capacity(max_connections),
            idle_timeout_s,
            time_wait_s,
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, key: Key) -> Option<&TcpConnection> {
        self.slots.get(key)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut TcpConnection> {
        self.slots.get_mut(key)
    }

    fn is_reclaimable(&self, conn: &TcpConnection, now_us: u64) -> bool {
        let idle_us = self.idle_timeout_s.saturating_mul(1_000_000);
        let time_wait_us = self.time_wait_s.saturating_mul(1_000_000);
        let elapsed = now_us.saturating_sub(conn.last_packet_ts_us);
        match conn.state {
            State::Closed | State::Failure => elapsed > time_wait_us,
            _ => elapsed > idle_us,
        }
    }

    /// Looks up the connection for packet `(src, dst)`, evicting any
    /// time-waited or idle-expired entries encountered in the same bucket
    /// along the way. Allocates a new connection (inferring its client/server
    /// roles and initial state from `flags`) if none matches.
    ///
    /// Returns the connection's slab key and the direction `src -> dst`
    /// represents relative to that connection.
    ///
    /// `on_evict` is invoked with the key and value of every connection
    /// reclaimed along the way, before it is dropped from the slab, so a
    /// caller tracking per-connection state keyed on the slab key (e.g. the
    /// stream reassemblers in [`super::engine`]) can tear it down first.
    pub fn process(
        &mut self,
        src: Endpoint,
        dst: Endpoint,
        flags: Flags,
        now_us: u64,
        on_evict: &mut dyn FnMut(Key, &TcpConnection),
    ) -> Result<(Key, Direction), TableError> {
        let bucket_idx = (bucket_hash(&src, &dst) & self.mask) as usize;
        let bucket = &mut self.buckets[bucket_idx];

        let mut i = 0;
        while i < bucket.len() {
            let key = bucket[i];
            let Some(conn) = self.slots.get(key) else {
                bucket.swap_remove(i);
                continue;
            };
            if self.is_reclaimable(conn, now_us) {
                on_evict(key, conn);
                self.slots.remove(key);
                bucket.swap_remove(i);
                continue;
            }
            if endpoints_match(conn, &src, &dst) {
                let dir = if conn.client == src { Direction::FromClient } else { Direction::FromServer };
                return Ok((key, dir));
            }
            i += 1;
        }

        let (client, server, dir, state) = if flags.syn && flags.ack {
            (dst, src, Direction::FromServer, State::ConnEstablished)
        } else if flags.syn {
            (src, dst, Direction::FromClient, State::ConnRequested)
        } else if dst.port < src.port {
            (src, dst, Direction::FromClient, State::DataTransfer)
        } else {
            (dst, src, Direction::FromServer, State::DataTransfer)
        };

        let id = self.next_id;
        self.next_id += 1;
        let conn = TcpConnection::new(id, client, server, state, now_us);
        let key = self.slots.insert(conn)?;
        self.buckets[bucket_idx].push(key);
        Ok((key, dir))
    }

    /// Walks every bucket, evicting time-waited and idle-expired connections.
    /// `on_evict` runs for each one before it is dropped from the slab (see
    /// [`Self::process`]). Returns the number of connections removed.
    pub fn purge(&mut self, now_us: u64, on_evict: &mut dyn FnMut(Key, &TcpConnection)) -> usize {
        let mut removed = 0;
        for bucket in &mut self.buckets {
            let mut i = 0;
            while i < bucket.len() {
                let key = bucket[i];
                match self.slots.get(key) {
                    Some(conn) if self.is_reclaimable(conn, now_us) => {
                        on_evict(key, conn);
                        self.slots.remove(key);
                        bucket.swap_remove(i);
                        removed += 1;
                    }
                    Some(_) => i += 1,
                    None => {
                        bucket.swap_remove(i);
                        removed += 1;
                    }
                }
            }
        }
        removed
    }
}
