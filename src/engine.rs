//! The top-level entry point: link-layer framing down to a decoded
//! [`PacketRecord`], then into the TCP connection tracker.
//!
//! Owns one [`FragmentReassembler`] per IP version, since IPv4 and IPv6
//! fragment IDs live in disjoint spaces (§4.3) and must not be reassembled
//! against each other.

use thiserror::Error;

use crate::config::EngineConfig;
use crate::ip::fragment::FragmentReassembler;
use crate::ip::ipv4::{decode_ipv4, Ipv4Error};
use crate::ip::ipv6::{decode_ipv6, Ipv6Error};
use crate::l4::L4Protocol;
use crate::linklayer::{self, IpVersion, LinkType};
use crate::stats::Stats;
use crate::tcp::{StreamCallbacks, TcpEngine};

/// Why a packet was dropped before it ever reached TCP connection tracking.
#[derive(Debug, Error)]
enum IpDecodeError {
    #[error(transparent)]
    V4(#[from] Ipv4Error),
    #[error(transparent)]
    V6(#[from] Ipv6Error),
}

/// Decodes raw captured frames and drives connection tracking and stream
/// reassembly, accumulating [`Stats`] along the way.
pub struct Engine<C: StreamCallbacks> {
    link_type: LinkType,
    v4_reassembler: FragmentReassembler,
    v6_reassembler: FragmentReassembler,
    tcp: TcpEngine<C>,
    pub stats: Stats,
}

impl<C: StreamCallbacks> Engine<C> {
    pub fn new(link_type: LinkType, config: &EngineConfig) -> Self {
        Self {
            link_type,
            v4_reassembler: FragmentReassembler::new(
                config.max_fragmented_packets,
                config.max_fragments_per_packet,
                config.fragment_max_age_s,
            ),
            v6_reassembler: FragmentReassembler::new(
                config.max_fragmented_packets,
                config.max_fragments_per_packet,
                config.fragment_max_age_s,
            ),
            tcp: TcpEngine::new(config),
            stats: Stats::new(),
        }
    }

    pub fn tcp(&self) -> &TcpEngine<C> {
        &self.tcp
    }

    /// Decodes one captured frame and, if it carries a complete TCP segment,
    /// drives it through connection tracking and stream reassembly.
    ///
    /// Non-TCP packets, malformed frames, and incomplete fragments all update
    /// `self.stats` rather than surfacing an error: a single bad frame in a
    /// capture should not interrupt processing of the rest.
    pub fn process_frame(&mut self, frame: &[u8], ts_us: u64, callbacks: &mut C) {
        self.stats.packets_received += 1;

        let decoded = match linklayer::decode(frame, self.link_type) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::debug!(%err, "discarding frame at link layer");
                self.stats.packets_dropped += 1;
                return;
            }
        };
        let ip_bytes = &frame[decoded.offset..];

        let completed_before = self.v4_reassembler.completed_count() + self.v6_reassembler.completed_count();
        let invalid_before = self.v4_reassembler.invalid_count() + self.v6_reassembler.invalid_count();

        let outcome: Result<Option<_>, IpDecodeError> = match decoded.version {
            IpVersion::V4 => decode_ipv4(ip_bytes, ts_us, &mut self.v4_reassembler).map_err(IpDecodeError::from),
            IpVersion::V6 => decode_ipv6(ip_bytes, ts_us, &mut self.v6_reassembler).map_err(IpDecodeError::from),
        };

        self.stats.fragments_completed +=
            (self.v4_reassembler.completed_count() + self.v6_reassembler.completed_count()) - completed_before;
        self.stats.fragments_invalid +=
            (self.v4_reassembler.invalid_count() + self.v6_reassembler.invalid_count()) - invalid_before;

        let record = match outcome {
            Ok(Some(record)) => record,
            Ok(None) => return, // fragment stored, datagram not yet complete
            Err(err) => {
                tracing::debug!(%err, "discarding packet at ip layer");
                self.stats.packets_dropped += 1;
                return;
            }
        };

        if record.l3_protocol != L4Protocol::Tcp {
            return;
        }

        let before = self.tcp.connection_count();
        match self.tcp.handle_packet(callbacks, &record, ts_us) {
            Ok(()) => {
                if self.tcp.connection_count() > before {
                    self.stats.connections_created += 1;
                }
            }
            Err(err) => {
                tracing::debug!(%err, "discarding packet at tcp layer");
                self.stats.packets_dropped += 1;
            }
        }
    }

    /// Ages out stale fragment pools and idle/time-waited connections.
    /// Should be called periodically by the caller (there is no background
    /// timer inside this crate; see the "No background threads" design note).
    pub fn purge(&mut self, callbacks: &mut C, now_us: u64) {
        self.stats.fragments_expired += self.v4_reassembler.expire(now_us) as u64;
        self.stats.fragments_expired += self.v6_reassembler.expire(now_us) as u64;
        let removed = self.tcp.purge(callbacks, now_us);
        self.stats.connections_expired += removed as u64;
    }
}
