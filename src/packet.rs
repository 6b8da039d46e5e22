//! The decoded-packet record handed from the IP layer down to the TCP
//! engine: an owned, contiguous byte buffer plus offsets into it.
//!
//! Per the "Byte-buffer ownership" design note, the packet owns its bytes
//! outright (a plain `Vec<u8>`, materialized once — either a copy of the
//! original frame or the rebuilt fragment concatenation) and hands out
//! borrowed slices with a lifetime tied to `&self`.

use crate::address::IpAddress;
use crate::l4::L4Protocol;

/// A single decoded IP packet ready for L4 consumption.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub timestamp_us: u64,
    pub ip_version: u8,
    pub ip_total_length: usize,
    pub l3_protocol: L4Protocol,
    bytes: Vec<u8>,
    l2_start: usize,
    l2_len: usize,
    l3_start: usize,
    l3_len: usize,
    l4_start: usize,
    l4_len: usize,
}

impl PacketRecord {
    /// Builds a packet record, enforcing the invariant from §3:
    /// `L4_start + L4_length <= L2_start + IP_length`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp_us: u64,
        ip_version: u8,
        ip_total_length: usize,
        l3_protocol: L4Protocol,
        bytes: Vec<u8>,
        l2_start: usize,
        l2_len: usize,
        l3_len: usize,
        l4_len: usize,
    ) -> Self {
        let l3_start = l2_start + l2_len;
        let l4_start = l3_start + l3_len;
        assert!(
            l4_start + l4_len <= l2_start + ip_total_length,
            "packet record violates the L4 bounds invariant"
        );
        Self {
            timestamp_us,
            ip_version,
            ip_total_length,
            l3_protocol,
            bytes,
            l2_start,
            l2_len,
            l3_start,
            l3_len,
            l4_start,
            l4_len,
        }
    }

    /// The IP header (IPv4 header, or fixed IPv6 header with extension
    /// headers already walked off).
    pub fn ip_header(&self) -> &[u8] {
        &self.bytes[self.l2_start..self.l2_start + self.l2_len]
    }

    /// The L4 protocol header (TCP/UDP/ICMP/ICMPv6).
    pub fn l4_header(&self) -> &[u8] {
        &self.bytes[self.l3_start..self.l3_start + self.l3_len]
    }

    /// The L4 payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.l4_start..self.l4_start + self.l4_len]
    }

    pub fn payload_len(&self) -> usize {
        self.l4_len
    }

    /// The packet's source and destination IP addresses, read out of the
    /// fixed part of [`Self::ip_header`].
    pub fn addresses(&self) -> (IpAddress, IpAddress) {
        let header = self.ip_header();
        match self.ip_version {
            4 => (
                IpAddress::from(<[u8; 4]>::try_from(&header[12..16]).unwrap()),
                IpAddress::from(<[u8; 4]>::try_from(&header[16..20]).unwrap()),
            ),
            6 => (
                IpAddress::from(<[u8; 16]>::try_from(&header[8..24]).unwrap()),
                IpAddress::from(<[u8; 16]>::try_from(&header[24..40]).unwrap()),
            ),
            other => unreachable!("unsupported ip_version {other}"),
        }
    }
}
