//! Protocol demultiplexing from a contiguous IP payload down to TCP, UDP,
//! ICMP, or ICMPv6, per §4.4.

pub mod icmp;
pub mod tcp_header;
pub mod udp_header;

pub use icmp::IcmpHeader;
pub use tcp_header::TcpHeader;
pub use udp_header::UdpHeader;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Protocol {
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
}

impl L4Protocol {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ICMP: u8 = 1;
    pub const ICMPV6: u8 = 58;

    pub fn from_ip_protocol(protocol_number: u8) -> Option<Self> {
        match protocol_number {
            Self::TCP => Some(Self::Tcp),
            Self::UDP => Some(Self::Udp),
            Self::ICMP => Some(Self::Icmp),
            Self::ICMPV6 => Some(Self::Icmpv6),
            _ => None,
        }
    }
}

/// The result of demultiplexing: which protocol was found, the length of
/// its header, and the length of the payload that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demuxed {
    pub protocol: L4Protocol,
    pub header_len: usize,
    pub payload_len: usize,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DemuxError {
    #[error("protocol number {0} is not TCP, UDP, ICMP, or ICMPv6")]
    UnsupportedProtocol(u8),
    #[error(transparent)]
    Tcp(#[from] tcp_header::TcpError),
    #[error(transparent)]
    Udp(#[from] udp_header::UdpError),
    #[error(transparent)]
    Icmp(#[from] icmp::IcmpError),
}

/// Demultiplexes the L4 bytes of an already-reassembled IP packet.
pub fn demux(protocol_number: u8, bytes: &[u8]) -> Result<Demuxed, DemuxError> {
    match L4Protocol::from_ip_protocol(protocol_number) {
        Some(L4Protocol::Tcp) => {
            let header = TcpHeader::from_bytes(bytes)?;
            Ok(Demuxed {
                protocol: L4Protocol::Tcp,
                header_len: header.header_len,
                payload_len: bytes.len() - header.header_len,
            })
        }
        Some(L4Protocol::Udp) => {
            let header = UdpHeader::from_bytes(bytes, bytes.len())?;
            Ok(Demuxed {
                protocol: L4Protocol::Udp,
                header_len: UdpHeader::LEN,
                payload_len: bytes.len() - UdpHeader::LEN,
            })
        }
        Some(protocol @ (L4Protocol::Icmp | L4Protocol::Icmpv6)) => {
            IcmpHeader::from_bytes(bytes)?;
            Ok(Demuxed {
                protocol,
                header_len: icmp::ICMP_HEADER_LEN,
                payload_len: bytes.len() - icmp::ICMP_HEADER_LEN,
            })
        }
        None => Err(DemuxError::UnsupportedProtocol(protocol_number)),
    }
}
