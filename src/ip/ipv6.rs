//! IPv6 header parsing and the extension-header walk, per §4.2.

use super::fragment::{FragmentOutcome, FragmentReassembler};
use crate::address::IpAddress;
use crate::l4::{self, DemuxError};
use crate::packet::PacketRecord;
use thiserror::Error;

const FIXED_HEADER_LEN: usize = 40;

const HOPOPTS: u8 = 0;
const ROUTING: u8 = 43;
const FRAGMENT: u8 = 44;
const DSTOPTS: u8 = 60;
const MOBILITY: u8 = 135;
const HIP: u8 = 139;
const SHIM6: u8 = 140;

fn is_extension_header(next_header: u8) -> bool {
    matches!(
        next_header,
        HOPOPTS | ROUTING | DSTOPTS | FRAGMENT | MOBILITY | HIP | SHIM6
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    pub payload_len: u16,
    pub next_header: u8,
    pub source: IpAddress,
    pub destination: IpAddress,
}

impl Ipv6Header {
    fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let version = bytes[0] >> 4;
        if version != 6 {
            return Err(ParseError::WrongVersion(version));
        }
        let payload_len = u16::from_be_bytes([bytes[4], bytes[5]]);
        let next_header = bytes[6];
        let source = IpAddress::from(<[u8; 16]>::try_from(&bytes[8..24]).unwrap());
        let destination = IpAddress::from(<[u8; 16]>::try_from(&bytes[24..40]).unwrap());
        Ok(Self { payload_len, next_header, source, destination })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("frame too short for an IPv6 header")]
    HeaderTooShort,
    #[error("expected IPv6, got version nibble {0}")]
    WrongVersion(u8),
    #[error("payload_len {0} exceeds the {1} captured bytes")]
    PayloadExceedsCaptured(u16, usize),
    #[error("extension header chain runs past the declared payload length")]
    ExtensionHeaderOverrun,
}

#[derive(Debug, Error)]
pub enum Ipv6Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("fragment reassembly rejected this fragment")]
    InvalidFragment,
    #[error("a fragment pool is exhausted")]
    NoMemory,
    #[error(transparent)]
    Demux(#[from] DemuxError),
}

/// Extension-header walk outcome: where the final upper-layer header starts,
/// its protocol number, and -- if a FRAGMENT header was seen -- the
/// fragmentation parameters to feed the reassembler.
struct Walked {
    upper_layer_offset: usize,
    upper_layer_protocol: u8,
    fragment: Option<FragmentParams>,
}

struct FragmentParams {
    ident: u32,
    offset_bytes: u32,
    more_fragments: bool,
    inner_next_header: u8,
}

fn walk_extension_headers(bytes: &[u8], header: &Ipv6Header) -> Result<Walked, ParseError> {
    let mut offset = FIXED_HEADER_LEN;
    let end = FIXED_HEADER_LEN + header.payload_len as usize;
    let mut next_header = header.next_header;
    let mut fragment = None;

    while is_extension_header(next_header) {
        if offset + 8 > end {
            return Err(ParseError::ExtensionHeaderOverrun);
        }
        if next_header == FRAGMENT {
            // Fixed 8-byte fragment header: next_header(1), reserved(1),
            // frag_offset+flags(2), identification(4).
            let frag_offset_and_flags = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]);
            let ident = u32::from_be_bytes(bytes[offset + 4..offset + 8].try_into().unwrap());
            fragment = Some(FragmentParams {
                ident,
                offset_bytes: ((frag_offset_and_flags >> 3) as u32) << 3,
                more_fragments: frag_offset_and_flags & 1 != 0,
                inner_next_header: bytes[offset],
            });
            offset += 8;
            next_header = bytes[offset - 8];
        } else {
            let ext_len_units = bytes[offset + 1];
            let ext_total_len = (ext_len_units as usize + 1) * 8;
            if offset + ext_total_len > end {
                return Err(ParseError::ExtensionHeaderOverrun);
            }
            next_header = bytes[offset];
            offset += ext_total_len;
        }
    }

    Ok(Walked { upper_layer_offset: offset, upper_layer_protocol: next_header, fragment })
}

/// Parses an IPv6 packet, feeding FRAGMENT-header datagrams to `reassembler`.
pub fn decode_ipv6(
    bytes: &[u8],
    ts_us: u64,
    reassembler: &mut FragmentReassembler,
) -> Result<Option<PacketRecord>, Ipv6Error> {
    if bytes.len() <= FIXED_HEADER_LEN {
        return Err(ParseError::HeaderTooShort.into());
    }
    let header = Ipv6Header::from_bytes(bytes)?;
    let end = FIXED_HEADER_LEN + header.payload_len as usize;
    if end > bytes.len() {
        return Err(ParseError::PayloadExceedsCaptured(header.payload_len, bytes.len()).into());
    }

    let walked = walk_extension_headers(bytes, &header)?;

    match walked.fragment {
        None => {
            let l4_bytes = &bytes[walked.upper_layer_offset..end];
            let demuxed = l4::demux(walked.upper_layer_protocol, l4_bytes)?;
            let owned = bytes[..end].to_vec();
            Ok(Some(PacketRecord::new(
                ts_us,
                6,
                end,
                demuxed.protocol,
                owned,
                0,
                walked.upper_layer_offset,
                demuxed.header_len,
                demuxed.payload_len,
            )))
        }
        Some(frag) => {
            let saved_header = &bytes[..FIXED_HEADER_LEN];
            let data = &bytes[walked.upper_layer_offset..end];
            match reassembler.add(
                saved_header,
                frag.ident,
                ts_us,
                frag.offset_bytes,
                data,
                !frag.more_fragments,
            ) {
                FragmentOutcome::Incomplete | FragmentOutcome::Duplicate => Ok(None),
                FragmentOutcome::InvalidFragment => Err(Ipv6Error::InvalidFragment),
                FragmentOutcome::NoMemory => Err(Ipv6Error::NoMemory),
                FragmentOutcome::Complete(message) => {
                    let mut owned = message.to_vec();
                    let payload_len = owned.len() - FIXED_HEADER_LEN;
                    owned[4..6].copy_from_slice(&(payload_len as u16).to_be_bytes());
                    owned[6] = frag.inner_next_header;
                    let l4_bytes = &owned[FIXED_HEADER_LEN..];
                    let demuxed = l4::demux(frag.inner_next_header, l4_bytes)?;
                    let total_len = owned.len();
                    Ok(Some(PacketRecord::new(
                        ts_us,
                        6,
                        total_len,
                        demuxed.protocol,
                        owned,
                        0,
                        FIXED_HEADER_LEN,
                        demuxed.header_len,
                        demuxed.payload_len,
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv6_header(payload_len: u16, next_header: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; 40];
        bytes[0] = 0x60;
        bytes[4..6].copy_from_slice(&payload_len.to_be_bytes());
        bytes[6] = next_header;
        bytes
    }

    #[test]
    fn plain_tcp_packet() {
        let mut bytes = ipv6_header(20, l4::L4Protocol::TCP);
        bytes.extend(vec![0u8; 20]);
        bytes[40 + 12] = 5 << 4;
        let mut reassembler = FragmentReassembler::new(1024, 8192, 30);
        let packet = decode_ipv6(&bytes, 0, &mut reassembler).unwrap().unwrap();
        assert_eq!(packet.ip_version, 6);
        assert_eq!(packet.payload_len(), 0);
    }

    #[test]
    fn hop_by_hop_then_routing_then_tcp() {
        // Hop-by-hop (8 bytes) -> Routing (16 bytes) -> TCP.
        let mut bytes = ipv6_header(8 + 16 + 20, HOPOPTS);
        bytes.extend([ROUTING, 0, 0, 0, 0, 0, 0, 0]); // hop-by-hop: next=ROUTING, len=0 -> 8 bytes
        bytes.extend([l4::L4Protocol::TCP, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]); // routing: next=TCP, len=1 -> 16 bytes
        bytes.extend(vec![0u8; 20]);
        let tcp_offset = 40 + 8 + 16;
        bytes[tcp_offset + 12] = 5 << 4;

        let mut reassembler = FragmentReassembler::new(1024, 8192, 30);
        let packet = decode_ipv6(&bytes, 0, &mut reassembler).unwrap().unwrap();
        assert_eq!(packet.ip_header().len(), tcp_offset);
        assert_eq!(packet.payload_len(), 0);
    }

    #[test]
    fn truncated_extension_chain_is_rejected() {
        let mut bytes = ipv6_header(8 + 16, HOPOPTS);
        bytes.extend([ROUTING, 0, 0, 0, 0, 0, 0, 0]);
        // Declares 16 more bytes of routing header but only 8 are present.
        bytes.extend([l4::L4Protocol::TCP, 0, 0, 0, 0, 0, 0, 0]);
        let mut reassembler = FragmentReassembler::new(1024, 8192, 30);
        assert!(decode_ipv6(&bytes, 0, &mut reassembler).is_err());
    }
}
