//! IPv4 header parsing and the top-level `decode_ipv4` entry point, which
//! ties header parsing, fragment reassembly, and L4 demux together into a
//! [`PacketRecord`].

use super::fragment::{FragmentOutcome, FragmentReassembler};
use crate::address::IpAddress;
use crate::l4::{self, DemuxError};
use crate::packet::PacketRecord;
use thiserror::Error;

const MORE_FRAGMENTS: u16 = 0x2000;
const FRAGMENT_OFFSET_MASK: u16 = 0x1fff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub ihl_bytes: usize,
    pub total_length: u16,
    pub identification: u16,
    pub flags_and_offset: u16,
    pub protocol: u8,
    pub source: IpAddress,
    pub destination: IpAddress,
}

impl Ipv4Header {
    pub fn more_fragments(&self) -> bool {
        self.flags_and_offset & MORE_FRAGMENTS != 0
    }

    pub fn fragment_offset_bytes(&self) -> u32 {
        ((self.flags_and_offset & FRAGMENT_OFFSET_MASK) as u32) << 3
    }

    pub fn is_fragmented(&self) -> bool {
        self.flags_and_offset & (MORE_FRAGMENTS | FRAGMENT_OFFSET_MASK) != 0
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let version = bytes[0] >> 4;
        if version != 4 {
            return Err(ParseError::WrongVersion(version));
        }
        let ihl_bytes = (bytes[0] & 0b1111) as usize * 4;
        if ihl_bytes < 20 || ihl_bytes >= bytes.len() {
            return Err(ParseError::InvalidHeaderLength(ihl_bytes));
        }
        let total_length = u16::from_be_bytes([bytes[2], bytes[3]]);
        if (total_length as usize) > bytes.len() {
            return Err(ParseError::TotalLengthExceedsCaptured(total_length, bytes.len()));
        }
        let identification = u16::from_be_bytes([bytes[4], bytes[5]]);
        let flags_and_offset = u16::from_be_bytes([bytes[6], bytes[7]]);
        let protocol = bytes[9];
        let source = IpAddress::from(<[u8; 4]>::try_from(&bytes[12..16]).unwrap());
        let destination = IpAddress::from(<[u8; 4]>::try_from(&bytes[16..20]).unwrap());
        Ok(Self {
            ihl_bytes,
            total_length,
            identification,
            flags_and_offset,
            protocol,
            source,
            destination,
        })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("frame too short for an IPv4 header")]
    HeaderTooShort,
    #[error("expected IPv4, got version nibble {0}")]
    WrongVersion(u8),
    #[error("invalid header length {0}")]
    InvalidHeaderLength(usize),
    #[error("total length {0} exceeds the {1} captured bytes")]
    TotalLengthExceedsCaptured(u16, usize),
}

#[derive(Debug, Error)]
pub enum Ipv4Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("fragment reassembly rejected this fragment")]
    InvalidFragment,
    #[error("a fragment pool is exhausted")]
    NoMemory,
    #[error(transparent)]
    Demux(#[from] DemuxError),
}

/// The maximum total packet length the decoder accepts (§8, boundary test).
pub const PACKET_MAX_LEN: usize = 262_144;

/// Parses an IPv4 packet, feeding fragments to `reassembler` as needed.
///
/// Returns `Ok(None)` when a fragment was consumed but no complete datagram
/// is available yet (or the fragment was a duplicate); `Ok(Some(_))` when a
/// full packet -- fragmented or not -- is ready for the TCP engine.
pub fn decode_ipv4(
    bytes: &[u8],
    ts_us: u64,
    reassembler: &mut FragmentReassembler,
) -> Result<Option<PacketRecord>, Ipv4Error> {
    if bytes.len() <= 20 || bytes.len() > PACKET_MAX_LEN {
        return Err(ParseError::HeaderTooShort.into());
    }
    let header = Ipv4Header::from_bytes(bytes)?;
    let ip_total_length = header.total_length as usize;
    if ip_total_length > bytes.len() || ip_total_length < header.ihl_bytes {
        return Err(ParseError::TotalLengthExceedsCaptured(header.total_length, bytes.len()).into());
    }

    if !header.is_fragmented() {
        let l4_bytes = &bytes[header.ihl_bytes..ip_total_length];
        let demuxed = l4::demux(header.protocol, l4_bytes)?;
        let owned = bytes[..ip_total_length].to_vec();
        return Ok(Some(PacketRecord::new(
            ts_us,
            4,
            ip_total_length,
            demuxed.protocol,
            owned,
            0,
            header.ihl_bytes,
            demuxed.header_len,
            demuxed.payload_len,
        )));
    }

    let offset = header.fragment_offset_bytes();
    let last = !header.more_fragments();
    let iphdr = &bytes[..header.ihl_bytes];
    let data = &bytes[header.ihl_bytes..ip_total_length];

    match reassembler.add(iphdr, header.identification as u32, ts_us, offset, data, last) {
        FragmentOutcome::Incomplete | FragmentOutcome::Duplicate => Ok(None),
        FragmentOutcome::InvalidFragment => Err(Ipv4Error::InvalidFragment),
        FragmentOutcome::NoMemory => Err(Ipv4Error::NoMemory),
        FragmentOutcome::Complete(message) => {
            // `message` is the saved first-fragment header concatenated
            // with the fragment payloads in ascending offset order. Fix up
            // `total_length` and clear the fragmentation bits in place,
            // matching the source's rebuild step.
            let mut owned = message.to_vec();
            let total_len = owned.len();
            let saved_ihl_bytes = (owned[0] & 0b1111) as usize * 4;
            let protocol = owned[9];
            owned[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
            owned[6] = 0;
            owned[7] = 0;

            let l4_bytes = &owned[saved_ihl_bytes..];
            let demuxed = l4::demux(protocol, l4_bytes)?;
            Ok(Some(PacketRecord::new(
                ts_us,
                4,
                total_len,
                demuxed.protocol,
                owned,
                0,
                saved_ihl_bytes,
                demuxed.header_len,
                demuxed.payload_len,
            )))
        }
    }
}
