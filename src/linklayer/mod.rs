//! Maps a raw captured frame to the offset and IP version of the packet it
//! carries, walking Ethernet, VLAN/Q-in-Q tags, and MPLS label stacks along
//! the way.

use thiserror::Error;

/// The physical/link-layer framing of a captured frame, per the packet
/// source contract in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    Raw,
    LinuxSll,
}

impl LinkType {
    /// The numeric link-type constant used by capture sources (and PCAP).
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Ethernet),
            101 => Some(Self::Raw),
            113 => Some(Self::LinuxSll),
            _ => None,
        }
    }
}

/// Which IP version a frame was found to carry, and where its header starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub version: IpVersion,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Why a frame was discarded rather than handed to the IP parser.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short for its link type")]
    TooShort,
    #[error("unrecognized EtherType {0:#06x}")]
    UnknownEtherType(u16),
    #[error("unsupported SLL hardware type/length")]
    UnsupportedSll,
    #[error("unrecognized IP version nibble {0}")]
    UnknownIpVersion(u8),
}

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const ETHERTYPE_MPLS_UNICAST: u16 = 0x8847;
const ETHERTYPE_MPLS_MULTICAST: u16 = 0x8848;

const ARPHRD_ETHER: u16 = 1;

/// Locates the IP packet inside a captured frame.
pub fn decode(bytes: &[u8], link_type: LinkType) -> Result<Decoded, DecodeError> {
    match link_type {
        LinkType::Ethernet => decode_ethernet(bytes, 0),
        LinkType::Raw => decode_raw(bytes),
        LinkType::LinuxSll => decode_sll(bytes),
    }
}

fn decode_sll(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    if bytes.len() <= 16 {
        return Err(DecodeError::TooShort);
    }
    let hatype = u16::from_be_bytes([bytes[2], bytes[3]]);
    let halen = u16::from_be_bytes([bytes[4], bytes[5]]);
    if hatype != ARPHRD_ETHER || halen != 6 {
        return Err(DecodeError::UnsupportedSll);
    }
    // The SLL header occupies the same 14 bytes as an Ethernet header would,
    // shifted by 2 extra bytes, so EtherType dispatch resumes at the same
    // relative offset.
    decode_ethernet(bytes, 2)
}

fn decode_ethernet(bytes: &[u8], base: usize) -> Result<Decoded, DecodeError> {
    if bytes.len() <= base + 14 {
        return Err(DecodeError::TooShort);
    }
    let mut offset = base + 12;
    loop {
        if bytes.len() < offset + 2 {
            return Err(DecodeError::TooShort);
        }
        let ethertype = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        match ethertype {
            ETHERTYPE_IPV4 => return Ok(Decoded { version: IpVersion::V4, offset: offset + 2 }),
            ETHERTYPE_IPV6 => return Ok(Decoded { version: IpVersion::V6, offset: offset + 2 }),
            ETHERTYPE_VLAN | ETHERTYPE_QINQ => {
                if bytes.len() < offset + 4 {
                    return Err(DecodeError::TooShort);
                }
                offset += 4;
            }
            ETHERTYPE_MPLS_UNICAST | ETHERTYPE_MPLS_MULTICAST => {
                return decode_mpls(bytes, offset + 2);
            }
            other => return Err(DecodeError::UnknownEtherType(other)),
        }
    }
}

fn decode_mpls(bytes: &[u8], mut offset: usize) -> Result<Decoded, DecodeError> {
    loop {
        if bytes.len() < offset + 4 {
            return Err(DecodeError::TooShort);
        }
        let label_word = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        let label = label_word >> 12;
        let bottom_of_stack = label_word & 0x100 != 0;
        offset += 4;
        if bottom_of_stack {
            return match label {
                0 => Ok(Decoded { version: IpVersion::V4, offset }),
                2 => Ok(Decoded { version: IpVersion::V6, offset }),
                _ => decode_raw_at(bytes, offset),
            };
        }
    }
}

fn decode_raw(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    decode_raw_at(bytes, 0)
}

fn decode_raw_at(bytes: &[u8], offset: usize) -> Result<Decoded, DecodeError> {
    let first = *bytes.get(offset).ok_or(DecodeError::TooShort)?;
    match first >> 4 {
        4 => Ok(Decoded { version: IpVersion::V4, offset }),
        6 => Ok(Decoded { version: IpVersion::V6, offset }),
        other => Err(DecodeError::UnknownIpVersion(other)),
    }
}
