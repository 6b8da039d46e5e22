//! UDP header parsing.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// The `length` field from the wire header, covering header + payload.
    pub length: u16,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UdpError {
    #[error("UDP header is incomplete")]
    HeaderTooShort,
    #[error("UDP length {0} does not match the available L4 length {1}")]
    LengthMismatch(u16, usize),
}

impl UdpHeader {
    pub const LEN: usize = 8;

    /// Parses a header from `bytes`, validating that its `length` field
    /// equals `l4_len` exactly, per §4.4.
    pub fn from_bytes(bytes: &[u8], l4_len: usize) -> Result<Self, UdpError> {
        if bytes.len() < Self::LEN {
            return Err(UdpError::HeaderTooShort);
        }
        let src_port = u16::from_be_bytes([bytes[0], bytes[1]]);
        let dst_port = u16::from_be_bytes([bytes[2], bytes[3]]);
        let length = u16::from_be_bytes([bytes[4], bytes[5]]);
        if length as usize != l4_len {
            return Err(UdpError::LengthMismatch(length, l4_len));
        }
        Ok(Self { src_port, dst_port, length })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_matching_length() {
        let mut bytes = vec![0u8; 8 + 12];
        bytes[0..2].copy_from_slice(&5000u16.to_be_bytes());
        bytes[2..4].copy_from_slice(&53u16.to_be_bytes());
        bytes[4..6].copy_from_slice(&20u16.to_be_bytes());
        let header = UdpHeader::from_bytes(&bytes, 20).unwrap();
        assert_eq!(header.dst_port, 53);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = vec![0u8; 8];
        bytes[4..6].copy_from_slice(&99u16.to_be_bytes());
        assert_eq!(
            UdpHeader::from_bytes(&bytes, 8),
            Err(UdpError::LengthMismatch(99, 8))
        );
    }
}
