
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

/// FingerprintAttr represents the FINGERPRINT attribute.
///
/// RFC 5389 Section 15.5
pub struct FingerprintAttr;

/// Shorthand setter for FingerprintAttr.
pub const FINGERPRINT: FingerprintAttr = FingerprintAttr {};

pub const FINGERPRINT_XOR_VALUE: u32 = 0x5354554e;
pub const FINGERPRINT_SIZE: usize = 4;

/// CRC-32 of b, XOR-ed with 0x5354554e to disambiguate from application
/// protocols that also end packets in a CRC-32.
pub fn fingerprint_value(b: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(b) ^ FINGERPRINT_XOR_VALUE
}

impl Setter for FingerprintAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        // The CRC covers the message with the length field already counting
        // the fingerprint TLV.
        let original_length = m.length;
        m.length += (ATTRIBUTE_HEADER_SIZE + FINGERPRINT_SIZE) as u32;
        m.write_length();
        let v = fingerprint_value(&m.raw);
        m.length = original_length;

        m.add(ATTR_FINGERPRINT, &v.to_be_bytes());
        Ok(())
    }
}

impl FingerprintAttr {
    /// Validates the FINGERPRINT attribute of m. FINGERPRINT is expected to
    /// be the last attribute of the message.
    pub fn check(&self, m: &Message) -> Result<()> {
        let b = m.get(ATTR_FINGERPRINT)?;
        check_size(ATTR_FINGERPRINT, b.len(), FINGERPRINT_SIZE)?;

        let got = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let wire_end = MESSAGE_HEADER_SIZE + m.length as usize;
        let attr_start = wire_end - (ATTRIBUTE_HEADER_SIZE + FINGERPRINT_SIZE);
        check_fingerprint(got, fingerprint_value(&m.raw[..attr_start]))
    }
}
