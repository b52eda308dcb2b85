
use std::fmt;

use md5::{Digest, Md5};
use ring::hmac;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

pub(crate) const CREDENTIALS_SEP: &str = ":";
pub(crate) const MESSAGE_INTEGRITY_SIZE: usize = 20;

fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

/// MessageIntegrity is the HMAC-SHA1 key for the MESSAGE-INTEGRITY attribute.
///
/// The HMAC covers the message from the start of the header up to, but not
/// including, the MESSAGE-INTEGRITY attribute, with the header length field
/// adjusted to pretend the integrity TLV is the last attribute.
///
/// RFC 5389 Section 15.4
#[derive(Default, Clone, PartialEq, Eq)]
pub struct MessageIntegrity(pub Vec<u8>);

impl fmt::Debug for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY: 0x{:x?}", self.0)
    }
}

impl MessageIntegrity {
    /// Key for short-term credentials: the password itself.
    pub fn new_short_term(password: &str) -> Self {
        MessageIntegrity(password.as_bytes().to_vec())
    }

    /// Key for long-term credentials: MD5 of username:realm:password.
    pub fn new_long_term(username: &str, realm: &str, password: &str) -> Self {
        let creds = [username, realm, password].join(CREDENTIALS_SEP);
        let mut h = Md5::new();
        h.update(creds.as_bytes());
        MessageIntegrity(h.finalize().to_vec())
    }

    /// Validates the MESSAGE-INTEGRITY attribute of m against this key.
    pub fn check(&self, m: &mut Message) -> Result<()> {
        let v = m.get(ATTR_MESSAGE_INTEGRITY)?;
        check_size(ATTR_MESSAGE_INTEGRITY, v.len(), MESSAGE_INTEGRITY_SIZE)?;

        // Attributes after MESSAGE-INTEGRITY (i.e. FINGERPRINT) are not
        // covered by the HMAC; shrink the length field accordingly while
        // hashing.
        let mut after = false;
        let mut trailing = 0usize;
        for a in &m.attributes.0 {
            if after {
                trailing += ATTRIBUTE_HEADER_SIZE + padded_length(a.length as usize);
            }
            if a.typ == ATTR_MESSAGE_INTEGRITY {
                after = true;
            }
        }

        let original_length = m.length;
        m.length -= trailing as u32;
        m.write_length();
        let hashed_end = MESSAGE_HEADER_SIZE + m.length as usize
            - (ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE);
        let expected = hmac_sha1(&self.0, &m.raw[..hashed_end]);
        m.length = original_length;
        m.write_length();

        check_hmac(&v, &expected)
    }
}

impl Setter for MessageIntegrity {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        for a in &m.attributes.0 {
            if a.typ == ATTR_FINGERPRINT {
                return Err(Error::ErrFingerprintBeforeIntegrity);
            }
        }

        // Pretend the integrity TLV is already present for the length field,
        // hash, then append it for real.
        let original_length = m.length;
        m.length += (ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE) as u32;
        m.write_length();
        let v = hmac_sha1(&self.0, &m.raw);
        m.length = original_length;

        m.add(ATTR_MESSAGE_INTEGRITY, &v);
        Ok(())
    }
}
