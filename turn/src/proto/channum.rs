#[cfg(test)]
mod channum_test;

use std::fmt;

use stun::attributes::ATTR_CHANNEL_NUMBER;
use stun::message::*;

use crate::proto::chandata::{MAX_CHANNEL_NUMBER, MIN_CHANNEL_NUMBER};

const CHANNEL_NUMBER_SIZE: usize = 4; // number + RFFU

/// ChannelNumber represents the CHANNEL-NUMBER attribute.
///
/// RFC 5766 Section 14.1
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelNumber(pub u16);

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH 0x{:x}", self.0)
    }
}

impl Setter for ChannelNumber {
    fn add_to(&self, m: &mut Message) -> stun::Result<()> {
        let mut v = [0u8; CHANNEL_NUMBER_SIZE];
        v[0..2].copy_from_slice(&self.0.to_be_bytes());
        // v[2..4] is RFFU, zero
        m.add(ATTR_CHANNEL_NUMBER, &v);
        Ok(())
    }
}

impl Getter for ChannelNumber {
    fn get_from(&mut self, m: &Message) -> stun::Result<()> {
        let v = m.get(ATTR_CHANNEL_NUMBER)?;
        if v.len() < CHANNEL_NUMBER_SIZE {
            return Err(stun::Error::ErrUnexpectedEof);
        }
        self.0 = u16::from_be_bytes([v[0], v[1]]);
        Ok(())
    }
}

impl ChannelNumber {
    /// Returns true if the number lies in the bindable range.
    pub fn valid(&self) -> bool {
        (MIN_CHANNEL_NUMBER..=MAX_CHANNEL_NUMBER).contains(&self.0)
    }
}
