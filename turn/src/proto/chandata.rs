#[cfg(test)]
mod chandata_test;

use crate::error::*;

pub const CHANNEL_DATA_HEADER_SIZE: usize = 4;

/// Lowest and highest channel numbers usable for TURN channel bindings.
///
/// RFC 5766 Section 11
pub const MIN_CHANNEL_NUMBER: u16 = 0x4000;
pub const MAX_CHANNEL_NUMBER: u16 = 0x7FFE;

/// ChannelData is an application datagram framed with a bound channel
/// number: number (2 bytes) | length (2 bytes) | payload. Over UDP the frame
/// is not padded.
///
/// RFC 5766 Section 11.4
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    pub number: u16,
    pub data: Vec<u8>,
}

impl ChannelData {
    pub fn new(number: u16, data: Vec<u8>) -> Self {
        ChannelData { number, data }
    }

    /// Encodes the frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CHANNEL_DATA_HEADER_SIZE + self.data.len());
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decodes a frame, validating the channel-number range and the length
    /// field.
    pub fn decode(raw: &[u8]) -> Result<ChannelData> {
        if raw.len() < CHANNEL_DATA_HEADER_SIZE {
            return Err(Error::ErrUnexpectedEof);
        }

        let number = u16::from_be_bytes([raw[0], raw[1]]);
        if !(MIN_CHANNEL_NUMBER..=MAX_CHANNEL_NUMBER).contains(&number) {
            return Err(Error::ErrInvalidChannelNumber);
        }

        let length = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        if CHANNEL_DATA_HEADER_SIZE + length > raw.len() {
            return Err(Error::ErrBadChannelDataLength);
        }

        Ok(ChannelData {
            number,
            data: raw[CHANNEL_DATA_HEADER_SIZE..CHANNEL_DATA_HEADER_SIZE + length].to_vec(),
        })
    }
}

/// Returns true if buf starts like a channel-data frame (the two most
/// significant bits are 0b01). Cheap sniff for demultiplexing; decoding can
/// still fail.
pub fn is_channel_data(buf: &[u8]) -> bool {
    buf.len() >= CHANNEL_DATA_HEADER_SIZE && buf[0] & 0xC0 == 0x40
}
