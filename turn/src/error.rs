use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("unexpected EOF")]
    ErrUnexpectedEof,
    #[error("channel number not in [0x4000, 0x7FFE]")]
    ErrInvalidChannelNumber,
    #[error("channel data length does not match the frame")]
    ErrBadChannelDataLength,
    #[error("{0}")]
    Stun(#[from] stun::Error),
}
