use std::net;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("no such stream")]
    ErrUnknownStream,
    #[error("no such component")]
    ErrUnknownComponent,
    #[error("attribute not long enough to be an ICE candidate")]
    ErrAttributeTooShortIceCandidate,
    #[error("invalid transport protocol type")]
    ErrProtoType,
    #[error("unknown candidate type")]
    ErrUnknownCandidateType,
    #[error("could not parse component")]
    ErrParseComponent,
    #[error("could not parse priority")]
    ErrParsePriority,
    #[error("could not parse port")]
    ErrParsePort,
    #[error("gathering requires STUN or TURN servers for the enabled families")]
    ErrNoServers,
    #[error("parse addr: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("{0}")]
    Stun(#[from] stun::Error),
    #[error("{0}")]
    Turn(#[from] turn::Error),
    #[error("{0}")]
    Other(String),
}
