
use std::fmt;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

/// ErrorCodeAttribute represents the ERROR-CODE attribute.
///
/// RFC 5389 Section 15.6
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ErrorCodeAttribute {
    pub code: ErrorCode,
    pub reason: Vec<u8>,
}

impl fmt::Display for ErrorCodeAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.code.0,
            String::from_utf8_lossy(&self.reason)
        )
    }
}

const REASON_START: usize = 4;
const REASON_MAX: usize = 763;

impl Setter for ErrorCodeAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        check_overflow(ATTR_ERROR_CODE, self.reason.len(), REASON_MAX)?;

        let mut value = Vec::with_capacity(REASON_START + self.reason.len());
        value.extend_from_slice(&[0, 0]);
        value.push((self.code.0 / 100) as u8); // class, the hundreds digit
        value.push((self.code.0 % 100) as u8); // number, 0..=99
        value.extend_from_slice(&self.reason);
        m.add(ATTR_ERROR_CODE, &value);
        Ok(())
    }
}

impl Getter for ErrorCodeAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ERROR_CODE)?;
        if v.len() < REASON_START {
            return Err(Error::ErrUnexpectedEof);
        }
        self.code = ErrorCode(v[2] as u16 * 100 + v[3] as u16);
        self.reason = v[REASON_START..].to_vec();
        Ok(())
    }
}

/// ErrorCode is the numeric code of an ERROR-CODE attribute.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Default, Debug)]
pub struct ErrorCode(pub u16);

impl Setter for ErrorCode {
    /// Adds ERROR-CODE with its default reason phrase to m.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let reason = default_reason(*self).ok_or(Error::ErrNoDefaultReason)?;
        ErrorCodeAttribute {
            code: *self,
            reason: reason.as_bytes().to_vec(),
        }
        .add_to(m)
    }
}

pub const CODE_BAD_REQUEST: ErrorCode = ErrorCode(400);
pub const CODE_UNAUTHORIZED: ErrorCode = ErrorCode(401);
pub const CODE_UNKNOWN_ATTRIBUTE: ErrorCode = ErrorCode(420);
pub const CODE_STALE_NONCE: ErrorCode = ErrorCode(438);
pub const CODE_ROLE_CONFLICT: ErrorCode = ErrorCode(487);
pub const CODE_SERVER_ERROR: ErrorCode = ErrorCode(500);

// RFC 5766 Section 15.
pub const CODE_FORBIDDEN: ErrorCode = ErrorCode(403);
pub const CODE_ALLOC_MISMATCH: ErrorCode = ErrorCode(437);
pub const CODE_WRONG_CREDENTIALS: ErrorCode = ErrorCode(441);
pub const CODE_UNSUPPORTED_TRANS_PROTO: ErrorCode = ErrorCode(442);
pub const CODE_ALLOC_QUOTA_REACHED: ErrorCode = ErrorCode(486);
pub const CODE_INSUFFICIENT_CAPACITY: ErrorCode = ErrorCode(508);

fn default_reason(code: ErrorCode) -> Option<&'static str> {
    let reason = match code {
        CODE_BAD_REQUEST => "Bad Request",
        CODE_UNAUTHORIZED => "Unauthorized",
        CODE_UNKNOWN_ATTRIBUTE => "Unknown Attribute",
        CODE_STALE_NONCE => "Stale Nonce",
        CODE_ROLE_CONFLICT => "Role Conflict",
        CODE_SERVER_ERROR => "Server Error",
        CODE_FORBIDDEN => "Forbidden",
        CODE_ALLOC_MISMATCH => "Allocation Mismatch",
        CODE_WRONG_CREDENTIALS => "Wrong Credentials",
        CODE_UNSUPPORTED_TRANS_PROTO => "Unsupported Transport Protocol",
        CODE_ALLOC_QUOTA_REACHED => "Allocation Quota Reached",
        CODE_INSUFFICIENT_CAPACITY => "Insufficient Capacity",
        _ => return None,
    };
    Some(reason)
}
