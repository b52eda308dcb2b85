#[cfg(test)]
mod lifetime_test;

use std::fmt;
use std::time::Duration;

use stun::attributes::ATTR_LIFETIME;
use stun::message::*;

/// Default allocation lifetime granted by TURN servers.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(10 * 60);

const LIFETIME_SIZE: usize = 4; // seconds, u32

/// Lifetime represents the LIFETIME attribute: the remaining allocation
/// lifetime in seconds. A zero lifetime in a Refresh request deletes the
/// allocation.
///
/// RFC 5766 Section 14.2
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime(pub Duration);

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}

impl Setter for Lifetime {
    fn add_to(&self, m: &mut Message) -> stun::Result<()> {
        m.add(ATTR_LIFETIME, &(self.0.as_secs() as u32).to_be_bytes());
        Ok(())
    }
}

impl Getter for Lifetime {
    fn get_from(&mut self, m: &Message) -> stun::Result<()> {
        let v = m.get(ATTR_LIFETIME)?;
        if v.len() != LIFETIME_SIZE {
            return Err(stun::Error::ErrAttributeSizeInvalid);
        }
        let seconds = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        self.0 = Duration::from_secs(seconds as u64);
        Ok(())
    }
}
