use std::fmt;

use crate::attributes::*;
use crate::error::*;
use crate::message::*;

/// UnknownAttributes lists the comprehension-required attribute codes a
/// server did not understand.
///
/// RFC 5389 Section 15.9
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct UnknownAttributes(pub Vec<AttrType>);

impl fmt::Display for UnknownAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<nil>");
        }
        let s: Vec<String> = self.0.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", s.join(", "))
    }
}

const ATTR_TYPE_SIZE: usize = 2;

impl Setter for UnknownAttributes {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = Vec::with_capacity(self.0.len() * ATTR_TYPE_SIZE);
        for t in &self.0 {
            v.extend_from_slice(&t.value().to_be_bytes());
        }
        m.add(ATTR_UNKNOWN_ATTRIBUTES, &v);
        Ok(())
    }
}

impl Getter for UnknownAttributes {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_UNKNOWN_ATTRIBUTES)?;
        if v.len() % ATTR_TYPE_SIZE != 0 {
            return Err(Error::ErrBadUnknownAttrsSize);
        }
        self.0.clear();
        for chunk in v.chunks_exact(ATTR_TYPE_SIZE) {
            self.0
                .push(AttrType(u16::from_be_bytes([chunk[0], chunk[1]])));
        }
        Ok(())
    }
}

#[cfg(test)]
mod uattrs_test {
    use super::*;

    #[test]
    fn test_unknown_attributes_round_trip() -> Result<()> {
        let mut m = Message::new();
        let attrs = UnknownAttributes(vec![ATTR_USERNAME, ATTR_REALM]);
        attrs.add_to(&mut m)?;

        let mut parsed = UnknownAttributes::default();
        parsed.get_from(&m)?;
        assert_eq!(parsed, attrs);
        Ok(())
    }

    #[test]
    fn test_unknown_attributes_bad_size() {
        let mut m = Message::new();
        m.add(ATTR_UNKNOWN_ATTRIBUTES, &[1, 2, 3]);
        let mut parsed = UnknownAttributes::default();
        assert_eq!(
            parsed.get_from(&m),
            Err(Error::ErrBadUnknownAttrsSize)
        );
    }
}
