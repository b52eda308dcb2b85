#[cfg(test)]
mod textattrs_test;

use std::fmt;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

const MAX_USERNAME_B: usize = 513;
const MAX_REALM_B: usize = 763;
const MAX_SOFTWARE_B: usize = 763;
const MAX_NONCE_B: usize = 763;

/// TextAttribute is a plain-text attribute value with a length limit.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct TextAttribute {
    pub attr: AttrType,
    pub text: String,
}

/// USERNAME attribute, `remote_ufrag:local_ufrag` for connectivity checks.
pub type Username = TextAttribute;
/// REALM attribute of the long-term credential mechanism.
pub type Realm = TextAttribute;
/// NONCE attribute of the long-term credential mechanism.
pub type Nonce = TextAttribute;
/// SOFTWARE attribute.
pub type Software = TextAttribute;

impl TextAttribute {
    pub fn new(attr: AttrType, text: String) -> Self {
        TextAttribute { attr, text }
    }

    /// Reads the given attribute of m as a text value.
    pub fn get_from_as(m: &Message, attr: AttrType) -> Result<TextAttribute> {
        let max = match attr {
            ATTR_USERNAME => MAX_USERNAME_B,
            ATTR_REALM => MAX_REALM_B,
            ATTR_SOFTWARE => MAX_SOFTWARE_B,
            ATTR_NONCE => MAX_NONCE_B,
            _ => return Err(Error::Other(format!("not a text attribute: {attr}"))),
        };

        let v = m.get(attr)?;
        check_overflow(attr, v.len(), max)?;
        Ok(TextAttribute {
            attr,
            text: String::from_utf8(v)?,
        })
    }
}

impl fmt::Display for TextAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl Setter for TextAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let max = match self.attr {
            ATTR_USERNAME => MAX_USERNAME_B,
            ATTR_REALM => MAX_REALM_B,
            ATTR_SOFTWARE => MAX_SOFTWARE_B,
            ATTR_NONCE => MAX_NONCE_B,
            _ => return Err(Error::Other(format!("not a text attribute: {}", self.attr))),
        };

        check_overflow(self.attr, self.text.len(), max)?;
        m.add(self.attr, self.text.as_bytes());
        Ok(())
    }
}

impl Getter for TextAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let attr = self.attr;
        *self = TextAttribute::get_from_as(m, attr)?;
        Ok(())
    }
}
