
use std::fmt;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::Rng;

use crate::attributes::*;
use crate::error::*;

/// The fixed value distinguishing STUN packets from other protocols
/// multiplexed on the same port, in network byte order.
pub const MAGIC_COOKIE: u32 = 0x2112A442;
pub const MESSAGE_HEADER_SIZE: usize = 20;
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;
pub const TRANSACTION_ID_SIZE: usize = 12; // 96 bit

/// Setter writes an attribute into a message.
pub trait Setter {
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

/// Getter parses an attribute out of a message.
pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

/// Checker validates a message property (integrity, fingerprint).
pub trait Checker {
    fn check(&self, m: &mut Message) -> Result<()>;
}

/// TransactionId is a 96-bit transaction identifier.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// Returns a fresh random id.
    pub fn new() -> Self {
        let mut id = TransactionId::default();
        rand::thread_rng().fill(&mut id.0);
        id
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64_STANDARD.encode(self.0))
    }
}

impl Setter for TransactionId {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = *self;
        m.write_transaction_id();
        Ok(())
    }
}

/// Returns true if b looks like a STUN message. Useful for demultiplexing;
/// a positive result does not guarantee that decoding will succeed.
pub fn is_message(b: &[u8]) -> bool {
    b.len() >= MESSAGE_HEADER_SIZE
        && b[0] & 0xC0 == 0
        && u32::from_be_bytes([b[4], b[5], b[6], b[7]]) == MAGIC_COOKIE
}

/// MessageClass is the 2-bit class of a STUN message type.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct MessageClass(pub(crate) u8);

pub const CLASS_REQUEST: MessageClass = MessageClass(0x00);
pub const CLASS_INDICATION: MessageClass = MessageClass(0x01);
pub const CLASS_SUCCESS_RESPONSE: MessageClass = MessageClass(0x02);
pub const CLASS_ERROR_RESPONSE: MessageClass = MessageClass(0x03);

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CLASS_REQUEST => "request",
            CLASS_INDICATION => "indication",
            CLASS_SUCCESS_RESPONSE => "success response",
            CLASS_ERROR_RESPONSE => "error response",
            _ => "unknown message class",
        };
        write!(f, "{s}")
    }
}

/// Method is the 12-bit STUN method.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct Method(pub(crate) u16);

pub const METHOD_BINDING: Method = Method(0x001);
pub const METHOD_ALLOCATE: Method = Method(0x003);
pub const METHOD_REFRESH: Method = Method(0x004);
pub const METHOD_SEND: Method = Method(0x006);
pub const METHOD_DATA: Method = Method(0x007);
pub const METHOD_CREATE_PERMISSION: Method = Method(0x008);
pub const METHOD_CHANNEL_BIND: Method = Method(0x009);

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = format!("0x{:x}", self.0);
        let s = match *self {
            METHOD_BINDING => "Binding",
            METHOD_ALLOCATE => "Allocate",
            METHOD_REFRESH => "Refresh",
            METHOD_SEND => "Send",
            METHOD_DATA => "Data",
            METHOD_CREATE_PERMISSION => "CreatePermission",
            METHOD_CHANNEL_BIND => "ChannelBind",
            _ => unknown.as_str(),
        };
        write!(f, "{s}")
    }
}

/// MessageType combines method and class into the 14-bit wire type field.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct MessageType {
    pub method: Method,
    pub class: MessageClass,
}

pub const BINDING_REQUEST: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_REQUEST,
};
pub const BINDING_SUCCESS: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_SUCCESS_RESPONSE,
};
pub const BINDING_ERROR: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_ERROR_RESPONSE,
};
pub const BINDING_INDICATION: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_INDICATION,
};

// The method bits are interleaved with the class bits C1 and C0:
//
//  0                 1
//  2  3  4 5 6 7 8 9 0 1 2 3 4 5
// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
//
// RFC 5389 Figure 3.
const METHOD_LOW_BITS: u16 = 0x000F; // M0..M3
const METHOD_MID_BITS: u16 = 0x0070; // M4..M6
const METHOD_HIGH_BITS: u16 = 0x0F80; // M7..M11
const CLASS_C0_SHIFT: u16 = 4;
const CLASS_C1_SHIFT: u16 = 7;

impl MessageType {
    pub fn new(method: Method, class: MessageClass) -> Self {
        MessageType { method, class }
    }

    /// Packs method and class into the wire representation.
    pub fn value(&self) -> u16 {
        let m = self.method.0;
        let method =
            (m & METHOD_LOW_BITS) | ((m & METHOD_MID_BITS) << 1) | ((m & METHOD_HIGH_BITS) << 2);

        let c = self.class.0 as u16;
        let class = ((c & 0x1) << CLASS_C0_SHIFT) | ((c & 0x2) << CLASS_C1_SHIFT);

        method | class
    }

    /// Unpacks the wire representation.
    pub fn read_value(&mut self, value: u16) {
        let c0 = (value >> CLASS_C0_SHIFT) & 0x1;
        let c1 = (value >> CLASS_C1_SHIFT) & 0x2;
        self.class = MessageClass((c0 | c1) as u8);

        let m = (value & METHOD_LOW_BITS)
            | ((value >> 1) & METHOD_MID_BITS)
            | ((value >> 2) & METHOD_HIGH_BITS);
        self.method = Method(m);
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

impl Setter for MessageType {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.set_type(*self);
        Ok(())
    }
}

const DEFAULT_RAW_CAPACITY: usize = 120;

/// Message is a single STUN packet.
///
/// Attributes are encoded into `raw` as they are added, so the buffer always
/// mirrors the decoded view; MESSAGE-INTEGRITY and FINGERPRINT rely on this
/// to hash the exact wire prefix.
#[derive(Default, Debug, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub length: u32, // attribute bytes, header excluded
    pub transaction_id: TransactionId,
    pub attributes: Attributes,
    pub raw: Vec<u8>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} l={} attrs={} id={}",
            self.typ,
            self.length,
            self.attributes.0.len(),
            self.transaction_id
        )
    }
}

// Raw is ignored: two messages are equal when their decoded views match.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.length == other.length
            && self.transaction_id == other.transaction_id
            && self.attributes == other.attributes
    }
}

impl Message {
    pub fn new() -> Self {
        Message {
            raw: {
                let mut raw = Vec::with_capacity(DEFAULT_RAW_CAPACITY);
                raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
                raw
            },
            ..Default::default()
        }
    }

    /// Resets the message and applies the setters in order.
    pub fn build(&mut self, setters: &[&dyn Setter]) -> Result<()> {
        self.reset();
        self.write_header();
        for s in setters {
            s.add_to(self)?;
        }
        Ok(())
    }

    /// Resets message, attributes and the underlying buffer.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
        self.length = 0;
        self.attributes.0.clear();
    }

    /// Assigns a random transaction id.
    pub fn new_transaction_id(&mut self) {
        self.transaction_id = TransactionId::new();
        self.write_transaction_id();
    }

    fn grow(&mut self, n: usize) {
        if self.raw.len() < n {
            self.raw.resize(n, 0);
        }
    }

    /// Appends an attribute TLV, padding the value to a 32-bit boundary with
    /// zero bytes.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        let first = MESSAGE_HEADER_SIZE + self.length as usize;
        let last = first + ATTRIBUTE_HEADER_SIZE + padded_length(v.len());
        self.grow(last);

        let buf = &mut self.raw[first..last];
        buf[0..2].copy_from_slice(&t.value().to_be_bytes());
        buf[2..4].copy_from_slice(&(v.len() as u16).to_be_bytes());
        buf[ATTRIBUTE_HEADER_SIZE..ATTRIBUTE_HEADER_SIZE + v.len()].copy_from_slice(v);
        for b in &mut buf[ATTRIBUTE_HEADER_SIZE + v.len()..] {
            *b = 0;
        }

        self.length = (last - MESSAGE_HEADER_SIZE) as u32;
        self.attributes.0.push(RawAttribute {
            typ: t,
            length: v.len() as u16,
            value: v.to_vec(),
        });
        self.write_length();
    }

    /// Returns the value of the first attribute of the given type.
    pub fn get(&self, t: AttrType) -> Result<Vec<u8>> {
        match self.attributes.get(t) {
            Some(a) => Ok(a.value.clone()),
            None => Err(Error::ErrAttributeNotFound),
        }
    }

    pub fn contains(&self, t: AttrType) -> bool {
        self.attributes.get(t).is_some()
    }

    pub fn write_length(&mut self) {
        self.grow(4);
        self.raw[2..4].copy_from_slice(&(self.length as u16).to_be_bytes());
    }

    pub fn write_type(&mut self) {
        self.grow(2);
        self.raw[0..2].copy_from_slice(&self.typ.value().to_be_bytes());
    }

    pub fn write_transaction_id(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE);
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    pub fn write_header(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE);
        self.write_type();
        self.write_length();
        self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        self.write_transaction_id();
    }

    pub fn set_type(&mut self, t: MessageType) {
        self.typ = t;
        self.write_type();
    }

    /// Re-encodes the decoded view into `raw` from scratch.
    pub fn encode(&mut self) {
        let attributes: Vec<RawAttribute> = self.attributes.0.drain(..).collect();
        self.raw.clear();
        self.raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
        self.length = 0;
        self.write_header();
        for a in &attributes {
            self.add(a.typ, &a.value);
        }
    }

    /// Replaces `raw` with the given bytes and decodes them.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.raw.clear();
        self.raw.extend_from_slice(data);
        self.decode()
    }

    /// Decodes `raw` into the message view.
    pub fn decode(&mut self) -> Result<()> {
        let buf = &self.raw;
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        let t = u16::from_be_bytes([buf[0], buf[1]]);
        if t & 0xC000 != 0 {
            // the two most significant bits of a STUN message are zero
            return Err(Error::ErrUnexpectedHeaderEof);
        }
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(Error::ErrBadMagicCookie);
        }

        let full_size = MESSAGE_HEADER_SIZE + size;
        if buf.len() < full_size {
            return Err(Error::Other(format!(
                "buffer length {} is less than expected message size {full_size}",
                buf.len()
            )));
        }

        self.typ.read_value(t);
        self.length = size as u32;
        self.transaction_id
            .0
            .copy_from_slice(&buf[8..MESSAGE_HEADER_SIZE]);

        self.attributes.0.clear();
        let mut b = &buf[MESSAGE_HEADER_SIZE..full_size];
        while !b.is_empty() {
            if b.len() < ATTRIBUTE_HEADER_SIZE {
                return Err(Error::ErrUnexpectedEof);
            }
            let typ = AttrType(u16::from_be_bytes([b[0], b[1]]));
            let length = u16::from_be_bytes([b[2], b[3]]);
            let padded = padded_length(length as usize);
            b = &b[ATTRIBUTE_HEADER_SIZE..];
            if b.len() < padded {
                return Err(Error::Other(format!(
                    "buffer length {} is less than expected value size {padded} for {typ}",
                    b.len()
                )));
            }
            self.attributes.0.push(RawAttribute {
                typ,
                length,
                value: b[..length as usize].to_vec(),
            });
            b = &b[padded..];
        }

        Ok(())
    }

    /// Applies checkers in order, returning the first error.
    pub fn check<C: Checker>(&mut self, checkers: &[C]) -> Result<()> {
        for c in checkers {
            c.check(self)?;
        }
        Ok(())
    }

    /// Applies getters in order, returning the first error.
    pub fn parse<G: Getter>(&self, getters: &mut [G]) -> Result<()> {
        for g in getters {
            g.get_from(self)?;
        }
        Ok(())
    }
}
