
pub mod pair;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::*;

/// Candidate types in decreasing order of directness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

impl CandidateType {
    /// Type preference used when computing candidate priority.
    ///
    /// RFC 5245 4.1.2.2: 126 for host, 110 for peer-reflexive, 100 for
    /// server-reflexive, 0 for relayed candidates.
    pub const fn preference(self) -> u8 {
        match self {
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relay => 0,
        }
    }

    fn from_sdp_token(token: &str) -> Result<Self> {
        let t = match token.to_ascii_lowercase().as_str() {
            "host" => CandidateType::Host,
            "srflx" => CandidateType::ServerReflexive,
            "prflx" => CandidateType::PeerReflexive,
            "relay" => CandidateType::Relay,
            _ => return Err(Error::ErrUnknownCandidateType),
        };
        Ok(t)
    }

    fn code(self) -> u32 {
        match self {
            CandidateType::Host => 0,
            CandidateType::ServerReflexive => 1,
            CandidateType::PeerReflexive => 2,
            CandidateType::Relay => 3,
        }
    }
}

/// A single transport candidate of one component.
///
/// `addr` is the advertised (external) transport address; `base` is the
/// local interface address the candidate sends from. They are equal for
/// host candidates until a server response fills in the external view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateType,
    pub component: u16,
    pub addr: SocketAddr,
    pub base: SocketAddr,
    pub foundation: String,
    pub priority: u32,
    pub interface_priority: u16,
    /// Gathering for this candidate finished.
    pub ready: bool,
    /// Gathering finished without a usable address.
    pub failed: bool,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CandidateType::Host => write!(f, "host({})", self.addr),
            _ => write!(f, "{}(base:{} external:{})", self.kind, self.base, self.addr),
        }
    }
}

impl Candidate {
    pub fn new(kind: CandidateType, component: u16, addr: SocketAddr) -> Self {
        Candidate {
            kind,
            component,
            addr,
            base: addr,
            foundation: String::new(),
            priority: 0,
            interface_priority: 0,
            // host candidates need no gathering round-trip
            ready: kind == CandidateType::Host,
            failed: false,
        }
    }

    pub fn relayed(&self) -> bool {
        self.kind == CandidateType::Relay
    }

    /// priority = (type pref << 24) | (interface pref << 8) | (256 - component)
    pub fn compute_priority(&mut self) {
        self.priority = ((self.kind.preference() as u32) << 24)
            + ((self.interface_priority as u32) << 8)
            + (256 - self.component as u32);
    }

    /// The foundation groups candidates of the same type gathered from the
    /// same base so that one successful check unfreezes its siblings.
    pub fn compute_foundation(&mut self) {
        let ip_word = match self.base.ip() {
            IpAddr::V4(v4) => u32::from_be_bytes(v4.octets()),
            IpAddr::V6(v6) => {
                let o = v6.octets();
                (0..4)
                    .map(|i| u32::from_be_bytes([o[i * 4], o[i * 4 + 1], o[i * 4 + 2], o[i * 4 + 3]]))
                    .fold(0u32, |acc, w| acc ^ w)
            }
        };
        self.foundation = (self.kind.code() << 24).wrapping_add(ip_word).to_string();
    }

    /// Candidate equality for deduplication: host candidates compare by
    /// base, everything else by the external address.
    pub fn same_place(&self, other: &Candidate) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match self.kind {
            CandidateType::Host => self.base == other.base,
            _ => self.addr == other.addr,
        }
    }

    /// The `a=candidate` line value (without the attribute name).
    pub fn marshal(&self) -> String {
        let foundation = if self.foundation.is_empty() {
            "16777000"
        } else {
            &self.foundation
        };
        let mut line = format!(
            "{} {} UDP {} {} {} typ {}",
            foundation,
            self.component,
            self.priority,
            self.addr.ip(),
            self.addr.port(),
            self.kind
        );
        if self.kind != CandidateType::Host {
            line.push_str(&format!(" raddr {} rport {}", self.base.ip(), self.base.port()));
        }
        line
    }

    /// Parses a candidate line value. Field case and surrounding whitespace
    /// are normalized; any transport other than UDP is rejected.
    pub fn unmarshal(line: &str) -> Result<Candidate> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(Error::ErrAttributeTooShortIceCandidate);
        }

        if !fields[2].eq_ignore_ascii_case("udp") {
            return Err(Error::ErrProtoType);
        }

        let component: u16 = fields[1].parse().map_err(|_| Error::ErrParseComponent)?;
        let priority: u32 = fields[3].parse().map_err(|_| Error::ErrParsePriority)?;
        let ip: IpAddr = fields[4].parse()?;
        let port: u16 = fields[5].parse().map_err(|_| Error::ErrParsePort)?;

        // "typ" may be spelled in any case; the type token follows it
        let typ_pos = fields
            .iter()
            .position(|f| f.eq_ignore_ascii_case("typ"))
            .ok_or(Error::ErrUnknownCandidateType)?;
        let kind = CandidateType::from_sdp_token(
            fields
                .get(typ_pos + 1)
                .ok_or(Error::ErrUnknownCandidateType)?,
        )?;

        let mut cand = Candidate::new(kind, component, SocketAddr::new(ip, port));
        cand.foundation = fields[0].to_string();
        cand.priority = priority;
        cand.ready = true;

        // optional related address
        if let Some(raddr_pos) = fields.iter().position(|f| f.eq_ignore_ascii_case("raddr")) {
            let rip: IpAddr = fields
                .get(raddr_pos + 1)
                .ok_or(Error::ErrAttributeTooShortIceCandidate)?
                .parse()?;
            let rport_pos = fields
                .iter()
                .position(|f| f.eq_ignore_ascii_case("rport"))
                .ok_or(Error::ErrParsePort)?;
            let rport: u16 = fields
                .get(rport_pos + 1)
                .ok_or(Error::ErrParsePort)?
                .parse()
                .map_err(|_| Error::ErrParsePort)?;
            cand.base = SocketAddr::new(rip, rport);
        }

        Ok(cand)
    }
}
