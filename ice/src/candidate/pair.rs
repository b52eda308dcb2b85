use std::fmt;

use stun::message::TransactionId;

use crate::candidate::Candidate;
use crate::net;

/// Connectivity-check state of a pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairState {
    Frozen,
    Waiting,
    InProgress,
    Succeeded,
    Failed,
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            PairState::Frozen => "frozen",
            PairState::Waiting => "waiting",
            PairState::InProgress => "in-progress",
            PairState::Succeeded => "succeeded",
            PairState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Scheduling role of a pair within the check list.
///
/// `None` marks a slot retired by nomination clean-up; `Valid` marks an
/// entry of the valid list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PairRole {
    None,
    Regular,
    Triggered,
    Valid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nomination {
    None,
    Started,
    Finished,
}

/// A (local, remote) candidate combination under test.
#[derive(Clone, Debug)]
pub struct CandidatePair {
    pub local: Candidate,
    pub remote: Candidate,
    pub state: PairState,
    pub role: PairRole,
    pub nomination: Nomination,
    pub priority: u64,
    pub foundation: String,
    /// The in-flight connectivity check for this pair, if any.
    pub transaction: Option<TransactionId>,
    /// True when the local side is currently the controlling agent; pair
    /// priority depends on it.
    pub local_is_controlling: bool,
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <-> {} [{} prio {}]",
            self.local, self.remote, self.state, self.priority
        )
    }
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.remote == other.remote
    }
}

impl CandidatePair {
    pub fn new(local: Candidate, remote: Candidate, local_is_controlling: bool) -> Self {
        let mut pair = CandidatePair {
            local,
            remote,
            state: PairState::Frozen,
            role: PairRole::Regular,
            nomination: Nomination::None,
            priority: 0,
            foundation: String::new(),
            transaction: None,
            local_is_controlling,
        };
        pair.update_priority();
        pair.update_foundation();
        pair
    }

    /// RFC 5245 5.7.2: with G the controlling and D the controlled candidate
    /// priority, pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D ? 1 : 0).
    pub fn update_priority(&mut self) {
        let (g, d) = if self.local_is_controlling {
            (self.local.priority as u64, self.remote.priority as u64)
        } else {
            (self.remote.priority as u64, self.local.priority as u64)
        };
        self.priority = (1u64 << 32) * g.min(d) + 2 * g.max(d) + u64::from(g > d);
    }

    pub fn update_foundation(&mut self) {
        self.foundation = format!("{}:{}", self.local.foundation, self.remote.foundation);
    }

    /// Switches the controlling side and recomputes the priority; called on
    /// role conflict resolution.
    pub fn set_controlling(&mut self, local_is_controlling: bool) {
        self.local_is_controlling = local_is_controlling;
        self.update_priority();
    }

    /// True when both ends sit on directly reachable private networks;
    /// those pairs are checked before anything going through servers.
    pub fn is_lan_only(&self) -> bool {
        net::is_lan(&self.local.addr.ip()) && net::is_lan(&self.remote.addr.ip())
    }
}
