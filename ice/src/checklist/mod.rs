#[cfg(test)]
mod checklist_test;

use std::fmt;

use stun::message::TransactionId;

use crate::candidate::pair::{CandidatePair, Nomination, PairRole, PairState};
use crate::candidate::CandidateType;
use crate::net;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckListState {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for CheckListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CheckListState::Running => "running",
            CheckListState::Completed => "completed",
            CheckListState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// How `find_equal_pair` compares the local side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairMatch {
    /// Host locals match on the interface address alone; implementations
    /// bind specific ports, so the matched local candidate is authoritative.
    TreatHostAsUniform,
    Strict,
}

/// The ordered list of candidate pairs of one stream.
#[derive(Default)]
pub struct CheckList {
    state: CheckListState,
    pairs: Vec<CandidatePair>,
}

impl Default for CheckListState {
    fn default() -> Self {
        CheckListState::Running
    }
}

impl CheckList {
    pub fn new() -> Self {
        CheckList::default()
    }

    pub fn state(&self) -> CheckListState {
        self.state
    }

    pub fn set_state(&mut self, state: CheckListState) {
        self.state = state;
    }

    pub fn pairs(&self) -> &[CandidatePair] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [CandidatePair] {
        &mut self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Inserts a pair keeping the list sorted by descending priority.
    pub fn add(&mut self, pair: CandidatePair) {
        self.pairs.push(pair);
        self.sort();
    }

    pub fn sort(&mut self) {
        self.pairs.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn clear(&mut self) {
        self.state = CheckListState::Running;
        self.pairs.clear();
    }

    /// Post-construction pruning:
    /// server-reflexive locals collapse onto their host base, duplicates by
    /// (local family, remote external, relayed) go away, relayed paths to
    /// non-public remotes go away, LAN-only pairs come first, and the list
    /// is cut to `limit`.
    pub fn prune(&mut self, limit: usize, allow_loopback: bool) {
        self.sort();

        for pair in &mut self.pairs {
            if pair.local.kind == CandidateType::ServerReflexive {
                pair.local.kind = CandidateType::Host;
                pair.local.addr = pair.local.base;
            }
        }

        self.prune_duplicates();

        self.pairs.retain(|p| {
            !(p.local.kind == CandidateType::Relay && !net::is_public(&p.remote.addr.ip()))
        });

        if !allow_loopback {
            self.pairs.retain(|p| !p.remote.addr.ip().is_loopback());
        }
        self.pairs.retain(|p| !net::is_link_local(&p.remote.addr.ip()));

        self.prune_duplicates();

        // remote SDP ordering can promote public addresses over direct LAN
        // paths; direct paths go first regardless of pair priority
        self.pairs.sort_by_key(|p| !p.is_lan_only());

        if self.pairs.len() > limit {
            log::debug!("cutting check list to {limit} entries");
            self.pairs.truncate(limit);
        }
    }

    fn prune_duplicates(&mut self) {
        let mut i = 0;
        while i < self.pairs.len() {
            let mut j = i + 1;
            while j < self.pairs.len() {
                let a = &self.pairs[i];
                let b = &self.pairs[j];
                let same_family = a.local.addr.is_ipv4() == b.local.addr.is_ipv4();
                let same_remote = a.remote.addr == b.remote.addr;
                let same_relayed = a.local.relayed() == b.local.relayed();
                if same_family && same_remote && same_relayed {
                    self.pairs.remove(j);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    /// Looks up a pair; retired entries (role None) are invisible.
    pub fn find_equal_pair(&self, probe: &CandidatePair, mode: PairMatch) -> Option<usize> {
        self.pairs.iter().position(|p| {
            if p.role == PairRole::None {
                return false;
            }
            match mode {
                PairMatch::Strict => p == probe,
                PairMatch::TreatHostAsUniform => {
                    let remotes_equal = p.remote == probe.remote;
                    if p.local.kind == CandidateType::Host
                        && probe.local.kind == CandidateType::Host
                        && remotes_equal
                    {
                        return true;
                    }
                    if p.local.kind == CandidateType::Host
                        && p.local.base == probe.local.base
                        && remotes_equal
                        && !probe.local.relayed()
                    {
                        return true;
                    }
                    p == probe
                }
            }
        })
    }

    pub fn find_by_transaction(&self, id: TransactionId) -> Option<usize> {
        self.pairs.iter().position(|p| p.transaction == Some(id))
    }

    pub fn find_nominated(&self, component: u16) -> Option<usize> {
        self.pairs.iter().position(|p| {
            p.local.component == component
                && p.role != PairRole::None
                && p.nomination == Nomination::Finished
        })
    }

    pub fn find_valid(&self, component: u16) -> Option<usize> {
        self.pairs
            .iter()
            .position(|p| p.local.component == component && p.role == PairRole::Valid)
    }

    /// The best valid pair prefers LAN-to-LAN paths over anything that
    /// crossed a server.
    pub fn find_best_valid(&self, component: u16) -> Option<usize> {
        self.pairs
            .iter()
            .position(|p| {
                p.local.component == component && p.role == PairRole::Valid && p.is_lan_only()
            })
            .or_else(|| self.find_valid(component))
    }

    pub fn find_highest_nominated(&self, component: u16) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, p) in self.pairs.iter().enumerate() {
            if p.local.component != component
                || p.role == PairRole::None
                || p.nomination != Nomination::Finished
            {
                continue;
            }
            if best.map_or(true, |b| p.priority > self.pairs[b].priority) {
                best = Some(i);
            }
        }
        best
    }

    pub fn find_lowest_nominated(&self, component: u16) -> Option<usize> {
        let mut worst: Option<usize> = None;
        for (i, p) in self.pairs.iter().enumerate() {
            if p.local.component != component
                || p.role == PairRole::None
                || p.nomination != Nomination::Finished
            {
                continue;
            }
            if worst.map_or(true, |w| p.priority < self.pairs[w].priority) {
                worst = Some(i);
            }
        }
        worst
    }

    /// Retires every pair of the component in the given state.
    pub fn remove_pairs(&mut self, state: PairState, component: u16) {
        for p in &mut self.pairs {
            if p.local.component == component && p.state == state && p.role != PairRole::None {
                p.role = PairRole::None;
            }
        }
    }

    /// Recomputes every pair priority after a role switch.
    pub fn update_pair_priorities(&mut self, local_is_controlling: bool) {
        for p in &mut self.pairs {
            p.set_controlling(local_is_controlling);
        }
        self.sort();
    }

    /// Moves frozen same-foundation pairs to waiting.
    pub fn unfreeze_foundation(&mut self, foundation: &str) {
        for p in &mut self.pairs {
            if p.foundation == foundation && p.state == PairState::Frozen {
                p.state = PairState::Waiting;
            }
        }
    }

    pub fn count_valid(&self) -> usize {
        self.pairs.iter().filter(|p| p.role == PairRole::Valid).count()
    }

    /// A non-empty list where every live pair failed has failed as a whole.
    pub fn update_state(&mut self) {
        if self.state != CheckListState::Running || self.pairs.is_empty() {
            return;
        }
        let exhausted = self
            .pairs
            .iter()
            .all(|p| p.role == PairRole::None || p.state == PairState::Failed);
        if exhausted {
            self.state = CheckListState::Failed;
        }
    }
}
