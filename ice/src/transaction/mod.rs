#[cfg(test)]
mod transaction_test;

pub mod binding;
pub mod relaying;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use stun::message::{Message, TransactionId, CLASS_INDICATION, METHOD_BINDING};

use crate::timer::PacketScheduler;

/// Terminal and non-terminal states of a client transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    Succeeded,
    Failed,
}

/// Callback of an owner-initiated TURN operation: (component, error code).
/// Error 0 is success, -1 a timeout without a numeric server code.
pub type OperationCallback = Box<dyn FnOnce(u16, i32) + Send>;

/// What the stream does when a transaction reaches a terminal state.
///
/// Actions carry no references back into the stream; the stream locates the
/// affected pair or candidate from the completion snapshot.
pub enum Action {
    /// Publish a gathering result (reflexive/relayed candidates).
    Gather,
    /// A failover loser that must release its allocation if it still wins
    /// a late success.
    GatherAutorelease,
    /// Update the pair this check belongs to.
    Check { nomination: bool },
    ChannelBind { callback: Option<OperationCallback> },
    InstallPermissions { callback: Option<OperationCallback> },
    FreeAllocation { callback: Option<OperationCallback> },
}

/// Per-kind result data surfaced to the stream on completion.
#[derive(Debug, Clone)]
pub enum CompletionDetail {
    Binding {
        mapped: Option<SocketAddr>,
        error_code: u16,
    },
    Check {
        mapped: Option<SocketAddr>,
        response_source: Option<SocketAddr>,
        error_code: u16,
        priority: u32,
    },
    Indication,
    Allocate {
        reflexive: Option<SocketAddr>,
        relayed: Option<SocketAddr>,
        lifetime: Duration,
        realm: String,
        nonce: String,
        error_code: u16,
    },
    Refresh {
        lifetime: Duration,
        reflexive: Option<SocketAddr>,
        relayed: Option<SocketAddr>,
        error_code: u16,
    },
    ChannelBind {
        number: u16,
        peer: SocketAddr,
        error_code: u16,
    },
    CreatePermission {
        error_code: u16,
    },
}

/// Snapshot handed to the stream when a transaction finishes.
pub struct Completion {
    pub id: TransactionId,
    pub state: TransactionState,
    pub component: u16,
    pub destination: SocketAddr,
    pub failover_id: u32,
    pub action: Option<Action>,
    pub detail: CompletionDetail,
}

/// The concrete request kinds a stream can have in flight.
pub enum Body {
    Binding(binding::ClientBinding),
    Check(binding::ConnectivityCheck),
    Indication(binding::BindingIndication),
    Allocate(relaying::ClientAllocate),
    Refresh(relaying::ClientRefresh),
    ChannelBind(relaying::ClientChannelBind),
    CreatePermission(relaying::ClientCreatePermission),
}

/// Outcome of feeding one message to a transaction body.
pub(crate) enum BodyOutcome {
    /// Not addressed to this transaction, or failed validation.
    Ignored,
    /// Consumed; the exchange continues with a rebuilt request (long-term
    /// credential retry).
    Continue,
    /// Consumed and terminal.
    Terminal(TransactionState),
}

impl Body {
    fn compose(&mut self, id: TransactionId) -> stun::Result<Vec<u8>> {
        match self {
            Body::Binding(b) => b.compose(id),
            Body::Check(c) => c.compose(id),
            Body::Indication(i) => i.compose(id),
            Body::Allocate(a) => a.compose(id),
            Body::Refresh(r) => r.compose(id),
            Body::ChannelBind(c) => c.compose(id),
            Body::CreatePermission(p) => p.compose(id),
        }
    }

    fn process(&mut self, msg: &Message, source: SocketAddr, id: &mut TransactionId) -> BodyOutcome {
        match self {
            Body::Binding(b) => b.process(msg, source),
            Body::Check(c) => c.process(msg, source),
            Body::Indication(_) => BodyOutcome::Ignored,
            Body::Allocate(a) => a.process(msg, source, id),
            Body::Refresh(r) => r.process(msg, source, id),
            Body::ChannelBind(c) => c.process(msg, source, id),
            Body::CreatePermission(p) => p.process(msg, source, id),
        }
    }

    fn is_auth(&self) -> bool {
        matches!(
            self,
            Body::Allocate(_) | Body::Refresh(_) | Body::ChannelBind(_) | Body::CreatePermission(_)
        )
    }

    /// Indications are fire-and-forget; nothing retransmits or times out.
    fn expects_response(&self) -> bool {
        !matches!(self, Body::Indication(_))
    }

    /// A restarted authenticated exchange may face a fresh challenge.
    fn reset_auth(&mut self) {
        match self {
            Body::Allocate(a) => a.auth.reset_for_restart(),
            Body::Refresh(r) => r.auth.reset_for_restart(),
            Body::ChannelBind(c) => c.auth.reset_for_restart(),
            Body::CreatePermission(p) => p.auth.reset_for_restart(),
            _ => {}
        }
    }

    fn detail(&self) -> CompletionDetail {
        match self {
            Body::Binding(b) => b.detail(),
            Body::Check(c) => c.detail(),
            Body::Indication(_) => CompletionDetail::Indication,
            Body::Allocate(a) => a.detail(),
            Body::Refresh(r) => r.detail(),
            Body::ChannelBind(c) => c.detail(),
            Body::CreatePermission(p) => p.detail(),
        }
    }
}

/// One client request with its retransmission schedule, destination and
/// completion action.
pub struct Transaction {
    pub id: TransactionId,
    pub destination: SocketAddr,
    pub component: u16,
    /// Sent through the TURN relay (wrapped in a Send indication) instead of
    /// directly to the destination.
    pub relayed: bool,
    pub keepalive: bool,
    pub interval: Duration,
    pub failover_id: u32,
    pub state: TransactionState,
    pub action: Option<Action>,
    pub removed: bool,
    pub body: Body,
    cancelled: bool,
    scheduler: PacketScheduler,
    outgoing: Vec<u8>,
    composed: bool,
    /// Keepalive bookkeeping: when the transaction last fired.
    last_run: Option<Instant>,
    /// False while an authenticated exchange is in flight; such a
    /// transaction runs on its RTO schedule even between keepalive fires.
    conforms_schedule: bool,
}

impl Transaction {
    pub fn new(body: Body, destination: SocketAddr, component: u16, initial_rto: Duration) -> Self {
        Transaction {
            id: TransactionId::new(),
            destination,
            component,
            relayed: false,
            keepalive: false,
            interval: Duration::ZERO,
            failover_id: 0,
            state: TransactionState::Running,
            action: None,
            removed: false,
            body,
            cancelled: false,
            scheduler: PacketScheduler::new(initial_rto),
            outgoing: Vec::new(),
            composed: false,
            last_run: None,
            conforms_schedule: true,
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Defer the first keepalive fire by one interval.
    pub fn defer_first_run(&mut self) {
        self.last_run = Some(Instant::now());
    }

    fn ensure_composed(&mut self) {
        if self.composed {
            return;
        }
        match self.body.compose(self.id) {
            Ok(bytes) => {
                self.outgoing = bytes;
                self.composed = true;
                if self.body.is_auth() {
                    self.conforms_schedule = false;
                }
            }
            Err(e) => {
                log::error!("failed to compose request: {e}");
                self.outgoing.clear();
            }
        }
    }

    /// Returns the datagram to transmit if the schedule permits.
    pub fn generate_data(&mut self, force: bool) -> Option<Vec<u8>> {
        if self.cancelled || self.removed {
            return None;
        }

        self.ensure_composed();
        if self.outgoing.is_empty() {
            return None;
        }

        if !self.body.expects_response() {
            // indications have no retransmission schedule
            return Some(self.outgoing.clone());
        }

        if !force {
            if self.scheduler.is_timeout() || self.scheduler.attempt_limit_reached() {
                return None;
            }
            if !self.scheduler.is_time_to_retransmit() {
                return None;
            }
        }

        self.scheduler.attempt_made();
        Some(self.outgoing.clone())
    }

    /// Feeds a decoded message; returns true when this transaction consumed
    /// it. A consumed message may leave the transaction Running (long-term
    /// credential retry), Succeeded or Failed.
    pub fn process_data(&mut self, msg: &Message, source: SocketAddr) -> bool {
        if self.removed || self.cancelled {
            return false;
        }

        if let Body::Indication(_) = self.body {
            // a peer's keepalive indication needs no processing
            return msg.typ.class == CLASS_INDICATION && msg.typ.method == METHOD_BINDING;
        }

        if msg.transaction_id != self.id {
            return false;
        }

        match self.body.process(msg, source, &mut self.id) {
            BodyOutcome::Ignored => false,
            BodyOutcome::Continue => {
                self.composed = false;
                self.conforms_schedule = false;
                self.scheduler.restart();
                true
            }
            BodyOutcome::Terminal(state) => {
                self.state = state;
                true
            }
        }
    }

    /// Re-arms the transaction for another exchange; used for keepalives
    /// and for checks retried after a role conflict.
    pub fn restart(&mut self) {
        self.state = TransactionState::Running;
        self.composed = false;
        self.removed = false;
        self.outgoing.clear();
        self.conforms_schedule = true;
        self.body.reset_auth();
        self.scheduler.restart();
    }

    /// Marks the transaction Failed if its retransmission schedule expired.
    pub fn is_timeout(&mut self) -> bool {
        if self.scheduler.is_timeout() {
            self.state = TransactionState::Failed;
            true
        } else {
            false
        }
    }

    /// Keepalive gating: a keepalive fires no earlier than its interval; a
    /// non-keepalive (or an in-flight authenticated exchange) runs on its
    /// RTO schedule alone.
    pub fn has_to_run_now(&mut self) -> bool {
        if !self.keepalive {
            return true;
        }

        let now = Instant::now();
        let due = match self.last_run {
            Some(ts) => {
                if now.duration_since(ts) < self.interval {
                    false
                } else {
                    self.last_run = Some(now);
                    true
                }
            }
            None => {
                self.last_run = Some(now);
                false
            }
        };

        due || (self.state == TransactionState::Running && !self.conforms_schedule)
    }

    /// Builds the completion snapshot, taking the action out of the
    /// transaction. The stream may put it back if it restarts the exchange.
    pub fn completion(&mut self) -> Completion {
        Completion {
            id: self.id,
            state: self.state,
            component: self.component,
            destination: self.destination,
            failover_id: self.failover_id,
            action: self.action.take(),
            detail: self.body.detail(),
        }
    }
}

/// Two FIFO queues of transactions. The prioritized queue drains strictly
/// before the regular one; removal is soft so that cursors stay valid while
/// the stream iterates.
#[derive(Default)]
pub struct TransactionList {
    regular: Vec<Transaction>,
    prioritized: Vec<Transaction>,
    regular_cursor: usize,
    prioritized_cursor: usize,
}

impl TransactionList {
    pub fn new() -> Self {
        TransactionList::default()
    }

    pub fn add_regular(&mut self, t: Transaction) {
        self.regular.push(t);
    }

    pub fn add_prioritized(&mut self, t: Transaction) {
        self.prioritized.push(t);
    }

    /// Moves an enqueued transaction to the prioritized queue.
    pub fn prioritize(&mut self, id: TransactionId) {
        if self.prioritized.iter().any(|t| t.id == id) {
            return;
        }
        if let Some(pos) = self.regular.iter().position(|t| t.id == id) {
            let t = self.regular.remove(pos);
            self.prioritized.push(t);
            if self.regular_cursor > pos {
                self.regular_cursor -= 1;
            }
        }
    }

    pub fn get_mut(&mut self, id: TransactionId) -> Option<&mut Transaction> {
        self.prioritized
            .iter_mut()
            .chain(self.regular.iter_mut())
            .find(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.prioritized.iter().chain(self.regular.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Transaction> {
        self.prioritized.iter_mut().chain(self.regular.iter_mut())
    }

    pub fn count(&self) -> usize {
        self.regular.len() + self.prioritized.len()
    }

    /// Offers the message to every live transaction; returns the id of the
    /// one that consumed it. The returned id is read after processing, so an
    /// authenticated retry that rotated its transaction id is still found.
    pub fn process_incoming(&mut self, msg: &Message, source: SocketAddr) -> Option<TransactionId> {
        for t in self.regular.iter_mut().chain(self.prioritized.iter_mut()) {
            if t.removed || t.state != TransactionState::Running {
                continue;
            }
            if t.process_data(msg, source) {
                return Some(t.id);
            }
        }
        None
    }

    /// Finds one expired transaction, marks it Failed and returns its id.
    pub fn check_timeout(&mut self) -> Option<TransactionId> {
        for t in self.prioritized.iter_mut().chain(self.regular.iter_mut()) {
            if t.removed || t.state != TransactionState::Running {
                continue;
            }
            if t.is_timeout() {
                log::debug!("transaction to {} timed out", t.destination);
                return Some(t.id);
            }
        }
        None
    }

    /// Round-robin pick of the next transaction that is due to run,
    /// prioritized queue first.
    pub fn next_runnable(&mut self) -> Option<TransactionId> {
        let total = self.count();
        for _ in 0..=total {
            let id = self.next_candidate()?;
            if let Some(t) = self.get_mut(id) {
                if t.has_to_run_now() {
                    return Some(id);
                }
            }
        }
        None
    }

    fn next_candidate(&mut self) -> Option<TransactionId> {
        while self.prioritized_cursor < self.prioritized.len()
            && self.prioritized[self.prioritized_cursor].removed
        {
            self.prioritized_cursor += 1;
        }
        if self.prioritized_cursor < self.prioritized.len() {
            let id = self.prioritized[self.prioritized_cursor].id;
            self.prioritized_cursor += 1;
            return Some(id);
        }

        while self.regular_cursor < self.regular.len() && self.regular[self.regular_cursor].removed
        {
            self.regular_cursor += 1;
        }
        if self.regular_cursor < self.regular.len() {
            let id = self.regular[self.regular_cursor].id;
            self.regular_cursor += 1;
            return Some(id);
        }

        // wrap both cursors
        self.prioritized_cursor = 0;
        self.regular_cursor = 0;

        while self.prioritized_cursor < self.prioritized.len()
            && self.prioritized[self.prioritized_cursor].removed
        {
            self.prioritized_cursor += 1;
        }
        if self.prioritized_cursor < self.prioritized.len() {
            let id = self.prioritized[self.prioritized_cursor].id;
            self.prioritized_cursor += 1;
            return Some(id);
        }

        while self.regular_cursor < self.regular.len() && self.regular[self.regular_cursor].removed
        {
            self.regular_cursor += 1;
        }
        if self.regular_cursor < self.regular.len() {
            let id = self.regular[self.regular_cursor].id;
            self.regular_cursor += 1;
            return Some(id);
        }

        None
    }

    /// Finishes the post-completion bookkeeping: keepalives re-arm, others
    /// are soft-removed. A transaction the stream restarted stays live.
    pub fn settle(&mut self, id: TransactionId) {
        if let Some(t) = self.get_mut(id) {
            if t.state == TransactionState::Running {
                return;
            }
            if t.keepalive {
                t.restart();
            } else {
                t.removed = true;
            }
        }
    }

    /// Soft-removes every transaction matching the predicate.
    pub fn erase_where(&mut self, pred: impl Fn(&Transaction) -> bool) {
        for t in self.regular.iter_mut().chain(self.prioritized.iter_mut()) {
            if !t.removed && pred(t) {
                t.removed = true;
            }
        }
    }

    pub fn exists_where(&self, pred: impl Fn(&Transaction) -> bool) -> bool {
        self.iter().any(|t| !t.removed && pred(t))
    }

    pub fn clear(&mut self) {
        self.regular.clear();
        self.prioritized.clear();
        self.regular_cursor = 0;
        self.prioritized_cursor = 0;
    }
}
