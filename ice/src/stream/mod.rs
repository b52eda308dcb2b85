#[cfg(test)]
mod stream_test;

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use stun::integrity::MessageIntegrity;
use stun::message::{Message, TransactionId};

use crate::agent::config::{
    AgentConfig, ALLOCATION_REFRESH_INTERVAL, PERMISSION_REFRESH_INTERVAL,
};
use crate::candidate::pair::{CandidatePair, Nomination, PairRole, PairState};
use crate::candidate::{Candidate, CandidateType};
use crate::checklist::{CheckList, CheckListState, PairMatch};
use crate::net;
use crate::timer::TickTimer;
use crate::transaction::binding::{
    BindingIndication, ClientBinding, ConnectivityCheck, RemoteRole, ServerBinding,
};
use crate::transaction::relaying::{
    build_send_indication, AuthState, ChannelNumberAllocator, ClientAllocate, ClientChannelBind,
    ClientCreatePermission, ClientRefresh,
};
use crate::transaction::{
    Action, Body, Completion, CompletionDetail, OperationCallback, Transaction, TransactionList,
    TransactionState,
};
use crate::AgentRole;

/// Life cycle of a stream: gathering, the post-gather pipeline, checks,
/// and the terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunningState {
    None,
    CandidateGathering,
    EliminateRedundant,
    ComputingFoundations,
    StartingKeepAlives,
    PrioritizingCandidates,
    ChoosingDefault,
    CreatingSdp,
    ConnCheck,
    Failed,
    Success,
}

impl std::fmt::Display for RunningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match *self {
            RunningState::None => "none",
            RunningState::CandidateGathering => "candidate-gathering",
            RunningState::EliminateRedundant => "eliminate-redundant",
            RunningState::ComputingFoundations => "computing-foundations",
            RunningState::StartingKeepAlives => "starting-keepalives",
            RunningState::PrioritizingCandidates => "prioritizing-candidates",
            RunningState::ChoosingDefault => "choosing-default",
            RunningState::CreatingSdp => "creating-sdp",
            RunningState::ConnCheck => "connectivity-checks",
            RunningState::Failed => "failed",
            RunningState::Success => "success",
        };
        write!(f, "{s}")
    }
}

/// One socket of a stream.
#[derive(Debug, Default, Clone)]
pub struct Component {
    pub tag: u64,
    pub port_v4: u16,
    pub port_v6: u16,
    nomination_wait_start: Option<Instant>,
}

/// A datagram the owner must transmit.
pub struct StreamPacket {
    pub data: Vec<u8>,
    pub destination: SocketAddr,
    pub component: u16,
    /// True for responses to the remote peer's requests.
    pub response: bool,
    pub tag: u64,
}

/// Result of one TURN channel binding.
#[derive(Debug, Clone)]
pub struct BoundChannel {
    pub component: u16,
    pub number: u16,
    pub peer: SocketAddr,
    /// Zero on success, the error code (or -1 for timeouts) otherwise.
    pub result: i32,
}

/// A single media stream: its components, candidates, check list and
/// transaction queues.
pub struct Stream {
    pub id: usize,
    /// Session ordinal carried into log lines.
    pub session_tag: u32,

    pub(crate) components: BTreeMap<u16, Component>,
    pub(crate) local_candidates: Vec<Candidate>,
    pub(crate) remote_candidates: Vec<Candidate>,
    /// Remote relay candidates parked by `delete_relayed` offers.
    pub(crate) remote_relayed: Vec<Candidate>,
    pub(crate) checklist: CheckList,
    pub(crate) transactions: TransactionList,

    pub(crate) role: AgentRole,
    pub(crate) state: RunningState,
    pub(crate) config: AgentConfig,

    pub(crate) local_ufrag: String,
    pub(crate) local_pwd: String,
    pub(crate) remote_ufrag: String,
    pub(crate) remote_pwd: String,
    pub(crate) tie_breaker: u64,

    default_candidates: BTreeMap<u16, Candidate>,
    default_changed: bool,
    pub(crate) can_transmit: bool,

    response_queue: Vec<StreamPacket>,
    tick: TickTimer,

    /// Outstanding TURN allocations; release replies decrement it.
    pub(crate) turn_allocated: u32,
    pub(crate) error_code: u16,
    cached_realm: String,
    cached_nonce: String,

    /// Synthetic foundations for peer-reflexive remotes count down from
    /// the top so they can never collide with computed ones.
    foundation_generator: u32,
    failover_id_generator: u32,
    channel_numbers: ChannelNumberAllocator,
    bound_channels: Vec<BoundChannel>,

    /// Server that answered first during gathering; later TURN traffic and
    /// relayed sends go there.
    active_server_v4: Option<SocketAddr>,
    active_server_v6: Option<SocketAddr>,
}

impl Stream {
    pub fn new(id: usize, session_tag: u32, config: AgentConfig) -> Self {
        Stream {
            id,
            session_tag,
            components: BTreeMap::new(),
            local_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            remote_relayed: Vec::new(),
            checklist: CheckList::new(),
            transactions: TransactionList::new(),
            role: AgentRole::Controlling,
            state: RunningState::None,
            config,
            local_ufrag: String::new(),
            local_pwd: String::new(),
            remote_ufrag: String::new(),
            remote_pwd: String::new(),
            tie_breaker: 0,
            default_candidates: BTreeMap::new(),
            default_changed: false,
            can_transmit: false,
            response_queue: Vec::new(),
            tick: TickTimer::default(),
            turn_allocated: 0,
            error_code: 0,
            cached_realm: String::new(),
            cached_nonce: String::new(),
            foundation_generator: u32::MAX,
            failover_id_generator: 0,
            channel_numbers: ChannelNumberAllocator::default(),
            bound_channels: Vec::new(),
            active_server_v4: None,
            active_server_v6: None,
        }
    }

    pub fn state(&self) -> RunningState {
        self.state
    }

    pub fn set_config(&mut self, config: AgentConfig) {
        self.cached_realm.clear();
        self.cached_nonce.clear();
        self.config = config;
    }

    pub fn add_component(&mut self, tag: u64, port_v4: u16, port_v6: u16) -> u16 {
        let component_id = self.components.len() as u16 + 1;
        self.components.insert(
            component_id,
            Component {
                tag,
                port_v4,
                port_v6,
                nomination_wait_start: None,
            },
        );
        component_id
    }

    pub fn has_component(&self, component: u16) -> bool {
        self.components.contains_key(&component)
    }

    pub fn set_component_ports(&mut self, component: u16, port_v4: u16, port_v6: u16) {
        if let Some(c) = self.components.get_mut(&component) {
            c.port_v4 = port_v4;
            c.port_v6 = port_v6;
        }
    }

    /// Finds the component bound to a local port of the given family.
    pub fn find_component_by_port(&self, v6: bool, port: u16) -> Option<u16> {
        self.components
            .iter()
            .find(|(_, c)| if v6 { c.port_v6 == port } else { c.port_v4 == port })
            .map(|(id, _)| *id)
    }

    // ---------------------------------------------------------- gathering

    pub fn gather_candidates(&mut self) {
        log::info!(
            "stack {}. gathering candidates, ipv4={} ipv6={}",
            self.session_tag,
            self.config.use_ipv4,
            self.config.use_ipv6
        );
        self.state = RunningState::CandidateGathering;
        self.error_code = 0;
        self.local_candidates.clear();
        self.default_candidates.clear();

        let interfaces = net::local_interfaces();
        for ip in &interfaces {
            log::debug!("    interface {ip}");
        }

        let component_ids: Vec<u16> = self.components.keys().copied().collect();
        let mut requests = 0;

        for component in component_ids {
            self.remove_binding_results(component);

            let ports = {
                let c = &self.components[&component];
                (c.port_v4, c.port_v6)
            };
            let mut want_stun = false;
            let mut want_turn = false;
            let mut want_relay_over_v6 = false;

            for ip in &interfaces {
                if ip.is_unspecified() || net::is_link_local(ip) {
                    continue;
                }
                if ip.is_loopback() && !self.config.include_loopback {
                    continue;
                }
                let v6 = !ip.is_ipv4();
                if (v6 && !self.config.use_ipv6) || (!v6 && !self.config.use_ipv4) {
                    continue;
                }
                let port = if v6 { ports.1 } else { ports.0 };
                let addr = SocketAddr::new(*ip, port);

                let mut host = Candidate::new(CandidateType::Host, component, addr);
                host.ready = true;
                self.local_candidates.push(host);

                let server_backed =
                    !v6 && self.config.use_ipv4 && !self.config.servers_v4.is_empty();

                if self.config.stun_enabled() && server_backed && !want_stun {
                    log::info!("stack {}. requesting reflexive address", self.session_tag);
                    self.local_candidates
                        .push(Candidate::new(CandidateType::ServerReflexive, component, addr));
                    want_stun = true;
                }

                if self.config.turn_enabled() && server_backed && !want_turn {
                    log::info!(
                        "stack {}. requesting relayed + reflexive addresses",
                        self.session_tag
                    );
                    self.local_candidates
                        .push(Candidate::new(CandidateType::Relay, component, addr));
                    self.local_candidates
                        .push(Candidate::new(CandidateType::ServerReflexive, component, addr));
                    want_turn = true;
                }

                if self.config.turn_enabled()
                    && v6
                    && !self.config.use_ipv4
                    && self.config.use_protocol_relay
                    && !self.config.servers_v6.is_empty()
                    && !want_relay_over_v6
                {
                    log::info!("stack {}. requesting IPv4 relay over IPv6", self.session_tag);
                    self.local_candidates
                        .push(Candidate::new(CandidateType::Relay, component, addr));
                    want_relay_over_v6 = true;
                }
            }

            if want_stun {
                requests += self.queue_bindings(component);
            }
            if want_turn {
                requests += self.queue_allocations(component, false, false);
            }
            if want_relay_over_v6 {
                requests += self.queue_allocations(component, true, false);
            }
        }

        if requests == 0 {
            self.state = RunningState::EliminateRedundant;
            self.process_state_chain();
        }
    }

    /// One Binding request per configured server; the failover set shares
    /// one id so the first responder can cancel the rest.
    fn queue_bindings(&mut self, component: u16) -> usize {
        self.failover_id_generator += 1;
        let failover_id = self.failover_id_generator;
        let servers = self.config.servers_v4.clone();
        for server in &servers {
            let mut t = Transaction::new(
                Body::Binding(ClientBinding::default()),
                *server,
                component,
                self.config.initial_rto,
            );
            t.failover_id = failover_id;
            t.action = Some(Action::Gather);
            self.transactions.add_regular(t);
        }
        servers.len()
    }

    fn queue_allocations(&mut self, component: u16, wire_v6: bool, alloc_v6: bool) -> usize {
        self.failover_id_generator += 1;
        let failover_id = self.failover_id_generator;
        let servers = if wire_v6 {
            self.config.servers_v6.clone()
        } else {
            self.config.servers_v4.clone()
        };
        for server in &servers {
            let auth = AuthState::new(
                self.config.turn_username.clone(),
                self.config.turn_password.clone(),
                self.cached_realm.clone(),
                self.cached_nonce.clone(),
            );
            let mut allocate = ClientAllocate::new(auth, self.config.turn_lifetime);
            allocate.wire_v6 = wire_v6;
            allocate.alloc_v6 = alloc_v6;
            let mut t = Transaction::new(
                Body::Allocate(allocate),
                *server,
                component,
                self.config.initial_rto,
            );
            t.failover_id = failover_id;
            t.action = Some(Action::Gather);
            self.transactions.add_regular(t);
        }
        servers.len()
    }

    fn handle_gather_in(&mut self, msg: &Message, source: SocketAddr) -> bool {
        let Some(id) = self.transactions.process_incoming(msg, source) else {
            return false;
        };
        self.handle_transaction_update(id);
        true
    }

    fn update_gather_progress(&mut self) {
        if self.state != RunningState::CandidateGathering || self.local_candidates.is_empty() {
            return;
        }

        let all_ready = self.local_candidates.iter().all(|c| c.ready);
        if all_ready && self.local_candidates.iter().all(|c| !c.failed) {
            log::info!("stack {}. all candidates gathered", self.session_tag);
            self.state = RunningState::EliminateRedundant;
            return;
        }

        // some candidate failed; wait for the remaining failover requests
        let pending = self.transactions.exists_where(|t| {
            t.state == TransactionState::Running
                && matches!(t.action, Some(Action::Gather) | Some(Action::GatherAutorelease))
        });
        if pending {
            return;
        }

        for c in &mut self.local_candidates {
            if !c.ready {
                c.ready = true;
                c.failed = true;
            }
        }

        let relays: Vec<&Candidate> = self
            .local_candidates
            .iter()
            .filter(|c| c.kind == CandidateType::Relay)
            .collect();
        let relay_failed = !relays.is_empty() && relays.iter().all(|c| c.failed);
        if self.config.turn_enabled() && relay_failed {
            log::warn!("stack {}. all relay allocations failed", self.session_tag);
            self.state = RunningState::Failed;
        } else {
            self.state = RunningState::EliminateRedundant;
        }
    }

    // ------------------------------------------------- completion dispatch

    fn handle_transaction_update(&mut self, id: TransactionId) {
        let completion = match self.transactions.get_mut(id) {
            Some(t) if t.state != TransactionState::Running => t.completion(),
            _ => return,
        };
        self.dispatch_completion(completion);
        self.transactions.settle(id);

        if self.state == RunningState::CandidateGathering {
            self.update_gather_progress();
            self.process_state_chain();
        }
    }

    fn dispatch_completion(&mut self, mut c: Completion) {
        // an allocation release concluded, with or without a dedicated action
        if let CompletionDetail::Refresh { lifetime, .. } = &c.detail {
            if lifetime.is_zero() {
                if self.turn_allocated > 0 {
                    self.turn_allocated -= 1;
                }
                if c.state == TransactionState::Failed {
                    log::warn!(
                        "stack {}. allocation release failed with {}",
                        self.session_tag,
                        self.error_of(&c)
                    );
                } else {
                    log::debug!("stack {}. TURN allocation deleted", self.session_tag);
                }
            }
        }

        match c.action.take() {
            Some(Action::Gather) => match c.detail {
                CompletionDetail::Binding { .. } => self.finish_gather_binding(c),
                CompletionDetail::Allocate { .. } => self.finish_gather_allocate(c, false),
                _ => {}
            },
            Some(Action::GatherAutorelease) => {
                if let CompletionDetail::Allocate { .. } = c.detail {
                    self.finish_gather_allocate(c, true);
                }
            }
            Some(Action::Check { nomination }) => self.finish_check(c, nomination),
            Some(Action::ChannelBind { callback }) => self.finish_channel_bind(c, callback),
            Some(Action::InstallPermissions { callback }) => self.finish_permissions(c, callback),
            Some(Action::FreeAllocation { callback }) => {
                let code = if c.state == TransactionState::Failed {
                    self.error_of(&c)
                } else {
                    0
                };
                if let Some(cb) = callback {
                    cb(c.component, code);
                }
            }
            None => {}
        }
    }

    fn error_of(&self, c: &Completion) -> i32 {
        let code = match &c.detail {
            CompletionDetail::Binding { error_code, .. }
            | CompletionDetail::Check { error_code, .. }
            | CompletionDetail::Allocate { error_code, .. }
            | CompletionDetail::Refresh { error_code, .. }
            | CompletionDetail::ChannelBind { error_code, .. }
            | CompletionDetail::CreatePermission { error_code } => *error_code,
            CompletionDetail::Indication => 0,
        };
        if code == 0 {
            -1
        } else {
            code as i32
        }
    }

    fn finish_gather_binding(&mut self, c: Completion) {
        let CompletionDetail::Binding { mapped, error_code } = c.detail else {
            return;
        };
        let failed = c.state == TransactionState::Failed;

        for cand in &mut self.local_candidates {
            if cand.kind == CandidateType::ServerReflexive && cand.component == c.component {
                cand.ready = true;
                cand.failed = failed;
                if let (false, Some(mapped)) = (failed, mapped) {
                    cand.addr = mapped;
                }
            }
        }

        if !failed {
            log::info!(
                "stack {}. gathered reflexive address {:?}",
                self.session_tag,
                mapped
            );
            self.remove_gather_requests(c.component, c.failover_id, c.id);
            self.active_server_v4 = Some(c.destination);

            // keepalive binding toward the responding server holds the
            // NAT mapping open
            let mut keepalive = Transaction::new(
                Body::Binding(ClientBinding::default()),
                c.destination,
                c.component,
                self.config.initial_rto,
            );
            keepalive.keepalive = true;
            keepalive.interval = self.config.keepalive_interval;
            keepalive.defer_first_run();
            self.transactions.add_regular(keepalive);
        } else {
            log::warn!("stack {}. failed to gather reflexive candidate", self.session_tag);
            self.error_code = error_code;
        }
    }

    fn finish_gather_allocate(&mut self, c: Completion, autorelease: bool) {
        let CompletionDetail::Allocate {
            reflexive,
            relayed,
            lifetime,
            realm,
            nonce,
            error_code,
        } = c.detail
        else {
            return;
        };
        let failed = c.state == TransactionState::Failed;

        if autorelease {
            if !failed {
                log::info!(
                    "stack {}. releasing surplus failover allocation on {}",
                    self.session_tag,
                    c.destination
                );
                self.turn_allocated += 1;
                let auth = AuthState::new(
                    self.config.turn_username.clone(),
                    self.config.turn_password.clone(),
                    realm,
                    nonce,
                );
                let release = ClientRefresh::new(auth, Duration::ZERO);
                let t = Transaction::new(
                    Body::Refresh(release),
                    c.destination,
                    c.component,
                    self.config.initial_rto,
                );
                self.transactions.add_regular(t);
            }
            return;
        }

        if !realm.is_empty() && !nonce.is_empty() {
            self.cached_realm = realm.clone();
            self.cached_nonce = nonce.clone();
        }

        for cand in &mut self.local_candidates {
            if cand.component != c.component || (cand.ready && !cand.failed) {
                continue;
            }
            cand.ready = true;
            cand.failed = failed;
            if !failed {
                match cand.kind {
                    CandidateType::ServerReflexive => {
                        if let Some(reflexive) = reflexive {
                            cand.addr = reflexive;
                        }
                    }
                    CandidateType::Relay => {
                        if let Some(relayed) = relayed {
                            cand.addr = relayed;
                        }
                    }
                    _ => {}
                }
            }
        }

        if !failed {
            log::info!(
                "stack {}. gathered reflexive {:?} and relayed {:?}",
                self.session_tag,
                reflexive,
                relayed
            );
            self.remove_gather_requests(c.component, c.failover_id, c.id);
            if c.destination.is_ipv6() {
                self.active_server_v6 = Some(c.destination);
            } else {
                self.active_server_v4 = Some(c.destination);
            }

            let auth = AuthState::new(
                self.config.turn_username.clone(),
                self.config.turn_password.clone(),
                realm,
                nonce,
            );
            let mut refresh = ClientRefresh::new(auth, lifetime);
            refresh.reflexive = reflexive;
            refresh.relayed = relayed;
            let mut t = Transaction::new(
                Body::Refresh(refresh),
                c.destination,
                c.component,
                self.config.initial_rto,
            );
            t.keepalive = true;
            t.interval = ALLOCATION_REFRESH_INTERVAL
                .min(lifetime / 2)
                .max(Duration::from_secs(1));
            t.defer_first_run();
            self.turn_allocated += 1;
            self.transactions.add_regular(t);
        } else {
            log::warn!(
                "stack {}. failed to gather relayed/reflexive addresses ({error_code})",
                self.session_tag
            );
            // with a single server a stale allocation can be resurrected
            // from a soft-removed refresh
            let mut resurrected = false;
            if self.config.servers_v4.len() < 2 && error_code == 437 {
                resurrected = self.resurrect_allocation(c.component);
                if resurrected {
                    self.turn_allocated += 1;
                    log::warn!(
                        "stack {}. resurrected previous allocation, error suppressed",
                        self.session_tag
                    );
                }
            }
            if !resurrected {
                self.error_code = error_code;
            }
        }
    }

    /// Cancels the remaining failover requests once one of them won: other
    /// bindings disappear; allocate losers switch to auto-release so a late
    /// grant is returned to the server.
    fn remove_gather_requests(&mut self, component: u16, failover_id: u32, winner: TransactionId) {
        for t in self.transactions.iter_mut() {
            if t.removed
                || t.id == winner
                || t.component != component
                || t.failover_id != failover_id
                || t.action.is_none()
            {
                continue;
            }
            match t.body {
                Body::Binding(_) => t.removed = true,
                Body::Allocate(_) => t.action = Some(Action::GatherAutorelease),
                _ => {}
            }
        }
    }

    fn resurrect_allocation(&mut self, component: u16) -> bool {
        let mut chosen: Option<(TransactionId, Option<SocketAddr>, Option<SocketAddr>)> = None;
        for t in self.transactions.iter() {
            if !t.removed || t.component != component {
                continue;
            }
            if let Body::Refresh(r) = &t.body {
                // most recently created removed refresh wins
                chosen = Some((t.id, r.reflexive, r.relayed));
            }
        }
        let Some((id, reflexive, relayed)) = chosen else {
            return false;
        };

        if let Some(t) = self.transactions.get_mut(id) {
            t.removed = false;
        }
        for cand in &mut self.local_candidates {
            if cand.component != component {
                continue;
            }
            cand.ready = true;
            cand.failed = false;
            match cand.kind {
                CandidateType::ServerReflexive => {
                    if let Some(reflexive) = reflexive {
                        cand.addr = reflexive;
                    }
                }
                CandidateType::Relay => {
                    if let Some(relayed) = relayed {
                        cand.addr = relayed;
                    }
                }
                _ => {}
            }
        }
        true
    }

    // ------------------------------------------------ post-gather pipeline

    pub(crate) fn process_state_chain(&mut self) {
        if self.state == RunningState::EliminateRedundant {
            self.eliminate_redundant();
        }
        if self.state == RunningState::ComputingFoundations {
            self.compute_foundations();
        }
        if self.state == RunningState::StartingKeepAlives {
            // keepalives were armed as their transactions completed
            self.state = RunningState::PrioritizingCandidates;
        }
        if self.state == RunningState::PrioritizingCandidates {
            self.prioritize_candidates();
        }
        if self.state == RunningState::ChoosingDefault {
            self.choose_defaults();
            self.state = RunningState::CreatingSdp;
        }
    }

    fn eliminate_redundant(&mut self) {
        self.local_candidates.retain(|c| !c.failed);
        // candidates sharing an external address collapse; host wins over
        // the server-derived duplicates
        self.local_candidates
            .sort_by_key(|c| (c.component, c.addr, c.kind.preference()));
        self.local_candidates
            .dedup_by(|a, b| a.component == b.component && a.addr == b.addr);
        self.state = RunningState::ComputingFoundations;
    }

    fn compute_foundations(&mut self) {
        for c in &mut self.local_candidates {
            c.compute_foundation();
        }
        self.state = RunningState::StartingKeepAlives;
    }

    fn prioritize_candidates(&mut self) {
        for c in &mut self.local_candidates {
            c.compute_priority();
        }
        self.local_candidates
            .sort_by(|a, b| a.component.cmp(&b.component).then(b.priority.cmp(&a.priority)));
        self.state = RunningState::ChoosingDefault;
    }

    pub(crate) fn choose_defaults(&mut self) {
        self.default_candidates.clear();
        let component_ids: Vec<u16> = self.components.keys().copied().collect();
        for component in component_ids {
            if let Some(cand) = self.find_default_candidate(component) {
                self.default_candidates.insert(component, cand);
            }
        }
    }

    /// Default per component: the reflexive candidate when one exists, else
    /// the host candidate on the best route toward the configured target,
    /// else the first host candidate.
    fn find_default_candidate(&self, component: u16) -> Option<Candidate> {
        let of_component: Vec<&Candidate> = self
            .local_candidates
            .iter()
            .filter(|c| c.component == component && c.ready && !c.failed)
            .collect();

        if let Some(reflexive) = of_component
            .iter()
            .find(|c| c.kind == CandidateType::ServerReflexive)
        {
            return Some((*reflexive).clone());
        }

        if let Some(best_ip) = net::best_source_interface(self.config.fallback_target_ip) {
            if let Some(host) = of_component
                .iter()
                .find(|c| c.kind == CandidateType::Host && c.base.ip() == best_ip)
            {
                return Some((*host).clone());
            }
        }

        of_component
            .iter()
            .find(|c| c.kind == CandidateType::Host)
            .map(|c| (*c).clone())
    }

    pub fn default_address(&self, component: u16) -> Option<SocketAddr> {
        if let Some(c) = self.default_candidates.get(&component) {
            return Some(c.addr);
        }
        let comp = self.components.get(&component)?;
        let ip = net::best_source_interface(self.config.fallback_target_ip)?;
        Some(SocketAddr::new(ip, comp.port_v4))
    }

    pub fn candidate_lines(&self, component: Option<u16>) -> Vec<String> {
        self.local_candidates
            .iter()
            .filter(|c| component.map_or(true, |id| c.component == id) && c.ready && !c.failed)
            .map(|c| c.marshal())
            .collect()
    }

    // --------------------------------------------------------- SDP intake

    /// Feeds the remote candidate lines of an offer or answer. Returns true
    /// when the given default address is among the remote candidates.
    pub fn process_sdp_offer(
        &mut self,
        candidate_lines: &[String],
        default_addr: Option<SocketAddr>,
        delete_relayed: bool,
    ) -> bool {
        if candidate_lines.is_empty() {
            // a no-candidate answer can still require TURN permissions for
            // its default address
            if self.state >= RunningState::CreatingSdp && self.config.turn_enabled() {
                if let Some(addr) = default_addr {
                    log::debug!("installing permissions for default address {addr}");
                    self.install_permissions(None, Some(addr), None);
                }
            }
            return false;
        }

        let mut seen_components = HashSet::new();
        for line in candidate_lines.iter().take(self.config.candidate_limit) {
            let cand = match Candidate::unmarshal(line) {
                Ok(cand) => cand,
                Err(e) => {
                    log::warn!("rejecting remote candidate line {line:?}: {e}");
                    continue;
                }
            };
            seen_components.insert(cand.component);

            match self
                .remote_candidates
                .iter_mut()
                .find(|c| c.addr == cand.addr && c.component == cand.component)
            {
                Some(existing) => {
                    log::info!(
                        "stack {}. remote candidate {} already known, updating priority",
                        self.session_tag,
                        cand.addr
                    );
                    existing.priority = cand.priority;
                }
                None => {
                    log::info!(
                        "stack {}. remote candidate {} added",
                        self.session_tag,
                        cand.addr
                    );
                    self.remote_candidates.push(cand);
                }
            }
        }

        // components missing from the offer are gone
        self.components.retain(|id, _| seen_components.contains(id));
        if self.components.is_empty() {
            log::warn!("offer carries no usable components");
            return false;
        }

        let result = default_addr.map_or(false, |addr| {
            self.remote_candidates.iter().any(|c| c.addr == addr)
        });

        if delete_relayed {
            self.remote_relayed.clear();
            let (relayed, direct): (Vec<Candidate>, Vec<Candidate>) = self
                .remote_candidates
                .drain(..)
                .partition(|c| c.kind == CandidateType::Relay);
            self.remote_relayed = relayed;
            self.remote_candidates = direct;
        }

        result
    }

    pub fn remote_candidate_listed(&self, addr: SocketAddr) -> bool {
        self.remote_candidates.iter().any(|c| c.addr == addr)
    }

    // ----------------------------------------------------------- checking

    pub fn start_checks(&mut self) {
        self.state = RunningState::ConnCheck;
        self.error_code = 0;

        if self.config.turn_enabled() {
            self.install_permissions(None, None, None);
        }

        self.create_check_list();
        self.tick.start(self.config.tick_interval);
    }

    fn create_check_list(&mut self) {
        let component_ids: Vec<u16> = self.components.keys().copied().collect();
        let controlling = self.role == AgentRole::Controlling;

        for component in component_ids {
            let locals: Vec<Candidate> = self
                .local_candidates
                .iter()
                .filter(|c| c.component == component && c.ready && !c.failed)
                .take(self.config.candidate_limit)
                .cloned()
                .collect();
            let remotes: Vec<Candidate> = self
                .remote_candidates
                .iter()
                .filter(|c| c.component == component && c.kind != CandidateType::PeerReflexive)
                .take(self.config.candidate_limit)
                .cloned()
                .collect();

            for local in &locals {
                for remote in &remotes {
                    if local.addr.is_ipv4() != remote.addr.is_ipv4() {
                        continue;
                    }
                    if local.kind == CandidateType::Relay && !net::is_public(&remote.addr.ip()) {
                        continue;
                    }
                    self.checklist
                        .add(CandidatePair::new(local.clone(), remote.clone(), controlling));
                }
            }
        }

        self.checklist
            .prune(self.config.check_list_limit, self.config.include_loopback);

        // the first pair of every foundation starts Waiting, the rest stay
        // Frozen until a sibling succeeds
        let mut seen = HashSet::new();
        for pair in self.checklist.pairs_mut() {
            if seen.insert(pair.foundation.clone()) {
                pair.state = PairState::Waiting;
            } else {
                pair.state = PairState::Frozen;
            }
        }

        log::info!(
            "stack {}. created check list with {} pairs",
            self.session_tag,
            self.checklist.len()
        );
    }

    fn create_check_request(&self, pair: &CandidatePair) -> Transaction {
        // PRIORITY announces the would-be peer-reflexive candidate
        let priority = ((CandidateType::PeerReflexive.preference() as u32) << 24)
            + ((pair.local.interface_priority as u32) << 8)
            + (256 - pair.local.component as u32);

        let mut check = ConnectivityCheck::new(
            format!("{}:{}", self.remote_ufrag, self.local_ufrag),
            self.remote_pwd.clone(),
            self.role,
            self.tie_breaker,
            priority,
        );
        if self.config.aggressive_nomination && self.role == AgentRole::Controlling {
            check.use_candidate = true;
        }

        let mut t = Transaction::new(
            Body::Check(check),
            pair.remote.addr,
            pair.local.component,
            self.config.initial_rto,
        );
        t.relayed = pair.local.kind == CandidateType::Relay;
        t.action = Some(Action::Check { nomination: false });

        log::info!(
            "stack {}. created {} for {}",
            self.session_tag,
            if t.relayed { "relayed check" } else { "check" },
            pair
        );
        t
    }

    /// Creates the check for the next pair with the given role and state.
    fn run_check_list(&mut self, role: PairRole, state: PairState) -> Option<TransactionId> {
        let idx = self
            .checklist
            .pairs()
            .iter()
            .position(|p| p.role == role && p.transaction.is_none() && p.state == state)?;

        let t = self.create_check_request(&self.checklist.pairs()[idx]);
        let id = t.id;
        {
            let pair = &mut self.checklist.pairs_mut()[idx];
            pair.transaction = Some(id);
            pair.state = PairState::InProgress;
        }
        if role == PairRole::Triggered {
            self.transactions.add_prioritized(t);
        } else {
            self.transactions.add_regular(t);
        }
        Some(id)
    }

    pub(crate) fn check_timeouts(&mut self) {
        if let Some(id) = self.transactions.check_timeout() {
            self.handle_transaction_update(id);
        }
    }

    pub fn get_data_to_send(&mut self) -> Option<StreamPacket> {
        if !self.response_queue.is_empty() {
            return Some(self.response_queue.remove(0));
        }
        self.handle_checks_out()
    }

    fn handle_checks_out(&mut self) -> Option<StreamPacket> {
        self.check_nominated_all();

        if self.tick.is_time_to_send() {
            if self
                .run_check_list(PairRole::Triggered, PairState::Waiting)
                .is_none()
                && self
                    .run_check_list(PairRole::Regular, PairState::Waiting)
                    .is_none()
            {
                // unfreeze the best frozen pair
                self.run_check_list(PairRole::Regular, PairState::Frozen);
            }
        }

        let id = self.transactions.next_runnable()?;
        let (data, destination, component, relayed) = {
            let t = self.transactions.get_mut(id)?;
            let data = t.generate_data(false)?;
            (data, t.destination, t.component, t.relayed)
        };
        let tag = self.components.get(&component).map_or(0, |c| c.tag);

        let packet = if relayed {
            let relay = self.active_server()?;
            let wrapped = match build_send_indication(destination, &data) {
                Ok(wrapped) => wrapped,
                Err(e) => {
                    log::error!("failed to build send indication: {e}");
                    return None;
                }
            };
            StreamPacket {
                data: wrapped,
                destination: relay,
                component,
                response: false,
                tag,
            }
        } else {
            StreamPacket {
                data,
                destination,
                component,
                response: false,
                tag,
            }
        };
        Some(packet)
    }

    fn active_server(&self) -> Option<SocketAddr> {
        self.active_server_v4
            .or(self.active_server_v6)
            .or_else(|| self.config.servers_v4.first().copied())
            .or_else(|| self.config.servers_v6.first().copied())
    }

    // ----------------------------------------------------- incoming STUN

    /// Feeds one decoded STUN message. `relayed` marks messages that
    /// arrived encapsulated through the TURN relay.
    pub fn process_data(
        &mut self,
        msg: &Message,
        source: SocketAddr,
        component: u16,
        relayed: bool,
    ) -> bool {
        if self.state < RunningState::CreatingSdp {
            let result = self.handle_gather_in(msg, source);
            if result {
                self.process_state_chain();
            }
            return result;
        }

        if self.handle_checks_in(msg, source) {
            if self.state >= RunningState::ConnCheck {
                self.check_nominated_all();
            }
            return true;
        }

        self.handle_incoming_request(msg, source, component, relayed);

        self.checklist.update_state();
        if self.checklist.state() == CheckListState::Failed {
            if self.state != RunningState::Failed && self.state > RunningState::CandidateGathering {
                log::warn!("stack {}. check list failed", self.session_tag);
                self.state = RunningState::Failed;
                self.clear_failed_checks();
            }
        } else {
            self.check_nominated_all();
        }
        true
    }

    fn handle_checks_in(&mut self, msg: &Message, source: SocketAddr) -> bool {
        let Some(id) = self.transactions.process_incoming(msg, source) else {
            return false;
        };
        self.handle_transaction_update(id);
        true
    }

    fn handle_incoming_request(
        &mut self,
        msg: &Message,
        source: SocketAddr,
        component: u16,
        relayed: bool,
    ) {
        let Some(mut binding) = ServerBinding::from_request(msg, source) else {
            return;
        };

        if !binding.bad_request {
            // authenticated against our own password
            let mut copy = msg.clone();
            let integrity = MessageIntegrity::new_short_term(&self.local_pwd);
            if integrity.check(&mut copy).is_err() {
                log::debug!("dropping binding request failing the integrity check");
                return;
            }

            let same_role = matches!(
                (binding.remote_role, self.role),
                (RemoteRole::Controlling, AgentRole::Controlling)
                    | (RemoteRole::Controlled, AgentRole::Controlled)
            );
            if same_role {
                self.handle_role_conflict(&mut binding);
            } else {
                log::info!(
                    "stack {}. got a binding request from {}",
                    self.session_tag,
                    source
                );
                self.handle_binding_request(&binding, component, relayed);
            }
        }

        // responses need the credentials from the SDP exchange
        if self.local_pwd.is_empty() || self.remote_ufrag.is_empty() {
            return;
        }

        let response = match binding.generate_response(&self.local_pwd) {
            Ok(response) => response,
            Err(e) => {
                log::error!("failed to build binding response: {e}");
                return;
            }
        };
        let tag = self.components.get(&component).map_or(0, |c| c.tag);

        let packet = if relayed {
            let Some(relay) = self.active_server() else {
                return;
            };
            match build_send_indication(source, &response) {
                Ok(wrapped) => StreamPacket {
                    data: wrapped,
                    destination: relay,
                    component,
                    response: true,
                    tag,
                },
                Err(e) => {
                    log::error!("failed to wrap binding response: {e}");
                    return;
                }
            }
        } else {
            StreamPacket {
                data: response,
                destination: source,
                component,
                response: true,
                tag,
            }
        };
        self.response_queue.push(packet);
    }

    /// RFC 5245 7.2.1.1: the side with the higher tie-breaker keeps its
    /// role and answers 487; the other side switches.
    fn handle_role_conflict(&mut self, binding: &mut ServerBinding) {
        log::warn!(
            "stack {}. role conflict, local role {} remote tie-breaker 0x{:x}",
            self.session_tag,
            self.role,
            binding.remote_tie_breaker
        );

        match self.role {
            AgentRole::Controlling => {
                if self.tie_breaker >= binding.remote_tie_breaker {
                    binding.set_role_conflict();
                    return;
                }
                self.role = AgentRole::Controlled;
            }
            AgentRole::Controlled => {
                if self.tie_breaker < binding.remote_tie_breaker {
                    binding.set_role_conflict();
                    return;
                }
                self.role = AgentRole::Controlling;
            }
        }

        self.checklist
            .update_pair_priorities(self.role == AgentRole::Controlling);
    }

    fn handle_binding_request(&mut self, binding: &ServerBinding, component: u16, relayed: bool) {
        if !self.components.contains_key(&component) {
            return;
        }
        let source = binding.source;

        // an unknown source is a new peer-reflexive remote candidate; it is
        // recorded but never cross-paired
        let remote_idx = match self
            .remote_candidates
            .iter()
            .position(|c| c.addr == source && c.component == component)
        {
            Some(idx) => idx,
            None => {
                log::info!(
                    "stack {}. creating peer-reflexive remote candidate for {}",
                    self.session_tag,
                    source
                );
                let mut cand = Candidate::new(CandidateType::PeerReflexive, component, source);
                cand.priority = binding.priority.unwrap_or(0);
                self.foundation_generator = self.foundation_generator.wrapping_sub(1);
                cand.foundation = self.foundation_generator.to_string();
                self.remote_candidates.push(cand);
                self.remote_candidates.len() - 1
            }
        };

        // local side of the pair: the interface the request arrived on; for
        // relayed receipt that is the relay candidate of the component
        let mut interface_addr = None;
        if relayed {
            interface_addr = self
                .local_candidates
                .iter()
                .find(|c| c.kind == CandidateType::Relay && c.component == component)
                .map(|c| c.addr);
        }
        let interface_addr = interface_addr.or_else(|| {
            let ip = net::best_source_interface(source.ip())?;
            let comp = self.components.get(&component)?;
            let port = if source.is_ipv6() {
                comp.port_v6
            } else {
                comp.port_v4
            };
            Some(SocketAddr::new(ip, port))
        });
        let Some(interface_addr) = interface_addr else {
            return;
        };

        let Some(local_idx) = self
            .local_candidates
            .iter()
            .position(|c| c.addr == interface_addr)
        else {
            log::warn!(
                "stack {}. no local candidate for {}, ignoring binding request",
                self.session_tag,
                interface_addr
            );
            return;
        };

        let mut probe = CandidatePair::new(
            self.local_candidates[local_idx].clone(),
            self.remote_candidates[remote_idx].clone(),
            self.role == AgentRole::Controlling,
        );
        if self.role == AgentRole::Controlled && binding.use_candidate {
            log::info!(
                "stack {}. pair {} nominated by incoming use-candidate",
                self.session_tag,
                probe
            );
            probe.nomination = Nomination::Finished;
        }

        match self
            .checklist
            .find_equal_pair(&probe, PairMatch::TreatHostAsUniform)
        {
            Some(idx) => {
                if probe.nomination == Nomination::Finished {
                    self.checklist.pairs_mut()[idx].nomination = Nomination::Finished;
                }

                let (pair_state, pair_role) = {
                    let p = &self.checklist.pairs()[idx];
                    (p.state, p.role)
                };
                log::info!(
                    "stack {}. pair already in check list, state {}",
                    self.session_tag,
                    pair_state
                );

                if self.config.treat_request_as_confirmation
                    && pair_state == PairState::InProgress
                {
                    // treat the reverse-direction request as proof of
                    // reachability (off by default, violates the RFC)
                    let pair = &mut self.checklist.pairs_mut()[idx];
                    pair.state = PairState::Succeeded;
                    pair.role = PairRole::Valid;
                    let foundation = pair.foundation.clone();
                    self.checklist.unfreeze_foundation(&foundation);
                    return;
                }

                match pair_state {
                    PairState::Frozen | PairState::Waiting => {
                        let pair = &mut self.checklist.pairs_mut()[idx];
                        pair.role = PairRole::Triggered;
                        pair.state = PairState::Waiting;
                    }
                    PairState::InProgress if pair_role == PairRole::Regular => {
                        // cancel the in-flight check, queue a fresh
                        // prioritized one
                        if let Some(tid) = self.checklist.pairs()[idx].transaction {
                            self.transactions.erase_where(|t| t.id == tid);
                        }
                        {
                            let pair = &mut self.checklist.pairs_mut()[idx];
                            pair.state = PairState::Waiting;
                            pair.role = PairRole::Triggered;
                        }
                        let mut t = self.create_check_request(&self.checklist.pairs()[idx]);
                        if relayed {
                            t.relayed = true;
                        }
                        let tid = t.id;
                        self.checklist.pairs_mut()[idx].transaction = Some(tid);
                        self.transactions.add_prioritized(t);
                    }
                    PairState::Failed => {
                        let pair = &mut self.checklist.pairs_mut()[idx];
                        pair.state = PairState::Waiting;
                        pair.role = PairRole::Triggered;
                    }
                    _ => {}
                }
            }
            None => {
                probe.state = PairState::Waiting;
                probe.role = PairRole::Triggered;
                log::info!(
                    "stack {}. adding triggered pair {} to check list",
                    self.session_tag,
                    probe
                );
                self.checklist.add(probe);
            }
        }
    }

    // ------------------------------------------------- check completions

    fn finish_check(&mut self, c: Completion, nomination: bool) {
        let CompletionDetail::Check {
            mapped,
            response_source,
            error_code,
            priority,
        } = c.detail
        else {
            return;
        };

        // role conflict answer: switch away from the role the check was
        // sent with and replay it. A stale 487 for a check sent before an
        // earlier correction changes nothing.
        if c.state == TransactionState::Failed && error_code == 487 {
            let check_role = match self.transactions.get_mut(c.id) {
                Some(t) => match &t.body {
                    Body::Check(check) => check.role,
                    _ => self.role,
                },
                None => self.role,
            };
            let corrected = check_role.flipped();
            if self.role != corrected {
                log::warn!(
                    "stack {}. 487 received, switching role to {corrected}",
                    self.session_tag
                );
                self.role = corrected;
                self.checklist
                    .update_pair_priorities(self.role == AgentRole::Controlling);
            }
            let role = self.role;
            if let Some(t) = self.transactions.get_mut(c.id) {
                if let Body::Check(check) = &mut t.body {
                    check.role = role;
                }
                t.action = Some(Action::Check { nomination });
                t.restart();
            }
            return;
        }

        let Some(idx) = self.checklist.find_by_transaction(c.id) else {
            return;
        };
        let mut success = c.state == TransactionState::Succeeded;

        if success && nomination && self.checklist.pairs()[idx].nomination != Nomination::Finished
        {
            log::info!(
                "stack {}. response for nominated request received",
                self.session_tag
            );
            let (remote_addr, foundation) = {
                let pair = &mut self.checklist.pairs_mut()[idx];
                pair.nomination = Nomination::Finished;
                (pair.remote.addr, pair.foundation.clone())
            };
            self.add_keepalive_check(c.component, remote_addr);
            self.checklist.unfreeze_foundation(&foundation);
            self.check_nominated_all();
            return;
        }

        // the response must come back from the address the request went to
        if success {
            success &= response_source == Some(self.checklist.pairs()[idx].remote.addr);
        }

        log::info!(
            "stack {}. check {} is {}",
            self.session_tag,
            self.checklist.pairs()[idx],
            if success { "ok" } else { "failed" }
        );

        if !success {
            let pair = &mut self.checklist.pairs_mut()[idx];
            pair.state = PairState::Failed;
            pair.transaction = None;
            self.checklist.update_state();
            if self.checklist.state() == CheckListState::Failed
                && self.state > RunningState::CandidateGathering
                && self.state != RunningState::Failed
            {
                log::warn!("stack {}. all checks failed", self.session_tag);
                self.state = RunningState::Failed;
                self.clear_failed_checks();
            }
            return;
        }

        let foundation = {
            let pair = &mut self.checklist.pairs_mut()[idx];
            pair.state = PairState::Succeeded;
            pair.foundation.clone()
        };

        let Some(mapped_addr) = mapped else {
            return;
        };
        let known_local = self
            .local_candidates
            .iter()
            .any(|cand| cand.addr == mapped_addr);

        if !known_local {
            // the mapped address is a new peer-reflexive local candidate;
            // the valid pair is formed from it
            log::info!(
                "stack {}. discovered peer-reflexive local candidate {}",
                self.session_tag,
                mapped_addr
            );
            let (base, remote, component) = {
                let pair = &self.checklist.pairs()[idx];
                (pair.local.base, pair.remote.clone(), pair.local.component)
            };
            let mut cand = Candidate::new(CandidateType::PeerReflexive, component, mapped_addr);
            cand.base = base;
            cand.priority = priority;
            cand.compute_foundation();
            self.local_candidates.push(cand.clone());

            // the valid pair takes over the transaction so nomination
            // targets the discovered path
            self.checklist.pairs_mut()[idx].transaction = None;
            let mut valid =
                CandidatePair::new(cand, remote, self.role == AgentRole::Controlling);
            valid.role = PairRole::Valid;
            valid.state = PairState::Succeeded;
            valid.transaction = Some(c.id);
            self.checklist.add(valid);
        } else {
            let pair = &mut self.checklist.pairs_mut()[idx];
            pair.role = PairRole::Valid;
            pair.transaction = Some(c.id);
        }

        self.checklist.unfreeze_foundation(&foundation);

        // regular nomination: the controlling side re-sends the succeeded
        // check with USE-CANDIDATE, optionally waiting a moment so a LAN
        // pair can overtake a reflexive one
        if self.role == AgentRole::Controlling && !nomination && self.state != RunningState::Success
        {
            let Some(valid_idx) = self.checklist.find_by_transaction(c.id) else {
                return;
            };
            let remote_is_lan = net::is_lan(&self.checklist.pairs()[valid_idx].remote.addr.ip());
            let wait = self.config.nomination_wait;

            if !remote_is_lan && !wait.is_zero() {
                let comp = self.components.get_mut(&c.component);
                if let Some(comp) = comp {
                    match comp.nomination_wait_start {
                        None => {
                            comp.nomination_wait_start = Some(Instant::now());
                            return;
                        }
                        Some(start) if start.elapsed() < wait => return,
                        Some(_) => {
                            comp.nomination_wait_start = None;
                        }
                    }
                }
            }
            self.nominate_pair(valid_idx);
        }
    }

    fn nominate_pair(&mut self, idx: usize) {
        if self.checklist.pairs()[idx].nomination != Nomination::None {
            return;
        }

        let tid = match self.checklist.pairs()[idx].transaction {
            Some(tid) => tid,
            None => {
                // a freshly promoted pair without a live check gets one
                let t = self.create_check_request(&self.checklist.pairs()[idx]);
                let tid = t.id;
                self.transactions.add_prioritized(t);
                self.checklist.pairs_mut()[idx].transaction = Some(tid);
                tid
            }
        };

        log::info!(
            "stack {}. nominating pair {}",
            self.session_tag,
            self.checklist.pairs()[idx]
        );
        self.checklist.pairs_mut()[idx].nomination = Nomination::Started;

        if let Some(t) = self.transactions.get_mut(tid) {
            t.restart();
            if let Body::Check(check) = &mut t.body {
                check.use_candidate = true;
            }
            t.action = Some(Action::Check { nomination: true });
        }
        self.transactions.prioritize(tid);
    }

    fn add_keepalive_check(&mut self, component: u16, target: SocketAddr) {
        let exists = self.transactions.exists_where(|t| {
            matches!(t.body, Body::Indication(_))
                && t.keepalive
                && t.component == component
                && t.destination == target
        });
        if exists {
            return;
        }

        let mut t = Transaction::new(
            Body::Indication(BindingIndication),
            target,
            component,
            self.config.initial_rto,
        );
        t.keepalive = true;
        t.interval = self.config.keepalive_interval;
        t.defer_first_run();
        self.transactions.add_regular(t);
    }

    // ----------------------------------------------- nomination tracking

    pub(crate) fn check_nominated_all(&mut self) {
        if self.state == RunningState::Success {
            return;
        }

        // expired nomination-wait timers nominate the best valid pair
        if self.role == AgentRole::Controlling && !self.config.nomination_wait.is_zero() {
            let expired: Vec<u16> = self
                .components
                .iter()
                .filter_map(|(id, c)| match c.nomination_wait_start {
                    Some(start) if start.elapsed() >= self.config.nomination_wait => Some(*id),
                    _ => None,
                })
                .collect();
            for component in expired {
                if let Some(idx) = self.checklist.find_best_valid(component) {
                    if let Some(comp) = self.components.get_mut(&component) {
                        comp.nomination_wait_start = None;
                    }
                    self.nominate_pair(idx);
                }
            }
        }

        let component_ids: Vec<u16> = self.components.keys().copied().collect();
        for component in &component_ids {
            self.check_nominated_component(*component);
        }

        let all_nominated = !component_ids.is_empty()
            && component_ids
                .iter()
                .all(|c| self.checklist.find_nominated(*c).is_some());

        if all_nominated && self.checklist.state() == CheckListState::Running {
            self.checklist.set_state(CheckListState::Completed);

            let mut defaults = BTreeMap::new();
            for component in &component_ids {
                if let Some(idx) = self.checklist.find_highest_nominated(*component) {
                    let cand = self.checklist.pairs()[idx].local.clone();
                    if self
                        .default_candidates
                        .get(component)
                        .map_or(true, |old| !old.same_place(&cand))
                    {
                        self.default_changed = true;
                    }
                    defaults.insert(*component, cand);
                }
            }
            self.default_candidates = defaults;
            self.can_transmit = true;
        }

        if self.checklist.state() == CheckListState::Completed
            && self.state != RunningState::Success
            && self.state > RunningState::CandidateGathering
        {
            log::info!(
                "stack {}. check list completed, stream succeeded",
                self.session_tag
            );
            self.state = RunningState::Success;
        }
    }

    /// RFC 5245 8.1.2 clean-up once a component has a nominated pair.
    fn check_nominated_component(&mut self, component: u16) {
        if self.checklist.state() != CheckListState::Running {
            return;
        }
        let nominated_exists = self
            .checklist
            .pairs()
            .iter()
            .any(|p| {
                p.local.component == component
                    && p.nomination == Nomination::Finished
                    && p.state == PairState::Succeeded
            });
        if !nominated_exists {
            return;
        }

        self.checklist.remove_pairs(PairState::Frozen, component);
        self.checklist.remove_pairs(PairState::Waiting, component);

        if let Some(lowest) = self.checklist.find_lowest_nominated(component) {
            let lowest_priority = self.checklist.pairs()[lowest].priority;
            let to_cancel: Vec<TransactionId> = self
                .checklist
                .pairs()
                .iter()
                .filter(|p| {
                    p.local.component == component
                        && ((p.state == PairState::InProgress && p.priority < lowest_priority)
                            || p.nomination != Nomination::Finished)
                })
                .filter_map(|p| p.transaction)
                .collect();
            for tid in to_cancel {
                self.transactions.erase_where(|t| t.id == tid);
            }
        }
    }

    // ------------------------------------------------------ TURN surface

    /// Issues CreatePermission for every public remote candidate of the
    /// given component(s), or for one explicit address.
    pub fn install_permissions(
        &mut self,
        component: Option<u16>,
        addr: Option<SocketAddr>,
        mut callback: Option<OperationCallback>,
    ) {
        log::info!(
            "stack {}. installing TURN permissions",
            self.session_tag
        );
        let Some(server) = self.active_server() else {
            log::warn!("no TURN server to install permissions on");
            return;
        };

        let component_ids: Vec<u16> = self.components.keys().copied().collect();
        let mut requests = 0;
        for comp in component_ids {
            if component.map_or(false, |c| c != comp) {
                continue;
            }

            let auth = AuthState::new(
                self.config.turn_username.clone(),
                self.config.turn_password.clone(),
                self.cached_realm.clone(),
                self.cached_nonce.clone(),
            );
            let mut permission = ClientCreatePermission::new(auth);
            match addr {
                Some(addr) => permission.add_peer(addr),
                None => {
                    for cand in self
                        .remote_candidates
                        .iter()
                        .filter(|c| c.component == comp && net::is_public(&c.addr.ip()))
                    {
                        permission.add_peer(cand.addr);
                    }
                    for cand in self.remote_relayed.iter().filter(|c| c.component == comp) {
                        permission.add_peer(cand.addr);
                    }
                }
            }
            if permission.peers.is_empty() {
                continue;
            }

            let mut t = Transaction::new(
                Body::CreatePermission(permission),
                server,
                comp,
                self.config.initial_rto,
            );
            t.action = Some(Action::InstallPermissions {
                callback: callback.take(),
            });
            self.transactions.add_prioritized(t);
            requests += 1;
        }
        log::debug!("created {requests} CreatePermission requests");
    }

    fn finish_permissions(&mut self, c: Completion, callback: Option<OperationCallback>) {
        let code = if c.state == TransactionState::Failed {
            log::warn!("stack {}. failed to install TURN permissions", self.session_tag);
            self.error_of(&c)
        } else {
            log::info!("stack {}. TURN permissions installed", self.session_tag);
            // refresh the permission well before the server-side lifetime
            if let Some(t) = self.transactions.get_mut(c.id) {
                t.keepalive = true;
                t.interval = PERMISSION_REFRESH_INTERVAL;
                t.defer_first_run();
            }
            0
        };
        if let Some(cb) = callback {
            cb(c.component, code);
        }
    }

    /// Binds a TURN channel toward the peer; duplicate binds return the
    /// cached channel number.
    pub fn bind_channel(
        &mut self,
        peer: SocketAddr,
        component: u16,
        callback: Option<OperationCallback>,
    ) -> u16 {
        if let Some(existing) = self
            .bound_channels
            .iter()
            .find(|b| b.component == component && b.peer == peer && b.result == 0)
        {
            log::info!("peer {peer} already bound to channel 0x{:x}", existing.number);
            return existing.number;
        }

        let Some(server) = self.active_server() else {
            log::warn!("no TURN server to bind a channel on");
            return 0;
        };

        let number = self.channel_numbers.allocate();
        let auth = AuthState::new(
            self.config.turn_username.clone(),
            self.config.turn_password.clone(),
            self.cached_realm.clone(),
            self.cached_nonce.clone(),
        );
        let bind = ClientChannelBind::new(auth, number, peer);
        let mut t = Transaction::new(
            Body::ChannelBind(bind),
            server,
            component,
            self.config.initial_rto,
        );
        t.action = Some(Action::ChannelBind { callback });
        self.transactions.add_regular(t);

        log::info!(
            "stack {}. binding channel 0x{:x} for {} on component {}",
            self.session_tag,
            number,
            peer,
            component
        );
        number
    }

    fn finish_channel_bind(&mut self, c: Completion, callback: Option<OperationCallback>) {
        let CompletionDetail::ChannelBind { number, peer, .. } = c.detail else {
            return;
        };
        let code = if c.state == TransactionState::Failed {
            self.error_of(&c)
        } else {
            // bindings expire server-side after 10 minutes; keep refreshing
            if let Some(t) = self.transactions.get_mut(c.id) {
                t.keepalive = true;
                t.interval = PERMISSION_REFRESH_INTERVAL;
                t.defer_first_run();
            }
            0
        };

        log::debug!(
            "stack {}. channel 0x{number:x} -> {peer} result {code}",
            self.session_tag
        );
        self.bound_channels.push(BoundChannel {
            component: c.component,
            number,
            peer,
            result: code,
        });
        if let Some(cb) = callback {
            cb(c.component, code);
        }
    }

    pub fn channel_binding_failed(&self, component: u16, number: u16) -> bool {
        self.bound_channels
            .iter()
            .any(|b| b.component == component && b.number == number && b.result != 0)
    }

    fn remove_binding_results(&mut self, component: u16) {
        self.bound_channels.retain(|b| b.component != component);
    }

    /// The peer a bound channel number refers to.
    pub fn channel_peer(&self, number: u16) -> Option<SocketAddr> {
        self.bound_channels
            .iter()
            .find(|b| b.number == number && b.result == 0)
            .map(|b| b.peer)
    }

    pub fn channel_for_peer(&self, peer: SocketAddr) -> Option<u16> {
        self.bound_channels
            .iter()
            .find(|b| b.peer == peer && b.result == 0)
            .map(|b| b.number)
    }

    pub fn has_channel(&self, number: u16) -> bool {
        self.bound_channels
            .iter()
            .any(|b| b.number == number && b.result == 0)
    }

    /// Releases the allocation(s) with a zero-lifetime Refresh. The release
    /// transactions survive `clear`, keeping the sockets useful until the
    /// server confirms.
    pub fn free_allocation(&mut self, component: Option<u16>, mut callback: Option<OperationCallback>) {
        let Some(server) = self.active_server() else {
            return;
        };
        let component_ids: Vec<u16> = match component {
            Some(c) => vec![c],
            None => self.components.keys().copied().collect(),
        };
        for comp in component_ids {
            self.remove_binding_results(comp);
            let auth = AuthState::new(
                self.config.turn_username.clone(),
                self.config.turn_password.clone(),
                self.cached_realm.clone(),
                self.cached_nonce.clone(),
            );
            let release = ClientRefresh::new(auth, Duration::ZERO);
            let mut t = Transaction::new(
                Body::Refresh(release),
                server,
                comp,
                self.config.initial_rto,
            );
            t.action = Some(Action::FreeAllocation {
                callback: callback.take(),
            });
            self.transactions.add_regular(t);
        }
    }

    // ------------------------------------------------------------ queries

    pub fn reflexive_address(&self, component: u16) -> Option<SocketAddr> {
        self.local_candidates
            .iter()
            .find(|c| c.kind == CandidateType::ServerReflexive && c.component == component)
            .map(|c| c.addr)
    }

    pub fn relayed_address(&self, component: u16) -> Option<SocketAddr> {
        self.local_candidates
            .iter()
            .find(|c| c.kind == CandidateType::Relay && c.component == component)
            .map(|c| c.addr)
    }

    pub fn remote_reflexive_address(&self, component: u16) -> Option<SocketAddr> {
        self.remote_candidates
            .iter()
            .find(|c| c.kind == CandidateType::ServerReflexive && c.component == component)
            .map(|c| c.addr)
    }

    pub fn remote_relayed_address(&self, component: u16) -> Option<SocketAddr> {
        self.remote_candidates
            .iter()
            .chain(self.remote_relayed.iter())
            .find(|c| c.kind == CandidateType::Relay && c.component == component)
            .map(|c| c.addr)
    }

    /// The concluded remote address of the component: the highest
    /// nominated pair's remote.
    pub fn remote_address(&self, component: u16) -> Option<SocketAddr> {
        self.checklist
            .find_highest_nominated(component)
            .map(|idx| self.checklist.pairs()[idx].remote.addr)
    }

    pub fn local_address(&self, component: u16) -> Option<SocketAddr> {
        self.checklist
            .find_highest_nominated(component)
            .map(|idx| self.checklist.pairs()[idx].local.addr)
    }

    /// The best valid (local, remote) pair of the component.
    pub fn conclude_pair(&self, component: u16) -> Option<(Candidate, Candidate)> {
        self.checklist.find_best_valid(component).map(|idx| {
            let p = &self.checklist.pairs()[idx];
            (p.local.clone(), p.remote.clone())
        })
    }

    pub fn active_stun_server(&self) -> Option<SocketAddr> {
        self.active_server_v4.or(self.active_server_v6)
    }

    /// True once every component has a nominated pair.
    pub fn can_transmit(&self) -> bool {
        self.can_transmit
    }

    /// True when nomination settled on a different default candidate than
    /// the one advertised in the offer; the owner may want to renegotiate.
    pub fn default_changed(&self) -> bool {
        self.default_changed
    }

    // -------------------------------------------------- restart/teardown

    pub fn stop_checks(&mut self) {
        self.checklist.clear();
        self.transactions.erase_where(|t| {
            !matches!(
                t.body,
                Body::Refresh(_) | Body::ChannelBind(_) | Body::CreatePermission(_)
            )
        });
        if self.state < RunningState::Failed {
            self.state = RunningState::Failed;
        }
    }

    /// Resets state; streams and components survive. Pending allocation
    /// releases are kept so the sockets outlive the clear.
    pub fn clear(&mut self) {
        log::debug!("clearing stream {}", self.id);
        self.state = RunningState::None;
        self.checklist.clear();
        self.transactions.erase_where(|t| {
            !matches!(&t.body, Body::Refresh(r) if r.lifetime.is_zero())
        });
        self.remote_candidates.clear();
        self.remote_relayed.clear();
        self.default_candidates.clear();
        self.bound_channels.clear();
        self.tick.stop();
        self.turn_allocated = 0;
        self.default_changed = false;
        self.can_transmit = false;
        for c in self.components.values_mut() {
            c.nomination_wait_start = None;
        }
    }

    /// Drops everything an ICE restart invalidates. When the local network
    /// changed the gathering transactions and refreshes die too; their
    /// sockets no longer exist.
    pub fn clear_for_restart(&mut self, local_network_changed: bool) {
        self.state = RunningState::None;
        self.checklist.clear();
        self.remote_candidates.clear();
        self.remote_relayed.clear();
        self.turn_allocated = 0;

        self.transactions.erase_where(|t| {
            matches!(
                t.body,
                Body::Check(_) | Body::ChannelBind(_) | Body::CreatePermission(_)
            )
        });
        if local_network_changed {
            self.transactions.erase_where(|t| {
                matches!(t.body, Body::Refresh(_) | Body::Binding(_) | Body::Allocate(_))
            });
        }
    }

    pub fn restart(&mut self) {
        self.error_code = 0;
        self.state = if self.state > RunningState::CreatingSdp {
            RunningState::ConnCheck
        } else {
            RunningState::None
        };
        self.checklist.clear();
    }

    /// After a check-list failure: drop checks and permissions but keep the
    /// refresh keepalives, so the allocation survives a relay-only retry.
    fn clear_failed_checks(&mut self) {
        self.checklist.clear();
        self.transactions.erase_where(|t| {
            matches!(t.body, Body::Check(_) | Body::Indication(_) | Body::Binding(_))
        });
    }

    /// Cancels the gathering requests still in flight when the session
    /// timeout hits. Obtained allocations keep their refresh keepalives so
    /// they survive a later relay-only path.
    pub fn cancel_allocations(&mut self) {
        self.transactions
            .erase_where(|t| matches!(t.body, Body::Allocate(_) | Body::Binding(_)));
    }
}
