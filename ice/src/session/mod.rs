#[cfg(test)]
mod session_test;

use std::collections::BTreeMap;
use std::net::SocketAddr;

use stun::message::{is_message, Getter, Message, CLASS_INDICATION, METHOD_DATA};
use turn::proto::chandata::{self, ChannelData};
use turn::proto::data::Data;
use turn::proto::peeraddr::PeerAddress;

use crate::agent::config::AgentConfig;
use crate::rand::{generate_pwd, generate_tie_breaker, generate_ufrag};
use crate::stream::{RunningState, Stream};
use crate::transaction::OperationCallback;
use crate::AgentRole;

/// A datagram the owner must put on the wire.
pub struct OutgoingDatagram {
    pub stream: usize,
    pub component: u16,
    pub destination: SocketAddr,
    pub data: Vec<u8>,
    /// Response to a remote request rather than our own transmission.
    pub response: bool,
    pub tag: u64,
}

/// The multi-stream ICE session: owns the streams, the shared credentials
/// and the agent role; demultiplexes traffic and joins the stream states
/// into one overall state.
pub struct Session {
    pub(crate) streams: BTreeMap<usize, Stream>,
    pub(crate) state: RunningState,
    pub(crate) config: AgentConfig,

    local_ufrag: String,
    local_pwd: String,
    remote_ufrag: String,
    remote_pwd: String,
    role: AgentRole,
    tie_breaker: u64,
    must_restart: bool,

    session_tag: u32,
    next_stream_id: usize,
}

impl Session {
    pub fn new(config: AgentConfig, session_tag: u32) -> Self {
        Session {
            streams: BTreeMap::new(),
            state: RunningState::None,
            config,
            local_ufrag: generate_ufrag(),
            local_pwd: generate_pwd(),
            remote_ufrag: String::new(),
            remote_pwd: String::new(),
            role: AgentRole::Controlling,
            tie_breaker: generate_tie_breaker(),
            must_restart: false,
            session_tag,
            next_stream_id: 0,
        }
    }

    pub fn setup(&mut self, config: AgentConfig) {
        self.config = config.clone();
        for stream in self.streams.values_mut() {
            stream.set_config(config.clone());
        }
    }

    // ----------------------------------------------------------- topology

    pub fn add_stream(&mut self) -> usize {
        let id = self.next_stream_id;
        self.next_stream_id += 1;

        let mut stream = Stream::new(id, self.session_tag, self.config.clone());
        stream.role = self.role;
        stream.tie_breaker = self.tie_breaker;
        stream.local_ufrag = self.local_ufrag.clone();
        stream.local_pwd = self.local_pwd.clone();
        self.streams.insert(id, stream);

        log::info!("stack {}. new stream {id} added", self.session_tag);
        id
    }

    pub fn add_component(&mut self, stream: usize, tag: u64, port_v4: u16, port_v6: u16) -> Option<u16> {
        let s = self.streams.get_mut(&stream)?;
        let component = s.add_component(tag, port_v4, port_v6);
        log::info!(
            "stack {}. new component {component} added to stream {stream}",
            self.session_tag
        );
        Some(component)
    }

    pub fn remove_stream(&mut self, stream: usize) {
        self.streams.remove(&stream);
    }

    pub fn has_stream(&self, stream: usize) -> bool {
        self.streams.contains_key(&stream)
    }

    pub fn has_component(&self, stream: usize, component: u16) -> bool {
        self.streams
            .get(&stream)
            .map_or(false, |s| s.has_component(component))
    }

    pub fn set_component_port(&mut self, stream: usize, component: u16, port_v4: u16, port_v6: u16) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.set_component_ports(component, port_v4, port_v6);
        }
    }

    /// Finds the (stream, component) owning a local port of a family.
    pub fn find_stream_and_component(&self, v6: bool, port: u16) -> Option<(usize, u16)> {
        for (id, stream) in &self.streams {
            if let Some(component) = stream.find_component_by_port(v6, port) {
                return Some((*id, component));
            }
        }
        None
    }

    // --------------------------------------------------------------- role

    pub fn set_role(&mut self, role: AgentRole) {
        self.role = role;
        for stream in self.streams.values_mut() {
            stream.role = role;
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    // ----------------------------------------------------------- liveness

    pub fn state(&self) -> RunningState {
        self.state
    }

    pub fn active(&self) -> bool {
        self.state != RunningState::None
    }

    pub fn finished(&self) -> bool {
        self.state == RunningState::Failed || self.state == RunningState::Success
    }

    /// First error code of a failed stream.
    pub fn error_code(&self) -> u16 {
        self.streams
            .values()
            .find(|s| s.state() == RunningState::Failed)
            .map_or(0, |s| s.error_code)
    }

    // ---------------------------------------------------------- gathering

    pub fn gather_candidates(&mut self) {
        let mut gathered = 0;
        for stream in self.streams.values_mut() {
            stream.role = self.role;
            stream.tie_breaker = self.tie_breaker;
            stream.local_ufrag = self.local_ufrag.clone();
            stream.local_pwd = self.local_pwd.clone();
            stream.gather_candidates();
            if stream.state() > RunningState::CandidateGathering {
                gathered += 1;
            }
        }

        self.state = if gathered == self.streams.len() {
            RunningState::CreatingSdp
        } else {
            RunningState::CandidateGathering
        };
    }

    // --------------------------------------------------------------- data

    /// Demultiplexes one received datagram: TURN channel-data and Data
    /// indications are unwrapped; STUN goes to the owning stream. Anything
    /// else is application payload and stays with the owner.
    pub fn process_data(
        &mut self,
        stream_id: usize,
        component: u16,
        data: &[u8],
        source: SocketAddr,
    ) -> bool {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return false;
        };

        let mut relayed = false;
        let mut source = source;
        let mut unwrapped: Option<Vec<u8>> = None;

        if chandata::is_channel_data(data) {
            let Ok(frame) = ChannelData::decode(data) else {
                return false;
            };
            let Some(peer) = stream.channel_peer(frame.number) else {
                return false;
            };
            source = peer;
            relayed = true;
            unwrapped = Some(frame.data);
        }

        let payload: &[u8] = unwrapped.as_deref().unwrap_or(data);
        if !is_message(payload) {
            return false;
        }
        let mut msg = Message::new();
        if msg.write(payload).is_err() {
            return false;
        }

        // a Data indication can carry a relayed connectivity check
        if msg.typ.class == CLASS_INDICATION && msg.typ.method == METHOD_DATA {
            let mut data_attr = Data::default();
            let mut peer = PeerAddress::default();
            if data_attr.get_from(&msg).is_err() || peer.get_from(&msg).is_err() {
                return false;
            }
            if !is_message(&data_attr.0) {
                // relayed application payload; the owner unwraps it itself
                return false;
            }
            let mut inner = Message::new();
            if inner.write(&data_attr.0).is_err() {
                return false;
            }
            let peer_addr = SocketAddr::new(peer.ip, peer.port);
            let handled = stream.process_data(&inner, peer_addr, component, true);
            self.refresh_state();
            return handled;
        }

        let handled = stream.process_data(&msg, source, component, relayed);
        self.refresh_state();
        handled
    }

    /// Polls the streams for the next datagram to transmit. The producer
    /// loop calls this until it returns None.
    pub fn get_data_to_send(&mut self) -> Option<OutgoingDatagram> {
        for stream in self.streams.values_mut() {
            stream.check_timeouts();
        }

        let mut out = None;
        for (id, stream) in &mut self.streams {
            if let Some(p) = stream.get_data_to_send() {
                out = Some(OutgoingDatagram {
                    stream: *id,
                    component: p.component,
                    destination: p.destination,
                    data: p.data,
                    response: p.response,
                    tag: p.tag,
                });
                break;
            }
        }
        self.refresh_state();
        out
    }

    // --------------------------------------------------------- conn check

    pub fn check_connectivity(&mut self) {
        if self.state == RunningState::ConnCheck || self.state == RunningState::Success {
            return;
        }
        log::info!("stack {}. starting connectivity checks", self.session_tag);
        self.state = RunningState::ConnCheck;

        for stream in self.streams.values_mut() {
            stream.remote_ufrag = self.remote_ufrag.clone();
            stream.remote_pwd = self.remote_pwd.clone();
            stream.start_checks();
        }
    }

    /// Overall state is the join of stream states: all failed fails the
    /// session, any success after every stream terminated succeeds it, and
    /// everyone past gathering moves the session to gathered.
    pub(crate) fn refresh_state(&mut self) {
        if self.streams.is_empty() {
            return;
        }
        let total = self.streams.len();
        let failed = self
            .streams
            .values()
            .filter(|s| s.state() == RunningState::Failed)
            .count();
        let success = self
            .streams
            .values()
            .filter(|s| s.state() == RunningState::Success)
            .count();
        let gathered = self
            .streams
            .values()
            .filter(|s| s.state() >= RunningState::CreatingSdp)
            .count();

        if failed == total {
            self.state = RunningState::Failed;
        } else if success > 0 && success + failed == total {
            self.state = RunningState::Success;
        } else if gathered == total && self.state == RunningState::CandidateGathering {
            self.state = RunningState::CreatingSdp;
        }
    }

    // ---------------------------------------------------------------- SDP

    /// The shared session-description lines: implementation level, password
    /// and user fragment.
    pub fn create_sdp(&self) -> Vec<String> {
        vec![
            "a=ice-full".to_owned(),
            format!("a=ice-pwd:{}", self.local_pwd),
            format!("a=ice-ufrag:{}", self.local_ufrag),
        ]
    }

    pub fn candidate_list(&self, stream: usize, component: Option<u16>) -> Vec<String> {
        self.streams
            .get(&stream)
            .map_or_else(Vec::new, |s| s.candidate_lines(component))
    }

    pub fn default_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.streams.get(&stream)?.default_address(component)
    }

    pub fn process_sdp_offer(
        &mut self,
        stream: usize,
        candidate_lines: &[String],
        default_addr: Option<SocketAddr>,
        delete_relayed: bool,
    ) -> bool {
        self.streams.get_mut(&stream).map_or(false, |s| {
            s.process_sdp_offer(candidate_lines, default_addr, delete_relayed)
        })
    }

    pub fn candidate_list_contains(&self, stream: usize, addr: SocketAddr) -> bool {
        self.streams
            .get(&stream)
            .map_or(false, |s| s.remote_candidate_listed(addr))
    }

    // -------------------------------------------------------- credentials

    pub fn local_ufrag(&self) -> &str {
        &self.local_ufrag
    }

    pub fn local_pwd(&self) -> &str {
        &self.local_pwd
    }

    pub fn remote_ufrag(&self) -> &str {
        &self.remote_ufrag
    }

    pub fn remote_pwd(&self) -> &str {
        &self.remote_pwd
    }

    pub fn set_remote_ufrag(&mut self, ufrag: &str, stream: Option<usize>) {
        self.remote_ufrag = ufrag.to_owned();
        for (id, s) in &mut self.streams {
            if stream.map_or(true, |wanted| wanted == *id) {
                s.remote_ufrag = ufrag.to_owned();
            }
        }
    }

    /// A changed remote password means the peer restarted ICE.
    pub fn set_remote_pwd(&mut self, pwd: &str, stream: Option<usize>) {
        self.must_restart |= !self.remote_pwd.is_empty() && self.remote_pwd != pwd;
        self.remote_pwd = pwd.to_owned();
        for (id, s) in &mut self.streams {
            if stream.map_or(true, |wanted| wanted == *id) {
                s.remote_pwd = pwd.to_owned();
            }
        }
    }

    pub fn must_restart(&self) -> bool {
        self.must_restart
    }

    /// Fresh local credentials; required before restarting checks.
    pub fn refresh_credentials(&mut self) {
        self.local_ufrag = generate_ufrag();
        self.local_pwd = generate_pwd();
        for s in self.streams.values_mut() {
            s.local_ufrag = self.local_ufrag.clone();
            s.local_pwd = self.local_pwd.clone();
        }
    }

    // ------------------------------------------------------- TURN surface

    pub fn bind_channel(
        &mut self,
        stream: usize,
        component: u16,
        peer: SocketAddr,
        callback: Option<OperationCallback>,
    ) -> u16 {
        self.streams
            .get_mut(&stream)
            .map_or(0, |s| s.bind_channel(peer, component, callback))
    }

    pub fn is_channel_binding_failed(&self, stream: usize, component: u16, number: u16) -> bool {
        self.streams
            .get(&stream)
            .map_or(false, |s| s.channel_binding_failed(component, number))
    }

    pub fn install_permissions(
        &mut self,
        stream: usize,
        component: Option<u16>,
        addr: Option<SocketAddr>,
        callback: Option<OperationCallback>,
    ) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.install_permissions(component, addr, callback);
        }
    }

    pub fn free_allocation(
        &mut self,
        stream: usize,
        component: Option<u16>,
        callback: Option<OperationCallback>,
    ) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.free_allocation(component, callback);
        }
    }

    pub fn has_allocations(&self) -> bool {
        self.streams.values().any(|s| s.turn_allocated > 0)
    }

    pub fn has_turn_prefix(&self, number: u16) -> bool {
        self.streams.values().any(|s| s.has_channel(number))
    }

    pub fn channel_peer(&self, stream: usize, number: u16) -> Option<SocketAddr> {
        self.streams.get(&stream)?.channel_peer(number)
    }

    pub fn cancel_allocations(&mut self) {
        for s in self.streams.values_mut() {
            s.cancel_allocations();
        }
    }

    // ------------------------------------------------------------ queries

    pub fn reflexive_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.streams.get(&stream)?.reflexive_address(component)
    }

    pub fn relayed_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.streams.get(&stream)?.relayed_address(component)
    }

    pub fn remote_reflexive_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.streams.get(&stream)?.remote_reflexive_address(component)
    }

    pub fn remote_relayed_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.streams.get(&stream)?.remote_relayed_address(component)
    }

    pub fn remote_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.streams.get(&stream)?.remote_address(component)
    }

    pub fn local_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.streams.get(&stream)?.local_address(component)
    }

    pub fn conclude_pair(
        &self,
        stream: usize,
        component: u16,
    ) -> Option<(crate::candidate::Candidate, crate::candidate::Candidate)> {
        self.streams.get(&stream)?.conclude_pair(component)
    }

    pub fn active_stun_server(&self, stream: usize) -> Option<SocketAddr> {
        self.streams.get(&stream)?.active_stun_server()
    }

    pub fn remote_candidates(&self, stream: usize) -> Option<&[crate::candidate::Candidate]> {
        self.streams
            .get(&stream)
            .map(|s| s.remote_candidates.as_slice())
    }

    /// Forces default selection from whatever candidates exist; the
    /// timeout path uses this to conclude gathering with host candidates.
    pub fn choose_defaults(&mut self) {
        for s in self.streams.values_mut() {
            s.choose_defaults();
        }
    }

    // --------------------------------------------------- restart/teardown

    pub fn clear(&mut self) {
        self.refresh_credentials();
        self.state = RunningState::None;
        for s in self.streams.values_mut() {
            s.clear();
        }
    }

    pub fn clear_for_restart(&mut self, local_network_changed: bool) {
        self.refresh_credentials();
        self.state = RunningState::None;
        self.must_restart = false;
        for s in self.streams.values_mut() {
            s.clear_for_restart(local_network_changed);
        }
    }

    pub fn stop_checks(&mut self) {
        log::info!("stack {}. stopping connectivity checks", self.session_tag);
        for s in self.streams.values_mut() {
            s.stop_checks();
        }
        if self.state < RunningState::Failed {
            self.state = RunningState::Failed;
        }
    }
}
