#[cfg(test)]
mod agent_test;

pub mod config;

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Instant;

use stun::message::{is_message, Getter, Message, CLASS_INDICATION, METHOD_DATA};
use turn::proto::chandata::{self, ChannelData};
use turn::proto::data::Data;
use turn::proto::peeraddr::PeerAddress;

use crate::agent::config::AgentConfig;
use crate::candidate::Candidate;
use crate::events::StageHandler;
use crate::session::{OutgoingDatagram, Session};
use crate::stream::RunningState;
use crate::transaction::OperationCallback;
use crate::AgentRole;

/// Coarse agent state reported to the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum IceState {
    None,
    Gathering,
    Gathered,
    Checking,
    CheckSuccess,
    Failed,
    Timeout,
}

struct Inner {
    session: Session,
    handler: Option<Box<dyn StageHandler>>,
    handler_tag: u64,
    timed_out: bool,
    /// When gathering or checking last started; drives the overall timeout.
    action_started: Option<Instant>,
}

impl Inner {
    fn ice_state(&self) -> IceState {
        if self.timed_out {
            return IceState::Timeout;
        }
        match self.session.state() {
            RunningState::None => IceState::None,
            RunningState::CandidateGathering
            | RunningState::EliminateRedundant
            | RunningState::ComputingFoundations
            | RunningState::StartingKeepAlives
            | RunningState::PrioritizingCandidates
            | RunningState::ChoosingDefault => IceState::Gathering,
            RunningState::CreatingSdp => IceState::Gathered,
            RunningState::ConnCheck => IceState::Checking,
            RunningState::Failed => IceState::Failed,
            RunningState::Success => IceState::CheckSuccess,
        }
    }

    fn fire(&mut self, f: impl FnOnce(&mut dyn StageHandler, u64)) {
        // the handler runs under the agent lock; it must not re-enter
        if let Some(mut handler) = self.handler.take() {
            f(handler.as_mut(), self.handler_tag);
            self.handler = Some(handler);
        }
    }

    /// Raises the stage events for a state transition. The timeout
    /// transition raises its events where the timeout is detected.
    fn fire_thresholds(&mut self, old: IceState, new: IceState) {
        if old == new || new == IceState::Timeout {
            return;
        }
        if old < IceState::CheckSuccess && new >= IceState::CheckSuccess {
            if new == IceState::CheckSuccess {
                self.fire(|h, tag| h.on_success(tag));
            } else {
                self.fire(|h, tag| h.on_failed(tag));
            }
        } else if old < IceState::Gathered && new >= IceState::Gathered {
            self.fire(|h, tag| h.on_gathered(tag));
        }
    }
}

/// The public face of the ICE core. One lock guards the whole session; all
/// socket I/O stays with the owner, which feeds received datagrams in and
/// drains datagrams to transmit.
pub struct Agent {
    inner: Mutex<Inner>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        // tags only disambiguate log lines of coexisting agents
        let session_tag = rand::random::<u16>() as u32;
        Agent {
            inner: Mutex::new(Inner {
                session: Session::new(config, session_tag),
                handler: None,
                handler_tag: 0,
                timed_out: false,
                action_started: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("agent lock poisoned")
    }

    /// Installs the stage handler; `tag` is handed back on every event.
    pub fn set_event_handler(&self, handler: Box<dyn StageHandler>, tag: u64) {
        let mut inner = self.lock();
        inner.handler = Some(handler);
        inner.handler_tag = tag;
    }

    /// Replaces the server configuration of the session and its streams.
    pub fn setup(&self, config: AgentConfig) {
        self.lock().session.setup(config);
    }

    // ----------------------------------------------------------- topology

    pub fn add_stream(&self) -> usize {
        self.lock().session.add_stream()
    }

    /// Adds a component (socket) to a stream; returns its component id.
    pub fn add_component(&self, stream: usize, tag: u64, port_v4: u16, port_v6: u16) -> Option<u16> {
        self.lock().session.add_component(stream, tag, port_v4, port_v6)
    }

    pub fn remove_stream(&self, stream: usize) {
        self.lock().session.remove_stream(stream);
    }

    pub fn has_stream(&self, stream: usize) -> bool {
        self.lock().session.has_stream(stream)
    }

    pub fn has_component(&self, stream: usize, component: u16) -> bool {
        self.lock().session.has_component(stream, component)
    }

    pub fn set_component_port(&self, stream: usize, component: u16, port_v4: u16, port_v6: u16) {
        self.lock()
            .session
            .set_component_port(stream, component, port_v4, port_v6);
    }

    pub fn find_stream_and_component(&self, v6: bool, port: u16) -> Option<(usize, u16)> {
        self.lock().session.find_stream_and_component(v6, port)
    }

    pub fn set_role(&self, role: AgentRole) {
        self.lock().session.set_role(role);
    }

    pub fn role(&self) -> AgentRole {
        self.lock().session.role()
    }

    // ------------------------------------------------------------- stages

    pub fn gather_candidates(&self) {
        let mut inner = self.lock();
        inner.action_started = Some(Instant::now());
        inner.session.gather_candidates();

        // without servers (or with IPv6-only interfaces) gathering can
        // conclude without any network round-trip
        if inner.session.state() == RunningState::CreatingSdp {
            inner.fire(|h, tag| h.on_gathered(tag));
        }
    }

    pub fn check_connectivity(&self) {
        let mut inner = self.lock();
        // checks may proceed over host candidates after a gathering timeout
        inner.timed_out = false;
        inner.action_started = Some(Instant::now());
        inner.session.check_connectivity();
    }

    pub fn state(&self) -> IceState {
        self.lock().ice_state()
    }

    pub fn error_code(&self) -> u16 {
        self.lock().session.error_code()
    }

    // --------------------------------------------------------------- data

    /// Feeds a received datagram. Returns false when the datagram is not
    /// for the core (application payload).
    pub fn process_incoming_data(
        &self,
        stream: usize,
        component: u16,
        data: &[u8],
        source: SocketAddr,
    ) -> bool {
        let mut inner = self.lock();
        let old = inner.ice_state();
        let result = inner.session.process_data(stream, component, data, source);
        if result {
            let new = inner.ice_state();
            inner.fire_thresholds(old, new);
        }
        result
    }

    /// Returns the next datagram to transmit, honoring the overall session
    /// timeout: on expiry the defaults are chosen from host candidates, the
    /// stage event fires, and only allocation upkeep continues.
    pub fn generate_outgoing_data(&self) -> Option<OutgoingDatagram> {
        let mut inner = self.lock();
        let old = inner.ice_state();

        if let Some(started) = inner.action_started {
            let limit = inner.session.config.session_timeout;
            if !limit.is_zero() && started.elapsed() > limit {
                let state = inner.session.state();
                let in_progress = state == RunningState::ConnCheck
                    || state == RunningState::CandidateGathering;

                if in_progress && !inner.timed_out {
                    inner.timed_out = true;
                    log::warn!("session timeout detected");
                    if state == RunningState::CandidateGathering {
                        inner.session.cancel_allocations();
                    }
                    inner.session.choose_defaults();
                    if state == RunningState::ConnCheck {
                        // allocations are kept alive; the owner may fall
                        // back to a relay-only path
                        inner.fire(|h, tag| h.on_failed(tag));
                    } else {
                        inner.fire(|h, tag| h.on_gathered(tag));
                    }
                }

                if in_progress && !inner.session.has_allocations() {
                    return None;
                }
            }
        }

        let out = inner.session.get_data_to_send();
        let new = inner.ice_state();
        inner.fire_thresholds(old, new);
        if let Some(out) = &out {
            log::debug!(
                "sending {} bytes to {} (stream {} component {})",
                out.data.len(),
                out.destination,
                out.stream,
                out.component
            );
        }
        out
    }

    // ---------------------------------------------------------------- SDP

    /// `a=ice-full`, `a=ice-pwd`, `a=ice-ufrag` lines.
    pub fn create_sdp(&self) -> Vec<String> {
        self.lock().session.create_sdp()
    }

    pub fn candidate_list(&self, stream: usize, component: Option<u16>) -> Vec<String> {
        self.lock().session.candidate_list(stream, component)
    }

    pub fn default_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.lock().session.default_address(stream, component)
    }

    pub fn process_sdp_offer(
        &self,
        stream: usize,
        candidate_lines: &[String],
        default_addr: Option<SocketAddr>,
        delete_relayed: bool,
    ) -> bool {
        self.lock()
            .session
            .process_sdp_offer(stream, candidate_lines, default_addr, delete_relayed)
    }

    pub fn candidate_list_contains(&self, stream: usize, addr: SocketAddr) -> bool {
        self.lock().session.candidate_list_contains(stream, addr)
    }

    pub fn local_ufrag(&self) -> String {
        self.lock().session.local_ufrag().to_owned()
    }

    pub fn local_pwd(&self) -> String {
        self.lock().session.local_pwd().to_owned()
    }

    pub fn remote_ufrag(&self) -> String {
        self.lock().session.remote_ufrag().to_owned()
    }

    pub fn remote_pwd(&self) -> String {
        self.lock().session.remote_pwd().to_owned()
    }

    pub fn set_remote_ufrag(&self, ufrag: &str, stream: Option<usize>) {
        self.lock().session.set_remote_ufrag(ufrag, stream);
    }

    pub fn set_remote_pwd(&self, pwd: &str, stream: Option<usize>) {
        self.lock().session.set_remote_pwd(pwd, stream);
    }

    pub fn must_restart(&self) -> bool {
        self.lock().session.must_restart()
    }

    pub fn refresh_credentials(&self) {
        self.lock().session.refresh_credentials();
    }

    // ------------------------------------------------------- TURN surface

    /// Binds a TURN channel toward `peer` and returns the channel number
    /// (zero when no binding could be queued). The callback reports the
    /// final result.
    pub fn bind_channel(
        &self,
        stream: usize,
        component: u16,
        peer: SocketAddr,
        callback: Option<OperationCallback>,
    ) -> u16 {
        self.lock().session.bind_channel(stream, component, peer, callback)
    }

    pub fn is_channel_binding_failed(&self, stream: usize, component: u16, number: u16) -> bool {
        self.lock()
            .session
            .is_channel_binding_failed(stream, component, number)
    }

    pub fn install_permissions(
        &self,
        stream: usize,
        component: Option<u16>,
        addr: Option<SocketAddr>,
        callback: Option<OperationCallback>,
    ) {
        self.lock()
            .session
            .install_permissions(stream, component, addr, callback);
    }

    pub fn free_allocation(
        &self,
        stream: usize,
        component: Option<u16>,
        callback: Option<OperationCallback>,
    ) {
        self.lock().session.free_allocation(stream, component, callback);
    }

    pub fn has_allocations(&self) -> bool {
        self.lock().session.has_allocations()
    }

    pub fn has_turn_prefix(&self, number: u16) -> bool {
        self.lock().session.has_turn_prefix(number)
    }

    // ------------------------------------------------------------ queries

    pub fn reflexive_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.lock().session.reflexive_address(stream, component)
    }

    pub fn relayed_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.lock().session.relayed_address(stream, component)
    }

    pub fn remote_reflexive_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.lock().session.remote_reflexive_address(stream, component)
    }

    pub fn remote_relayed_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.lock().session.remote_relayed_address(stream, component)
    }

    /// Concluded addresses of the nominated path.
    pub fn remote_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.lock().session.remote_address(stream, component)
    }

    pub fn local_address(&self, stream: usize, component: u16) -> Option<SocketAddr> {
        self.lock().session.local_address(stream, component)
    }

    pub fn conclude_pair(&self, stream: usize, component: u16) -> Option<(Candidate, Candidate)> {
        self.lock().session.conclude_pair(stream, component)
    }

    pub fn active_stun_server(&self, stream: usize) -> Option<SocketAddr> {
        self.lock().session.active_stun_server(stream)
    }

    pub fn remote_candidates(&self, stream: usize) -> Vec<Candidate> {
        self.lock()
            .session
            .remote_candidates(stream)
            .map_or_else(Vec::new, |c| c.to_vec())
    }

    // --------------------------------------------------- restart/teardown

    /// Resets all checks and state; streams and components survive.
    /// Candidates must be gathered again.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.session.clear();
        inner.timed_out = false;
        inner.action_started = None;
    }

    pub fn clear_for_restart(&self, local_network_changed: bool) {
        let mut inner = self.lock();
        inner.session.clear_for_restart(local_network_changed);
        inner.timed_out = false;
        inner.action_started = None;
    }

    pub fn stop_checks(&self) {
        let mut inner = self.lock();
        inner.timed_out = false;
        inner.action_started = None;
        inner.session.stop_checks();
    }

    // ----------------------------------------------- datagram classifiers

    /// True if the datagram looks like STUN.
    pub fn is_stun(data: &[u8]) -> bool {
        is_message(data)
    }

    /// True if the datagram looks like RTP/RTCP (version bits 0b10).
    pub fn is_rtp(data: &[u8]) -> bool {
        !data.is_empty() && data[0] & 0xC0 == 0x80
    }

    /// True if the datagram is a channel-data frame; with `number` given,
    /// only for that exact channel.
    pub fn is_channel_data(data: &[u8], number: Option<u16>) -> bool {
        match number {
            None => chandata::is_channel_data(data),
            Some(number) => {
                data.len() >= 4 && u16::from_be_bytes([data[0], data[1]]) == number
            }
        }
    }

    /// Frames an application payload for a bound channel.
    pub fn make_channel_data(number: u16, payload: &[u8]) -> Vec<u8> {
        ChannelData::new(number, payload.to_vec()).encode()
    }

    /// Unwraps a channel-data frame into (channel number, payload).
    pub fn decode_channel_data(data: &[u8]) -> Option<(u16, Vec<u8>)> {
        let frame = ChannelData::decode(data).ok()?;
        Some((frame.number, frame.data))
    }

    /// Unwraps a TURN Data indication into (peer address, payload). The
    /// payload arrived through the relay, so the peer address carries the
    /// relayed mark for the media pipeline.
    pub fn decode_data_indication(data: &[u8]) -> Option<(SocketAddr, Vec<u8>)> {
        if !is_message(data) {
            return None;
        }
        let mut msg = Message::new();
        msg.write(data).ok()?;
        if msg.typ.class != CLASS_INDICATION || msg.typ.method != METHOD_DATA {
            return None;
        }
        let mut payload = Data::default();
        let mut peer = PeerAddress::default();
        payload.get_from(&msg).ok()?;
        peer.get_from(&msg).ok()?;
        Some((SocketAddr::new(peer.ip, peer.port), payload.0))
    }
}
