use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use stun::attributes::*;
use stun::error_code::ErrorCodeAttribute;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;
use turn::proto::chandata::{MAX_CHANNEL_NUMBER, MIN_CHANNEL_NUMBER};
use turn::proto::channum::ChannelNumber;
use turn::proto::data::Data;
use turn::proto::lifetime::Lifetime;
use turn::proto::peeraddr::PeerAddress;
use turn::proto::relayaddr::RelayedAddress;
use turn::proto::reqfamily::RequestedAddressFamily;
use turn::proto::reqtrans::RequestedTransport;

use crate::net;
use crate::transaction::{BodyOutcome, CompletionDetail, TransactionState};

/// Long-term-credential state shared by the TURN client transactions.
///
/// The first request goes out bare; the 401 challenge supplies realm and
/// nonce, after which the request is rebuilt with USERNAME/REALM/NONCE and
/// a MESSAGE-INTEGRITY keyed by MD5(username:realm:password). Cached
/// realm/nonce skip the challenge round-trip entirely.
pub struct AuthState {
    pub username: String,
    pub password: String,
    pub realm: String,
    pub nonce: String,
    pub error_code: u16,
    credentials_encoded: bool,
    stale_retries: u8,
}

pub(crate) enum AuthStep {
    /// Rebuild the request with fresh credentials and resend.
    Retry,
    Failed,
    Success,
}

impl AuthState {
    pub fn new(username: String, password: String, realm: String, nonce: String) -> Self {
        AuthState {
            username,
            password,
            realm,
            nonce,
            error_code: 0,
            credentials_encoded: false,
            stale_retries: 0,
        }
    }

    pub fn authenticated(&self) -> bool {
        !self.realm.is_empty() && !self.nonce.is_empty()
    }

    fn integrity(&self) -> MessageIntegrity {
        MessageIntegrity::new_long_term(&self.username, &self.realm, &self.password)
    }

    /// Applies the 401/438 retry rules; terminal on any other error code.
    pub(crate) fn advance(&mut self, msg: &Message, id: &mut TransactionId) -> AuthStep {
        let mut error = ErrorCodeAttribute::default();
        if error.get_from(msg).is_ok() {
            let code = error.code.0;
            let realm = TextAttribute::get_from_as(msg, ATTR_REALM).map(|a| a.text).ok();
            let nonce = TextAttribute::get_from_as(msg, ATTR_NONCE).map(|a| a.text).ok();

            if code == 401 && !self.credentials_encoded {
                let (Some(realm), Some(nonce)) = (realm, nonce) else {
                    // a challenge without realm/nonce cannot be answered
                    self.error_code = code;
                    return AuthStep::Failed;
                };
                log::debug!("server requested long-term credentials for realm {realm}");
                self.realm = realm;
                self.nonce = nonce;
                self.credentials_encoded = true;
                *id = TransactionId::new();
                return AuthStep::Retry;
            }

            if code == 438 && self.stale_retries == 0 && (realm.is_some() || nonce.is_some()) {
                log::debug!("stale nonce, retrying with refreshed value");
                if let Some(realm) = realm {
                    self.realm = realm;
                }
                if let Some(nonce) = nonce {
                    self.nonce = nonce;
                }
                self.stale_retries += 1;
                self.credentials_encoded = true;
                *id = TransactionId::new();
                return AuthStep::Retry;
            }

            self.error_code = code;
            return AuthStep::Failed;
        }

        if msg.typ.class == CLASS_ERROR_RESPONSE {
            self.error_code = 0;
            return AuthStep::Failed;
        }

        AuthStep::Success
    }

    /// Builds the full request: credentials (when known), the body
    /// attributes from `fill`, then MESSAGE-INTEGRITY.
    fn compose(
        &self,
        typ: MessageType,
        id: TransactionId,
        fill: impl Fn(&mut Message) -> stun::Result<()>,
    ) -> stun::Result<Vec<u8>> {
        let mut m = Message::new();
        m.build(&[&typ, &id])?;

        if self.authenticated() {
            TextAttribute::new(ATTR_USERNAME, self.username.clone()).add_to(&mut m)?;
            TextAttribute::new(ATTR_REALM, self.realm.clone()).add_to(&mut m)?;
            TextAttribute::new(ATTR_NONCE, self.nonce.clone()).add_to(&mut m)?;
            fill(&mut m)?;
            self.integrity().add_to(&mut m)?;
        } else {
            fill(&mut m)?;
        }

        Ok(m.raw)
    }

    pub fn reset_for_restart(&mut self) {
        self.credentials_encoded = false;
        self.stale_retries = 0;
    }
}

/// TURN Allocate request. On success the server hands back the relayed
/// transport address plus our reflexive address.
pub struct ClientAllocate {
    pub auth: AuthState,
    pub lifetime: Duration,
    /// Family of the socket the request leaves on.
    pub wire_v6: bool,
    /// Family requested for the relayed address.
    pub alloc_v6: bool,
    pub reflexive: Option<SocketAddr>,
    pub relayed: Option<SocketAddr>,
}

const ALLOCATE_REQUEST: MessageType = MessageType {
    method: METHOD_ALLOCATE,
    class: CLASS_REQUEST,
};
const REFRESH_REQUEST: MessageType = MessageType {
    method: METHOD_REFRESH,
    class: CLASS_REQUEST,
};
const CHANNEL_BIND_REQUEST: MessageType = MessageType {
    method: METHOD_CHANNEL_BIND,
    class: CLASS_REQUEST,
};
const CREATE_PERMISSION_REQUEST: MessageType = MessageType {
    method: METHOD_CREATE_PERMISSION,
    class: CLASS_REQUEST,
};
const SEND_INDICATION: MessageType = MessageType {
    method: METHOD_SEND,
    class: CLASS_INDICATION,
};

impl ClientAllocate {
    pub fn new(auth: AuthState, lifetime: Duration) -> Self {
        ClientAllocate {
            auth,
            lifetime,
            wire_v6: false,
            alloc_v6: false,
            reflexive: None,
            relayed: None,
        }
    }

    pub(crate) fn compose(&mut self, id: TransactionId) -> stun::Result<Vec<u8>> {
        let authenticated = self.auth.authenticated();
        let lifetime = self.lifetime;
        let requested_family = if self.alloc_v6 != self.wire_v6 {
            Some(if self.alloc_v6 {
                RequestedAddressFamily::IPv6
            } else {
                RequestedAddressFamily::IPv4
            })
        } else {
            None
        };

        self.auth.compose(ALLOCATE_REQUEST, id, |m| {
            RequestedTransport::default().add_to(m)?;
            // the unauthenticated probe only provokes the 401 challenge
            if authenticated {
                Lifetime(lifetime).add_to(m)?;
            }
            if let Some(family) = requested_family {
                family.add_to(m)?;
            }
            Ok(())
        })
    }

    pub(crate) fn process(
        &mut self,
        msg: &Message,
        _source: SocketAddr,
        id: &mut TransactionId,
    ) -> BodyOutcome {
        match self.auth.advance(msg, id) {
            AuthStep::Retry => BodyOutcome::Continue,
            AuthStep::Failed => BodyOutcome::Terminal(TransactionState::Failed),
            AuthStep::Success => {
                let mut xor = XorMappedAddress::default();
                if xor.get_from(msg).is_ok() {
                    self.reflexive = Some(SocketAddr::new(xor.ip, xor.port));
                }
                let mut relay = RelayedAddress::default();
                if relay.get_from(msg).is_ok() {
                    self.relayed = Some(SocketAddr::new(relay.ip, relay.port));
                }
                let mut lifetime = Lifetime::default();
                if lifetime.get_from(msg).is_ok() {
                    self.lifetime = lifetime.0;
                }
                log::debug!(
                    "allocation granted for {}s, relay {:?}",
                    self.lifetime.as_secs(),
                    self.relayed
                );
                BodyOutcome::Terminal(TransactionState::Succeeded)
            }
        }
    }

    pub(crate) fn detail(&self) -> CompletionDetail {
        CompletionDetail::Allocate {
            reflexive: self.reflexive,
            relayed: self.relayed,
            lifetime: self.lifetime,
            realm: self.auth.realm.clone(),
            nonce: self.auth.nonce.clone(),
            error_code: self.auth.error_code,
        }
    }
}

/// TURN Refresh request. Lifetime zero releases the allocation; as a
/// keepalive it re-runs every few seconds to survive aggressive NATs.
pub struct ClientRefresh {
    pub auth: AuthState,
    pub lifetime: Duration,
    /// Addresses inherited from the allocation, kept so a resurrected
    /// refresh can republish them.
    pub reflexive: Option<SocketAddr>,
    pub relayed: Option<SocketAddr>,
}

impl ClientRefresh {
    pub fn new(auth: AuthState, lifetime: Duration) -> Self {
        ClientRefresh {
            auth,
            lifetime,
            reflexive: None,
            relayed: None,
        }
    }

    pub(crate) fn compose(&mut self, id: TransactionId) -> stun::Result<Vec<u8>> {
        let authenticated = self.auth.authenticated();
        let lifetime = self.lifetime;
        self.auth.compose(REFRESH_REQUEST, id, |m| {
            if authenticated {
                Lifetime(lifetime).add_to(m)?;
            }
            Ok(())
        })
    }

    pub(crate) fn process(
        &mut self,
        msg: &Message,
        _source: SocketAddr,
        id: &mut TransactionId,
    ) -> BodyOutcome {
        match self.auth.advance(msg, id) {
            AuthStep::Retry => BodyOutcome::Continue,
            AuthStep::Failed => BodyOutcome::Terminal(TransactionState::Failed),
            AuthStep::Success => {
                let mut lifetime = Lifetime::default();
                if lifetime.get_from(msg).is_ok() {
                    self.lifetime = lifetime.0;
                }
                BodyOutcome::Terminal(TransactionState::Succeeded)
            }
        }
    }

    pub(crate) fn detail(&self) -> CompletionDetail {
        CompletionDetail::Refresh {
            lifetime: self.lifetime,
            reflexive: self.reflexive,
            relayed: self.relayed,
            error_code: self.auth.error_code,
        }
    }
}

/// TURN ChannelBind request tying a channel number to one peer address.
pub struct ClientChannelBind {
    pub auth: AuthState,
    pub number: u16,
    pub peer: SocketAddr,
}

impl ClientChannelBind {
    pub fn new(auth: AuthState, number: u16, peer: SocketAddr) -> Self {
        ClientChannelBind { auth, number, peer }
    }

    pub(crate) fn compose(&mut self, id: TransactionId) -> stun::Result<Vec<u8>> {
        let number = self.number;
        let peer = self.peer;
        self.auth.compose(CHANNEL_BIND_REQUEST, id, |m| {
            ChannelNumber(number).add_to(m)?;
            PeerAddress {
                ip: peer.ip(),
                port: peer.port(),
            }
            .add_to(m)
        })
    }

    pub(crate) fn process(
        &mut self,
        msg: &Message,
        _source: SocketAddr,
        id: &mut TransactionId,
    ) -> BodyOutcome {
        match self.auth.advance(msg, id) {
            AuthStep::Retry => BodyOutcome::Continue,
            AuthStep::Failed => {
                log::warn!("channel bind for {} failed: {}", self.peer, self.auth.error_code);
                BodyOutcome::Terminal(TransactionState::Failed)
            }
            AuthStep::Success => {
                log::debug!("peer {} bound to channel 0x{:x}", self.peer, self.number);
                BodyOutcome::Terminal(TransactionState::Succeeded)
            }
        }
    }

    pub(crate) fn detail(&self) -> CompletionDetail {
        CompletionDetail::ChannelBind {
            number: self.number,
            peer: self.peer,
            error_code: self.auth.error_code,
        }
    }
}

/// TURN CreatePermission request authorizing traffic from a set of peers.
pub struct ClientCreatePermission {
    pub auth: AuthState,
    pub peers: Vec<SocketAddr>,
}

impl ClientCreatePermission {
    pub fn new(auth: AuthState) -> Self {
        ClientCreatePermission {
            auth,
            peers: Vec::new(),
        }
    }

    /// Queues a peer address for the permission. Loopback, LAN and IPv6
    /// addresses are skipped (permissions are keyed by public IPv4), as are
    /// duplicates of an already queued host.
    pub fn add_peer(&mut self, addr: SocketAddr) {
        let ip = addr.ip();
        if ip.is_loopback() || ip.is_unspecified() || net::is_lan(&ip) || !ip.is_ipv4() {
            return;
        }
        if self.peers.iter().any(|p| p.ip() == ip) {
            return;
        }
        log::debug!("permission will be installed for {ip}");
        self.peers.push(addr);
    }

    pub(crate) fn compose(&mut self, id: TransactionId) -> stun::Result<Vec<u8>> {
        let peers = self.peers.clone();
        self.auth.compose(CREATE_PERMISSION_REQUEST, id, |m| {
            for peer in &peers {
                PeerAddress {
                    ip: peer.ip(),
                    port: peer.port(),
                }
                .add_to(m)?;
            }
            Ok(())
        })
    }

    pub(crate) fn process(
        &mut self,
        msg: &Message,
        _source: SocketAddr,
        id: &mut TransactionId,
    ) -> BodyOutcome {
        match self.auth.advance(msg, id) {
            AuthStep::Retry => BodyOutcome::Continue,
            AuthStep::Failed => BodyOutcome::Terminal(TransactionState::Failed),
            AuthStep::Success => BodyOutcome::Terminal(TransactionState::Succeeded),
        }
    }

    pub(crate) fn detail(&self) -> CompletionDetail {
        CompletionDetail::CreatePermission {
            error_code: self.auth.error_code,
        }
    }
}

/// Builds a Send indication wrapping `data` toward `peer`. Stateless: not
/// retransmitted and never enqueued in a transaction list.
pub fn build_send_indication(peer: SocketAddr, data: &[u8]) -> stun::Result<Vec<u8>> {
    let mut m = Message::new();
    m.build(&[
        &SEND_INDICATION,
        &TransactionId::new(),
        &PeerAddress {
            ip: peer.ip(),
            port: peer.port(),
        },
        &Data(data.to_vec()),
    ])?;
    Ok(m.raw)
}

/// Allocates channel numbers for one stream: random seed inside the legal
/// range, then increments, wrapping back to the bottom.
pub struct ChannelNumberAllocator {
    next: u16,
}

impl Default for ChannelNumberAllocator {
    fn default() -> Self {
        ChannelNumberAllocator {
            next: rand::thread_rng().gen_range(MIN_CHANNEL_NUMBER..MAX_CHANNEL_NUMBER),
        }
    }
}

impl ChannelNumberAllocator {
    pub fn allocate(&mut self) -> u16 {
        if self.next > MAX_CHANNEL_NUMBER {
            self.next = MIN_CHANNEL_NUMBER;
        }
        let number = self.next;
        self.next += 1;
        number
    }
}
