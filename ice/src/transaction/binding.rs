use std::net::SocketAddr;

use stun::addr::MappedAddress;
use stun::attributes::*;
use stun::error_code::ErrorCodeAttribute;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;

use crate::control::{AttrControlled, AttrControlling};
use crate::priority::PriorityAttr;
use crate::transaction::{BodyOutcome, CompletionDetail, TransactionState};
use crate::use_candidate::UseCandidateAttr;
use crate::AgentRole;

/// Plain Binding request toward a STUN server, used to discover the
/// server-reflexive address while gathering.
#[derive(Default)]
pub struct ClientBinding {
    pub mapped: Option<SocketAddr>,
    pub response_source: Option<SocketAddr>,
    pub error_code: u16,
}

impl ClientBinding {
    pub(crate) fn compose(&mut self, id: TransactionId) -> stun::Result<Vec<u8>> {
        let mut m = Message::new();
        m.build(&[&BINDING_REQUEST, &id])?;
        Ok(m.raw)
    }

    pub(crate) fn process(&mut self, msg: &Message, source: SocketAddr) -> BodyOutcome {
        if msg.typ.class != CLASS_SUCCESS_RESPONSE && msg.typ.class != CLASS_ERROR_RESPONSE {
            return BodyOutcome::Ignored;
        }

        let mut error = ErrorCodeAttribute::default();
        if error.get_from(msg).is_ok() {
            self.error_code = error.code.0;
            return BodyOutcome::Terminal(TransactionState::Failed);
        }
        if msg.typ.class == CLASS_ERROR_RESPONSE {
            // empty error responses exist in the wild
            return BodyOutcome::Terminal(TransactionState::Failed);
        }

        let mut xor = XorMappedAddress::default();
        if xor.get_from(msg).is_ok() {
            self.mapped = Some(SocketAddr::new(xor.ip, xor.port));
        } else {
            let mut plain = MappedAddress::default();
            if plain.get_from(msg).is_ok() {
                self.mapped = Some(SocketAddr::new(plain.ip, plain.port));
            }
        }

        if self.mapped.is_none() {
            return BodyOutcome::Ignored;
        }
        self.response_source = Some(source);
        BodyOutcome::Terminal(TransactionState::Succeeded)
    }

    pub(crate) fn detail(&self) -> CompletionDetail {
        CompletionDetail::Binding {
            mapped: self.mapped,
            error_code: self.error_code,
        }
    }
}

/// An ICE connectivity check: an authenticated Binding request toward one
/// remote candidate.
pub struct ConnectivityCheck {
    /// `remote_ufrag:local_ufrag`.
    pub username: String,
    /// The remote peer's password; keys both the request and the response.
    pub password: String,
    pub role: AgentRole,
    pub tie_breaker: u64,
    pub priority: u32,
    pub use_candidate: bool,

    pub mapped: Option<SocketAddr>,
    pub response_source: Option<SocketAddr>,
    pub error_code: u16,
}

impl ConnectivityCheck {
    pub fn new(
        username: String,
        password: String,
        role: AgentRole,
        tie_breaker: u64,
        priority: u32,
    ) -> Self {
        ConnectivityCheck {
            username,
            password,
            role,
            tie_breaker,
            priority,
            use_candidate: false,
            mapped: None,
            response_source: None,
            error_code: 0,
        }
    }

    pub(crate) fn compose(&mut self, id: TransactionId) -> stun::Result<Vec<u8>> {
        let username = TextAttribute::new(ATTR_USERNAME, self.username.clone());
        let priority = PriorityAttr(self.priority);
        let controlling = AttrControlling(self.tie_breaker);
        let controlled = AttrControlled(self.tie_breaker);
        let integrity = MessageIntegrity::new_short_term(&self.password);

        let mut setters: Vec<&dyn Setter> = vec![&BINDING_REQUEST, &id, &username, &priority];
        match self.role {
            AgentRole::Controlling => setters.push(&controlling),
            AgentRole::Controlled => setters.push(&controlled),
        }
        let use_candidate = UseCandidateAttr;
        if self.use_candidate {
            setters.push(&use_candidate);
        }
        setters.push(&integrity);
        setters.push(&FINGERPRINT);

        let mut m = Message::new();
        m.build(&setters)?;
        Ok(m.raw)
    }

    pub(crate) fn process(&mut self, msg: &Message, source: SocketAddr) -> BodyOutcome {
        if msg.typ.class != CLASS_SUCCESS_RESPONSE && msg.typ.class != CLASS_ERROR_RESPONSE {
            return BodyOutcome::Ignored;
        }

        // a success response is keyed with the same short-term credential;
        // error responses (487 among them) may arrive unauthenticated
        if msg.typ.class == CLASS_SUCCESS_RESPONSE || msg.contains(ATTR_MESSAGE_INTEGRITY) {
            let mut copy = msg.clone();
            let integrity = MessageIntegrity::new_short_term(&self.password);
            if integrity.check(&mut copy).is_err() {
                log::debug!("dropping check response failing the integrity check");
                return BodyOutcome::Ignored;
            }
        }

        let mut error = ErrorCodeAttribute::default();
        if error.get_from(msg).is_ok() {
            self.error_code = error.code.0;
            return BodyOutcome::Terminal(TransactionState::Failed);
        }
        if msg.typ.class == CLASS_ERROR_RESPONSE {
            return BodyOutcome::Terminal(TransactionState::Failed);
        }

        let mut xor = XorMappedAddress::default();
        if xor.get_from(msg).is_ok() {
            self.mapped = Some(SocketAddr::new(xor.ip, xor.port));
        } else {
            let mut plain = MappedAddress::default();
            if plain.get_from(msg).is_ok() {
                self.mapped = Some(SocketAddr::new(plain.ip, plain.port));
            }
        }

        if self.mapped.is_none() {
            return BodyOutcome::Ignored;
        }
        self.response_source = Some(source);
        BodyOutcome::Terminal(TransactionState::Succeeded)
    }

    pub(crate) fn detail(&self) -> CompletionDetail {
        CompletionDetail::Check {
            mapped: self.mapped,
            response_source: self.response_source,
            error_code: self.error_code,
            priority: self.priority,
        }
    }
}

/// A Binding indication toward the nominated peer; keeps the NAT pinhole
/// open for the media path.
#[derive(Default)]
pub struct BindingIndication;

impl BindingIndication {
    pub(crate) fn compose(&mut self, id: TransactionId) -> stun::Result<Vec<u8>> {
        let mut m = Message::new();
        m.build(&[&BINDING_INDICATION, &id])?;
        Ok(m.raw)
    }
}

/// Role carried by an incoming Binding request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteRole {
    None,
    Controlled,
    Controlling,
}

/// Server side of a connectivity check: parses an incoming Binding request
/// and renders the matching response.
pub struct ServerBinding {
    pub transaction_id: TransactionId,
    pub source: SocketAddr,
    pub priority: Option<u32>,
    pub use_candidate: bool,
    pub remote_role: RemoteRole,
    pub remote_tie_breaker: u64,
    /// Request lacked USERNAME or MESSAGE-INTEGRITY.
    pub bad_request: bool,
    role_conflict: bool,
}

impl ServerBinding {
    /// Accepts a Binding request; anything else returns None.
    pub fn from_request(msg: &Message, source: SocketAddr) -> Option<ServerBinding> {
        if msg.typ.method != METHOD_BINDING || msg.typ.class != CLASS_REQUEST {
            return None;
        }

        let mut priority = None;
        let mut p = PriorityAttr::default();
        if p.get_from(msg).is_ok() {
            priority = Some(p.0);
        }

        let mut remote_role = RemoteRole::None;
        let mut remote_tie_breaker = 0;
        let mut controlled = AttrControlled::default();
        let mut controlling = AttrControlling::default();
        if controlled.get_from(msg).is_ok() {
            remote_role = RemoteRole::Controlled;
            remote_tie_breaker = controlled.0;
        } else if controlling.get_from(msg).is_ok() {
            remote_role = RemoteRole::Controlling;
            remote_tie_breaker = controlling.0;
        }

        let bad_request =
            !msg.contains(ATTR_USERNAME) || !msg.contains(ATTR_MESSAGE_INTEGRITY);

        Some(ServerBinding {
            transaction_id: msg.transaction_id,
            source,
            priority,
            use_candidate: UseCandidateAttr::is_set(msg),
            remote_role,
            remote_tie_breaker,
            bad_request,
            role_conflict: false,
        })
    }

    /// Instructs the response builder to answer 487 Role Conflict.
    pub fn set_role_conflict(&mut self) {
        self.role_conflict = true;
    }

    /// Builds the response datagram. Success responses are keyed with the
    /// local password; error responses stay unauthenticated.
    pub fn generate_response(&self, local_password: &str) -> stun::Result<Vec<u8>> {
        let mut m = Message::new();

        if self.bad_request {
            m.build(&[
                &BINDING_ERROR,
                &self.transaction_id,
                &stun::error_code::CODE_BAD_REQUEST,
            ])?;
            return Ok(m.raw);
        }
        if self.role_conflict {
            m.build(&[
                &BINDING_ERROR,
                &self.transaction_id,
                &stun::error_code::CODE_ROLE_CONFLICT,
            ])?;
            return Ok(m.raw);
        }

        let mapped = MappedAddress {
            ip: self.source.ip(),
            port: self.source.port(),
        };
        let xor_mapped = XorMappedAddress {
            ip: self.source.ip(),
            port: self.source.port(),
        };
        let integrity = MessageIntegrity::new_short_term(local_password);
        m.build(&[
            &BINDING_SUCCESS,
            &self.transaction_id,
            &mapped,
            &xor_mapped,
            &integrity,
            &FINGERPRINT,
        ])?;
        Ok(m.raw)
    }
}
