use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Which gathering mechanism the configured servers speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatherMode {
    /// Binding requests only; yields server-reflexive candidates.
    StunOnly,
    /// Allocate requests; yields relayed and server-reflexive candidates.
    TurnOnly,
}

/// Interval at which TURN permissions and channel bindings are refreshed;
/// comfortably below the 300 s server-side lifetime.
pub const PERMISSION_REFRESH_INTERVAL: Duration = Duration::from_secs(240);

/// Allocation refresh interval. Far below Lifetime/2 so the allocation and
/// its NAT pinhole survive aggressive NAT idle timers.
pub const ALLOCATION_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Agent configuration. The defaults mirror a plain dual-stack softphone
/// setup with no servers configured.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// STUN/TURN servers reachable over IPv4 and IPv6 respectively.
    pub servers_v4: Vec<SocketAddr>,
    pub servers_v6: Vec<SocketAddr>,
    pub mode: GatherMode,

    pub use_ipv4: bool,
    pub use_ipv6: bool,
    /// Request an IPv4 relay through an IPv6-only wire (RFC 6156) when no
    /// IPv4 path exists.
    pub use_protocol_relay: bool,

    pub turn_username: String,
    pub turn_password: String,
    pub turn_lifetime: Duration,

    /// Overall time limit covering gathering plus checking.
    pub session_timeout: Duration,
    /// Connectivity-check pacing tick.
    pub tick_interval: Duration,
    pub initial_rto: Duration,
    pub keepalive_interval: Duration,
    /// Grace period to let LAN pairs complete before nominating a pair
    /// that crossed a server.
    pub nomination_wait: Duration,

    /// Used only to pick the best source interface for the default
    /// candidate when no reflexive candidate exists.
    pub fallback_target_ip: IpAddr,

    /// Gather on loopback interfaces too; off outside of tests.
    pub include_loopback: bool,
    /// Add USE-CANDIDATE to every check from the controlling side. RFC
    /// violation corner; off by default.
    pub aggressive_nomination: bool,
    /// Treat an incoming request for an in-progress pair as confirmation of
    /// the reverse check. RFC violation corner; off by default.
    pub treat_request_as_confirmation: bool,

    /// Hard cap of the check list after pruning.
    pub check_list_limit: usize,
    /// Cap of candidates taken from one session-description side.
    pub candidate_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            servers_v4: Vec::new(),
            servers_v6: Vec::new(),
            mode: GatherMode::StunOnly,
            use_ipv4: true,
            use_ipv6: true,
            use_protocol_relay: false,
            turn_username: String::new(),
            turn_password: String::new(),
            turn_lifetime: Duration::from_secs(600),
            session_timeout: Duration::from_millis(8000),
            tick_interval: Duration::from_millis(5),
            initial_rto: Duration::from_millis(100),
            keepalive_interval: Duration::from_millis(5000),
            nomination_wait: Duration::from_millis(50),
            fallback_target_ip: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            include_loopback: false,
            aggressive_nomination: false,
            treat_request_as_confirmation: false,
            check_list_limit: 100,
            candidate_limit: 64,
        }
    }
}

impl AgentConfig {
    pub fn stun_enabled(&self) -> bool {
        self.mode == GatherMode::StunOnly
    }

    pub fn turn_enabled(&self) -> bool {
        self.mode == GatherMode::TurnOnly
    }
}
