#[cfg(test)]
mod timer_test;

use std::time::{Duration, Instant};

/// Retransmission attempts before a transaction may be declared dead.
pub const RTO_ATTEMPT_LIMIT: u32 = 10;

pub const DEFAULT_INITIAL_RTO: Duration = Duration::from_millis(100);

/// PacketScheduler paces the retransmissions of one request.
///
/// The first `is_time_to_retransmit` fires immediately; each recorded
/// attempt doubles the RTO. The transaction is timed out once the attempt
/// limit is exhausted and 16 RTOs have passed since the last send.
#[derive(Debug, Clone)]
pub struct PacketScheduler {
    initial_rto: Duration,
    last_rto: Duration,
    attempts: u32,
    last_send: Option<Instant>,
}

impl Default for PacketScheduler {
    fn default() -> Self {
        PacketScheduler::new(DEFAULT_INITIAL_RTO)
    }
}

impl PacketScheduler {
    pub fn new(initial_rto: Duration) -> Self {
        PacketScheduler {
            initial_rto,
            last_rto: initial_rto,
            attempts: 0,
            last_send: None,
        }
    }

    pub fn set_initial_rto(&mut self, rto: Duration) {
        self.initial_rto = rto;
    }

    /// Re-arms the scheduler for a fresh request.
    pub fn restart(&mut self) {
        self.last_rto = self.initial_rto;
        self.attempts = 0;
        self.last_send = None;
    }

    pub fn is_time_to_retransmit(&self) -> bool {
        match self.last_send {
            None => true,
            Some(ts) => ts.elapsed() >= self.last_rto,
        }
    }

    pub fn attempt_made(&mut self) {
        self.attempts += 1;
        self.last_send = Some(Instant::now());
        self.last_rto *= 2;
    }

    pub fn attempt_limit_reached(&self) -> bool {
        self.attempts >= RTO_ATTEMPT_LIMIT
    }

    pub fn is_timeout(&self) -> bool {
        if !self.attempt_limit_reached() {
            return false;
        }
        match self.last_send {
            None => false,
            Some(ts) => ts.elapsed() > self.last_rto * 16,
        }
    }
}

/// TickTimer spaces connectivity checks: `is_time_to_send` yields true once
/// per elapsed interval, catching up if polling fell behind.
#[derive(Debug, Clone, Default)]
pub struct TickTimer {
    enabled: bool,
    interval: Duration,
    last: Option<Instant>,
    pending: u32,
}

impl TickTimer {
    pub fn start(&mut self, interval: Duration) {
        self.enabled = true;
        self.interval = interval.max(Duration::from_millis(1));
        self.last = None;
        self.pending = 0;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
        self.last = None;
        self.pending = 0;
    }

    pub fn is_time_to_send(&mut self) -> bool {
        if !self.enabled {
            return false;
        }

        let now = Instant::now();
        let last = match self.last {
            None => {
                // the first tick fires immediately
                self.last = Some(now);
                return true;
            }
            Some(last) => last,
        };

        let elapsed = now.duration_since(last);
        if elapsed >= self.interval {
            let ticks = (elapsed.as_micros() / self.interval.as_micros()) as u32;
            self.pending = self.pending.saturating_add(ticks);
            self.last = Some(last + self.interval * ticks);
        }

        if self.pending > 0 {
            self.pending -= 1;
            true
        } else {
            false
        }
    }
}
