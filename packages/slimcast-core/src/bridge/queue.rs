//! Per-device RPC sequencing: the single-flight call gate and the
//! semantic action queue.
//!
//! Two layers cooperate:
//!
//! - [`RpcGate`] enforces at-most-one outstanding SOAP call per device.
//!   Submissions while busy are FIFO-queued and fired as completions
//!   arrive. Cookies are assigned at submission and are strictly
//!   monotonic, so they double as the correlation tokens ordered actions
//!   gate on.
//! - [`ActionQueue`] holds pending player actions (play, pause, next).
//!   The head drains during state reconciliation once it is unordered or
//!   its gating cookie has been acknowledged.
//!
//! `Stop` bypasses both: it flushes everything and fires immediately —
//! stop must win.

use std::collections::VecDeque;

use crate::upnp::soap::SoapCall;

/// A call with its assigned correlation cookie, ready to fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub cookie: u32,
    pub call: SoapCall,
}

/// Single-flight gate over a device's SOAP calls.
#[derive(Debug, Default)]
pub struct RpcGate {
    seq: u32,
    in_flight: Option<u32>,
    last_ack: u32,
    queue: VecDeque<PendingCall>,
}

impl RpcGate {
    /// Highest acknowledged cookie.
    #[must_use]
    pub fn last_ack(&self) -> u32 {
        self.last_ack
    }

    /// Whether a call is currently outstanding.
    #[must_use]
    pub fn busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn next_cookie(&mut self) -> u32 {
        self.seq += 1;
        self.seq
    }

    /// Submits a call. Returns its cookie and, when the flight slot was
    /// free, the call to fire now; otherwise it was queued.
    pub fn submit(&mut self, call: SoapCall) -> (u32, Option<PendingCall>) {
        let cookie = self.next_cookie();
        let pending = PendingCall { cookie, call };
        if self.in_flight.is_none() {
            self.in_flight = Some(cookie);
            (cookie, Some(pending))
        } else {
            self.queue.push_back(pending);
            (cookie, None)
        }
    }

    /// Submits a status poll: fired only when the flight slot is free,
    /// dropped otherwise (the next poll tick retries, so polls can never
    /// pile up behind a slow renderer).
    pub fn submit_poll(&mut self, call: SoapCall) -> Option<PendingCall> {
        if self.in_flight.is_some() {
            return None;
        }
        let cookie = self.next_cookie();
        self.in_flight = Some(cookie);
        Some(PendingCall { cookie, call })
    }

    /// Stop path: flushes the queue and fires regardless of the flight
    /// slot. A completion for a bypassed in-flight call may still arrive;
    /// [`RpcGate::complete`] tolerates it.
    pub fn force_submit(&mut self, call: SoapCall) -> PendingCall {
        self.queue.clear();
        let cookie = self.next_cookie();
        self.in_flight = Some(cookie);
        PendingCall { cookie, call }
    }

    /// Records a completion and returns the next queued call to fire, if
    /// the completed call held the flight slot.
    pub fn complete(&mut self, cookie: u32) -> Option<PendingCall> {
        self.last_ack = self.last_ack.max(cookie);
        if self.in_flight != Some(cookie) {
            // stale completion of a call bypassed by Stop
            return None;
        }
        self.in_flight = None;
        let next = self.queue.pop_front()?;
        self.in_flight = Some(next.cookie);
        Some(next)
    }

    /// Drops all queued (not yet fired) calls.
    pub fn flush(&mut self) {
        self.queue.clear();
    }

    /// Queued call count (not counting the one in flight).
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Semantic action queue
// ─────────────────────────────────────────────────────────────────────────────

/// Player action kinds that can wait in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Play,
    Unpause,
    Pause,
    /// Gapless nudge: the renderer stopped before rolling to the next URI.
    Next,
}

/// One queued player action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    /// Cookie an ordered action gates on (`cookie <= last_ack`).
    pub cookie: Option<u32>,
    pub ordered: bool,
}

impl Action {
    /// An unordered action, dispatchable as soon as it reaches the head.
    #[must_use]
    pub fn unordered(kind: ActionKind) -> Self {
        Self { kind, cookie: None, ordered: false }
    }

    /// An action gated on the acknowledgement of `cookie`.
    #[must_use]
    pub fn ordered(kind: ActionKind, cookie: u32) -> Self {
        Self { kind, cookie: Some(cookie), ordered: true }
    }

    /// Whether the gate allows this action to dispatch.
    #[must_use]
    pub fn ready(&self, last_ack: u32) -> bool {
        !self.ordered || self.cookie.map_or(true, |c| c <= last_ack)
    }
}

/// FIFO of pending player actions.
#[derive(Debug, Default)]
pub struct ActionQueue {
    queue: VecDeque<Action>,
}

impl ActionQueue {
    pub fn push(&mut self, action: Action) {
        self.queue.push_back(action);
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Action> {
        self.queue.front()
    }

    pub fn pop(&mut self) -> Option<Action> {
        self.queue.pop_front()
    }

    pub fn flush(&mut self) {
        self.queue.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
