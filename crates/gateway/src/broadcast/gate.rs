//! Throttled status delivery.
//!
//! At most one non-urgent message per interval reaches subscribers.  A
//! message arriving inside the window is parked; later ones replace it, and
//! a single timer delivers whatever is parked when the window closes.
//! Urgent messages skip the window entirely.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::registry::FanOut;
use super::{StatusMessage, StatusSubscribers};

#[derive(Default)]
struct GateState {
    last_send: Option<Instant>,
    /// Latest message waiting for the window to close.
    pending: Option<StatusMessage>,
    timer_armed: bool,
}

#[derive(Clone)]
pub struct BroadcastGate {
    interval: Duration,
    subscribers: Arc<StatusSubscribers>,
    state: Arc<Mutex<GateState>>,
}

impl BroadcastGate {
    pub fn new(interval: Duration, subscribers: Arc<StatusSubscribers>) -> Self {
        Self {
            interval,
            subscribers,
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deliver now, regardless of the window.
    pub fn send_urgent(&self, msg: StatusMessage) -> FanOut {
        let mut state = self.state.lock();
        state.last_send = Some(Instant::now());
        self.subscribers.fan_out(&msg)
    }

    /// Deliver now if the window is open, otherwise park `msg` for the
    /// deferred send.  Returns the fan-out result when sent immediately.
    pub fn send(&self, msg: StatusMessage) -> Option<FanOut> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let wait = match state.last_send {
            Some(last) => self.interval.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        };
        if wait.is_zero() && !state.timer_armed {
            state.last_send = Some(now);
            return Some(self.subscribers.fan_out(&msg));
        }

        state.pending = Some(msg);
        if !state.timer_armed {
            state.timer_armed = true;
            let gate = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                gate.fire();
            });
        }
        None
    }

    fn fire(&self) {
        let mut state = self.state.lock();
        state.timer_armed = false;
        if let Some(msg) = state.pending.take() {
            state.last_send = Some(Instant::now());
            let out = self.subscribers.fan_out(&msg);
            tracing::trace!(delivered = out.delivered, "deferred status broadcast");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::SubscriberRegistry;

    fn gate(interval_ms: u64) -> (BroadcastGate, Arc<StatusSubscribers>) {
        let subs = Arc::new(SubscriberRegistry::new(64));
        (BroadcastGate::new(Duration::from_millis(interval_ms), subs.clone()), subs)
    }

    fn msg(s: &str) -> StatusMessage {
        Arc::from(s)
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<StatusMessage>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m.to_string());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn first_send_goes_out_immediately() {
        let (gate, subs) = gate(1000);
        let mut sub = subs.attach();
        assert!(gate.send(msg("a")).is_some());
        assert_eq!(drain(&mut sub.rx), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_latest() {
        let (gate, subs) = gate(1000);
        let mut sub = subs.attach();
        gate.send(msg("prime"));
        drain(&mut sub.rx);

        for i in 0..10 {
            tokio::time::advance(Duration::from_millis(50)).await;
            assert!(gate.send(msg(&format!("m{i}"))).is_none());
        }
        assert!(drain(&mut sub.rx).is_empty());

        // Window closes one interval after "prime".
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(drain(&mut sub.rx), vec!["m9"]);

        // Nothing else queued behind it.
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(drain(&mut sub.rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_update_waits_more_than_one_interval() {
        let (gate, subs) = gate(1000);
        let mut sub = subs.attach();
        gate.send(msg("prime"));
        drain(&mut sub.rx);

        tokio::time::advance(Duration::from_millis(10)).await;
        gate.send(msg("late"));
        tokio::time::sleep(Duration::from_millis(995)).await;
        assert_eq!(drain(&mut sub.rx), vec!["late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn urgent_bypasses_pending_window() {
        let (gate, subs) = gate(1000);
        let mut sub = subs.attach();
        gate.send(msg("prime"));
        gate.send(msg("parked"));
        drain(&mut sub.rx);

        gate.send_urgent(msg("restarting"));
        assert_eq!(drain(&mut sub.rx), vec!["restarting"]);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(drain(&mut sub.rx), vec!["parked"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_spaced_by_interval_go_straight_through() {
        let (gate, subs) = gate(100);
        let mut sub = subs.attach();
        for i in 0..3 {
            assert!(gate.send(msg(&i.to_string())).is_some());
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(drain(&mut sub.rx), vec!["0", "1", "2"]);
    }
}
