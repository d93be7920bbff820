//! Reliable emission on top of an unreliable channel.
//!
//! A reliable message is sent once immediately and then resent every
//! `interval` until `repeat` copies have gone out or the peer acknowledges
//! it with `{"RELIABLE_ACK": "<id>"}`. The receiving side acknowledges every
//! copy but dispatches each id only once.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;

/// How many inbound ids each peer remembers for duplicate filtering
pub const RECENT_ID_WINDOW: usize = 256;

/// Redelivery parameters for one emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reliable {
    pub interval: Duration,
    /// Total number of copies, including the first send
    pub repeat: u32,
}

impl Reliable {
    pub fn new(interval: Duration, repeat: u32) -> Self {
        Self { interval, repeat }
    }
}

impl Default for Reliable {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(150),
            repeat: 10,
        }
    }
}

/// Outbound reliable messages still waiting for an acknowledgement
#[derive(Debug, Default)]
pub(crate) struct PendingAcks {
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl PendingAcks {
    pub fn register(&self, id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.to_string(), tx);
        rx
    }

    /// Resolve a pending message; false if the id is unknown or already done
    pub fn ack(&self, id: &str) -> bool {
        match self.pending.lock().remove(id) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn forget(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    /// Stop every pending redelivery
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Bounded window of recently seen inbound ids
#[derive(Debug)]
pub(crate) struct RecentIds {
    capacity: usize,
    window: Mutex<(VecDeque<String>, HashSet<String>)>,
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::with_capacity(RECENT_ID_WINDOW)
    }
}

impl RecentIds {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            window: Mutex::new((VecDeque::with_capacity(capacity), HashSet::new())),
        }
    }

    /// Record `id`; true the first time it is seen within the window
    pub fn first_sight(&self, id: &str) -> bool {
        let mut window = self.window.lock();
        let (order, seen) = &mut *window;
        if seen.contains(id) {
            return false;
        }
        if order.len() == self.capacity {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
        order.push_back(id.to_string());
        seen.insert(id.to_string());
        true
    }
}

/// Resend loop run after the first copy went out.
///
/// `send` returns false once the channel is gone. The loop ends early when
/// `acked` resolves, including when its sender is dropped.
pub(crate) async fn redeliver(
    reliable: Reliable,
    mut acked: oneshot::Receiver<()>,
    mut send: impl FnMut() -> bool,
) -> u32 {
    let mut sent = 1;
    while sent < reliable.repeat {
        tokio::select! {
            _ = &mut acked => break,
            _ = tokio::time::sleep(reliable.interval) => {
                if !send() {
                    break;
                }
                sent += 1;
            }
        }
    }
    sent
}
