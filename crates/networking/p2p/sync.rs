//! Header-first chain sync.
//!
//! Headers are pulled in batches from the best-advertised peer; once the
//! header chain runs ahead of the body chain, missing bodies are requested
//! by index in fixed windows with a per-peer in-flight limit. Requests that
//! sit unanswered past the deadline are re-queued against a different peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::payloads::GetBlockByIndexPayload;

/// Header batch size per request.
pub const HEADER_BATCH: i16 = 2_000;

/// Body indices requested per `getblockbyindex`.
pub const BODY_WINDOW: u16 = 50;

/// Concurrent body requests charged to one peer.
pub const PER_PEER_IN_FLIGHT: usize = 16;

/// Deadline before a pending request is re-queued elsewhere.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(15);

/// A planned request against one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    Headers {
        peer: SocketAddr,
        payload: GetBlockByIndexPayload,
    },
    Bodies {
        peer: SocketAddr,
        payload: GetBlockByIndexPayload,
    },
}

#[derive(Debug, Clone)]
struct PendingWindow {
    peer: SocketAddr,
    issued: Instant,
}

/// Tracks outstanding requests and plans the next ones. Driven by the
/// network plane on a timer plus block/header arrival events; owns no IO.
#[derive(Debug, Default)]
pub struct SyncTracker {
    /// Window start index -> outstanding request.
    pending_bodies: HashMap<u32, PendingWindow>,
    headers_in_flight: Option<PendingWindow>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans requests given the local chain state and the connected peers
    /// with their advertised heights.
    pub fn plan(
        &mut self,
        height: u32,
        header_height: u32,
        peers: &[(SocketAddr, u32)],
        now: Instant,
    ) -> Vec<SyncRequest> {
        self.expire(now);
        let mut requests = Vec::new();

        let best = peers.iter().max_by_key(|(_, peer_height)| *peer_height);
        let Some((best_peer, best_height)) = best else {
            return requests;
        };

        // Headers first: one batch outstanding at a time.
        if *best_height > header_height && self.headers_in_flight.is_none() {
            self.headers_in_flight = Some(PendingWindow {
                peer: *best_peer,
                issued: now,
            });
            requests.push(SyncRequest::Headers {
                peer: *best_peer,
                payload: GetBlockByIndexPayload {
                    index_start: header_height + 1,
                    count: HEADER_BATCH,
                },
            });
        }

        // Bodies behind the header chain, windowed across useful peers.
        let mut in_flight_per_peer: HashMap<SocketAddr, usize> = HashMap::new();
        for window in self.pending_bodies.values() {
            *in_flight_per_peer.entry(window.peer).or_insert(0) += 1;
        }

        let mut window_start = height + 1;
        while window_start <= header_height {
            if !self.pending_bodies.contains_key(&window_start) {
                let peer = peers
                    .iter()
                    .filter(|(_, peer_height)| *peer_height >= window_start)
                    .map(|(addr, _)| *addr)
                    .find(|addr| {
                        in_flight_per_peer.get(addr).copied().unwrap_or(0) < PER_PEER_IN_FLIGHT
                    });
                let Some(peer) = peer else {
                    break; // every capable peer is saturated
                };
                *in_flight_per_peer.entry(peer).or_insert(0) += 1;
                self.pending_bodies
                    .insert(window_start, PendingWindow { peer, issued: now });
                let count = (header_height - window_start + 1).min(u32::from(BODY_WINDOW)) as i16;
                requests.push(SyncRequest::Bodies {
                    peer,
                    payload: GetBlockByIndexPayload {
                        index_start: window_start,
                        count,
                    },
                });
            }
            window_start = match window_start.checked_add(u32::from(BODY_WINDOW)) {
                Some(next) => next,
                None => break,
            };
        }
        requests
    }

    /// Drops requests that outlived the deadline so `plan` can re-issue
    /// them against another peer.
    fn expire(&mut self, now: Instant) {
        self.pending_bodies
            .retain(|_, window| now.duration_since(window.issued) < REQUEST_DEADLINE);
        if let Some(window) = &self.headers_in_flight {
            if now.duration_since(window.issued) >= REQUEST_DEADLINE {
                self.headers_in_flight = None;
            }
        }
    }

    /// A headers response landed.
    pub fn on_headers(&mut self) {
        self.headers_in_flight = None;
    }

    /// A block landed; clears the window once its whole range is below the
    /// new height.
    pub fn on_block(&mut self, height: u32) {
        self.pending_bodies
            .retain(|start, _| *start + u32::from(BODY_WINDOW) - 1 > height);
    }

    /// The peer went away; its outstanding requests become re-plannable.
    pub fn on_peer_dropped(&mut self, peer: &SocketAddr) {
        self.pending_bodies.retain(|_, window| window.peer != *peer);
        if self
            .headers_in_flight
            .as_ref()
            .is_some_and(|window| window.peer == *peer)
        {
            self.headers_in_flight = None;
        }
    }

    pub fn pending_body_windows(&self) -> usize {
        self.pending_bodies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> SocketAddr {
        format!("10.0.0.{n}:10333").parse().expect("addr")
    }

    #[test]
    fn idle_when_caught_up() {
        let mut tracker = SyncTracker::new();
        let requests = tracker.plan(100, 100, &[(addr(1), 100)], Instant::now());
        assert!(requests.is_empty());
    }

    #[test]
    fn requests_headers_from_best_peer() {
        let mut tracker = SyncTracker::new();
        let peers = [(addr(1), 150), (addr(2), 900)];
        let requests = tracker.plan(100, 100, &peers, Instant::now());
        assert_eq!(
            requests,
            vec![SyncRequest::Headers {
                peer: addr(2),
                payload: GetBlockByIndexPayload {
                    index_start: 101,
                    count: HEADER_BATCH,
                },
            }]
        );
        // No duplicate header request while one is in flight.
        assert!(tracker.plan(100, 100, &peers, Instant::now()).is_empty());
        tracker.on_headers();
        assert!(!tracker.plan(100, 100, &peers, Instant::now()).is_empty());
    }

    #[test]
    fn body_windows_respect_per_peer_limit() {
        let mut tracker = SyncTracker::new();
        // Header chain far ahead; a single peer saturates at the limit.
        let requests = tracker.plan(0, 5_000, &[(addr(1), 5_000)], Instant::now());
        let bodies = requests
            .iter()
            .filter(|r| matches!(r, SyncRequest::Bodies { .. }))
            .count();
        assert_eq!(bodies, PER_PEER_IN_FLIGHT);

        // A second peer doubles the budget.
        let mut tracker = SyncTracker::new();
        let peers = [(addr(1), 5_000), (addr(2), 5_000)];
        let requests = tracker.plan(0, 5_000, &peers, Instant::now());
        let bodies = requests
            .iter()
            .filter(|r| matches!(r, SyncRequest::Bodies { .. }))
            .count();
        assert_eq!(bodies, 2 * PER_PEER_IN_FLIGHT);
    }

    #[test]
    fn expired_windows_requeue_to_another_peer() {
        let mut tracker = SyncTracker::new();
        let start = Instant::now();
        let requests = tracker.plan(10, 60, &[(addr(1), 60)], start);
        assert_eq!(requests.len(), 1); // one body window, headers caught up
        assert_eq!(tracker.pending_body_windows(), 1);

        // Before the deadline nothing is re-issued.
        assert!(tracker
            .plan(10, 60, &[(addr(1), 60), (addr(2), 60)], start)
            .is_empty());

        // Past the deadline the window is replanned (peer 1 or 2).
        let later = start + REQUEST_DEADLINE + Duration::from_secs(1);
        let requests = tracker.plan(10, 60, &[(addr(1), 60), (addr(2), 60)], later);
        assert!(requests
            .iter()
            .any(|r| matches!(r, SyncRequest::Bodies { .. })));
    }

    #[test]
    fn completed_windows_are_cleared() {
        let mut tracker = SyncTracker::new();
        tracker.plan(10, 60, &[(addr(1), 60)], Instant::now());
        assert_eq!(tracker.pending_body_windows(), 1);
        tracker.on_block(60);
        assert_eq!(tracker.pending_body_windows(), 0);
    }

    #[test]
    fn dropped_peer_releases_its_windows() {
        let mut tracker = SyncTracker::new();
        tracker.plan(10, 200, &[(addr(1), 200)], Instant::now());
        assert!(tracker.pending_body_windows() > 0);
        tracker.on_peer_dropped(&addr(1));
        assert_eq!(tracker.pending_body_windows(), 0);
    }

    #[test]
    fn peers_below_window_are_skipped() {
        let mut tracker = SyncTracker::new();
        // Peer only has up to 30, window starts at 51.
        let requests = tracker.plan(50, 100, &[(addr(1), 30)], Instant::now());
        assert!(requests
            .iter()
            .all(|r| !matches!(r, SyncRequest::Bodies { .. })));
    }
}
