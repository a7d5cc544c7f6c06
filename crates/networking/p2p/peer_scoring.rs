use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Misbehaviour classes a peer can be charged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offence {
    InvalidSignature,
    MalformedPayload,
    OversizeFrame,
    UnknownCommand,
    StaleOrDuplicateData,
}

impl Offence {
    pub fn weight(self) -> u32 {
        match self {
            Offence::InvalidSignature => 40,
            Offence::MalformedPayload => 30,
            Offence::OversizeFrame => 50,
            Offence::UnknownCommand => 10,
            Offence::StaleOrDuplicateData => 5,
        }
    }
}

/// Score threshold that triggers disconnect plus a cooldown ban.
pub const DISCONNECT_THRESHOLD: u32 = 100;

/// How long a banned address stays unreachable.
pub const BAN_COOLDOWN: Duration = Duration::from_secs(10 * 60);

/// Accumulated misbehaviour for one connected peer.
#[derive(Debug, Default)]
pub struct PeerScore {
    score: u32,
    offences: HashMap<Offence, u32>,
}

impl PeerScore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charges the offence; returns true once the peer crossed the
    /// disconnect threshold.
    pub fn charge(&mut self, offence: Offence) -> bool {
        self.score = self.score.saturating_add(offence.weight());
        *self.offences.entry(offence).or_insert(0) += 1;
        self.score >= DISCONNECT_THRESHOLD
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn count(&self, offence: Offence) -> u32 {
        self.offences.get(&offence).copied().unwrap_or(0)
    }
}

/// Cooldown ban list keyed by remote address. Entries expire lazily.
#[derive(Debug, Default)]
pub struct BanList {
    banned: HashMap<IpAddr, Instant>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&mut self, address: IpAddr) {
        self.banned.insert(address, Instant::now() + BAN_COOLDOWN);
    }

    pub fn is_banned(&mut self, address: &IpAddr) -> bool {
        match self.banned.get(address) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                self.banned.remove(address);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.banned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_offences_cross_the_threshold() {
        let mut score = PeerScore::new();
        assert!(!score.charge(Offence::InvalidSignature)); // 40
        assert!(!score.charge(Offence::MalformedPayload)); // 70
        assert!(score.charge(Offence::MalformedPayload)); // 100
        assert_eq!(score.count(Offence::MalformedPayload), 2);
    }

    #[test]
    fn single_oversize_frames_accumulate_fast() {
        let mut score = PeerScore::new();
        assert!(!score.charge(Offence::OversizeFrame));
        assert!(score.charge(Offence::OversizeFrame));
    }

    #[test]
    fn ban_list_holds_until_cooldown() {
        let mut bans = BanList::new();
        let addr: IpAddr = "10.0.0.1".parse().expect("addr");
        assert!(!bans.is_banned(&addr));
        bans.ban(addr);
        assert!(bans.is_banned(&addr));
    }
}
