// Copyright (c) 2026 Marketmesh
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Scored reputation ledger. Scores live in `[MIN, MAX]`, adjusted by vote
//! outcomes and inactivity, with a daily adaptive threshold sweep.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Score floor.
pub const MIN_SCORE: f64 = 0.0;
/// Score ceiling.
pub const MAX_SCORE: f64 = 1.0;
/// Initial score assigned to a never-before-seen peer.
pub const INITIAL_SCORE: f64 = 0.5;

/// How long a peer may go without an action before it accrues an
/// [`Action::Inactivity`] penalty.
pub const INACTIVITY_THRESHOLD: ChronoDuration = ChronoDuration::hours(24);

/// A scored outcome applied to a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// The peer voted in agreement with an accepted record.
    ValidData,
    /// The peer voted in agreement with a rejected record, or cast a vote
    /// later judged wrong.
    InvalidData,
    /// The peer has not acted within [`INACTIVITY_THRESHOLD`].
    Inactivity,
}

impl Action {
    fn delta(self, value: f64) -> f64 {
        match self {
            Action::ValidData => 0.05 * value,
            Action::InvalidData => -0.10 * value,
            Action::Inactivity => -0.01 * value,
        }
    }
}

/// Per-peer scored history.
#[derive(Clone, Debug)]
pub struct PeerReputation {
    /// Current score in `[MIN_SCORE, MAX_SCORE]`.
    pub score: f64,
    /// Time of the last applied action.
    pub last_action: DateTime<Utc>,
    /// Total actions ever applied.
    pub total_actions: u64,
    /// Count of `ValidData` actions.
    pub valid_data: u64,
    /// Count of `InvalidData` actions.
    pub invalid_data: u64,
}

impl Default for PeerReputation {
    fn default() -> Self {
        Self {
            score: INITIAL_SCORE,
            last_action: Utc::now(),
            total_actions: 0,
            valid_data: 0,
            invalid_data: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TuneDirection {
    Raise,
    Lower,
}

struct Ledger {
    peers: BTreeMap<String, PeerReputation>,
    min_reputation: f64,
    last_tune: Option<TuneDirection>,
}

/// Scored ledger of peer behavior. Thread-safe; all mutation is serialized
/// through a single `RwLock`, and batch updates apply atomically with
/// respect to readers.
pub struct ReputationManager {
    ledger: RwLock<Ledger>,
}

impl ReputationManager {
    /// Create a manager with the given starting `minReputation` threshold.
    pub fn new(initial_min_reputation: f64) -> Self {
        Self {
            ledger: RwLock::new(Ledger {
                peers: BTreeMap::new(),
                min_reputation: initial_min_reputation.clamp(MIN_SCORE, MAX_SCORE),
                last_tune: None,
            }),
        }
    }

    /// Current score for `peer_id`, or [`INITIAL_SCORE`] if never observed.
    pub fn score_of(&self, peer_id: &str) -> f64 {
        self.ledger
            .read()
            .expect("reputation ledger lock poisoned")
            .peers
            .get(peer_id)
            .map(|p| p.score)
            .unwrap_or(INITIAL_SCORE)
    }

    /// Current `minReputation` threshold.
    pub fn min_reputation(&self) -> f64 {
        self.ledger.read().expect("reputation ledger lock poisoned").min_reputation
    }

    /// `score(peer) >= minReputation`.
    pub fn is_trusted(&self, peer_id: &str) -> bool {
        self.score_of(peer_id) >= self.min_reputation()
    }

    /// Apply one scored action to one peer, returning the resulting score.
    pub fn record(&self, peer_id: &str, action: Action, value: f64, now: DateTime<Utc>) -> f64 {
        let mut guard = self.ledger.write().expect("reputation ledger lock poisoned");
        apply_one(&mut guard.peers, peer_id, action, value, now)
    }

    /// Apply many scored actions atomically with respect to readers.
    pub fn batch_record(&self, updates: &[(String, Action, f64)], now: DateTime<Utc>) {
        let mut guard = self.ledger.write().expect("reputation ledger lock poisoned");
        for (peer_id, action, value) in updates {
            apply_one(&mut guard.peers, peer_id, *action, *value, now);
        }
    }

    /// Top-`n` peers by descending score.
    pub fn top_n(&self, n: usize) -> Vec<(String, f64)> {
        let guard = self.ledger.read().expect("reputation ledger lock poisoned");
        let mut all: Vec<(String, f64)> = guard.peers.iter().map(|(k, v)| (k.clone(), v.score)).collect();
        all.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        all.truncate(n);
        all
    }

    /// Apply the `Inactivity` penalty once to every peer whose last action
    /// predates `now - INACTIVITY_THRESHOLD`. Intended to run hourly.
    pub fn sweep_inactivity(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.ledger.write().expect("reputation ledger lock poisoned");
        let stale: Vec<String> = guard
            .peers
            .iter()
            .filter(|(_, p)| now - p.last_action > INACTIVITY_THRESHOLD)
            .map(|(k, _)| k.clone())
            .collect();
        let count = stale.len();
        for peer_id in stale {
            apply_one(&mut guard.peers, &peer_id, Action::Inactivity, 1.0, now);
        }
        count
    }

    /// Adjust `minReputation` per the network-wide average and the
    /// high/low-reputation population split. Intended to run daily.
    ///
    /// To avoid oscillating the threshold back and forth every sweep when
    /// the population hasn't meaningfully changed, a direction is only
    /// applied when it differs from the direction applied by the previous
    /// sweep (a simple hysteresis).
    pub fn adaptive_tune(&self) -> Option<f64> {
        let mut guard = self.ledger.write().expect("reputation ledger lock poisoned");
        if guard.peers.is_empty() {
            return None;
        }

        let scores: Vec<f64> = guard.peers.values().map(|p| p.score).collect();
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        let high = scores.iter().filter(|&&s| s >= 0.7).count();
        let low = scores.iter().filter(|&&s| s < 0.3).count();

        let raise_cond = avg > 0.7 && (if low == 0 { high > 0 } else { high >= 2 * low });
        let lower_cond = avg < 0.3 || low >= high;

        let direction = if raise_cond {
            Some(TuneDirection::Raise)
        } else if lower_cond {
            Some(TuneDirection::Lower)
        } else {
            None
        };

        let Some(dir) = direction else {
            guard.last_tune = None;
            return None;
        };
        if guard.last_tune == Some(dir) {
            return None;
        }

        guard.min_reputation = match dir {
            TuneDirection::Raise => (guard.min_reputation + 0.05).min(0.8),
            TuneDirection::Lower => (guard.min_reputation - 0.05).max(0.2),
        };
        guard.last_tune = Some(dir);
        Some(guard.min_reputation)
    }
}

fn apply_one(
    peers: &mut BTreeMap<String, PeerReputation>,
    peer_id: &str,
    action: Action,
    value: f64,
    now: DateTime<Utc>,
) -> f64 {
    let entry = peers.entry(peer_id.to_string()).or_default();
    entry.score = (entry.score + action.delta(value)).clamp(MIN_SCORE, MAX_SCORE);
    entry.last_action = now;
    entry.total_actions += 1;
    match action {
        Action::ValidData => entry.valid_data += 1,
        Action::InvalidData => entry.invalid_data += 1,
        Action::Inactivity => {}
    }
    entry.score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_stays_within_bounds_over_many_updates() {
        let mgr = ReputationManager::new(0.5);
        let now = Utc::now();
        for _ in 0..1000 {
            mgr.record("peer-a", Action::ValidData, 1.0, now);
        }
        assert!(mgr.score_of("peer-a") <= MAX_SCORE);
        for _ in 0..1000 {
            mgr.record("peer-b", Action::InvalidData, 1.0, now);
        }
        assert!(mgr.score_of("peer-b") >= MIN_SCORE);
    }

    #[test]
    fn adaptive_tune_raises_once_then_holds() {
        let mgr = ReputationManager::new(0.5);
        let now = Utc::now();
        // 75 peers @ 0.9 ("high"), 25 peers @ 0.5 -> avg = 0.8, high:low = 75:0 (>=2:1).
        for i in 0..75 {
            mgr.record(&format!("high-{i}"), Action::ValidData, 8.0, now);
        }
        for i in 0..25 {
            mgr.record(&format!("mid-{i}"), Action::ValidData, 0.0, now);
            // nudge to exactly 0.5 baseline (no-op action keeps initial score)
            let _ = i;
        }
        let first = mgr.adaptive_tune();
        assert_eq!(first, Some(0.55));
        let second = mgr.adaptive_tune();
        assert_eq!(second, None);
        assert_eq!(mgr.min_reputation(), 0.55);
    }
}
