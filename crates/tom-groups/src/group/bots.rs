//! Assistant bot responsiveness: picks the fastest bot for a group.
//!
//! Each forwarded message is remembered until the bot's receipt comes
//! back; the round trip feeds an exponentially weighted latency. Timeouts
//! count as failures, which add a penalty that decays (10%/minute since
//! the last failure) so a bot is never excluded for good.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::types::NodeId;

/// Weight of the newest sample in the latency average.
const LATENCY_ALPHA: f64 = 0.3;

/// Penalty per failure, in milliseconds of latency.
pub const FAILURE_PENALTY_MS: f64 = 5_000.0;

/// Penalty decay: 10% per minute (fraction per ms).
const FAILURE_DECAY_PER_MS: f64 = 0.1 / 60_000.0;

/// Latency assumed for a bot that only ever failed.
const UNANSWERED_LATENCY_MS: f64 = 30_000.0;

/// Observed behaviour of one bot.
#[derive(Debug, Clone, Default)]
pub struct BotMetrics {
    /// Smoothed round-trip time in ms, once a response was seen.
    pub latency_ms: Option<f64>,
    pub responses: u64,
    pub failures: u64,
    /// Unix ms of the last failure.
    pub last_failure: u64,
}

impl BotMetrics {
    pub fn record_response(&mut self, latency_ms: u64) {
        let sample = latency_ms as f64;
        self.latency_ms = Some(match self.latency_ms {
            Some(avg) => LATENCY_ALPHA * sample + (1.0 - LATENCY_ALPHA) * avg,
            None => sample,
        });
        self.responses += 1;
    }

    pub fn record_failure(&mut self, now: u64) {
        self.failures += 1;
        self.last_failure = now;
    }

    /// Latency plus the decayed failure penalty. Lower is better.
    pub fn cost(&self, now: u64) -> f64 {
        let base = self.latency_ms.unwrap_or(UNANSWERED_LATENCY_MS);
        if self.failures == 0 {
            return base;
        }
        let idle_ms = now.saturating_sub(self.last_failure) as f64;
        let decay = (-FAILURE_DECAY_PER_MS * idle_ms).exp();
        base + self.failures as f64 * FAILURE_PENALTY_MS * decay
    }
}

#[derive(Default)]
struct BotsState {
    common_assistants: Vec<NodeId>,
    metrics: HashMap<NodeId, BotMetrics>,
    /// message id → (bot, sent at).
    pending: HashMap<String, (NodeId, u64)>,
}

/// Process-wide bot tracker, shared by every group.
#[derive(Default)]
pub struct GroupBotsManager {
    state: Mutex<BotsState>,
}

impl GroupBotsManager {
    pub fn new(common_assistants: Vec<NodeId>) -> Self {
        Self {
            state: Mutex::new(BotsState {
                common_assistants,
                ..BotsState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BotsState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bots declared on large groups at creation.
    pub fn common_assistants(&self) -> Vec<NodeId> {
        self.state().common_assistants.clone()
    }

    pub fn set_common_assistants(&self, bots: Vec<NodeId>) {
        self.state().common_assistants = bots;
    }

    /// A message was handed to `bot`; its receipt is expected.
    pub fn record_request(&self, message_id: &str, bot: NodeId, now: u64) {
        self.state()
            .pending
            .insert(message_id.to_string(), (bot, now));
    }

    /// `from` answered `message_id`. Returns the measured latency if the
    /// message was pending for that bot.
    pub fn record_response(&self, message_id: &str, from: NodeId, now: u64) -> Option<u64> {
        let mut state = self.state();
        let (bot, sent_at) = *state.pending.get(message_id)?;
        if bot != from {
            return None;
        }
        state.pending.remove(message_id);
        let latency = now.saturating_sub(sent_at);
        state.metrics.entry(bot).or_default().record_response(latency);
        tracing::debug!("bot {bot} answered in {latency}ms");
        Some(latency)
    }

    pub fn record_failure(&self, bot: NodeId, now: u64) {
        self.state().metrics.entry(bot).or_default().record_failure(now);
    }

    /// Charge a failure for every request older than `timeout_ms`.
    /// Returns the bots charged.
    pub fn expire_pending(&self, now: u64, timeout_ms: u64) -> Vec<NodeId> {
        let mut state = self.state();
        let expired: Vec<(String, NodeId)> = state
            .pending
            .iter()
            .filter(|(_, (_, sent_at))| now.saturating_sub(*sent_at) >= timeout_ms)
            .map(|(id, (bot, _))| (id.clone(), *bot))
            .collect();
        let mut charged = Vec::with_capacity(expired.len());
        for (id, bot) in expired {
            state.pending.remove(&id);
            state.metrics.entry(bot).or_default().record_failure(now);
            tracing::warn!("bot {bot} did not answer {id}");
            charged.push(bot);
        }
        charged
    }

    pub fn metrics(&self, bot: &NodeId) -> Option<BotMetrics> {
        self.state().metrics.get(bot).cloned()
    }

    /// Cheapest bot among `assistants`. Bots with no record come after
    /// every measured one, in declaration order.
    pub fn fastest_assistant(&self, assistants: &[NodeId], now: u64) -> Option<NodeId> {
        let state = self.state();
        let measured = assistants
            .iter()
            .filter_map(|bot| state.metrics.get(bot).map(|m| (*bot, m.cost(now))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(bot, _)| bot);
        measured.or_else(|| assistants.first().copied())
    }
}
