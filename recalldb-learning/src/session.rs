// Copyright 2025 RecallDB (https://github.com/recalldb)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Session lifecycle and tool-choice prediction.
//!
//! A session owns one policy and one replay buffer. Recording a tool
//! invocation shapes a reward, stores an experience in the shared store,
//! and links consecutive states into replay transitions. Prediction
//! blends similarity-weighted rewards from past experiences with the
//! session's Q-values, under ε-greedy exploration.
//!
//! State transitions are monotonic: Active ⇄ Paused, then Ended, which
//! is terminal.

use crate::experience::{ExperienceFilters, ExperienceMatch, ExperienceStore, NewExperience};
use crate::policy::{PolicyConfig, PolicyOptimizer, PolicySnapshot, TrainReport};
use crate::replay::{ReplayBuffer, ReplayBufferConfig, Transition};
use crate::reward::{Outcome, RewardBreakdown, RewardConfig, RewardEstimator};
use dashmap::DashMap;
use parking_lot::RwLock;
use recalldb_core::{RecallError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Rejected lifecycle transition.
#[derive(Debug, Error)]
#[error("invalid session transition: {current:?} -> {event:?}")]
pub struct InvalidTransition {
    pub current: SessionState,
    pub event: SessionEvent,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Paused,
    Ended,
}

/// Lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Pause,
    Resume,
    End,
}

impl SessionState {
    fn transition(self, event: SessionEvent) -> std::result::Result<Self, InvalidTransition> {
        use SessionEvent::*;
        use SessionState::*;
        match (self, event) {
            (Active, Pause) => Ok(Paused),
            (Paused, Resume) => Ok(Active),
            (Active, End) | (Paused, End) => Ok(Ended),
            _ => Err(InvalidTransition {
                current: self,
                event,
            }),
        }
    }
}

/// One tool call to record against a session.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    /// State embedding at the moment the tool was chosen.
    pub state: Vec<f32>,
    pub input: Value,
    pub output: Value,
    pub outcome: Outcome,
}

/// Rolling counters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionMetrics {
    pub actions_recorded: u64,
    pub total_reward: f64,
    pub avg_reward: f64,
    pub train_runs: u64,
    pub last_mean_td_error: f64,
}

/// A tool recommendation.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub recommended: String,
    /// Softmax margin between the best and second-best candidate, in
    /// [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    pub similar_past: Vec<ExperienceMatch>,
}

struct PendingTransition {
    state: Vec<f32>,
    action: String,
    reward: f64,
}

struct Session {
    id: String,
    user_id: String,
    domain: String,
    state: SessionState,
    started_at: i64,
    ended_at: Option<i64>,
    policy: PolicyOptimizer,
    buffer: ReplayBuffer,
    metrics: SessionMetrics,
    /// Last recorded action, awaiting its successor state.
    pending: Option<PendingTransition>,
    training_in_flight: bool,
    pending_train: Option<usize>,
}

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Live session cap; `start` fails with `Exhausted` beyond it.
    pub max_sessions: usize,
    pub policy: PolicyConfig,
    pub buffer: ReplayBufferConfig,
    pub reward: RewardConfig,
    /// How many similar past experiences feed a prediction.
    pub similar_k: usize,
    pub default_batch_size: usize,
    /// Persist an ended session's policy as the transferable base for
    /// future sessions.
    pub save_transferable: bool,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            policy: PolicyConfig::default(),
            buffer: ReplayBufferConfig::default(),
            reward: RewardConfig::default(),
            similar_k: 10,
            default_batch_size: 32,
            save_transferable: true,
        }
    }
}

/// Owns the set of live sessions.
pub struct SessionManager {
    config: SessionManagerConfig,
    sessions: DashMap<String, Session>,
    experiences: Arc<ExperienceStore>,
    reward: RewardEstimator,
    base_policy: RwLock<Option<PolicySnapshot>>,
    session_seq: AtomicU64,
}

impl SessionManager {
    pub fn new(experiences: Arc<ExperienceStore>, config: SessionManagerConfig) -> Self {
        Self {
            reward: RewardEstimator::new(config.reward),
            sessions: DashMap::new(),
            experiences,
            base_policy: RwLock::new(None),
            session_seq: AtomicU64::new(0),
            config,
        }
    }

    pub fn experiences(&self) -> &Arc<ExperienceStore> {
        &self.experiences
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state != SessionState::Ended)
            .count()
    }

    /// Allocate a fresh session with its own buffer and policy (cloned
    /// from the transferable base when one exists).
    pub fn start(&self, user_id: &str, domain: &str) -> Result<String> {
        if self.live_sessions() >= self.config.max_sessions {
            return Err(RecallError::Exhausted(format!(
                "session limit {} reached",
                self.config.max_sessions
            )));
        }
        let seq = self.session_seq.fetch_add(1, Ordering::Relaxed);
        let policy_seed = self.config.policy.seed.wrapping_add(seq);
        let policy = match &*self.base_policy.read() {
            Some(snapshot) => PolicyOptimizer::from_snapshot(snapshot, policy_seed),
            None => PolicyOptimizer::new(PolicyConfig {
                seed: policy_seed,
                ..self.config.policy
            }),
        };
        let buffer = ReplayBuffer::new(ReplayBufferConfig {
            seed: self.config.buffer.seed.wrapping_add(seq),
            ..self.config.buffer.clone()
        });

        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                user_id: user_id.to_string(),
                domain: domain.to_string(),
                state: SessionState::Active,
                started_at: recalldb_core::now_ms(),
                ended_at: None,
                policy,
                buffer,
                metrics: SessionMetrics::default(),
                pending: None,
                training_in_flight: false,
                pending_train: None,
            },
        );
        debug!(session = %id, user = user_id, domain, "session started");
        Ok(id)
    }

    fn transition(&self, session_id: &str, event: SessionEvent) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RecallError::NotFound(session_id.to_string()))?;
        session.state = session
            .state
            .transition(event)
            .map_err(|e| RecallError::invalid(e.to_string()))?;
        Ok(())
    }

    pub fn pause(&self, session_id: &str) -> Result<()> {
        self.transition(session_id, SessionEvent::Pause)
    }

    pub fn resume(&self, session_id: &str) -> Result<()> {
        self.transition(session_id, SessionEvent::Resume)
    }

    /// Record a tool invocation: shape the reward, store the experience,
    /// and extend the session's replay stream.
    pub fn record(&self, session_id: &str, invocation: ToolInvocation) -> Result<RewardBreakdown> {
        let mut session_ref = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RecallError::NotFound(session_id.to_string()))?;
        let session = &mut *session_ref;
        if session.state != SessionState::Active {
            return Err(RecallError::invalid(format!(
                "session {session_id} is not active"
            )));
        }

        let breakdown = self.reward.estimate(&invocation.outcome);

        self.experiences.store(NewExperience {
            task_embedding: invocation.state.clone(),
            description: invocation.input.to_string(),
            success: invocation.outcome.success,
            duration_ms: invocation.outcome.execution_ms,
            approach: invocation.tool.clone(),
            outcome: invocation.output.to_string(),
            quality: invocation.outcome.quality,
            reward: Some(breakdown.total),
            domain: session.domain.clone(),
            tokens_used: invocation.outcome.tokens_used,
            iteration_count: None,
            agent_type: None,
            error_type: None,
        })?;

        // The previous action's transition completes now that we know
        // the state it led to.
        if let Some(prev) = session.pending.take() {
            session.buffer.push(Transition {
                state: prev.state,
                action: prev.action,
                reward: prev.reward,
                next_state: invocation.state.clone(),
                ts: recalldb_core::now_ms(),
            })?;
        }
        session.pending = Some(PendingTransition {
            state: invocation.state,
            action: invocation.tool,
            reward: breakdown.total,
        });

        session.metrics.actions_recorded += 1;
        session.metrics.total_reward += breakdown.total;
        session.metrics.avg_reward =
            session.metrics.total_reward / session.metrics.actions_recorded as f64;
        Ok(breakdown)
    }

    /// Recommend a tool from `candidates` for the given state.
    pub fn predict(
        &self,
        session_id: &str,
        state: &[f32],
        candidates: &[String],
    ) -> Result<Prediction> {
        if candidates.is_empty() {
            return Err(RecallError::invalid("candidate tool set is empty"));
        }
        let similar =
            self.experiences
                .query(state, self.config.similar_k, &ExperienceFilters::default())?;

        let mut session_ref = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RecallError::NotFound(session_id.to_string()))?;
        let session = &mut *session_ref;

        // Expected reward per candidate: similarity-weighted mean over
        // past experiences that used it, falling back to the Q-table.
        let mut expected: Vec<(f64, &String, usize)> = candidates
            .iter()
            .map(|candidate| {
                let mut weight_sum = 0.0;
                let mut reward_sum = 0.0;
                let mut support = 0usize;
                for m in similar.iter().filter(|m| &m.experience.approach == candidate) {
                    let w = f64::from(m.similarity.max(0.0));
                    weight_sum += w;
                    reward_sum += w * m.experience.reward;
                    support += 1;
                }
                let value = if weight_sum > 0.0 {
                    reward_sum / weight_sum
                } else {
                    session.policy.q_value(state, candidate)
                };
                (value, candidate, support)
            })
            .collect();
        expected.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        let confidence = softmax_margin(&expected);
        let explored = session.policy.explore(candidates);
        let (recommended, reasoning) = match explored {
            Some(tool) => {
                let reasoning = format!("exploring: picked {tool} uniformly at random");
                (tool, reasoning)
            }
            None => {
                let (value, best, support) = &expected[0];
                let reasoning = format!(
                    "{support} of {} similar past experiences used {best}; \
                     expected reward {value:.2}",
                    similar.len()
                );
                ((*best).clone(), reasoning)
            }
        };

        Ok(Prediction {
            recommended,
            confidence,
            reasoning,
            similar_past: similar,
        })
    }

    /// Sample the session's buffer and run a Q-update pass.
    ///
    /// One training task per session: a call arriving while another is
    /// in flight records its batch size and returns a zero report; the
    /// in-flight call drains the latest pending request before
    /// returning, so the most recent request supersedes earlier ones.
    pub fn train(&self, session_id: &str, batch_size: Option<usize>) -> Result<TrainReport> {
        let requested = batch_size.unwrap_or(self.config.default_batch_size);
        let mut session_ref = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RecallError::NotFound(session_id.to_string()))?;
        let session = &mut *session_ref;

        if session.training_in_flight {
            session.pending_train = Some(requested);
            return Ok(TrainReport::default());
        }
        session.training_in_flight = true;

        let mut size = requested;
        let report = loop {
            let batch = session.buffer.sample(size);
            let report = session.policy.train(&batch);
            match session.pending_train.take() {
                Some(next) => size = next,
                None => break report,
            }
        };
        session.training_in_flight = false;

        session.metrics.train_runs += 1;
        session.metrics.last_mean_td_error = report.mean_td_error;
        Ok(report)
    }

    /// Seal a session. Its last pending action closes against its own
    /// state, and the policy becomes the transferable base when
    /// configured.
    pub fn end(&self, session_id: &str) -> Result<SessionMetrics> {
        let mut session_ref = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RecallError::NotFound(session_id.to_string()))?;
        let session = &mut *session_ref;
        session.state = session
            .state
            .transition(SessionEvent::End)
            .map_err(|e| RecallError::invalid(e.to_string()))?;
        session.ended_at = Some(recalldb_core::now_ms());

        if let Some(prev) = session.pending.take() {
            let next_state = prev.state.clone();
            session.buffer.push(Transition {
                state: prev.state,
                action: prev.action,
                reward: prev.reward,
                next_state,
                ts: recalldb_core::now_ms(),
            })?;
        }
        if self.config.save_transferable {
            *self.base_policy.write() = Some(session.policy.snapshot());
        }
        debug!(session = %session.id, user = %session.user_id, "session ended");
        Ok(session.metrics)
    }

    /// Merge the source session's Q-table into the destination's,
    /// weighted by the caller-asserted domain similarity.
    pub fn transfer(&self, src: &str, dst: &str, similarity: f64) -> Result<()> {
        if !(0.5..=1.0).contains(&similarity) {
            return Err(RecallError::invalid(format!(
                "transfer similarity {similarity} outside [0.5, 1.0]"
            )));
        }
        if src == dst {
            return Err(RecallError::invalid("transfer requires distinct sessions"));
        }
        let snapshot = {
            let session = self
                .sessions
                .get(src)
                .ok_or_else(|| RecallError::NotFound(src.to_string()))?;
            session.policy.snapshot()
        };
        let source = PolicyOptimizer::from_snapshot(&snapshot, 0);
        let mut session = self
            .sessions
            .get_mut(dst)
            .ok_or_else(|| RecallError::NotFound(dst.to_string()))?;
        session.policy.merge_from(&source, similarity);
        Ok(())
    }

    pub fn metrics(&self, session_id: &str) -> Result<SessionMetrics> {
        self.sessions
            .get(session_id)
            .map(|s| s.metrics)
            .ok_or_else(|| RecallError::NotFound(session_id.to_string()))
    }

    pub fn state(&self, session_id: &str) -> Result<SessionState> {
        self.sessions
            .get(session_id)
            .map(|s| s.state)
            .ok_or_else(|| RecallError::NotFound(session_id.to_string()))
    }
}

/// Softmax-probability margin between the two best candidates.
fn softmax_margin(ranked: &[(f64, &String, usize)]) -> f64 {
    if ranked.len() < 2 {
        return 1.0;
    }
    let max = ranked[0].0;
    let total: f64 = ranked.iter().map(|(v, _, _)| (v - max).exp()).sum();
    let p_top = 1.0 / total; // exp(0) / total
    let p_second = (ranked[1].0 - max).exp() / total;
    (p_top - p_second).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        let experiences = Arc::new(ExperienceStore::in_memory(4).unwrap());
        let config = SessionManagerConfig {
            policy: PolicyConfig {
                epsilon: 0.0,
                ..PolicyConfig::default()
            },
            ..SessionManagerConfig::default()
        };
        SessionManager::new(experiences, config)
    }

    fn invocation(tool: &str, state: Vec<f32>, outcome: Outcome) -> ToolInvocation {
        ToolInvocation {
            tool: tool.into(),
            state,
            input: serde_json::json!({"task": "t"}),
            output: serde_json::json!({"ok": true}),
            outcome,
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let manager = manager();
        let id = manager.start("u1", "coding").unwrap();
        assert_eq!(manager.state(&id).unwrap(), SessionState::Active);

        manager.pause(&id).unwrap();
        assert_eq!(manager.state(&id).unwrap(), SessionState::Paused);
        assert!(manager.pause(&id).is_err());

        manager.resume(&id).unwrap();
        manager.end(&id).unwrap();
        assert_eq!(manager.state(&id).unwrap(), SessionState::Ended);
        // Ended is terminal.
        assert!(manager.resume(&id).is_err());
        assert!(manager.end(&id).is_err());
    }

    #[test]
    fn test_session_cap_exhausts() {
        let experiences = Arc::new(ExperienceStore::in_memory(4).unwrap());
        let manager = SessionManager::new(
            experiences,
            SessionManagerConfig {
                max_sessions: 2,
                ..SessionManagerConfig::default()
            },
        );
        manager.start("u", "a").unwrap();
        let second = manager.start("u", "b").unwrap();
        assert!(matches!(
            manager.start("u", "c"),
            Err(RecallError::Exhausted(_))
        ));
        // Ending one frees a slot.
        manager.end(&second).unwrap();
        manager.start("u", "d").unwrap();
    }

    #[test]
    fn test_record_updates_metrics_and_store() {
        let manager = manager();
        let id = manager.start("u1", "coding").unwrap();
        let outcome = Outcome::success(250).with_tokens(150).with_quality(0.8);
        let breakdown = manager
            .record(&id, invocation("linter", vec![0.1, 0.2, 0.3, 0.4], outcome))
            .unwrap();
        assert!((breakdown.total - 0.87).abs() < 1e-9);

        let metrics = manager.metrics(&id).unwrap();
        assert_eq!(metrics.actions_recorded, 1);
        assert!((metrics.total_reward - 0.87).abs() < 1e-9);
        assert_eq!(manager.experiences().len(), 1);
    }

    #[test]
    fn test_record_rejected_when_paused() {
        let manager = manager();
        let id = manager.start("u1", "coding").unwrap();
        manager.pause(&id).unwrap();
        let err = manager
            .record(
                &id,
                invocation("linter", vec![0.0; 4], Outcome::success(10)),
            )
            .unwrap_err();
        assert!(matches!(err, RecallError::InvalidArgument(_)));
    }

    #[test]
    fn test_consecutive_records_link_transitions() {
        let manager = manager();
        let id = manager.start("u1", "coding").unwrap();
        manager
            .record(&id, invocation("a", vec![1.0, 0.0, 0.0, 0.0], Outcome::success(10)))
            .unwrap();
        manager
            .record(&id, invocation("b", vec![0.0, 1.0, 0.0, 0.0], Outcome::success(10)))
            .unwrap();
        // First transition is complete; the second is pending until the
        // next record or session end.
        {
            let session = manager.sessions.get(&id).unwrap();
            assert_eq!(session.buffer.len(), 1);
            assert!(session.pending.is_some());
        }
        manager.end(&id).unwrap();
        let session = manager.sessions.get(&id).unwrap();
        assert_eq!(session.buffer.len(), 2);
    }

    #[test]
    fn test_predict_prefers_rewarded_tool() {
        let manager = manager();
        let id = manager.start("u1", "coding").unwrap();
        let state = vec![1.0, 0.0, 0.0, 0.0];
        for _ in 0..3 {
            manager
                .record(
                    &id,
                    invocation("linter", state.clone(), Outcome::success(50).with_quality(0.9)),
                )
                .unwrap();
            manager
                .record(
                    &id,
                    invocation("formatter", state.clone(), Outcome::failure(5000)),
                )
                .unwrap();
        }

        let candidates = vec!["formatter".to_string(), "linter".to_string()];
        let prediction = manager.predict(&id, &state, &candidates).unwrap();
        assert_eq!(prediction.recommended, "linter");
        assert!(prediction.confidence > 0.0);
        assert!(!prediction.similar_past.is_empty());
        assert!(prediction.reasoning.contains("linter"));
    }

    #[test]
    fn test_predict_falls_back_to_q_table() {
        let manager = manager();
        let id = manager.start("u1", "coding").unwrap();
        // No experiences at all: expected rewards come from the (empty)
        // Q-table, so the lexicographically-first candidate wins.
        let prediction = manager
            .predict(
                &id,
                &[0.0; 4],
                &["zeta".to_string(), "alpha".to_string()],
            )
            .unwrap();
        assert_eq!(prediction.recommended, "alpha");
    }

    #[test]
    fn test_train_reports_progress() {
        let manager = manager();
        let id = manager.start("u1", "coding").unwrap();
        for i in 0..5 {
            manager
                .record(
                    &id,
                    invocation(
                        "linter",
                        vec![i as f32, 0.0, 0.0, 0.0],
                        Outcome::success(100),
                    ),
                )
                .unwrap();
        }
        let report = manager.train(&id, Some(4)).unwrap();
        assert!(report.experiences_processed > 0);
        assert!(manager.metrics(&id).unwrap().train_runs >= 1);
    }

    #[test]
    fn test_transfer_requires_half_similarity() {
        let manager = manager();
        let a = manager.start("u1", "coding").unwrap();
        let b = manager.start("u1", "review").unwrap();
        assert!(manager.transfer(&a, &b, 0.4).is_err());
        assert!(manager.transfer(&a, &a, 0.8).is_err());
        manager.transfer(&a, &b, 0.8).unwrap();
    }

    #[test]
    fn test_transfer_moves_q_values() {
        let manager = manager();
        let a = manager.start("u1", "coding").unwrap();
        let b = manager.start("u1", "review").unwrap();
        let state = vec![0.5, 0.5, 0.0, 0.0];

        // Give session A a trained preference.
        for _ in 0..3 {
            manager
                .record(&a, invocation("lint", state.clone(), Outcome::success(10)))
                .unwrap();
        }
        manager.train(&a, Some(8)).unwrap();
        let source_q = manager.sessions.get(&a).unwrap().policy.q_value(&state, "lint");
        assert!(source_q > 0.0);

        manager.transfer(&a, &b, 0.8).unwrap();
        let dest_q = manager.sessions.get(&b).unwrap().policy.q_value(&state, "lint");
        assert!((dest_q - 0.8 * source_q).abs() < 1e-9);
    }

    #[test]
    fn test_ended_session_policy_seeds_new_sessions() {
        let manager = manager();
        let a = manager.start("u1", "coding").unwrap();
        let state = vec![0.5, 0.5, 0.0, 0.0];
        for _ in 0..3 {
            manager
                .record(&a, invocation("lint", state.clone(), Outcome::success(10)))
                .unwrap();
        }
        manager.train(&a, Some(8)).unwrap();
        let trained_q = manager.sessions.get(&a).unwrap().policy.q_value(&state, "lint");
        manager.end(&a).unwrap();

        let b = manager.start("u2", "coding").unwrap();
        let inherited_q = manager.sessions.get(&b).unwrap().policy.q_value(&state, "lint");
        assert_eq!(inherited_q, trained_q);
    }
}
