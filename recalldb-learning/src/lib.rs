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

//! RecallDB Learning Layer
//!
//! The learned-behavior subsystem on top of the vector database:
//!
//! - **Patterns** (`pattern`): named reasoning patterns with incremental
//!   success-rate and duration averages.
//! - **Experiences** (`experience`): outcome records with deterministic
//!   quality scoring, filtered retrieval, and pruning.
//! - **Replay + policy** (`replay`, `policy`): a prioritized replay
//!   buffer feeding ε-greedy tabular Q-learning.
//! - **Rewards + sessions** (`reward`, `session`): multi-dimensional
//!   reward shaping and the session lifecycle that ties it all together.

pub mod experience;
pub mod pattern;
pub mod policy;
pub mod replay;
pub mod reward;
pub mod session;

pub use experience::{
    Experience, ExperienceFilters, ExperienceMatch, ExperienceStats, ExperienceStore,
    NewExperience, PruneOptions,
};
pub use pattern::{NewPattern, Pattern, PatternFilters, PatternMatch, PatternStats, PatternStore};
pub use policy::{PolicyConfig, PolicyOptimizer, PolicySnapshot, TrainReport};
pub use replay::{ReplayBuffer, ReplayBufferConfig, Transition};
pub use reward::{Outcome, RewardBreakdown, RewardConfig, RewardEstimator, RewardWeights};
pub use session::{
    InvalidTransition, Prediction, SessionEvent, SessionManager, SessionManagerConfig,
    SessionMetrics, SessionState, ToolInvocation,
};
