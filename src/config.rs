//! Evaluation settings.
//!
//! Loaded hierarchically from:
//! - `fixlog.toml` (or an explicit file)
//! - Environment variables (`FIXLOG_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! task_size = 256
//! smt_task_size = 4
//! eager_eval_max_gen = 0   # plain semi-naive rounds
//! unification = "inline"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! FIXLOG_PARALLELISM=4
//! FIXLOG_EAGER_EVAL_BATCH_SIZE=32
//! ```

use crate::error::EngineError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// What the normalizer does with `x = t` when `t` is bound and `x` is not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnificationMode {
    /// Substitute `t` for every later occurrence of `x`
    Inline,
    /// Emit an assignment `x := t`, evaluated once per join path
    #[default]
    Assign,
}

/// Tuning knobs of the stratum evaluator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Target number of tuples per task at ordinary predicate positions
    pub task_size: usize,
    /// Target number of tuples per task at positions hinted for splitting
    pub smt_task_size: usize,
    /// Generations of eager task spawning before new facts wait for the next round
    pub eager_eval_max_gen: usize,
    /// New facts a task collects before dispatching them as new tasks
    pub eager_eval_batch_size: usize,
    /// Normalizer behavior for variable definitions
    pub unification: UnificationMode,
    /// Worker threads; 0 means one per available CPU
    pub parallelism: usize,
    /// Keep work, duplicate and per-rule timing counters
    pub record_work: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            task_size: 128,
            smt_task_size: 8,
            eager_eval_max_gen: 8,
            eager_eval_batch_size: 16,
            unification: UnificationMode::default(),
            parallelism: 0,
            record_work: false,
        }
    }
}

impl EvalConfig {
    /// Loads `fixlog.toml` from the working directory, then applies
    /// `FIXLOG_*` environment overrides. A missing file leaves the defaults.
    ///
    /// # Errors
    ///
    /// Fails if a value has the wrong type or a batch size is zero.
    pub fn load() -> Result<Self, EngineError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file("fixlog.toml"))
                .merge(Env::prefixed("FIXLOG_")),
        )
    }

    /// Loads configuration from a specific file path, then applies
    /// `FIXLOG_*` environment overrides
    ///
    /// # Errors
    ///
    /// Fails if the file holds malformed TOML, a value has the wrong type,
    /// or a batch size is zero.
    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed("FIXLOG_")),
        )
    }

    pub(crate) fn from_figment(figment: Figment) -> Result<Self, EngineError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let zero = [
            ("task_size", self.task_size),
            ("smt_task_size", self.smt_task_size),
            ("eager_eval_batch_size", self.eager_eval_batch_size),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        match zero {
            Some((name, _)) => Err(EngineError::Config(Box::new(figment::Error::from(
                format!("{name} must be at least 1"),
            )))),
            None => Ok(()),
        }
    }
}
