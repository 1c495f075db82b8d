//! Execution plan data model: the declarative contract attached to a tool call.
//!
//! Pure domain types with no IO and no async. Bounds are enforced at
//! construction time: out-of-range limits and a manual rollback without
//! commands are unrepresentable, both for values built in code and for
//! documents arriving over the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Bounds errors ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanBoundsError {
    #[error("max_files must be within 1..=100, got {0}")]
    MaxFiles(u32),
    #[error("max_changes must be within 1..=1000, got {0}")]
    MaxChanges(u32),
    #[error("timeout_seconds must be within 1..=300, got {0}")]
    TimeoutSeconds(u64),
    #[error("manual rollback strategy requires at least one command")]
    ManualRollbackWithoutCommands,
}

// ── Execution limits ─────────────────────────────────────────

/// Resource caps for one tool call.
///
/// Construction via [`ExecutionLimits::new`] is the only way to obtain a
/// value; deserialization funnels through the same checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLimits")]
pub struct ExecutionLimits {
    max_files: u32,
    max_changes: u32,
    timeout_seconds: u64,
}

impl ExecutionLimits {
    pub const MAX_FILES_RANGE: std::ops::RangeInclusive<u32> = 1..=100;
    pub const MAX_CHANGES_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;
    pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=300;

    pub fn new(max_files: u32, max_changes: u32, timeout_seconds: u64) -> Result<Self, PlanBoundsError> {
        if !Self::MAX_FILES_RANGE.contains(&max_files) {
            return Err(PlanBoundsError::MaxFiles(max_files));
        }
        if !Self::MAX_CHANGES_RANGE.contains(&max_changes) {
            return Err(PlanBoundsError::MaxChanges(max_changes));
        }
        if !Self::TIMEOUT_RANGE.contains(&timeout_seconds) {
            return Err(PlanBoundsError::TimeoutSeconds(timeout_seconds));
        }
        Ok(Self {
            max_files,
            max_changes,
            timeout_seconds,
        })
    }

    #[must_use]
    pub const fn max_files(&self) -> u32 {
        self.max_files
    }

    #[must_use]
    pub const fn max_changes(&self) -> u32 {
        self.max_changes
    }

    #[must_use]
    pub const fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_changes: 50,
            timeout_seconds: 30,
        }
    }
}

#[derive(Deserialize)]
struct RawLimits {
    #[serde(default = "default_max_files")]
    max_files: u32,
    #[serde(default = "default_max_changes")]
    max_changes: u32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

fn default_max_files() -> u32 {
    10
}

fn default_max_changes() -> u32 {
    50
}

fn default_timeout_seconds() -> u64 {
    30
}

impl TryFrom<RawLimits> for ExecutionLimits {
    type Error = PlanBoundsError;

    fn try_from(raw: RawLimits) -> Result<Self, Self::Error> {
        Self::new(raw.max_files, raw.max_changes, raw.timeout_seconds)
    }
}

// ── Rollback strategy ────────────────────────────────────────

/// How to undo the operation if it goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackKind {
    GitRevert,
    FileBackup,
    Manual,
}

impl RollbackKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RollbackKind::GitRevert => "git_revert",
            RollbackKind::FileBackup => "file_backup",
            RollbackKind::Manual => "manual",
        }
    }
}

/// Rollback configuration: a strategy kind plus its commands.
///
/// `Manual` requires a non-empty command list (enforced here, not in the
/// validator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRollback")]
pub struct RollbackStrategy {
    strategy: RollbackKind,
    commands: Vec<String>,
}

impl RollbackStrategy {
    pub fn new(strategy: RollbackKind, commands: Vec<String>) -> Result<Self, PlanBoundsError> {
        if strategy == RollbackKind::Manual && commands.is_empty() {
            return Err(PlanBoundsError::ManualRollbackWithoutCommands);
        }
        Ok(Self { strategy, commands })
    }

    /// Convenience constructor for the common no-command strategies.
    #[must_use]
    pub fn git_revert() -> Self {
        Self {
            strategy: RollbackKind::GitRevert,
            commands: Vec::new(),
        }
    }

    #[must_use]
    pub fn file_backup() -> Self {
        Self {
            strategy: RollbackKind::FileBackup,
            commands: Vec::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> RollbackKind {
        self.strategy
    }

    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

#[derive(Deserialize)]
struct RawRollback {
    strategy: RollbackKind,
    #[serde(default)]
    commands: Vec<String>,
}

impl TryFrom<RawRollback> for RollbackStrategy {
    type Error = PlanBoundsError;

    fn try_from(raw: RawRollback) -> Result<Self, Self::Error> {
        Self::new(raw.strategy, raw.commands)
    }
}

// ── Validation config ────────────────────────────────────────

/// Pre-conditions and expected outcomes declared by the caller.
///
/// Semantic rules (no empty strings, no duplicates) are the plan
/// validator's job, not a construction invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub pre_conditions: Vec<String>,
    #[serde(default)]
    pub expected_outcomes: Vec<String>,
}

// ── Execution plan ───────────────────────────────────────────

/// The declarative contract bounding one tool call.
///
/// Serialized field names are the wire schema; enumerations are lowercase
/// snake_case strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub validation: ValidationConfig,
    pub rollback: RollbackStrategy,
    #[serde(default)]
    pub limits: ExecutionLimits,
    #[serde(default)]
    pub batch: bool,
}

fn default_true() -> bool {
    true
}

impl ExecutionPlan {
    /// A plan with defaults everywhere and the given rollback strategy.
    #[must_use]
    pub fn with_rollback(rollback: RollbackStrategy) -> Self {
        Self {
            dry_run: true,
            validation: ValidationConfig::default(),
            rollback,
            limits: ExecutionLimits::default(),
            batch: false,
        }
    }
}
