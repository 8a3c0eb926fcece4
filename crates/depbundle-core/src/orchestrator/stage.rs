//! Build attempt state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// Stage of a build attempt.
///
/// ```text
/// Fetching → Consolidating → CacheCheck ─┬→ CacheHit ───────────────────────────┬→ Finalizing → Ready
///                                        └→ Resolving → Packaging → Uploading ──┘
/// ```
/// Any non-terminal stage may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Fetching,
    Consolidating,
    CacheCheck,
    CacheHit,
    Resolving,
    Packaging,
    Uploading,
    Finalizing,
    Ready,
    Failed,
}

impl BuildStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStage::Ready | BuildStage::Failed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: BuildStage) -> bool {
        use BuildStage::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Fetching, Consolidating)
                | (Consolidating, CacheCheck)
                | (CacheCheck, CacheHit)
                | (CacheCheck, Resolving)
                | (CacheHit, Finalizing)
                | (Resolving, Packaging)
                | (Packaging, Uploading)
                | (Uploading, Finalizing)
                | (Finalizing, Ready)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStage::Fetching => "fetching",
            BuildStage::Consolidating => "consolidating",
            BuildStage::CacheCheck => "cache_check",
            BuildStage::CacheHit => "cache_hit",
            BuildStage::Resolving => "resolving",
            BuildStage::Packaging => "packaging",
            BuildStage::Uploading => "uploading",
            BuildStage::Finalizing => "finalizing",
            BuildStage::Ready => "ready",
            BuildStage::Failed => "failed",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: BuildStage,
    pub to: BuildStage,
    pub at: DateTime<Utc>,
}

/// Current stage plus the history of how the attempt got there.
#[derive(Debug, Clone)]
pub struct BuildAttempt {
    stage: BuildStage,
    transitions: Vec<StageTransition>,
}

impl Default for BuildAttempt {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildAttempt {
    /// Start in `Fetching`.
    pub fn new() -> Self {
        Self {
            stage: BuildStage::Fetching,
            transitions: Vec::new(),
        }
    }

    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    /// Stages visited so far, starting with `Fetching`.
    pub fn path(&self) -> Vec<BuildStage> {
        std::iter::once(BuildStage::Fetching)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn advance(&mut self, next: BuildStage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(BuildError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.transitions.push(StageTransition {
            from: self.stage,
            to: next,
            at: Utc::now(),
        });
        self.stage = next;
        Ok(())
    }
}
