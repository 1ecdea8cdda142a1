//! Per-address-book provisioning state.
//!
//! ```text
//!               enable                 first run ok
//! Unconfigured ────────► FirstRunPending ───────────► SteadyState
//!      ▲                   │      ▲                      │
//!      │                   │      └── first run failed   │
//!      │        disable    ▼                             │
//!      └───────────────  Disabled  ◄─────────────────────┘
//! ```
//!
//! `Disabled` means the engine configuration was torn down; it behaves like
//! `Unconfigured`, and enabling again starts over with a first run.

use crate::model::RunType;
use serde::Serialize;

/// Provisioning state of one address book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookState {
    /// Never enabled.
    Unconfigured,
    /// Enabled; the next run provisions from scratch.
    FirstRunPending,
    /// Provisioned; runs do a two-way sync.
    SteadyState,
    /// Explicitly disabled and deprovisioned.
    Disabled,
}

impl BookState {
    /// Derives the state from the stored `enabled` and `first_run` flags.
    ///
    /// An absent `first_run` counts as pending.
    #[must_use]
    pub const fn from_flags(enabled: Option<bool>, first_run: Option<bool>) -> Self {
        match (enabled, first_run) {
            (None, _) => Self::Unconfigured,
            (Some(false), _) => Self::Disabled,
            (Some(true), Some(false)) => Self::SteadyState,
            (Some(true), _) => Self::FirstRunPending,
        }
    }

    /// Returns whether runs touch this address book.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::FirstRunPending | Self::SteadyState)
    }

    /// Returns the path a run takes, or `None` if it is skipped.
    #[must_use]
    pub const fn run_type(self) -> Option<RunType> {
        match self {
            Self::FirstRunPending => Some(RunType::FirstTime),
            Self::SteadyState => Some(RunType::Regular),
            Self::Unconfigured | Self::Disabled => None,
        }
    }

    /// Returns the state after a run of this state's path.
    ///
    /// Only a successful first run moves the state. A failed first run stays
    /// pending and a failed steady-state sync stays provisioned.
    #[must_use]
    pub const fn after_run(self, success: bool) -> Self {
        match self {
            Self::FirstRunPending if success => Self::SteadyState,
            other => other,
        }
    }
}
