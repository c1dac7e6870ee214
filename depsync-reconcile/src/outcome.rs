//! Per-event outcomes and the run verdict derived from them.

use serde_json::Value;

/// Result of handling one output event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Succeeded,
    /// A policy no-op. Counts as success.
    Skipped(String),
    Failed {
        message: String,
        /// Error payload reported by the engine, verbatim.
        payload: Option<Value>,
    },
}

impl EventOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            payload: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Position in the engine output.
    pub index: usize,
    pub kind: String,
    pub outcome: EventOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunVerdict {
    /// Nothing was processed.
    Skipped,
    Succeeded,
    SucceededWithIssues,
    Failed,
}

impl RunVerdict {
    /// `Skipped` for no outcomes, `Succeeded` when all succeeded, `Failed`
    /// when none did, otherwise `SucceededWithIssues`.
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a EventOutcome>) -> Self {
        let (mut ok, mut failed) = (0usize, 0usize);
        for outcome in outcomes {
            if outcome.is_success() {
                ok += 1;
            } else {
                failed += 1;
            }
        }
        match (ok, failed) {
            (0, 0) => Self::Skipped,
            (_, 0) => Self::Succeeded,
            (0, _) => Self::Failed,
            _ => Self::SucceededWithIssues,
        }
    }

    /// Fold the verdicts of several jobs with the same rule, ignoring
    /// jobs that processed nothing.
    pub fn combine(verdicts: impl IntoIterator<Item = Self>) -> Self {
        let (mut ok, mut failed, mut mixed) = (false, false, false);
        for verdict in verdicts {
            match verdict {
                Self::Skipped => {}
                Self::Succeeded => ok = true,
                Self::Failed => failed = true,
                Self::SucceededWithIssues => mixed = true,
            }
        }
        match (ok, failed, mixed) {
            (false, false, false) => Self::Skipped,
            (true, false, false) => Self::Succeeded,
            (false, true, false) => Self::Failed,
            _ => Self::SucceededWithIssues,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Succeeded => "succeeded",
            Self::SucceededWithIssues => "succeeded with issues",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one call to the reconciler produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub verdict: RunVerdict,
    pub events: Vec<EventRecord>,
    pub created: Vec<i64>,
    pub updated: Vec<i64>,
    pub closed: Vec<i64>,
    pub message: String,
}

impl ReconcileReport {
    pub fn new(
        events: Vec<EventRecord>,
        created: Vec<i64>,
        updated: Vec<i64>,
        closed: Vec<i64>,
    ) -> Self {
        let verdict = RunVerdict::from_outcomes(events.iter().map(|e| &e.outcome));
        let failed = events.iter().filter(|e| !e.outcome.is_success()).count();
        let message = match verdict {
            RunVerdict::Skipped => "no output events to process".to_string(),
            _ => format!(
                "{} event(s): {} failed; {} created, {} updated, {} closed",
                events.len(),
                failed,
                created.len(),
                updated.len(),
                closed.len()
            ),
        };
        Self {
            verdict,
            events,
            created,
            updated,
            closed,
            message,
        }
    }

    /// A job that never reached reconciliation.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            verdict: RunVerdict::Failed,
            events: Vec::new(),
            created: Vec::new(),
            updated: Vec::new(),
            closed: Vec::new(),
            message: message.into(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter().filter(|e| !e.outcome.is_success())
    }
}
