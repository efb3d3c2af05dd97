//! Status - Normalising remote status strings into poll phases

use std::collections::BTreeSet;

use serde_json::Value;

use crate::classify::ErrorEnvelope;
use crate::path;

/// Normalised phase of a polled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    TerminalSuccess,
    TerminalFailure,
}

/// Caller-supplied status sets for one wait
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSets {
    pending: BTreeSet<String>,
    target: BTreeSet<String>,
    failure: BTreeSet<String>,
    /// Separator for compound `PHASE_OPERATION` statuses (e.g. `SUCCESS_BIND`)
    compound_separator: Option<char>,
}

fn to_set<I, S>(states: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    states.into_iter().map(Into::into).collect()
}

impl StateSets {
    pub fn new<P, T, A, B>(pending: P, target: T) -> Self
    where
        P: IntoIterator<Item = A>,
        T: IntoIterator<Item = B>,
        A: Into<String>,
        B: Into<String>,
    {
        Self {
            pending: to_set(pending),
            target: to_set(target),
            failure: BTreeSet::new(),
            compound_separator: None,
        }
    }

    /// Statuses that abort the wait immediately
    pub fn with_failure<I, S>(mut self, failure: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure = to_set(failure);
        self
    }

    /// Compare only the phase prefix of compound statuses
    pub fn split_compound(mut self, separator: char) -> Self {
        self.compound_separator = Some(separator);
        self
    }

    /// The part of `status` compared against the sets
    pub fn normalize<'a>(&self, status: &'a str) -> &'a str {
        match self.compound_separator {
            Some(sep) => status.split(sep).next().unwrap_or(status),
            None => status,
        }
    }

    /// Phase for a raw status. Target wins over failure and pending when the
    /// sets overlap. With an empty pending set every other status counts as
    /// pending; otherwise an unknown status is a terminal failure.
    pub fn phase_of(&self, status: &str) -> Phase {
        let status = self.normalize(status);
        if self.target.contains(status) {
            Phase::TerminalSuccess
        } else if self.failure.contains(status) {
            Phase::TerminalFailure
        } else if self.pending.is_empty() || self.pending.contains(status) {
            Phase::Pending
        } else {
            Phase::TerminalFailure
        }
    }

    /// Returns true if `status` is a declared failure status (as opposed to
    /// an unexpected one)
    pub fn is_failure(&self, status: &str) -> bool {
        let status = self.normalize(status);
        !self.target.contains(status) && self.failure.contains(status)
    }

    pub fn has_target(&self) -> bool {
        !self.target.is_empty()
    }

    /// Human readable description of the target set
    pub fn describe_target(&self) -> String {
        if !self.has_target() {
            "absence".to_string()
        } else {
            self.target.iter().cloned().collect::<Vec<_>>().join("|")
        }
    }

    /// Every status the wait knows about
    pub fn describe_expected(&self) -> String {
        self.pending
            .iter()
            .chain(&self.target)
            .chain(&self.failure)
            .cloned()
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Result of one successful status read
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Raw status reported by the remote system
    pub status: String,
    /// Full response body
    pub payload: Value,
}

impl Observation {
    pub fn new(status: impl Into<String>, payload: Value) -> Self {
        Self {
            status: status.into(),
            payload,
        }
    }

    /// Extract the status at `status_key`; a missing status reads as ""
    pub fn from_payload(payload: Value, status_key: &str) -> Self {
        let status = path::search_str(&payload, status_key).unwrap_or_default();
        Self { status, payload }
    }
}

/// View of a polled resource after one poll iteration
#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    pub status: String,
    pub phase: Phase,
    pub last_error: Option<ErrorEnvelope>,
}

impl PollState {
    /// Recompute the phase for a freshly read status
    pub fn observe(status: &str, states: &StateSets) -> Self {
        Self {
            status: status.to_string(),
            phase: states.phase_of(status),
            last_error: None,
        }
    }

    /// A tolerated not-found read; polling continues
    pub fn absent(error: ErrorEnvelope) -> Self {
        Self {
            status: String::new(),
            phase: Phase::Pending,
            last_error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_of() {
        let states = StateSets::new(["RUNNING", "READY"], ["SUCCESS"]).with_failure(["FAIL"]);
        assert_eq!(states.phase_of("RUNNING"), Phase::Pending);
        assert_eq!(states.phase_of("READY"), Phase::Pending);
        assert_eq!(states.phase_of("SUCCESS"), Phase::TerminalSuccess);
        assert_eq!(states.phase_of("FAIL"), Phase::TerminalFailure);
        assert_eq!(states.phase_of("WHATEVER"), Phase::TerminalFailure);
        assert!(states.is_failure("FAIL"));
        assert!(!states.is_failure("WHATEVER"));
    }

    #[test]
    fn test_target_wins_on_overlap() {
        let states = StateSets::new(["ACTIVE", "BUILD"], ["ACTIVE"]).with_failure(["ACTIVE"]);
        assert_eq!(states.phase_of("ACTIVE"), Phase::TerminalSuccess);
        assert!(!states.is_failure("ACTIVE"));
    }

    #[test]
    fn test_empty_pending_accepts_anything() {
        let states = StateSets::new(Vec::<String>::new(), vec!["COMPLETED".to_string()]);
        assert_eq!(states.phase_of("whatever"), Phase::Pending);
        assert_eq!(states.phase_of(""), Phase::Pending);
        assert_eq!(states.phase_of("COMPLETED"), Phase::TerminalSuccess);
    }

    #[test]
    fn test_pending_and_target_item_types_differ() {
        let target = vec!["ACTIVE".to_string()];
        let states = StateSets::new(["BUILD"], target);
        assert_eq!(states.phase_of("BUILD"), Phase::Pending);
        assert_eq!(states.phase_of("ACTIVE"), Phase::TerminalSuccess);
        assert!(states.has_target());
        assert!(!StateSets::new(["DELETING"], Vec::<String>::new()).has_target());
    }

    #[test]
    fn test_compound_status() {
        let states = StateSets::new(["RUNNING"], ["SUCCESS"])
            .with_failure(["FAILED"])
            .split_compound('_');
        assert_eq!(states.normalize("SUCCESS_BIND"), "SUCCESS");
        assert_eq!(states.phase_of("SUCCESS_BIND"), Phase::TerminalSuccess);
        assert_eq!(states.phase_of("RUNNING_UNBIND"), Phase::Pending);
        assert_eq!(states.phase_of("FAILED_BIND"), Phase::TerminalFailure);
        assert_eq!(states.phase_of("SUCCESS"), Phase::TerminalSuccess);
    }

    #[test]
    fn test_without_compound_split_status_is_exact() {
        let states = StateSets::new(["RUNNING"], ["SUCCESS"]);
        assert_eq!(states.phase_of("SUCCESS_BIND"), Phase::TerminalFailure);
    }

    #[test]
    fn test_describe() {
        let states = StateSets::new(["PENDING"], ["COMPLETED", "ACTIVE"]);
        assert_eq!(states.describe_target(), "ACTIVE|COMPLETED");
        assert_eq!(states.describe_expected(), "PENDING|ACTIVE|COMPLETED");
        assert_eq!(
            StateSets::new(["DELETING"], Vec::<&str>::new()).describe_target(),
            "absence"
        );
    }

    #[test]
    fn test_observation_from_payload() {
        let obs = Observation::from_payload(json!({"job": {"status": "RUNNING"}}), "job.status");
        assert_eq!(obs.status, "RUNNING");

        let obs = Observation::from_payload(json!({}), "status");
        assert_eq!(obs.status, "");
    }

    #[test]
    fn test_poll_state_recomputed_from_status() {
        let states = StateSets::new(["RUNNING"], ["SUCCESS"]);
        let state = PollState::observe("RUNNING", &states);
        assert_eq!(state.phase, Phase::Pending);
        let state = PollState::observe("SUCCESS", &states);
        assert_eq!(state.phase, Phase::TerminalSuccess);
        assert!(state.last_error.is_none());
    }
}
