//! Outcome model: the typed result of a handler run.
//!
//! A handler finishes either by returning `Err(JobError)` or by returning an
//! `Outcome`. The outcome itself has two arms so a structured failure can
//! never be mistaken for success: the dispatch boundary matches on it
//! exhaustively and records `Outcome::Failure` exactly like a thrown error.

use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, JobFailure};

/// Two-arm handler outcome.
///
/// Serialized as `{"kind":"SUCCESS","value":...}` / `{"kind":"FAILURE","value":{...}}`.
#[must_use = "an Outcome may be a failure and must be inspected"]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success(serde_json::Value),
    Failure(JobFailure),
}

impl Outcome {
    /// Success without a payload.
    pub fn success() -> Self {
        Outcome::Success(serde_json::Value::Null)
    }

    pub fn success_with(value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::failure(format!("result encode: {e}")),
        }
    }

    /// Execution failure with a human-readable reason.
    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure(JobFailure::new(ErrorKind::Execution, reason))
    }

    pub fn failure_of(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Outcome::Failure(JobFailure::new(kind, reason))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_as_tagged_enum() {
        let v = serde_json::to_value(Outcome::success_with(serde_json::json!({"n": 1}))).unwrap();
        assert_eq!(v["kind"], "SUCCESS");
        assert_eq!(v["value"]["n"], 1);

        let v = serde_json::to_value(Outcome::failure("boom")).unwrap();
        assert_eq!(v["kind"], "FAILURE");
        assert_eq!(v["value"]["message"], "boom");
        assert_eq!(v["value"]["kind"], "execution");
    }

    #[test]
    fn failure_is_not_success() {
        assert!(!Outcome::failure("boom").is_success());
        assert!(Outcome::success().is_success());
    }
}
