//! Per-heuristic findings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of judging one heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Issue,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Issue => write!(f, "issue"),
        }
    }
}

/// The verdict produced for one heuristic in one run.
///
/// `severity` is set exactly when `verdict` is [`Verdict::Issue`] and is
/// always a level from the heuristic's severity scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub heuristic_id: String,
    pub verdict: Verdict,
    pub severity: Option<String>,
    pub description: String,
    pub location_hint: Option<String>,
}

impl Finding {
    pub fn pass(heuristic_id: &str, description: &str) -> Self {
        Self {
            heuristic_id: heuristic_id.to_string(),
            verdict: Verdict::Pass,
            severity: None,
            description: description.to_string(),
            location_hint: None,
        }
    }

    pub fn issue(heuristic_id: &str, severity: &str, description: &str) -> Self {
        Self {
            heuristic_id: heuristic_id.to_string(),
            verdict: Verdict::Issue,
            severity: Some(severity.to_string()),
            description: description.to_string(),
            location_hint: None,
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location_hint = Some(location.to_string());
        self
    }

    pub fn is_issue(&self) -> bool {
        self.verdict == Verdict::Issue
    }
}
