//! Strict parsing of model responses into [`Finding`]s.
//!
//! Model output is untrusted text. Two forms are accepted:
//!
//! ```text
//! HEURISTIC: error-prevention      (optional, must match)
//! VERDICT: issue
//! SEVERITY: high
//! DESCRIPTION: The delete button has no confirmation step.
//! LOCATION: toolbar                (optional)
//! ```
//!
//! or one JSON object with the same lower-case keys, optionally fenced in
//! a ```` ```json ```` block. Lines outside the tagged fields are ignored.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::finding::{Finding, Verdict};
use crate::ruleset::Heuristic;

/// Why a model response was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' appears more than once")]
    DuplicateField(String),

    #[error("invalid verdict '{0}' (expected pass or issue)")]
    InvalidVerdict(String),

    #[error("severity '{severity}' is not in the scale of heuristic '{heuristic_id}'")]
    UnknownSeverity {
        heuristic_id: String,
        severity: String,
    },

    #[error("severity '{0}' given for a passing verdict")]
    SeverityOnPass(String),

    #[error("response names heuristic '{found}', expected '{expected}'")]
    HeuristicMismatch { expected: String, found: String },

    #[error("description is empty")]
    EmptyDescription,

    #[error("response is not a valid JSON object: {0}")]
    InvalidJson(String),

    #[error("response is not a JSON array of rules: {0}")]
    NotARuleArray(String),

    #[error("response contains no recognizable fields")]
    NoFields,
}

const FIELDS: [&str; 5] = ["heuristic", "verdict", "severity", "description", "location"];

fn tagged_line() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"(?i)^\s*[*_`]*\s*(heuristic|verdict|severity|description|location)\s*[*_`]*\s*:\s*[*_`]*\s*(.*?)\s*$")
            .expect("static response pattern")
    })
}

/// Parse `raw` as the finding for `heuristic`.
pub fn parse_finding(heuristic: &Heuristic, raw: &str) -> Result<Finding, ResponseError> {
    let body = strip_fence(raw.trim());
    let fields = if body.starts_with('{') {
        json_fields(body)?
    } else {
        tagged_fields(body)?
    };
    validate(heuristic, fields)
}

pub(crate) fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn tagged_fields(body: &str) -> Result<HashMap<&'static str, String>, ResponseError> {
    let mut fields = HashMap::new();
    for line in body.lines() {
        let Some(caps) = tagged_line().captures(line) else {
            continue;
        };
        let key = caps[1].to_ascii_lowercase();
        let Some(field) = FIELDS.iter().find(|f| **f == key) else {
            continue;
        };
        let value = unquote(&caps[2]).to_string();
        if fields.insert(*field, value).is_some() {
            return Err(ResponseError::DuplicateField(key));
        }
    }
    if fields.is_empty() {
        return Err(ResponseError::NoFields);
    }
    Ok(fields)
}

fn json_fields(body: &str) -> Result<HashMap<&'static str, String>, ResponseError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| ResponseError::InvalidJson(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ResponseError::InvalidJson("expected an object".to_string()));
    };
    let mut fields = HashMap::new();
    for (key, value) in map {
        let key = key.to_ascii_lowercase();
        let Some(field) = FIELDS.iter().find(|f| **f == key) else {
            continue;
        };
        let text = match value {
            Value::Null => String::new(),
            Value::String(s) => s,
            other => {
                return Err(ResponseError::InvalidJson(format!(
                    "field '{key}' must be a string, got {other}"
                )))
            }
        };
        if fields.insert(*field, text).is_some() {
            return Err(ResponseError::DuplicateField(key));
        }
    }
    if fields.is_empty() {
        return Err(ResponseError::NoFields);
    }
    Ok(fields)
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

fn validate(
    heuristic: &Heuristic,
    mut fields: HashMap<&'static str, String>,
) -> Result<Finding, ResponseError> {
    if let Some(found) = fields.remove("heuristic") {
        let found = found.trim().to_string();
        if !found.is_empty() && !found.eq_ignore_ascii_case(&heuristic.id) {
            return Err(ResponseError::HeuristicMismatch {
                expected: heuristic.id.clone(),
                found,
            });
        }
    }

    let verdict_raw = fields
        .remove("verdict")
        .ok_or(ResponseError::MissingField("verdict"))?;
    let verdict = match verdict_raw.trim().to_ascii_lowercase().as_str() {
        "pass" | "passed" => Verdict::Pass,
        "issue" | "fail" | "violation" => Verdict::Issue,
        _ => return Err(ResponseError::InvalidVerdict(verdict_raw)),
    };

    let severity_raw = fields
        .remove("severity")
        .ok_or(ResponseError::MissingField("severity"))?;
    let severity_raw = severity_raw.trim();
    let no_severity = severity_raw.is_empty()
        || severity_raw.eq_ignore_ascii_case("none")
        || severity_raw.eq_ignore_ascii_case("n/a");

    let severity = match verdict {
        Verdict::Pass if no_severity => None,
        Verdict::Pass => return Err(ResponseError::SeverityOnPass(severity_raw.to_string())),
        Verdict::Issue if no_severity => return Err(ResponseError::MissingField("severity")),
        Verdict::Issue => {
            let scale = &heuristic.severity_scale;
            let rank = scale
                .rank(severity_raw)
                .ok_or_else(|| ResponseError::UnknownSeverity {
                    heuristic_id: heuristic.id.clone(),
                    severity: severity_raw.to_string(),
                })?;
            Some(scale.levels()[rank].clone())
        }
    };

    let description = fields
        .remove("description")
        .ok_or(ResponseError::MissingField("description"))?;
    let description = description.trim().to_string();
    if description.is_empty() {
        return Err(ResponseError::EmptyDescription);
    }

    let location_hint = fields
        .remove("location")
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("none"));

    Ok(Finding {
        heuristic_id: heuristic.id.clone(),
        verdict,
        severity,
        description,
        location_hint,
    })
}
