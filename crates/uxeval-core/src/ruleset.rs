//! Heuristic ruleset registry.
//!
//! A [`Ruleset`] is an ordered, validated catalog of [`Heuristic`]s. The
//! [`RulesetRegistry`] holds every catalog known to the process and is
//! built once at startup, then passed around explicitly; nothing here is
//! mutated after load.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EvalError, Result};

/// Id of the built-in ten usability heuristics catalog.
pub const NIELSEN_10: &str = "nielsen-10";

/// Default severity levels, lowest first.
pub const DEFAULT_SEVERITY_LEVELS: [&str; 4] = ["low", "medium", "high", "critical"];

// ---------------------------------------------------------------------------
// Severity scale
// ---------------------------------------------------------------------------

/// Ordered set of severity levels, lowest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SeverityScale {
    levels: Vec<String>,
}

impl SeverityScale {
    pub fn new<I, S>(levels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let levels: Vec<String> = levels
            .into_iter()
            .map(|l| l.into().trim().to_ascii_lowercase())
            .collect();
        if levels.is_empty() {
            return Err(EvalError::config("severity scale must not be empty"));
        }
        let mut seen = HashSet::new();
        for level in &levels {
            if level.is_empty() || level == "none" {
                return Err(EvalError::config(format!(
                    "invalid severity level '{level}'"
                )));
            }
            if !seen.insert(level.as_str()) {
                return Err(EvalError::config(format!(
                    "duplicate severity level '{level}'"
                )));
            }
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn contains(&self, level: &str) -> bool {
        self.rank(level).is_some()
    }

    /// Position of `level` in the scale (0 = least severe).
    pub fn rank(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l.eq_ignore_ascii_case(level))
    }
}

impl Default for SeverityScale {
    fn default() -> Self {
        Self {
            levels: DEFAULT_SEVERITY_LEVELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for SeverityScale {
    type Error = EvalError;

    fn try_from(levels: Vec<String>) -> Result<Self> {
        Self::new(levels)
    }
}

impl From<SeverityScale> for Vec<String> {
    fn from(scale: SeverityScale) -> Self {
        scale.levels
    }
}

// ---------------------------------------------------------------------------
// Heuristic / Ruleset
// ---------------------------------------------------------------------------

/// A named usability rule an artifact is judged against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heuristic {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity_scale: SeverityScale,
}

impl Heuristic {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            severity_scale: SeverityScale::default(),
        }
    }

    pub fn with_scale(mut self, scale: SeverityScale) -> Self {
        self.severity_scale = scale;
        self
    }
}

/// An ordered, validated heuristic catalog.
///
/// # Invariants
///
/// Non-empty, and every heuristic id is non-empty and unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ruleset {
    id: String,
    name: String,
    heuristics: Vec<Heuristic>,
}

impl Ruleset {
    pub fn new(id: &str, name: &str, heuristics: Vec<Heuristic>) -> Result<Self> {
        if id.trim().is_empty() {
            return Err(EvalError::config("ruleset id must not be empty"));
        }
        if heuristics.is_empty() {
            return Err(EvalError::config(format!("ruleset '{id}' is empty")));
        }
        let mut seen = HashSet::new();
        for h in &heuristics {
            if h.id.trim().is_empty() {
                return Err(EvalError::config(format!(
                    "ruleset '{id}' contains a heuristic with an empty id"
                )));
            }
            if !seen.insert(h.id.as_str()) {
                return Err(EvalError::config(format!(
                    "ruleset '{id}' contains duplicate heuristic id '{}'",
                    h.id
                )));
            }
        }
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            heuristics,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Heuristics in evaluation order.
    pub fn list(&self) -> &[Heuristic] {
        &self.heuristics
    }

    pub fn len(&self) -> usize {
        self.heuristics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heuristics.is_empty()
    }

    pub fn get(&self, heuristic_id: &str) -> Option<&Heuristic> {
        self.heuristics.iter().find(|h| h.id == heuristic_id)
    }

    /// Union of all severity levels used by the ruleset's heuristics.
    pub fn severity_levels(&self) -> Vec<&str> {
        let mut levels: Vec<&str> = Vec::new();
        for h in &self.heuristics {
            for level in h.severity_scale.levels() {
                if !levels.contains(&level.as_str()) {
                    levels.push(level);
                }
            }
        }
        levels
    }

    /// The ten usability heuristics.
    pub fn nielsen_10() -> Self {
        let heuristics = vec![
            Heuristic::new(
                "visibility-of-system-status",
                "Visibility of system status",
                "The design should always keep users informed about what is going on, \
                 through appropriate feedback within a reasonable amount of time.",
            ),
            Heuristic::new(
                "match-system-real-world",
                "Match between system and the real world",
                "The design should speak the users' language. Use words, phrases, and \
                 concepts familiar to the user, rather than internal jargon.",
            ),
            Heuristic::new(
                "user-control-freedom",
                "User control and freedom",
                "Users often perform actions by mistake. They need a clearly marked \
                 emergency exit to leave the unwanted action, such as undo and cancel.",
            ),
            Heuristic::new(
                "consistency-standards",
                "Consistency and standards",
                "Users should not have to wonder whether different words, situations, \
                 or actions mean the same thing. Follow platform and industry conventions.",
            ),
            Heuristic::new(
                "error-prevention",
                "Error prevention",
                "Good error messages are important, but the best designs carefully \
                 prevent problems from occurring in the first place.",
            ),
            Heuristic::new(
                "recognition-over-recall",
                "Recognition rather than recall",
                "Minimize the user's memory load by making elements, actions, and \
                 options visible.",
            ),
            Heuristic::new(
                "flexibility-efficiency",
                "Flexibility and efficiency of use",
                "Shortcuts, hidden from novice users, may speed up the interaction for \
                 the expert user so that the design can cater to both.",
            ),
            Heuristic::new(
                "aesthetic-minimalist-design",
                "Aesthetic and minimalist design",
                "Interfaces should not contain information which is irrelevant or \
                 rarely needed.",
            ),
            Heuristic::new(
                "error-recovery",
                "Help users recognize, diagnose, and recover from errors",
                "Error messages should be expressed in plain language, precisely \
                 indicate the problem, and constructively suggest a solution.",
            ),
            Heuristic::new(
                "help-documentation",
                "Help and documentation",
                "It's best if the system doesn't need any additional explanation. \
                 However, it may be necessary to provide documentation to help users \
                 understand how to complete their tasks.",
            ),
        ];
        Self {
            id: NIELSEN_10.to_string(),
            name: "Ten usability heuristics".to_string(),
            heuristics,
        }
    }
}

// ---------------------------------------------------------------------------
// File formats
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RulesetFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    severity_scale: Option<SeverityScale>,
    heuristics: Vec<HeuristicEntry>,
}

#[derive(Debug, Deserialize)]
struct HeuristicEntry {
    id: String,
    name: String,
    description: String,
    #[serde(default)]
    severity_scale: Option<SeverityScale>,
}

/// One rule in the extracted-heuristics array format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRule {
    pub rule_id: String,
    pub rule_name: String,
    pub description: String,
    #[serde(default)]
    pub source_page: Option<u32>,
}

impl RulesetFile {
    fn into_ruleset(self) -> Result<Ruleset> {
        let default_scale = self.severity_scale.unwrap_or_default();
        let heuristics = self
            .heuristics
            .into_iter()
            .map(|h| Heuristic {
                id: h.id,
                name: h.name,
                description: h.description,
                severity_scale: h.severity_scale.unwrap_or_else(|| default_scale.clone()),
            })
            .collect();
        let name = self.name.unwrap_or_else(|| self.id.clone());
        Ruleset::new(&self.id, &name, heuristics)
    }
}

/// Build a ruleset from extracted rules, all sharing `scale`.
pub fn ruleset_from_extracted(
    id: &str,
    name: &str,
    rules: &[ExtractedRule],
    scale: SeverityScale,
) -> Result<Ruleset> {
    let heuristics = rules
        .iter()
        .map(|r| Heuristic {
            id: r.rule_id.clone(),
            name: r.rule_name.clone(),
            description: r.description.clone(),
            severity_scale: scale.clone(),
        })
        .collect();
    Ruleset::new(id, name, heuristics)
}

/// Parse a ruleset file. TOML when the extension is `.toml`, JSON otherwise.
///
/// JSON accepts either the ruleset object form or a bare array of extracted
/// rules; in the latter case the ruleset id is the file stem.
pub fn parse_ruleset_file(path: &Path) -> Result<Ruleset> {
    let content = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    if is_toml {
        let file: RulesetFile = toml::from_str(&content).map_err(|e| {
            EvalError::config(format!("invalid ruleset file {}: {e}", path.display()))
        })?;
        return file.into_ruleset();
    }

    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        EvalError::config(format!("invalid ruleset file {}: {e}", path.display()))
    })?;
    if value.is_array() {
        let rules: Vec<ExtractedRule> = serde_json::from_value(value).map_err(|e| {
            EvalError::config(format!("invalid rule array in {}: {e}", path.display()))
        })?;
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        return ruleset_from_extracted(&id, &id, &rules, SeverityScale::default());
    }
    let file: RulesetFile = serde_json::from_value(value).map_err(|e| {
        EvalError::config(format!("invalid ruleset file {}: {e}", path.display()))
    })?;
    file.into_ruleset()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Read-only catalog of rulesets, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct RulesetRegistry {
    order: Vec<String>,
    rulesets: BTreeMap<String, Arc<Ruleset>>,
}

impl RulesetRegistry {
    /// Registry containing only the built-in catalog.
    pub fn builtin() -> Self {
        let nielsen = Ruleset::nielsen_10();
        let mut registry = Self::default();
        registry.order.push(nielsen.id().to_string());
        registry
            .rulesets
            .insert(nielsen.id().to_string(), Arc::new(nielsen));
        registry
    }

    /// Build a registry; fails on duplicate ruleset ids.
    pub fn from_rulesets(rulesets: Vec<Ruleset>) -> Result<Self> {
        let mut registry = Self::default();
        for ruleset in rulesets {
            registry.insert(ruleset)?;
        }
        Ok(registry)
    }

    /// Built-in catalog plus every ruleset file in `paths`.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut registry = Self::builtin();
        for path in paths {
            let path = path.as_ref();
            let ruleset = parse_ruleset_file(path)?;
            debug!(path = %path.display(), ruleset_id = %ruleset.id(), "loaded ruleset file");
            registry.insert(ruleset)?;
        }
        info!(rulesets = registry.order.len(), "ruleset registry loaded");
        Ok(registry)
    }

    fn insert(&mut self, ruleset: Ruleset) -> Result<()> {
        if self.rulesets.contains_key(ruleset.id()) {
            return Err(EvalError::config(format!(
                "duplicate ruleset id '{}'",
                ruleset.id()
            )));
        }
        self.order.push(ruleset.id().to_string());
        self.rulesets
            .insert(ruleset.id().to_string(), Arc::new(ruleset));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<Ruleset>> {
        self.rulesets
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::config(format!("unknown ruleset '{id}'")))
    }

    /// Rulesets in registration order.
    pub fn list(&self) -> Vec<Arc<Ruleset>> {
        self.order
            .iter()
            .filter_map(|id| self.rulesets.get(id).cloned())
            .collect()
    }
}
