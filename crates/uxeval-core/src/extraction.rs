//! Heuristic extraction from guideline documents.
//!
//! Each page of substantial text becomes one model call whose response
//! must be a JSON array of rules. Unlike evaluation, extraction is
//! best-effort: a page that keeps failing is logged and skipped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactNormalizer, RawArtifact};
use crate::cancel::CancelToken;
use crate::error::{EvalError, Result};
use crate::metrics::METRICS;
use crate::model::{ModelClient, Prompt};
use crate::response::{strip_fence, ResponseError};
use crate::retry::{CallBudget, RetryPolicy, RetryingCaller};
use crate::ruleset::{ruleset_from_extracted, ExtractedRule, Ruleset, SeverityScale};

/// Pages whose trimmed text is this long or shorter are skipped.
pub const MIN_PAGE_CHARS: usize = 100;

const SYSTEM_PROMPT: &str = "You are a document analysis system that extracts design and user \
experience heuristic rules. Analyze the text of a single document page and extract every \
distinct, clearly defined heuristic rule it states. Reply with a JSON array only. Each element \
is an object with the string fields rule_id, rule_name and description and the integer field \
source_page. Reply with [] when the page defines no rules.";

const STRICT_SUFFIX: &str = "\n\nYour previous answer was not a valid JSON array. Reply with the \
JSON array only, no prose and no markdown.";

/// One page of document text, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPage {
    pub page_num: u32,
    pub text: String,
}

impl DocumentPage {
    pub fn new(page_num: u32, text: impl Into<String>) -> Self {
        Self {
            page_num,
            text: text.into(),
        }
    }

    pub fn is_substantial(&self) -> bool {
        self.text.trim().chars().count() > MIN_PAGE_CHARS
    }
}

/// Split extracted document text into pages on `separator`.
pub fn split_pages(text: &str, separator: &str) -> Vec<DocumentPage> {
    let pieces: Vec<&str> = if separator.is_empty() {
        vec![text]
    } else {
        text.split(separator).collect()
    };
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, page)| DocumentPage::new(i as u32 + 1, page))
        .collect()
}

#[derive(Debug, Deserialize)]
struct RuleWire {
    rule_id: String,
    rule_name: String,
    description: String,
}

/// Split the text of a PDF into pages.
///
/// Page boundaries are the form feeds the text extractor emits.
pub fn pages_from_pdf(bytes: &[u8]) -> Result<Vec<DocumentPage>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| EvalError::unsupported("pdf", e.to_string()))?;
    Ok(split_pages(&text, "\u{c}"))
}

/// Structured-output schema for one page of extracted rules.
pub fn rule_array_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "rule_id": { "type": "STRING" },
                "rule_name": { "type": "STRING" },
                "description": { "type": "STRING" },
                "source_page": { "type": "NUMBER" }
            },
            "required": ["rule_id", "rule_name", "description", "source_page"]
        }
    })
}

/// Parse one page response; `source_page` is forced to `page_num`.
pub fn parse_rules(
    raw: &str,
    page_num: u32,
) -> std::result::Result<Vec<ExtractedRule>, ResponseError> {
    let body = strip_fence(raw.trim());
    let rules: Vec<RuleWire> =
        serde_json::from_str(body).map_err(|e| ResponseError::NotARuleArray(e.to_string()))?;
    Ok(rules
        .into_iter()
        .filter(|r| !r.rule_id.trim().is_empty())
        .map(|r| ExtractedRule {
            rule_id: r.rule_id.trim().to_string(),
            rule_name: r.rule_name.trim().to_string(),
            description: r.description.trim().to_string(),
            source_page: Some(page_num),
        })
        .collect())
}

/// Drives page-by-page extraction against a model backend.
pub struct HeuristicExtractor {
    client: Arc<dyn ModelClient>,
    retry: RetryPolicy,
    timeout: Duration,
    normalizer: ArtifactNormalizer,
}

impl HeuristicExtractor {
    pub fn new(client: Arc<dyn ModelClient>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            retry,
            timeout,
            normalizer: ArtifactNormalizer::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: ArtifactNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Extract rules from `pages`, in page order.
    ///
    /// A rule whose name and description repeat an earlier rule is dropped.
    /// A rule that reuses an earlier id with different content is kept
    /// under `<id>@p<page>`.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub async fn extract(
        &self,
        pages: &[DocumentPage],
        mut cancel: CancelToken,
    ) -> Result<Vec<ExtractedRule>> {
        let caller = RetryingCaller::new(
            Arc::clone(&self.client),
            self.retry,
            self.timeout,
            Uuid::new_v4().to_string(),
        );
        let mut ids = HashSet::new();
        let mut contents = HashSet::new();
        let mut rules = Vec::new();

        for page in pages.iter().filter(|p| p.is_substantial()) {
            match self.extract_page(&caller, page, &mut cancel).await {
                Ok(found) => {
                    info!(page = page.page_num, rules = found.len(), "page extracted");
                    for mut rule in found {
                        if !contents.insert((rule.rule_name.clone(), rule.description.clone())) {
                            continue;
                        }
                        if ids.contains(&rule.rule_id) {
                            rule.rule_id = page_scoped_id(&ids, &rule.rule_id, page.page_num);
                        }
                        ids.insert(rule.rule_id.clone());
                        rules.push(rule);
                    }
                }
                Err(EvalError::Cancelled) => return Err(EvalError::Cancelled),
                Err(err) => {
                    warn!(page = page.page_num, error = %err, "page skipped");
                }
            }
        }
        info!(rules = rules.len(), "extraction complete");
        Ok(rules)
    }

    async fn extract_page(
        &self,
        caller: &RetryingCaller,
        page: &DocumentPage,
        cancel: &mut CancelToken,
    ) -> Result<Vec<ExtractedRule>> {
        let artifact = self.normalizer.normalize(&RawArtifact::markup(&page.text))?;
        let subject = format!("page-{}", page.page_num);
        let mut budget = CallBudget::default();
        let mut strict = false;
        loop {
            let prompt = page_prompt(&subject, page, strict);
            let text = caller
                .call(&subject, &prompt, &artifact, &mut budget, cancel)
                .await?;
            match parse_rules(&text, page.page_num) {
                Ok(rules) => return Ok(rules),
                Err(err) if !strict => {
                    warn!(page = page.page_num, error = %err, "re-prompting page");
                    METRICS.inc_reprompts();
                    strict = true;
                }
                Err(err) => return Err(EvalError::MalformedResponse(err)),
            }
        }
    }

    /// Turn extracted rules into a validated ruleset.
    pub fn into_ruleset(
        rules: &[ExtractedRule],
        id: &str,
        name: &str,
        scale: SeverityScale,
    ) -> Result<Ruleset> {
        ruleset_from_extracted(id, name, rules, scale)
    }
}

fn page_prompt(subject: &str, page: &DocumentPage, strict: bool) -> Prompt {
    let mut system = SYSTEM_PROMPT.to_string();
    if strict {
        system.push_str(STRICT_SUFFIX);
    }
    let user = format!(
        "Extract all heuristic rules from page {n}. Set source_page to {n}.\n\
         Page content:\n\n---\n{text}\n---",
        n = page.page_num,
        text = page.text,
    );
    Prompt::new(subject, system, user).with_response_schema(rule_array_schema())
}

fn page_scoped_id(taken: &HashSet<String>, id: &str, page_num: u32) -> String {
    let base = format!("{id}@p{page_num}");
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{base}-{n}");
        n += 1;
    }
    candidate
}
