//! arXiv paper collection.
//!
//! Guideline corpora for rule extraction are often research papers. This
//! module searches the arXiv Atom API by keyword and downloads the PDFs of
//! the hits, which then feed [`crate::extraction::pages_from_pdf`].

use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EvalError, Result};

pub const DEFAULT_ARXIV_API: &str = "http://export.arxiv.org/api/query";
pub const DEFAULT_ARXIV_PDF: &str = "http://arxiv.org/pdf";

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    /// Abstract URL as reported by the feed, e.g. `http://arxiv.org/abs/2101.00001v1`.
    pub arxiv_id: String,
    pub primary_category: Option<String>,
}

impl Paper {
    /// Bare identifier: the last path segment of `arxiv_id`.
    pub fn short_id(&self) -> &str {
        self.arxiv_id
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.arxiv_id)
    }
}

/// Client for the arXiv query API and PDF mirror.
pub struct ArxivClient {
    http: reqwest::Client,
    api_url: String,
    pdf_base: String,
}

impl ArxivClient {
    pub fn new() -> Result<Self> {
        Self::with_endpoints(DEFAULT_ARXIV_API, DEFAULT_ARXIV_PDF)
    }

    pub fn with_endpoints(api_url: impl Into<String>, pdf_base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("uxeval/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EvalError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into(),
            pdf_base: pdf_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Query URL matching papers that mention every keyword.
    pub fn search_url(&self, keywords: &[String], max_results: u32) -> Result<Url> {
        let terms: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| format!("all:{k}"))
            .collect();
        if terms.is_empty() {
            return Err(EvalError::config("at least one search keyword is required"));
        }
        if max_results == 0 {
            return Err(EvalError::config("max_results must be > 0"));
        }
        Url::parse_with_params(
            &self.api_url,
            &[
                ("search_query", terms.join(" AND ")),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
            ],
        )
        .map_err(|e| EvalError::config(format!("invalid arXiv endpoint {}: {e}", self.api_url)))
    }

    pub async fn search(&self, keywords: &[String], max_results: u32) -> Result<Vec<Paper>> {
        let url = self.search_url(keywords, max_results)?;
        debug!(%url, "querying arXiv");
        let body = self.get(url).await?.text().await.map_err(request_error)?;
        let papers = parse_atom_feed(&body)?;
        info!(papers = papers.len(), "arXiv search complete");
        Ok(papers)
    }

    /// Download the PDF of `paper` into `dir` as `<short_id>.pdf`.
    pub async fn download_pdf(&self, paper: &Paper, dir: &Path) -> Result<PathBuf> {
        let id = paper.short_id();
        if id.is_empty() {
            return Err(EvalError::config(format!(
                "paper '{}' has no arXiv id",
                paper.title
            )));
        }
        let url = Url::parse(&format!("{}/{id}.pdf", self.pdf_base))
            .map_err(|e| EvalError::config(format!("invalid PDF URL for {id}: {e}")))?;
        let bytes = self.get(url).await?.bytes().await.map_err(request_error)?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{id}.pdf"));
        tokio::fs::write(&path, &bytes).await?;
        info!(id, path = %path.display(), bytes = bytes.len(), "paper downloaded");
        Ok(path)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let response = self.http.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(EvalError::Backend(format!("arXiv returned status {status}")));
        }
        Ok(response)
    }
}

fn request_error(err: reqwest::Error) -> EvalError {
    EvalError::Backend(format!("arXiv request failed: {err}"))
}

#[derive(Default)]
struct EntryFields {
    title: String,
    summary: String,
    id: String,
    authors: Vec<String>,
    primary_category: Option<String>,
}

impl EntryFields {
    fn finish(self) -> Paper {
        Paper {
            title: collapse_whitespace(&self.title),
            authors: self.authors,
            summary: collapse_whitespace(&self.summary),
            arxiv_id: self.id.trim().to_string(),
            primary_category: self.primary_category,
        }
    }
}

/// Parse an arXiv Atom feed into papers, in feed order.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut papers = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut entry: Option<EntryFields> = None;

    loop {
        match reader.read_event().map_err(feed_error)? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"entry" {
                    entry = Some(EntryFields::default());
                }
                if let Some(fields) = entry.as_mut() {
                    read_category(fields, &e)?;
                }
                path.push(name);
            }
            Event::Empty(e) => {
                if let Some(fields) = entry.as_mut() {
                    read_category(fields, &e)?;
                }
            }
            Event::Text(t) => {
                let Some(fields) = entry.as_mut() else {
                    continue;
                };
                let text = t.unescape().map_err(feed_error)?;
                match (parent(&path), path.last().map(Vec::as_slice)) {
                    (Some(b"entry"), Some(b"title")) => fields.title.push_str(&text),
                    (Some(b"entry"), Some(b"summary")) => fields.summary.push_str(&text),
                    (Some(b"entry"), Some(b"id")) => fields.id.push_str(&text),
                    (Some(b"author"), Some(b"name")) => fields.authors.push(text.trim().to_string()),
                    _ => {}
                }
            }
            Event::End(e) => {
                path.pop();
                if e.local_name().as_ref() == b"entry" {
                    if let Some(fields) = entry.take() {
                        papers.push(fields.finish());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(papers)
}

fn parent(path: &[Vec<u8>]) -> Option<&[u8]> {
    path.len()
        .checked_sub(2)
        .and_then(|i| path.get(i))
        .map(Vec::as_slice)
}

fn read_category(fields: &mut EntryFields, element: &BytesStart<'_>) -> Result<()> {
    if element.local_name().as_ref() != b"primary_category" {
        return Ok(());
    }
    if let Some(term) = element.try_get_attribute("term").map_err(feed_error)? {
        fields.primary_category = Some(term.unescape_value().map_err(feed_error)?.into_owned());
    }
    Ok(())
}

fn feed_error(err: impl std::fmt::Display) -> EvalError {
    EvalError::Backend(format!("invalid arXiv feed: {err}"))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
