//! uxeval - heuristic usability evaluation CLI
//!
//! ## Commands
//!
//! - `evaluate`: Judge a screenshot or markup file against a ruleset
//! - `rulesets`: List registered rulesets or show one
//! - `extract-rules`: Extract a heuristic catalog from document text or a PDF
//! - `collect-papers`: Search arXiv and download guideline papers

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use uxeval_core::{
    cancel_pair, pages_from_pdf, split_pages, write_report_json, write_report_md, ArxivClient,
    DocumentPage, Engine, EngineConfig, EvalError, HeuristicExtractor, HttpModelClient,
    ModelClient, RulesetRegistry, METRICS,
};

#[derive(Parser, Debug)]
#[command(name = "uxeval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Heuristic usability evaluation of UI designs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "UXEVAL_CONFIG")]
    config: Option<PathBuf>,

    /// Per-call model timeout in seconds
    #[arg(long, global = true, env = "UXEVAL_TIMEOUT_SECONDS")]
    timeout_seconds: Option<u64>,

    /// Transient retries per heuristic
    #[arg(long, global = true, env = "UXEVAL_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Maximum simultaneous model calls
    #[arg(long, global = true, env = "UXEVAL_CONCURRENCY")]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate one artifact and write the report
    Evaluate {
        /// Screenshot or markup file
        #[arg(short, long)]
        artifact: PathBuf,

        /// Artifact kind (image, png, jpeg, html, markup, ...)
        #[arg(short, long)]
        kind: String,

        /// Ruleset id (default from config)
        #[arg(short, long, env = "UXEVAL_RULESET")]
        ruleset: Option<String>,

        /// Report JSON path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write a markdown summary
        #[arg(long)]
        markdown: Option<PathBuf>,
    },

    /// List rulesets, or show the heuristics of one
    Rulesets {
        /// Ruleset id to show
        #[arg(long)]
        show: Option<String>,
    },

    /// Extract heuristic rules from document text or a PDF
    ExtractRules {
        /// Plain-text export of the document
        #[arg(short, long, required_unless_present = "pdf", conflicts_with = "pdf")]
        text: Option<PathBuf>,

        /// PDF document; pages follow the PDF's own page breaks
        #[arg(long)]
        pdf: Option<PathBuf>,

        /// Page separator in the text file
        #[arg(long, default_value = "\u{c}")]
        page_separator: String,

        /// Output path for the extracted rules (JSON array)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Search arXiv for guideline papers and optionally download them
    CollectPapers {
        /// Search keyword; repeat to require several
        #[arg(short, long = "keyword", required = true)]
        keywords: Vec<String>,

        /// Maximum number of papers to return
        #[arg(long, default_value_t = 10)]
        max_results: u32,

        /// Directory to download the PDFs into
        #[arg(long)]
        download_dir: Option<PathBuf>,

        /// Paper listing path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    uxeval_core::init_tracing(cli.json, level);

    let config = load_config(&cli)?;

    let result = match cli.command {
        Commands::Evaluate {
            artifact,
            kind,
            ruleset,
            output,
            markdown,
        } => {
            cmd_evaluate(
                &config,
                &artifact,
                &kind,
                ruleset.as_deref(),
                output.as_deref(),
                markdown.as_deref(),
            )
            .await
        }
        Commands::Rulesets { show } => cmd_rulesets(&config, show.as_deref()),
        Commands::ExtractRules {
            text,
            pdf,
            page_separator,
            output,
        } => {
            cmd_extract_rules(
                &config,
                text.as_deref(),
                pdf.as_deref(),
                &page_separator,
                &output,
            )
            .await
        }
        Commands::CollectPapers {
            keywords,
            max_results,
            download_dir,
            output,
        } => {
            cmd_collect_papers(
                &keywords,
                max_results,
                download_dir.as_deref(),
                output.as_deref(),
            )
            .await
        }
    };
    METRICS.flush();
    result
}

/// Load the config file (or defaults) and apply flag/env overrides.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(timeout) = cli.timeout_seconds {
        config.evaluation.timeout_seconds = timeout;
    }
    if let Some(retries) = cli.max_retries {
        config.evaluation.max_retries = retries;
    }
    if let Some(concurrency) = cli.concurrency {
        config.evaluation.concurrency_limit = concurrency;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn model_client(config: &EngineConfig) -> Result<Arc<dyn ModelClient>> {
    let client = HttpModelClient::new(config.model.clone())
        .context("Failed to create model client")?;
    Ok(Arc::new(client))
}

async fn cmd_evaluate(
    config: &EngineConfig,
    artifact: &Path,
    kind: &str,
    ruleset: Option<&str>,
    output: Option<&Path>,
    markdown: Option<&Path>,
) -> Result<()> {
    let bytes =
        std::fs::read(artifact).with_context(|| format!("Failed to read {:?}", artifact))?;
    let engine = Engine::from_config(config, model_client(config)?)?;

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let report = match engine.evaluate(&bytes, kind, ruleset, token).await {
        Ok(report) => report,
        Err(EvalError::Cancelled) => {
            eprintln!("cancelled");
            bail!("evaluation cancelled");
        }
        Err(err) => return Err(err).context("Evaluation failed"),
    };

    match output {
        Some(path) => {
            write_report_json(path, &report)?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    if let Some(path) = markdown {
        write_report_md(path, &report)?;
        info!(path = %path.display(), "markdown summary written");
    }

    eprintln!(
        "score {:.2} ({} issues across {} heuristics, {} model calls)",
        report.overall_score,
        report.issue_count(),
        report.findings.len(),
        report.stats.model_calls,
    );
    Ok(())
}

fn cmd_rulesets(config: &EngineConfig, show: Option<&str>) -> Result<()> {
    let registry = RulesetRegistry::load(&config.rulesets).context("Failed to load rulesets")?;
    match show {
        Some(id) => {
            let ruleset = registry.get(id)?;
            println!("{} ({})", ruleset.name(), ruleset.id());
            for h in ruleset.list() {
                println!(
                    "  {:<32} {} [{}]",
                    h.id,
                    h.name,
                    h.severity_scale.levels().join(", ")
                );
            }
        }
        None => {
            for ruleset in registry.list() {
                let marker = if ruleset.id() == config.evaluation.ruleset_id {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {:<24} {:>3} heuristics  {}",
                    marker,
                    ruleset.id(),
                    ruleset.len(),
                    ruleset.name()
                );
            }
        }
    }
    Ok(())
}

/// Read the document as pages, from a PDF or a separator-split text file.
fn load_pages(
    text: Option<&Path>,
    pdf: Option<&Path>,
    page_separator: &str,
) -> Result<Vec<DocumentPage>> {
    match (text, pdf) {
        (_, Some(pdf)) => {
            let bytes = std::fs::read(pdf).with_context(|| format!("Failed to read {:?}", pdf))?;
            pages_from_pdf(&bytes).with_context(|| format!("Failed to extract text from {:?}", pdf))
        }
        (Some(text), None) => {
            let content = std::fs::read_to_string(text)
                .with_context(|| format!("Failed to read {:?}", text))?;
            Ok(split_pages(&content, page_separator))
        }
        (None, None) => bail!("either --text or --pdf is required"),
    }
}

async fn cmd_extract_rules(
    config: &EngineConfig,
    text: Option<&Path>,
    pdf: Option<&Path>,
    page_separator: &str,
    output: &Path,
) -> Result<()> {
    let pages = load_pages(text, pdf, page_separator)?;
    info!(pages = pages.len(), "document loaded");

    let extractor = HeuristicExtractor::new(
        model_client(config)?,
        config.retry_policy(),
        config.timeout(),
    )
    .with_normalizer(config.normalizer());

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let rules = extractor.extract(&pages, token).await?;
    let json = serde_json::to_string_pretty(&rules).context("serialize extracted rules")?;
    std::fs::write(output, json).with_context(|| format!("write {:?}", output))?;

    println!("Extracted {} unique rules:", rules.len());
    for rule in &rules {
        println!("  - [{}] {}", rule.rule_id, rule.rule_name);
    }
    Ok(())
}

async fn cmd_collect_papers(
    keywords: &[String],
    max_results: u32,
    download_dir: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let arxiv = ArxivClient::new().context("Failed to create arXiv client")?;
    let papers = arxiv
        .search(keywords, max_results)
        .await
        .context("arXiv search failed")?;

    let json = serde_json::to_string_pretty(&papers).context("serialize paper listing")?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("write {:?}", path))?;
            info!(path = %path.display(), "paper listing written");
        }
        None => println!("{json}"),
    }

    if let Some(dir) = download_dir {
        let mut downloaded = 0;
        for paper in &papers {
            match arxiv.download_pdf(paper, dir).await {
                Ok(_) => downloaded += 1,
                Err(err) => warn!(id = paper.short_id(), error = %err, "download failed"),
            }
        }
        eprintln!(
            "downloaded {downloaded} of {} papers into {}",
            papers.len(),
            dir.display()
        );
    } else {
        eprintln!("found {} papers", papers.len());
    }
    Ok(())
}
