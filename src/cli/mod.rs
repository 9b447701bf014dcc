//! Command-line interface for aedis.
//!
//! Provides commands for extracting entities from a document, running the
//! full extract -> plan -> judge -> persist pipeline, reading provenance
//! back out of the store, and inspecting resolved configuration.
//!
//! Every command prints a JSON envelope (`{"success", "data", "error"}`) to
//! stdout so callers never have to parse free-form text.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::{CueBackend, Extractor, HttpLlmBackend, LlmBackend, LlmExtractor, NerExtractor};
use crate::config::Config;
use crate::core::{HybridExtractor, Judge, MergeEngine, Planner};
use crate::domain::{Envelope, JudgeRun, PlannerRun, Verdict};
use crate::evidence::CanonicalArtifact;
use crate::store::{GovernedTarget, PersistenceBlockedError, Store, StoreError};

/// aedis - hybrid extraction with a provenance-gated judge pipeline
#[derive(Parser, Debug)]
#[command(name = "aedis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract entities from a document (no persistence)
    Extract {
        /// Document id to record in the result
        #[arg(short, long, default_value = "stdin")]
        document_id: String,

        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Run the full pipeline: ingest, extract, plan, judge, persist
    Run {
        /// Document id (defaults to the input file stem, or "stdin")
        #[arg(short, long)]
        document_id: Option<String>,

        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Read back the provenance record for a stored artifact
    Provenance {
        /// Target type (e.g. "claim", "knowledge_record")
        target_type: String,

        /// Target id
        target_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load()?;

        match self.command {
            Commands::Extract { document_id, input } => {
                extract_document(&config, &document_id, input).await
            }
            Commands::Run { document_id, input } => {
                run_pipeline(&config, document_id, input).await
            }
            Commands::Provenance {
                target_type,
                target_id,
            } => show_provenance(&config, &target_type, &target_id),
            Commands::Config => show_config(&config),
        }
    }
}

/// Build the extraction engine from configuration. The LLM side uses the
/// configured HTTP endpoint when present and the deterministic local
/// backend otherwise, so the pipeline works offline.
fn build_extractor(config: &Config) -> HybridExtractor {
    let backend: Arc<dyn LlmBackend> = match &config.llm.endpoint {
        Some(endpoint) => Arc::new(HttpLlmBackend::new(
            endpoint.clone(),
            config.llm.model.clone(),
            config.llm_api_key(),
        )),
        None => Arc::new(CueBackend),
    };

    let ner: Arc<dyn Extractor> = Arc::new(NerExtractor::new(config.max_input_bytes));
    let llm: Arc<dyn Extractor> = Arc::new(
        LlmExtractor::new(backend, config.llm.retry.clone(), config.llm.call_timeout())
            .with_max_input_bytes(config.max_input_bytes),
    );

    HybridExtractor::new(ner, llm, MergeEngine::new(config.merge.clone()))
}

fn read_input(input: Option<&PathBuf>) -> Result<String> {
    let text = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    if text.trim().is_empty() {
        anyhow::bail!("Input is empty");
    }
    Ok(text)
}

fn print_envelope<T: Serialize>(envelope: &Envelope<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}

async fn extract_document(
    config: &Config,
    document_id: &str,
    input: Option<PathBuf>,
) -> Result<()> {
    let text = read_input(input.as_ref())?;
    let extractor = build_extractor(config);

    match extractor.extract(document_id, &text).await {
        Ok(result) => print_envelope(&Envelope::ok(result)),
        Err(err) => {
            print_envelope(&Envelope::<()>::err(err.to_string()))?;
            std::process::exit(1);
        }
    }
}

/// Summary printed by `aedis run`.
#[derive(Debug, Serialize)]
struct RunSummary {
    document_id: String,
    artifact_sha256: String,
    entities: usize,
    raw_entities: usize,
    relationships: usize,
    planner_run_id: Uuid,
    judge_run_id: Uuid,
    verdict: Verdict,
    rows_written: u64,
}

async fn run_pipeline(
    config: &Config,
    document_id: Option<String>,
    input: Option<PathBuf>,
) -> Result<()> {
    let document_id = document_id.unwrap_or_else(|| {
        input
            .as_deref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stdin".to_string())
    });
    let text = read_input(input.as_ref())?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut store = Store::open(&config.db_path)?;

    // Ingest the canonical version first so extraction, planning, and the
    // gate all see the same hashed text.
    let artifact = CanonicalArtifact::from_text(document_id.clone(), text);
    store.put_canonical_artifact(&artifact)?;

    let extractor = build_extractor(config);
    let result = match extractor.extract(&document_id, &artifact.text).await {
        Ok(result) => result,
        Err(err) => {
            print_envelope(&Envelope::<()>::err(err.to_string()))?;
            std::process::exit(1);
        }
    };

    let mut planner_run = Planner::compose(&artifact, &result)?;
    let judge_run = Judge::new(config.judge.clone()).evaluate(&mut planner_run, &store);

    match persist(&mut store, &planner_run, &judge_run) {
        Ok(rows_written) => print_envelope(&Envelope::ok(RunSummary {
            document_id,
            artifact_sha256: artifact.sha256,
            entities: result.entities.len(),
            raw_entities: result.raw_entities.len(),
            relationships: result.relationships.len(),
            planner_run_id: planner_run.id,
            judge_run_id: judge_run.id,
            verdict: judge_run.verdict,
            rows_written,
        })),
        Err(StoreError::Blocked(blocked)) => {
            print_envelope(&Envelope::<()>::err(render_blocked(&blocked)))?;
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

/// Persist a judged run: each claim becomes a knowledge record, and the
/// strategy payload itself becomes an analysis version.
fn persist(store: &mut Store, planner: &PlannerRun, judge: &JudgeRun) -> Result<u64, StoreError> {
    let strategy = planner.strategy.clone();
    let commit = store.persist_if_passed(planner, Some(judge), move |tx| {
        let mut last_claim_provenance = None;
        for claim in &strategy.claims {
            tx.write_artifact(
                GovernedTarget::KnowledgeRecord,
                &serde_json::to_value(claim).map_err(anyhow::Error::from)?,
                &claim.provenance,
            )?;
            last_claim_provenance = Some(claim.provenance.clone());
        }

        if let Some(provenance) = last_claim_provenance {
            tx.write_analysis_version(
                &serde_json::to_value(&strategy).map_err(anyhow::Error::from)?,
                None,
                &provenance,
            )?;
        }
        Ok(())
    })?;
    Ok(commit.rows_written)
}

fn render_blocked(blocked: &PersistenceBlockedError) -> String {
    let mut message = format!("persistence blocked: {}", blocked.detail);
    if let Some(remediation) = &blocked.remediation {
        for failure in &remediation.failed_dimensions {
            message.push_str(&format!(
                "; {} scored {:.2} (threshold {:.2}): {}",
                failure.dimension, failure.score, failure.threshold, failure.detail
            ));
        }
    }
    message
}

fn show_provenance(config: &Config, target_type: &str, target_id: &str) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    match store.get_provenance(target_type, target_id)? {
        Some(record) => print_envelope(&Envelope::ok(record)),
        None => {
            print_envelope(&Envelope::<()>::err(format!(
                "no provenance recorded for {} '{}'",
                target_type, target_id
            )))?;
            std::process::exit(1);
        }
    }
}

fn show_config(config: &Config) -> Result<()> {
    #[derive(Debug, Serialize)]
    struct ConfigView {
        home: PathBuf,
        db_path: PathBuf,
        config_file: Option<PathBuf>,
        merge: crate::core::MergeConfig,
        judge: crate::core::JudgeConfig,
        llm_endpoint: Option<String>,
        llm_model: String,
        max_input_bytes: usize,
    }

    print_envelope(&Envelope::ok(ConfigView {
        home: config.home.clone(),
        db_path: config.db_path.clone(),
        config_file: config.config_file.clone(),
        merge: config.merge.clone(),
        judge: config.judge.clone(),
        llm_endpoint: config.llm.endpoint.clone(),
        llm_model: config.llm.model.clone(),
        max_input_bytes: config.max_input_bytes,
    }))
}
