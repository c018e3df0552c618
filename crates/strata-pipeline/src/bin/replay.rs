//! Strata Replay
//!
//! Run the ranking pipeline over recorded per-source results and print the
//! pipeline output as JSON.
//!
//! Usage:
//!   strata-replay fixtures/query.json
//!   strata-replay fixtures/query.json --profile profiles/news.yaml
//!   strata-replay fixtures/query.json --budget-ms 800 --compact
//!
//! Fixture format:
//! ```json
//! {
//!   "query": "tokio runtime",
//!   "budget_ms": 2500,
//!   "overrides": { "rerank": false },
//!   "signals": { "contradiction": 0.1 },
//!   "sources": {
//!     "web": { "delay_ms": 120, "candidates": [ { "id": "a", "source_name": "web", "raw_score": 3.1, "source_rank": 1 } ] },
//!     "kg": { "error": "graph store offline" }
//!   }
//! }
//! ```

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strata_pipeline::mock::{FailingSource, StaticSource};
use strata_pipeline::{
    init_tracing, Candidate, GateSignals, Pipeline, PipelineConfig, PipelineRequest, PlanRegistry,
    RequestOverrides, RetrievalPlan, SourceClient,
};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Args {
    fixture: PathBuf,
    profile: Option<PathBuf>,
    budget_ms: Option<u64>,
    compact: bool,
}

fn print_usage() {
    eprintln!("Usage: strata-replay <fixture.json> [--profile plan.yaml] [--budget-ms N] [--compact]");
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args::default();
    let mut fixture = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--profile" | "-p" => {
                i += 1;
                let path = args.get(i).context("--profile needs a path")?;
                result.profile = Some(PathBuf::from(path));
            }
            "--budget-ms" | "-b" => {
                i += 1;
                let raw = args.get(i).context("--budget-ms needs a value")?;
                result.budget_ms = Some(
                    raw.parse()
                        .with_context(|| format!("invalid --budget-ms '{}'", raw))?,
                );
            }
            "--compact" => result.compact = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option '{}'", other),
            other => fixture = Some(PathBuf::from(other)),
        }
        i += 1;
    }

    match fixture {
        Some(path) => {
            result.fixture = path;
            Ok(result)
        }
        None => {
            print_usage();
            bail!("missing fixture path")
        }
    }
}

/// One recorded source.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecordedSource {
    delay_ms: u64,
    candidates: Vec<Candidate>,
    /// Replay this source as a backend failure.
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    query: String,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    budget_ms: Option<u64>,
    #[serde(default)]
    overrides: RequestOverrides,
    #[serde(default)]
    signals: GateSignals,
    #[serde(default)]
    sources: BTreeMap<String, RecordedSource>,
}

fn load_profile(path: &Path) -> anyhow::Result<RetrievalPlan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading profile {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let plan = if is_json {
        RetrievalPlan::from_json_str(&text)
    } else {
        RetrievalPlan::from_yaml_str(&text)
    };
    plan.with_context(|| format!("parsing profile {}", path.display()))
}

fn source_client(name: &str, recorded: RecordedSource) -> Arc<dyn SourceClient> {
    match recorded.error {
        Some(message) => Arc::new(FailingSource::new(name, message)),
        None => Arc::new(
            StaticSource::new(name, recorded.candidates)
                .with_delay(Duration::from_millis(recorded.delay_ms)),
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    if let Err(e) = init_tracing() {
        eprintln!("{}", e);
    }

    let args = parse_args()?;
    let config = PipelineConfig::from_env();

    let text = std::fs::read_to_string(&args.fixture)
        .with_context(|| format!("reading fixture {}", args.fixture.display()))?;
    let fixture: Fixture = serde_json::from_str(&text)
        .with_context(|| format!("parsing fixture {}", args.fixture.display()))?;

    let plans = PlanRegistry::default();
    let mut profile = fixture.profile.clone();
    if let Some(ref path) = args.profile {
        let plan = load_profile(path)?;
        info!(profile = %plan.name, path = %path.display(), "Loaded profile");
        profile = Some(plan.name.clone());
        plans.insert(plan)?;
    }

    let mut pipeline = Pipeline::new(config, plans);
    for (name, recorded) in fixture.sources {
        pipeline = pipeline.with_source(source_client(&name, recorded));
    }

    let request = PipelineRequest {
        query: fixture.query,
        profile,
        budget_ms: args.budget_ms.or(fixture.budget_ms),
        overrides: fixture.overrides,
        signals: fixture.signals,
    };

    let output = match pipeline.run(&request).await {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, error_kind = %e.kind(), "Replay failed");
            return Err(e.into());
        }
    };

    let json = if args.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{}", json);
    Ok(())
}
