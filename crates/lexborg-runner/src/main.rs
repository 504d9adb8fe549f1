mod questions;

use std::{
    io::{self, Write},
    sync::Arc,
};

use lexborg_agent::OpenRouterBackend;
use lexborg_core::{config::Config, pipeline::Pipeline, RunRecord};
use lexborg_domains::LexmlClient;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "lexborg_core=info,lexborg_agent=info,lexborg_domains=info,lexborg_runner=info";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_records(records: &[RunRecord]) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

// ── main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    let questions = questions::load_questions(&config.questions_file)?;

    let chat = Arc::new(OpenRouterBackend::from_config(&config)?);
    let source = Arc::new(LexmlClient::from_config(&config)?);

    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(chat, source, config.pipeline_settings(), config.system_prompts())
        .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing with partial results");
            cancel.cancel();
        }
    });

    info!(
        questions = questions.len(),
        models = ?pipeline.settings().models,
        mode = ?config.context_mode,
        budget = config.context_budget_chars,
        "starting batch"
    );

    let records = pipeline.run_batch(&questions).await;
    let with_issues = records.iter().filter(|r| !r.log.issues.is_empty()).count();
    info!(records = records.len(), with_issues, "batch finished");

    print_records(&records)
}
