//! The `adapt` subcommand: run an offline or online adaptation loop.

use anyhow::{anyhow, Context};
use clap::ArgMatches;
use std::path::PathBuf;
use std::sync::Arc;

use ace_runtime::adaptation::{load_samples, Adapter, OfflineOptions};
use ace_runtime::config::AceConfig;
use ace_runtime::embedding::create_embedding_service_from_env;
use ace_runtime::llm::HttpChatClient;
use ace_runtime::playbook::PlaybookStore;

/// Embedding dimension for the hermetic fallback embedder.
const FALLBACK_EMBEDDING_DIMENSION: usize = 256;

pub async fn execute(matches: &ArgMatches) -> anyhow::Result<()> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => AceConfig::from_file(path).context("loading configuration")?,
        None => AceConfig::from_env().context("building configuration")?,
    };

    if let Some(epochs) = matches.get_one::<u32>("epochs") {
        config.adaptation.max_epochs = *epochs;
    }
    if let Some(batch_size) = matches.get_one::<usize>("batch-size") {
        config.adaptation.batch_size = *batch_size;
    }
    if let Some(rounds) = matches.get_one::<u32>("max-refinement-rounds") {
        config.reflector.max_refinement_rounds = *rounds;
    }
    if let Some(threshold) = matches.get_one::<f32>("dedup-threshold") {
        config.refine.dedup_threshold = *threshold;
    }
    if let Some(budget) = matches.get_one::<usize>("token-budget") {
        config.refine.token_budget = Some(*budget);
    }
    config.validate().context("validating configuration")?;

    let client = HttpChatClient::from_env(config.llm.timeout_seconds).ok_or_else(|| {
        anyhow!(
            "no LLM provider configured; set OPENROUTER_API_KEY, OPENAI_API_KEY, \
             or ANTHROPIC_API_KEY"
        )
    })?;
    let embedder = create_embedding_service_from_env(FALLBACK_EMBEDDING_DIMENSION)
        .map_err(|e| anyhow!("embedding service: {e}"))?;

    let mut adapter = Adapter::new(config.clone(), Arc::new(client), embedder);
    if let Some(path) = matches.get_one::<String>("playbook-in") {
        let store = PlaybookStore::load(path, config.sections.clone())
            .with_context(|| format!("loading playbook from {path}"))?;
        tracing::info!(path = %path, bullets = store.len(), "starting from existing playbook");
        adapter = adapter.with_store(store);
    }

    // SIGINT cancels cooperatively at the next sample boundary.
    let cancel = adapter.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling at next sample boundary");
            cancel.cancel();
        }
    });

    let dataset = matches
        .get_one::<String>("dataset")
        .expect("dataset is required");
    let samples = load_samples(dataset)?;

    let playbook_out: PathBuf = matches
        .get_one::<String>("playbook-out")
        .expect("playbook-out is required")
        .into();

    let mode = matches.get_one::<String>("mode").expect("mode is required");
    let summary = match mode.as_str() {
        "offline" => {
            adapter
                .run_offline(
                    &samples,
                    None,
                    OfflineOptions {
                        checkpoint_path: Some(playbook_out.clone()),
                        validation: None,
                    },
                )
                .await?
        }
        _ => {
            let (predictions, summary) = adapter.run_online(&samples, None).await?;
            for prediction in &predictions {
                println!("{}", serde_json::to_string(prediction)?);
            }
            summary
        }
    };

    adapter.store().save(&playbook_out)?;

    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.cancelled {
        return Err(anyhow!("adaptation cancelled; last checkpoint is authoritative"));
    }
    Ok(())
}
