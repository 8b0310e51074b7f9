use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use mail_autoreply::activity::ActivityLog;
use mail_autoreply::config::{AutoReplyConfig, WorkerConfig};
use mail_autoreply::llm::{LlmConfig, create_provider};
use mail_autoreply::mailbox::{GmailConfig, GmailMailbox, MessageStore};
use mail_autoreply::pipeline::{LlmClassifier, LlmReplyGenerator};
use mail_autoreply::state::{WorkerState, spawn_reaper};
use mail_autoreply::store::{ConfigStore, LibSqlStore};
use mail_autoreply::worker::{AutoReplySwitch, Orchestrator, OrchestratorDeps, spawn_poll_loop};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let worker_config = WorkerConfig::from_env();
    let llm_config = LlmConfig::from_env()?;

    eprintln!("📬 Mail auto-reply v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Poll interval: {}s", worker_config.poll_interval.as_secs());
    eprintln!(
        "   Auto-reply: {}",
        if worker_config.enabled { "on" } else { "off" }
    );

    // ── Mailbox ──────────────────────────────────────────────────────────
    let gmail_config = GmailConfig::from_env().context("GMAIL_ACCESS_TOKEN not set")?;
    let mailbox: Arc<dyn MessageStore> = Arc::new(GmailMailbox::new(gmail_config)?);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::env::var("AUTO_REPLY_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/auto-reply.db"));
    let store = Arc::new(
        LibSqlStore::new_local(&db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );

    let user_email = match &worker_config.user_email {
        Some(email) => email.to_lowercase(),
        None => mailbox
            .account_address()
            .await
            .context("Failed to resolve mailbox account")?
            .to_lowercase(),
    };

    if store.get(&user_email).await?.is_none() {
        let seeded = AutoReplyConfig {
            enabled: worker_config.enabled,
            ..AutoReplyConfig::default()
        };
        store.put(&user_email, &seeded).await?;
        tracing::info!(user = %user_email, enabled = seeded.enabled, "Seeded default auto-reply config");
    }

    // ── LLM ──────────────────────────────────────────────────────────────
    let llm = create_provider(&llm_config)?;
    let business_context = std::env::var("AUTO_REPLY_BUSINESS_CONTEXT").ok();

    let mut classifier = LlmClassifier::new(Arc::clone(&llm));
    let mut generator = LlmReplyGenerator::new(llm);
    if let Some(context) = &business_context {
        classifier = classifier.with_business_context(context.clone());
        generator = generator.with_business_context(context.clone());
    }
    if let Ok(signature) = std::env::var("AUTO_REPLY_SIGNATURE") {
        generator = generator.with_signature(signature);
    }

    // ── Worker ───────────────────────────────────────────────────────────
    let state = WorkerState::new(&worker_config);
    let switch = AutoReplySwitch::new(worker_config.enabled);
    let deps = OrchestratorDeps {
        mailbox,
        classifier: Arc::new(classifier),
        generator: Arc::new(generator),
        configs: store.clone(),
        records: store,
        activity: Arc::new(ActivityLog::new()),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        &WorkerConfig {
            user_email: Some(user_email),
            ..worker_config.clone()
        },
        deps,
        state.clone(),
        switch,
    ));

    let (reaper_handle, reaper_shutdown) =
        spawn_reaper(state.evictors(), worker_config.reaper_interval);
    let (poll_handle, poll_shutdown) =
        spawn_poll_loop(Arc::clone(&orchestrator), worker_config.poll_interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    eprintln!("\nShutting down...");

    // An in-flight cycle finishes its batch before the loop exits.
    let _ = poll_shutdown.send(true);
    let _ = reaper_shutdown.send(true);
    if let Err(e) = poll_handle.await {
        tracing::error!(error = %e, "Poll loop ended abnormally");
    }
    if let Err(e) = reaper_handle.await {
        tracing::error!(error = %e, "TTL reaper ended abnormally");
    }

    Ok(())
}
