//! # teambot-server
//!
//! Thin CLI entry point over the `teambot` library: load configuration,
//! build the vector DB, privacy router, memory, LLM client, and Socket-Mode
//! transport, wire them into an [`teambot::orchestrator::Orchestrator`], and
//! run the transport's receive loop and the orchestrator's dispatch loop
//! concurrently until shutdown.
//!
//! Per the design notes, `main.rs` stays a dumb wire-up: every interesting
//! decision (routing, retry, reconnect, action parsing) lives in the
//! library.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use teambot::config::{load_config, BotConfig};
use teambot::embedder::LocalEmbedder;
use teambot::llm::{ChatOptions, HttpLlmTransport, LlmClient, RetryPolicy};
use teambot::lsh::LshConfig;
use teambot::memory::{ConversationMemory, DEFAULT_CAPACITY};
use teambot::orchestrator::{Orchestrator, OrchestratorConfig};
use teambot::privacy::{HttpExternalEmbedder, PrivacyRouter, PrivacyTier};
use teambot::responder::{GeneratorConfig, Style};
use teambot::transport::{ReconnectPolicy, SocketModeTransport, TungsteniteDialer};
use teambot::vectordb::VectorDb;

#[derive(Parser, Debug)]
#[command(name = "teambot-server", about = "Team chat assistant core")]
struct Cli {
    /// Path to the YAML config file. Defaults to `config.yaml` inside the
    /// platform config directory.
    #[arg(long, env = "TEAMBOT_CONFIG")]
    config: Option<String>,
}

fn default_config_path() -> Result<String, Box<dyn std::error::Error>> {
    let dir = teambot::config_dir()?;
    Ok(dir.join("config.yaml").to_string_lossy().to_string())
}

fn style_from_str(s: &str) -> Style {
    match s {
        "casual" => Style::Casual,
        "professional" => Style::Professional,
        _ => Style::Helpful,
    }
}

/// Returned when no `external_embedder_url` is configured. Only ever
/// constructed for the `high` privacy tier, which never calls it; `validate`
/// rejects `medium`/`low` configs without a real endpoint before this runs.
struct UnconfiguredExternalEmbedder;

#[async_trait::async_trait]
impl teambot::privacy::ExternalEmbedder for UnconfiguredExternalEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
        Err("no external_embedder_url configured".to_string())
    }
}

fn build_embedder(config: &BotConfig) -> PrivacyRouter {
    let tier = PrivacyTier::parse(&config.privacy_tier).unwrap_or(PrivacyTier::High);
    let local = LocalEmbedder::untrained();
    let external: Box<dyn teambot::privacy::ExternalEmbedder> = match &config.external_embedder_url {
        Some(url) => Box::new(HttpExternalEmbedder::new(url.clone(), Some(config.llm_api_key.clone()))),
        None => Box::new(UnconfiguredExternalEmbedder),
    };
    PrivacyRouter::new(tier, config.use_enterprise_zdr, local, external)
}

fn orchestrator_config(config: &BotConfig) -> OrchestratorConfig {
    OrchestratorConfig {
        channel_whitelist: config.channel_whitelist.clone(),
        bot_user_id: config.bot_user_id.clone(),
        trigger_keywords: config.trigger_keywords.iter().cloned().chain(config.mention_keywords.iter().cloned()).collect(),
        response_style: style_from_str(&config.response_style),
        response_delay: Duration::from_millis(config.response_delay_ms),
        action_confidence_threshold: config.action_confidence_threshold,
        enable_actions: config.enable_actions,
        action_confirmation_required: config.action_confirmation_required,
        auto_respond_to_mentions: config.auto_respond_to_mentions && config.ai_enabled,
        generator: GeneratorConfig {
            max_context_messages: config.max_context_messages,
            context_window_hours: config.context_window_hours,
            scoring: Default::default(),
        },
        llm_options: ChatOptions {
            model: config.llm_model.clone(),
            max_tokens: config.ai_response_max_tokens,
            temperature: config.ai_temperature,
            ..ChatOptions::default()
        },
    }
}

async fn run(config: BotConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dimension = Some(teambot::embedder::wordvec::DEFAULT_DIMENSION);
    let lsh_config = Some(LshConfig {
        num_tables: config.lsh_num_tables,
        hyperplanes_per_table: config.lsh_hyperplanes_per_table,
        ..LshConfig::default()
    });
    let db = VectorDb::open(&config.store_path, dimension, lsh_config)?;

    let privacy = build_embedder(&config);
    let memory = ConversationMemory::new(DEFAULT_CAPACITY);
    let llm_transport = HttpLlmTransport::new(
        config.llm_api_base.clone(),
        config.llm_api_key.clone(),
        Duration::from_secs(30),
    );
    let llm = LlmClient::new(Box::new(llm_transport), RetryPolicy::default());

    let transport = std::sync::Arc::new(
        SocketModeTransport::new(
            config.chat_api_base.clone(),
            config.app_token.clone(),
            config.bot_token.clone(),
            Box::new(TungsteniteDialer),
            ReconnectPolicy {
                base_delay: Duration::from_secs(config.socket_reconnect_delay_s),
                max_delay: Duration::from_secs(60),
                max_attempts: config.socket_reconnect_attempts,
                exponential: true,
            },
        )
        .with_ping_interval(Duration::from_secs(config.socket_ping_interval_s)),
    );

    let sender: Box<dyn teambot::orchestrator::ChatSender> = {
        struct ArcSender(std::sync::Arc<SocketModeTransport>);
        #[async_trait::async_trait]
        impl teambot::orchestrator::ChatSender for ArcSender {
            async fn send_message(&self, channel: &str, text: &str) -> Result<(), String> {
                self.0
                    .post_message(channel, text)
                    .await
                    .map_err(|e| e.to_string())
            }
        }
        Box::new(ArcSender(transport.clone()))
    };

    let orchestrator = std::sync::Arc::new(Orchestrator::new(
        db,
        privacy,
        memory,
        llm,
        sender,
        orchestrator_config(&config),
    ));

    let (events_tx, events_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let transport_task = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.run(events_tx, shutdown_rx).await })
    };
    let orchestrator_task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(events_rx).await })
    };

    tokio::select! {
        result = transport_task => {
            if let Ok(Err(e)) = result {
                error!(error = %e, "transport loop exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = orchestrator_task.await;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(p) => p,
        None => match default_config_path() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "could not determine default config path");
                return ExitCode::FAILURE;
            }
        },
    };

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %config_path, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}
