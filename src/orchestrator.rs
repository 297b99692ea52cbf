//! # Orchestrator (C13)
//!
//! Wires the vector DB facade ([`crate::vectordb`]), the privacy router
//! ([`crate::privacy`]), conversation memory ([`crate::memory`]), the
//! response generator ([`crate::responder`]), and the chat transport
//! ([`crate::transport`]) together and drives the two inbound event flows:
//! plain message ingest and mention-triggered replies.
//!
//! Per the design notes on cyclic component wiring, the orchestrator never
//! holds a reference back into the transport's internals — it holds an
//! injected [`ChatSender`] (a trait object, real implementation backed by
//! [`crate::transport::SocketModeTransport`]) so replies and confirmation
//! follow-ups go out without the transport needing to know about the
//! orchestrator at all.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::kvcodec::{MetaRecord, MetaValue};
use crate::memory::ConversationMemory;
use crate::privacy::PrivacyRouter;
use crate::responder::{Action, GeneratorConfig, RequestContext, ResponseGenerator, Style};
use crate::stats::OrchestratorCounters;
use crate::store::Record;
use crate::transport::InboundEvent;
use crate::vectordb::{SearchQuery, VectorDb};

/// The outbound half of the transport, seen only as a capability rather than
/// a concrete type — keeps the orchestrator decoupled from
/// `SocketModeTransport`'s reconnect/ping internals.
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_message(&self, channel: &str, text: &str) -> Result<(), String>;
}

#[async_trait]
impl ChatSender for crate::transport::SocketModeTransport {
    async fn send_message(&self, channel: &str, text: &str) -> Result<(), String> {
        self.post_message(channel, text)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Dispatched for a parsed [`Action`] whose confidence clears the configured
/// threshold. Returning `false` tells the orchestrator the handler declined
/// to act (e.g. missing integration); it's logged but never retried.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: &Action, ctx: &RequestContext) -> bool;
}

pub struct OrchestratorConfig {
    /// Empty means "every channel" — never interpret empty as "none".
    pub channel_whitelist: Vec<String>,
    pub bot_user_id: String,
    pub trigger_keywords: Vec<String>,
    pub response_style: Style,
    pub response_delay: Duration,
    pub action_confidence_threshold: f32,
    pub enable_actions: bool,
    pub action_confirmation_required: bool,
    pub auto_respond_to_mentions: bool,
    pub generator: GeneratorConfig,
    pub llm_options: crate::llm::ChatOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel_whitelist: Vec::new(),
            bot_user_id: String::new(),
            trigger_keywords: Vec::new(),
            response_style: Style::Helpful,
            response_delay: Duration::from_millis(1000),
            action_confidence_threshold: 0.7,
            enable_actions: true,
            action_confirmation_required: true,
            auto_respond_to_mentions: true,
            generator: GeneratorConfig::default(),
            llm_options: crate::llm::ChatOptions::default(),
        }
    }
}

pub struct Orchestrator {
    db: VectorDb,
    privacy: PrivacyRouter,
    memory: ConversationMemory,
    llm: crate::llm::LlmClient,
    sender: Box<dyn ChatSender>,
    handlers: HashMap<String, Box<dyn ActionHandler>>,
    stats: OrchestratorCounters,
    config: OrchestratorConfig,
}

/// True if `channel` is covered by the whitelist. An empty whitelist means
/// every channel is covered.
fn channel_allowed(whitelist: &[String], channel: &str) -> bool {
    whitelist.is_empty() || whitelist.iter().any(|c| c == channel)
}

/// Strip the bot's own mention token (`<@U123>` style, with an optional
/// trailing colon) and any configured trigger keyword from the front of
/// `text`, then trim whitespace.
fn strip_mention(text: &str, bot_user_id: &str, trigger_keywords: &[String]) -> String {
    let mut rest = text.trim();
    let mention_token = format!("<@{bot_user_id}>");
    if let Some(stripped) = rest.strip_prefix(&mention_token) {
        rest = stripped.trim_start().trim_start_matches(':').trim_start();
    }
    for kw in trigger_keywords {
        let lower = rest.to_lowercase();
        if lower.starts_with(&kw.to_lowercase()) {
            rest = rest[kw.len()..].trim_start_matches(':').trim_start();
        }
    }
    rest.trim().to_string()
}

fn record_timestamp(rec: &Record) -> f64 {
    match rec.metadata.get("timestamp") {
        Some(MetaValue::Num(n)) => *n,
        _ => 0.0,
    }
}

impl Orchestrator {
    pub fn new(
        db: VectorDb,
        privacy: PrivacyRouter,
        memory: ConversationMemory,
        llm: crate::llm::LlmClient,
        sender: Box<dyn ChatSender>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            db,
            privacy,
            memory,
            llm,
            sender,
            handlers: HashMap::new(),
            stats: OrchestratorCounters::new(),
            config,
        }
    }

    pub fn register_handler(&mut self, action_type: impl Into<String>, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(action_type.into(), handler);
    }

    pub fn stats(&self) -> &OrchestratorCounters {
        &self.stats
    }

    pub fn vector_db(&self) -> &VectorDb {
        &self.db
    }

    pub fn privacy_router(&self) -> &PrivacyRouter {
        &self.privacy
    }

    pub fn llm_client(&self) -> &crate::llm::LlmClient {
        &self.llm
    }

    /// A full point-in-time snapshot of every counter this orchestrator owns
    /// or aggregates, for the (out-of-scope) stats/health surface.
    pub fn stats_snapshot(&self) -> crate::stats::StatsSnapshot {
        crate::stats::snapshot(
            &self.stats,
            self.llm.counters(),
            self.privacy.counters(),
            self.privacy.compliance_score(),
        )
    }

    /// Drain `events` until the channel closes (transport shutdown),
    /// dispatching each to the appropriate handler. Downstream failures never
    /// stop the loop — they're logged and counted.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                InboundEvent::Message {
                    channel,
                    user_id,
                    text,
                    timestamp,
                    thread_id,
                } => {
                    self.handle_message(&channel, &user_id, &text, timestamp, thread_id.as_deref())
                        .await;
                }
                InboundEvent::AppMention {
                    channel,
                    user_id,
                    text,
                    timestamp,
                    thread_id,
                } => {
                    if self.config.auto_respond_to_mentions {
                        self.handle_mention(&channel, &user_id, &text, timestamp, thread_id.as_deref())
                            .await;
                    }
                }
                InboundEvent::Hello | InboundEvent::Other => {}
            }
        }
    }

    /// C13's `message` flow: non-bot, non-subtype events only reach here (the
    /// transport never forwards `bot_id`/`subtype` frames — see §6 of the
    /// design), so the only remaining gate is the channel whitelist.
    pub async fn handle_message(
        &self,
        channel: &str,
        user_id: &str,
        text: &str,
        timestamp: f64,
        thread_id: Option<&str>,
    ) {
        if !channel_allowed(&self.config.channel_whitelist, channel) {
            debug!(channel, "message dropped: channel not in whitelist");
            return;
        }

        let (vector, method) = self.privacy.embed(text).await;
        let mut meta = MetaRecord::new();
        meta.insert("text".into(), MetaValue::Str(text.to_string()));
        meta.insert("user_id".into(), MetaValue::Str(user_id.to_string()));
        meta.insert("channel".into(), MetaValue::Str(channel.to_string()));
        meta.insert("timestamp".into(), MetaValue::Num(timestamp));
        if let Some(tid) = thread_id {
            meta.insert("thread_id".into(), MetaValue::Str(tid.to_string()));
        }
        meta.insert(
            "embedding_method".into(),
            MetaValue::Str(method.as_str().to_string()),
        );
        meta.insert(
            "privacy_level".into(),
            MetaValue::Str(self.privacy.tier().as_str().to_string()),
        );

        let id = format!("chat_{timestamp}_{channel}");
        if let Err(e) = self.db.insert(&id, &vector, &meta) {
            warn!(error = %e, id, "store insert failed");
            return;
        }

        use std::sync::atomic::Ordering;
        self.stats.messages_ingested.fetch_add(1, Ordering::Relaxed);

        self.memory.record(
            channel,
            Record {
                id,
                vector,
                metadata: meta,
            },
        );
    }

    /// C13's `app_mention` flow.
    pub async fn handle_mention(
        &self,
        channel: &str,
        user_id: &str,
        text: &str,
        timestamp: f64,
        thread_id: Option<&str>,
    ) {
        use std::sync::atomic::Ordering;
        self.stats.mentions_received.fetch_add(1, Ordering::Relaxed);

        let query = strip_mention(text, &self.config.bot_user_id, &self.config.trigger_keywords);
        if query.is_empty() {
            self.stats
                .mentions_dropped_empty_query
                .fetch_add(1, Ordering::Relaxed);
            debug!(channel, "mention dropped: empty residual query");
            return;
        }

        let (query_vector, _method) = self.privacy.embed(&query).await;

        let window_secs = self.config.generator.context_window_hours * 3600.0;
        let mut filters: HashMap<String, MetaValue> = HashMap::new();
        filters.insert("channel".into(), MetaValue::Str(channel.to_string()));
        filters.insert(
            "timestamp_after".into(),
            MetaValue::Num(timestamp - window_secs),
        );

        let searched = self
            .db
            .search(&SearchQuery {
                vector: query_vector,
                limit: self.config.generator.max_context_messages,
                threshold: 0.0,
                filters,
            })
            .unwrap_or_default();

        let mut merged: HashMap<String, Record> = HashMap::new();
        for sr in searched {
            merged.insert(
                sr.id.clone(),
                Record {
                    id: sr.id,
                    vector: Vec::new(),
                    metadata: sr.metadata,
                },
            );
        }
        for rec in self.memory.recent(channel) {
            merged.entry(rec.id.clone()).or_insert(rec);
        }
        let mut context: Vec<Record> = merged.into_values().collect();
        context.sort_by(|a, b| record_timestamp(b).partial_cmp(&record_timestamp(a)).unwrap());
        context.truncate(self.config.generator.max_context_messages);

        let generator = ResponseGenerator::new(&self.llm, clone_generator_config(&self.config.generator));
        let ctx = RequestContext {
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            thread_id: thread_id.map(|s| s.to_string()),
            style: self.config.response_style,
        };

        let options = self.config.llm_options.clone();
        let now = Utc::now();
        let result = generator
            .generate(&query, &context, &ctx, timestamp, now, options)
            .await;

        let generated = match result {
            Ok(g) => g,
            Err(e) => {
                self.stats.ai_responses_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, channel, "llm call failed; staying silent on this mention");
                return;
            }
        };

        if !self.config.response_delay.is_zero() {
            tokio::time::sleep(self.config.response_delay).await;
        }

        if let Err(e) = self.sender.send_message(channel, &generated.reply).await {
            warn!(error = %e, channel, "send error");
            return;
        }
        self.stats.ai_responses_generated.fetch_add(1, Ordering::Relaxed);

        if !self.config.enable_actions {
            return;
        }

        for action in &generated.actions {
            if action.confidence <= self.config.action_confidence_threshold {
                continue;
            }
            if let Some(handler) = self.handlers.get(action.action_type.as_str()) {
                let handled = handler.handle(action, &ctx).await;
                if handled {
                    self.stats.actions_dispatched.fetch_add(1, Ordering::Relaxed);
                    if self.config.action_confirmation_required {
                        let confirmation = format!(
                            "Confirming action: {} ({})",
                            action.action_type, action.keyword
                        );
                        if self.sender.send_message(channel, &confirmation).await.is_ok() {
                            self.stats.confirmations_sent.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        }
    }
}

fn clone_generator_config(cfg: &GeneratorConfig) -> GeneratorConfig {
    GeneratorConfig {
        max_context_messages: cfg.max_context_messages,
        context_window_hours: cfg.context_window_hours,
        scoring: cfg.scoring.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::LocalEmbedder;
    use crate::kvcodec::MetaValue;
    use crate::llm::{ChatResult, LlmClient, LlmTransport, LlmTransportError, RetryPolicy, Usage};
    use crate::privacy::{ExternalEmbedder, PrivacyTier};
    use std::sync::Mutex;

    struct StubLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmTransport for StubLlm {
        async fn send(
            &self,
            _messages: &[crate::llm::ChatMessage],
            _options: &crate::llm::ChatOptions,
        ) -> Result<ChatResult, LlmTransportError> {
            Ok(ChatResult {
                content: self.reply.clone(),
                model: "anthropic/claude-3.5-sonnet".to_string(),
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            })
        }
    }

    struct NeverCalledExternal;
    #[async_trait]
    impl ExternalEmbedder for NeverCalledExternal {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
            panic!("external embedder must not be called at high privacy tier");
        }
    }

    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }
    #[async_trait]
    impl ChatSender for RecordingSender {
        async fn send_message(&self, channel: &str, text: &str) -> Result<(), String> {
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn make_orchestrator(reply: &str) -> (Orchestrator, std::sync::Arc<Mutex<Vec<(String, String)>>>) {
        let db = VectorDb::open_temp(None, None).unwrap();
        let privacy = PrivacyRouter::new(
            PrivacyTier::High,
            false,
            LocalEmbedder::untrained(),
            Box::new(NeverCalledExternal),
        );
        let memory = ConversationMemory::new(20);
        let llm = LlmClient::new(
            Box::new(StubLlm {
                reply: reply.to_string(),
            }),
            RetryPolicy::default(),
        );
        let sent = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sender = RecordingSender { sent: sent.clone() };
        let mut config = OrchestratorConfig::default();
        config.bot_user_id = "BOT1".to_string();
        config.response_delay = Duration::from_millis(0);
        (
            Orchestrator::new(db, privacy, memory, llm, Box::new(sender), config),
            sent,
        )
    }

    #[tokio::test]
    async fn ingest_stores_record_and_updates_memory() {
        let (orch, _sent) = make_orchestrator("");
        orch.handle_message("C1", "U1", "hello team", 100.0, None).await;
        assert_eq!(orch.vector_db().stats().unwrap().count, 1);
        assert_eq!(orch.memory.recent("C1").len(), 1);
        use std::sync::atomic::Ordering;
        assert_eq!(orch.stats.messages_ingested.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn channel_whitelist_drops_non_whitelisted_channel() {
        let (mut orch, _sent) = make_orchestrator("");
        orch.config.channel_whitelist = vec!["C1".to_string()];
        orch.handle_message("C2", "U1", "hello", 100.0, None).await;
        assert_eq!(orch.vector_db().stats().unwrap().count, 0);
    }

    #[tokio::test]
    async fn empty_whitelist_allows_every_channel() {
        let (orch, _sent) = make_orchestrator("");
        orch.handle_message("anything", "U1", "hello", 100.0, None).await;
        assert_eq!(orch.vector_db().stats().unwrap().count, 1);
    }

    #[tokio::test]
    async fn mention_with_empty_residual_query_is_dropped() {
        let (orch, sent) = make_orchestrator("should not be sent");
        orch.handle_mention("C1", "U1", "<@BOT1>", 100.0, None).await;
        assert!(sent.lock().unwrap().is_empty());
        use std::sync::atomic::Ordering;
        assert_eq!(orch.stats.mentions_dropped_empty_query.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn mention_sends_reply_and_dispatches_high_confidence_action() {
        let (mut orch, sent) = make_orchestrator("I can help: let me create a ticket");
        orch.handle_message("C1", "U1", "deploy tomorrow", 100.0, None).await;

        struct AlwaysHandles;
        #[async_trait]
        impl ActionHandler for AlwaysHandles {
            async fn handle(&self, _action: &Action, _ctx: &RequestContext) -> bool {
                true
            }
        }
        orch.register_handler("create", Box::new(AlwaysHandles));

        orch.handle_mention("C1", "U2", "<@BOT1> status?", 400.0, None).await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2); // reply + confirmation
        assert_eq!(sent[0].0, "C1");
        use std::sync::atomic::Ordering;
        assert_eq!(orch.stats.ai_responses_generated.load(Ordering::Relaxed), 1);
        assert_eq!(orch.stats.actions_dispatched.load(Ordering::Relaxed), 1);
        assert_eq!(orch.stats.confirmations_sent.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn strip_mention_removes_bot_token_and_trigger_keyword() {
        let stripped = strip_mention("<@BOT1> help status?", "BOT1", &["help".to_string()]);
        assert_eq!(stripped, "status?");
    }
}
