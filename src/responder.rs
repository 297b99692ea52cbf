//! # Response generator (C11)
//!
//! Builds the LLM prompt from a user query, retrieved context records, and
//! caller metadata; calls the LLM client; and parses the reply for
//! executable "actions" the orchestrator can dispatch.
//!
//! Action-confidence thresholds and bonuses are tunables
//! ([`ActionScoringConfig`]) rather than hard-coded, per the design notes —
//! the heuristic is testable but not fixed.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmTransportError, Role, Usage};
use crate::store::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Helpful,
    Casual,
    Professional,
}

impl Style {
    pub fn as_str(self) -> &'static str {
        match self {
            Style::Helpful => "helpful",
            Style::Casual => "casual",
            Style::Professional => "professional",
        }
    }
}

pub struct RequestContext {
    pub channel: String,
    pub user_id: String,
    pub thread_id: Option<String>,
    pub style: Style,
}

pub struct GeneratorConfig {
    pub max_context_messages: usize,
    pub context_window_hours: f64,
    pub scoring: ActionScoringConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 8,
            context_window_hours: 24.0,
            scoring: ActionScoringConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionScoringConfig {
    pub base: f32,
    pub affirmative_bonus: f32,
    pub uncertain_penalty: f32,
    pub affirmative_patterns: Vec<&'static str>,
    pub uncertain_patterns: Vec<&'static str>,
    pub categories: Vec<(&'static str, Vec<&'static str>)>,
}

impl Default for ActionScoringConfig {
    fn default() -> Self {
        Self {
            base: 0.5,
            affirmative_bonus: 0.3,
            uncertain_penalty: 0.2,
            affirmative_patterns: vec!["i can help", "let me", "i'll", "i will", "would you like"],
            uncertain_patterns: vec!["might", "maybe", "perhaps", "could", "possibly"],
            categories: vec![
                ("create", vec!["create", "add", "new ticket", "make a"]),
                ("update", vec!["update", "change", "modify", "edit"]),
                ("delete", vec!["delete", "remove", "cancel"]),
                ("search", vec!["search", "find", "look up", "lookup"]),
                ("help", vec!["help", "assist", "support"]),
                ("schedule", vec!["schedule", "remind", "calendar", "meeting"]),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub action_type: String,
    pub keyword: String,
    pub window: String,
    pub confidence: f32,
}

pub struct GenerationResult {
    pub reply: String,
    pub actions: Vec<Action>,
    pub model: String,
    pub tokens: Usage,
    pub response_ms: u128,
    pub context_count: usize,
}

pub struct ResponseGenerator<'a> {
    llm: &'a LlmClient,
    config: GeneratorConfig,
}

impl<'a> ResponseGenerator<'a> {
    pub fn new(llm: &'a LlmClient, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    fn system_message(&self, ctx: &RequestContext, now: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            role: Role::System,
            content: format!(
                "You are a {} team chat assistant. Channel: {}. Current time: {}. \
                 Speaking with user: {}. Keep replies concise, surface actionable \
                 suggestions when relevant, and respect the privacy of message content.",
                ctx.style.as_str(),
                ctx.channel,
                now.to_rfc3339(),
                ctx.user_id,
            ),
        }
    }

    fn relative_time(now: f64, ts: f64) -> String {
        let delta = (now - ts).max(0.0);
        if delta < 60.0 {
            "just now".to_string()
        } else if delta < 3600.0 {
            format!("{}m ago", (delta / 60.0) as u64)
        } else if delta < 86400.0 {
            format!("{}h ago", (delta / 3600.0) as u64)
        } else {
            format!("{}d ago", (delta / 86400.0) as u64)
        }
    }

    fn record_timestamp(rec: &Record) -> Option<f64> {
        match rec.metadata.get("timestamp") {
            Some(crate::kvcodec::MetaValue::Num(n)) => Some(*n),
            _ => None,
        }
    }

    fn record_text(rec: &Record) -> String {
        match rec.metadata.get("text") {
            Some(crate::kvcodec::MetaValue::Str(s)) => s.clone(),
            _ => String::new(),
        }
    }

    fn record_user(rec: &Record) -> String {
        match rec.metadata.get("user_id") {
            Some(crate::kvcodec::MetaValue::Str(s)) => s.clone(),
            _ => "unknown".to_string(),
        }
    }

    /// Build the context messages: newest first, skipping records older than
    /// `context_window_hours`, capped at `max_context_messages`.
    fn build_context_messages(&self, records: &[Record], now_secs: f64) -> Vec<ChatMessage> {
        let window_secs = self.config.context_window_hours * 3600.0;
        let mut sorted: Vec<&Record> = records.iter().collect();
        sorted.sort_by(|a, b| {
            let ta = Self::record_timestamp(a).unwrap_or(0.0);
            let tb = Self::record_timestamp(b).unwrap_or(0.0);
            tb.partial_cmp(&ta).unwrap()
        });

        sorted
            .into_iter()
            .filter(|r| {
                Self::record_timestamp(r)
                    .map(|ts| now_secs - ts <= window_secs)
                    .unwrap_or(false)
            })
            .take(self.config.max_context_messages)
            .map(|r| {
                let ts = Self::record_timestamp(r).unwrap_or(now_secs);
                ChatMessage {
                    role: Role::User,
                    content: format!(
                        "[{}] {}: {}",
                        Self::relative_time(now_secs, ts),
                        Self::record_user(r),
                        Self::record_text(r),
                    ),
                }
            })
            .collect()
    }

    /// Parse `reply` for actionable categories. At most one action per
    /// category, sorted by confidence descending.
    pub fn parse_actions(&self, reply: &str) -> Vec<Action> {
        let lower = reply.to_lowercase();
        let cfg = &self.config.scoring;

        let affirmative_hits = cfg
            .affirmative_patterns
            .iter()
            .filter(|p| lower.contains(*p))
            .count();
        let uncertain_hits = cfg
            .uncertain_patterns
            .iter()
            .filter(|p| lower.contains(*p))
            .count();
        let confidence = (cfg.base + cfg.affirmative_bonus * affirmative_hits as f32
            - cfg.uncertain_penalty * uncertain_hits as f32)
            .clamp(0.0, 1.0);

        let mut actions = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (category, keywords) in &cfg.categories {
            for kw in keywords {
                if let Some(pos) = lower.find(kw) {
                    let key = (*category, *kw);
                    if !seen.insert(key) {
                        continue;
                    }
                    let start = pos.saturating_sub(50);
                    let end = (pos + kw.len() + 50).min(reply.len());
                    let window = reply
                        .get(start..end)
                        .unwrap_or(reply)
                        .to_string();
                    actions.push(Action {
                        action_type: category.to_string(),
                        keyword: kw.to_string(),
                        window,
                        confidence,
                    });
                    break; // at most one action per category
                }
            }
        }

        actions.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        actions
    }

    /// Generate a reply for `query`, given candidate context records and
    /// caller metadata. `now_secs` is the current time in seconds, supplied
    /// by the caller so this stays unit-testable without wall-clock access.
    pub async fn generate(
        &self,
        query: &str,
        context: &[Record],
        ctx: &RequestContext,
        now_secs: f64,
        now: DateTime<Utc>,
        options: ChatOptions,
    ) -> Result<GenerationResult, LlmTransportError> {
        let mut messages = vec![self.system_message(ctx, now)];
        let context_messages = self.build_context_messages(context, now_secs);
        let context_count = context_messages.len();
        messages.extend(context_messages);
        messages.push(ChatMessage {
            role: Role::User,
            content: query.to_string(),
        });

        let start = Instant::now();
        let result = self.llm.chat(&messages, &options).await?;
        let response_ms = start.elapsed().as_millis();

        let actions = self.parse_actions(&result.content);

        Ok(GenerationResult {
            reply: result.content,
            actions,
            model: result.model,
            tokens: result.usage,
            response_ms,
            context_count,
        })
    }

    /// Summarise `records` into at most roughly `max_chars` characters, using
    /// a lower sampling temperature than ordinary replies.
    pub async fn summarise(&self, records: &[Record], max_chars: usize) -> Result<String, LlmTransportError> {
        let text = records
            .iter()
            .map(|r| format!("{}: {}", Self::record_user(r), Self::record_text(r)))
            .collect::<Vec<_>>()
            .join("\n");
        self.llm.summarise(&text, max_chars).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvcodec::{MetaRecord, MetaValue};
    use crate::llm::{ChatResult, LlmTransport, RetryPolicy};
    use async_trait::async_trait;

    struct StubTransport {
        reply: String,
    }

    #[async_trait]
    impl LlmTransport for StubTransport {
        async fn send(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
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

    fn rec(text: &str, user: &str, ts: f64) -> Record {
        let mut m = MetaRecord::new();
        m.insert("text".to_string(), MetaValue::Str(text.to_string()));
        m.insert("user_id".to_string(), MetaValue::Str(user.to_string()));
        m.insert("timestamp".to_string(), MetaValue::Num(ts));
        Record {
            id: format!("chat_{ts}_C1"),
            vector: vec![1.0],
            metadata: m,
        }
    }

    #[test]
    fn action_detection_scores_affirmative_language_highly() {
        let llm = LlmClient::new(
            Box::new(StubTransport {
                reply: String::new(),
            }),
            RetryPolicy::default(),
        );
        let generator = ResponseGenerator::new(&llm, GeneratorConfig::default());
        let actions = generator.parse_actions("I can help: let me create a ticket for you");
        let create = actions.iter().find(|a| a.action_type == "create").unwrap();
        assert_eq!(create.keyword, "create");
        assert!(create.confidence >= 0.8);
    }

    #[test]
    fn uncertain_language_lowers_confidence() {
        let llm = LlmClient::new(
            Box::new(StubTransport {
                reply: String::new(),
            }),
            RetryPolicy::default(),
        );
        let generator = ResponseGenerator::new(&llm, GeneratorConfig::default());
        let actions = generator.parse_actions("I might maybe create something, perhaps");
        let create = actions.iter().find(|a| a.action_type == "create").unwrap();
        assert!(create.confidence < 0.5);
    }

    #[test]
    fn at_most_one_action_per_category() {
        let llm = LlmClient::new(
            Box::new(StubTransport {
                reply: String::new(),
            }),
            RetryPolicy::default(),
        );
        let generator = ResponseGenerator::new(&llm, GeneratorConfig::default());
        let actions = generator.parse_actions("create, add, and create again");
        assert_eq!(actions.iter().filter(|a| a.action_type == "create").count(), 1);
    }

    #[tokio::test]
    async fn generate_builds_prompt_with_bounded_context() {
        let llm = LlmClient::new(
            Box::new(StubTransport {
                reply: "I can help: let me create a ticket".to_string(),
            }),
            RetryPolicy::default(),
        );
        let generator = ResponseGenerator::new(&llm, GeneratorConfig::default());
        let context = vec![rec("deploy tomorrow", "U1", 100.0), rec("tests passing", "U1", 200.0)];
        let ctx = RequestContext {
            channel: "C1".to_string(),
            user_id: "U2".to_string(),
            thread_id: None,
            style: Style::Helpful,
        };
        let result = generator
            .generate(
                "status?",
                &context,
                &ctx,
                400.0,
                Utc::now(),
                ChatOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.context_count, 2);
        assert!(!result.actions.is_empty());
    }

    #[test]
    fn context_excludes_records_outside_window() {
        let llm = LlmClient::new(
            Box::new(StubTransport {
                reply: String::new(),
            }),
            RetryPolicy::default(),
        );
        let generator = ResponseGenerator::new(&llm, GeneratorConfig::default());
        let old = rec("ancient history", "U1", 0.0);
        let recent = rec("recent news", "U1", 100_000.0);
        let messages = generator.build_context_messages(&[old, recent], 100_000.0 + 60.0);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("recent news"));
    }
}
