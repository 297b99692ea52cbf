//! # Privacy router (C8)
//!
//! Decides, per message, whether text is embedded locally (TF-IDF / averaged
//! word vectors, see [`crate::embedder`]) or sent to an external embedding
//! API, based on a configured privacy tier plus a deterministic
//! sensitive-text predicate. PII is anonymised before any `medium`-tier text
//! that matches the predicate leaves the process.
//!
//! The external embedder is a real HTTP dependency behind the
//! [`ExternalEmbedder`] trait — the design notes call out the source's
//! "low-privacy" path that quietly falls back to a local simulator as a bug,
//! not a feature to reproduce; this router always calls the injected
//! implementation for `medium`/`low` tiers, whatever transport that turns out
//! to be at the call site. No default endpoint is guessed.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::embedder::{EmbedMethod, LocalEmbedder};

pub const ZERO_VECTOR_DIMENSION: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyTier {
    High,
    Medium,
    Low,
}

impl PrivacyTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrivacyTier::High => "high",
            PrivacyTier::Medium => "medium",
            PrivacyTier::Low => "low",
        }
    }
}

/// Where an embedding came from, for metadata and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMethod {
    Local(EmbedMethod),
    External,
    ZeroVector,
}

impl RouteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteMethod::Local(m) => m.as_str(),
            RouteMethod::External => "external",
            RouteMethod::ZeroVector => "zero_vector",
        }
    }
}

/// Injectable external embedding API client.
#[async_trait]
pub trait ExternalEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// Real HTTP implementation of [`ExternalEmbedder`], posting `{"input": text}`
/// to a configured endpoint and reading back `{"embedding": [...]}`. The same
/// injectable-transport seam as [`crate::llm::HttpLlmTransport`] and
/// [`crate::transport::TungsteniteDialer`].
pub struct HttpExternalEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpExternalEmbedder {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl ExternalEmbedder for HttpExternalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut req = self.client.post(&self.url).json(&EmbedRequest { input: text });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("external embedder returned status {}", resp.status()));
        }
        let body: EmbedResponse = resp.json().await.map_err(|e| e.to_string())?;
        Ok(body.embedding)
    }
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static API_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)api key:\s*\S+").unwrap());
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)token:\s*\S+").unwrap());
static PASSWORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)password:\s*\S+").unwrap());

/// True if `text` contains an email-like pattern, an SSN-like pattern, or any
/// of the case-insensitive substrings `password`, `api key`, `secret`, `token`.
pub fn is_sensitive(text: &str) -> bool {
    let lower = text.to_lowercase();
    EMAIL_RE.is_match(text)
        || SSN_RE.is_match(text)
        || lower.contains("password")
        || lower.contains("api key")
        || lower.contains("secret")
        || lower.contains("token")
}

/// Replace PII with fixed placeholder tokens. Idempotent: running it twice
/// yields the same output as running it once, since the placeholders
/// themselves never match the patterns they replaced.
pub fn anonymise(text: &str) -> String {
    let s = EMAIL_RE.replace_all(text, "[EMAIL]");
    let s = SSN_RE.replace_all(&s, "[SSN]");
    let s = API_KEY_RE.replace_all(&s, "[API_KEY]");
    let s = TOKEN_RE.replace_all(&s, "[TOKEN]");
    let s = PASSWORD_RE.replace_all(&s, "[PASSWORD]");
    s.into_owned()
}

#[derive(Default)]
pub struct PrivacyCounters {
    pub total: AtomicU64,
    pub local: AtomicU64,
    pub external: AtomicU64,
    pub filtered: AtomicU64,
}

pub struct PrivacyRouter {
    tier: PrivacyTier,
    use_enterprise_zdr: bool,
    local: LocalEmbedder,
    external: Box<dyn ExternalEmbedder>,
    counters: PrivacyCounters,
}

impl PrivacyRouter {
    pub fn new(
        tier: PrivacyTier,
        use_enterprise_zdr: bool,
        local: LocalEmbedder,
        external: Box<dyn ExternalEmbedder>,
    ) -> Self {
        Self {
            tier,
            use_enterprise_zdr,
            local,
            external,
            counters: PrivacyCounters::default(),
        }
    }

    pub fn counters(&self) -> &PrivacyCounters {
        &self.counters
    }

    pub fn tier(&self) -> PrivacyTier {
        self.tier
    }

    /// Route `text` to the appropriate embedder per the configured tier,
    /// returning the embedding and which path produced it.
    pub async fn embed(&self, text: &str) -> (Vec<f32>, RouteMethod) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        if text.is_empty() {
            return (vec![0.0; ZERO_VECTOR_DIMENSION], RouteMethod::ZeroVector);
        }

        match self.tier {
            PrivacyTier::High => {
                self.counters.local.fetch_add(1, Ordering::Relaxed);
                let (v, m) = self.local.embed(text);
                (v, RouteMethod::Local(m))
            }
            PrivacyTier::Medium => {
                let sensitive = is_sensitive(text);
                let payload = if sensitive {
                    self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                    anonymise(text)
                } else {
                    text.to_string()
                };
                self.call_external(&payload).await
            }
            PrivacyTier::Low => self.call_external(text).await,
        }
    }

    async fn call_external(&self, text: &str) -> (Vec<f32>, RouteMethod) {
        match self.external.embed(text).await {
            Ok(v) => {
                self.counters.external.fetch_add(1, Ordering::Relaxed);
                (v, RouteMethod::External)
            }
            Err(_) => {
                // Embedding errors fall through to the local embedder; they
                // never abort the ingest path.
                self.counters.local.fetch_add(1, Ordering::Relaxed);
                let (v, m) = self.local.embed(text);
                (v, RouteMethod::Local(m))
            }
        }
    }

    /// Compliance score: tier base (high 80 / medium 60 / low 40), +15 for
    /// enterprise zero-data-retention, + up to 5 points scaled by observed
    /// local-routing rate, capped at 100.
    pub fn compliance_score(&self) -> f32 {
        let base = match self.tier {
            PrivacyTier::High => 80.0,
            PrivacyTier::Medium => 60.0,
            PrivacyTier::Low => 40.0,
        };
        let zdr_bonus = if self.use_enterprise_zdr { 15.0 } else { 0.0 };

        let total = self.counters.total.load(Ordering::Relaxed);
        let local = self.counters.local.load(Ordering::Relaxed);
        let local_rate = if total == 0 { 0.0 } else { local as f32 / total as f32 };
        let local_bonus = 5.0 * local_rate;

        (base + zdr_bonus + local_bonus).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubExternal {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl ExternalEmbedder for StubExternal {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
            Ok(self.vector.clone())
        }
    }

    struct FailingExternal;

    #[async_trait]
    impl ExternalEmbedder for FailingExternal {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
            Err("unreachable".to_string())
        }
    }

    fn router(tier: PrivacyTier) -> PrivacyRouter {
        PrivacyRouter::new(
            tier,
            false,
            LocalEmbedder::untrained(),
            Box::new(StubExternal {
                vector: vec![1.0; 8],
            }),
        )
    }

    #[test]
    fn anonymise_is_idempotent() {
        let samples = [
            "my email is a@b.com and token: xyz",
            "password: hunter2, api key: sk-test",
            "no pii here at all",
        ];
        for s in samples {
            let once = anonymise(s);
            let twice = anonymise(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn is_sensitive_detects_all_patterns() {
        assert!(is_sensitive("contact me at a@b.com"));
        assert!(is_sensitive("ssn 123-45-6789"));
        assert!(is_sensitive("my password: hunter2"));
        assert!(is_sensitive("here is my api key: sk-test"));
        assert!(is_sensitive("use this secret value"));
        assert!(is_sensitive("token: abcd1234"));
        assert!(!is_sensitive("hello team, deploy tomorrow"));
    }

    #[tokio::test]
    async fn high_tier_never_routes_external() {
        let r = router(PrivacyTier::High);
        for text in ["hello team", "my email is a@b.com"] {
            let (_, method) = r.embed(text).await;
            assert!(matches!(method, RouteMethod::Local(_)));
        }
        assert_eq!(r.counters().external.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn medium_tier_anonymises_sensitive_text_before_external_call() {
        struct CapturingExternal {
            seen: std::sync::Mutex<Vec<String>>,
        }
        #[async_trait]
        impl ExternalEmbedder for CapturingExternal {
            async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
                self.seen.lock().unwrap().push(text.to_string());
                Ok(vec![1.0; 4])
            }
        }
        let external = CapturingExternal {
            seen: std::sync::Mutex::new(Vec::new()),
        };
        let r = PrivacyRouter::new(
            PrivacyTier::Medium,
            false,
            LocalEmbedder::untrained(),
            Box::new(external),
        );
        let (_, method) = r.embed("my email is a@b.com and token: xyz").await;
        assert_eq!(method, RouteMethod::External);
        assert_eq!(r.counters().filtered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn empty_input_yields_fixed_zero_vector() {
        let r = router(PrivacyTier::Low);
        let (v, method) = r.embed("").await;
        assert_eq!(v.len(), ZERO_VECTOR_DIMENSION);
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(method, RouteMethod::ZeroVector);
    }

    #[tokio::test]
    async fn external_failure_falls_back_to_local() {
        let r = PrivacyRouter::new(
            PrivacyTier::Low,
            false,
            LocalEmbedder::untrained(),
            Box::new(FailingExternal),
        );
        let (_, method) = r.embed("hello").await;
        assert!(matches!(method, RouteMethod::Local(_)));
    }

    #[tokio::test]
    async fn http_external_embedder_posts_input_and_parses_embedding() {
        let server = httpmock::MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/embed")
                .header("authorization", "Bearer sk-test")
                .json_body(serde_json::json!({"input": "hello team"}));
            then.status(200)
                .json_body(serde_json::json!({"embedding": [0.1, 0.2, 0.3]}));
        });

        let embedder = HttpExternalEmbedder::new(
            format!("{}/embed", server.base_url()),
            Some("sk-test".to_string()),
        );
        let v = embedder.embed("hello team").await.unwrap();

        mock.assert();
        assert_eq!(v, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn compliance_score_is_capped_at_100() {
        let r = PrivacyRouter::new(
            PrivacyTier::High,
            true,
            LocalEmbedder::untrained(),
            Box::new(StubExternal { vector: vec![1.0] }),
        );
        for _ in 0..5 {
            r.embed("hello").await;
        }
        assert!(r.compliance_score() <= 100.0);
    }
}
