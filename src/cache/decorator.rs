//! Transparent caching wrapper over any `LLMProvider`.
//!
//! Never caches an error, never surfaces a cache failure to the caller
//! (§7 fail-open), and falls straight through to the wrapped provider when
//! fingerprinting fails or caching was never enabled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::entry::CachedResponse;
use crate::cache::fingerprint::{self, NormalizedRequest};
use crate::cache::two_tier::TwoTier;
use crate::error::Result;
use crate::providers::{ChatOptions, LLMProvider, LLMResponse, ToolDefinition};
use crate::session::Message;

pub struct CachingDecorator<P: LLMProvider> {
    inner: Arc<P>,
    cache: Arc<TwoTier>,
    ttl: Duration,
}

impl<P: LLMProvider> CachingDecorator<P> {
    pub fn new(inner: Arc<P>, cache: Arc<TwoTier>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl<P: LLMProvider> LLMProvider for CachingDecorator<P> {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let temperature = options.temperature.unwrap_or(0.0) as f64;
        let normalized = NormalizedRequest::from_messages(&messages, &tools, temperature);

        let fingerprint = match fingerprint::derive(&normalized) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(error = %e, "fingerprint derivation failed; bypassing cache");
                return self.inner.chat(messages, tools, model, options).await;
            }
        };

        if let Some(cached) = self.cache.get(&fingerprint) {
            debug!(fingerprint = %fingerprint, "cache hit");
            return Ok(cached.response);
        }

        debug!(fingerprint = %fingerprint, "cache miss");
        let response = self.inner.chat(messages, tools, model, options).await?;

        let entry = CachedResponse::new(fingerprint.clone(), normalized, response.clone(), self.ttl);
        self.cache.put(&fingerprint, entry);

        Ok(response)
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn name(&self) -> &str {
        // The decorator owns no static buffer to return a `cached-<name>`
        // borrow from; `provider_name()`-style callers that want the
        // decorated label should use `Self::decorated_name` instead.
        self.inner.name()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }
}

impl<P: LLMProvider> CachingDecorator<P> {
    /// An owned, decorated name for observability (e.g. `cached-gemini`),
    /// distinct from `LLMProvider::name()` which must return a borrow.
    pub fn decorated_name(&self) -> String {
        format!("cached-{}", self.inner.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::disk_tier::DiskTier;
    use crate::providers::Usage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingProvider {
        calls: AtomicUsize,
        reply: String,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl CountingProvider {
        fn new(reply: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reply: reply.to_string(),
                fail_next: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for CountingProvider {
        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(crate::error::ZeptoError::Provider("boom".into()));
            }
            Ok(LLMResponse::text(&self.reply).with_usage(Usage::new(10, 5)))
        }

        fn default_model(&self) -> &str {
            "stub-model"
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn decorator(dir: &TempDir) -> (Arc<CountingProvider>, CachingDecorator<CountingProvider>) {
        let provider = Arc::new(CountingProvider::new("X"));
        let disk = Arc::new(DiskTier::new(dir.path().join("cache.json"), None));
        disk.load().unwrap();
        let cache = Arc::new(TwoTier::new(100, disk, Duration::from_secs(60)));
        let decorator = CachingDecorator::new(Arc::clone(&provider), cache, Duration::from_secs(60));
        (provider, decorator)
    }

    #[tokio::test]
    async fn identical_calls_deduplicate() {
        let dir = TempDir::new().unwrap();
        let (provider, decorator) = decorator(&dir);

        let messages = vec![Message::system("you are helpful"), Message::user("hi")];
        let r1 = decorator
            .chat(messages.clone(), vec![], None, ChatOptions::new())
            .await
            .unwrap();

        let messages2 = vec![Message::system(" you are helpful "), Message::user("hi")];
        let r2 = decorator
            .chat(messages2, vec![], None, ChatOptions::new())
            .await
            .unwrap();

        assert_eq!(r1.content, "X");
        assert_eq!(r2.content, "X");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_errors_are_never_cached() {
        let dir = TempDir::new().unwrap();
        let (provider, decorator) = decorator(&dir);
        provider.fail_next.store(true, Ordering::SeqCst);

        let messages = vec![Message::user("hi")];
        let err = decorator
            .chat(messages.clone(), vec![], None, ChatOptions::new())
            .await;
        assert!(err.is_err());

        // Retrying the identical request still invokes the provider.
        let ok = decorator
            .chat(messages, vec![], None, ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(ok.content, "X");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tool_order_does_not_cause_a_second_provider_call() {
        let dir = TempDir::new().unwrap();
        let (provider, decorator) = decorator(&dir);
        let messages = vec![Message::user("hi")];
        let a = vec![
            ToolDefinition::new("a", "first", serde_json::json!({})),
            ToolDefinition::new("b", "second", serde_json::json!({})),
        ];
        let b = vec![
            ToolDefinition::new("b", "second", serde_json::json!({})),
            ToolDefinition::new("a", "first", serde_json::json!({})),
        ];

        decorator.chat(messages.clone(), a, None, ChatOptions::new()).await.unwrap();
        decorator.chat(messages, b, None, ChatOptions::new()).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decorated_name_prefixes_the_inner_provider_name() {
        let dir = TempDir::new().unwrap();
        let (_, decorator) = decorator(&dir);
        assert_eq!(decorator.decorated_name(), "cached-stub");
        assert_eq!(decorator.name(), "stub");
    }
}
