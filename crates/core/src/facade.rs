//! Extraction entry point
//!
//! Wraps the model extractor with a deadline, falls back to the rule engine
//! on recoverable failures and makes sure only the newest `analyze` call
//! ever hands back a result.

use chrono::{DateTime, Local, TimeZone};
use reqwest::Client;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::AiBackendConfig;
use crate::datetime;
use crate::error::{ExtractionError, Result};
use crate::llm;
use crate::rules::extract_task_rules;
use crate::types::{tag_names, ExtractionResult, KnownTag, TaskDraft, TimeResolution};

/// Deadline for the live analyzer
pub const ANALYZE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for one-shot task import
pub const IMPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where each call's backend config comes from
#[derive(Debug, Clone)]
enum ConfigSource {
    /// Re-read file + environment on every call
    Environment,
    Fixed(AiBackendConfig),
}

/// Identifies one `analyze` call
#[derive(Debug, Clone)]
pub struct RequestTicket {
    pub id: u64,
    token: CancellationToken,
}

pub struct ExtractionFacade {
    client: Client,
    config: ConfigSource,
    analyze_timeout: Duration,
    import_timeout: Duration,
    latest: AtomicU64,
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
}

impl ExtractionFacade {
    /// Facade that reads backend config from file + environment per call
    pub fn from_env() -> Self {
        Self::with_source(ConfigSource::Environment)
    }

    /// Facade pinned to one backend config
    pub fn new(config: AiBackendConfig) -> Self {
        Self::with_source(ConfigSource::Fixed(config))
    }

    fn with_source(config: ConfigSource) -> Self {
        Self {
            client: Client::new(),
            config,
            analyze_timeout: ANALYZE_TIMEOUT,
            import_timeout: IMPORT_TIMEOUT,
            latest: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_timeouts(mut self, analyze: Duration, import: Duration) -> Self {
        self.analyze_timeout = analyze;
        self.import_timeout = import;
        self
    }

    async fn load_config(&self) -> Result<AiBackendConfig> {
        let config = match &self.config {
            // file reads stay off the async worker threads
            ConfigSource::Environment => tokio::task::spawn_blocking(AiBackendConfig::load)
                .await
                .map_err(|e| ExtractionError::BackendConfig(format!("config loader failed: {}", e)))??,
            ConfigSource::Fixed(config) => config.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    // ------------------------------------------------------------------------
    // Request tickets
    // ------------------------------------------------------------------------

    /// Start a new request, cancelling whichever one was in flight
    pub fn begin_request(&self) -> RequestTicket {
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let previous = self.slot().replace((id, token.clone()));
        if let Some((_, previous)) = previous {
            previous.cancel();
        }

        RequestTicket { id, token }
    }

    /// Release the in-flight slot if `ticket` still owns it
    fn finish_request(&self, ticket: &RequestTicket) {
        let mut slot = self.slot();
        if matches!(slot.as_ref(), Some((id, _)) if *id == ticket.id) {
            *slot = None;
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        match self.in_flight.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether `ticket` is still the newest request
    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.id
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Analyze text for the live task preview.
    ///
    /// A newer call supersedes this one: the model request is aborted and
    /// `Superseded` is returned instead of a stale result.
    pub async fn analyze(&self, text: &str, known_tags: &[KnownTag]) -> Result<ExtractionResult> {
        let ticket = self.begin_request();
        let outcome = self.analyze_with(&ticket, text, known_tags).await;
        self.finish_request(&ticket);
        outcome
    }

    async fn analyze_with(
        &self,
        ticket: &RequestTicket,
        text: &str,
        known_tags: &[KnownTag],
    ) -> Result<ExtractionResult> {
        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyInput);
        }
        let config = self.load_config().await?;
        let names = tag_names(known_tags);

        let attempt = tokio::select! {
            _ = ticket.token.cancelled() => {
                debug!("Request {} cancelled by a newer one", ticket.id);
                return Err(ExtractionError::Superseded);
            }
            r = with_deadline(
                self.analyze_timeout,
                llm::analyze_task_llm(&self.client, text, &names, &config),
            ) => r,
        };

        let result = recover(attempt, || extract_task_rules(text, &names))?;

        if !self.is_current(ticket) {
            debug!("Dropping stale result of request {}", ticket.id);
            return Err(ExtractionError::Superseded);
        }
        Ok(result)
    }

    /// Extract a task record from text in the import shape
    pub async fn import(&self, text: &str, known_tags: &[KnownTag]) -> Result<TaskDraft> {
        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyInput);
        }
        let config = self.load_config().await?;
        let names = tag_names(known_tags);

        let attempt = with_deadline(
            self.import_timeout,
            llm::import_task_llm(&self.client, text, &names, &config),
        )
        .await;

        recover(attempt, || TaskDraft::from(extract_task_rules(text, &names)))
    }

    /// Resolve a weekday phrase against the local clock
    pub fn resolve(&self, text: &str) -> TimeResolution {
        datetime::resolve(text, &Local::now())
    }

    /// Resolve a weekday phrase against an explicit reference instant
    pub fn resolve_at<Tz: TimeZone>(&self, text: &str, now: &DateTime<Tz>) -> TimeResolution {
        datetime::resolve(text, now)
    }
}

/// Run `fut`, mapping an elapsed deadline to `Timeout`
async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExtractionError::Timeout(deadline)),
    }
}

/// Pass through successes and caller-facing errors; answer the rest with `fallback`
fn recover<T>(attempt: Result<T>, fallback: impl FnOnce() -> T) -> Result<T> {
    match attempt {
        Ok(result) => Ok(result),
        Err(e) if e.is_recoverable() => {
            warn!("Model extraction failed ({}), using rule engine", e);
            Ok(fallback())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::types::default_tags;

    fn unreachable_facade() -> ExtractionFacade {
        // Port 9 (discard) refuses connections, so every call falls back
        let config = AiBackendConfig::new(Provider::Ollama, "test").with_base_url("http://127.0.0.1:9");
        ExtractionFacade::new(config)
    }

    #[test]
    fn test_tickets_track_latest() {
        let facade = unreachable_facade();
        let a = facade.begin_request();
        assert!(facade.is_current(&a));

        let b = facade.begin_request();
        assert!(!facade.is_current(&a));
        assert!(facade.is_current(&b));
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
    }

    #[test]
    fn test_finish_keeps_newer_request() {
        let facade = unreachable_facade();
        let a = facade.begin_request();
        let b = facade.begin_request();

        facade.finish_request(&a);
        assert_eq!(facade.slot().as_ref().map(|(id, _)| *id), Some(b.id));

        facade.finish_request(&b);
        assert!(facade.slot().is_none());
    }

    #[tokio::test]
    async fn test_analyze_releases_slot() {
        let facade = unreachable_facade();
        facade.analyze("买牛奶", &default_tags()).await.unwrap();
        assert!(facade.slot().is_none());

        facade.analyze("", &default_tags()).await.unwrap_err();
        assert!(facade.slot().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_environment_config_loads_on_blocking_pool() {
        let facade = ExtractionFacade::from_env();
        match facade.load_config().await {
            Ok(_) => {}
            Err(ExtractionError::BackendConfig(msg)) => {
                assert!(!msg.starts_with("config loader failed"), "{}", msg)
            }
            Err(other) => panic!("Unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_recover_only_recoverable() {
        let r = recover::<u8>(Err(ExtractionError::Timeout(ANALYZE_TIMEOUT)), || 7);
        assert_eq!(r.unwrap(), 7);

        let r = recover::<u8>(Err(ExtractionError::EmptyInput), || 7);
        assert!(matches!(r, Err(ExtractionError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_analyze_empty_input() {
        let facade = unreachable_facade();
        let err = facade.analyze("  \n", &default_tags()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyInput));
    }

    #[tokio::test]
    async fn test_import_empty_input() {
        let facade = unreachable_facade();
        let err = facade.import("", &default_tags()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyInput));
    }

    #[tokio::test]
    async fn test_analyze_missing_key_is_reported() {
        let facade = ExtractionFacade::new(AiBackendConfig::new(Provider::OpenAi, "gpt-4o-mini"));
        let err = facade.analyze("开会", &default_tags()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::BackendConfig(_)));
    }

    #[tokio::test]
    async fn test_analyze_unreachable_backend_falls_back() {
        let facade = unreachable_facade();
        let text = "周四下午2点在图书馆和小明讨论项目方案";
        let result = facade.analyze(text, &default_tags()).await.unwrap();
        assert_eq!(result, extract_task_rules(text, &tag_names(&default_tags())));
    }

    #[test]
    fn test_resolve_at_delegates() {
        let facade = unreachable_facade();
        let now = chrono::Utc::now();
        assert!(facade.resolve_at("没有日期", &now).is_empty());
        assert!(!facade.resolve_at("下周五截止", &now).is_empty());
    }
}
