//! Recommendation sources
//!
//! A [`RecommendationSource`] turns a pool's recent metric history into a raw
//! core/max suggestion. Suggestions are untrusted and always clamped by the
//! registry before they reach a pool.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error};

use pt_common::{MetricRecord, PoolBounds, Recommendation};
use crate::error::RecommendationError;

#[async_trait]
pub trait RecommendationSource: Send + Sync {
    /// Suggest a sizing for `pool` from its history (oldest first).
    async fn recommend(
        &self,
        pool: &str,
        history: &[MetricRecord],
        bounds: &PoolBounds,
    ) -> Result<Recommendation, RecommendationError>;
}

/// Configuration for [`ChatCompletionSource`]
#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    pub endpoint: String,
    pub model: String,
    /// Sent as a bearer token when set
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ChatCompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/v1/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Recommendation source backed by an OpenAI-compatible chat completions API.
///
/// The model is asked for a JSON object `{"core": n, "max": n}` through
/// `response_format: json_object`.
pub struct ChatCompletionSource {
    client: Client,
    config: ChatCompletionConfig,
}

impl ChatCompletionSource {
    pub fn new(config: ChatCompletionConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self { client, config }
    }

    pub fn config(&self) -> &ChatCompletionConfig {
        &self.config
    }

    fn build_request(&self, history: &[MetricRecord], bounds: &PoolBounds) -> Result<Value, RecommendationError> {
        let data = serde_json::to_string(history)?;

        Ok(json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system_prompt(bounds) },
                { "role": "user", "content": format!("Full monitoring data (JSON array):\n{}", data) },
            ],
            "response_format": { "type": "json_object" },
        }))
    }
}

#[async_trait]
impl RecommendationSource for ChatCompletionSource {
    async fn recommend(
        &self,
        pool: &str,
        history: &[MetricRecord],
        bounds: &PoolBounds,
    ) -> Result<Recommendation, RecommendationError> {
        if history.is_empty() {
            return Err(RecommendationError::EmptyHistory(pool.to_string()));
        }

        let body = self.build_request(history, bounds)?;

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        debug!(pool = %pool, records = history.len(), "Requesting sizing recommendation");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(pool = %pool, status = status.as_u16(), body = %body, "Recommendation request failed");
            return Err(RecommendationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let recommendation = parse_completion(&text)?;
        debug!(pool = %pool, core = recommendation.core, max = recommendation.max, "Received recommendation");
        Ok(recommendation)
    }
}

fn system_prompt(bounds: &PoolBounds) -> String {
    format!(
        r#"You are a thread pool tuning expert. Analyse the monitoring data that follows.
Configured limits of this pool:
- configured minimum core workers: {min_core}
- configured maximum workers: {max_core}
- maximum queue capacity: {max_queue}

Each data point has these fields:
- timestamp: sample time
- config_min_core: configured minimum core workers
- config_max_core: configured maximum workers
- config_max_queue: configured queue limit
- current_core: current core workers
- current_max: current maximum workers
- active_threads: workers running a task
- queue_size: tasks waiting in the queue
- queue_capacity: current queue capacity
- queue_utilization: queue_size / queue_capacity
- idle_ratio: share of idle workers

Suggest a core worker count and a maximum worker count.
The configured minimum and maximum are fixed: core must not be below the minimum and max must not exceed the configured maximum.
When queue utilization is above 80%, increase core and max; when it is below 50%, decrease them.

Output rules:
1. Reply with JSON only
2. Two integer fields: core and max
3. max must be greater than or equal to core

Example:
{{"core":8,"max":16}}"#,
        min_core = bounds.min_core,
        max_core = bounds.max_core,
        max_queue = bounds.max_queue,
    )
}

/// Extract `{core, max}` from `choices[0].message.content` of a completion response
pub fn parse_completion(body: &str) -> Result<Recommendation, RecommendationError> {
    let root: Value = serde_json::from_str(body)?;

    let choice = root
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or(RecommendationError::MissingField("choices"))?;

    let content = choice
        .get("message")
        .ok_or(RecommendationError::MissingField("message"))?
        .get("content")
        .and_then(Value::as_str)
        .ok_or(RecommendationError::MissingField("content"))?;

    let suggestion: Value = serde_json::from_str(content.trim())?;

    Ok(Recommendation {
        core: integer_field(&suggestion, "core")?,
        max: integer_field(&suggestion, "max")?,
    })
}

fn integer_field(value: &Value, field: &'static str) -> Result<i64, RecommendationError> {
    let raw = value.get(field).ok_or(RecommendationError::MissingField(field))?;
    raw.as_i64()
        .or_else(|| raw.as_f64().map(|f| f as i64))
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| RecommendationError::Malformed(format!("field '{}' is not an integer: {}", field, raw)))
}
