//! Sandbox worker: polls a coordinator endpoint for evaluation jobs.
//!
//! The worker posts `{"status": "ready"}`, then alternates between running
//! the job it receives and posting the job back with its `result`, until the
//! coordinator answers `{"action": "stop"}`.

use crate::core::error::HiveError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_EVALUATION_SCRIPT: &str = "evaluator.py";
const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Evaluation job carried by a `run` action.
#[derive(Debug, Clone, PartialEq)]
pub struct RunJob {
    pub code: BTreeMap<String, String>,
    pub timeout: Duration,
    pub memory_limit_mb: Option<u64>,
    pub args: Vec<Value>,
    pub evaluation_script: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Run(RunJob),
    Stop,
}

/// What gets posted back under `result`.
///
/// A successful run posts the last line of output as a bare string;
/// checkpoints and failures post an `{output, metainfo}` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvalResult {
    Line(String),
    Report { output: Value, metainfo: String },
}

impl EvalResult {
    pub fn checkpoint(output: Value) -> Self {
        EvalResult::Report {
            output,
            metainfo: "Checkpoint".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        EvalResult::Report {
            output: Value::Null,
            metainfo: message.into(),
        }
    }
}

/// Executes one job. Implementations are synchronous and run off the async
/// runtime.
pub trait Executor: Send + Sync {
    fn execute(&self, job: &RunJob) -> Result<EvalResult, HiveError>;
}

/// Parse a coordinator response into an [`Action`].
pub fn parse_action(response: &Map<String, Value>) -> Result<Action, HiveError> {
    match response.get("action").and_then(Value::as_str) {
        Some("stop") => Ok(Action::Stop),
        Some("run") => parse_job(response).map(Action::Run),
        Some(other) => Err(HiveError::ProtocolError(format!("Unknown action: {}", other))),
        None => Err(HiveError::ProtocolError(format!(
            "Unknown action: {}",
            response.get("action").cloned().unwrap_or(Value::Null)
        ))),
    }
}

fn parse_job(response: &Map<String, Value>) -> Result<RunJob, HiveError> {
    let code = match response.get("code") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| HiveError::ProtocolError(format!("invalid 'code': {}", e)))?,
    };

    let timeout_secs = response
        .get("timeout")
        .and_then(lenient_f64)
        .ok_or_else(|| HiveError::ProtocolError("'timeout' is required".to_string()))?;
    let timeout = Duration::try_from_secs_f64(timeout_secs)
        .ok()
        .filter(|t| !t.is_zero())
        .ok_or_else(|| {
            HiveError::ProtocolError(format!("invalid 'timeout': {}", timeout_secs))
        })?;

    let memory_limit_mb = match response.get("memory_limit") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            lenient_f64(value)
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as u64)
                .ok_or_else(|| {
                    HiveError::ProtocolError(format!("invalid 'memory_limit': {}", value))
                })?,
        ),
    };

    let args = match response.get("args") {
        Some(Value::Array(items)) => items.clone(),
        None | Some(Value::Null) => Vec::new(),
        Some(other) => {
            return Err(HiveError::ProtocolError(format!("invalid 'args': {}", other)));
        }
    };

    let evaluation_script = response
        .get("evaluation_script")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_EVALUATION_SCRIPT)
        .to_string();

    Ok(RunJob {
        code,
        timeout,
        memory_limit_mb,
        args,
        evaluation_script,
    })
}

/// Numbers or numeric strings.
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub delay_multiplier: f64,
    pub request_timeout: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            delay_multiplier: 1.5,
            request_timeout: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

pub struct SandboxClient {
    http: reqwest::Client,
    endpoint: String,
    policy: BackoffPolicy,
}

impl SandboxClient {
    pub fn new(endpoint: &str, policy: BackoffPolicy) -> Result<Self, HiveError> {
        let http = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            policy,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST `data` and return the JSON object answered with status 200.
    ///
    /// Any other status, and transport failures, are retried with
    /// exponential backoff.
    pub async fn send(&self, data: &Value) -> Result<Map<String, Value>, HiveError> {
        let mut delay = self.policy.initial_delay;
        let mut attempt: u32 = 1;

        loop {
            let failure = match self.http.post(&self.endpoint).json(data).send().await {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    let body: Value = response.json().await?;
                    return match body {
                        Value::Object(map) => Ok(map),
                        other => Err(HiveError::ProtocolError(format!(
                            "expected a JSON object, got {}",
                            other
                        ))),
                    };
                }
                Ok(response) => format!("Response status: {}", response.status().as_u16()),
                Err(err) => format!("Request failed: {}", err),
            };

            if self.policy.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(HiveError::ProtocolError(format!(
                    "{} after {} attempts",
                    failure, attempt
                )));
            }
            tracing::error!(
                "{}. Attempt #{}. Retrying in {:.2} seconds...",
                failure,
                attempt,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            delay = next_delay(delay, self.policy.delay_multiplier);
            attempt += 1;
        }
    }
}

/// Grow `delay` by `multiplier`, saturating instead of overflowing.
fn next_delay(delay: Duration, multiplier: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * multiplier)
        .map_or(MAX_RETRY_DELAY, |next| next.min(MAX_RETRY_DELAY))
}

/// Run the worker until the coordinator says stop.
pub async fn main_loop<E>(client: &SandboxClient, executor: Arc<E>) -> Result<(), HiveError>
where
    E: Executor + 'static,
{
    let mut response = client.send(&json!({"status": "ready"})).await?;

    loop {
        let job = match parse_action(&response)? {
            Action::Stop => {
                tracing::info!("Received stop action. Exiting.");
                return Ok(());
            }
            Action::Run(job) => job,
        };

        let result = run_job(Arc::clone(&executor), job).await;

        let mut payload = response;
        payload.insert("result".to_string(), serde_json::to_value(&result)?);
        response = client.send(&Value::Object(payload)).await?;
    }
}

async fn run_job<E>(executor: Arc<E>, job: RunJob) -> EvalResult
where
    E: Executor + 'static,
{
    let outcome = tokio::task::spawn_blocking(move || executor.execute(&job)).await;
    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(HiveError::ExecutionError(message))) => {
            tracing::error!("Function execution failed: {}", message);
            EvalResult::failure(message)
        }
        Ok(Err(err @ HiveError::MemoryLimitExceeded)) => {
            tracing::error!("Function execution failed: {}", err);
            EvalResult::failure(err.to_string())
        }
        Ok(Err(err)) => {
            tracing::error!("Unexpected error: {}", err);
            EvalResult::failure("Internal server error")
        }
        Err(join_err) => {
            tracing::error!("Executor panicked: {}", join_err);
            EvalResult::failure("Internal server error")
        }
    }
}

/// Poll `url` until it answers 200 or `timeout` elapses.
pub async fn wait_for_url(url: &str, timeout: Duration, interval: Duration) -> bool {
    let http = match reqwest::Client::builder().timeout(interval.max(Duration::from_secs(1))).build() {
        Ok(http) => http,
        Err(_) => return false,
    };
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if let Ok(response) = http.get(url).send().await {
            if response.status() == reqwest::StatusCode::OK {
                return true;
            }
        }
        tracing::info!("Waiting for {} to be available...", url);
        tokio::time::sleep(interval).await;
    }
    false
}
