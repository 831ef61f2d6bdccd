use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use hive_cli::core::error::HiveError;
use hive_cli::plugins::evaluator::PythonEvaluator;
use hive_cli::plugins::sandbox::{
    BackoffPolicy, EvalResult, Executor, RunJob, SandboxClient, main_loop, wait_for_url,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::sync::{Arc, Mutex};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::tempdir;

struct Coordinator {
    script: Mutex<VecDeque<(StatusCode, Value)>>,
    received: Mutex<Vec<Value>>,
}

async fn exchange(
    State(state): State<Arc<Coordinator>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.received.lock().unwrap().push(body);
    let next = state.script.lock().unwrap().pop_front();
    match next {
        Some((status, reply)) => (status, Json(reply)),
        None => (StatusCode::OK, Json(json!({"action": "stop"}))),
    }
}

async fn start(script: Vec<(StatusCode, Value)>) -> (String, Arc<Coordinator>) {
    let state = Arc::new(Coordinator {
        script: Mutex::new(script.into()),
        received: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/", post(exchange))
        .route("/health", get(|| async { "ok" }))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_millis(10),
        delay_multiplier: 1.5,
        request_timeout: Duration::from_secs(5),
        max_attempts: None,
    }
}

struct CountArgs;

impl Executor for CountArgs {
    fn execute(&self, job: &RunJob) -> Result<EvalResult, HiveError> {
        Ok(EvalResult::Line(job.args.len().to_string()))
    }
}

struct NoMemory;

impl Executor for NoMemory {
    fn execute(&self, _job: &RunJob) -> Result<EvalResult, HiveError> {
        Err(HiveError::MemoryLimitExceeded)
    }
}

struct AlwaysTimesOut;

impl Executor for AlwaysTimesOut {
    fn execute(&self, _job: &RunJob) -> Result<EvalResult, HiveError> {
        Err(HiveError::ExecutionError("Timeout".to_string()))
    }
}

fn run_action() -> Value {
    json!({
        "action": "run",
        "id": "candidate-1",
        "code": {"main.py": "print(1)"},
        "timeout": 5,
        "args": ["x", 2]
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_runs_then_stops() {
    let (url, state) = start(vec![(StatusCode::OK, run_action())]).await;
    let client = SandboxClient::new(&url, fast_policy()).unwrap();

    main_loop(&client, Arc::new(CountArgs)).await.unwrap();

    let received = state.received.lock().unwrap().clone();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], json!({"status": "ready"}));
    assert_eq!(received[1]["id"], "candidate-1");
    assert_eq!(received[1]["code"]["main.py"], "print(1)");
    assert_eq!(received[1]["result"], json!("2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_retries_non_200() {
    let (url, state) = start(vec![
        (StatusCode::SERVICE_UNAVAILABLE, json!({})),
        (StatusCode::INTERNAL_SERVER_ERROR, json!({})),
    ])
    .await;
    let client = SandboxClient::new(&url, fast_policy()).unwrap();

    main_loop(&client, Arc::new(CountArgs)).await.unwrap();

    let received = state.received.lock().unwrap().clone();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|body| body == &json!({"status": "ready"})));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_gives_up_after_max_attempts() {
    let (url, _state) = start(vec![
        (StatusCode::BAD_GATEWAY, json!({})),
        (StatusCode::BAD_GATEWAY, json!({})),
        (StatusCode::BAD_GATEWAY, json!({})),
    ])
    .await;
    let policy = BackoffPolicy {
        max_attempts: Some(2),
        ..fast_policy()
    };
    let client = SandboxClient::new(&url, policy).unwrap();

    let err = main_loop(&client, Arc::new(CountArgs)).await.unwrap_err();
    assert!(err.to_string().contains("Response status: 502"), "{}", err);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_action_ends_loop() {
    let (url, _state) = start(vec![(StatusCode::OK, json!({"action": "dance"}))]).await;
    let client = SandboxClient::new(&url, fast_policy()).unwrap();

    let err = main_loop(&client, Arc::new(CountArgs)).await.unwrap_err();
    assert_eq!(err.to_string(), "Protocol error: Unknown action: dance");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execution_errors_are_reported_not_fatal() {
    let (url, state) = start(vec![(StatusCode::OK, run_action())]).await;
    let client = SandboxClient::new(&url, fast_policy()).unwrap();

    main_loop(&client, Arc::new(AlwaysTimesOut)).await.unwrap();

    let received = state.received.lock().unwrap().clone();
    assert_eq!(received[1]["result"], json!({"output": null, "metainfo": "Timeout"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_memory_limit_failures_are_reported() {
    let (url, state) = start(vec![(StatusCode::OK, run_action())]).await;
    let client = SandboxClient::new(&url, fast_policy()).unwrap();

    main_loop(&client, Arc::new(NoMemory)).await.unwrap();

    let received = state.received.lock().unwrap().clone();
    assert_eq!(
        received[1]["result"],
        json!({"output": null, "metainfo": "Execution failed: Memory limit exceeded"})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_posts_raw_output_line() {
    let tmp = tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("evaluator.py"), "echo working\necho '{\"score\": 0.5}'\n").unwrap();
    let (url, state) = start(vec![(StatusCode::OK, run_action())]).await;
    let client = SandboxClient::new(&url, fast_policy()).unwrap();

    main_loop(&client, Arc::new(sh_evaluator(&repo, tmp.path())))
        .await
        .unwrap();

    let received = state.received.lock().unwrap().clone();
    assert_eq!(received[1]["result"], json!("{\"score\": 0.5}"));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_worker_applies_memory_limit() {
    let tmp = tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("evaluator.py"), "ulimit -v\n").unwrap();
    let mut action = run_action();
    action["memory_limit"] = json!(64);
    let (url, state) = start(vec![(StatusCode::OK, action)]).await;
    let client = SandboxClient::new(&url, fast_policy()).unwrap();

    main_loop(&client, Arc::new(sh_evaluator(&repo, tmp.path())))
        .await
        .unwrap();

    let received = state.received.lock().unwrap().clone();
    assert_eq!(received[1]["result"], json!("65536"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_for_url() {
    let (url, _state) = start(Vec::new()).await;
    assert!(
        wait_for_url(
            &format!("{}/health", url),
            Duration::from_secs(5),
            Duration::from_millis(50)
        )
        .await
    );
    assert!(
        !wait_for_url(
            &format!("{}/missing", url),
            Duration::from_millis(200),
            Duration::from_millis(50)
        )
        .await
    );
}

fn job(code: &[(&str, &str)], args: Vec<Value>) -> RunJob {
    RunJob {
        code: code
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        timeout: Duration::from_secs(10),
        memory_limit_mb: None,
        args,
        evaluation_script: "evaluator.py".to_string(),
    }
}

fn sh_evaluator(repo: &Path, work_root: &Path) -> PythonEvaluator {
    PythonEvaluator::new(repo, work_root).with_interpreter("sh")
}

fn shell_repo(root: &Path) {
    fs::create_dir_all(root).unwrap();
    fs::write(
        root.join("evaluator.py"),
        ". ./solution.py\necho working\necho \"score=$SCORE args=$*\"\n",
    )
    .unwrap();
    fs::write(root.join("solution.py"), "SCORE=1\n").unwrap();
}

#[test]
fn test_evaluator_uses_overlay_code() {
    let tmp = tempdir().unwrap();
    let repo = tmp.path().join("repo");
    shell_repo(&repo);
    let evaluator = sh_evaluator(&repo, tmp.path());

    let result = evaluator
        .execute(&job(
            &[("solution.py", "SCORE=42\n"), ("evaluator.py", "echo ignored\n")],
            vec![json!("a"), json!(3)],
        ))
        .unwrap();

    assert_eq!(result, EvalResult::Line("score=42 args=\"a\" 3".to_string()));
    assert_eq!(fs::read_to_string(repo.join("solution.py")).unwrap(), "SCORE=1\n");
}

#[test]
fn test_evaluator_copy_mode() {
    let tmp = tempdir().unwrap();
    let repo = tmp.path().join("repo");
    shell_repo(&repo);
    let evaluator = sh_evaluator(&repo, tmp.path()).with_copy_mode(&["^data$".to_string()]);

    let result = evaluator
        .execute(&job(&[("solution.py", "SCORE=7\n")], Vec::new()))
        .unwrap();
    assert_eq!(result, EvalResult::Line("score=7 args=".to_string()));
}

#[test]
fn test_evaluator_checkpoint_fallback() {
    let tmp = tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    fs::write(
        repo.join("evaluator.py"),
        "echo '{\"partial\": 0.5}' > checkpoint.json\nexit 3\n",
    )
    .unwrap();

    let result = sh_evaluator(&repo, tmp.path())
        .execute(&job(&[], Vec::new()))
        .unwrap();
    assert_eq!(result, EvalResult::checkpoint(json!({"partial": 0.5})));
}

#[test]
fn test_evaluator_failure_without_checkpoint() {
    let tmp = tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("evaluator.py"), "printf boom >&2\nexit 1\n").unwrap();

    let err = sh_evaluator(&repo, tmp.path())
        .execute(&job(&[], Vec::new()))
        .unwrap_err();
    assert_eq!(err.to_string(), "Execution failed: Error: boom");
}

#[test]
fn test_evaluator_timeout_kills_helpers() {
    let tmp = tempdir().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("evaluator.py"), "sleep 5 &\nsleep 5\necho late\n").unwrap();
    let mut timed = job(&[], Vec::new());
    timed.timeout = Duration::from_millis(300);

    let start = Instant::now();
    let err = sh_evaluator(&repo, tmp.path()).execute(&timed).unwrap_err();
    assert_eq!(err.to_string(), "Execution failed: Timeout");
    assert!(start.elapsed() < Duration::from_secs(2));
}
