//! Runs evaluation jobs against an overlay of the sandbox repository.

use crate::core::error::HiveError;
use crate::core::exec;
use crate::plugins::overlay;
use crate::plugins::sandbox::{EvalResult, Executor, RunJob};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory where the repository is mounted inside sandbox images.
pub const REPO_DIR: &str = "/app/repo";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

#[derive(Debug, Clone)]
pub struct PythonEvaluator {
    pub repo_dir: PathBuf,
    pub work_root: PathBuf,
    pub interpreter: String,
    /// When non-empty the repository is copied instead of symlinked, except
    /// for paths matching these patterns.
    pub copy_symlink_patterns: Vec<String>,
}

impl PythonEvaluator {
    pub fn new(repo_dir: &Path, work_root: &Path) -> Self {
        Self {
            repo_dir: repo_dir.to_path_buf(),
            work_root: work_root.to_path_buf(),
            interpreter: "python".to_string(),
            copy_symlink_patterns: Vec::new(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: &str) -> Self {
        self.interpreter = interpreter.to_string();
        self
    }

    pub fn with_copy_mode(mut self, symlink_patterns: &[String]) -> Self {
        self.copy_symlink_patterns = symlink_patterns.to_vec();
        self
    }

    fn prepare_workdir(
        &self,
        repo_dir: &Path,
        workdir: &Path,
        code: &BTreeMap<String, String>,
    ) -> Result<(), HiveError> {
        if self.copy_symlink_patterns.is_empty() {
            return overlay::mirror_overlay_and_overwrite(repo_dir, workdir, code);
        }
        let patterns: Vec<&str> = self
            .copy_symlink_patterns
            .iter()
            .map(String::as_str)
            .collect();
        overlay::mirror_with_symlink_exceptions(repo_dir, workdir, &patterns, &[])?;
        overlay::apply_code_overlays(workdir, code)
    }
}

impl Executor for PythonEvaluator {
    fn execute(&self, job: &RunJob) -> Result<EvalResult, HiveError> {
        let temp = tempfile::Builder::new()
            .prefix("hive-eval-")
            .tempdir_in(&self.work_root)?;
        let workdir = temp.path().join("repo");
        let repo_dir = self.repo_dir.canonicalize()?;

        // The evaluation script always comes from the repository, never from the job.
        let mut code = job.code.clone();
        let script_path = repo_dir.join(overlay::sanitize_relative(&job.evaluation_script)?);
        let script = fs::read_to_string(&script_path).map_err(|err| {
            HiveError::ExecutionError(format!(
                "Execution failed: cannot read evaluation script {}: {}",
                script_path.display(),
                err
            ))
        })?;
        code.insert(job.evaluation_script.clone(), script);

        self.prepare_workdir(&repo_dir, &workdir, &code)?;

        let mut argv = vec![self.interpreter.clone(), job.evaluation_script.clone()];
        argv.extend(job.args.iter().map(format_arg));

        match exec::run_command(&argv, &workdir, job.timeout, job.memory_limit_mb) {
            Ok(line) => Ok(EvalResult::Line(line)),
            Err(HiveError::ExecutionError(message)) => {
                tracing::info!(
                    "Run command failed: {}. Attempting to read checkpoint data.",
                    message
                );
                match read_checkpoint(&workdir) {
                    Some(output) => Ok(EvalResult::checkpoint(output)),
                    None => {
                        tracing::info!("No checkpoint data. Returning original error.");
                        Err(HiveError::ExecutionError(format!(
                            "Execution failed: {}",
                            message
                        )))
                    }
                }
            }
            Err(other) => Err(other),
        }
    }
}

/// Strings are wrapped in double quotes; everything else is passed as JSON text.
pub fn format_arg(arg: &Value) -> String {
    match arg {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}

/// Structured checkpoint data when it is JSON, plain text otherwise.
fn parse_output(line: &str) -> Value {
    serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
}

fn read_checkpoint(workdir: &Path) -> Option<Value> {
    let content = fs::read_to_string(workdir.join(CHECKPOINT_FILE)).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(parse_output(trimmed))
}
