//! Deployment platforms.
//!
//! Kubernetes is driven through `kubectl`; Experiments are
//! `core.hiverge.ai/v1alpha1` custom resources and sandboxes are pods
//! labelled `app=hive-sandbox`.

use crate::core::config::{HiveConfig, PlatformType};
use crate::core::error::HiveError;
use crate::core::{exec, time};
use crate::plugins::{git, image, storage};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const EXPERIMENT_GROUP: &str = "core.hiverge.ai";
pub const EXPERIMENT_VERSION: &str = "v1alpha1";
pub const EXPERIMENT_RESOURCE: &str = "experiments.core.hiverge.ai";
pub const SANDBOX_LABEL: &str = "app=hive-sandbox";
pub const EXPERIMENT_LABEL: &str = "hiverge.ai/experiment-name";
pub const CREATED_AT_ANNOTATION: &str = "hiverge.ai/created-at";

/// Outcome of a successful `create`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedExperiment {
    pub name: String,
    pub code_version: String,
    pub image: Option<String>,
    pub uploaded: Vec<String>,
}

pub trait Platform {
    fn kind(&self) -> PlatformType;
    fn create(&self, name: &str, config: &HiveConfig) -> Result<CreatedExperiment, HiveError>;
    fn delete(&self, name: &str) -> Result<(), HiveError>;
    fn login(&self) -> Result<(), HiveError>;
    fn list_experiments(&self) -> Result<Vec<String>, HiveError>;
    fn list_sandboxes(&self, experiment: Option<&str>) -> Result<Vec<String>, HiveError>;
    fn logs(&self, sandbox: &str, follow: bool, tail: Option<u32>) -> Result<(), HiveError>;
}

pub fn for_config(kind: PlatformType, config: &HiveConfig) -> Box<dyn Platform> {
    match kind {
        PlatformType::K8s => Box::new(K8sPlatform::from_config(config)),
        PlatformType::OnPrem => Box::new(OnPremPlatform),
    }
}

// ===== Kubernetes =====

#[derive(Debug, Clone)]
pub struct K8sPlatform {
    pub namespace: String,
    token: Option<String>,
    /// Bound on read-only queries (completion uses a short one).
    pub query_timeout: Duration,
}

impl K8sPlatform {
    pub fn from_config(config: &HiveConfig) -> Self {
        let token = config.token_path.as_ref().and_then(|path| {
            fs::read_to_string(path)
                .map(|t| t.trim().to_string())
                .map_err(|err| {
                    tracing::warn!(path = %path.display(), error = %err, "cannot read token");
                })
                .ok()
        });
        Self {
            namespace: config.namespace.clone(),
            token,
            query_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Common `kubectl` flags followed by `args`.
    pub fn kubectl_args(&self, args: &[&str]) -> Vec<String> {
        let mut full = vec!["--namespace".to_string(), self.namespace.clone()];
        if let Some(token) = &self.token {
            full.push("--token".to_string());
            full.push(token.clone());
        }
        full.extend(args.iter().map(|s| s.to_string()));
        full
    }

    fn query_json(&self, args: &[&str]) -> Result<Value, HiveError> {
        let mut argv = vec!["kubectl".to_string()];
        argv.extend(self.kubectl_args(args));
        let captured = exec::run_bounded(&argv, Path::new("."), self.query_timeout, None)?;
        if !captured.status.success() {
            return Err(HiveError::tool("kubectl", captured.stderr.trim().to_string()));
        }
        Ok(serde_json::from_str(&captured.stdout)?)
    }

    fn apply(&self, manifest: &Value) -> Result<(), HiveError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("experiment.json");
        fs::write(&path, serde_json::to_string_pretty(manifest)?)?;
        let path = path.to_string_lossy().into_owned();
        exec::run_tool("kubectl", &self.kubectl_args(&["apply", "-f", &path]), None)?;
        Ok(())
    }
}

impl Platform for K8sPlatform {
    fn kind(&self) -> PlatformType {
        PlatformType::K8s
    }

    fn create(&self, name: &str, config: &HiveConfig) -> Result<CreatedExperiment, HiveError> {
        tracing::info!("Creating experiment '{}' on Kubernetes...", name);

        let build_dir = tempfile::Builder::new().prefix("hive-build-").tempdir()?;
        let code_version = git::get_codebase(&config.repo.source, build_dir.path(), &config.repo.branch)?;
        tracing::info!(version = %code_version, "codebase ready");

        let uploaded = if config.storage.upload {
            let files: Vec<String> = storage::parse_files_and_ranges(&config.repo.evolve_files_and_ranges)?
                .into_keys()
                .collect();
            storage::upload_directory(build_dir.path(), &files, name, &config.storage.bucket)?
        } else {
            Vec::new()
        };

        let image_ref = match &config.sandbox.image {
            Some(repository) => {
                let reference = image::image_reference(repository, name, &code_version);
                if config.sandbox.cloud_build {
                    image::build_image_in_cloud(&reference, build_dir.path())?;
                } else {
                    let build = image::ImageBuild::from_sandbox(&reference, build_dir.path(), &config.sandbox);
                    image::build_image(&build)?;
                    if build.push {
                        // The registry copy is what sandboxes pull.
                        if let Err(err) = image::stop_and_remove_image(&reference) {
                            tracing::warn!(image = %reference, error = %err, "local image cleanup failed");
                        }
                    }
                }
                Some(reference)
            }
            None => {
                tracing::warn!("'sandbox.image' is not set; skipping the image build");
                None
            }
        };

        let manifest = experiment_manifest(name, &self.namespace, config, &code_version, image_ref.as_deref())?;
        self.apply(&manifest)?;

        tracing::info!("Experiment '{}' created successfully on Kubernetes.", name);
        Ok(CreatedExperiment {
            name: name.to_string(),
            code_version,
            image: image_ref,
            uploaded,
        })
    }

    fn delete(&self, name: &str) -> Result<(), HiveError> {
        tracing::info!("Deleting experiment '{}' on Kubernetes...", name);
        exec::run_tool(
            "kubectl",
            &self.kubectl_args(&["delete", EXPERIMENT_RESOURCE, name]),
            None,
        )?;
        Ok(())
    }

    fn login(&self) -> Result<(), HiveError> {
        tracing::info!("Logging in to hive on Kubernetes (namespace {})...", self.namespace);
        let answer = exec::tool_output(
            "kubectl",
            &self.kubectl_args(&["auth", "can-i", "create", EXPERIMENT_RESOURCE]),
            None,
        )?;
        if answer.trim() != "yes" {
            return Err(HiveError::ValidationError(format!(
                "not allowed to create experiments in namespace '{}'",
                self.namespace
            )));
        }
        Ok(())
    }

    fn list_experiments(&self) -> Result<Vec<String>, HiveError> {
        let list = self.query_json(&["get", EXPERIMENT_RESOURCE, "-o", "json"])?;
        Ok(item_names(&list))
    }

    fn list_sandboxes(&self, experiment: Option<&str>) -> Result<Vec<String>, HiveError> {
        let selector = sandbox_selector(experiment);
        let list = self.query_json(&["get", "pods", "-l", &selector, "-o", "json"])?;
        Ok(item_names(&list))
    }

    fn logs(&self, sandbox: &str, follow: bool, tail: Option<u32>) -> Result<(), HiveError> {
        let tail_arg = tail.map(|n| format!("--tail={}", n));
        let mut args = vec!["logs", sandbox];
        if follow {
            args.push("--follow");
        }
        if let Some(tail_arg) = tail_arg.as_deref() {
            args.push(tail_arg);
        }
        exec::run_tool_streamed("kubectl", &self.kubectl_args(&args), None)
    }
}

pub fn sandbox_selector(experiment: Option<&str>) -> String {
    match experiment {
        Some(exp) if !exp.is_empty() => format!("{},{}={}", SANDBOX_LABEL, EXPERIMENT_LABEL, exp),
        _ => SANDBOX_LABEL.to_string(),
    }
}

/// `metadata.name` of every element in a Kubernetes list.
pub fn item_names(list: &Value) -> Vec<String> {
    list.get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.pointer("/metadata/name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn experiment_manifest(
    name: &str,
    namespace: &str,
    config: &HiveConfig,
    code_version: &str,
    image: Option<&str>,
) -> Result<Value, HiveError> {
    let evolve = storage::parse_files_and_ranges(&config.repo.evolve_files_and_ranges)?;
    Ok(json!({
        "apiVersion": format!("{}/{}", EXPERIMENT_GROUP, EXPERIMENT_VERSION),
        "kind": "Experiment",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { EXPERIMENT_LABEL: name },
            "annotations": { CREATED_AT_ANNOTATION: time::now_rfc3339() }
        },
        "spec": {
            "repo": {
                "source": config.repo.source,
                "branch": config.repo.branch,
                "codeVersion": code_version,
                "evaluationScript": config.repo.evaluation_script,
                "evolveFiles": evolve,
            },
            "sandbox": {
                "image": image,
                "replicas": config.sandbox.replicas,
            },
            "evaluator": {
                "timeout": config.evaluator.timeout,
                "memoryLimitMb": config.evaluator.memory_limit_mb,
            },
            "wandb": {
                "enabled": config.wandb.enabled,
                "project": config.wandb.project,
            }
        }
    }))
}

// ===== On-premise =====

#[derive(Debug, Clone, Copy, Default)]
pub struct OnPremPlatform;

impl Platform for OnPremPlatform {
    fn kind(&self) -> PlatformType {
        PlatformType::OnPrem
    }

    fn create(&self, name: &str, config: &HiveConfig) -> Result<CreatedExperiment, HiveError> {
        tracing::info!(
            "Creating hive on-premise with name: {} (repo {}, branch {})",
            name,
            config.repo.source,
            config.repo.branch
        );
        Ok(CreatedExperiment {
            name: name.to_string(),
            code_version: String::new(),
            image: None,
            uploaded: Vec::new(),
        })
    }

    fn delete(&self, name: &str) -> Result<(), HiveError> {
        tracing::info!("Deleting hive '{}' on-premise...", name);
        Ok(())
    }

    fn login(&self) -> Result<(), HiveError> {
        tracing::info!("Logging in to hive on-premise...");
        Ok(())
    }

    fn list_experiments(&self) -> Result<Vec<String>, HiveError> {
        tracing::info!("Showing experiments on-premise...");
        Ok(Vec::new())
    }

    fn list_sandboxes(&self, _experiment: Option<&str>) -> Result<Vec<String>, HiveError> {
        Ok(Vec::new())
    }

    fn logs(&self, sandbox: &str, _follow: bool, _tail: Option<u32>) -> Result<(), HiveError> {
        Err(HiveError::ValidationError(format!(
            "logs for '{}' are not available on-premise",
            sandbox
        )))
    }
}
