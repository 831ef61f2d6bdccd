//! Sandbox image builds (local `docker buildx` or Google Cloud Build) and
//! image cleanup.

use crate::core::config::SandboxConfig;
use crate::core::error::HiveError;
use crate::core::{exec, logging};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CLOUD_BUILD_FILE: &str = "cloudbuild.yaml";

#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuild {
    pub image: String,
    pub platforms: String,
    pub context: PathBuf,
    pub dockerfile: String,
    pub push: bool,
    pub build_args: BTreeMap<String, String>,
    /// Environment variable forwarded as a BuildKit secret with the same id.
    pub build_secret: Option<String>,
}

impl ImageBuild {
    pub fn new(image: &str, context: &Path) -> Self {
        Self {
            image: image.to_string(),
            platforms: "linux/amd64,linux/arm64".to_string(),
            context: context.to_path_buf(),
            dockerfile: "Dockerfile".to_string(),
            push: false,
            build_args: BTreeMap::new(),
            build_secret: None,
        }
    }

    pub fn from_sandbox(image: &str, context: &Path, sandbox: &SandboxConfig) -> Self {
        Self {
            image: image.to_string(),
            platforms: sandbox.platforms.clone(),
            context: context.to_path_buf(),
            dockerfile: sandbox.dockerfile.clone(),
            push: sandbox.push,
            build_args: sandbox.build_args.clone(),
            build_secret: sandbox.build_secret.clone(),
        }
    }

    /// Arguments to `docker`.
    pub fn command(&self) -> Vec<String> {
        let mut args = vec![
            "buildx".to_string(),
            "build".to_string(),
            "--platform".to_string(),
            self.platforms.clone(),
            "--file".to_string(),
            self.dockerfile.clone(),
            "--tag".to_string(),
            self.image.clone(),
            "--load".to_string(),
        ];
        if self.push {
            args.push("--push".to_string());
        }
        for (key, value) in &self.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(secret) = &self.build_secret {
            args.push("--secret".to_string());
            args.push(format!("id={},env={}", secret, secret));
        }
        args.push(self.context.to_string_lossy().into_owned());
        args
    }
}

/// Build the image locally. Output is streamed when debug logging is on.
pub fn build_image(build: &ImageBuild) -> Result<(), HiveError> {
    if let Some(secret) = &build.build_secret {
        if std::env::var_os(secret).is_none() {
            return Err(HiveError::ValidationError(format!(
                "build secret '{}' is not set; export it before building (see `hive docs show build-secrets`)",
                secret
            )));
        }
    }

    let args = build.command();
    tracing::info!("Image build command: {}", exec::render_command("docker", &args));

    if logging::debug_enabled() {
        exec::run_tool_streamed("docker", &args, None)
    } else {
        match exec::run_tool("docker", &args, None) {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::error!("Build STDERR:\n{}", err);
                Err(err)
            }
        }
    }
}

pub fn cloud_build_yaml(image: &str) -> String {
    format!(
        "steps:\n\
         \x20 - name: 'gcr.io/cloud-builders/docker'\n\
         \x20   args: ['build', '-t', '{image}', '.']\n\
         \x20   env:\n\
         \x20     - 'DOCKER_BUILDKIT=1'\n\
         images:\n\
         \x20 - '{image}'\n"
    )
}

/// Build the image in Google Cloud Build and push it to the registry.
pub fn build_image_in_cloud(image: &str, context: &Path) -> Result<(), HiveError> {
    let yaml_path = context.join(CLOUD_BUILD_FILE);
    fs::write(&yaml_path, cloud_build_yaml(image))?;

    let args = vec![
        "builds".to_string(),
        "submit".to_string(),
        "--config".to_string(),
        yaml_path.to_string_lossy().into_owned(),
        ".".to_string(),
    ];
    tracing::info!("Cloud image build command: {}", exec::render_command("gcloud", &args));
    exec::run_tool("gcloud", &args, Some(context)).map_err(|err| {
        tracing::error!("Build STDERR:\n{}", err);
        err
    })?;
    Ok(())
}

/// `<repository>:<experiment>-<version>`
pub fn image_reference(repository: &str, experiment: &str, version: &str) -> String {
    let short: String = version.chars().take(7).collect();
    format!("{}:{}-{}", repository.trim_end_matches('/'), experiment, short)
}

/// Stop and remove every container started from `image`, then remove the
/// image in the background.
pub fn stop_and_remove_image(image: &str) -> Result<(), HiveError> {
    let containers = exec::tool_output(
        "docker",
        &[
            "ps".to_string(),
            "-q".to_string(),
            "--filter".to_string(),
            format!("ancestor={}", image),
        ],
        None,
    )?;

    for container_id in containers.lines().map(str::trim).filter(|l| !l.is_empty()) {
        for action in ["stop", "rm"] {
            if let Err(err) =
                exec::run_tool("docker", &[action.to_string(), container_id.to_string()], None)
            {
                tracing::debug!(container = container_id, action, error = %err, "ignored");
            }
        }
    }

    exec::spawn_detached("docker", &["rmi".to_string(), image.to_string()])
}
