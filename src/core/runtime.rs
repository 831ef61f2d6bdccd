//! Experiment runtime identity.

use crate::core::error::HiveError;
use crate::core::time;

/// Kubernetes object names are DNS-1123 subdomains.
const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    /// `None` for commands that do not target a single experiment (listing, login).
    pub experiment_name: Option<String>,
}

impl Runtime {
    pub fn new(exp_name: Option<&str>) -> Result<Self, HiveError> {
        let experiment_name = match exp_name {
            Some(name) if !name.is_empty() => Some(generate_experiment_name(name)?),
            _ => None,
        };
        Ok(Self { experiment_name })
    }

    pub fn require_name(&self) -> Result<&str, HiveError> {
        self.experiment_name
            .as_deref()
            .ok_or_else(|| HiveError::ValidationError("experiment name is required".to_string()))
    }
}

/// Generate a unique experiment name based on `base_name`.
///
/// A name ending with `-` gets a 7-char hash of the current timestamp appended.
pub fn generate_experiment_name(base_name: &str) -> Result<String, HiveError> {
    with_suffix(base_name, time::now_2_hash)
}

pub fn generate_experiment_name_at(base_name: &str, epoch_secs: u64) -> Result<String, HiveError> {
    with_suffix(base_name, || time::timestamp_hash(epoch_secs))
}

fn with_suffix(base_name: &str, hash: impl FnOnce() -> String) -> Result<String, HiveError> {
    if base_name.chars().any(|c| c.is_uppercase()) {
        return Err(HiveError::ValidationError(
            "Experiment name must be lowercase.".to_string(),
        ));
    }

    let experiment_name = if base_name.ends_with('-') {
        format!("{}{}", base_name, hash())
    } else {
        base_name.to_string()
    };

    validate_object_name(&experiment_name)?;
    Ok(experiment_name)
}

pub fn validate_object_name(name: &str) -> Result<(), HiveError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let edges_ok = name
        .chars()
        .next()
        .zip(name.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);
    if name.len() > MAX_NAME_LEN || !valid_chars || !edges_ok {
        return Err(HiveError::ValidationError(format!(
            "'{}' is not a valid experiment name: use lowercase letters, digits, '-' or '.', \
             starting and ending with a letter or digit",
            name
        )));
    }
    Ok(())
}
