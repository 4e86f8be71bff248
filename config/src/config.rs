use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::settings::QueueSettings;

pub const DEFAULT_CONFIG_FILENAME: &str = "oxmq.toml";
pub const ENV_CONFIG_KEY: &str = "OXMQ_CONFIG";

pub fn resolve_config_source(config_path: Option<&str>) -> (Option<String>, String) {
    if let Some(path) = config_path {
        return (Some(path.to_string()), "--config parameter".to_string());
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_KEY)
        && !env_path.is_empty()
    {
        return (Some(env_path), format!("{ENV_CONFIG_KEY} env var"));
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
    if default_path.is_file() {
        return (
            Some(default_path.to_string_lossy().to_string()),
            format!("{DEFAULT_CONFIG_FILENAME} in cwd"),
        );
    }

    (None, "not found".to_string())
}

pub fn load_toml_settings(config_path: Option<&str>) -> Result<QueueSettings> {
    dotenvy::dotenv().ok();

    let (path, _) = resolve_config_source(config_path);
    let path = path.ok_or_else(|| {
        anyhow::anyhow!(
            "oxmq config not found. Provide --config, set OXMQ_CONFIG, or add oxmq.toml."
        )
    })?;

    let payload = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config at {path}"))?;
    let toml_value: toml::Value =
        toml::from_str(&payload).with_context(|| format!("failed to parse TOML at {path}"))?;
    let mut json_value =
        serde_json::to_value(toml_value).context("failed to convert TOML to JSON")?;

    json_value = normalize_toml_payload(json_value)?;
    let merged = deep_merge(json_value, env_overrides()?);

    let settings: QueueSettings = serde_json::from_value(merged).context("invalid oxmq config")?;
    Ok(settings)
}

fn normalize_toml_payload(mut payload: Value) -> Result<Value> {
    if let Value::Object(mut map) = payload {
        if let Some(scoped) = map.remove("oxmq") {
            payload = scoped;
        } else {
            payload = Value::Object(map);
        }
    }

    match payload {
        Value::Object(map) => Ok(Value::Object(map)),
        _ => Err(anyhow::anyhow!("oxmq config must be a TOML table")),
    }
}

fn env_overrides() -> Result<Value> {
    let mut payload = Map::new();

    set_env_string(&mut payload, "redis_dsn", "OXMQ_REDIS_DSN");
    set_env_string(&mut payload, "prefix", "OXMQ_PREFIX");
    set_env_string(&mut payload, "queue_name", "OXMQ_QUEUE_NAME");
    set_env_int(&mut payload, "max_len_events", "OXMQ_MAX_LEN_EVENTS")?;
    set_env_int(&mut payload, "concurrency", "OXMQ_CONCURRENCY")?;
    set_env_int(&mut payload, "default_attempts", "OXMQ_DEFAULT_ATTEMPTS")?;
    set_env_int(
        &mut payload,
        "default_lock_duration_ms",
        "OXMQ_DEFAULT_LOCK_DURATION_MS",
    )?;
    set_env_int(
        &mut payload,
        "default_limiter_duration_ms",
        "OXMQ_DEFAULT_LIMITER_DURATION_MS",
    )?;

    Ok(Value::Object(payload))
}

fn set_env_string(payload: &mut Map<String, Value>, field: &str, env_key: &str) {
    if let Ok(value) = std::env::var(env_key)
        && !value.is_empty()
    {
        payload.insert(field.to_string(), Value::String(value));
    }
}

fn set_env_int(payload: &mut Map<String, Value>, field: &str, env_key: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env_key)
        && !value.is_empty()
    {
        let parsed: i64 = value
            .parse()
            .with_context(|| format!("{env_key} must be an integer, got {value:?}"))?;
        payload.insert(field.to_string(), Value::Number(parsed.into()));
    }
    Ok(())
}

fn deep_merge(base: Value, overrides: Value) -> Value {
    match (base, overrides) {
        (Value::Object(mut base_map), Value::Object(override_map)) => {
            for (key, value) in override_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overrides) => overrides,
    }
}
