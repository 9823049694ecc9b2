use super::models::Config;
use config::{ConfigError, Environment, File, Map};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MEDIAOPS_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/mediaops.toml";
const ENV_PREFIX: &str = "MEDIAOPS";
const ENV_SEPARATOR: &str = "__";

/// Keys given as space separated lists in the environment
const ENV_LIST_KEYS: &[&str] = &["maintenance.dependency_update_command"];

/// Read `.env`, then layer the resolved TOML file and the environment
pub fn load() -> Result<Config, ConfigError> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env"),
    }

    load_from_sources(config_path())
}

/// `$MEDIAOPS_CONFIG`, else `config/mediaops.toml`
fn config_path() -> PathBuf {
    env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Struct defaults, then `config_path` if present, then `MEDIAOPS__*`
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    layered(config_path, None)
}

/// `env_source` replaces the process environment when given
fn layered(
    config_path: PathBuf,
    env_source: Option<Map<String, String>>,
) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Loading configuration file");
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            path = %config_path.display(),
            "Configuration file not found, using defaults and environment"
        );
    }

    builder = builder.add_source(environment(env_source));
    builder.build()?.try_deserialize()
}

/// MEDIAOPS__SCHEDULER__TICK_MS=250 -> scheduler.tick_ms
fn environment(source: Option<Map<String, String>>) -> Environment {
    let mut environment = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .list_separator(" ")
        .source(source);
    for key in ENV_LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }
    environment
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = layered(config_path, env_of(&[])).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8000");
        assert_eq!(config.scheduler.periodic.len(), 3);
        assert_eq!(config.workers.prefetch, 1);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
data_dir = "/var/lib/mediaops"

[health]
probe_timeout_ms = 1500
disk_path = "/srv/media"

[scheduler.routes]
"downloads.transcode" = "media"

[[scheduler.periodic]]
name = "cache-expiry-sweep"
task_id = "downloads.clear_expired_cache"
schedule_seconds = 900

[[workers.pools]]
queue = "media"
concurrency = 4

[[workers.pools]]
queue = "default"

[maintenance]
dependency_update_command = ["pip", "install", "-U", "yt-dlp"]
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = layered(config_path, env_of(&[])).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.queue_path(), PathBuf::from("/var/lib/mediaops/queue"));
        assert_eq!(config.health.probe_timeout_ms, 1500);
        assert_eq!(config.health.disk_path, Some(PathBuf::from("/srv/media")));
        assert_eq!(config.scheduler.routes["downloads.transcode"], "media");
        assert_eq!(config.scheduler.periodic.len(), 1);
        assert_eq!(config.scheduler.periodic[0].schedule_seconds, 900.0);
        assert_eq!(config.workers.pools.len(), 2);
        assert_eq!(config.workers.pools[1].concurrency, 1);
        assert_eq!(config.maintenance.dependency_update_command.len(), 4);
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(&config_path, "[workers]\nprefetch = 3\n").unwrap();

        let config = layered(
            config_path,
            env_of(&[
                ("MEDIAOPS__WORKERS__PREFETCH", "2"),
                ("MEDIAOPS__SCHEDULER__TICK_MS", "250"),
                ("MEDIAOPS__MAINTENANCE__DEPENDENCY_UPDATE_COMMAND", "pip install -U yt-dlp"),
                ("OTHERAPP__WORKERS__PREFETCH", "9"),
            ]),
        )
        .unwrap();

        assert_eq!(config.workers.prefetch, 2);
        assert_eq!(config.scheduler.tick_ms, 250);
        assert_eq!(
            config.maintenance.dependency_update_command,
            vec!["pip", "install", "-U", "yt-dlp"]
        );
    }
}
