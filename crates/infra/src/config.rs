//! Configuration loading and representation.
//!
//! Everything comes from environment variables, with a `.env` file in the
//! working directory filling in variables the process does not already set.
//! Unset or blank variables take their defaults, as do numbers and booleans
//! that fail to parse. Validation collects every problem before failing so one
//! run reports them all.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use voice_inbox_core::{InboxError, RetryPolicy};

const APP_DIR: &str = "voice-inbox";
const DOTENV_FILE: &str = ".env";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    pub fn problems(&self) -> &[String] {
        match self {
            ConfigError::Invalid(problems) => problems,
        }
    }
}

impl From<ConfigError> for InboxError {
    fn from(err: ConfigError) -> Self {
        InboxError::Config(err.problems().join("; "))
    }
}

/// Process configuration, built once per invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub discord_bot_token: String,
    pub discord_api_base_url: String,
    pub channel_id: String,
    /// Deduplicated, in first-seen order.
    pub allowed_author_ids: Vec<String>,
    pub fetch_limit: u32,

    pub whisper_bin: String,
    pub whisper_model: String,
    pub whisper_language: String,
    pub whisper_timeout: Duration,
    pub ffmpeg_bin: String,

    pub obsidian_base_url: String,
    pub obsidian_api_key: String,
    pub obsidian_auth_header: String,
    pub obsidian_verify_tls: bool,
    pub vault_journal_dir: String,

    pub audio_retention_days: u32,
    pub transcript_retention_days: u32,
    pub max_retry_attempts: u32,
    pub retry_base_seconds: u64,
    pub retry_max_seconds: u64,

    pub state_db_path: PathBuf,
    pub audio_store_dir: PathBuf,
    pub lock_path: PathBuf,
}

// Keeps tokens out of accidental `{:?}` output.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_api_base_url", &self.discord_api_base_url)
            .field("channel_id", &self.channel_id)
            .field("allowed_author_ids", &self.allowed_author_ids)
            .field("fetch_limit", &self.fetch_limit)
            .field("obsidian_base_url", &self.obsidian_base_url)
            .field("vault_journal_dir", &self.vault_journal_dir)
            .field("state_db_path", &self.state_db_path)
            .field("audio_store_dir", &self.audio_store_dir)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup_and_file(|key| std::env::var(key).ok(), Path::new(DOTENV_FILE))
    }

    /// Build from `lookup`, falling back to the `.env` file at `path` for
    /// variables `lookup` does not know.
    pub fn from_lookup_and_file<F>(lookup: F, path: &Path) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = dotenv_vars(path);
        Self::from_lookup(|key| lookup(key).or_else(|| file.get(key).cloned()))
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let home = dirs::home_dir();
        let data_root = dirs::data_dir()
            .or_else(|| home.clone())
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        let mut problems = Vec::new();

        let state_db_path = expand_home(
            &env.string("STATE_DB_PATH", &data_root.join("state.db").to_string_lossy()),
            home.as_deref(),
        );
        let audio_store_dir = expand_home(
            &env.string("AUDIO_STORE_DIR", &data_root.join("audio").to_string_lossy()),
            home.as_deref(),
        );
        let lock_path = {
            let mut raw = state_db_path.clone().into_os_string();
            raw.push(".lock");
            PathBuf::from(raw)
        };

        let cfg = Config {
            discord_bot_token: env.string("DISCORD_BOT_TOKEN", ""),
            discord_api_base_url: env
                .string("DISCORD_API_BASE_URL", "https://discord.com/api/v10")
                .trim_end_matches('/')
                .to_string(),
            channel_id: env.string("VOICE_INBOX_CHANNEL_ID", ""),
            allowed_author_ids: parse_csv_set(&env.string("VOICE_INBOX_ALLOWED_AUTHOR_IDS", "")),
            fetch_limit: env.positive("DISCORD_FETCH_LIMIT", 100, &mut problems),

            whisper_bin: env.string("WHISPER_BIN", "whisper"),
            whisper_model: env.string("WHISPER_MODEL", "large-v3-turbo"),
            whisper_language: env.string("WHISPER_LANGUAGE", "ja"),
            whisper_timeout: Duration::from_secs(u64::from(env.positive(
                "WHISPER_TIMEOUT_SECONDS",
                600,
                &mut problems,
            ))),
            ffmpeg_bin: env.string("FFMPEG_BIN", "ffmpeg"),

            obsidian_base_url: env
                .string("OBSIDIAN_BASE_URL", "https://127.0.0.1:27124")
                .trim_end_matches('/')
                .to_string(),
            obsidian_api_key: env.string("OBSIDIAN_API_KEY", ""),
            obsidian_auth_header: env.string("OBSIDIAN_AUTH_HEADER", "Authorization"),
            obsidian_verify_tls: env.boolean("OBSIDIAN_VERIFY_TLS", false),
            vault_journal_dir: env
                .string("VAULT_JOURNAL_DIR", "01_Projects/Journal")
                .trim_matches('/')
                .to_string(),

            audio_retention_days: env.positive("AUDIO_RETENTION_DAYS", 14, &mut problems),
            transcript_retention_days: env.positive("TRANSCRIPT_RETENTION_DAYS", 7, &mut problems),
            max_retry_attempts: env.positive("MAX_RETRY_ATTEMPTS", 8, &mut problems),
            retry_base_seconds: u64::from(env.positive("RETRY_BASE_SECONDS", 300, &mut problems)),
            retry_max_seconds: u64::from(env.positive("RETRY_MAX_SECONDS", 86_400, &mut problems)),

            state_db_path,
            audio_store_dir,
            lock_path,
        };

        cfg.validate(&mut problems);
        if problems.is_empty() {
            Ok(cfg)
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    fn validate(&self, problems: &mut Vec<String>) {
        if self.discord_bot_token.is_empty() {
            problems.push("DISCORD_BOT_TOKEN is required".to_string());
        }
        if self.discord_api_base_url.is_empty() {
            problems.push("DISCORD_API_BASE_URL must not be empty".to_string());
        }
        if self.channel_id.is_empty() {
            problems.push("VOICE_INBOX_CHANNEL_ID is required".to_string());
        }
        if self.allowed_author_ids.is_empty() {
            problems.push(
                "VOICE_INBOX_ALLOWED_AUTHOR_IDS must include at least one author ID".to_string(),
            );
        }
        if self.obsidian_base_url.is_empty() {
            problems.push("OBSIDIAN_BASE_URL is required".to_string());
        }
        if self.obsidian_api_key.is_empty() {
            problems.push("OBSIDIAN_API_KEY is required".to_string());
        }
        if self.vault_journal_dir.is_empty() {
            problems.push("VAULT_JOURNAL_DIR must not be empty".to_string());
        }
        if self.retry_base_seconds > self.retry_max_seconds {
            problems.push("RETRY_BASE_SECONDS must be <= RETRY_MAX_SECONDS".to_string());
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_attempts,
            Duration::from_secs(self.retry_base_seconds),
            Duration::from_secs(self.retry_max_seconds),
        )
    }

    /// Values that must never appear in user-facing output.
    pub fn secrets(&self) -> Vec<String> {
        [&self.discord_bot_token, &self.obsidian_api_key]
            .into_iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    /// A strictly positive number; unparseable input falls back to `default`.
    fn positive(&self, key: &str, default: u32, problems: &mut Vec<String>) -> u32 {
        let value = self
            .raw(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(i64::from(default));
        match u32::try_from(value) {
            Ok(v) if v > 0 => v,
            _ => {
                problems.push(format!("{key} must be > 0"));
                default
            }
        }
    }

    fn boolean(&self, key: &str, default: bool) -> bool {
        match self.raw(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("1" | "t" | "true" | "yes" | "on") => true,
            Some("0" | "f" | "false" | "no" | "off") => false,
            _ => default,
        }
    }
}

fn parse_csv_set(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
    }
    out
}

fn expand_home(raw: &str, home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) if raw == "~" => home.to_path_buf(),
        Some(home) => match raw.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

/// `KEY=VALUE` pairs from a dotenv file. A missing file yields nothing and
/// malformed lines are skipped.
fn dotenv_vars(path: &Path) -> HashMap<String, String> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.flatten().collect(),
        Err(_) => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| map.get(key).cloned())
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DISCORD_BOT_TOKEN", "bot-token"),
            ("VOICE_INBOX_CHANNEL_ID", "123"),
            ("VOICE_INBOX_ALLOWED_AUTHOR_IDS", "42"),
            ("OBSIDIAN_API_KEY", "vault-key"),
            ("STATE_DB_PATH", "/tmp/voice-inbox/state.db"),
        ]
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = load(&required()).unwrap();
        assert_eq!(cfg.discord_api_base_url, "https://discord.com/api/v10");
        assert_eq!(cfg.fetch_limit, 100);
        assert_eq!(cfg.whisper_model, "large-v3-turbo");
        assert_eq!(cfg.whisper_language, "ja");
        assert_eq!(cfg.whisper_timeout, Duration::from_secs(600));
        assert_eq!(cfg.obsidian_auth_header, "Authorization");
        assert!(!cfg.obsidian_verify_tls);
        assert_eq!(cfg.vault_journal_dir, "01_Projects/Journal");
        assert_eq!((cfg.audio_retention_days, cfg.transcript_retention_days), (14, 7));
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.lock_path, PathBuf::from("/tmp/voice-inbox/state.db.lock"));
    }

    #[test]
    fn every_problem_is_reported() {
        let err = load(&[("RETRY_BASE_SECONDS", "900"), ("RETRY_MAX_SECONDS", "60")]).unwrap_err();
        let problems = err.problems();
        assert!(problems.iter().any(|p| p.contains("DISCORD_BOT_TOKEN")));
        assert!(problems.iter().any(|p| p.contains("VOICE_INBOX_CHANNEL_ID")));
        assert!(problems.iter().any(|p| p.contains("VOICE_INBOX_ALLOWED_AUTHOR_IDS")));
        assert!(problems.iter().any(|p| p.contains("OBSIDIAN_API_KEY")));
        assert!(problems.iter().any(|p| p.contains("RETRY_BASE_SECONDS must be <=")));
        assert_eq!(problems.len(), 5);
    }

    #[test]
    fn unparseable_numbers_fall_back_and_non_positive_are_rejected() {
        let mut vars = required();
        vars.push(("DISCORD_FETCH_LIMIT", "lots"));
        vars.push(("OBSIDIAN_VERIFY_TLS", "maybe"));
        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.fetch_limit, 100);
        assert!(!cfg.obsidian_verify_tls);

        let mut vars = required();
        vars.push(("MAX_RETRY_ATTEMPTS", "0"));
        let err = load(&vars).unwrap_err();
        assert_eq!(err.problems(), ["MAX_RETRY_ATTEMPTS must be > 0".to_string()]);
    }

    #[test]
    fn author_ids_are_trimmed_and_deduplicated() {
        let mut vars = required();
        vars.retain(|(k, _)| *k != "VOICE_INBOX_ALLOWED_AUTHOR_IDS");
        vars.push(("VOICE_INBOX_ALLOWED_AUTHOR_IDS", " 7, 8 ,7,, 9 "));
        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.allowed_author_ids, vec!["7", "8", "9"]);
    }

    #[test]
    fn home_prefix_is_expanded() {
        let home = PathBuf::from("/home/me");
        assert_eq!(expand_home("~", Some(&home)), home);
        assert_eq!(expand_home("~/x/state.db", Some(&home)), home.join("x/state.db"));
        assert_eq!(expand_home("/abs/~/x", Some(&home)), PathBuf::from("/abs/~/x"));
    }

    #[test]
    fn urls_and_journal_dir_are_normalized() {
        let mut vars = required();
        vars.push(("DISCORD_API_BASE_URL", "http://localhost:9000/api/"));
        vars.push(("VAULT_JOURNAL_DIR", "/Daily/Journal/"));
        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.discord_api_base_url, "http://localhost:9000/api");
        assert_eq!(cfg.vault_journal_dir, "Daily/Journal");
        assert_eq!(cfg.secrets(), vec!["bot-token".to_string(), "vault-key".to_string()]);
    }

    #[test]
    fn config_error_maps_to_inbox_config_error() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(InboxError::from(err), InboxError::Config(_)));
    }

    #[test]
    fn dotenv_file_fills_unset_variables_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# scheduled runs do not inherit the login shell\n\
             DISCORD_BOT_TOKEN=file-token\n\
             export VOICE_INBOX_CHANNEL_ID=555\n\
             VOICE_INBOX_ALLOWED_AUTHOR_IDS=42\n\
             OBSIDIAN_API_KEY=file-key\n\
             DISCORD_FETCH_LIMIT=25\n",
        )
        .unwrap();

        let process: HashMap<String, String> = [
            ("DISCORD_BOT_TOKEN", "process-token"),
            ("STATE_DB_PATH", "/tmp/voice-inbox/state.db"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let cfg = Config::from_lookup_and_file(|key| process.get(key).cloned(), &path).unwrap();

        assert_eq!(cfg.discord_bot_token, "process-token");
        assert_eq!(cfg.channel_id, "555");
        assert_eq!(cfg.obsidian_api_key, "file-key");
        assert_eq!(cfg.fetch_limit, 25);
    }

    #[test]
    fn missing_dotenv_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let vars: HashMap<String, String> = required()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let cfg =
            Config::from_lookup_and_file(|key| vars.get(key).cloned(), &dir.path().join(".env"))
                .unwrap();
        assert_eq!(cfg.channel_id, "123");
    }
}
