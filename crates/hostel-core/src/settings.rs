use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::session_store::default_state_dir;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Headless hostel management dashboard
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hostel-monitor",
    about = "Headless hostel management dashboard",
    version
)]
pub struct Settings {
    /// Base URL of the auth/application API
    #[arg(long, env = "HOSTEL_API_URL", default_value = "http://localhost:3001")]
    pub api_url: String,

    /// Base URL of the hosted data API (REST and realtime)
    #[arg(long, env = "HOSTEL_DATA_URL")]
    pub data_url: Option<String>,

    /// Publishable API key sent to the hosted data API
    #[arg(long, env = "HOSTEL_ANON_KEY", hide_env_values = true)]
    pub anon_key: Option<String>,

    /// Account email used when no stored session exists
    #[arg(long, env = "HOSTEL_EMAIL")]
    pub email: Option<String>,

    /// Account password used when no stored session exists
    #[arg(long, env = "HOSTEL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// View to run
    #[arg(long, default_value = "dashboard", value_parser = ["dashboard", "students", "entries", "alerts"])]
    pub view: String,

    /// Timezone used for "today" (auto-detected if not specified)
    #[arg(long, default_value = "auto")]
    pub timezone: String,

    /// Number of most recent entry logs kept live
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub recent_limit: u32,

    /// Rows requested per page for full-list reads
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub page_size: u32,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Sign out, forget the stored session and exit
    #[arg(long)]
    pub logout: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.hostel-monitor/last_used.json`.
///
/// Only non-secret values are stored.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl LastUsedParams {
    /// Return the default path to the persisted config file.
    pub fn config_path() -> PathBuf {
        default_state_dir().join("last_used.json")
    }

    /// Load persisted params from an explicit path.
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &std::path::Path) -> Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, merge with last-used params where no explicit CLI
    /// value was provided, and persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Full implementation: accepts args and an explicit config path so that
    /// tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(
        args: Vec<std::ffi::OsString>,
        config_path: &std::path::Path,
    ) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            if let Err(e) = LastUsedParams::clear_at(config_path) {
                tracing::warn!(error = %e, "could not clear saved configuration");
            }
            return settings.apply_debug_flag();
        }

        let last = LastUsedParams::load_from(config_path);

        // CLI (or env) always wins over persisted values.
        if !is_arg_explicitly_set(&matches, "view") {
            if let Some(v) = last.view {
                settings.view = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "timezone") {
            if let Some(v) = last.timezone {
                settings.timezone = v;
            }
        }
        if settings.email.is_none() {
            settings.email = last.email;
        }

        settings = settings.apply_debug_flag();

        let params = LastUsedParams::from(&settings);
        if let Err(e) = params.save_to(config_path) {
            tracing::debug!(error = %e, "could not persist last-used parameters");
        }

        settings
    }

    /// `--debug` overrides log level.
    fn apply_debug_flag(mut self) -> Self {
        if self.debug {
            self.log_level = "DEBUG".to_string();
        }
        self
    }

    /// Data API base URL, falling back to the application API.
    pub fn data_base_url(&self) -> &str {
        self.data_url.as_deref().unwrap_or(&self.api_url)
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            view: Some(s.view.clone()),
            timezone: Some(s.timezone.clone()),
            email: s.email.clone(),
        }
    }
}

/// Returns `true` when `name` was supplied explicitly on the command line.
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tmp_config_path(tmp: &TempDir) -> PathBuf {
        tmp.path().join("last_used.json")
    }

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::parse_from(["hostel-monitor"]);

        assert_eq!(settings.view, "dashboard");
        assert_eq!(settings.timezone, "auto");
        assert_eq!(settings.recent_limit, 100);
        assert_eq!(settings.page_size, 100);
        assert_eq!(settings.log_level, "INFO");
        assert!(settings.log_file.is_none());
        assert!(!settings.debug);
        assert!(!settings.logout);
        assert!(!settings.clear);
    }

    #[test]
    fn test_data_base_url_falls_back_to_api_url() {
        let settings = Settings::parse_from(["hostel-monitor", "--api-url", "http://api.local"]);
        if settings.data_url.is_none() {
            assert_eq!(settings.data_base_url(), "http://api.local");
        }

        let settings = Settings::parse_from([
            "hostel-monitor",
            "--data-url",
            "https://project.supabase.co",
        ]);
        assert_eq!(settings.data_base_url(), "https://project.supabase.co");
    }

    #[test]
    fn test_settings_rejects_unknown_view() {
        let result = Settings::try_parse_from(["hostel-monitor", "--view", "rooms"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_last_used_params_save_load() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        let params = LastUsedParams {
            view: Some("alerts".to_string()),
            timezone: Some("Asia/Kolkata".to_string()),
            email: Some("warden@hostel.edu".to_string()),
        };
        params.save_to(&path).expect("save");

        let loaded = LastUsedParams::load_from(&path);
        assert_eq!(loaded.view.as_deref(), Some("alerts"));
        assert_eq!(loaded.timezone.as_deref(), Some("Asia/Kolkata"));
        assert_eq!(loaded.email.as_deref(), Some("warden@hostel.edu"));
    }

    #[test]
    fn test_load_with_last_used_merges_persisted_view() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams {
            view: Some("students".to_string()),
            ..Default::default()
        }
        .save_to(&config_path)
        .expect("save");

        let settings =
            Settings::load_with_last_used_impl(vec!["hostel-monitor".into()], &config_path);
        assert_eq!(settings.view, "students");
    }

    #[test]
    fn test_load_with_last_used_cli_overrides_persisted() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams {
            view: Some("students".to_string()),
            ..Default::default()
        }
        .save_to(&config_path)
        .expect("save");

        let settings = Settings::load_with_last_used_impl(
            vec!["hostel-monitor".into(), "--view".into(), "alerts".into()],
            &config_path,
        );
        assert_eq!(settings.view, "alerts");
    }

    #[test]
    fn test_load_with_last_used_never_persists_password() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        Settings::load_with_last_used_impl(
            vec![
                "hostel-monitor".into(),
                "--email".into(),
                "warden@hostel.edu".into(),
                "--password".into(),
                "hunter22hunter".into(),
            ],
            &config_path,
        );

        let raw = std::fs::read_to_string(&config_path).expect("persisted");
        assert!(raw.contains("warden@hostel.edu"));
        assert!(!raw.contains("hunter22hunter"));
    }

    #[test]
    fn test_load_with_last_used_clear_removes_file() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams::default().save_to(&config_path).expect("save");

        Settings::load_with_last_used_impl(
            vec!["hostel-monitor".into(), "--clear".into()],
            &config_path,
        );

        assert!(!config_path.exists(), "file must be gone after --clear");
    }

    #[test]
    fn test_load_with_last_used_debug_overrides_log_level() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = Settings::load_with_last_used_impl(
            vec!["hostel-monitor".into(), "--debug".into()],
            &tmp_config_path(&tmp),
        );
        assert_eq!(settings.log_level, "DEBUG");
    }
}
