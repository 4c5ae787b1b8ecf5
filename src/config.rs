use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub bot_owner: Option<u64>,
    pub command_prefix: String,

    // Paths
    pub data_dir: PathBuf,
    pub sounds_dir: PathBuf,
    pub cache_dir: PathBuf,

    // Herramientas externas
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,

    // Texto a voz
    pub tts_endpoint: String,
    pub tts_api_key: Option<String>,
    pub tts_voice: String,
    pub lexicon_path: Option<PathBuf>,

    // Tiempos
    pub announce_grace_ms: u64,
    pub backlog_warning_secs: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.sounds_dir)?;
        std::fs::create_dir_all(&config.cache_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables arbitraria.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let data_dir: PathBuf = var("DATA_DIR").map_or(defaults.data_dir, PathBuf::from);

        Ok(Self {
            // Discord
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            bot_owner: var("BOT_OWNER")
                .map(|s| s.parse())
                .transpose()
                .context("BOT_OWNER debe ser un ID numérico")?,
            command_prefix: var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            // Paths (relativos a DATA_DIR por defecto)
            sounds_dir: var("SOUNDS_DIR").map_or_else(|| data_dir.join("sounds"), PathBuf::from),
            cache_dir: var("CACHE_DIR").map_or_else(|| data_dir.clone(), PathBuf::from),
            data_dir,

            // Herramientas externas
            ytdlp_path: var("YTDLP_PATH").map_or(defaults.ytdlp_path, PathBuf::from),
            ffmpeg_path: var("FFMPEG_PATH").map_or(defaults.ffmpeg_path, PathBuf::from),

            // Texto a voz
            tts_endpoint: var("TTS_ENDPOINT").unwrap_or(defaults.tts_endpoint),
            tts_api_key: var("TTS_API_KEY"),
            tts_voice: var("TTS_VOICE").unwrap_or(defaults.tts_voice),
            lexicon_path: var("LEXICON_PATH").map(PathBuf::from),

            // Tiempos
            announce_grace_ms: var("ANNOUNCE_GRACE_MS")
                .map_or(Ok(defaults.announce_grace_ms), |s| s.parse())
                .context("ANNOUNCE_GRACE_MS inválido")?,
            backlog_warning_secs: var("BACKLOG_WARNING_SECS")
                .map_or(Ok(defaults.backlog_warning_secs), |s| s.parse())
                .context("BACKLOG_WARNING_SECS inválido")?,
            http_timeout_secs: var("HTTP_TIMEOUT_SECS")
                .map_or(Ok(defaults.http_timeout_secs), |s| s.parse())
                .context("HTTP_TIMEOUT_SECS inválido")?,
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must not be empty
    /// - The command prefix must not be empty or contain whitespace
    /// - The TTS endpoint must be an absolute http(s) URL
    /// - The HTTP timeout must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.command_prefix.is_empty() || self.command_prefix.chars().any(char::is_whitespace) {
            anyhow::bail!("Command prefix must be non-empty without spaces, got: {:?}", self.command_prefix);
        }

        let endpoint = url::Url::parse(&self.tts_endpoint)
            .with_context(|| format!("Invalid TTS endpoint: {}", self.tts_endpoint))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!("TTS endpoint must be http or https, got: {}", endpoint.scheme());
        }

        if self.http_timeout_secs == 0 {
            anyhow::bail!("HTTP timeout must be greater than 0");
        }

        Ok(())
    }

    pub fn announce_grace(&self) -> Duration {
        Duration::from_millis(self.announce_grace_ms)
    }

    pub fn backlog_warning(&self) -> Duration {
        Duration::from_secs(self.backlog_warning_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token and the TTS API key.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: prefix '{}', owner {}\n  \
            Paths: sounds {}, cache {}\n  \
            Tools: yt-dlp {}, ffmpeg {}\n  \
            TTS: {} (voice {}, key {}, lexicon {})\n  \
            Timing: {}ms grace, {}s backlog warning, {}s http timeout",
            self.command_prefix,
            self.bot_owner.map_or("none".to_string(), |id| id.to_string()),
            self.sounds_dir.display(),
            self.cache_dir.display(),
            self.ytdlp_path.display(),
            self.ffmpeg_path.display(),
            self.tts_endpoint,
            self.tts_voice,
            if self.tts_api_key.is_some() { "set" } else { "none" },
            self.lexicon_path
                .as_ref()
                .map_or("none".to_string(), |path| path.display().to_string()),
            self.announce_grace_ms,
            self.backlog_warning_secs,
            self.http_timeout_secs,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (token has no default - must be provided)
            discord_token: String::new(),
            bot_owner: None,
            command_prefix: "!".to_string(),

            // Path defaults
            data_dir: "./data".into(),
            sounds_dir: "./data/sounds".into(),
            cache_dir: "./data".into(),

            // Tool defaults (resolved through PATH)
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),

            // TTS defaults
            tts_endpoint: "http://127.0.0.1:5002/api/tts".to_string(),
            tts_api_key: None,
            tts_voice: "en-US".to_string(),
            lexicon_path: None,

            // Timing defaults
            announce_grace_ms: 1000,
            backlog_warning_secs: 60,
            http_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_derive_from_data_dir() {
        let config =
            Config::from_lookup(lookup(&[("DISCORD_TOKEN", "t"), ("DATA_DIR", "/srv/herald")]))
                .unwrap();

        assert_eq!(config.sounds_dir, PathBuf::from("/srv/herald/sounds"));
        assert_eq!(config.cache_dir, PathBuf::from("/srv/herald"));
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.announce_grace(), Duration::from_secs(1));
        assert_eq!(config.backlog_warning(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn token_is_required() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("DISCORD_TOKEN", "  ")])).is_err());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "t"),
            ("BOT_OWNER", "42"),
            ("COMMAND_PREFIX", "?"),
            ("SOUNDS_DIR", "/sounds"),
            ("ANNOUNCE_GRACE_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.bot_owner, Some(42));
        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.sounds_dir, PathBuf::from("/sounds"));
        assert_eq!(config.announce_grace(), Duration::from_millis(250));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let result = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "t"), ("BOT_OWNER", "admin")]));
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_bad_endpoint() {
        let config = Config {
            discord_token: "t".into(),
            tts_endpoint: "ftp://tts.local".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_hides_secrets() {
        let config = Config {
            discord_token: "super-secret".into(),
            tts_api_key: Some("also-secret".into()),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(!summary.contains("also-secret"));
        assert!(summary.contains("key set"));
    }
}
