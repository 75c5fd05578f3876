use std::fs;
use std::path::Path;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub imgsync: String,
    pub notify: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const IMGSYNC_LEVEL: &str = "info";
    const NOTIFY_LEVEL: &str = "warn";

    fn default() -> Self {
        LoggingConfig {
            imgsync: Self::IMGSYNC_LEVEL.to_string(),
            notify: Self::NOTIFY_LEVEL.to_string(),
        }
    }

    /// flexi_logger specification string, e.g. "warn, imgsync=info, notify=warn"
    pub fn log_spec(&self) -> String {
        format!(
            "warn, imgsync={}, notify={}, notify_debouncer_mini={}",
            self.imgsync, self.notify, self.notify
        )
    }

    fn ensure_valid(&mut self) {
        Self::ensure_level(&mut self.imgsync, "imgsync", Self::IMGSYNC_LEVEL);
        Self::ensure_level(&mut self.notify, "notify", Self::NOTIFY_LEVEL);
    }

    fn ensure_level(level: &mut String, name: &str, default: &str) {
        let str_original = level.clone();
        *level = level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&level.as_str()) {
            eprintln!(
                "Config error: {name} log level of '{str_original}' is invalid - using default of '{default}'"
            );
            *level = default.to_owned();
        }
    }
}

/// Knobs for the scanner and watcher. Passed explicitly to the sync engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Supported file extensions, lowercase without the leading dot
    pub extensions: Vec<String>,
    /// Quiet period before a changed path is considered stable
    pub debounce_ms: u64,
    pub follow_symlinks: bool,
    pub ignore_hidden: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            extensions: Self::DEFAULT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            debounce_ms: Self::DEFAULT_DEBOUNCE_MS,
            follow_symlinks: false,
            ignore_hidden: true,
        }
    }
}

impl SyncConfig {
    const DEFAULT_EXTENSIONS: [&str; 6] = ["bmp", "gif", "jpeg", "jpg", "png", "webp"];
    const DEFAULT_DEBOUNCE_MS: u64 = 2000;
    const MIN_DEBOUNCE_MS: u64 = 50;

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .extensions
                .iter()
                .any(|supported| supported.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    /// True if any component of `path` below `root` starts with a dot.
    pub fn is_hidden(root: &Path, path: &Path) -> bool {
        path.strip_prefix(root)
            .unwrap_or(path)
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
    }

    pub fn ensure_valid(&mut self) {
        self.extensions = self
            .extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self.extensions.sort();
        self.extensions.dedup();

        if self.extensions.is_empty() {
            eprintln!("Config error: no supported extensions configured - using defaults");
            self.extensions = SyncConfig::default().extensions;
        }

        if self.debounce_ms < Self::MIN_DEBOUNCE_MS {
            eprintln!(
                "Config error: debounce_ms of {} is too small - using {}",
                self.debounce_ms,
                Self::MIN_DEBOUNCE_MS
            );
            self.debounce_ms = Self::MIN_DEBOUNCE_MS;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
}

impl Config {
    const ENV_PREFIX: &str = "IMGSYNC_";

    pub fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "imgsync")
    }

    /// Loads the configuration from a TOML file located in the app's data directory.
    /// If the file is missing or fails to parse, defaults are used.
    /// Additionally, writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");

        let default_config = Config {
            logging: LoggingConfig::default(),
            sync: SyncConfig::default(),
        };

        // If the config file doesn't exist, write the default configuration to disk.
        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                }
            }
            if let Ok(toml_string) = toml::to_string_pretty(&default_config) {
                if let Err(e) = fs::write(&config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            } else {
                eprintln!("Failed to serialize default config.");
            }
        }

        Self::load_from(&config_path, default_config)
    }

    /// Defaults, then the TOML file (if it exists), then IMGSYNC_ environment variables.
    pub fn load_from(config_path: &Path, default_config: Config) -> Self {
        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    pub fn default_config() -> Self {
        Config {
            logging: LoggingConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.sync.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default_config();
        assert_eq!(config.logging.imgsync, "info");
        assert_eq!(config.sync.debounce(), Duration::from_millis(2000));
        assert!(!config.sync.follow_symlinks);
        assert!(config.sync.ignore_hidden);
        assert_eq!(config.sync.extensions.len(), 6);
    }

    #[test]
    fn test_is_supported_is_case_insensitive() {
        let sync = SyncConfig::default();
        assert!(sync.is_supported(Path::new("/a/b.png")));
        assert!(sync.is_supported(Path::new("/a/b.JPEG")));
        assert!(!sync.is_supported(Path::new("/a/b.txt")));
        assert!(!sync.is_supported(Path::new("/a/png")));
        assert!(!sync.is_supported(Path::new("/a/.png")));
    }

    #[test]
    fn test_is_hidden() {
        let root = Path::new("/data/.cache-root");
        assert!(!SyncConfig::is_hidden(root, Path::new("/data/.cache-root/a.png")));
        assert!(SyncConfig::is_hidden(root, Path::new("/data/.cache-root/.a.png")));
        assert!(SyncConfig::is_hidden(root, Path::new("/data/.cache-root/.thumbs/a.png")));
    }

    #[test]
    fn test_ensure_valid_normalizes() {
        let mut sync = SyncConfig {
            extensions: vec![" .PNG".into(), "png".into(), "".into(), "Tiff".into()],
            debounce_ms: 3,
            follow_symlinks: false,
            ignore_hidden: true,
        };
        sync.ensure_valid();
        assert_eq!(sync.extensions, vec!["png".to_string(), "tiff".to_string()]);
        assert_eq!(sync.debounce_ms, 50);

        let mut empty = SyncConfig {
            extensions: vec![],
            ..SyncConfig::default()
        };
        empty.ensure_valid();
        assert_eq!(empty.extensions.len(), 6);
    }

    #[test]
    fn test_invalid_log_level_uses_default() {
        let mut logging = LoggingConfig {
            imgsync: " DEBUG ".into(),
            notify: "loud".into(),
        };
        logging.ensure_valid();
        assert_eq!(logging.imgsync, "debug");
        assert_eq!(logging.notify, "warn");
        assert!(logging.log_spec().contains("imgsync=debug"));
    }

    #[test]
    fn test_load_from_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [logging]
                imgsync = "trace"

                [sync]
                extensions = ["png", "tif"]
                debounce_ms = 500
                "#,
            )?;
            jail.set_env("IMGSYNC_SYNC__IGNORE_HIDDEN", "false");

            let config = Config::load_from(Path::new("config.toml"), Config::default_config());
            assert_eq!(config.logging.imgsync, "trace");
            assert_eq!(config.logging.notify, "warn");
            assert_eq!(config.sync.extensions, vec!["png".to_string(), "tif".to_string()]);
            assert_eq!(config.sync.debounce_ms, 500);
            assert!(!config.sync.ignore_hidden);
            Ok(())
        });
    }

    #[test]
    fn test_load_from_bad_file_falls_back() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[sync]\ndebounce_ms = \"soon\"\n")?;
            let config = Config::load_from(Path::new("config.toml"), Config::default_config());
            assert_eq!(config, Config::default_config());
            Ok(())
        });
    }
}
