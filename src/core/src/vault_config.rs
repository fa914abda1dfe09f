use std::path::PathBuf;

use chatvault_snapshot::{
    BackupSettings, R2Settings, RetentionKind, RetentionSettings, SnapshotConfig, WebdavSettings,
};
use serde::{Deserialize, Serialize};

use crate::paths::{chatvault_home_dir, config_file_path, default_db_path, user_home_dir};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub site: SiteConfig,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub retention: RetentionConfig,
    pub webdav: WebdavConfig,
    pub r2: R2Config,
    pub paths: PathsConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            retention: RetentionConfig::default(),
            webdav: WebdavConfig::default(),
            r2: R2Config::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn load() -> Result<Self, String> {
        let path = config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw =
            std::fs::read_to_string(&path).map_err(|e| format!("read config.toml: {e}"))?;
        toml::from_str(&raw).map_err(|e| format!("parse config.toml: {e}"))
    }

    pub fn save(&self) -> Result<(), String> {
        let path = config_file_path()?;
        let text =
            toml::to_string_pretty(self).map_err(|e| format!("serialize config.toml: {e}"))?;
        std::fs::write(&path, text).map_err(|e| format!("write config.toml: {e}"))
    }

    pub fn config_path() -> Result<PathBuf, String> {
        config_file_path()
    }

    pub fn db_path(&self) -> Result<PathBuf, String> {
        if let Some(path) = self.paths.db_path.as_ref() {
            return resolve_path(path);
        }
        default_db_path()
    }

    /// Non-secret view of the configuration, embedded in backup snapshots
    /// so a restore on a fresh install can reconstitute settings.
    /// Passwords and tokens never leave the local config file.
    pub fn snapshot_config(&self) -> SnapshotConfig {
        let webdav = if self.webdav.enabled || !self.webdav.url.is_empty() {
            Some(WebdavSettings {
                enabled: self.webdav.enabled,
                url: self.webdav.url.clone(),
                username: self.webdav.username.clone(),
                backup_path: self.webdav.backup_path.clone(),
            })
        } else {
            None
        };
        let r2 = if self.r2.enabled || !self.r2.endpoint.is_empty() {
            Some(R2Settings {
                enabled: self.r2.enabled,
                endpoint: self.r2.endpoint.clone(),
                base_path: self.r2.base_path.clone(),
            })
        } else {
            None
        };
        SnapshotConfig {
            backup: BackupSettings {
                auto: self.sync.enabled,
                interval_secs: self.sync.interval_secs,
            },
            retention: RetentionSettings {
                kind: self.retention.kind,
                count_limit: self.retention.count_limit,
                age_days: self.retention.age_days,
            },
            webdav,
            r2,
        }
    }

    /// Merge settings carried in a restored snapshot. Each field is applied
    /// independently; values that would be invalid (zero limits, empty
    /// endpoints replacing configured ones) are skipped. Secrets are never
    /// touched, so existing credentials keep working after a restore.
    pub fn apply_snapshot_config(&mut self, settings: &SnapshotConfig) {
        self.sync.enabled = settings.backup.auto;
        if settings.backup.interval_secs > 0 {
            self.sync.interval_secs = settings.backup.interval_secs;
        }

        self.retention.kind = settings.retention.kind;
        if settings.retention.count_limit >= 1 {
            self.retention.count_limit = settings.retention.count_limit;
        }
        if settings.retention.age_days >= 1 {
            self.retention.age_days = settings.retention.age_days;
        }

        if let Some(webdav) = settings.webdav.as_ref() {
            self.webdav.enabled = webdav.enabled;
            if !webdav.url.is_empty() {
                self.webdav.url = webdav.url.clone();
            }
            if !webdav.username.is_empty() {
                self.webdav.username = webdav.username.clone();
            }
            if !webdav.backup_path.is_empty() {
                self.webdav.backup_path = webdav.backup_path.clone();
            }
        }

        if let Some(r2) = settings.r2.as_ref() {
            self.r2.enabled = r2.enabled;
            if !r2.endpoint.is_empty() {
                self.r2.endpoint = r2.endpoint.clone();
            }
            if !r2.base_path.is_empty() {
                self.r2.base_path = r2.base_path.clone();
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site descriptor id, one of the registered sites ("ns", "df").
    pub id: String,
    /// Session cookie passed through on site API requests.
    pub cookie: String,
    /// Current user id. 0 means resolve automatically at startup.
    pub user_id: i64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            id: "ns".to_string(),
            cookie: String::new(),
            user_id: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8646".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether the background poll loop runs at all.
    pub enabled: bool,
    pub interval_secs: u64,
    /// Run one unconditional backup when the daemon starts, so a freshly
    /// configured destination gets initialized even with no new messages.
    pub backup_on_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            backup_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub kind: RetentionKind,
    pub count_limit: u32,
    pub age_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            kind: RetentionKind::Count,
            count_limit: 30,
            age_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebdavConfig {
    pub enabled: bool,
    pub url: String,
    pub username: String,
    pub password: String,
    pub backup_path: String,
}

impl Default for WebdavConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            username: String::new(),
            password: String::new(),
            backup_path: "/ns_df_messages_backup".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct R2Config {
    pub enabled: bool,
    pub endpoint: String,
    pub auth_token: String,
    pub base_path: String,
}

impl Default for R2Config {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            auth_token: String::new(),
            base_path: "/ns_df_messages_backup/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { db_path: None }
    }
}

fn resolve_path(value: &str) -> Result<PathBuf, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("path override is empty".to_string());
    }
    let home = user_home_dir();
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = home {
            return Ok(home.join(rest));
        }
    }
    if trimmed == "~" {
        if let Some(home) = home {
            return Ok(home);
        }
    }
    let path = PathBuf::from(trimmed);
    if path.is_relative() {
        let base = chatvault_home_dir()?;
        return Ok(base.join(path));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let raw = r#"
            [site]
            id = "df"

            [webdav]
            enabled = true
            url = "https://dav.example.com"
            username = "u"
            password = "p"

            [retention]
            kind = "age"
            age_days = 14
        "#;
        let config: VaultConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.site.id, "df");
        assert_eq!(config.site.user_id, 0);
        assert!(config.webdav.enabled);
        assert_eq!(config.webdav.backup_path, "/ns_df_messages_backup");
        assert_eq!(config.retention.kind, RetentionKind::Age);
        assert_eq!(config.retention.age_days, 14);
        assert_eq!(config.retention.count_limit, 30);
        assert!(!config.r2.enabled);
        assert_eq!(config.sync.interval_secs, 300);
    }

    #[test]
    fn snapshot_config_strips_secrets() {
        let mut config = VaultConfig::default();
        config.webdav.enabled = true;
        config.webdav.url = "https://dav.example.com".into();
        config.webdav.username = "u".into();
        config.webdav.password = "hunter2".into();
        config.r2.endpoint = "https://worker.example.com".into();
        config.r2.auth_token = "tok".into();

        let exported = config.snapshot_config();
        let webdav = exported.webdav.as_ref().unwrap();
        assert_eq!(webdav.url, "https://dav.example.com");
        assert_eq!(webdav.username, "u");
        let r2 = exported.r2.as_ref().unwrap();
        assert_eq!(r2.endpoint, "https://worker.example.com");

        let json = serde_json::to_string(&exported).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("tok"));
    }

    #[test]
    fn snapshot_config_omits_untouched_destinations() {
        let exported = VaultConfig::default().snapshot_config();
        assert!(exported.webdav.is_none());
        assert!(exported.r2.is_none());
    }

    #[test]
    fn apply_snapshot_config_keeps_secrets_and_skips_invalid() {
        let mut config = VaultConfig::default();
        config.webdav.password = "hunter2".into();
        config.webdav.url = "https://old.example.com".into();

        let mut settings = SnapshotConfig::default();
        settings.retention.kind = RetentionKind::Age;
        settings.retention.age_days = 0; // invalid, must be skipped
        settings.retention.count_limit = 10;
        settings.webdav = Some(WebdavSettings {
            enabled: true,
            url: "https://new.example.com".into(),
            username: "u2".into(),
            backup_path: String::new(), // empty, must not clobber
        });

        config.apply_snapshot_config(&settings);
        assert_eq!(config.retention.kind, RetentionKind::Age);
        assert_eq!(config.retention.age_days, 30);
        assert_eq!(config.retention.count_limit, 10);
        assert!(config.webdav.enabled);
        assert_eq!(config.webdav.url, "https://new.example.com");
        assert_eq!(config.webdav.username, "u2");
        assert_eq!(config.webdav.backup_path, "/ns_df_messages_backup");
        assert_eq!(config.webdav.password, "hunter2");
    }
}
