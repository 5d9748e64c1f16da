//! Node configuration.
//!
//! Loaded from `<home>/.rudi/config.yaml`, or from the file named by the
//! `RUDI_CONFIG` environment variable. A missing file yields the defaults,
//! in which the Portal connection is disabled.
//!
//! ```yaml
//! portal:
//!   portal_url: https://portal.example/api
//!   get_url: "konsult/v1/datasets/{{id}}"
//!   put_url: "konsult/v1/datasets"
//!   auth_url: https://portal.example/oauth
//!   login: node-login
//!   passw: cGFzc3dvcmQ=
//! node:
//!   callback_addr: 127.0.0.1:3030
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::store::file::rudi_root;
use crate::types::MetadataId;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "RUDI_CONFIG";

/// Placeholder substituted with the metadata id in `get_url`.
const ID_PLACEHOLDER: &str = "{{id}}";

/// Root of the YAML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

/// Portal endpoints, credentials and engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Base URL of the Portal data API. Absent disables every Portal call.
    pub portal_url: Option<String>,
    pub get_url: String,
    pub put_url: String,
    pub auth_url: String,
    pub auth_get: String,
    pub auth_chk: String,
    pub auth_pub: String,
    pub login: String,
    pub passw: String,
    /// `passw` is stored in clear instead of base64.
    pub is_pwd_clear: bool,
    pub api_version: String,
    pub request_timeout_secs: u64,
    pub waiting_room_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            portal_url: None,
            get_url: "konsult/v1/datasets/{{id}}".to_string(),
            put_url: "konsult/v1/datasets".to_string(),
            auth_url: String::new(),
            auth_get: String::new(),
            auth_chk: "check".to_string(),
            auth_pub: "pub".to_string(),
            login: String::new(),
            passw: String::new(),
            is_pwd_clear: false,
            api_version: "1.3.0".to_string(),
            request_timeout_secs: 30,
            waiting_room_timeout_secs: 3600,
        }
    }
}

impl PortalConfig {
    pub fn is_connection_disabled(&self) -> bool {
        self.portal_url
            .as_deref()
            .map(|url| url.trim().is_empty())
            .unwrap_or(true)
    }

    fn portal_base(&self) -> &str {
        self.portal_url
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
    }

    /// `GET` target for one metadata record.
    pub fn metadata_url(&self, id: &MetadataId) -> String {
        let path = self.get_url.trim_start_matches('/');
        let path = if path.contains(ID_PLACEHOLDER) {
            path.replace(ID_PLACEHOLDER, &id.to_string())
        } else {
            format!("{}/{id}", path.trim_end_matches('/'))
        };
        format!("{}/{path}", self.portal_base())
    }

    /// `POST`/`PUT` target for metadata submissions.
    pub fn metadata_post_url(&self) -> String {
        format!(
            "{}/{}",
            self.portal_base(),
            self.put_url.trim_matches('/')
        )
    }

    /// `DELETE` target for one metadata record.
    pub fn metadata_delete_url(&self, id: &MetadataId) -> String {
        format!("{}/{id}", self.metadata_post_url())
    }

    fn auth_endpoint(&self, suffix: &str) -> String {
        let base = self.auth_url.trim_end_matches('/');
        let suffix = suffix.trim_matches('/');
        if suffix.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{suffix}")
        }
    }

    pub fn auth_token_url(&self) -> String {
        self.auth_endpoint(&self.auth_get)
    }

    pub fn auth_check_url(&self) -> String {
        self.auth_endpoint(&self.auth_chk)
    }

    pub fn auth_public_key_url(&self) -> String {
        self.auth_endpoint(&self.auth_pub)
    }

    /// `(login, clear password)`.
    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        if self.login.is_empty() {
            return Err(ConfigError::InvalidCredentials("no portal login configured".into()));
        }
        if self.is_pwd_clear {
            return Ok((self.login.clone(), self.passw.clone()));
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(self.passw.trim())
            .map_err(|e| ConfigError::InvalidCredentials(format!("password is not base64: {e}")))?;
        let password = String::from_utf8(decoded)
            .map_err(|e| ConfigError::InvalidCredentials(format!("password is not UTF-8: {e}")))?;
        Ok((self.login.clone(), password))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn waiting_room_timeout(&self) -> Duration {
        Duration::from_secs(self.waiting_room_timeout_secs)
    }
}

/// Settings of the long-running node process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Listen address of the Portal report callback.
    pub callback_addr: String,
    pub sweep_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            callback_addr: "127.0.0.1:3030".to_string(),
            sweep_interval_secs: 60,
        }
    }
}

impl NodeConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// `<home>/.rudi/config.yaml` (pure, no I/O).
pub fn config_path_at(home: &Path) -> PathBuf {
    rudi_root(home).join("config.yaml")
}

/// Load the configuration from `path`. A missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the configuration for `home`, honouring `RUDI_CONFIG`.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => load_from(Path::new(&path)),
        _ => load_from(&config_path_at(home)),
    }
}

/// `load_at` convenience wrapper using `dirs::home_dir()`.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn portal() -> PortalConfig {
        PortalConfig {
            portal_url: Some("https://portal.example/api/".into()),
            auth_url: "https://portal.example/oauth".into(),
            auth_get: "token".into(),
            login: "node".into(),
            passw: "c2VjcmV0".into(),
            ..PortalConfig::default()
        }
    }

    #[test]
    fn default_config_disables_portal() {
        assert!(Config::default().portal.is_connection_disabled());
    }

    #[test]
    fn metadata_urls_substitute_id() {
        let id: MetadataId = "6fa459ea-ee8a-4ca4-894e-db77e160355e".parse().unwrap();
        let conf = portal();
        assert_eq!(
            conf.metadata_url(&id),
            "https://portal.example/api/konsult/v1/datasets/6fa459ea-ee8a-4ca4-894e-db77e160355e"
        );
        assert_eq!(
            conf.metadata_post_url(),
            "https://portal.example/api/konsult/v1/datasets"
        );
        assert_eq!(
            conf.metadata_delete_url(&id),
            "https://portal.example/api/konsult/v1/datasets/6fa459ea-ee8a-4ca4-894e-db77e160355e"
        );
    }

    #[test]
    fn auth_urls_join_suffixes() {
        let conf = portal();
        assert_eq!(conf.auth_token_url(), "https://portal.example/oauth/token");
        assert_eq!(conf.auth_check_url(), "https://portal.example/oauth/check");
        assert_eq!(conf.auth_public_key_url(), "https://portal.example/oauth/pub");

        let bare = PortalConfig {
            auth_get: String::new(),
            ..conf
        };
        assert_eq!(bare.auth_token_url(), "https://portal.example/oauth");
    }

    #[test]
    fn credentials_decode_base64_unless_clear() {
        let conf = portal();
        assert_eq!(conf.credentials().unwrap(), ("node".into(), "secret".into()));

        let clear = PortalConfig {
            passw: "plain".into(),
            is_pwd_clear: true,
            ..portal()
        };
        assert_eq!(clear.credentials().unwrap().1, "plain");

        let broken = PortalConfig {
            passw: "***".into(),
            ..portal()
        };
        assert!(matches!(
            broken.credentials(),
            Err(ConfigError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn missing_file_yields_defaults_and_yaml_overrides() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        assert_eq!(load_from(&path).unwrap(), Config::default());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "portal:\n  portal_url: https://p.example\n  waiting_room_timeout_secs: 10\nnode:\n  sweep_interval_secs: 5\n",
        )
        .unwrap();
        let conf = load_from(&path).unwrap();
        assert_eq!(conf.portal.portal_url.as_deref(), Some("https://p.example"));
        assert_eq!(conf.portal.waiting_room_timeout(), Duration::from_secs(10));
        assert_eq!(conf.portal.auth_chk, "check");
        assert_eq!(conf.node.sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "portal: [unclosed").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }
}
