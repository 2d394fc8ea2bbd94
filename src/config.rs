use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

pub const DEFAULT_CONFIG_FILE: &str = "offline-transfer.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Parent directory for per-run staging areas.
    pub staging_root: Option<Utf8PathBuf>,
    /// Installed tool folder (or executable) on the offline machine.
    pub tool_path: Option<Utf8PathBuf>,
    pub tool: ToolLayout,
    pub poll_interval_ms: u64,
    pub tool_timeout_secs: Option<u64>,
    pub installer_timeout_secs: Option<u64>,
    pub export: PhasePolicy,
    pub fetch: PhasePolicy,
    pub import: PhasePolicy,
    pub prerequisite: PrerequisiteSettings,
    /// Below this a download without `Updates`/`Redist` looks incomplete.
    pub min_download_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            staging_root: None,
            tool_path: None,
            tool: ToolLayout::default(),
            poll_interval_ms: 500,
            tool_timeout_secs: None,
            installer_timeout_secs: Some(1800),
            export: PhasePolicy::strict(),
            fetch: PhasePolicy::best_effort(),
            import: PhasePolicy {
                abort_on_tool_failure: true,
                abort_on_prerequisite_failure: false,
            },
            prerequisite: PrerequisiteSettings::default(),
            min_download_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    pub fn installer_timeout(&self) -> Option<Duration> {
        self.installer_timeout_secs.map(Duration::from_secs)
    }

    /// Configured staging parent, else the local data dir, else the temp dir.
    pub fn staging_parent(&self) -> Utf8PathBuf {
        if let Some(root) = &self.staging_root {
            return root.clone();
        }
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.data_local_dir().join("offline-update-transfer").join("staging"),
                )
                .ok()
            })
            .or_else(|| Utf8PathBuf::from_path_buf(std::env::temp_dir()).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("."))
    }
}

/// Names the external tool expects on disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolLayout {
    pub tool_dir_name: String,
    pub executable_name: String,
    pub transfer_dir_name: String,
    pub usage_data_name: String,
    pub usage_data_pattern: String,
}

impl Default for ToolLayout {
    fn default() -> Self {
        Self {
            tool_dir_name: "ServiceConnectionTool".to_string(),
            executable_name: "ServiceConnectionTool.exe".to_string(),
            transfer_dir_name: "Transfer".to_string(),
            usage_data_name: "UsageData.cab".to_string(),
            usage_data_pattern: "*.cab".to_string(),
        }
    }
}

/// Whether a failing step stops the phase or is logged and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PhasePolicy {
    pub abort_on_tool_failure: bool,
    pub abort_on_prerequisite_failure: bool,
}

impl PhasePolicy {
    pub fn strict() -> Self {
        Self {
            abort_on_tool_failure: true,
            abort_on_prerequisite_failure: true,
        }
    }

    pub fn best_effort() -> Self {
        Self {
            abort_on_tool_failure: false,
            abort_on_prerequisite_failure: false,
        }
    }
}

impl Default for PhasePolicy {
    fn default() -> Self {
        Self::strict()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrerequisiteSettings {
    pub display_name: String,
    pub download_url: String,
    pub installer_file_name: String,
    pub bundle_dir: String,
    pub bundle_pattern: String,
    pub license_property: Option<String>,
}

impl Default for PrerequisiteSettings {
    fn default() -> Self {
        Self {
            display_name: "ODBC Driver 18 for SQL Server".to_string(),
            download_url: "https://go.microsoft.com/fwlink/?linkid=2220989".to_string(),
            installer_file_name: "msodbcsql18.msi".to_string(),
            bundle_dir: "Prereqs/ODBC18".to_string(),
            bundle_pattern: "msodbcsql*.msi".to_string(),
            license_property: Some("IACCEPTMSODBCSQLLICENSETERMS".to_string()),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `offline-transfer.json` in the working directory when
    /// present. With neither, everything is defaulted.
    pub fn resolve(path: Option<&str>) -> Result<Settings, TransferError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            tracing::debug!("no config file, using defaults");
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TransferError::ConfigRead(config_path.clone()))?;
        let settings = Self::parse(&content)?;
        tracing::info!(path = %config_path.display(), "config loaded");
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Settings, TransferError> {
        serde_json::from_str(content).map_err(|err| TransferError::ConfigParse(err.to_string()))
    }
}
