//! Idempotent "make sure component X is installed" workflow.
//!
//! [`ComponentProbe`] answers whether the component is present.
//! [`InstallerLocator`] produces an installer file and [`InstallRunner`]
//! runs it silently.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::artifact;
use crate::error::TransferError;
use crate::process::{ProcessInvocation, ProcessRunner};

const SUSPICIOUS_INSTALLER_BYTES: u64 = 100 * 1024;

pub trait ComponentProbe: Send + Sync {
    fn is_installed(&self) -> bool;
}

impl<F> ComponentProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_installed(&self) -> bool {
        self()
    }
}

pub trait InstallerLocator {
    /// Path to an installer, or `None` when this source has none.
    fn locate(&self) -> Result<Option<PathBuf>, TransferError>;
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallerExit {
    Success,
    RebootRequired,
}

pub trait InstallRunner: Send + Sync {
    fn install(&self, installer: &Path) -> Result<InstallerExit, TransferError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    AlreadyInstalled,
    Installed,
    InstalledRebootRequired,
}

pub fn ensure_installed(
    probe: &dyn ComponentProbe,
    locator: &dyn InstallerLocator,
    runner: &dyn InstallRunner,
) -> Result<InstallOutcome, TransferError> {
    if probe.is_installed() {
        tracing::info!("prerequisite already installed");
        return Ok(InstallOutcome::AlreadyInstalled);
    }

    let installer = locator
        .locate()?
        .ok_or_else(|| TransferError::InstallerNotFound(locator.describe()))?;
    tracing::info!(installer = %installer.display(), "prerequisite missing, installing");

    let exit = runner.install(&installer)?;
    if !probe.is_installed() {
        return Err(TransferError::InstallFailed(
            "install did not take effect".to_string(),
        ));
    }

    match exit {
        InstallerExit::Success => {
            tracing::info!("prerequisite installation verified");
            Ok(InstallOutcome::Installed)
        }
        InstallerExit::RebootRequired => {
            tracing::warn!("prerequisite installed, a reboot is required to finish");
            Ok(InstallOutcome::InstalledRebootRequired)
        }
    }
}

/// Maps a Windows Installer exit code. 3010 and 1641 mean the install went
/// through and wants (or started) a reboot.
pub fn classify_msi_exit(code: i32) -> Result<InstallerExit, TransferError> {
    match code {
        0 => Ok(InstallerExit::Success),
        3010 | 1641 => Ok(InstallerExit::RebootRequired),
        other => Err(TransferError::InstallFailed(format!(
            "installer exited with code {other}"
        ))),
    }
}

/// Runs an MSI with `msiexec /i ... /qn /norestart`, license pre-accepted.
#[derive(Debug, Clone)]
pub struct SilentMsiInstaller {
    runner: ProcessRunner,
    license_property: Option<String>,
    timeout: Option<Duration>,
}

impl SilentMsiInstaller {
    pub fn new(
        runner: ProcessRunner,
        license_property: Option<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            license_property,
            timeout,
        }
    }

    pub fn invocation(&self, installer: &Path) -> ProcessInvocation {
        let mut invocation = ProcessInvocation::new("msiexec.exe")
            .arg("/i")
            .arg(installer.to_string_lossy());
        if let Some(property) = &self.license_property {
            invocation = invocation.arg(format!("{property}=YES"));
        }
        let invocation = invocation.args(["/qn", "/norestart"]).timeout(self.timeout);
        match installer.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => invocation.current_dir(dir),
            _ => invocation,
        }
    }
}

impl InstallRunner for SilentMsiInstaller {
    fn install(&self, installer: &Path) -> Result<InstallerExit, TransferError> {
        if !installer.is_file() {
            return Err(TransferError::not_found("installer", installer));
        }
        let result = self.runner.run(&self.invocation(installer))?;
        tracing::info!(exit_code = result.exit_code, "installer finished");
        classify_msi_exit(result.exit_code)
    }
}

/// Looks for a component by display name in the ODBC driver list and the
/// uninstall registry, using `reg query`.
#[derive(Debug, Clone)]
pub struct RegistryProbe {
    runner: ProcessRunner,
    display_name: String,
}

const REGISTRY_KEYS: &[&str] = &[
    r"HKLM\SOFTWARE\ODBC\ODBCINST.INI\ODBC Drivers",
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
];

impl RegistryProbe {
    pub fn new(runner: ProcessRunner, display_name: impl Into<String>) -> Self {
        Self {
            runner,
            display_name: display_name.into(),
        }
    }

    fn key_mentions(&self, key: &str) -> bool {
        let invocation = ProcessInvocation::new("reg.exe")
            .args(["query", key, "/s"])
            .timeout(Some(Duration::from_secs(60)));
        match self.runner.run(&invocation) {
            Ok(result) if result.success() => contains_ignore_case(&result.stdout, &self.display_name),
            Ok(_) => false,
            Err(err) => {
                tracing::debug!(%err, key, "registry query failed");
                false
            }
        }
    }
}

impl ComponentProbe for RegistryProbe {
    fn is_installed(&self) -> bool {
        REGISTRY_KEYS.iter().any(|key| self.key_mentions(key))
    }
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// An installer path given by the caller.
#[derive(Debug, Clone)]
pub struct ProvidedInstaller(pub Option<PathBuf>);

impl InstallerLocator for ProvidedInstaller {
    fn locate(&self) -> Result<Option<PathBuf>, TransferError> {
        Ok(self.0.as_ref().filter(|path| path.is_file()).cloned())
    }

    fn describe(&self) -> String {
        match &self.0 {
            Some(path) => format!("no installer at {}", path.display()),
            None => "no installer path was provided".to_string(),
        }
    }
}

/// An installer shipped inside an extracted package, e.g.
/// `Prereqs/ODBC18/msodbcsql18.msi`.
#[derive(Debug, Clone)]
pub struct BundledInstaller {
    pub root: PathBuf,
    pub bundle_dir: String,
    pub pattern: String,
}

impl InstallerLocator for BundledInstaller {
    fn locate(&self) -> Result<Option<PathBuf>, TransferError> {
        let segments: Vec<String> = self
            .bundle_dir
            .split(['/', '\\'])
            .filter(|part| !part.is_empty())
            .map(str::to_lowercase)
            .collect();
        let found = artifact::find_matching(&self.root, &self.pattern)?
            .into_iter()
            .find(|path| {
                let lowered = path.to_string_lossy().to_lowercase();
                segments.iter().all(|segment| lowered.contains(segment.as_str()))
            });
        Ok(found)
    }

    fn describe(&self) -> String {
        format!(
            "no `{}` under {} in {}",
            self.pattern,
            self.bundle_dir,
            self.root.display()
        )
    }
}

/// Downloads the installer to `destination`, optionally through a proxy. An
/// existing non-empty file at `destination` is reused.
#[derive(Debug, Clone)]
pub struct HttpInstaller {
    pub url: String,
    pub destination: PathBuf,
    pub proxy: Option<String>,
}

impl HttpInstaller {
    fn client(&self) -> Result<Client, TransferError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("outx/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TransferError::Download(err.to_string()))?,
        );
        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600));
        if let Some(proxy) = self.proxy.as_deref().filter(|value| !value.trim().is_empty()) {
            let proxy =
                reqwest::Proxy::all(proxy).map_err(|err| TransferError::Download(err.to_string()))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|err| TransferError::Download(err.to_string()))
    }

    pub fn download(&self) -> Result<PathBuf, TransferError> {
        let response = self
            .client()?
            .get(&self.url)
            .send()
            .map_err(|err| TransferError::Download(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "installer request failed".to_string());
            return Err(TransferError::DownloadStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| TransferError::Download(err.to_string()))?;
        if let Some(parent) = self.destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| TransferError::Filesystem(err.to_string()))?;
        }
        let mut file = File::create(&self.destination)
            .map_err(|err| TransferError::Filesystem(err.to_string()))?;
        file.write_all(&bytes)
            .map_err(|err| TransferError::Filesystem(err.to_string()))?;

        let size = bytes.len() as u64;
        if size < SUSPICIOUS_INSTALLER_BYTES {
            tracing::warn!(size, path = %self.destination.display(), "downloaded installer seems too small");
        } else {
            tracing::info!(size, path = %self.destination.display(), "installer downloaded");
        }
        Ok(self.destination.clone())
    }
}

impl InstallerLocator for HttpInstaller {
    fn locate(&self) -> Result<Option<PathBuf>, TransferError> {
        let existing = fs::metadata(&self.destination)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false);
        if existing {
            return Ok(Some(self.destination.clone()));
        }
        self.download().map(Some)
    }

    fn describe(&self) -> String {
        format!("download from {} failed", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msi_exit_codes() {
        assert_eq!(classify_msi_exit(0).unwrap(), InstallerExit::Success);
        assert_eq!(classify_msi_exit(3010).unwrap(), InstallerExit::RebootRequired);
        assert_eq!(classify_msi_exit(1641).unwrap(), InstallerExit::RebootRequired);
        assert!(classify_msi_exit(1603).is_err());
    }

    #[test]
    fn msi_invocation_is_silent() {
        let installer = SilentMsiInstaller::new(
            ProcessRunner::default(),
            Some("IACCEPTMSODBCSQLLICENSETERMS".to_string()),
            None,
        );
        let invocation = installer.invocation(Path::new("/opt/pkg/msodbcsql18.msi"));
        assert_eq!(
            invocation.args,
            vec![
                "/i",
                "/opt/pkg/msodbcsql18.msi",
                "IACCEPTMSODBCSQLLICENSETERMS=YES",
                "/qn",
                "/norestart"
            ]
        );
        assert_eq!(invocation.working_dir, Some(PathBuf::from("/opt/pkg")));
    }
}
