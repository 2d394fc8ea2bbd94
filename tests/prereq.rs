use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use assert_matches::assert_matches;

use offline_update_transfer::error::TransferError;
use offline_update_transfer::prereq::{
    BundledInstaller, ComponentProbe, InstallOutcome, InstallRunner, InstallerExit,
    InstallerLocator, ProvidedInstaller, classify_msi_exit, ensure_installed,
};

#[derive(Default)]
struct FlagProbe {
    installed: AtomicBool,
    calls: AtomicUsize,
}

impl ComponentProbe for FlagProbe {
    fn is_installed(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.installed.load(Ordering::SeqCst)
    }
}

struct FixedLocator {
    path: Option<PathBuf>,
    calls: AtomicUsize,
}

impl FixedLocator {
    fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            calls: AtomicUsize::new(0),
        }
    }
}

impl InstallerLocator for FixedLocator {
    fn locate(&self) -> Result<Option<PathBuf>, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.path.clone())
    }

    fn describe(&self) -> String {
        "fixed".to_string()
    }
}

/// Pretends to run an installer: records the call, returns a fixed exit code
/// and optionally flips the probe.
struct FakeMsi<'a> {
    exit_code: i32,
    flips: Option<&'a FlagProbe>,
    installed: Mutex<Vec<PathBuf>>,
}

impl<'a> FakeMsi<'a> {
    fn new(exit_code: i32, flips: Option<&'a FlagProbe>) -> Self {
        Self {
            exit_code,
            flips,
            installed: Mutex::new(Vec::new()),
        }
    }

    fn installs(&self) -> usize {
        self.installed.lock().unwrap().len()
    }
}

impl InstallRunner for FakeMsi<'_> {
    fn install(&self, installer: &Path) -> Result<InstallerExit, TransferError> {
        self.installed.lock().unwrap().push(installer.to_path_buf());
        let exit = classify_msi_exit(self.exit_code)?;
        if let Some(probe) = self.flips {
            probe.installed.store(true, Ordering::SeqCst);
        }
        Ok(exit)
    }
}

#[test]
fn present_component_needs_no_install_twice() {
    let probe = FlagProbe::default();
    probe.installed.store(true, Ordering::SeqCst);
    let locator = FixedLocator::new(Some(PathBuf::from("x.msi")));
    let runner = FakeMsi::new(0, None);

    for _ in 0..2 {
        let outcome = ensure_installed(&probe, &locator, &runner).unwrap();
        assert_eq!(outcome, InstallOutcome::AlreadyInstalled);
    }
    assert_eq!(runner.installs(), 0);
    assert_eq!(locator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_component_is_installed_and_verified() {
    let probe = FlagProbe::default();
    let locator = FixedLocator::new(Some(PathBuf::from("msodbcsql18.msi")));
    let runner = FakeMsi::new(0, Some(&probe));

    let outcome = ensure_installed(&probe, &locator, &runner).unwrap();
    assert_eq!(outcome, InstallOutcome::Installed);
    assert_eq!(runner.installs(), 1);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

    let again = ensure_installed(&probe, &locator, &runner).unwrap();
    assert_eq!(again, InstallOutcome::AlreadyInstalled);
    assert_eq!(runner.installs(), 1);
}

#[test]
fn reboot_codes_still_count_as_installed() {
    for code in [3010, 1641] {
        let probe = FlagProbe::default();
        let locator = FixedLocator::new(Some(PathBuf::from("msodbcsql18.msi")));
        let runner = FakeMsi::new(code, Some(&probe));
        let outcome = ensure_installed(&probe, &locator, &runner).unwrap();
        assert_eq!(outcome, InstallOutcome::InstalledRebootRequired);
    }
}

#[test]
fn installer_failure_code_is_an_install_error() {
    let probe = FlagProbe::default();
    let locator = FixedLocator::new(Some(PathBuf::from("msodbcsql18.msi")));
    let runner = FakeMsi::new(1603, Some(&probe));
    assert_matches!(
        ensure_installed(&probe, &locator, &runner),
        Err(TransferError::InstallFailed(message)) if message.contains("1603")
    );
}

#[test]
fn install_that_does_not_take_effect_fails() {
    let probe = FlagProbe::default();
    let locator = FixedLocator::new(Some(PathBuf::from("msodbcsql18.msi")));
    let runner = FakeMsi::new(0, None);
    assert_matches!(
        ensure_installed(&probe, &locator, &runner),
        Err(TransferError::InstallFailed(message)) if message == "install did not take effect"
    );
    assert_eq!(runner.installs(), 1);
}

#[test]
fn no_installer_available() {
    let probe = FlagProbe::default();
    let locator = FixedLocator::new(None);
    let runner = FakeMsi::new(0, Some(&probe));
    assert_matches!(
        ensure_installed(&probe, &locator, &runner),
        Err(TransferError::InstallerNotFound(_))
    );
    assert_eq!(runner.installs(), 0);
}

#[test]
fn closures_are_probes() {
    let locator = ProvidedInstaller(None);
    let runner = FakeMsi::new(0, None);
    let outcome = ensure_installed(&|| true, &locator, &runner).unwrap();
    assert_eq!(outcome, InstallOutcome::AlreadyInstalled);
}

#[test]
fn provided_installer_must_exist() {
    let temp = tempfile::tempdir().unwrap();
    let msi = temp.path().join("msodbcsql18.msi");
    assert_eq!(ProvidedInstaller(Some(msi.clone())).locate().unwrap(), None);
    fs::write(&msi, b"msi").unwrap();
    assert_eq!(ProvidedInstaller(Some(msi.clone())).locate().unwrap(), Some(msi));
}

#[test]
fn bundled_installer_is_found_under_its_bundle_dir() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("Other")).unwrap();
    fs::create_dir_all(root.join("Prereqs/ODBC18")).unwrap();
    fs::write(root.join("Other/msodbcsql17.msi"), b"wrong").unwrap();
    fs::write(root.join("Prereqs/ODBC18/MSODBCSQL18.MSI"), b"right").unwrap();

    let locator = BundledInstaller {
        root: root.to_path_buf(),
        bundle_dir: "Prereqs/ODBC18".to_string(),
        pattern: "msodbcsql*.msi".to_string(),
    };
    let found = locator.locate().unwrap().unwrap();
    assert!(found.ends_with("Prereqs/ODBC18/MSODBCSQL18.MSI"));
}
