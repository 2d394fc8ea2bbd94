use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::artifact::{self, Resolution};
use crate::config::{PhasePolicy, Settings};
use crate::error::{Phase, StepContext, TransferError};
use crate::fs_util;
use crate::host::{self, ToolLocator};
use crate::prereq::{
    self, BundledInstaller, ComponentProbe, HttpInstaller, InstallOutcome, InstallRunner,
    InstallerLocator, ProvidedInstaller,
};
use crate::process::{OutputObserver, ProcessInvocation, ProcessResult, ProcessRunner, StreamKind};
use crate::progress::{Percent, ProgressEstimator};
use crate::staging::{Area, StagingArea};

/// Substrings (case-insensitive) that mark a tool output line as an issue.
const ISSUE_MARKERS: &[&str] = &["fail", "error", "denied", "timeout", "unavailable"];
const PAYLOAD_DIRS: &[&str] = &["Updates", "Redist"];
const PREREQ_CHECK_RELATIVE: &[&str] = &["SMSSETUP", "BIN", "x64", "prereqchk.exe"];

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Step {
        phase: Phase,
        message: String,
    },
    Progress {
        phase: Phase,
        percent: Percent,
        status: String,
    },
    FileCompleted {
        phase: Phase,
        path: PathBuf,
        size: u64,
    },
    Finished {
        phase: Phase,
        success: bool,
    },
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub output_zip: PathBuf,
    pub ensure_prerequisite: bool,
    pub prerequisite_installer: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub output_zip: PathBuf,
    pub tool_exit_code: i32,
    pub usage_data_relocated: bool,
    pub prerequisite: Option<InstallOutcome>,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub input_zip: PathBuf,
    pub download_output: PathBuf,
    pub output_zip: PathBuf,
    pub error_log: PathBuf,
    pub proxy: Option<String>,
    pub include_prerequisite: bool,
    pub ensure_prerequisite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub output_zip: PathBuf,
    pub error_log: Option<PathBuf>,
    pub tool_exit_code: i32,
    pub downloaded_bytes: u64,
    pub completed_files: usize,
    pub issues: usize,
    pub prerequisite: Option<InstallOutcome>,
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub input_zip: PathBuf,
    pub ensure_prerequisite: bool,
    /// `CD.Latest` folder; when set, `prereqchk.exe /LOCAL` runs after the import.
    pub prereq_check_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub tool_exit_code: i32,
    pub prerequisite: Option<InstallOutcome>,
    pub prereq_check_exit_code: Option<i32>,
}

/// The three verbs of the external tool.
#[derive(Debug, Clone, Copy)]
pub enum ToolCommand<'a> {
    Prepare {
        usage_data_dest: &'a Path,
    },
    Connect {
        usage_data_src: &'a Path,
        update_pack_dest: &'a Path,
        proxy: Option<&'a str>,
    },
    Import {
        update_pack_src: &'a Path,
    },
}

impl ToolCommand<'_> {
    pub fn invocation(&self, exe: &Path) -> ProcessInvocation {
        let invocation = ProcessInvocation::new(exe);
        match *self {
            ToolCommand::Prepare { usage_data_dest } => invocation
                .arg("-prepare")
                .arg("-usagedatadest")
                .arg(usage_data_dest.to_string_lossy()),
            ToolCommand::Connect {
                usage_data_src,
                update_pack_dest,
                proxy,
            } => {
                let invocation = invocation
                    .arg("-connect")
                    .arg("-usagedatasrc")
                    .arg(usage_data_src.to_string_lossy())
                    .arg("-updatepackdest")
                    .arg(update_pack_dest.to_string_lossy());
                match proxy.map(str::trim).filter(|value| !value.is_empty()) {
                    Some(proxy) => invocation.arg("-proxy").arg(proxy),
                    None => invocation,
                }
            }
            ToolCommand::Import { update_pack_src } => invocation
                .arg("-import")
                .arg("-updatepacksrc")
                .arg(update_pack_src.to_string_lossy()),
        }
    }
}

/// Logs tool output, feeds the estimator and forwards progress to the sink.
struct ToolObserver<'a> {
    phase: Phase,
    estimator: Option<&'a ProgressEstimator>,
    sink: &'a dyn ProgressSink,
}

impl ToolObserver<'_> {
    fn report(&self, estimator: &ProgressEstimator) {
        let observed = estimator.observed_bytes();
        let status = match estimator.expected_total_bytes() {
            Some(total) => format!(
                "Downloaded {} of ~{}",
                fs_util::format_bytes(observed),
                fs_util::format_bytes(total)
            ),
            None => format!("Downloaded {}", fs_util::format_bytes(observed)),
        };
        self.sink.event(ProgressEvent::Progress {
            phase: self.phase,
            percent: estimator.percent(),
            status,
        });
    }

    fn final_scan(&self) {
        let Some(estimator) = self.estimator else {
            return;
        };
        self.on_tick();
        self.sink.event(ProgressEvent::Progress {
            phase: self.phase,
            percent: Percent::COMPLETE,
            status: format!(
                "Finalizing, downloaded {}",
                fs_util::format_bytes(estimator.observed_bytes())
            ),
        });
    }
}

impl OutputObserver for ToolObserver<'_> {
    fn on_line(&self, stream: StreamKind, line: &str) {
        match stream {
            StreamKind::Stdout => tracing::debug!(phase = %self.phase, "{line}"),
            StreamKind::Stderr => tracing::warn!(phase = %self.phase, "{line}"),
        }
        let Some(estimator) = self.estimator else {
            return;
        };
        if let Some(percent) = estimator.observe_line(line).percent {
            self.sink.event(ProgressEvent::Progress {
                phase: self.phase,
                percent: Percent::Known(percent),
                status: line.trim().to_string(),
            });
        }
    }

    fn on_tick(&self) {
        let Some(estimator) = self.estimator else {
            return;
        };
        estimator.scan(|file| {
            tracing::info!(path = %file.path.display(), size = file.size, "file completed");
            self.sink.event(ProgressEvent::FileCompleted {
                phase: self.phase,
                path: file.path.clone(),
                size: file.size,
            });
        });
        self.report(estimator);
    }
}

pub struct App<P: ComponentProbe, I: InstallRunner> {
    settings: Settings,
    runner: ProcessRunner,
    probe: P,
    installer: I,
}

impl<P: ComponentProbe, I: InstallRunner> App<P, I> {
    pub fn new(settings: Settings, probe: P, installer: I) -> Self {
        let runner = ProcessRunner::new(settings.poll_interval());
        Self {
            settings,
            runner,
            probe,
            installer,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Offline side: runs the tool in `prepare` mode and packs the tool plus
    /// its usage data into `request.output_zip`.
    pub fn export(
        &self,
        request: &ExportRequest,
        locator: &dyn ToolLocator,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, TransferError> {
        let result = self.run_export(request, locator, sink);
        finish(Phase::Export, sink, result)
    }

    /// Online side: unpacks an export package, runs the tool in `connect`
    /// mode and packs whatever it downloaded.
    pub fn fetch(
        &self,
        request: &FetchRequest,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, TransferError> {
        let result = self.run_fetch(request, sink);
        finish(Phase::Fetch, sink, result)
    }

    /// Offline side again: unpacks a fetch package and feeds it to the tool
    /// in `import` mode.
    pub fn import(
        &self,
        request: &ImportRequest,
        locator: &dyn ToolLocator,
        sink: &dyn ProgressSink,
    ) -> Result<ImportResult, TransferError> {
        let result = self.run_import(request, locator, sink);
        finish(Phase::Import, sink, result)
    }

    fn run_export(
        &self,
        request: &ExportRequest,
        locator: &dyn ToolLocator,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, TransferError> {
        const PHASE: Phase = Phase::Export;
        let layout = &self.settings.tool;
        let policy = self.settings.export;

        let prerequisite = if request.ensure_prerequisite {
            step(sink, PHASE, "checking prerequisite");
            let locator = ProvidedInstaller(request.prerequisite_installer.clone());
            self.ensure_prerequisite(policy, &locator)
                .at_step(PHASE, "prerequisite")?
        } else {
            None
        };

        step(sink, PHASE, "locating tool");
        let tool_folder = locator.locate_tool_folder().at_step(PHASE, "locate-tool")?;
        host::tool_executable(&tool_folder, &layout.executable_name)
            .at_step(PHASE, "locate-tool")?;

        step(sink, PHASE, "staging tool");
        let staging = self
            .create_staging(
                "xfer-",
                &[
                    (Area::Tool, layout.tool_dir_name.as_str()),
                    (Area::Transfer, layout.transfer_dir_name.as_str()),
                ],
            )
            .at_step(PHASE, "stage")?;
        let staged_tool = staging.copy_into(Area::Tool, &tool_folder).at_step(PHASE, "stage")?;
        let transfer = staging.area(Area::Transfer).at_step(PHASE, "stage")?;
        let usage_data = transfer.join(&layout.usage_data_name);
        let exe = staged_tool.join(&layout.executable_name);

        step(sink, PHASE, "preparing usage data");
        let command = ToolCommand::Prepare {
            usage_data_dest: usage_data.as_std_path(),
        };
        let invocation = command
            .invocation(exe.as_std_path())
            .current_dir(staged_tool.as_std_path())
            .timeout(self.settings.tool_timeout());
        let estimator = ProgressEstimator::new(transfer.as_std_path());
        let result = self
            .run_tool(PHASE, &invocation, Some(&estimator), sink)
            .at_step(PHASE, "run-tool")?;
        check_exit(PHASE, &result, policy).at_step(PHASE, "run-tool")?;

        let resolution = artifact::resolve(
            staging.root().as_std_path(),
            usage_data.as_std_path(),
            &layout.usage_data_pattern,
        )
        .at_step(PHASE, "resolve-artifact")?;

        step(sink, PHASE, "packaging");
        fs_util::zip_dir(staging.root().as_std_path(), &request.output_zip)
            .at_step(PHASE, "package")?;
        staging.release();

        tracing::info!(output = %request.output_zip.display(), "export package written");
        Ok(ExportResult {
            output_zip: request.output_zip.clone(),
            tool_exit_code: result.exit_code,
            usage_data_relocated: matches!(resolution, Resolution::Relocated { .. }),
            prerequisite,
        })
    }

    fn run_fetch(
        &self,
        request: &FetchRequest,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, TransferError> {
        const PHASE: Phase = Phase::Fetch;
        let policy = self.settings.fetch;
        let download = request.download_output.as_path();

        step(sink, PHASE, "validating input package");
        validate_input(&request.input_zip).at_step(PHASE, "validate-input")?;

        prepare_output(download, &request.error_log).at_step(PHASE, "prepare-output")?;

        step(sink, PHASE, "extracting input package");
        let staging = self.create_staging("online-", &[]).at_step(PHASE, "stage")?;
        fs_util::extract_zip(&request.input_zip, staging.root().as_std_path())
            .at_step(PHASE, "extract")?;

        let package = locate_packaged_tool(staging.root(), &self.settings)
            .at_step(PHASE, "locate-tool")?;

        let prerequisite_path = download
            .join(&self.settings.prerequisite.bundle_dir)
            .join(&self.settings.prerequisite.installer_file_name);
        let http = HttpInstaller {
            url: self.settings.prerequisite.download_url.clone(),
            destination: prerequisite_path,
            proxy: request.proxy.clone(),
        };
        if request.include_prerequisite {
            step(sink, PHASE, "adding prerequisite installer to package");
            match http.locate() {
                Ok(_) => tracing::info!("prerequisite installer added to package"),
                Err(err) => tracing::warn!(%err, "could not add prerequisite installer to package"),
            }
        }
        let prerequisite = if request.ensure_prerequisite {
            step(sink, PHASE, "checking prerequisite");
            self.ensure_prerequisite(policy, &http)
                .at_step(PHASE, "prerequisite")?
        } else {
            None
        };

        step(sink, PHASE, "downloading updates");
        let command = ToolCommand::Connect {
            usage_data_src: package.transfer_dir.as_std_path(),
            update_pack_dest: download,
            proxy: request.proxy.as_deref(),
        };
        let invocation = command
            .invocation(package.exe.as_std_path())
            .current_dir(package.tool_dir.as_std_path())
            .timeout(self.settings.tool_timeout());
        let estimator = ProgressEstimator::new(download);
        let result = self
            .run_tool(PHASE, &invocation, Some(&estimator), sink)
            .at_step(PHASE, "run-tool")?;
        check_exit(PHASE, &result, policy).at_step(PHASE, "run-tool")?;

        let downloaded_bytes = estimator.observed_bytes();
        let looks_populated = PAYLOAD_DIRS.iter().any(|name| download.join(name).is_dir());
        if downloaded_bytes < self.settings.min_download_bytes && !looks_populated {
            tracing::error!(
                downloaded = %fs_util::format_bytes(downloaded_bytes),
                "no downloaded content detected (too small and no Updates/Redist folder)"
            );
        }

        let mut issues = collect_issues(result.lines(), download);
        if !result.success() {
            issues.insert(0, format!("Tool exited with code {}", result.exit_code));
        }
        let error_log = if issues.is_empty() {
            None
        } else {
            match write_error_log(&request.error_log, &issues) {
                Ok(()) => {
                    tracing::warn!(
                        issues = issues.len(),
                        log = %request.error_log.display(),
                        "download issues detected"
                    );
                    Some(request.error_log.clone())
                }
                Err(err) => {
                    tracing::warn!(%err, "could not write error log");
                    None
                }
            }
        };

        step(sink, PHASE, "packaging download");
        fs_util::zip_dir(download, &request.output_zip).at_step(PHASE, "package")?;
        staging.release();

        tracing::info!(output = %request.output_zip.display(), "download package written");
        Ok(FetchResult {
            output_zip: request.output_zip.clone(),
            error_log,
            tool_exit_code: result.exit_code,
            downloaded_bytes,
            completed_files: estimator.completed_count(),
            issues: issues.len(),
            prerequisite,
        })
    }

    fn run_import(
        &self,
        request: &ImportRequest,
        locator: &dyn ToolLocator,
        sink: &dyn ProgressSink,
    ) -> Result<ImportResult, TransferError> {
        const PHASE: Phase = Phase::Import;
        let layout = &self.settings.tool;
        let policy = self.settings.import;

        require_file("input package", &request.input_zip).at_step(PHASE, "validate-input")?;

        step(sink, PHASE, "locating tool");
        let tool_folder = locator.locate_tool_folder().at_step(PHASE, "locate-tool")?;
        let exe = host::tool_executable(&tool_folder, &layout.executable_name)
            .at_step(PHASE, "locate-tool")?;

        step(sink, PHASE, "extracting update package");
        let staging = self
            .create_staging("import-", &[(Area::UpdatePack, "UpdatePack")])
            .at_step(PHASE, "stage")?;
        let update_pack = staging.area(Area::UpdatePack).at_step(PHASE, "stage")?;
        fs_util::extract_zip_replacing(&request.input_zip, update_pack.as_std_path())
            .at_step(PHASE, "extract")?;

        let prerequisite = if request.ensure_prerequisite {
            step(sink, PHASE, "checking prerequisite");
            let prereq = &self.settings.prerequisite;
            let locator = BundledInstaller {
                root: update_pack.as_std_path().to_path_buf(),
                bundle_dir: prereq.bundle_dir.clone(),
                pattern: prereq.bundle_pattern.clone(),
            };
            self.ensure_prerequisite(policy, &locator)
                .at_step(PHASE, "prerequisite")?
        } else {
            None
        };

        step(sink, PHASE, "importing updates");
        let command = ToolCommand::Import {
            update_pack_src: update_pack.as_std_path(),
        };
        let invocation = command
            .invocation(exe.as_std_path())
            .current_dir(tool_folder.as_std_path())
            .timeout(self.settings.tool_timeout());
        let result = self
            .run_tool(PHASE, &invocation, None, sink)
            .at_step(PHASE, "run-tool")?;
        check_exit(PHASE, &result, policy).at_step(PHASE, "run-tool")?;

        let prereq_check_exit_code = match &request.prereq_check_root {
            Some(root) => {
                step(sink, PHASE, "running prerequisite check");
                self.run_prereq_check(root)
            }
            None => None,
        };

        staging.release();
        tracing::info!("import completed");
        Ok(ImportResult {
            tool_exit_code: result.exit_code,
            prerequisite,
            prereq_check_exit_code,
        })
    }

    fn create_staging(
        &self,
        prefix: &str,
        areas: &[(Area, &str)],
    ) -> Result<StagingArea, TransferError> {
        StagingArea::create(&self.settings.staging_parent(), prefix, areas)
    }

    fn run_tool(
        &self,
        phase: Phase,
        invocation: &ProcessInvocation,
        estimator: Option<&ProgressEstimator>,
        sink: &dyn ProgressSink,
    ) -> Result<ProcessResult, TransferError> {
        tracing::info!(%phase, command = %invocation.command_line(), "running tool");
        let observer = ToolObserver {
            phase,
            estimator,
            sink,
        };
        let result = self.runner.run_observed(invocation, &observer)?;
        observer.final_scan();
        tracing::info!(%phase, exit_code = result.exit_code, "tool exited");
        Ok(result)
    }

    /// Returns `Ok(None)` when the policy lets a prerequisite failure slide.
    fn ensure_prerequisite(
        &self,
        policy: PhasePolicy,
        locator: &dyn InstallerLocator,
    ) -> Result<Option<InstallOutcome>, TransferError> {
        match prereq::ensure_installed(&self.probe, locator, &self.installer) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(err) if !policy.abort_on_prerequisite_failure => {
                tracing::warn!(%err, "prerequisite not ensured, continuing");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn run_prereq_check(&self, cd_latest: &Path) -> Option<i32> {
        let exe = PREREQ_CHECK_RELATIVE
            .iter()
            .fold(cd_latest.to_path_buf(), |path, part| path.join(part));
        if !exe.is_file() {
            tracing::warn!(path = %exe.display(), "prereqchk.exe not found, skipping");
            return None;
        }
        let mut invocation = ProcessInvocation::new(&exe)
            .arg("/LOCAL")
            .timeout(self.settings.tool_timeout());
        if let Some(dir) = exe.parent() {
            invocation = invocation.current_dir(dir);
        }
        match self.runner.run(&invocation) {
            Ok(result) => {
                for line in result.stdout.lines() {
                    tracing::debug!("{line}");
                }
                for line in result.stderr.lines() {
                    tracing::warn!("{line}");
                }
                tracing::info!(exit_code = result.exit_code, "prerequisite check finished");
                Some(result.exit_code)
            }
            Err(err) => {
                tracing::warn!(%err, "prerequisite check could not run");
                None
            }
        }
    }
}

fn step(sink: &dyn ProgressSink, phase: Phase, message: &str) {
    tracing::info!(%phase, "{message}");
    sink.event(ProgressEvent::Step {
        phase,
        message: message.to_string(),
    });
}

fn finish<T>(
    phase: Phase,
    sink: &dyn ProgressSink,
    result: Result<T, TransferError>,
) -> Result<T, TransferError> {
    if let Err(err) = &result {
        tracing::error!(%phase, error = %err, cause = %err.root_cause(), "phase failed");
    }
    sink.event(ProgressEvent::Finished {
        phase,
        success: result.is_ok(),
    });
    result
}

fn check_exit(phase: Phase, result: &ProcessResult, policy: PhasePolicy) -> Result<(), TransferError> {
    if result.success() {
        return Ok(());
    }
    tracing::error!(%phase, exit_code = result.exit_code, "tool returned a non-zero exit code");
    if policy.abort_on_tool_failure {
        return Err(TransferError::ToolFailed {
            exit_code: result.exit_code,
        });
    }
    Ok(())
}

fn require_file(what: &str, path: &Path) -> Result<(), TransferError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(TransferError::not_found(what, path))
    }
}

fn validate_input(input_zip: &Path) -> Result<(), TransferError> {
    require_file("input package", input_zip)?;
    fs_util::validate_zip(input_zip)
}

fn prepare_output(download: &Path, error_log: &Path) -> Result<(), TransferError> {
    if download.exists() {
        tracing::info!(path = %download.display(), "cleaning existing download output");
        fs::remove_dir_all(download)
            .map_err(|err| TransferError::Filesystem(format!("remove {}: {err}", download.display())))?;
    }
    fs::create_dir_all(download)
        .map_err(|err| TransferError::Filesystem(format!("create {}: {err}", download.display())))?;
    if error_log.is_file() {
        fs::remove_file(error_log).map_err(|err| {
            TransferError::Filesystem(format!("remove {}: {err}", error_log.display()))
        })?;
    }
    Ok(())
}

/// Where the tool landed inside an extracted export package.
struct PackagedTool {
    tool_dir: Utf8PathBuf,
    exe: Utf8PathBuf,
    transfer_dir: Utf8PathBuf,
}

fn locate_packaged_tool(root: &Utf8Path, settings: &Settings) -> Result<PackagedTool, TransferError> {
    let layout = &settings.tool;
    let tool_dir = find_utf8_dir(root, &layout.tool_dir_name)?
        .ok_or_else(|| TransferError::not_found("tool folder in package", root.as_std_path()))?;
    let exe = host::tool_executable(&tool_dir, &layout.executable_name)?;

    let direct = root.join(&layout.transfer_dir_name);
    let transfer_dir = if direct.as_std_path().is_dir() {
        direct
    } else {
        find_utf8_dir(root, &layout.transfer_dir_name)?
            .ok_or_else(|| TransferError::not_found("transfer folder in package", direct.as_std_path()))?
    };

    let cabs: Vec<PathBuf> = artifact::find_matching(transfer_dir.as_std_path(), &layout.usage_data_pattern)?
        .into_iter()
        .filter(|path| path.parent() == Some(transfer_dir.as_std_path()))
        .collect();
    let Some(first) = cabs.first() else {
        return Err(TransferError::not_found(
            format!("usage data ({})", layout.usage_data_pattern),
            transfer_dir.as_std_path(),
        ));
    };
    let named = cabs.iter().any(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.eq_ignore_ascii_case(&layout.usage_data_name))
    });
    if !named {
        let expected = transfer_dir.join(&layout.usage_data_name);
        fs::copy(first, expected.as_std_path()).map_err(|err| {
            TransferError::Filesystem(format!("copy {} to {expected}: {err}", first.display()))
        })?;
        tracing::info!(from = %first.display(), "usage data normalized to {}", layout.usage_data_name);
    }

    Ok(PackagedTool {
        tool_dir,
        exe,
        transfer_dir,
    })
}

fn find_utf8_dir(root: &Utf8Path, name: &str) -> Result<Option<Utf8PathBuf>, TransferError> {
    match fs_util::find_dir_named(root.as_std_path(), name)? {
        Some(found) => Utf8PathBuf::from_path_buf(found)
            .map(Some)
            .map_err(|path| TransferError::Filesystem(format!("non UTF-8 path: {}", path.display()))),
        None => Ok(None),
    }
}

/// Tool output lines that look like trouble, plus every zero-length file in
/// the download tree.
pub fn collect_issues<'a>(lines: impl Iterator<Item = &'a str>, download: &Path) -> Vec<String> {
    let mut issues: Vec<String> = lines
        .filter(|line| {
            let lowered = line.to_lowercase();
            ISSUE_MARKERS.iter().any(|marker| lowered.contains(marker))
        })
        .map(str::to_string)
        .collect();

    for path in fs_util::walk_files_lenient(download) {
        if fs::metadata(&path).map(|meta| meta.len() == 0).unwrap_or(false) {
            issues.push(format!("Zero-length file: {}", path.display()));
        }
    }
    issues
}

fn write_error_log(path: &Path, issues: &[String]) -> Result<(), TransferError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| TransferError::Filesystem(format!("create {}: {err}", parent.display())))?;
    }
    let mut content = issues.join("\n");
    content.push('\n');
    fs::write(path, content)
        .map_err(|err| TransferError::Filesystem(format!("write {}: {err}", path.display())))
}
