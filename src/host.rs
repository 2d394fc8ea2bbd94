use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TransferError;

/// Finds the folder the external tool is installed in.
pub trait ToolLocator {
    fn locate_tool_folder(&self) -> Result<Utf8PathBuf, TransferError>;
}

/// A tool location supplied on the command line or in config. Accepts either
/// the folder or the executable inside it.
#[derive(Debug, Clone)]
pub struct ExplicitToolPath {
    path: Utf8PathBuf,
    executable_name: String,
}

impl ExplicitToolPath {
    pub fn new(path: impl Into<Utf8PathBuf>, executable_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            executable_name: executable_name.into(),
        }
    }
}

impl ToolLocator for ExplicitToolPath {
    fn locate_tool_folder(&self) -> Result<Utf8PathBuf, TransferError> {
        let path = self.path.as_std_path();
        if path.is_dir() {
            return Ok(self.path.clone());
        }
        let names_executable = self
            .path
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case(&self.executable_name));
        if path.is_file() && names_executable {
            if let Some(parent) = self.path.parent() {
                return Ok(parent.to_owned());
            }
        }
        Err(TransferError::not_found("tool folder", path))
    }
}

/// Full path of the tool executable in `folder`; it has to exist.
pub fn tool_executable(folder: &Utf8Path, executable_name: &str) -> Result<Utf8PathBuf, TransferError> {
    let exe = folder.join(executable_name);
    if exe.as_std_path().is_file() {
        Ok(exe)
    } else {
        Err(TransferError::not_found("tool executable", exe.as_std_path()))
    }
}
