use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::TransferError;
use crate::fs_util;

/// Named sub-directories a phase can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Area {
    /// Copy of the external tool's installation folder.
    Tool,
    /// Usage data travelling to the online machine.
    Transfer,
    /// Downloaded update payload on its way in.
    UpdatePack,
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Area::Tool => write!(f, "tool"),
            Area::Transfer => write!(f, "transfer"),
            Area::UpdatePack => write!(f, "update-pack"),
        }
    }
}

/// A per-run working directory. The name carries a fresh UUID so two runs
/// never share one. Dropping the value removes the tree; [`release`] does the
/// same explicitly.
///
/// [`release`]: StagingArea::release
#[derive(Debug)]
pub struct StagingArea {
    root: Utf8PathBuf,
    created_at: DateTime<Utc>,
    areas: BTreeMap<Area, Utf8PathBuf>,
    released: bool,
}

impl StagingArea {
    pub fn create(
        parent: &Utf8Path,
        prefix: &str,
        areas: &[(Area, &str)],
    ) -> Result<Self, TransferError> {
        let root = parent.join(format!("{prefix}{}", Uuid::new_v4().simple()));
        fs::create_dir_all(root.as_std_path()).map_err(|err| {
            TransferError::Filesystem(format!("create staging area {root}: {err}"))
        })?;

        let mut staging = Self {
            root,
            created_at: Utc::now(),
            areas: BTreeMap::new(),
            released: false,
        };
        for (area, name) in areas {
            let path = staging.root.join(name);
            // On failure `staging` drops here and takes the root with it.
            fs::create_dir_all(path.as_std_path()).map_err(|err| {
                TransferError::Filesystem(format!("create staging sub-area {path}: {err}"))
            })?;
            staging.areas.insert(*area, path);
        }

        tracing::info!(root = %staging.root, "staging area created");
        Ok(staging)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn area(&self, area: Area) -> Result<&Utf8Path, TransferError> {
        self.areas
            .get(&area)
            .map(Utf8PathBuf::as_path)
            .ok_or_else(|| {
                TransferError::Filesystem(format!("staging area {} has no {area} sub-area", self.root))
            })
    }

    /// Copies a directory tree into a sub-area, overwriting what is there.
    pub fn copy_into(&self, area: Area, source: &Utf8Path) -> Result<&Utf8Path, TransferError> {
        let dest = self.area(area)?;
        fs_util::copy_dir_recursive(source.as_std_path(), dest.as_std_path())?;
        Ok(dest)
    }

    /// Removes the staging tree. Failure is logged and otherwise ignored.
    pub fn release(mut self) {
        self.remove_tree();
    }

    fn remove_tree(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if !self.root.as_std_path().exists() {
            return;
        }
        match fs::remove_dir_all(self.root.as_std_path()) {
            Ok(()) => tracing::info!(root = %self.root, "staging area removed"),
            Err(err) => {
                tracing::warn!(root = %self.root, %err, "could not remove staging area")
            }
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        self.remove_tree();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8_temp() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, path)
    }

    #[test]
    fn unknown_area_is_an_error() {
        let (_temp, parent) = utf8_temp();
        let staging = StagingArea::create(&parent, "xfer-", &[(Area::Tool, "Tool")]).unwrap();
        assert!(staging.area(Area::Tool).is_ok());
        assert!(staging.area(Area::UpdatePack).is_err());
    }

    #[test]
    fn drop_removes_tree() {
        let (_temp, parent) = utf8_temp();
        let root = {
            let staging = StagingArea::create(&parent, "xfer-", &[]).unwrap();
            fs::write(staging.root().join("leftover.bin").as_std_path(), b"x").unwrap();
            staging.root().to_owned()
        };
        assert!(!root.as_std_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_removal_is_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, base) = utf8_temp();
        let parent = base.join("locked");
        fs::create_dir_all(parent.as_std_path()).unwrap();
        let staging = StagingArea::create(&parent, "xfer-", &[(Area::Tool, "Tool")]).unwrap();
        fs::write(staging.root().join("Tool/tool.bin").as_std_path(), b"x").unwrap();
        let root = staging.root().to_owned();

        fs::set_permissions(parent.as_std_path(), fs::Permissions::from_mode(0o555)).unwrap();
        let privileged = fs::write(parent.join("write-check").as_std_path(), b"").is_ok();
        staging.release();
        let survived = root.as_std_path().exists();
        fs::set_permissions(parent.as_std_path(), fs::Permissions::from_mode(0o755)).unwrap();

        // Permission bits do not stop a privileged user.
        if !privileged {
            assert!(survived);
        }
    }
}
