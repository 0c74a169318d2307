use std::fs;
use std::path::{Component, Path, PathBuf};
use std::vec;

use tracing::debug;

use crate::config::AncestorRule;
use crate::error::ReconError;
use crate::model::{FileKind, FileRef};

/// Name prefix of editor lock/temp files (e.g. `~$report.xlsx`).
pub const TEMP_FILE_PREFIX: &str = "~$";

impl AncestorRule {
    /// Pick the ancestor segment of `folder` (the practitioner folder path).
    pub fn ancestor_of(&self, folder: &Path) -> Option<String> {
        let parts = path_segments(folder);
        let (offset, min_len) = match self {
            Self::SecondToLast => (2, 2),
            Self::TenthFromLast => (10, 10),
        };
        if parts.len() > min_len {
            parts.get(parts.len() - offset).cloned()
        } else {
            None
        }
    }
}

/// Path split into its named segments. A leading root counts as one (empty)
/// segment, the way splitting an absolute path on the separator does.
fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::RootDir => Some(String::new()),
            Component::Prefix(p) => Some(p.as_os_str().to_string_lossy().into_owned()),
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::CurDir | Component::ParentDir => None,
        })
        .collect()
}

/// Lazy walk of `<system root>/<practitioner folder>/<file>`.
///
/// The system root is listed eagerly so an unreadable root fails up front;
/// practitioner folders are listed one at a time as the iterator advances.
/// Entries are visited in name order.
pub struct SourceScan {
    rule: AncestorRule,
    folders: vec::IntoIter<PathBuf>,
    current: Option<FolderFiles>,
}

struct FolderFiles {
    practitioner: String,
    ancestor: Option<String>,
    files: vec::IntoIter<(PathBuf, FileKind)>,
}

/// Start scanning one system's root directory.
pub fn scan_system(root: &Path, rule: AncestorRule) -> Result<SourceScan, ReconError> {
    let folders: Vec<PathBuf> = read_dir_sorted(root)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    debug!(root = %root.display(), folders = folders.len(), "listed practitioner folders");
    Ok(SourceScan {
        rule,
        folders: folders.into_iter(),
        current: None,
    })
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, ReconError> {
    let entries = fs::read_dir(dir).map_err(|e| ReconError::DirectoryRead {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ReconError::DirectoryRead {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

/// Allow-listed, non-temporary file, or `None`.
fn candidate_kind(path: &Path) -> Option<FileKind> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with(TEMP_FILE_PREFIX) || !path.is_file() {
        return None;
    }
    FileKind::from_extension(path.extension()?.to_str()?)
}

impl SourceScan {
    fn open_folder(&self, folder: &Path) -> Result<FolderFiles, ReconError> {
        let files: Vec<(PathBuf, FileKind)> = read_dir_sorted(folder)?
            .into_iter()
            .filter_map(|p| candidate_kind(&p).map(|k| (p, k)))
            .collect();
        let practitioner = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(folder = %folder.display(), files = files.len(), "listed practitioner files");
        Ok(FolderFiles {
            practitioner,
            ancestor: self.rule.ancestor_of(folder),
            files: files.into_iter(),
        })
    }
}

impl Iterator for SourceScan {
    type Item = Result<FileRef, ReconError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ref mut folder) = self.current {
                if let Some((path, kind)) = folder.files.next() {
                    return Some(Ok(FileRef {
                        path,
                        practitioner_folder: folder.practitioner.clone(),
                        ancestor_folder: folder.ancestor.clone(),
                        kind,
                    }));
                }
            }
            let next_folder = self.folders.next()?;
            match self.open_folder(&next_folder) {
                Ok(files) => self.current = Some(files),
                Err(e) => {
                    // Unreadable folder ends the scan for this system.
                    self.folders = Vec::new().into_iter();
                    self.current = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
