//! Scratch directory for intermediate still images.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the default staging directory next to the executable.
pub const DEFAULT_STAGING_DIR_NAME: &str = "tmpframe";

/// A scratch directory owned by one extraction job at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingDirectory {
    path: PathBuf,
}

impl StagingDirectory {
    /// Use `path` as the staging directory.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// `<directory of the running executable>/tmpframe`, falling back to the
    /// current directory when the executable path is unknown.
    pub fn default_location() -> Self {
        let base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(DEFAULT_STAGING_DIR_NAME))
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory if absent, otherwise delete everything inside it.
    ///
    /// Never fails: every entry is attempted, each error is logged, and any
    /// error makes the result `false`.
    pub fn ensure_clean(&self) -> bool {
        if !self.path.exists() {
            return match fs::create_dir_all(&self.path) {
                Ok(()) => true,
                Err(error) => {
                    log::warn!(
                        "Could not create staging directory {}: {error}",
                        self.path.display()
                    );
                    false
                }
            };
        }
        self.clear_entries(remove_entry)
    }

    fn clear_entries(&self, remove: impl Fn(&Path, bool) -> io::Result<()>) -> bool {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(error) => {
                log::warn!(
                    "Could not read staging directory {}: {error}",
                    self.path.display()
                );
                return false;
            }
        };

        let mut clean = true;
        for entry in entries {
            let result = entry.and_then(|entry| {
                let entry_path = entry.path();
                let is_dir = entry.file_type()?.is_dir();
                remove(&entry_path, is_dir).map(|()| entry_path)
            });
            match result {
                Ok(entry_path) => log::debug!("{} deleted", entry_path.display()),
                Err(error) => {
                    log::warn!(
                        "Could not clear entry of staging directory {}: {error}",
                        self.path.display()
                    );
                    clean = false;
                }
            }
        }
        clean
    }
}

fn remove_entry(path: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
