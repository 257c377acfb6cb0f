//! Platform directories for configuration, durable session data and logs

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::meta::NAME;

pub struct Directory {}

impl Directory {
    #[cfg(not(feature = "portable"))]
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("org", "careconnect", *NAME)
    }

    /// Portable installs keep everything next to the executable
    #[cfg(feature = "portable")]
    fn project_dirs() -> Option<ProjectDirs> {
        let exe = std::env::current_exe().ok()?;
        let dir = exe.parent()?.join("careconnect-data");
        ProjectDirs::from_path(dir)
    }

    fn ensure(dir: PathBuf) -> Option<PathBuf> {
        if !dir.exists() {
            if let Err(err) = std::fs::create_dir_all(&dir) {
                tracing::error!("Failed to create {}: {err}", dir.display());
                return None;
            }
        }
        Some(dir)
    }

    /// Directory holding `settings.toml`
    pub fn config_directory() -> Option<PathBuf> {
        Self::project_dirs().and_then(|d| Self::ensure(d.config_dir().to_path_buf()))
    }

    /// Directory for durable client data (the persisted session)
    pub fn data_local_directory() -> Option<PathBuf> {
        Self::project_dirs().and_then(|d| Self::ensure(d.data_local_dir().to_path_buf()))
    }

    pub fn logs_directory() -> Option<PathBuf> {
        Self::data_local_directory().and_then(|d| Self::ensure(d.join("logs")))
    }

    /// Directory for the encrypted session file, under `base` or the
    /// platform data directory
    pub fn auth_directory(base: Option<PathBuf>) -> Option<PathBuf> {
        let base = match base {
            Some(base) => Self::ensure(base)?,
            None => Self::data_local_directory()?,
        };
        Self::ensure(base.join("auth"))
    }
}
