//! MODIS Reprojection Tool installation and subprocess invocation.

use crate::error::SyncError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Executables shipped with the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MrtTool {
    Resample,
    Mosaic,
}

impl MrtTool {
    fn stem(&self) -> &'static str {
        match self {
            MrtTool::Resample => "resample",
            MrtTool::Mosaic => "mrtmosaic",
        }
    }

    /// Executable file name on the host platform.
    pub fn file_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.stem())
        } else {
            self.stem().to_string()
        }
    }
}

/// A validated tool installation root.
#[derive(Debug, Clone)]
pub struct MrtInstall {
    root: PathBuf,
}

impl MrtInstall {
    /// Checks that `root` holds the `bin` and `data` directories.
    pub fn locate(root: &Path) -> Result<Self, SyncError> {
        if !root.is_dir() {
            return Err(SyncError::ToolNotFound(root.to_path_buf()));
        }
        for sub in ["bin", "data"] {
            let dir = root.join(sub);
            if !dir.is_dir() {
                return Err(SyncError::ToolNotFound(dir));
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Resolved executable path, which must exist.
    pub fn executable(&self, tool: MrtTool) -> Result<PathBuf, SyncError> {
        let path = self.bin_dir().join(tool.file_name());
        if !path.is_file() {
            return Err(SyncError::ToolNotFound(path));
        }
        Ok(path)
    }

    /// `PATH` with the tool's `bin` directory in front.
    fn search_path(&self) -> Result<OsString, SyncError> {
        let mut paths = vec![self.bin_dir()];
        if let Some(current) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&current));
        }
        std::env::join_paths(paths).map_err(|e| {
            SyncError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })
    }

    /// Subprocess for `tool` with the tool environment applied.
    pub fn command(&self, tool: MrtTool) -> Result<Command, SyncError> {
        let executable = self.executable(tool)?;
        let mut command = Command::new(executable);
        command
            .env("MRT_DATA_DIR", self.data_dir())
            .env("PATH", self.search_path()?)
            .kill_on_drop(true);
        Ok(command)
    }

    /// Runs `tool` with `args` and waits for it to finish.
    pub async fn run(&self, tool: MrtTool, args: &[OsString]) -> Result<(), SyncError> {
        let mut command = self.command(tool)?;
        command.args(args);
        debug!("Running {} {:?}", tool.file_name(), args);

        let status = command.status().await?;
        if !status.success() {
            return Err(SyncError::ToolFailed {
                tool: tool.file_name(),
                status: status.to_string(),
            });
        }
        info!("{} finished", tool.file_name());
        Ok(())
    }
}
