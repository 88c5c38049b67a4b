//! Ephemeral file handling for credential material and exported logs.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
#[cfg(unix)]
use cap_std::fs::OpenOptionsExt;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised while writing or removing run-scoped files.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FileError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the path does not name a file.
    #[error("{path} is missing a file name")]
    MissingFileName {
        /// Offending path.
        path: Utf8PathBuf,
    },
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), FileError> {
    let file_name = path.file_name().ok_or_else(|| FileError::MissingFileName {
        path: path.to_path_buf(),
    })?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, file_name))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> FileError {
    FileError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Writes `contents` to `path`, creating parent directories as needed and
/// replacing any existing file.
///
/// # Errors
///
/// Returns [`FileError`] when the directory cannot be created or the file
/// cannot be written.
pub fn write_file(path: &Utf8Path, contents: &str) -> Result<(), FileError> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| io_error(parent, &err))?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| io_error(parent, &err))?;
    dir.write(file_name, contents)
        .map_err(|err| io_error(path, &err))
}

/// Writes `contents` to `path` readable by the owner only (mode `0600` on
/// Unix). An existing file is replaced rather than reused so its old
/// permissions never carry over.
///
/// # Errors
///
/// Returns [`FileError`] when the directory cannot be created or the file
/// cannot be written.
pub fn write_private_file(path: &Utf8Path, contents: &str) -> Result<(), FileError> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| io_error(parent, &err))?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| io_error(parent, &err))?;
    match dir.remove_file(file_name) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_error(path, &err)),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = dir
        .open_with(file_name, &options)
        .map_err(|err| io_error(path, &err))?;
    file.write_all(contents.as_bytes())
        .map_err(|err| io_error(path, &err))
}

/// Reads `path` into a string.
///
/// # Errors
///
/// Returns [`FileError`] when the file cannot be opened or is not UTF-8.
pub fn read_file(path: &Utf8Path) -> Result<String, FileError> {
    let (parent, file_name) = split(path)?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| io_error(parent, &err))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_error(path, &err))
}

/// Removes `path` if it exists. Returns whether a file was removed.
///
/// # Errors
///
/// Returns [`FileError`] when the file exists but cannot be removed.
pub fn remove_if_present(path: &Utf8Path) -> Result<bool, FileError> {
    let (parent, file_name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_error(parent, &err)),
    };
    match dir.remove_file(file_name) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_error(path, &err)),
    }
}
