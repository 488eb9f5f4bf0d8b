// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt, io, process::ExitStatus};

pub type MigratorResult<T> = Result<T, MigratorError>;

#[derive(Debug)]
pub enum MigratorError {
    Msg(String),
    Chained(String, Box<MigratorError>),
    /// A phase failed and the automatic revert that followed also failed.
    /// The device is left wherever the revert stopped.
    RevertFailure {
        causal_error: Box<MigratorError>,
        revert_error: Box<MigratorError>,
    },
    /// Executables the migrator relies on could not be found.
    BinariesNotFound {
        names: Vec<String>,
        locations: Vec<String>,
    },
    /// The attempt to start an external binary failed.
    CommandExecution {
        cmd: String,
        err: io::Error,
    },
    /// An external binary ran but exited unsuccessfully.
    CommandFailure {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },
    Io(io::Error),
    Nix(nix::Error),
    Dm(devicemapper::DmError),
    Serde(serde_json::error::Error),
}

impl fmt::Display for MigratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigratorError::Msg(s) => write!(f, "{s}"),
            MigratorError::Chained(msg, err) => write!(f, "{msg}; caused by: {err}"),
            MigratorError::RevertFailure {
                causal_error,
                revert_error,
            } => write!(
                f,
                "Migration failed: {causal_error}; revert of the partially applied migration also failed: {revert_error}"
            ),
            MigratorError::BinariesNotFound { names, locations } => write!(
                f,
                "executables not found: [{}], locations searched: [{}]",
                names.join(", "),
                locations.join(", ")
            ),
            MigratorError::CommandExecution { cmd, err } => {
                write!(f, "failed to execute command {cmd}: {err}")
            }
            MigratorError::CommandFailure {
                cmd,
                status,
                stderr,
            } => write!(
                f,
                "command {cmd} failed with {status}, stderr: {}",
                stderr.trim()
            ),
            MigratorError::Io(err) => write!(f, "IO error: {err}"),
            MigratorError::Nix(err) => write!(f, "Nix error: {err}"),
            MigratorError::Dm(err) => write!(f, "DM error: {err}"),
            MigratorError::Serde(err) => write!(f, "Serde error: {err}"),
        }
    }
}

impl Error for MigratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MigratorError::Msg(_)
            | MigratorError::BinariesNotFound { .. }
            | MigratorError::CommandFailure { .. } => None,
            MigratorError::Chained(_, err) => Some(err.as_ref()),
            MigratorError::RevertFailure { causal_error, .. } => Some(causal_error.as_ref()),
            MigratorError::CommandExecution { err, .. } | MigratorError::Io(err) => Some(err),
            MigratorError::Nix(err) => Some(err),
            MigratorError::Dm(err) => Some(err),
            MigratorError::Serde(err) => Some(err),
        }
    }
}

impl From<io::Error> for MigratorError {
    fn from(err: io::Error) -> MigratorError {
        MigratorError::Io(err)
    }
}

impl From<nix::Error> for MigratorError {
    fn from(err: nix::Error) -> MigratorError {
        MigratorError::Nix(err)
    }
}

impl From<devicemapper::DmError> for MigratorError {
    fn from(err: devicemapper::DmError) -> MigratorError {
        MigratorError::Dm(err)
    }
}

impl From<serde_json::error::Error> for MigratorError {
    fn from(err: serde_json::error::Error) -> MigratorError {
        MigratorError::Serde(err)
    }
}
