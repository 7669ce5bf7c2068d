use std::io;
use std::path::PathBuf;

use devkit_async_utils::Cancelled;
use thiserror::Error;

use crate::ShellOutput;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("do not pass PATH in extra env, use extra paths instead")]
    PathInExtraEnv,

    #[error("cannot handle colon in extra path `{}`", .0.display())]
    ColonInPath(PathBuf),

    #[error("command is empty")]
    EmptyCommand,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    /// The command ran but exited non-zero while `check` was on.
    #[error("command `{command}` exited with status {exit_code}")]
    Failed {
        command: String,
        exit_code: i32,
        output: Box<ShellOutput>,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ShellError {
    /// Usage errors come from how the command was built and never go away on
    /// their own, so there is no point in retrying them.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::PathInExtraEnv | Self::ColonInPath(_) | Self::EmptyCommand
        )
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}
