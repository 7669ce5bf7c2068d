use std::borrow::Cow;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;

use devkit_async_utils::OrCancelExt;
use devkit_async_utils::current_scope;
use tokio::process::Command;
use tracing::Level;

use crate::ShellError;

/// Exit code reported for a child killed by signal `n` is `128 + n`, as in
/// shells.
const EXIT_CODE_SIGNAL_BASE: i32 = 128;

/// An external command plus the environment it should run in.
///
/// Unlike a bare [`tokio::process::Command`], environment variables and
/// `PATH` entries are added on top of the inherited environment instead of
/// replacing it, and a non-zero exit is an error unless `check` is turned
/// off.
#[derive(Clone, Debug)]
pub struct ShellCommand {
    argv: Vec<OsString>,
    env: Vec<(String, String)>,
    extra_paths: Vec<PathBuf>,
    cwd: Option<PathBuf>,
    capture_output: bool,
    check: bool,
    log_level: Level,
}

/// Result of [`ShellCommand::run`]. `stdout`/`stderr` are only present when
/// the output was captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl ShellCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self {
            argv: argv
                .into_iter()
                .map(|arg| arg.as_ref().to_os_string())
                .collect(),
            env: Vec::new(),
            extra_paths: Vec::new(),
            cwd: None,
            capture_output: false,
            check: true,
            log_level: Level::INFO,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.argv.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.argv
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// The executable, as given.
    pub fn program(&self) -> &OsStr {
        self.argv.first().map(OsString::as_os_str).unwrap_or_default()
    }

    /// Extra environment variable on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Directory prepended to the inherited `PATH`.
    pub fn extra_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_paths.push(path.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn capture_output(mut self, capture_output: bool) -> Self {
        self.capture_output = capture_output;
        self
    }

    /// Treat a non-zero exit as [`ShellError::Failed`]. On by default.
    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    /// Level of the `[RUNNING IN SHELL]` record.
    pub fn log_level(mut self, log_level: Level) -> Self {
        self.log_level = log_level;
        self
    }

    /// Renders the line a user would type into bash to run the same command
    /// from the current directory, e.g.
    /// `cd sub && A=B PATH="bin:${PATH}" tool --flag '$ARG' &> CAPTURED`.
    pub fn render(&self) -> Result<String, ShellError> {
        self.validate()?;
        let mut line = String::new();

        if let Some(relative) = self.relative_cwd()? {
            line.push_str("cd ");
            line.push_str(&quote(&relative.to_string_lossy()));
            line.push_str(" && ");
        }

        for (key, value) in &self.env {
            line.push_str(&format!("{}={} ", quote(key), quote(value)));
        }

        if !self.extra_paths.is_empty() {
            line.push_str(&format!("PATH=\"{}:${{PATH}}\" ", self.joined_extra_paths()));
        }

        let argv = self
            .argv
            .iter()
            .map(|arg| quote(&arg.to_string_lossy()))
            .collect::<Vec<_>>();
        line.push_str(&argv.join(" "));

        if self.capture_output {
            line.push_str(" &> CAPTURED");
        }

        Ok(line.trim().to_string())
    }

    /// Spawns the command and waits for it.
    ///
    /// When called inside a cancel scope, cancelling the scope kills the
    /// child and returns [`ShellError::Cancelled`].
    pub async fn run(&self) -> Result<ShellOutput, ShellError> {
        let rendered = self.render()?;
        devkit_common::emit!(self.log_level, "[RUNNING IN SHELL]: {rendered}");

        let (program, args) = self.argv.split_first().ok_or(ShellError::EmptyCommand)?;
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        command.envs(self.env.iter().map(|(key, value)| (key, value)));
        if let Some(path) = self.inherited_path_with_extras() {
            command.env("PATH", path);
        }
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if self.capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let child = command.spawn().map_err(|source| ShellError::Spawn {
            program: program.to_string_lossy().into_owned(),
            source,
        })?;
        tracing::trace!(pid = child.id(), "spawned `{rendered}`");

        // Dropping the wait future drops the child, which kills it.
        let waiting = child.wait_with_output();
        let output = match current_scope() {
            Some(scope) => waiting.or_cancel(&scope).await??,
            None => waiting.await?,
        };

        let exit_code = exit_code(output.status);
        let (stdout, stderr) = if self.capture_output {
            (
                Some(String::from_utf8_lossy(&output.stdout).into_owned()),
                Some(String::from_utf8_lossy(&output.stderr).into_owned()),
            )
        } else {
            (None, None)
        };
        let output = ShellOutput {
            exit_code,
            stdout,
            stderr,
        };

        if self.check && !output.success() {
            return Err(ShellError::Failed {
                command: rendered,
                exit_code,
                output: Box::new(output),
            });
        }
        Ok(output)
    }

    fn validate(&self) -> Result<(), ShellError> {
        if self.argv.is_empty() {
            return Err(ShellError::EmptyCommand);
        }
        if self.env.iter().any(|(key, _)| key == "PATH") {
            return Err(ShellError::PathInExtraEnv);
        }
        if let Some(path) = self
            .extra_paths
            .iter()
            .find(|path| path.to_string_lossy().contains(':'))
        {
            return Err(ShellError::ColonInPath(path.clone()));
        }
        Ok(())
    }

    fn relative_cwd(&self) -> Result<Option<PathBuf>, ShellError> {
        let Some(cwd) = &self.cwd else {
            return Ok(None);
        };
        let current = std::env::current_dir()?;
        let absolute = if cwd.is_absolute() {
            cwd.clone()
        } else {
            current.join(cwd)
        };
        if absolute == current {
            return Ok(None);
        }
        Ok(Some(
            pathdiff::diff_paths(&absolute, &current).unwrap_or(absolute),
        ))
    }

    fn joined_extra_paths(&self) -> String {
        self.extra_paths
            .iter()
            .map(|path| path.to_string_lossy())
            .collect::<Vec<_>>()
            .join(":")
    }

    fn inherited_path_with_extras(&self) -> Option<OsString> {
        if self.extra_paths.is_empty() {
            return None;
        }
        let mut path = OsString::from(self.joined_extra_paths());
        match std::env::var_os("PATH") {
            Some(inherited) if !inherited.to_string_lossy().trim().is_empty() => {
                path.push(":");
                path.push(inherited);
            }
            _ => {}
        }
        Some(path)
    }
}

/// Words shlex refuses to quote (those holding a NUL byte) are kept verbatim;
/// the rendered line is informational and spawning them fails anyway.
fn quote(word: &str) -> String {
    shlex::try_quote(word)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| word.to_string())
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| EXIT_CODE_SIGNAL_BASE + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
