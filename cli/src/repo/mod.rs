//! `repo`: lint and format this repository with the usual external tools.

pub mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use devkit_async_utils::CancelScope;
use devkit_async_utils::with_scope;
use devkit_common::CliConfigOverrides;
use devkit_common::ContextLoggerError;
use devkit_common::RetryError;
use devkit_common::RetryPolicy;
use devkit_common::context_logger;
use devkit_common::context_status;
use devkit_shell::ShellCommand;
use devkit_shell::ShellError;
use devkit_shell::ShellOutput;
use thiserror::Error;
use tracing::Level;

pub use config::RepoConfig;

const GIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Simple script to manage this repository.
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct RepoCli {
    /// Root of the repository to manage.
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    pub repo_root: PathBuf,

    #[clap(flatten)]
    pub config_overrides: CliConfigOverrides,

    #[clap(subcommand)]
    pub command: RepoCommand,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum RepoCommand {
    /// Lint code.
    Lint,

    /// Format codebase.
    Format(FormatArgs),
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct FormatArgs {
    /// Only check if code is formatted.
    #[arg(short = 'c', long)]
    pub check: bool,
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Looks like git history is shallow and credential check cannot be performed.")]
    ShallowHistory,

    #[error("statix found issues:\n{0}")]
    StatixFindings(String),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Logger(#[from] ContextLoggerError),

    #[error(transparent)]
    Retry(#[from] RetryError),
}

/// Loads the configuration and runs the requested command. Ctrl-C cancels
/// the run, killing whatever tool is running at the time.
pub async fn run_main(cli: RepoCli) -> anyhow::Result<()> {
    let config = RepoConfig::load(&cli.repo_root, &cli.config_overrides)
        .context("failed to load repo configuration")?;
    let repo = Repo::new(cli.repo_root, config);

    let scope = CancelScope::new();
    let interrupt = tokio::spawn({
        let scope = scope.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                scope.cancel(Some("interrupted".to_string()));
            }
        }
    });
    let result = with_scope(scope, repo.execute(&cli.command)).await;
    interrupt.abort();

    let what = match cli.command {
        RepoCommand::Lint => "lint",
        RepoCommand::Format(_) => "format",
    };
    result.with_context(|| format!("{what} failed"))
}

#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    config: RepoConfig,
}

impl Repo {
    pub fn new(root: PathBuf, config: RepoConfig) -> Self {
        Self { root, config }
    }

    pub async fn execute(&self, command: &RepoCommand) -> Result<(), RepoError> {
        match command {
            RepoCommand::Lint => self.lint().await,
            RepoCommand::Format(args) => self.format(args.check).await,
        }
    }

    pub async fn lint(&self) -> Result<(), RepoError> {
        self.step(self.tool(["ruff", "check"])).await?;
        self.step(ShellCommand::new(["mypy"]).arg(&self.root)).await?;

        self.check_leaked_credentials().await?;
        self.step(ShellCommand::new(["yamllint", "--strict"]).arg(self.root.join(".github")))
            .await?;

        let sh_files = self.git_files(&[".sh"]).await?;
        if !sh_files.is_empty() {
            self.step(self.tool(["shellcheck"]).args(&sh_files)).await?;
        }

        self.step(self.tool(["typos"])).await?;
        self.step(self.tool(["markdownlint-cli2", "."])).await?;
        self.step(ShellCommand::new(["statix", "check"]).arg(&self.root))
            .await?;
        Ok(())
    }

    pub async fn format(&self, check: bool) -> Result<(), RepoError> {
        let when_checking = |flag: &'static str| if check { vec![flag] } else { Vec::new() };
        let check_arg = when_checking("--check");
        let diff_arg = when_checking("--diff");
        let dry_run_arg = when_checking("--dry-run");
        let write_arg = if check { Vec::new() } else { vec!["--write"] };

        self.step(self.tool(["ruff", "format"]).args(&check_arg)).await?;
        self.step(
            self.tool(["ruff", "check", "--fix", "--unsafe-fixes"])
                .args(&diff_arg),
        )
        .await?;

        let statix = self
            .step(
                self.tool(["statix", "fix"])
                    .args(&dry_run_arg)
                    .arg(&self.root)
                    .capture_output(check),
            )
            .await?;
        if check {
            let findings = statix.and_then(|output| output.stdout).unwrap_or_default();
            if !findings.trim().is_empty() {
                return Err(RepoError::StatixFindings(findings));
            }
        }

        let nix_files = self.git_files(&[".nix"]).await?;
        self.step(
            self.tool(["nixfmt", "--verify", "--strict"])
                .args(&check_arg)
                .args(&nix_files),
        )
        .await?;

        let md_files = self.git_files(&[".md"]).await?;
        self.step(self.tool(["mdformat"]).args(&md_files).args(&check_arg))
            .await?;

        self.step(
            ShellCommand::new(["shfmt"])
                .args(&write_arg)
                .args(&diff_arg)
                .arg(&self.root),
        )
        .await?;
        self.step(
            self.tool(["prettier"])
                .args(&write_arg)
                .arg(&self.root)
                .args(&check_arg),
        )
        .await?;
        self.step(self.tool(["stylua"]).arg(&self.root).args(&check_arg))
            .await?;
        Ok(())
    }

    /// Scanning for leaked credentials walks every commit, so it refuses to
    /// run when the pinned first commit is missing (a shallow clone).
    async fn check_leaked_credentials(&self) -> Result<(), RepoError> {
        if self.config.skips("gitleaks") {
            return self.step(self.tool(["gitleaks", "git"])).await.map(|_| ());
        }
        if let Some(first_commit) = &self.config.first_commit {
            let probe = self
                .tool(["git", "cat-file", "-e"])
                .arg(first_commit)
                .check(false)
                .run()
                .await?;
            if !probe.success() {
                return Err(RepoError::ShallowHistory);
            }
        }
        self.step(self.tool(["gitleaks", "git"])).await?;
        Ok(())
    }

    /// Git-tracked files matching any of `extensions`, relative to the root.
    async fn git_files(&self, extensions: &[&str]) -> Result<Vec<String>, RepoError> {
        let command = self
            .tool(["git", "ls-files"])
            .args(extensions.iter().map(|extension| format!("*{extension}")))
            .capture_output(true)
            .log_level(Level::DEBUG);
        let policy = RetryPolicy::new(self.config.git_tries)?.delay(GIT_RETRY_DELAY);
        let output = policy
            .run_async("git ls-files", |_| command.run())
            .await?;
        Ok(output
            .stdout
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Runs one tool inside a logged scope, or logs that it was skipped.
    /// Returns `None` for a skipped tool.
    async fn step(&self, command: ShellCommand) -> Result<Option<ShellOutput>, RepoError> {
        let rendered = command.render()?;
        let tool = command.program().to_string_lossy().into_owned();
        if self.config.skips(&tool) {
            context_status!(&rendered, "- skipped");
            return Ok(None);
        }

        let output = context_logger!("{tool}")
            .ping(self.config.ping())
            .scope_async(|_| async move { Ok::<_, RepoError>(command.run().await?) })
            .await?;
        Ok(Some(output))
    }

    /// A command that runs from the repository root.
    fn tool<const N: usize>(&self, argv: [&str; N]) -> ShellCommand {
        ShellCommand::new(argv).cwd(&self.root)
    }
}
