//! Version control backend that shells out to the system `git` binary.
//!
//! Using the CLI rather than a libgit2 binding keeps checkout semantics
//! (hooks aside) identical to what the user gets at the terminal, including
//! `.gitignore` handling in `git clean -x`.

use super::backend::{HistoryEntry, VcsError, VersionControl};
use crate::types::RevisionId;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Field separator for `git log --format`, chosen because it cannot appear
/// in a commit subject.
const FIELD_SEP: char = '\u{1f}';

pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.root)
            .args(["-c", "log.showSignature=false", "-c", "core.quotepath=false"])
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null());
        cmd
    }

    fn output(&self, args: &[&str]) -> Result<Output, VcsError> {
        tracing::debug!(root = %self.root.display(), "git {}", args.join(" "));
        Ok(self.command(args).output()?)
    }

    /// Run and return stdout, failing on a non-zero exit.
    fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        String::from_utf8(output.stdout).map_err(|e| VcsError::Parse(e.to_string()))
    }
}

fn command_failed(args: &[&str], output: &Output) -> VcsError {
    VcsError::CommandFailed {
        command: args.first().copied().unwrap_or_default().to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Parse `git log --format=%H%x1f%s` output.
fn parse_history(stdout: &str) -> Result<Vec<HistoryEntry>, VcsError> {
    stdout
        .lines()
        .filter(|l| !l.is_empty())
        .map(|line| {
            let (hash, subject) = line.split_once(FIELD_SEP).unwrap_or((line, ""));
            if hash.len() < 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(VcsError::Parse(format!("bad log line: {line}")));
            }
            Ok((RevisionId::new(hash), subject.to_string()))
        })
        .collect()
}

/// Parse `git status --porcelain` output into paths.
fn parse_status(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|l| l.len() > 3)
        .map(|l| l[3..].to_string())
        .collect()
}

impl VersionControl for GitCli {
    fn root(&self) -> &Path {
        &self.root
    }

    fn current_ref(&self) -> Result<String, VcsError> {
        let branch = self.output(&["symbolic-ref", "-q", "--short", "HEAD"])?;
        if branch.status.success() {
            let name = String::from_utf8_lossy(&branch.stdout).trim().to_string();
            if !name.is_empty() {
                return Ok(name);
            }
        }
        Ok(self.run(&["rev-parse", "--verify", "HEAD"])?.trim().to_string())
    }

    fn resolve(&self, rev: &str) -> Result<Option<RevisionId>, VcsError> {
        // A leading dash would be parsed as an option.
        if rev.is_empty() || rev.starts_with('-') {
            return Ok(None);
        }
        let spec = format!("{rev}^{{commit}}");
        let output = self.output(&["rev-parse", "--verify", "--quiet", &spec])?;
        if output.status.success() {
            let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok(Some(RevisionId::new(hash)));
        }
        // --quiet exits 1 with no output when the name does not resolve;
        // anything else (e.g. 128, not a repository) is a real failure.
        if output.status.code() == Some(1) {
            Ok(None)
        } else {
            Err(command_failed(&["rev-parse"], &output))
        }
    }

    fn history(
        &self,
        tip: &RevisionId,
        first_parent: bool,
    ) -> Result<Vec<HistoryEntry>, VcsError> {
        let format = format!("--format=%H{}%s", FIELD_SEP);
        let mut args = vec![
            "log",
            "--reverse",
            "--topo-order",
            "--no-color",
            format.as_str(),
        ];
        if first_parent {
            args.push("--first-parent");
        }
        args.push(tip.as_str());
        args.push("--");
        parse_history(&self.run(&args)?)
    }

    fn force_checkout(&self, rev: &str) -> Result<(), VcsError> {
        // Initialized submodules follow the gitlink of `rev`.
        self.run(&[
            "checkout",
            "--force",
            "--recurse-submodules",
            "--quiet",
            rev,
            "--",
        ])
        .map(|_| ())
    }

    fn clean(&self) -> Result<(), VcsError> {
        self.run(&["clean", "-ffdxq"])?;
        self.run(&[
            "submodule",
            "foreach",
            "--quiet",
            "--recursive",
            "git clean -ffdxq",
        ])
        .map(|_| ())
    }

    fn dirty_paths(&self) -> Result<Vec<String>, VcsError> {
        let stdout = self.run(&[
            "status",
            "--porcelain",
            "--ignored",
            "--untracked-files=all",
        ])?;
        Ok(parse_status(&stdout))
    }
}
