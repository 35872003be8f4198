//! Git transport for the sync repository.
//!
//! The sync repository is a dedicated working tree holding the `state/`
//! documents. The transport shells out to `git`; no timeout is imposed on
//! the subprocess.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A git command exited non-zero.
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The remote refused a non-fast-forward push.
    #[error("{0}")]
    Rejected(String),

    #[error("Not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether retrying after a pull can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl From<TransportError> for crate::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected(message) => Self::PushRejected { message },
            other => Self::Transport(other.to_string()),
        }
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Moves committed documents between this machine and the shared remote.
///
/// Paths are relative to [`Transport::root`] and use `/` separators.
pub trait Transport {
    /// Working tree of the sync repository.
    fn root(&self) -> &Path;

    /// Update the remote-tracking ref.
    fn fetch(&self) -> TransportResult<()>;

    /// Files under `dir` that differ between HEAD and upstream.
    fn changed_files(&self, dir: &str) -> TransportResult<Vec<String>>;

    /// Every file under `dir` at upstream.
    fn list_upstream(&self, dir: &str) -> TransportResult<Vec<String>>;

    /// Content of `path` at upstream, if it exists there.
    fn read_upstream(&self, path: &str) -> TransportResult<Option<String>>;

    /// Bring the working tree to upstream.
    fn integrate_upstream(&self) -> TransportResult<()>;

    /// Commits (ahead, behind) relative to upstream.
    fn ahead_behind(&self) -> TransportResult<(usize, usize)>;

    /// Stage `paths` and commit. Returns the new commit, or `None` when
    /// nothing was staged.
    fn commit_all(&self, paths: &[&str], message: &str) -> TransportResult<Option<String>>;

    /// Publish HEAD to the remote branch.
    fn push(&self) -> TransportResult<()>;
}

/// [`Transport`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitTransport {
    root: PathBuf,
    remote: String,
    branch: String,
}

impl GitTransport {
    /// Open an existing working tree.
    ///
    /// # Errors
    ///
    /// Returns `NotARepository` if `root` is not inside a git working tree.
    pub fn open(root: &Path, remote: &str, branch: &str) -> TransportResult<Self> {
        if !root.is_dir() {
            return Err(TransportError::NotARepository(root.to_path_buf()));
        }
        let transport = Self {
            root: root.to_path_buf(),
            remote: remote.to_string(),
            branch: branch.to_string(),
        };
        if transport.git(&["rev-parse", "--git-dir"]).is_err() {
            return Err(TransportError::NotARepository(root.to_path_buf()));
        }
        Ok(transport)
    }

    /// Remote-tracking ref, e.g. `origin/main`.
    #[must_use]
    pub fn upstream(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    fn git_raw(&self, args: &[&str]) -> TransportResult<String> {
        debug!(?args, root = %self.root.display(), "git");
        // Rejections are classified from stderr, which must stay untranslated
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .env("LC_ALL", "C")
            .output()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(TransportError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn git(&self, args: &[&str]) -> TransportResult<String> {
        self.git_raw(args).map(|out| out.trim().to_string())
    }

    fn has_ref(&self, name: &str) -> bool {
        self.git(&["rev-parse", "--verify", "--quiet", &format!("{name}^{{commit}}")])
            .is_ok()
    }

    fn has_upstream(&self) -> bool {
        self.has_ref(&self.upstream())
    }

    fn has_head(&self) -> bool {
        self.has_ref("HEAD")
    }
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

impl Transport for GitTransport {
    fn root(&self) -> &Path {
        &self.root
    }

    fn fetch(&self) -> TransportResult<()> {
        self.git(&["fetch", "--quiet", &self.remote])?;
        Ok(())
    }

    fn changed_files(&self, dir: &str) -> TransportResult<Vec<String>> {
        if !self.has_upstream() {
            return Ok(Vec::new());
        }
        if !self.has_head() {
            return self.list_upstream(dir);
        }
        let upstream = self.upstream();
        let out = self.git(&["diff", "--name-only", "HEAD", &upstream, "--", dir])?;
        Ok(lines(&out))
    }

    fn list_upstream(&self, dir: &str) -> TransportResult<Vec<String>> {
        if !self.has_upstream() {
            return Ok(Vec::new());
        }
        let upstream = self.upstream();
        let out = self.git(&["ls-tree", "-r", "--name-only", &upstream, "--", dir])?;
        Ok(lines(&out))
    }

    fn read_upstream(&self, path: &str) -> TransportResult<Option<String>> {
        if !self.has_upstream() {
            return Ok(None);
        }
        let object = format!("{}:{path}", self.upstream());
        if self.git(&["cat-file", "-e", &object]).is_err() {
            return Ok(None);
        }
        self.git_raw(&["show", &object]).map(Some)
    }

    fn integrate_upstream(&self) -> TransportResult<()> {
        if !self.has_upstream() {
            return Ok(());
        }
        let upstream = self.upstream();
        if self.has_head() && self.git(&["merge", "--ff-only", "--quiet", &upstream]).is_ok() {
            return Ok(());
        }
        // Diverged or unborn: the store already holds the local side
        info!(upstream, "Resetting sync tree to upstream");
        self.git(&["reset", "--hard", "--quiet", &upstream])?;
        Ok(())
    }

    fn ahead_behind(&self) -> TransportResult<(usize, usize)> {
        let parse = |s: &str| s.trim().parse::<usize>().unwrap_or(0);
        match (self.has_head(), self.has_upstream()) {
            (false, false) => Ok((0, 0)),
            (true, false) => Ok((parse(&self.git(&["rev-list", "--count", "HEAD"])?), 0)),
            (false, true) => {
                let upstream = self.upstream();
                Ok((0, parse(&self.git(&["rev-list", "--count", &upstream])?)))
            }
            (true, true) => {
                let range = format!("HEAD...{}", self.upstream());
                let out = self.git(&["rev-list", "--left-right", "--count", &range])?;
                let mut parts = out.split_whitespace();
                let ahead = parts.next().map_or(0, parse);
                let behind = parts.next().map_or(0, parse);
                Ok((ahead, behind))
            }
        }
    }

    fn commit_all(&self, paths: &[&str], message: &str) -> TransportResult<Option<String>> {
        let mut args = vec!["add", "--all", "--"];
        args.extend_from_slice(paths);
        self.git(&args)?;

        // Exit 0 means nothing staged
        if self.git(&["diff", "--cached", "--quiet"]).is_ok() {
            return Ok(None);
        }

        self.git(&["commit", "--quiet", "-m", message])?;
        let commit = self.git(&["rev-parse", "HEAD"])?;
        info!(commit, "Committed sync state");
        Ok(Some(commit))
    }

    fn push(&self) -> TransportResult<()> {
        let refspec = format!("HEAD:{}", self.branch);
        match self.git(&["push", &self.remote, &refspec]) {
            Ok(_) => Ok(()),
            Err(TransportError::CommandFailed { stderr, .. }) if is_non_fast_forward(&stderr) => {
                Err(TransportError::Rejected(format!(
                    "{} has commits not present locally",
                    self.upstream()
                )))
            }
            Err(e) => Err(e),
        }
    }
}

/// Whether a failed push was refused only because upstream moved ahead.
///
/// Hook declines and permission errors are also "rejected" but cannot be
/// fixed by pulling first.
fn is_non_fast_forward(stderr: &str) -> bool {
    stderr.contains("non-fast-forward") || stderr.contains("fetch first")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    pub(crate) fn run(dir: &Path, args: &[&str]) {
        let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// A bare remote plus `clones` working trees wired to it as `origin`.
    pub(crate) fn git_fixture(clones: usize) -> (TempDir, Vec<PathBuf>) {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        fs::create_dir_all(&remote).unwrap();
        run(&remote, &["init", "--bare", "--quiet"]);
        run(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let mut dirs = Vec::new();
        for i in 0..clones {
            let dir = temp.path().join(format!("clone{i}"));
            fs::create_dir_all(&dir).unwrap();
            run(&dir, &["init", "--quiet"]);
            run(&dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
            run(&dir, &["config", "user.name", "Harbor Test"]);
            run(&dir, &["config", "user.email", "test@example.com"]);
            run(&dir, &["config", "commit.gpgsign", "false"]);
            run(&dir, &["remote", "add", "origin", remote.to_str().unwrap()]);
            dirs.push(dir);
        }
        (temp, dirs)
    }

    #[test]
    fn test_open_rejects_plain_directory() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let err = GitTransport::open(temp.path(), "origin", "main").unwrap_err();
        assert!(matches!(err, TransportError::NotARepository(_)));
    }

    #[test]
    fn test_only_non_fast_forward_pushes_are_retryable() {
        assert!(is_non_fast_forward(
            " ! [rejected]        HEAD -> main (fetch first)\nerror: failed to push some refs"
        ));
        assert!(is_non_fast_forward(
            " ! [rejected]        HEAD -> main (non-fast-forward)"
        ));
        assert!(!is_non_fast_forward(
            " ! [remote rejected] HEAD -> main (pre-receive hook declined)"
        ));
        assert!(!is_non_fast_forward("remote: Permission to repo denied."));
    }

    #[test]
    fn test_commit_push_and_read_upstream() {
        if !git_available() {
            return;
        }
        let (_temp, dirs) = git_fixture(2);
        let a = GitTransport::open(&dirs[0], "origin", "main").unwrap();
        let b = GitTransport::open(&dirs[1], "origin", "main").unwrap();

        fs::create_dir_all(dirs[0].join("state")).unwrap();
        fs::write(dirs[0].join("state/ports.jsonl"), "{}\n").unwrap();
        assert!(a.commit_all(&["state"], "first").unwrap().is_some());
        assert!(a.commit_all(&["state"], "again").unwrap().is_none());
        assert_eq!(a.ahead_behind().unwrap(), (1, 0));
        a.push().unwrap();

        b.fetch().unwrap();
        assert_eq!(b.changed_files("state").unwrap(), vec!["state/ports.jsonl"]);
        assert_eq!(b.read_upstream("state/ports.jsonl").unwrap().as_deref(), Some("{}\n"));
        assert_eq!(b.read_upstream("state/missing.jsonl").unwrap(), None);
        assert_eq!(b.ahead_behind().unwrap(), (0, 1));

        b.integrate_upstream().unwrap();
        assert!(dirs[1].join("state/ports.jsonl").exists());
        assert!(b.changed_files("state").unwrap().is_empty());
    }

    #[test]
    fn test_diverged_push_is_rejected() {
        if !git_available() {
            return;
        }
        let (_temp, dirs) = git_fixture(2);
        for dir in &dirs {
            fs::create_dir_all(dir.join("state")).unwrap();
        }
        let a = GitTransport::open(&dirs[0], "origin", "main").unwrap();
        let b = GitTransport::open(&dirs[1], "origin", "main").unwrap();

        fs::write(dirs[0].join("state/ports.jsonl"), "a\n").unwrap();
        a.commit_all(&["state"], "a").unwrap();
        a.push().unwrap();

        fs::write(dirs[1].join("state/ports.jsonl"), "b\n").unwrap();
        b.commit_all(&["state"], "b").unwrap();
        let err = b.push().unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(crate::Error::from(err), crate::Error::PushRejected { .. }));

        // Diverged history resets to upstream
        b.fetch().unwrap();
        b.integrate_upstream().unwrap();
        assert_eq!(fs::read_to_string(dirs[1].join("state/ports.jsonl")).unwrap(), "a\n");
        assert_eq!(b.ahead_behind().unwrap(), (0, 0));
    }

    #[cfg(unix)]
    #[test]
    fn test_hook_declined_push_is_not_retryable() {
        use std::os::unix::fs::PermissionsExt;

        if !git_available() {
            return;
        }
        let (temp, dirs) = git_fixture(1);
        let hook = temp.path().join("remote.git/hooks/pre-receive");
        fs::create_dir_all(hook.parent().unwrap()).unwrap();
        fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
        fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();

        fs::create_dir_all(dirs[0].join("state")).unwrap();
        fs::write(dirs[0].join("state/ports.jsonl"), "a\n").unwrap();
        let transport = GitTransport::open(&dirs[0], "origin", "main").unwrap();
        transport.commit_all(&["state"], "a").unwrap();

        let err = transport.push().unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, TransportError::CommandFailed { .. }));
    }
}
