// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use crate::error::PublishError;

const AUTH_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "could not read username",
    "could not read password",
    "invalid username or password",
    "host key verification failed",
];

const NETWORK_MARKERS: &[&str] = &[
    "could not resolve host",
    "connection refused",
    "connection timed out",
    "operation timed out",
    "network is unreachable",
    "connection reset",
    "unable to access",
    "could not read from remote repository",
];

const REJECTION_MARKERS: &[&str] = &[
    "[rejected]",
    "[remote rejected]",
    "non-fast-forward",
    "fetch first",
    "failed to update ref",
    "cannot lock ref",
    "stale info",
];

/// Result of integrating upstream history into the local branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The remote branch does not exist yet
    NoUpstream,
    UpToDate,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Upstream moved since the last fetch
    Rejected(String),
}

/// The version-control operations the mirror publisher relies on
pub trait GitBackend: Send + Sync {
    fn is_repository(&self, path: &Path) -> bool;

    fn clone_repo(&self, remote_url: &str, path: &Path) -> Result<(), PublishError>;

    /// Branch HEAD points at, even when it has no commits yet
    fn current_branch(&self, repo: &Path) -> Result<String, PublishError>;

    /// Stage additions, modifications and deletions under `paths`
    fn stage(&self, repo: &Path, paths: &[PathBuf]) -> Result<(), PublishError>;

    fn has_staged_changes(&self, repo: &Path) -> Result<bool, PublishError>;

    /// Commit the stage and return the new commit id
    fn commit(&self, repo: &Path, message: &str) -> Result<String, PublishError>;

    /// Current commit id, `None` on an unborn branch
    fn head(&self, repo: &Path) -> Result<Option<String>, PublishError>;

    /// Local commits not yet on the remote-tracking branch
    fn commits_ahead(&self, repo: &Path, remote: &str, branch: &str)
    -> Result<usize, PublishError>;

    fn fetch(&self, repo: &Path, remote: &str) -> Result<(), PublishError>;

    /// Merge the remote-tracking branch. A conflicting merge is aborted
    /// before returning an error.
    fn merge_upstream(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<MergeOutcome, PublishError>;

    fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<PushOutcome, PublishError>;
}

/// Git backend driving the `git` binary
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    identity: Option<(String, String)>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit as the given author instead of the user's git config
    pub fn with_identity(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            identity: Some((name.into(), email.into())),
        }
    }

    fn command(&self, repo: Option<&Path>) -> Command {
        let mut command = Command::new("git");
        // Never block on a credential prompt
        command.env("GIT_TERMINAL_PROMPT", "0");
        if let Some((name, email)) = &self.identity {
            command
                .arg("-c")
                .arg(format!("user.name={name}"))
                .arg("-c")
                .arg(format!("user.email={email}"));
        }
        if let Some(repo) = repo {
            command.arg("-C").arg(repo);
        }
        command
    }

    fn output(&self, repo: Option<&Path>, args: &[&str]) -> Result<Output, PublishError> {
        debug!(?args, repo = ?repo, "Running git");
        self.command(repo)
            .args(args)
            .output()
            .map_err(|e| PublishError::Spawn {
                command: args.first().unwrap_or(&"").to_string(),
                source: e,
            })
    }

    /// Run and require success, returning trimmed stdout
    fn run(&self, repo: &Path, args: &[&str]) -> Result<String, PublishError> {
        let output = self.output(Some(repo), args)?;
        if !output.status.success() {
            return Err(classify_failure(
                args.first().unwrap_or(&""),
                repo,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn ref_exists(&self, repo: &Path, reference: &str) -> Result<bool, PublishError> {
        let output = self.output(Some(repo), &["rev-parse", "--verify", "--quiet", reference])?;
        Ok(output.status.success())
    }
}

impl GitBackend for GitCli {
    fn is_repository(&self, path: &Path) -> bool {
        path.join(".git").exists()
    }

    fn clone_repo(&self, remote_url: &str, path: &Path) -> Result<(), PublishError> {
        let target = path.to_string_lossy();
        let output = self.output(None, &["clone", remote_url, &target])?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        match classify_failure("clone", path, &stderr) {
            err @ (PublishError::Auth { .. } | PublishError::Network { .. }) => Err(err),
            _ => Err(PublishError::CloneFailed {
                remote: remote_url.to_string(),
                path: path.to_path_buf(),
                stderr: stderr.trim().to_string(),
            }),
        }
    }

    fn current_branch(&self, repo: &Path) -> Result<String, PublishError> {
        self.run(repo, &["symbolic-ref", "--short", "HEAD"])
    }

    fn stage(&self, repo: &Path, paths: &[PathBuf]) -> Result<(), PublishError> {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string_lossy().to_string()).collect();
        let mut args = vec!["add", "--all", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(repo, &args).map(|_| ())
    }

    fn has_staged_changes(&self, repo: &Path) -> Result<bool, PublishError> {
        let output = self.output(Some(repo), &["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(PublishError::Git {
                command: "diff".to_string(),
                path: repo.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn commit(&self, repo: &Path, message: &str) -> Result<String, PublishError> {
        self.run(repo, &["commit", "--quiet", "-m", message])?;
        self.run(repo, &["rev-parse", "HEAD"])
    }

    fn head(&self, repo: &Path) -> Result<Option<String>, PublishError> {
        let output = self.output(Some(repo), &["rev-parse", "--verify", "--quiet", "HEAD"])?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    fn commits_ahead(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<usize, PublishError> {
        if self.head(repo)?.is_none() {
            return Ok(0);
        }

        let upstream = format!("refs/remotes/{remote}/{branch}");
        let range = if self.ref_exists(repo, &upstream)? {
            format!("{upstream}..HEAD")
        } else {
            "HEAD".to_string()
        };

        let count = self.run(repo, &["rev-list", "--count", &range])?;
        count.parse().map_err(|_| PublishError::Git {
            command: "rev-list".to_string(),
            path: repo.to_path_buf(),
            stderr: format!("unexpected count output '{count}'"),
        })
    }

    fn fetch(&self, repo: &Path, remote: &str) -> Result<(), PublishError> {
        self.run(repo, &["fetch", "--quiet", remote]).map(|_| ())
    }

    fn merge_upstream(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<MergeOutcome, PublishError> {
        let upstream = format!("{remote}/{branch}");
        if !self.ref_exists(repo, &format!("refs/remotes/{upstream}"))? {
            return Ok(MergeOutcome::NoUpstream);
        }

        let before = self.head(repo)?;
        let output = self.output(
            Some(repo),
            &["merge", "--no-edit", "--allow-unrelated-histories", &upstream],
        )?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !self.ref_exists(repo, "MERGE_HEAD")? {
                // Refused before starting, nothing to undo
                return Err(classify_failure("merge", repo, &stderr));
            }

            let abort = self.output(Some(repo), &["merge", "--abort"])?;
            if !abort.status.success() {
                return Err(PublishError::Git {
                    command: "merge --abort".to_string(),
                    path: repo.to_path_buf(),
                    stderr: String::from_utf8_lossy(&abort.stderr).trim().to_string(),
                });
            }
            debug!(stderr = %stderr, "Merge failed and was aborted");
            return Err(PublishError::MergeConflict { upstream });
        }

        if self.head(repo)? == before {
            Ok(MergeOutcome::UpToDate)
        } else {
            Ok(MergeOutcome::Merged)
        }
    }

    fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<PushOutcome, PublishError> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        let output = self.output(Some(repo), &["push", "--porcelain", remote, &refspec])?;
        if output.status.success() {
            return Ok(PushOutcome::Pushed);
        }

        // --porcelain reports ref status on stdout, errors on stderr
        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        match classify_failure("push", repo, &text) {
            err @ (PublishError::Auth { .. } | PublishError::Network { .. }) => Err(err),
            err if is_rejection(&text) => {
                debug!(error = %err, "Push rejected");
                Ok(PushOutcome::Rejected(text.trim().to_string()))
            }
            err => Err(err),
        }
    }
}

/// Sort a failed git invocation into auth, network or generic failure
pub fn classify_failure(command: &str, path: &Path, stderr: &str) -> PublishError {
    let lower = stderr.to_lowercase();
    let stderr = stderr.trim().to_string();
    let command = command.to_string();

    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        PublishError::Auth { command, stderr }
    } else if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        PublishError::Network { command, stderr }
    } else {
        PublishError::Git {
            command,
            path: path.to_path_buf(),
            stderr,
        }
    }
}

fn is_rejection(output: &str) -> bool {
    let lower = output.to_lowercase();
    REJECTION_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Run git in tests, panicking on failure
    pub fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Create an empty bare repository and return its path
    pub fn bare_remote(root: &Path) -> PathBuf {
        let remote = root.join("remote.git");
        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "--bare", "--quiet"]);
        remote
    }

    /// Files tracked on a branch of a bare repository
    pub fn remote_files(remote: &Path, branch: &str) -> Vec<String> {
        let listing = git(remote, &["ls-tree", "-r", "--name-only", branch]);
        listing.lines().map(String::from).collect()
    }

    pub fn cli() -> GitCli {
        GitCli::with_identity("Test", "test@example.com")
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn classifies_auth_failures() {
        let err = classify_failure(
            "push",
            Path::new("/repo"),
            "git@github.com: Permission denied (publickey).\nfatal: Could not read from remote repository.",
        );
        assert!(matches!(err, PublishError::Auth { .. }));
    }

    #[test]
    fn classifies_network_failures() {
        let err = classify_failure(
            "fetch",
            Path::new("/repo"),
            "fatal: unable to access 'https://example.invalid/x.git/': Could not resolve host: example.invalid",
        );
        assert!(matches!(err, PublishError::Network { .. }));
    }

    #[test]
    fn other_failures_keep_path_and_stderr() {
        let err = classify_failure("commit", Path::new("/repo"), "  fatal: bad object \n");
        match err {
            PublishError::Git {
                command,
                path,
                stderr,
            } => {
                assert_eq!(command, "commit");
                assert_eq!(path, PathBuf::from("/repo"));
                assert_eq!(stderr, "fatal: bad object");
            }
            other => panic!("Expected Git error, got {other:?}"),
        }
    }

    #[test]
    fn recognizes_push_rejections() {
        assert!(is_rejection(
            "! [rejected]        HEAD -> main (fetch first)\nerror: failed to push some refs"
        ));
        assert!(is_rejection("!\tHEAD:refs/heads/main\t[remote rejected] (failed to update ref)"));
        assert!(!is_rejection("fatal: repository not found"));
    }

    #[test]
    fn clone_stage_commit_push_against_local_remote() {
        let root = tempdir().unwrap();
        let remote = bare_remote(root.path());
        let clone = root.path().join("mirror");
        let git_cli = cli();

        git_cli
            .clone_repo(&remote.to_string_lossy(), &clone)
            .unwrap();
        assert!(git_cli.is_repository(&clone));
        assert_eq!(git_cli.head(&clone).unwrap(), None);

        std::fs::create_dir_all(clone.join("show")).unwrap();
        std::fs::write(clone.join("show/feed.xml"), "<rss/>").unwrap();
        git_cli.stage(&clone, &[PathBuf::from("show")]).unwrap();
        assert!(git_cli.has_staged_changes(&clone).unwrap());

        let commit = git_cli.commit(&clone, "first").unwrap();
        assert_eq!(git_cli.head(&clone).unwrap(), Some(commit));
        assert!(!git_cli.has_staged_changes(&clone).unwrap());
        assert_eq!(git_cli.commits_ahead(&clone, "origin", "main").unwrap(), 1);

        git_cli.fetch(&clone, "origin").unwrap();
        assert_eq!(
            git_cli.merge_upstream(&clone, "origin", "main").unwrap(),
            MergeOutcome::NoUpstream
        );
        assert_eq!(
            git_cli.push(&clone, "origin", "main").unwrap(),
            PushOutcome::Pushed
        );
        assert_eq!(remote_files(&remote, "main"), vec!["show/feed.xml"]);

        git_cli.fetch(&clone, "origin").unwrap();
        assert_eq!(git_cli.commits_ahead(&clone, "origin", "main").unwrap(), 0);
        assert_eq!(
            git_cli.merge_upstream(&clone, "origin", "main").unwrap(),
            MergeOutcome::UpToDate
        );
    }

    #[test]
    fn stale_push_is_rejected_not_failed() {
        let root = tempdir().unwrap();
        let remote = bare_remote(root.path());
        let git_cli = cli();
        let a = root.path().join("a");
        let b = root.path().join("b");

        git_cli.clone_repo(&remote.to_string_lossy(), &a).unwrap();
        git_cli.clone_repo(&remote.to_string_lossy(), &b).unwrap();

        std::fs::write(a.join("a.txt"), "a").unwrap();
        git_cli.stage(&a, &[PathBuf::from("a.txt")]).unwrap();
        git_cli.commit(&a, "from a").unwrap();
        assert_eq!(git_cli.push(&a, "origin", "main").unwrap(), PushOutcome::Pushed);

        std::fs::write(b.join("b.txt"), "b").unwrap();
        git_cli.stage(&b, &[PathBuf::from("b.txt")]).unwrap();
        git_cli.commit(&b, "from b").unwrap();
        assert!(matches!(
            git_cli.push(&b, "origin", "main").unwrap(),
            PushOutcome::Rejected(_)
        ));

        git_cli.fetch(&b, "origin").unwrap();
        assert_eq!(
            git_cli.merge_upstream(&b, "origin", "main").unwrap(),
            MergeOutcome::Merged
        );
        assert_eq!(git_cli.push(&b, "origin", "main").unwrap(), PushOutcome::Pushed);
        assert_eq!(remote_files(&remote, "main"), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn conflicting_merge_is_aborted() {
        let root = tempdir().unwrap();
        let remote = bare_remote(root.path());
        let git_cli = cli();
        let a = root.path().join("a");
        let b = root.path().join("b");

        git_cli.clone_repo(&remote.to_string_lossy(), &a).unwrap();
        git_cli.clone_repo(&remote.to_string_lossy(), &b).unwrap();

        std::fs::write(a.join("feed.xml"), "<rss>a</rss>").unwrap();
        git_cli.stage(&a, &[PathBuf::from("feed.xml")]).unwrap();
        git_cli.commit(&a, "from a").unwrap();
        assert_eq!(git_cli.push(&a, "origin", "main").unwrap(), PushOutcome::Pushed);

        std::fs::write(b.join("feed.xml"), "<rss>b</rss>").unwrap();
        git_cli.stage(&b, &[PathBuf::from("feed.xml")]).unwrap();
        let local = git_cli.commit(&b, "from b").unwrap();
        git_cli.fetch(&b, "origin").unwrap();

        let result = git_cli.merge_upstream(&b, "origin", "main");

        assert!(matches!(result, Err(PublishError::MergeConflict { .. })));
        assert!(!b.join(".git/MERGE_HEAD").exists());
        assert_eq!(git_cli.head(&b).unwrap(), Some(local));
        assert_eq!(std::fs::read_to_string(b.join("feed.xml")).unwrap(), "<rss>b</rss>");
    }

    #[test]
    fn clone_of_missing_remote_fails() {
        let root = tempdir().unwrap();
        let result = cli().clone_repo(
            &root.path().join("does-not-exist.git").to_string_lossy(),
            &root.path().join("mirror"),
        );
        assert!(result.is_err());
    }
}
