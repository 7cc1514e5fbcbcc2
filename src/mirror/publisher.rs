// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::error::PublishError;
use crate::progress::{ProgressEvent, SharedProgressReporter};

use super::git::{GitBackend, GitCli, MergeOutcome, PushOutcome};

/// What a publish did to the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Remote branch now contains `head`
    Pushed {
        head: String,
        /// Commit created by this run; `None` when only earlier unpushed
        /// commits were sent
        created: Option<String>,
        attempts: u32,
    },
    /// Stage was empty and nothing was waiting to be pushed
    NoOp,
}

/// Owns the local clone of the mirror repository and publishes into it
pub struct RepositoryPublisher<G: GitBackend = GitCli> {
    git: G,
    config: MirrorConfig,
    reporter: SharedProgressReporter,
}

impl RepositoryPublisher<GitCli> {
    /// Publisher using the `git` binary, with the configured commit identity
    pub fn with_git_cli(config: MirrorConfig, reporter: SharedProgressReporter) -> Self {
        let git = match (&config.author_name, &config.author_email) {
            (Some(name), Some(email)) => GitCli::with_identity(name, email),
            _ => GitCli::new(),
        };
        Self::new(git, config, reporter)
    }
}

impl<G: GitBackend> RepositoryPublisher<G> {
    pub fn new(git: G, config: MirrorConfig, reporter: SharedProgressReporter) -> Self {
        Self {
            git,
            config,
            reporter,
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Local clone location
    pub fn local_path(&self) -> &Path {
        &self.config.path
    }

    /// Clone `remote_url` unless the local path already holds a repository.
    /// Returns whether a clone was made.
    pub fn ensure_clone(&self, remote_url: &str) -> Result<bool, PublishError> {
        let path = &self.config.path;
        if self.git.is_repository(path) {
            return Ok(false);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PublishError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        self.reporter.report(ProgressEvent::Cloning {
            remote: remote_url.to_string(),
            path: path.clone(),
        });
        info!(remote = remote_url, path = %path.display(), "Cloning mirror");
        self.git.clone_repo(remote_url, path)?;
        Ok(true)
    }

    /// Commit `changed_paths` (relative to the clone) and push them.
    ///
    /// Upstream history is fetched and merged before every push attempt.
    /// Rejected pushes are retried up to `max_push_attempts`; auth and
    /// network failures surface immediately. When pushing ultimately fails
    /// the commit stays in the local branch and is pushed by the next run.
    pub fn publish(
        &self,
        changed_paths: &[PathBuf],
        message: &str,
    ) -> Result<CommitOutcome, PublishError> {
        let repo = self.config.path.as_path();
        let remote = self.config.remote.as_str();
        let branch = match &self.config.branch {
            Some(branch) => branch.clone(),
            None => self.git.current_branch(repo)?,
        };

        self.git.stage(repo, changed_paths)?;

        let created = if self.git.has_staged_changes(repo)? {
            let commit = self.git.commit(repo, message)?;
            self.reporter.report(ProgressEvent::Committed {
                commit: commit.clone(),
            });
            Some(commit)
        } else {
            None
        };

        if created.is_none() {
            let pending = self.git.commits_ahead(repo, remote, &branch)?;
            if pending == 0 {
                self.reporter.report(ProgressEvent::NothingToPublish);
                return Ok(CommitOutcome::NoOp);
            }
            info!(pending, "Pushing commits left over from an earlier run");
        }

        let max_attempts = self.config.max_push_attempts.max(1);
        for attempt in 1..=max_attempts {
            self.reporter.report(ProgressEvent::Reconciling { attempt });
            self.git.fetch(repo, remote)?;
            match self.git.merge_upstream(repo, remote, &branch)? {
                MergeOutcome::Merged => info!(attempt, "Merged upstream changes"),
                MergeOutcome::UpToDate => debug!(attempt, "Already up to date with upstream"),
                MergeOutcome::NoUpstream => debug!(%branch, "Upstream branch does not exist yet"),
            }

            match self.git.push(repo, remote, &branch)? {
                PushOutcome::Pushed => {
                    let head = self.git.head(repo)?.unwrap_or_default();
                    self.reporter.report(ProgressEvent::Pushed {
                        commit: head.clone(),
                        attempts: attempt,
                    });
                    return Ok(CommitOutcome::Pushed {
                        head,
                        created,
                        attempts: attempt,
                    });
                }
                PushOutcome::Rejected(reason) => {
                    warn!(attempt, max_attempts, "Push rejected, upstream moved");
                    self.reporter
                        .report(ProgressEvent::PushRejected { attempt, reason });
                }
            }
        }

        Err(PublishError::Conflict {
            attempts: max_attempts,
            commit: self.git.head(repo)?.unwrap_or_default(),
        })
    }
}
