// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{PipelineError, PublishError, ValidationError};
use crate::feed::{FeedRenderer, RssRenderer};
use crate::metadata::{Channel, ChannelStore, Episode, FEED_FILENAME, normalize_channel_name};
use crate::mirror::{CommitOutcome, GitBackend, GitCli, MirrorLock, RepositoryPublisher};
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::tree::{SyncReport, sync_tree};

/// Settings the pipeline needs beyond the mirror itself
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub channels_dir: PathBuf,
    pub public_base_url: String,
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            channels_dir: config.channels_dir.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Render and write the feed only; leave the mirror alone
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Mirror already held exactly this content
    NoOp,
    DryRun,
}

#[derive(Debug)]
pub enum PublishOutcome {
    Succeeded { commit: String, attempts: u32 },
    Skipped(SkipReason),
    Failed(PublishError),
}

impl PublishOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Record of one pipeline invocation
#[derive(Debug)]
pub struct PublishRun {
    pub channel: String,
    /// Feed document exactly as written to disk
    pub feed: Vec<u8>,
    pub feed_path: PathBuf,
    /// Channel directory inside the mirror clone; unset for dry runs
    pub destination: Option<PathBuf>,
    pub sync: Option<SyncReport>,
    pub outcome: PublishOutcome,
    /// Where the feed is served once the mirror is published
    pub public_url: String,
}

/// Renders a channel's feed and publishes the channel directory to the mirror
pub struct PublicationPipeline<R: FeedRenderer = RssRenderer, G: GitBackend = GitCli> {
    config: PipelineConfig,
    store: ChannelStore,
    renderer: R,
    publisher: RepositoryPublisher<G>,
    reporter: SharedProgressReporter,
}

impl PublicationPipeline<RssRenderer, GitCli> {
    /// Pipeline wired the way the CLI uses it
    pub fn from_config(config: &Config, reporter: SharedProgressReporter) -> Self {
        Self::new(
            PipelineConfig::from(config),
            RssRenderer::new(config.enclosure_gateway.clone()),
            RepositoryPublisher::with_git_cli(config.mirror.clone(), reporter.clone()),
            reporter,
        )
    }
}

impl<R: FeedRenderer, G: GitBackend> PublicationPipeline<R, G> {
    pub fn new(
        config: PipelineConfig,
        renderer: R,
        publisher: RepositoryPublisher<G>,
        reporter: SharedProgressReporter,
    ) -> Self {
        let store = ChannelStore::new(config.channels_dir.clone());
        Self {
            config,
            store,
            renderer,
            publisher,
            reporter,
        }
    }

    /// Publish a channel as currently recorded in the channel store
    pub fn publish_channel(
        &self,
        name: &str,
        options: &PublishOptions,
    ) -> Result<PublishRun, PipelineError> {
        let name = normalize_channel_name(name)?;
        let channel = self.store.load_channel(&name)?;
        let episodes = self.store.load_episodes(&name)?;
        self.publish(&name, &channel, &episodes, options)
    }

    pub fn publish(
        &self,
        name: &str,
        channel: &Channel,
        episodes: &[Episode],
        options: &PublishOptions,
    ) -> Result<PublishRun, PipelineError> {
        self.publish_at(name, channel, episodes, options, Utc::now())
    }

    /// Run the pipeline with an explicit feed build time.
    ///
    /// Sync failures abort with an error. Failures of the mirror itself
    /// (lock, clone, commit, push) end up in the returned run's outcome.
    pub fn publish_at(
        &self,
        name: &str,
        channel: &Channel,
        episodes: &[Episode],
        options: &PublishOptions,
        generated_at: DateTime<Utc>,
    ) -> Result<PublishRun, PipelineError> {
        let name = normalize_channel_name(name)?;
        let channel_dir = self.store.channel_dir(&name);

        let document = self.renderer.render(channel, episodes, generated_at)?;
        let feed_path = channel_dir.join(FEED_FILENAME);
        write_feed(&feed_path, document.as_bytes())?;
        self.reporter.report(ProgressEvent::FeedWritten {
            path: feed_path.clone(),
            episodes: episodes.len(),
        });

        let mut run = PublishRun {
            public_url: format!(
                "{}/{}/{}",
                self.config.public_base_url.trim_end_matches('/'),
                name,
                FEED_FILENAME
            ),
            channel: name,
            feed: document.into_bytes(),
            feed_path,
            destination: None,
            sync: None,
            outcome: PublishOutcome::Skipped(SkipReason::DryRun),
        };

        if options.dry_run {
            info!(channel = %run.channel, "Dry run, mirror untouched");
            self.reporter.report(ProgressEvent::DryRunFinished {
                path: run.feed_path.clone(),
            });
            return Ok(run);
        }

        let mirror = self.publisher.config();
        let remote_url = mirror
            .remote_url
            .as_deref()
            .ok_or(ValidationError::MissingRemote)?;
        let destination = mirror_destination(self.publisher.local_path(), &run.channel)?;

        // Held until the run is returned
        let _lock = match self.lock_mirror() {
            Ok(lock) => lock,
            Err(e) => return Ok(self.fail(run, e)),
        };
        if let Err(e) = self.publisher.ensure_clone(remote_url) {
            return Ok(self.fail(run, e));
        }

        self.reporter.report(ProgressEvent::Syncing {
            source: channel_dir.clone(),
            destination: destination.clone(),
        });
        let report = sync_tree(&channel_dir, &destination).map_err(|source| {
            PipelineError::Sync {
                channel: run.channel.clone(),
                destination: destination.clone(),
                source,
            }
        })?;
        self.reporter.report(ProgressEvent::Synced {
            changes: report.changes(),
        });
        run.sync = Some(report);
        run.destination = Some(destination);

        run.outcome = match self
            .publisher
            .publish(&[PathBuf::from(&run.channel)], &mirror.commit_message)
        {
            Ok(CommitOutcome::Pushed { head, attempts, .. }) => {
                info!(channel = %run.channel, commit = %head, attempts, "Published");
                PublishOutcome::Succeeded {
                    commit: head,
                    attempts,
                }
            }
            Ok(CommitOutcome::NoOp) => PublishOutcome::Skipped(SkipReason::NoOp),
            Err(e) => return Ok(self.fail(run, e)),
        };
        Ok(run)
    }

    fn lock_mirror(&self) -> Result<MirrorLock, PublishError> {
        let path = self.publisher.local_path();
        if let Some(lock) = MirrorLock::try_acquire(path)? {
            return Ok(lock);
        }
        info!(mirror = %path.display(), "Mirror busy, waiting for the other publisher");
        MirrorLock::acquire(path)
    }

    fn fail(&self, mut run: PublishRun, e: PublishError) -> PublishRun {
        error!(
            channel = %run.channel,
            mirror = %self.publisher.local_path().display(),
            "Publishing failed: {}", e
        );
        run.outcome = PublishOutcome::Failed(e);
        run
    }
}

/// Directory a channel is mirrored into: a direct child of the clone that
/// is not its git metadata
fn mirror_destination(clone: &Path, channel: &str) -> Result<PathBuf, ValidationError> {
    let mut components = Path::new(channel).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if !name.eq_ignore_ascii_case(".git") => {
            Ok(clone.join(name))
        }
        _ => Err(ValidationError::InvalidChannelName(channel.to_string())),
    }
}

/// Replace the feed file without ever exposing a half-written document
fn write_feed(path: &Path, document: &[u8]) -> Result<(), PipelineError> {
    let fail = |source| PipelineError::FeedWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(fail)?;
    }
    let partial = path.with_extension("xml.partial");
    std::fs::write(&partial, document).map_err(fail)?;
    std::fs::rename(&partial, path).map_err(fail)
}
