// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod metadata;
pub mod mirror;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod tree;
pub mod verify;

// Re-export main types for convenience
pub use config::{Config, MirrorConfig, StoreConfig, VerifyConfig};
pub use error::{
    ConfigError, MetadataError, PipelineError, PublishError, RenderError, StoreError, SyncError,
    ValidationError,
};
pub use feed::{FeedRenderer, RssRenderer};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use metadata::{Channel, ChannelStore, Enclosure, Episode, EpisodeDraft};
pub use mirror::{CommitOutcome, GitBackend, GitCli, MirrorLock, RepositoryPublisher};
pub use pipeline::{
    PipelineConfig, PublicationPipeline, PublishOptions, PublishOutcome, PublishRun, SkipReason,
};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use store::{ContentStore, IpfsStore, StoredContent};
pub use tree::{SyncReport, sync_tree};
pub use verify::{
    DistributionVerifier, GatewayProbeResult, GatewayReport, ProbeFailure, ProbeOutcome,
    VerificationReport, VerifyOptions,
};
