// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when reading or writing channel metadata
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Channel '{name}' not found in {path}")]
    ChannelNotFound { name: String, path: PathBuf },

    #[error("Failed to read metadata file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write metadata file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse metadata JSON in {path} (line {line}): {source}")]
    JsonParseFailed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize metadata: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),
}

/// Bad input handed to a core operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Enclosure content id must not be empty")]
    EmptyContentId,

    #[error("Episode needs at least one enclosure (a file or an explicit enclosure)")]
    NoEnclosures,

    #[error("Episode needs a title when no file is attached")]
    MissingTitle,

    #[error("Invalid channel name '{0}'")]
    InvalidChannelName(String),

    #[error("Invalid gateway '{gateway}': {reason}")]
    InvalidGateway { gateway: String, reason: String },

    #[error("No mirror remote configured; set [mirror] remote_url")]
    MissingRemote,
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors raised by the content-addressed store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Content store request to {url} failed: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Content store returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Content store returned an unreadable response from {url}: {source}")]
    InvalidResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors raised while rendering a feed document
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to write RSS document: {0}")]
    Xml(#[from] rss::Error),

    #[error("Rendered feed is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Errors raised while mirroring one directory tree onto another
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source directory does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("Destination {0} exists and is not a directory")]
    DestinationNotDirectory(PathBuf),

    #[error("Failed to walk {path}: {source}")]
    WalkFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to {operation} {path} (last completed: {}): {source}", display_last(.last_completed))]
    Io {
        operation: &'static str,
        path: PathBuf,
        last_completed: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
}

fn display_last(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "nothing".to_string())
}

/// Errors raised while cloning, committing or pushing the mirror repository
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to clone {remote} into {path}: {stderr}")]
    CloneFailed {
        remote: String,
        path: PathBuf,
        stderr: String,
    },

    #[error("Authentication failed during git {command}: {stderr}")]
    Auth { command: String, stderr: String },

    #[error("Network failure during git {command}: {stderr}")]
    Network { command: String, stderr: String },

    #[error("Push still rejected after {attempts} attempts; local commit {commit} was kept")]
    Conflict { attempts: u32, commit: String },

    #[error("Merging {upstream} produced conflicts; merge aborted, local commit kept")]
    MergeConflict { upstream: String },

    #[error("git {command} failed in {path}: {stderr}")]
    Git {
        command: String,
        path: PathBuf,
        stderr: String,
    },

    #[error("Failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock mirror {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that end a publication run before the mirror is involved
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Failed to write feed {path}: {source}")]
    FeedWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to sync channel '{channel}' into {destination}: {source}")]
    Sync {
        channel: String,
        destination: PathBuf,
        #[source]
        source: SyncError,
    },
}
