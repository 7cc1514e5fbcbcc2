// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File looked up in the working directory when no config path is given
pub const DEFAULT_CONFIG_FILENAME: &str = "ipfspod.toml";

const DEFAULT_GATEWAYS: &[&str] = &[
    "ipfs.io",
    "dweb.link",
    "cloudflare-ipfs.com",
    "gateway.ravenland.org",
    "hardbin.com",
    "astyanax.io",
];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one subdirectory per channel
    pub channels_dir: PathBuf,
    /// Public URL the mirror repository is served under
    pub public_base_url: String,
    /// Gateway used for enclosure links inside the feed
    pub enclosure_gateway: String,
    pub mirror: MirrorConfig,
    pub store: StoreConfig,
    pub verify: VerifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels_dir: PathBuf::from("channels"),
            public_base_url: "https://podcasts.planethub.info".to_string(),
            enclosure_gateway: "https://ipfs.io".to_string(),
            mirror: MirrorConfig::default(),
            store: StoreConfig::default(),
            verify: VerifyConfig::default(),
        }
    }
}

/// Settings for the published mirror repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub remote_url: Option<String>,
    /// Local clone location
    pub path: PathBuf,
    /// Name of the remote inside the clone
    pub remote: String,
    /// Branch to push; the clone's current branch when unset
    pub branch: Option<String>,
    pub commit_message: String,
    pub max_push_attempts: u32,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            path: PathBuf::from("feed_repos/podcastsnew"),
            remote: "origin".to_string(),
            branch: None,
            commit_message: "update contents".to_string(),
            max_push_attempts: 3,
            author_name: None,
            author_email: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the IPFS HTTP API
    pub api_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub gateways: Vec<String>,
    /// Probes in flight per gateway
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl VerifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            gateways: DEFAULT_GATEWAYS.iter().map(|g| g.to_string()).collect(),
            concurrency: 5,
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `ipfspod.toml` in the
    /// working directory is used when present, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                Self::from_file(path)
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILENAME);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
