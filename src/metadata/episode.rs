// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::Channel;

/// A content-addressed media file attached to an episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub content_id: String,
    pub length: u64,
    pub mime_type: String,
}

impl Enclosure {
    pub fn new(
        content_id: impl Into<String>,
        length: u64,
        mime_type: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let content_id = content_id.into();
        if content_id.trim().is_empty() {
            return Err(ValidationError::EmptyContentId);
        }
        Ok(Self {
            content_id,
            length,
            mime_type: mime_type.into(),
        })
    }
}

/// A single published episode, as stored in the channel's episode log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub author: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub published: DateTime<Utc>,
    /// First entry is the primary asset
    pub enclosures: Vec<Enclosure>,
    /// Random 256-bit identifier, base64 encoded
    pub id: String,
    /// Feed this episode was forwarded from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Episode {
    /// The enclosure used to check distribution
    pub fn primary_enclosure(&self) -> Option<&Enclosure> {
        self.enclosures.first()
    }
}

/// User-supplied fields for a new episode, before defaults are applied
#[derive(Debug, Clone, Default)]
pub struct EpisodeDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub enclosures: Vec<Enclosure>,
    /// Used as title when none is given, typically the first file's stem
    pub fallback_title: Option<String>,
    pub source: Option<String>,
}

impl EpisodeDraft {
    /// Fill defaults from the channel and stamp id and publish time
    pub fn into_episode(
        self,
        channel: &Channel,
        published: DateTime<Utc>,
    ) -> Result<Episode, ValidationError> {
        if self.enclosures.is_empty() {
            return Err(ValidationError::NoEnclosures);
        }

        let title = self
            .title
            .or(self.fallback_title)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ValidationError::MissingTitle)?;

        Ok(Episode {
            description: self.description.unwrap_or_else(|| title.clone()),
            title,
            link: self.link,
            author: self
                .author
                .unwrap_or_else(|| channel.managing_editor.clone()),
            categories: self.categories,
            published,
            enclosures: self.enclosures,
            id: generate_episode_id(),
            source: self.source,
        })
    }
}

/// 32 random bytes, base64 encoded
pub fn generate_episode_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
