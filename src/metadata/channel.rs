// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

/// A podcast channel: the unit that gets rendered and published as one feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub title: String,
    pub description: String,
    pub link: String,
    pub copyright: String,
    pub language: String,
    pub managing_editor: String,
    /// Recommended time between client refreshes, in seconds
    pub ttl: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Channel {
    /// Channel with the conventional defaults for everything but the title.
    ///
    /// `name` is the short directory name; underscores become spaces in the
    /// derived title.
    pub fn with_defaults(name: &str, link: String) -> Self {
        let title = name.replace('_', " ");
        Self {
            description: title.clone(),
            title,
            link,
            copyright: "CC-BY 4.0 Intl.".to_string(),
            language: "en".to_string(),
            managing_editor: "anonymous".to_string(),
            ttl: 1800,
            key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_title_from_name() {
        let channel = Channel::with_defaults("tech_talk", "https://example.com/".to_string());
        assert_eq!(channel.title, "tech talk");
        assert_eq!(channel.description, "tech talk");
        assert_eq!(channel.language, "en");
        assert_eq!(channel.managing_editor, "anonymous");
        assert_eq!(channel.ttl, 1800);
        assert!(channel.key.is_none());
    }

    #[test]
    fn missing_key_deserializes_as_none() {
        let json = r#"{
            "title": "T", "description": "D", "link": "L", "copyright": "C",
            "language": "en", "managing_editor": "M", "ttl": 60
        }"#;
        let channel: Channel = serde_json::from_str(json).unwrap();
        assert_eq!(channel.ttl, 60);
        assert!(channel.key.is_none());
    }
}
