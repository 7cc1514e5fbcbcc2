// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{MetadataError, ValidationError};

use super::{Channel, Episode};

pub const CHANNEL_FILENAME: &str = "channel.json";
pub const EPISODES_FILENAME: &str = "episodes.jsonl";
pub const FEED_FILENAME: &str = "feed.xml";

/// Reduce user input to a single safe directory name.
///
/// Names starting with `.git` are refused: the channel directory is mirrored
/// into the root of a git clone and must never shadow its metadata.
pub fn normalize_channel_name(raw: &str) -> Result<String, ValidationError> {
    let last = Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let name = sanitize_filename::sanitize(last);

    let reserved = name.to_ascii_lowercase().starts_with(".git");
    if name.is_empty() || name == "." || name == ".." || reserved {
        return Err(ValidationError::InvalidChannelName(raw.to_string()));
    }
    Ok(name)
}

/// On-disk channel records: one directory per channel holding the channel
/// record, the append-only episode log and the generated feed
#[derive(Debug, Clone)]
pub struct ChannelStore {
    root: PathBuf,
}

impl ChannelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local asset directory of a channel
    pub fn channel_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write (or overwrite) the channel record, creating the directory.
    /// Existing episodes are left alone.
    pub fn save_channel(&self, name: &str, channel: &Channel) -> Result<PathBuf, MetadataError> {
        let dir = self.channel_dir(name);
        std::fs::create_dir_all(&dir).map_err(|e| MetadataError::WriteFailed {
            path: dir.clone(),
            source: e,
        })?;

        let path = dir.join(CHANNEL_FILENAME);
        let json = serde_json::to_string_pretty(channel)?;
        std::fs::write(&path, json).map_err(|e| MetadataError::WriteFailed { path, source: e })?;
        Ok(dir)
    }

    pub fn load_channel(&self, name: &str) -> Result<Channel, MetadataError> {
        let path = self.channel_dir(name).join(CHANNEL_FILENAME);
        if !path.exists() {
            return Err(MetadataError::ChannelNotFound {
                name: name.to_string(),
                path: self.root.clone(),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|e| MetadataError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| MetadataError::JsonParseFailed {
            path,
            line: e.line(),
            source: e,
        })
    }

    /// Append one episode to the channel's log
    pub fn append_episode(&self, name: &str, episode: &Episode) -> Result<(), MetadataError> {
        self.ensure_channel(name)?;
        let path = self.channel_dir(name).join(EPISODES_FILENAME);
        let mut line = serde_json::to_string(episode)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| MetadataError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;

        file.write_all(line.as_bytes())
            .map_err(|e| MetadataError::WriteFailed { path, source: e })
    }

    /// All episodes in insertion order. A channel without a log has none,
    /// a channel that was never created is an error.
    pub fn load_episodes(&self, name: &str) -> Result<Vec<Episode>, MetadataError> {
        self.ensure_channel(name)?;
        let path = self.channel_dir(name).join(EPISODES_FILENAME);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| MetadataError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| MetadataError::JsonParseFailed {
                    path: path.clone(),
                    line: index + 1,
                    source: e,
                })
            })
            .collect()
    }

    fn ensure_channel(&self, name: &str) -> Result<(), MetadataError> {
        if self.channel_dir(name).join(CHANNEL_FILENAME).exists() {
            return Ok(());
        }
        Err(MetadataError::ChannelNotFound {
            name: name.to_string(),
            path: self.root.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Enclosure, EpisodeDraft};
    use chrono::Utc;
    use tempfile::tempdir;

    fn channel() -> Channel {
        Channel::with_defaults("tech-talk", "https://example.com/tech-talk/".to_string())
    }

    fn episode(title: &str) -> Episode {
        EpisodeDraft {
            title: Some(title.to_string()),
            enclosures: vec![Enclosure::new(format!("Qm{title}"), 10, "audio/mpeg").unwrap()],
            ..Default::default()
        }
        .into_episode(&channel(), Utc::now())
        .unwrap()
    }

    #[test]
    fn normalize_keeps_plain_names() {
        assert_eq!(normalize_channel_name("tech-talk").unwrap(), "tech-talk");
    }

    #[test]
    fn normalize_strips_leading_directories() {
        assert_eq!(normalize_channel_name("some/dir/show").unwrap(), "show");
    }

    #[test]
    fn normalize_rejects_empty_names() {
        assert!(normalize_channel_name("").is_err());
        assert!(normalize_channel_name("..").is_err());
    }

    #[test]
    fn normalize_rejects_git_metadata_names() {
        for name in [".git", ".GIT", "mirror/.git", ".gitmodules", ".git-backup"] {
            assert!(
                matches!(
                    normalize_channel_name(name),
                    Err(ValidationError::InvalidChannelName(_))
                ),
                "{name} should be rejected"
            );
        }
        assert_eq!(normalize_channel_name("git-talk").unwrap(), "git-talk");
    }

    #[test]
    fn save_and_load_channel() {
        let dir = tempdir().unwrap();
        let store = ChannelStore::new(dir.path());

        let channel_dir = store.save_channel("tech-talk", &channel()).unwrap();
        assert!(channel_dir.join(CHANNEL_FILENAME).exists());

        let loaded = store.load_channel("tech-talk").unwrap();
        assert_eq!(loaded, channel());
    }

    #[test]
    fn load_unknown_channel_fails() {
        let dir = tempdir().unwrap();
        let store = ChannelStore::new(dir.path());
        assert!(matches!(
            store.load_channel("nope"),
            Err(MetadataError::ChannelNotFound { .. })
        ));
    }

    #[test]
    fn episodes_keep_insertion_order() {
        let dir = tempdir().unwrap();
        let store = ChannelStore::new(dir.path());
        store.save_channel("tech-talk", &channel()).unwrap();

        for title in ["first", "second", "third"] {
            store.append_episode("tech-talk", &episode(title)).unwrap();
        }

        let titles: Vec<_> = store
            .load_episodes("tech-talk")
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[test]
    fn resaving_channel_keeps_episodes() {
        let dir = tempdir().unwrap();
        let store = ChannelStore::new(dir.path());
        store.save_channel("tech-talk", &channel()).unwrap();
        store.append_episode("tech-talk", &episode("first")).unwrap();

        let mut updated = channel();
        updated.title = "Renamed".to_string();
        store.save_channel("tech-talk", &updated).unwrap();

        assert_eq!(store.load_channel("tech-talk").unwrap().title, "Renamed");
        assert_eq!(store.load_episodes("tech-talk").unwrap().len(), 1);
    }

    #[test]
    fn channel_without_log_has_no_episodes() {
        let dir = tempdir().unwrap();
        let store = ChannelStore::new(dir.path());
        store.save_channel("tech-talk", &channel()).unwrap();
        assert!(store.load_episodes("tech-talk").unwrap().is_empty());
    }

    #[test]
    fn episodes_of_unknown_channel_fail() {
        let dir = tempdir().unwrap();
        let store = ChannelStore::new(dir.path());
        assert!(matches!(
            store.load_episodes("nope"),
            Err(MetadataError::ChannelNotFound { .. })
        ));
    }

    #[test]
    fn append_to_unknown_channel_fails() {
        let dir = tempdir().unwrap();
        let store = ChannelStore::new(dir.path());
        assert!(store.append_episode("nope", &episode("x")).is_err());
    }

    #[test]
    fn corrupt_log_line_reports_line_number() {
        let dir = tempdir().unwrap();
        let store = ChannelStore::new(dir.path());
        store.save_channel("tech-talk", &channel()).unwrap();
        store.append_episode("tech-talk", &episode("first")).unwrap();

        let log = store.channel_dir("tech-talk").join(EPISODES_FILENAME);
        let mut content = std::fs::read_to_string(&log).unwrap();
        content.push_str("{not json}\n");
        std::fs::write(&log, content).unwrap();

        match store.load_episodes("tech-talk") {
            Err(MetadataError::JsonParseFailed { line, .. }) => assert_eq!(line, 2),
            other => panic!("Expected JsonParseFailed, got {other:?}"),
        }
    }
}
