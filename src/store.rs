// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::error::{StoreError, ValidationError};
use crate::metadata::Enclosure;

/// What the content store hands back for a stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub content_id: String,
    pub length: u64,
    pub mime_type: String,
}

impl StoredContent {
    pub fn into_enclosure(self) -> Result<Enclosure, ValidationError> {
        Enclosure::new(self.content_id, self.length, self.mime_type)
    }
}

/// Content-addressed storage for episode media
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, path: &Path) -> Result<StoredContent, StoreError>;
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Content store backed by the IPFS HTTP API (`/api/v0/add`)
#[derive(Clone)]
pub struct IpfsStore {
    client: reqwest::Client,
    api_url: String,
}

impl IpfsStore {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn add_url(&self) -> String {
        format!("{}/api/v0/add?pin=true", self.api_url)
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    async fn put(&self, path: &Path) -> Result<StoredContent, StoreError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::FileReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        let length = data.len() as u64;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let form = Form::new().part("file", Part::bytes(data).file_name(file_name));
        let url = self.add_url();

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::RequestFailed {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(StoreError::HttpStatus { url, status });
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                url: url.clone(),
                source: e,
            })?;

        Ok(StoredContent {
            content_id: added.hash,
            length,
            mime_type: guess_mime_type(path).to_string(),
        })
    }
}

/// Guess a media type from the file extension
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn guesses_common_media_types() {
        assert_eq!(guess_mime_type(Path::new("ep1.mp3")), "audio/mpeg");
        assert_eq!(guess_mime_type(Path::new("ep1.M4A")), "audio/mp4");
        assert_eq!(guess_mime_type(Path::new("talk.webm")), "video/webm");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(
            guess_mime_type(Path::new("notes.xyz")),
            "application/octet-stream"
        );
        assert_eq!(
            guess_mime_type(Path::new("no_extension")),
            "application/octet-stream"
        );
    }

    #[test]
    fn add_url_is_built_from_api_base() {
        let store = IpfsStore::new("http://127.0.0.1:5001/");
        assert_eq!(store.add_url(), "http://127.0.0.1:5001/api/v0/add?pin=true");
    }

    #[test]
    fn add_response_parses_hash() {
        let json = r#"{"Name":"ep1.mp3","Hash":"QmHash","Size":"1234"}"#;
        let response: AddResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.hash, "QmHash");
    }

    #[tokio::test]
    async fn unreadable_file_is_a_store_error() {
        let store = IpfsStore::new("http://127.0.0.1:1");
        let result = store.put(&PathBuf::from("/definitely/not/here.mp3")).await;
        assert!(matches!(result, Err(StoreError::FileReadFailed { .. })));
    }

    #[test]
    fn stored_content_becomes_enclosure() {
        let enclosure = StoredContent {
            content_id: "QmHash".to_string(),
            length: 42,
            mime_type: "audio/mpeg".to_string(),
        }
        .into_enclosure()
        .unwrap();
        assert_eq!(enclosure.content_id, "QmHash");
        assert_eq!(enclosure.length, 42);
    }
}
