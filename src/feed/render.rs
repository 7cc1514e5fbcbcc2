// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use rss::{
    CategoryBuilder, ChannelBuilder, EnclosureBuilder, GuidBuilder, Item, ItemBuilder,
    SourceBuilder,
};

use crate::error::RenderError;
use crate::metadata::{Channel, Episode};

const GENERATOR: &str = concat!("ipfspod ", env!("CARGO_PKG_VERSION"));

/// Turns a channel and its episodes into a feed document.
///
/// Implementations must be deterministic: the same channel, episodes and
/// timestamp always produce the same bytes.
pub trait FeedRenderer: Send + Sync {
    fn render(
        &self,
        channel: &Channel,
        episodes: &[Episode],
        generated_at: DateTime<Utc>,
    ) -> Result<String, RenderError>;
}

/// RSS 2.0 renderer linking enclosures through an IPFS gateway
#[derive(Debug, Clone)]
pub struct RssRenderer {
    gateway: String,
}

impl RssRenderer {
    /// `gateway` is the base URL enclosure links are built on,
    /// e.g. `https://ipfs.io`
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into().trim_end_matches('/').to_string(),
        }
    }

    fn enclosure_url(&self, content_id: &str) -> String {
        format!("{}/ipfs/{}", self.gateway, content_id)
    }

    fn item(&self, episode: &Episode) -> Item {
        let categories = episode
            .categories
            .iter()
            .map(|c| CategoryBuilder::default().name(c.clone()).build())
            .collect::<Vec<_>>();

        // RSS 2.0 allows a single enclosure per item
        let enclosure = episode.primary_enclosure().map(|e| {
            EnclosureBuilder::default()
                .url(self.enclosure_url(&e.content_id))
                .length(e.length.to_string())
                .mime_type(e.mime_type.clone())
                .build()
        });

        ItemBuilder::default()
            .title(Some(episode.title.clone()))
            .description(Some(episode.description.clone()))
            .link(episode.link.clone())
            .author(Some(episode.author.clone()))
            .categories(categories)
            .pub_date(Some(episode.published.to_rfc2822()))
            .guid(Some(
                GuidBuilder::default()
                    .value(episode.id.clone())
                    .permalink(false)
                    .build(),
            ))
            .enclosure(enclosure)
            .source(
                episode
                    .source
                    .as_ref()
                    .map(|url| SourceBuilder::default().url(url.clone()).build()),
            )
            .build()
    }
}

impl FeedRenderer for RssRenderer {
    fn render(
        &self,
        channel: &Channel,
        episodes: &[Episode],
        generated_at: DateTime<Utc>,
    ) -> Result<String, RenderError> {
        let items = episodes.iter().map(|e| self.item(e)).collect::<Vec<_>>();

        let document = ChannelBuilder::default()
            .title(channel.title.clone())
            .link(channel.link.clone())
            .description(channel.description.clone())
            .copyright(Some(channel.copyright.clone()))
            .language(Some(channel.language.clone()))
            .managing_editor(Some(channel.managing_editor.clone()))
            .ttl(Some(channel.ttl.to_string()))
            .generator(Some(GENERATOR.to_string()))
            .last_build_date(Some(generated_at.to_rfc2822()))
            .items(items)
            .build();

        let bytes = document.pretty_write_to(Vec::new(), b' ', 2)?;
        Ok(String::from_utf8(bytes)?)
    }
}
