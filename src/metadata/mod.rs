// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod channel;
mod episode;
mod store;

pub use channel::Channel;
pub use episode::{Enclosure, Episode, EpisodeDraft, generate_episode_id};
pub use store::{
    CHANNEL_FILENAME, ChannelStore, EPISODES_FILENAME, FEED_FILENAME, normalize_channel_name,
};
