// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod git;
mod lock;
mod publisher;

pub use git::{GitBackend, GitCli, MergeOutcome, PushOutcome, classify_failure};
pub use lock::MirrorLock;
pub use publisher::{CommitOutcome, RepositoryPublisher};

#[cfg(test)]
pub(crate) use git::testing;
