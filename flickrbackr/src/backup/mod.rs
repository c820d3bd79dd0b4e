pub mod collection;
pub mod controller;
pub mod index;
pub mod ledger;
pub mod media;
pub mod scheduler;
pub mod walker;

use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort the whole run. Per-file problems never surface here;
/// they end up in the failure ledger instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("remote api error: {0}")]
    Api(#[from] flickr_api::FlickrError),
    #[error("ticket poller stopped unexpectedly")]
    PollerGone,
    #[error("cannot read backup root {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
