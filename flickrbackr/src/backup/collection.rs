use std::path::Path;

use flickr_api::{FlickrClient, FlickrError};

use super::index::RemoteIndex;
use super::ledger::FailureLedger;

/// Photos per listing request when rebuilding the remote index.
const PHOTOS_PAGE_SIZE: u32 = 500;

/// One local directory paired with its remote photoset: the remote index for
/// dedup and the failure ledger for permanent skips. Lives from the start of
/// the directory's traversal until it is drained and persisted.
pub struct Collection {
    pub title: String,
    /// Remote photoset id; `None` until the first successful upload creates
    /// the set.
    pub id: Option<String>,
    pub index: RemoteIndex,
    pub ledger: FailureLedger,
}

impl Collection {
    /// Build the collection state for one directory: fetch the remote photo
    /// index when the photoset already exists, then fold in the persisted
    /// failure records.
    pub async fn open(
        client: &FlickrClient,
        title: &str,
        remote_id: Option<String>,
        directory: &Path,
    ) -> Result<Self, FlickrError> {
        let mut index = RemoteIndex::default();
        if let Some(id) = &remote_id {
            for photo in client.all_photoset_photos(id, PHOTOS_PAGE_SIZE).await? {
                index.index_photo(&photo.title, &photo.id, &photo.tags);
            }
        }
        let ledger = FailureLedger::load(directory, &mut index);
        Ok(Self {
            title: title.to_string(),
            id: remote_id,
            index,
            ledger,
        })
    }

    /// Record a permanently failed file: persisted for future runs, and
    /// merged into the index so this run never resubmits it either.
    pub fn mark_failed(&mut self, name: &str, timestamp: i64) {
        self.ledger.append(name, timestamp);
        self.index.merge_failure(name, timestamp);
    }

    /// Called once drained; persists what the run learned.
    pub fn release(&self) {
        self.ledger.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn open_without_remote_id_touches_nothing_remote() {
        let server = MockServer::start().await;
        let client = FlickrClient::with_base_url(&server.uri(), "key", "token").unwrap();
        let dir = tempdir().unwrap();

        let collection = Collection::open(&client, "fresh", None, dir.path())
            .await
            .unwrap();
        assert_eq!(collection.id, None);
        assert!(collection.index.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn open_indexes_remote_photos_and_ledger_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/rest"))
            .and(query_param("method", "flickr.photosets.getPhotos"))
            .and(query_param("photoset_id", "72001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "photoset": {
                    "photo": [
                        {"id": "1", "title": "img1", "tags": "flickrbackr vision:lwt=1000"}
                    ],
                    "page": 1,
                    "pages": 1
                },
                "stat": "ok"
            })))
            .mount(&server)
            .await;
        let client = FlickrClient::with_base_url(&server.uri(), "key", "token").unwrap();

        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(super::super::ledger::LEDGER_FILE),
            r#"[{"path": "dup.jpg", "timestamp": 1500}]"#,
        )
        .unwrap();

        let collection = Collection::open(&client, "vacation", Some("72001".into()), dir.path())
            .await
            .unwrap();
        assert!(collection.index.exists("img1", 1000));
        assert!(collection.index.exists("dup", 1500));
    }

    #[tokio::test]
    async fn mark_failed_suppresses_resubmission_within_the_run() {
        let server = MockServer::start().await;
        let client = FlickrClient::with_base_url(&server.uri(), "key", "token").unwrap();
        let dir = tempdir().unwrap();

        let mut collection = Collection::open(&client, "fresh", None, dir.path())
            .await
            .unwrap();
        collection.mark_failed("broken", 77);
        assert!(collection.index.exists("broken", 77));
        assert!(!collection.ledger.is_empty());
    }
}
