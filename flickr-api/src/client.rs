use std::path::Path;

use reqwest::{Client, StatusCode, multipart};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

const DEFAULT_REST_BASE_URL: &str = "https://api.flickr.com";
const DEFAULT_UPLOAD_BASE_URL: &str = "https://up.flickr.com";

const REST_PATH: &str = "/services/rest";
const UPLOAD_PATH: &str = "/services/upload/";

/// "Filetype was not recognised" -- the service rejected the file itself.
const UPLOAD_ERR_UNSUPPORTED_FILE: i64 = 5;

#[derive(Debug, Error)]
pub enum FlickrError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("service returned http {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("malformed api response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload response missing ticket id")]
    MissingTicket,
}

/// How a submission failure should be treated by the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorClass {
    /// Worth retrying after a delay (server closed connection and friends).
    Transient,
    /// The file itself was rejected; retrying will never succeed.
    CorruptFile,
    /// Configuration or protocol problem; the whole run should stop.
    Fatal,
}

impl FlickrError {
    pub fn upload_class(&self) -> UploadErrorClass {
        match self {
            FlickrError::Http { status, .. }
                if matches!(
                    *status,
                    StatusCode::BAD_GATEWAY
                        | StatusCode::SERVICE_UNAVAILABLE
                        | StatusCode::GATEWAY_TIMEOUT
                ) =>
            {
                UploadErrorClass::Transient
            }
            FlickrError::Request(err) if err.is_connect() || err.is_timeout() => {
                UploadErrorClass::Transient
            }
            FlickrError::Api { code, .. } if *code == UPLOAD_ERR_UNSUPPORTED_FILE => {
                UploadErrorClass::CorruptFile
            }
            _ => UploadErrorClass::Fatal,
        }
    }
}

#[derive(Clone)]
pub struct FlickrClient {
    http: Client,
    rest_url: Url,
    upload_url: Url,
    api_key: String,
    auth_token: String,
}

impl FlickrClient {
    pub fn new(
        api_key: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, FlickrError> {
        Self::with_base_urls(
            DEFAULT_REST_BASE_URL,
            DEFAULT_UPLOAD_BASE_URL,
            api_key,
            auth_token,
        )
    }

    /// Point both the REST and upload endpoints at one host. Used by tests.
    pub fn with_base_url(
        base_url: &str,
        api_key: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, FlickrError> {
        Self::with_base_urls(base_url, base_url, api_key, auth_token)
    }

    pub fn with_base_urls(
        rest_base_url: &str,
        upload_base_url: &str,
        api_key: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, FlickrError> {
        Ok(Self {
            http: Client::new(),
            rest_url: Url::parse(rest_base_url)?.join(REST_PATH)?,
            upload_url: Url::parse(upload_base_url)?.join(UPLOAD_PATH)?,
            api_key: api_key.into(),
            auth_token: auth_token.into(),
        })
    }

    /// Cheap authenticated probe; fails when the token is stale or the
    /// service is unreachable.
    pub async fn test_login(&self) -> Result<(), FlickrError> {
        let _: Value = self.call("test.login", false, &[]).await?;
        Ok(())
    }

    pub async fn get_photosets(&self) -> Result<Vec<Photoset>, FlickrError> {
        let envelope: PhotosetsEnvelope = self.call("photosets.getList", false, &[]).await?;
        Ok(envelope
            .photosets
            .photosets
            .into_iter()
            .map(|raw| Photoset {
                id: raw.id,
                title: raw.title.content,
            })
            .collect())
    }

    pub async fn create_photoset(
        &self,
        title: &str,
        primary_photo_id: &str,
    ) -> Result<String, FlickrError> {
        let envelope: CreateEnvelope = self
            .call(
                "photosets.create",
                true,
                &[("title", title), ("primary_photo_id", primary_photo_id)],
            )
            .await?;
        Ok(envelope.photoset.id)
    }

    pub async fn add_photo_to_set(
        &self,
        photoset_id: &str,
        photo_id: &str,
    ) -> Result<(), FlickrError> {
        let _: Value = self
            .call(
                "photosets.addPhoto",
                true,
                &[("photoset_id", photoset_id), ("photo_id", photo_id)],
            )
            .await?;
        Ok(())
    }

    pub async fn photoset_photos_page(
        &self,
        photoset_id: &str,
        page: u32,
        per_page: u32,
    ) -> Result<PhotosPage, FlickrError> {
        let envelope: PhotosEnvelope = self
            .call(
                "photosets.getPhotos",
                false,
                &[
                    ("photoset_id", photoset_id),
                    ("extras", "tags"),
                    ("per_page", &per_page.to_string()),
                    ("page", &page.to_string()),
                ],
            )
            .await?;
        Ok(PhotosPage {
            photos: envelope.photoset.photos,
            page: envelope.photoset.page,
            pages: envelope.photoset.pages,
        })
    }

    pub async fn all_photoset_photos(
        &self,
        photoset_id: &str,
        page_size: u32,
    ) -> Result<Vec<RemotePhoto>, FlickrError> {
        let page_size = page_size.max(1);
        let mut page = 1u32;
        let mut photos = Vec::new();
        loop {
            let batch = self
                .photoset_photos_page(photoset_id, page, page_size)
                .await?;
            let pages = batch.pages.max(1);
            photos.extend(batch.photos);
            if page >= pages {
                break;
            }
            page += 1;
        }
        Ok(photos)
    }

    /// Submit a file in asynchronous mode. The service accepts the bytes and
    /// returns a ticket id; the actual processing outcome is reported later
    /// via [`FlickrClient::check_tickets`]. Visibility is fixed to private.
    pub async fn upload_async(
        &self,
        source: &Path,
        title: &str,
        tags: &str,
    ) -> Result<String, FlickrError> {
        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| title.to_string());
        let form = multipart::Form::new()
            .text("api_key", self.api_key.clone())
            .text("auth_token", self.auth_token.clone())
            .text("title", title.to_string())
            .text("tags", tags.to_string())
            .text("is_public", "0")
            .text("is_family", "1")
            .text("is_friend", "1")
            .text("async", "1")
            .text("format", "json")
            .text("nojsoncallback", "1")
            .part("photo", multipart::Part::stream(body).file_name(file_name));

        let response = self
            .http
            .post(self.upload_url.clone())
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FlickrError::Http { status, body });
        }

        let envelope: UploadEnvelope = response.json().await?;
        if envelope.stat != "ok" {
            return Err(FlickrError::Api {
                code: envelope.code.unwrap_or(-1),
                message: envelope
                    .message
                    .unwrap_or_else(|| "unknown upload failure".to_string()),
            });
        }
        envelope.ticketid.ok_or(FlickrError::MissingTicket)
    }

    /// One batched status check for every outstanding ticket id.
    pub async fn check_tickets(
        &self,
        tickets: &[String],
    ) -> Result<Vec<TicketStatus>, FlickrError> {
        if tickets.is_empty() {
            return Ok(Vec::new());
        }
        let joined = tickets.join(",");
        let envelope: TicketsEnvelope = self
            .call(
                "photos.upload.checkTickets",
                false,
                &[("tickets", &joined)],
            )
            .await?;
        Ok(envelope
            .uploader
            .tickets
            .into_iter()
            .map(TicketStatus::from_raw)
            .collect())
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        post: bool,
        params: &[(&str, &str)],
    ) -> Result<T, FlickrError> {
        let mut url = self.rest_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("method", &format!("flickr.{method}"));
            query.append_pair("format", "json");
            query.append_pair("nojsoncallback", "1");
            query.append_pair("api_key", &self.api_key);
            query.append_pair("auth_token", &self.auth_token);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        let request = if post {
            self.http.post(url)
        } else {
            self.http.get(url)
        };
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FlickrError::Http { status, body });
        }
        let value: Value = response.json().await?;
        Self::check_stat(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    fn check_stat(value: &Value) -> Result<(), FlickrError> {
        if value.get("stat").and_then(Value::as_str) == Some("ok") {
            return Ok(());
        }
        Err(FlickrError::Api {
            code: value.get("code").and_then(Value::as_i64).unwrap_or(-1),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown api failure")
                .to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photoset {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePhoto {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tags: String,
}

#[derive(Debug)]
pub struct PhotosPage {
    pub photos: Vec<RemotePhoto>,
    pub page: u32,
    pub pages: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketStatus {
    pub id: String,
    pub state: TicketState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketState {
    Pending,
    Complete { photo_id: String },
    Failed,
}

impl TicketStatus {
    fn from_raw(raw: RawTicket) -> Self {
        let state = match (raw.complete, raw.photoid) {
            (0, _) => TicketState::Pending,
            (1, Some(photo_id)) => TicketState::Complete { photo_id },
            // A "complete" ticket without a photo id cannot be attached to
            // anything, so it resolves as a failure.
            _ => TicketState::Failed,
        };
        Self { id: raw.id, state }
    }
}

#[derive(Debug, Deserialize)]
struct PhotosetsEnvelope {
    photosets: PhotosetsBody,
}

#[derive(Debug, Deserialize)]
struct PhotosetsBody {
    #[serde(rename = "photoset", default)]
    photosets: Vec<RawPhotoset>,
}

#[derive(Debug, Deserialize)]
struct RawPhotoset {
    id: String,
    title: Title,
}

#[derive(Debug, Deserialize)]
struct Title {
    #[serde(rename = "_content")]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CreateEnvelope {
    photoset: CreatedPhotoset,
}

#[derive(Debug, Deserialize)]
struct CreatedPhotoset {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PhotosEnvelope {
    photoset: RawPhotosPage,
}

#[derive(Debug, Deserialize)]
struct RawPhotosPage {
    #[serde(rename = "photo", default)]
    photos: Vec<RemotePhoto>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page")]
    pages: u32,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct UploadEnvelope {
    stat: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    ticketid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TicketsEnvelope {
    uploader: RawTickets,
}

#[derive(Debug, Deserialize)]
struct RawTickets {
    #[serde(rename = "ticket", default)]
    tickets: Vec<RawTicket>,
}

#[derive(Debug, Deserialize)]
struct RawTicket {
    id: String,
    #[serde(default)]
    complete: i64,
    #[serde(default)]
    photoid: Option<String>,
}
