mod auth;
mod client;

pub use auth::{AUTH_CACHE_FILE, AuthCache, AuthError};
pub use client::{
    FlickrClient, FlickrError, PhotosPage, Photoset, RemotePhoto, TicketState, TicketStatus,
    UploadErrorClass,
};
