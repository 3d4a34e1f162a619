//! HTTP access to the upstream service and the image-hosting providers.

pub mod client;
pub mod image_host;

pub use client::{AssetRenderer, CredentialUploader, UpstreamClient};
