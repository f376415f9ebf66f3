//! ObjectStorage - face image persistence

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Object store the tracker uploads face crops to
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store a JPEG under `key`, returning its public URL
    async fn put_face_image(&self, bytes: Vec<u8>, key: &str) -> Result<String>;

    /// Fetch an object by URL (reference photos at bootstrap)
    async fn get_object(&self, url: &str) -> Result<Vec<u8>>;
}

/// Bucket reachable over plain HTTP PUT/GET
pub struct HttpObjectStorage {
    client: reqwest::Client,
    bucket_url: String,
}

impl HttpObjectStorage {
    pub fn new(bucket_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            bucket_url: bucket_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url, urlencoding::encode(key))
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn put_face_image(&self, bytes: Vec<u8>, key: &str) -> Result<String> {
        let url = self.object_url(key);
        let resp = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(bytes)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Storage(format!(
                "upload {} failed: {}",
                key,
                resp.status()
            )));
        }
        Ok(url)
    }

    async fn get_object(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Storage(format!("download {} failed: {}", url, resp.status())));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
