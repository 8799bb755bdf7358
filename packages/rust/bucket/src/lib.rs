//! Client for the hosted object store that holds filing PDFs.
//!
//! Objects are addressed as `<bucket>/<object path>` under
//! `{project_url}/storage/v1/object/`. Every request authenticates with the
//! service-role key, sent both as a bearer token and as the `apikey` header.

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, info, instrument};
use url::Url;

use filingdesk_shared::{BucketConfig, FilingDeskError, Result};

/// Largest object we are willing to download (50 MB).
const MAX_OBJECT_SIZE: u64 = 50 * 1024 * 1024;

/// User-Agent string for object-store requests.
const USER_AGENT: &str = concat!("FilingDesk/", env!("CARGO_PKG_VERSION"));

/// Authenticated object-store client bound to one bucket.
#[derive(Debug, Clone)]
pub struct BucketClient {
    client: Client,
    project_url: Url,
    bucket: String,
}

impl BucketClient {
    /// Build a client from resolved bucket settings.
    pub fn new(config: &BucketConfig) -> Result<Self> {
        let key = HeaderValue::from_str(&config.service_key)
            .map_err(|e| FilingDeskError::config(format!("service key is not a valid header: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_key))
            .map_err(|e| FilingDeskError::config(format!("service key is not a valid header: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| FilingDeskError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            project_url: config.project_url.clone(),
            bucket: config.bucket.clone(),
        })
    }

    /// Bucket this client reads from and writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Qualify a storage path with the bucket name unless it already carries it.
    pub fn qualified_path(&self, storage_path: &str) -> String {
        let trimmed = storage_path.trim_start_matches('/');
        if trimmed.starts_with(&format!("{}/", self.bucket)) {
            trimmed.to_string()
        } else {
            format!("{}/{trimmed}", self.bucket)
        }
    }

    /// Full object URL for a storage path.
    pub fn object_url(&self, storage_path: &str) -> Result<Url> {
        let qualified = self.qualified_path(storage_path);
        let mut url = self.project_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                FilingDeskError::config(format!("project URL '{}' cannot be a base", self.project_url))
            })?;
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "object"])
                .extend(qualified.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    /// Download an object's bytes.
    #[instrument(skip(self))]
    pub async fn download(&self, storage_path: &str) -> Result<Vec<u8>> {
        let url = self.object_url(storage_path)?;
        debug!(%url, "downloading object");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FilingDeskError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FilingDeskError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_OBJECT_SIZE {
                return Err(FilingDeskError::Network(format!(
                    "{url}: object is {len} bytes, limit is {MAX_OBJECT_SIZE}"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FilingDeskError::Network(format!("{url}: body read failed: {e}")))?;

        info!(bytes = bytes.len(), "downloaded object");
        Ok(bytes.to_vec())
    }

    /// Upload bytes to `object_path` inside the bucket. Returns the stored
    /// path (`<bucket>/<object_path>`) to record on the filing.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub async fn upload(&self, object_path: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        let stored_path = self.qualified_path(object_path);
        let url = self.object_url(&stored_path)?;

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(body)
            .send()
            .await
            .map_err(|e| FilingDeskError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(FilingDeskError::Network(format!(
                "{url}: upload failed with HTTP {status}: {}",
                detail.trim()
            )));
        }

        info!(path = %stored_path, "uploaded object");
        Ok(stored_path)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(base: &str) -> BucketConfig {
        BucketConfig {
            project_url: Url::parse(base).unwrap(),
            bucket: "filings".into(),
            service_key: "service-key".into(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn qualifies_paths_once() {
        let client = BucketClient::new(&config_for("https://demo.supabase.co")).unwrap();
        assert_eq!(client.qualified_path("user/1/a.pdf"), "filings/user/1/a.pdf");
        assert_eq!(client.qualified_path("filings/user/1/a.pdf"), "filings/user/1/a.pdf");
        assert_eq!(client.qualified_path("/user/a.pdf"), "filings/user/a.pdf");
        // A sibling bucket sharing the prefix is not mistaken for ours.
        assert_eq!(
            client.qualified_path("filings-archive/a.pdf"),
            "filings/filings-archive/a.pdf"
        );
    }

    #[test]
    fn builds_object_urls() {
        let client = BucketClient::new(&config_for("https://demo.supabase.co/")).unwrap();
        let url = client.object_url("user/1/annual accounts.pdf").unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo.supabase.co/storage/v1/object/filings/user/1/annual%20accounts.pdf"
        );
    }

    #[tokio::test]
    async fn download_sends_service_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/object/filings/user/1/a.pdf"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 body".to_vec()))
            .mount(&server)
            .await;

        let client = BucketClient::new(&config_for(&server.uri())).unwrap();
        let bytes = client.download("filings/user/1/a.pdf").await.expect("download");
        assert_eq!(bytes, b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn download_maps_http_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = BucketClient::new(&config_for(&server.uri())).unwrap();
        let err = client.download("missing.pdf").await.unwrap_err();
        assert!(matches!(err, FilingDeskError::Network(_)));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn upload_posts_body_and_returns_stored_path() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/storage/v1/object/filings/user/1/a.pdf"))
            .and(header("content-type", "application/pdf"))
            .and(body_bytes(b"%PDF-1.4".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Key":"filings/user/1/a.pdf"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = BucketClient::new(&config_for(&server.uri())).unwrap();
        let stored = client
            .upload("user/1/a.pdf", b"%PDF-1.4".to_vec(), "application/pdf")
            .await
            .expect("upload");
        assert_eq!(stored, "filings/user/1/a.pdf");
    }

    #[tokio::test]
    async fn upload_conflict_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("The resource already exists"))
            .mount(&server)
            .await;

        let client = BucketClient::new(&config_for(&server.uri())).unwrap();
        let err = client
            .upload("user/1/a.pdf", b"%PDF".to_vec(), "application/pdf")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
