//! HTTP gateway backed by reqwest.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use wayfarer_common::{Error, Result};

use crate::auth::{CredentialProvider, SessionNotifier};
use crate::gateway::{Method, RemoteGateway, Reply, Upload};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MULTIPART_BOUNDARY: &str = "WayfarerUploadBoundary";

/// Gateway talking JSON over HTTP to the Wayfarer backend.
pub struct HttpGateway {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    session: SessionNotifier,
}

impl HttpGateway {
    /// Create a new HTTP gateway.
    ///
    /// # Errors
    /// - `base_url` is not an absolute http(s) URL
    /// - The HTTP client cannot be built
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        session: SessionNotifier,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL {}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the bearer token, refusing to send with an expired one.
    fn authorize(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let Some(token) = self.credentials.token() else {
            return Ok(builder);
        };

        if self.credentials.is_token_expired() {
            self.session.invalidate("access token expired");
            return Err(Error::SessionExpired);
        }

        Ok(builder.header(header::AUTHORIZATION, format!("Bearer {}", token)))
    }

    async fn send(&self, method: Method, path: &str, builder: RequestBuilder) -> Result<Reply> {
        let response = builder.send().await.map_err(|e| {
            debug!("{} {} got no response: {}", method, path, e);
            Error::Offline(format!("{} {}: {}", method, path, e))
        })?;

        self.handle_response(method, path, response).await
    }

    async fn handle_response(
        &self,
        method: Method,
        path: &str,
        response: reqwest::Response,
    ) -> Result<Reply> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            self.session
                .invalidate(format!("401 from {} {}", method, path));
            return Err(Error::SessionExpired);
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Reply::NoContent);
        }

        // A body cut off mid-transfer is a transport failure.
        let body = response
            .text()
            .await
            .map_err(|e| Error::Offline(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            warn!("{} {} failed with {}", method, path, status);
            return Err(Error::remote(status.as_u16(), body));
        }

        if body.trim().is_empty() {
            return Ok(Reply::NoContent);
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(Reply::Json(value)),
            Err(_) => Ok(Reply::Text(body)),
        }
    }
}

fn multipart_body(upload: &Upload) -> Vec<u8> {
    let mut body = Vec::new();

    for (name, value) in &upload.fields {
        body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            upload.file_name.replace('"', "")
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", upload.content_type).as_bytes());
    body.extend_from_slice(&upload.data);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}--", MULTIPART_BOUNDARY).as_bytes());
    body
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Reply> {
        let url = self.url(path);
        let builder = match method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Put => self.http.put(&url),
            Method::Delete => self.http.delete(&url),
        };

        let mut builder = self.authorize(builder)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }

        debug!("{} {}", method, path);
        self.send(method, path, builder).await
    }

    async fn upload(&self, path: &str, upload: Upload) -> Result<Reply> {
        let builder = self
            .authorize(self.http.post(self.url(path)))?
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(multipart_body(&upload));

        debug!("POST {} (multipart, {} bytes)", path, upload.data.len());
        self.send(Method::Post, path, builder).await
    }
}
