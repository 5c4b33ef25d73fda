//! Remote gateway trait definition.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use wayfarer_common::Result;

/// HTTP verb used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        f.write_str(verb)
    }
}

/// A parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// JSON body.
    Json(Value),
    /// Non-JSON body.
    Text(String),
    /// 204 or an empty body.
    NoContent,
}

impl Reply {
    /// The JSON body, if there is one.
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The body as a list of JSON values. Anything else is an empty list.
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Self::Json(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }
}

/// A file attached to a multipart upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    /// Extra text form fields sent alongside the file.
    pub fields: Vec<(String, String)>,
}

/// One authenticated request/response cycle against the backend.
///
/// Implementations normalize failures into two kinds:
/// - `Error::Offline` when no response was received
/// - `Error::Remote` for any non-2xx response
///
/// plus `Error::SessionExpired` when credentials are expired or rejected.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Gateway name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Perform a request with an optional JSON body.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Reply>;

    /// Post a multipart file upload.
    async fn upload(&self, path: &str, upload: Upload) -> Result<Reply>;
}
