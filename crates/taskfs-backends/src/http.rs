//! Shared REST plumbing: authenticated GETs, status mapping and paging headers.

use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use taskfs_core::ServiceError;
use tracing::debug;

const USER_AGENT: &str = concat!("taskfs/", env!("CARGO_PKG_VERSION"));

/// How credentials travel with each request.
#[derive(Debug, Clone)]
pub(crate) enum Auth {
    /// Anonymous
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// Custom header carrying the token
    Header(&'static str, String),
    /// Query parameter carrying the token
    Query(&'static str, String),
}

/// A tracker API rooted at a base URL.
#[derive(Debug, Clone)]
pub(crate) struct Api {
    client: Client,
    base: Url,
    auth: Auth,
}

impl Api {
    pub(crate) fn new(base: &str, auth: Auth) -> Result<Self, ServiceError> {
        let mut base = Url::parse(base)
            .map_err(|e| ServiceError::Config(format!("invalid base url {base}: {e}")))?;
        if base.host_str().is_none() {
            return Err(ServiceError::Config(format!("base url has no host: {base}")));
        }
        // Relative joins must keep the last path segment of the base.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self { client, base, auth })
    }

    /// Host name of the base URL.
    pub(crate) fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    /// Resolves `path` (no leading slash) against the base URL.
    pub(crate) fn url(&self, path: &str) -> Result<Url, ServiceError> {
        self.base
            .join(path)
            .map_err(|e| ServiceError::Config(format!("invalid path {path}: {e}")))
    }

    /// GETs `url` and decodes the JSON body, returning the response headers
    /// for paging.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<(T, HeaderMap), ServiceError> {
        debug!(url = %url, "GET");

        let mut request = self.client.get(url).query(query);
        request = match &self.auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Header(name, token) => request.header(*name, token),
            Auth::Query(name, token) => request.query(&[(*name, token)]),
        };

        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let value = serde_json::from_slice(&body).map_err(|e| ServiceError::Decode(e.to_string()))?;
        Ok((value, headers))
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_decode() {
        ServiceError::Decode(e.to_string())
    } else {
        ServiceError::Transport(e.to_string())
    }
}

/// Maps a non-success status onto a service error.
pub(crate) fn status_error(status: StatusCode, body: &[u8]) -> ServiceError {
    let message = String::from_utf8_lossy(body).trim().to_string();
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or_default().to_string()
    } else {
        message
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Auth(message),
        _ => ServiceError::Status {
            code: status.as_u16(),
            message,
        },
    }
}

/// Extracts the `rel="next"` target from a `Link` header.
pub(crate) fn next_link(headers: &HeaderMap) -> Option<Url> {
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|part| {
        let mut fields = part.split(';');
        let target = fields.next()?.trim();
        let is_next = fields.any(|f| {
            let f = f.trim();
            f == "rel=\"next\"" || f == "rel=next"
        });
        if !is_next {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

/// Parses an `X-Next-Page` style header; empty or absent means last page.
pub(crate) fn next_page(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
