//! Low-level network probes shared by every check.
//!
//! Checks only see the [`Probe`] trait, so tests can swap the network for a
//! scripted fake.

#[cfg(test)]
pub mod fake;
pub mod network;

use async_trait::async_trait;

use crate::types::AuditError;

pub use network::NetworkProbe;

/// Captured bodies are cut at this many bytes
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Outcome of a TCP reachability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStatus {
    /// Connection accepted
    Open,
    /// Connection refused or timed out
    Closed,
    /// Some other network error; treated as closed with a recorded caveat
    Unreachable(String),
}

/// Status, headers and body of one HTTP exchange
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[cfg(test)]
impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}

impl HttpResponse {
    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated header (e.g. `Set-Cookie`)
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// 403 or 404: the resource is not served
    pub fn is_blocked(&self) -> bool {
        matches!(self.status, 403 | 404)
    }

    /// Drain a reqwest response into an owned value, reading at most
    /// `MAX_BODY_BYTES` of the body
    pub async fn read(mut response: reqwest::Response) -> Result<Self, AuditError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();

        let mut bytes: Vec<u8> = Vec::new();
        while bytes.len() < MAX_BODY_BYTES {
            let Some(chunk) = response.chunk().await? else {
                break;
            };
            let room = MAX_BODY_BYTES - bytes.len();
            bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

/// Network layer the check catalogue runs against
#[async_trait]
pub trait Probe: Send + Sync {
    /// TCP reachability with a bounded timeout. Never fails.
    async fn probe_port(&self, host: &str, port: u16) -> PortStatus;

    /// GET with optional extra request headers. Transport failures surface as
    /// [`AuditError::Connectivity`].
    async fn http_get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, AuditError>;
}
