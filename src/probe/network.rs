use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{HttpResponse, PortStatus, Probe};
use crate::types::AuditError;

/// Probe backed by real sockets and a reqwest client
pub struct NetworkProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(timeout: Duration) -> Result<Self, AuditError> {
        let client = build_client(timeout, false)?;
        Ok(Self { client, timeout })
    }
}

/// Client used for every audit call: explicit timeout, redirects observed rather than followed
pub fn build_client(timeout: Duration, cookie_store: bool) -> Result<reqwest::Client, AuditError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .cookie_store(cookie_store)
        .user_agent(concat!("hardenscan/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AuditError::Internal(format!("Failed to build HTTP client: {}", e)))
}

#[async_trait]
impl Probe for NetworkProbe {
    async fn probe_port(&self, host: &str, port: u16) -> PortStatus {
        debug!("Probing TCP {}:{}", host, port);

        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => PortStatus::Open,
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => PortStatus::Closed,
            Ok(Err(e)) => {
                warn!("Port probe {}:{} failed: {}", host, port, e);
                PortStatus::Unreachable(e.to_string())
            }
            Err(_) => PortStatus::Closed,
        }
    }

    async fn http_get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, AuditError> {
        debug!("GET {}", url);

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| {
            warn!("GET {} failed: {}", url, e);
            AuditError::from(e)
        })?;

        HttpResponse::read(response).await
    }
}
