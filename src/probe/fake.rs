//! Scripted probe for check tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{HttpResponse, PortStatus, Probe};
use crate::types::AuditError;

/// Answers from fixed tables; unknown URLs look like a refused connection
/// and unknown ports look closed.
#[derive(Default)]
pub struct ScriptedProbe {
    ports: HashMap<u16, PortStatus>,
    responses: HashMap<String, Result<HttpResponse, AuditError>>,
    /// Request headers seen per URL
    pub seen_headers: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16, status: PortStatus) -> Self {
        self.ports.insert(port, status);
        self
    }

    pub fn get(mut self, url: &str, response: HttpResponse) -> Self {
        self.responses.insert(url.to_string(), Ok(response));
        self
    }

    pub fn get_err(mut self, url: &str, err: AuditError) -> Self {
        self.responses.insert(url.to_string(), Err(err));
        self
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe_port(&self, _host: &str, port: u16) -> PortStatus {
        self.ports.get(&port).cloned().unwrap_or(PortStatus::Closed)
    }

    async fn http_get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, AuditError> {
        if let Ok(mut seen) = self.seen_headers.lock() {
            seen.push((
                url.to_string(),
                headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ));
        }
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(AuditError::Connectivity(format!("connection refused: {}", url))))
    }
}
