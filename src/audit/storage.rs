//! Storage and secrets checks.
//!
//! These are advisory. Proving a bucket policy or a signing key strong needs
//! access to the host, so from outside they can only catch the obvious
//! failures and otherwise report `indeterminate`, never a bare `pass`.

use async_trait::async_trait;
use base64::Engine;
use url::Url;

use crate::config::Target;
use crate::types::{AuditError, Category, CheckInfo, Outcome};

use super::catalogue::{Catalogue, Check, CheckContext};

pub fn register(catalogue: &mut Catalogue, target: &Target) {
    catalogue
        .register(StorageExposureCheck::new(target.storage_health_url.clone()))
        .register(SecretsServedCheck::new("/.env"))
        .register(TokenSigningCheck::new());
}

/// Object-storage API should not answer from the public side
pub struct StorageExposureCheck {
    info: CheckInfo,
    health_url: Url,
}

impl StorageExposureCheck {
    pub fn new(health_url: Url) -> Self {
        Self {
            info: CheckInfo::new("M6", "Object Storage Not Publicly Reachable", Category::StorageSecrets),
            health_url,
        }
    }
}

#[async_trait]
impl Check for StorageExposureCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        match ctx.probe.http_get(self.health_url.as_str(), &[]).await {
            Err(e) if e.is_connectivity() => Ok(Outcome::pass().with_detail("not reachable")),
            Err(e) => Ok(Outcome::indeterminate(e.to_string())),
            Ok(response) => Ok(Outcome::indeterminate(format!(
                "storage API reachable (HTTP {}); bucket policy needs infrastructure access",
                response.status
            ))),
        }
    }
}

/// Secret files must not be downloadable
pub struct SecretsServedCheck {
    info: CheckInfo,
    path: &'static str,
}

impl SecretsServedCheck {
    pub fn new(path: &'static str) -> Self {
        Self {
            info: CheckInfo::new("M1", "Secrets Not Served Over HTTP", Category::StorageSecrets),
            path,
        }
    }
}

#[async_trait]
impl Check for SecretsServedCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let response = ctx.probe.http_get(&ctx.target.url(self.path), &[]).await?;

        if response.is_success() && !response.body.trim().is_empty() {
            Ok(Outcome::fail(format!("{} served with HTTP {}", self.path, response.status)))
        } else {
            Ok(Outcome::indeterminate(format!(
                "{} not served (HTTP {}); secret storage needs host access",
                self.path, response.status
            )))
        }
    }
}

/// Session tokens must be signed; `alg: none` is an outright failure
pub struct TokenSigningCheck {
    info: CheckInfo,
}

impl TokenSigningCheck {
    pub fn new() -> Self {
        Self {
            info: CheckInfo::new("M15", "Session Token Signed", Category::StorageSecrets),
        }
    }
}

/// `alg` from a JWT header, or `None` for opaque tokens
pub fn jwt_algorithm(token: &str) -> Option<String> {
    let header = token.split('.').next()?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(header.trim_end_matches('='))
        .ok()?;
    let json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    json.get("alg").and_then(|a| a.as_str()).map(|a| a.to_string())
}

#[async_trait]
impl Check for TokenSigningCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    fn requires_session(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let credential = ctx.workflow()?.authenticated()?;
        let Some(token) = credential.token.as_deref() else {
            return Ok(Outcome::indeterminate("no token issued"));
        };

        Ok(match jwt_algorithm(token) {
            Some(alg) if alg.eq_ignore_ascii_case("none") => Outcome::fail("token accepted with alg: none"),
            Some(alg) => Outcome::indeterminate(format!(
                "signed with {}; key strength not verifiable externally",
                alg
            )),
            None => Outcome::indeterminate("opaque token"),
        })
    }
}
