use async_trait::async_trait;

use crate::config::Target;
use crate::types::{AuditError, Category, CheckInfo, Outcome};

use super::catalogue::{Catalogue, Check, CheckContext};

pub fn register(catalogue: &mut Catalogue, target: &Target) {
    catalogue
        .register(EndpointRemovedCheck::new("M14", "/debug/info Endpoint Removed", "/debug/info"))
        .register(CorsCheck::new("/api/users/me", &target.probe_origin));
}

/// Debug or introspection endpoint that must be gone (404)
pub struct EndpointRemovedCheck {
    info: CheckInfo,
    path: &'static str,
}

impl EndpointRemovedCheck {
    pub fn new(code: &str, name: &str, path: &'static str) -> Self {
        Self {
            info: CheckInfo::new(code, name, Category::AppLogic),
            path,
        }
    }
}

#[async_trait]
impl Check for EndpointRemovedCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let response = ctx.probe.http_get(&ctx.target.url(self.path), &[]).await?;

        if response.status == 404 {
            Ok(Outcome::pass())
        } else {
            Ok(Outcome::fail(format!("{} answered HTTP {}", self.path, response.status)))
        }
    }
}

/// Untrusted origins must get neither `*` nor their own origin reflected
pub struct CorsCheck {
    info: CheckInfo,
    path: &'static str,
    origin: String,
}

impl CorsCheck {
    pub fn new(path: &'static str, origin: &str) -> Self {
        Self {
            info: CheckInfo::new("M7", "CORS Restricted (No Wildcard)", Category::AppLogic),
            path,
            origin: origin.to_string(),
        }
    }
}

#[async_trait]
impl Check for CorsCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let response = ctx
            .probe
            .http_get(&ctx.target.url(self.path), &[("Origin", self.origin.as_str())])
            .await?;

        Ok(match response.header("access-control-allow-origin").map(str::trim) {
            Some("*") => Outcome::fail("Access-Control-Allow-Origin: *"),
            Some(allowed) if allowed.eq_ignore_ascii_case(&self.origin) => {
                Outcome::fail(format!("origin reflected: {}", allowed))
            }
            Some(allowed) => Outcome::pass().with_detail(format!("allowed: {}", allowed)),
            None => Outcome::pass(),
        })
    }
}
