use async_trait::async_trait;

use crate::types::{AuditError, Category, CheckInfo, Outcome};

use super::catalogue::{Catalogue, Check, CheckContext};
use super::session::{SetCookie, MALICIOUS_FILE_NAME};

/// Body fragments that only show up when a framework dumps its internals
const DIAGNOSTIC_MARKERS: &[&str] = &[
    "traceback (most recent call last)",
    "stack trace",
    "stacktrace",
    "integrityerror",
    "sqlalchemy.exc",
    "psycopg2.errors",
    "unhandled exception",
    "at java.",
    "file \"/",
];

pub fn register(catalogue: &mut Catalogue) {
    catalogue
        .register(DuplicateRegistrationCheck::new())
        .register(CookieAttributeCheck::new(CookieAttribute::HttpOnly))
        .register(CookieAttributeCheck::new(CookieAttribute::SameSiteStrict))
        .register(CookieAttributeCheck::new(CookieAttribute::Secure))
        .register(UploadRestrictionCheck::new());
}

/// Diagnostic marker found in a response body, if any
pub fn find_diagnostic_leak(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    DIAGNOSTIC_MARKERS.iter().copied().find(|m| lower.contains(m))
}

/// Registering the same identity twice must fail cleanly
pub struct DuplicateRegistrationCheck {
    info: CheckInfo,
}

impl DuplicateRegistrationCheck {
    pub fn new() -> Self {
        Self {
            info: CheckInfo::new(
                "M2",
                "Debug Mode Disabled (No Stack Trace on Error)",
                Category::AuthWorkflow,
            ),
        }
    }
}

#[async_trait]
impl Check for DuplicateRegistrationCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    fn requires_session(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let workflow = ctx.workflow()?;
        let response = match &workflow.duplicate_registration {
            Some(Ok(response)) => response,
            Some(Err(e)) => return Err(e.clone()),
            None => {
                return Err(AuditError::Prerequisite(
                    "duplicate registration was not attempted".to_string(),
                ))
            }
        };

        Ok(match find_diagnostic_leak(&response.body) {
            Some(marker) => Outcome::fail(format!("HTTP {} leaks \"{}\"", response.status, marker)),
            None => Outcome::pass().with_detail(format!("HTTP {}", response.status)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieAttribute {
    HttpOnly,
    SameSiteStrict,
    Secure,
}

impl CookieAttribute {
    fn label(&self) -> &'static str {
        match self {
            CookieAttribute::HttpOnly => "Cookie HttpOnly Flag",
            CookieAttribute::SameSiteStrict => "Cookie SameSite=Strict",
            CookieAttribute::Secure => "Cookie Secure Flag",
        }
    }

    fn is_set(&self, cookie: &SetCookie) -> bool {
        match self {
            CookieAttribute::HttpOnly => cookie.http_only,
            CookieAttribute::SameSiteStrict => cookie.is_same_site_strict(),
            CookieAttribute::Secure => cookie.secure,
        }
    }
}

/// Attribute of the issued session cookie, read from the raw `Set-Cookie` header
pub struct CookieAttributeCheck {
    info: CheckInfo,
    attribute: CookieAttribute,
}

impl CookieAttributeCheck {
    pub fn new(attribute: CookieAttribute) -> Self {
        Self {
            info: CheckInfo::new("M9", attribute.label(), Category::AuthWorkflow),
            attribute,
        }
    }
}

#[async_trait]
impl Check for CookieAttributeCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    fn requires_session(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let credential = ctx.workflow()?.authenticated()?;

        let Some(cookie) = &credential.cookie else {
            return Ok(Outcome::fail(format!(
                "no {} cookie issued on login",
                ctx.target.session_cookie
            )));
        };

        if self.attribute == CookieAttribute::Secure && !ctx.target.is_https() {
            return Ok(Outcome::indeterminate("target is served over plain HTTP"));
        }

        Ok(Outcome::from_safe(self.attribute.is_set(cookie)).with_detail(describe(cookie)))
    }
}

fn describe(cookie: &SetCookie) -> String {
    format!(
        "HttpOnly={} Secure={} SameSite={}",
        cookie.http_only,
        cookie.secure,
        cookie.same_site.as_deref().unwrap_or("unset")
    )
}

/// A server-executable upload must be refused with a 4xx
pub struct UploadRestrictionCheck {
    info: CheckInfo,
}

impl UploadRestrictionCheck {
    pub fn new() -> Self {
        Self {
            info: CheckInfo::new(
                "M13",
                format!("Malicious Upload Blocked ({})", MALICIOUS_FILE_NAME),
                Category::AuthWorkflow,
            ),
        }
    }
}

#[async_trait]
impl Check for UploadRestrictionCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    fn requires_session(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let workflow = ctx.workflow()?;
        workflow.authenticated()?;

        let response = match &workflow.upload {
            Some(Ok(response)) => response,
            Some(Err(e)) => return Err(e.clone()),
            None => return Err(AuditError::Prerequisite("upload was not attempted".to_string())),
        };

        Ok(match response.status {
            // Rejected credential, not a rejected file
            401 => Outcome::indeterminate("upload endpoint did not accept the session credential"),
            status if response.is_client_error() => Outcome::pass().with_detail(format!("HTTP {}", status)),
            status if response.is_success() => {
                Outcome::fail(format!("{} accepted with HTTP {}", MALICIOUS_FILE_NAME, status))
            }
            status => Outcome::fail(format!("unexpected HTTP {}", status)),
        })
    }
}
