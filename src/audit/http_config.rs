use async_trait::async_trait;

use crate::types::{AuditError, Category, CheckInfo, Outcome};

use super::catalogue::{Catalogue, Check, CheckContext};

/// Headers that leak server-side file paths on error pages
const PATH_DISCLOSURE_HEADERS: &[&str] = &["x-debug-file-path", "x-debug-file", "x-source-file"];

const NOT_FOUND_PATH: &str = "/nonexistent_page_123";

pub fn register(catalogue: &mut Catalogue) {
    catalogue
        .register(ServerBannerCheck::new())
        .register(HeaderPresentCheck::new("M8", "X-Frame-Options Present", "x-frame-options"))
        .register(HeaderPresentCheck::new(
            "M8",
            "X-Content-Type-Options Present",
            "x-content-type-options",
        ))
        .register(HeaderPresentCheck::new(
            "M8",
            "Content-Security-Policy Present",
            "content-security-policy",
        ))
        .register(PathBlockedCheck::new("M3", "Directory Listing Disabled (403/404)", "/uploads/"))
        .register(PathBlockedCheck::new("M4", ".env File Protected", "/.env"))
        .register(PathBlockedCheck::new("M4", "Backup File Protected", "/backup.db"))
        .register(PathDisclosureCheck::new());
}

/// Reverse-proxy banner must not expose an exact version
pub struct ServerBannerCheck {
    info: CheckInfo,
}

impl ServerBannerCheck {
    pub fn new() -> Self {
        Self {
            info: CheckInfo::new("M10", "Server Banner Hides Version", Category::HttpConfig),
        }
    }
}

/// `nginx/1.25.3`, `Apache/2.4.57 (Debian)` disclose; `nginx`, `cloudflare` do not
pub fn discloses_version(server: &str) -> bool {
    server
        .split('/')
        .skip(1)
        .any(|rest| rest.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
}

#[async_trait]
impl Check for ServerBannerCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let response = ctx.probe.http_get(&ctx.target.url("/"), &[]).await?;

        Ok(match response.header("server") {
            None => Outcome::pass().with_detail("no Server header"),
            Some(server) => Outcome::from_safe(!discloses_version(server)).with_detail(server),
        })
    }
}

/// Security response header present on the root page
pub struct HeaderPresentCheck {
    info: CheckInfo,
    header: &'static str,
}

impl HeaderPresentCheck {
    pub fn new(code: &str, name: &str, header: &'static str) -> Self {
        Self {
            info: CheckInfo::new(code, name, Category::HttpConfig),
            header,
        }
    }
}

#[async_trait]
impl Check for HeaderPresentCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let response = ctx.probe.http_get(&ctx.target.url("/"), &[]).await?;

        Ok(match response.header(self.header) {
            Some(value) => Outcome::pass().with_detail(value),
            None => Outcome::fail(format!("{} missing", self.header)),
        })
    }
}

/// Path that must answer 403 or 404 instead of content
pub struct PathBlockedCheck {
    info: CheckInfo,
    path: &'static str,
}

impl PathBlockedCheck {
    pub fn new(code: &str, name: &str, path: &'static str) -> Self {
        Self {
            info: CheckInfo::new(code, name, Category::HttpConfig),
            path,
        }
    }
}

#[async_trait]
impl Check for PathBlockedCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let response = ctx.probe.http_get(&ctx.target.url(self.path), &[]).await?;

        if response.is_blocked() {
            Ok(Outcome::pass().with_detail(format!("HTTP {}", response.status)))
        } else {
            Ok(Outcome::fail(format!("{} answered HTTP {}", self.path, response.status)))
        }
    }
}

/// 404 responses must not carry debug headers naming server-side files
pub struct PathDisclosureCheck {
    info: CheckInfo,
}

impl PathDisclosureCheck {
    pub fn new() -> Self {
        Self {
            info: CheckInfo::new("M11", "No Path Disclosure in Headers", Category::HttpConfig),
        }
    }
}

#[async_trait]
impl Check for PathDisclosureCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let response = ctx.probe.http_get(&ctx.target.url(NOT_FOUND_PATH), &[]).await?;

        let leaked = PATH_DISCLOSURE_HEADERS
            .iter()
            .find_map(|name| response.header(name).map(|value| format!("{}: {}", name, value)));

        Ok(match leaked {
            Some(header) => Outcome::fail(header),
            None => Outcome::pass(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;
    use crate::probe::fake::ScriptedProbe;
    use crate::probe::HttpResponse;
    use crate::types::Verdict;
    use std::sync::Arc;

    const ROOT: &str = "http://localhost/";

    fn ctx(probe: ScriptedProbe) -> CheckContext {
        CheckContext::new(Arc::new(probe), Arc::new(Target::new("http://localhost").unwrap()))
    }

    #[test]
    fn test_discloses_version() {
        assert!(discloses_version("nginx/1.25.3"));
        assert!(discloses_version("Apache/2.4.57 (Debian)"));
        assert!(!discloses_version("nginx"));
        assert!(!discloses_version("cloudflare"));
        assert!(!discloses_version("awselb/"));
    }

    #[tokio::test]
    async fn test_banner_with_version_fails() {
        let probe = ScriptedProbe::new().get(ROOT, HttpResponse::new(200).with_header("Server", "nginx/1.25.3"));
        let outcome = ServerBannerCheck::new().evaluate(&ctx(probe)).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.detail.as_deref(), Some("nginx/1.25.3"));
    }

    #[tokio::test]
    async fn test_bare_banner_passes() {
        let probe = ScriptedProbe::new().get(ROOT, HttpResponse::new(200).with_header("Server", "nginx"));
        let outcome = ServerBannerCheck::new().evaluate(&ctx(probe)).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_header_presence() {
        let probe = ScriptedProbe::new().get(
            ROOT,
            HttpResponse::new(200).with_header("X-Frame-Options", "DENY"),
        );
        let ctx = ctx(probe);

        let frame = HeaderPresentCheck::new("M8", "X-Frame-Options Present", "x-frame-options");
        assert_eq!(frame.evaluate(&ctx).await.unwrap().verdict, Verdict::Pass);

        let csp = HeaderPresentCheck::new("M8", "CSP Present", "content-security-policy");
        let outcome = csp.evaluate(&ctx).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.detail.as_deref(), Some("content-security-policy missing"));
    }

    #[tokio::test]
    async fn test_path_blocked() {
        let probe = ScriptedProbe::new()
            .get("http://localhost/uploads/", HttpResponse::new(200).with_body("<pre>evil.php</pre>"))
            .get("http://localhost/.env", HttpResponse::new(404));
        let ctx = ctx(probe);

        let listing = PathBlockedCheck::new("M3", "Directory Listing Disabled", "/uploads/");
        assert_eq!(listing.evaluate(&ctx).await.unwrap().verdict, Verdict::Fail);

        let env = PathBlockedCheck::new("M4", ".env File Protected", "/.env");
        assert_eq!(env.evaluate(&ctx).await.unwrap().verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_error() {
        let err = PathBlockedCheck::new("M4", "Backup File Protected", "/backup.db")
            .evaluate(&ctx(ScriptedProbe::new()))
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_path_disclosure_header() {
        let probe = ScriptedProbe::new().get(
            "http://localhost/nonexistent_page_123",
            HttpResponse::new(404).with_header("X-Debug-File-Path", "/app/main.py"),
        );
        let outcome = PathDisclosureCheck::new().evaluate(&ctx(probe)).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.detail.as_deref(), Some("x-debug-file-path: /app/main.py"));
    }
}
