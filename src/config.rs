use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;
use url::{Host, Url};

use crate::types::Category;

const DEFAULT_TARGET: &str = "http://localhost";
const DEFAULT_TIMEOUT_SECS: u64 = 3;
const MAX_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONCURRENCY: usize = 8;

/// Audit configuration
///
/// Values come from the environment (optionally a `.env` file) and are then
/// overridden by command-line flags. The config is threaded into the engine at
/// construction; nothing reads process-wide state after that.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: Target,
    /// Per-call network timeout
    pub timeout: Duration,
    /// Upper bound on concurrently running independent checks
    pub concurrency: usize,
    /// Restrict the run to these categories (empty = all)
    pub categories: Vec<Category>,
    pub color: bool,
    /// Treat `indeterminate` as failure for the exit code
    pub strict: bool,
}

/// Network surface of the audited deployment
#[derive(Debug, Clone)]
pub struct Target {
    pub base_url: Url,
    pub host: String,
    pub admin_port: u16,
    pub db_port: u16,
    /// Object-storage health endpoint probed from outside
    pub storage_health_url: Url,
    /// Name of the cookie carrying the session credential
    pub session_cookie: String,
    /// Origin sent on cross-origin probes
    pub probe_origin: String,
}

impl Target {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = parse_http_url(base_url, "target URL")?;
        // Sockets want the bare address; URLs keep the bracketed IPv6 form
        let host = match base_url.host().context("Target URL has no host")? {
            Host::Domain(name) => name.to_string(),
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => addr.to_string(),
        };
        let authority = base_url.host_str().unwrap_or(&host);
        let storage_health_url = Url::parse(&format!("http://{}:9000/minio/health/live", authority))
            .context("Invalid storage health URL")?;

        Ok(Self {
            base_url,
            host,
            admin_port: 8080,
            db_port: 5432,
            storage_health_url,
            session_cookie: "session_token".to_string(),
            probe_origin: "http://evil.com".to_string(),
        })
    }

    /// Resolve a path against the target base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn is_https(&self) -> bool {
        self.base_url.scheme() == "https"
    }

    pub fn set_storage_url(&mut self, raw: &str) -> Result<()> {
        self.storage_health_url = parse_http_url(raw, "storage URL")?;
        Ok(())
    }
}

impl Config {
    /// Load from the environment; `target` (from the command line) wins over `AUDIT_TARGET`
    pub fn from_env(target: Option<&str>) -> Result<Self> {
        let target_url = match target {
            Some(url) => url.to_string(),
            None => env::var("AUDIT_TARGET").unwrap_or_else(|_| DEFAULT_TARGET.to_string()),
        };
        let mut config = Self::for_target(&target_url)?;

        if let Ok(port) = env::var("AUDIT_ADMIN_PORT") {
            config.target.admin_port = port.parse().context("AUDIT_ADMIN_PORT must be a port number")?;
        }
        if let Ok(port) = env::var("AUDIT_DB_PORT") {
            config.target.db_port = port.parse().context("AUDIT_DB_PORT must be a port number")?;
        }
        if let Ok(url) = env::var("AUDIT_STORAGE_URL") {
            config.target.set_storage_url(&url).context("AUDIT_STORAGE_URL")?;
        }
        if let Ok(name) = env::var("AUDIT_SESSION_COOKIE") {
            config.target.session_cookie = name;
        }
        if let Ok(secs) = env::var("AUDIT_TIMEOUT_SECS") {
            config.set_timeout_secs(secs.parse().context("AUDIT_TIMEOUT_SECS must be an integer")?)?;
        }
        if let Ok(n) = env::var("AUDIT_CONCURRENCY") {
            config.concurrency = n.parse().context("AUDIT_CONCURRENCY must be an integer")?;
        }

        // https://no-color.org
        config.color = env::var_os("NO_COLOR").is_none();
        Ok(config)
    }

    /// Config pointing at `base_url` with every other field at its default
    pub fn for_target(base_url: &str) -> Result<Self> {
        Ok(Self {
            target: Target::new(base_url)?,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            categories: Vec::new(),
            color: false,
            strict: false,
        })
    }

    pub fn set_timeout_secs(&mut self, secs: u64) -> Result<()> {
        self.timeout = timeout_from_secs(secs)?;
        Ok(())
    }

    pub fn includes(&self, category: Category) -> bool {
        self.categories.is_empty() || self.categories.contains(&category)
    }
}

/// Parse `raw` as an absolute http(s) URL; `what` names it in errors
pub fn parse_http_url(raw: &str, what: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("Invalid {}: {}", what, raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("The {} must be http or https, got {}", what, url.scheme());
    }
    Ok(url)
}

fn timeout_from_secs(secs: u64) -> Result<Duration> {
    if secs == 0 || secs > MAX_TIMEOUT_SECS {
        bail!("Timeout must be between 1 and {} seconds", MAX_TIMEOUT_SECS);
    }
    Ok(Duration::from_secs(secs))
}
