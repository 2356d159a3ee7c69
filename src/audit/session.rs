//! Authenticated workflow driver.
//!
//! Provisions a throwaway identity, registers it twice, logs in, and tries a
//! forbidden upload, all on one cookie-preserving client. Every response is
//! recorded in a [`WorkflowOutcome`] that the auth-workflow checks read.

use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Target;
use crate::probe::network::build_client;
use crate::probe::HttpResponse;
use crate::types::AuditError;

const REGISTER_PATH: &str = "/api/register";
const LOGIN_PATH: &str = "/api/login";
const UPLOAD_PATH: &str = "/api/upload";

/// File the upload step tries to plant
pub const MALICIOUS_FILE_NAME: &str = "evil.php";
const MALICIOUS_FILE_BODY: &[u8] = b"<?php echo \"hacked\"; ?>";
const MALICIOUS_FILE_MIME: &str = "application/x-php";

/// Single observed response, or the transport fault that replaced it
pub type Observation = Result<HttpResponse, AuditError>;

/// Throwaway credentials, unique per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub password: String,
}

impl Identity {
    pub fn generate() -> Self {
        let user = uuid::Uuid::new_v4().simple().to_string();
        let secret = uuid::Uuid::new_v4().simple().to_string();
        Self {
            username: format!("check_{}", &user[..12]),
            password: format!("Hs!{}", secret),
        }
    }

    fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "username": self.username,
            "password": self.password,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Fresh,
    Registered,
    DuplicateChecked,
    Authenticated,
    /// Terminal: login did not succeed
    LoginFailed(String),
    /// Terminal: every step ran
    Complete,
}

impl WorkflowState {
    /// Advance after observing the response to the current state's request
    pub fn next(self, observed: &Observation) -> WorkflowState {
        match self {
            WorkflowState::Fresh => WorkflowState::Registered,
            WorkflowState::Registered => WorkflowState::DuplicateChecked,
            WorkflowState::DuplicateChecked => match observed {
                Ok(response) if response.is_success() => WorkflowState::Authenticated,
                Ok(response) => {
                    WorkflowState::LoginFailed(format!("login returned HTTP {}", response.status))
                }
                Err(e) => WorkflowState::LoginFailed(e.to_string()),
            },
            WorkflowState::Authenticated => WorkflowState::Complete,
            terminal => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::LoginFailed(_) | WorkflowState::Complete)
    }
}

/// Attributes parsed from one `Set-Cookie` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

impl SetCookie {
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = SetCookie {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            http_only: false,
            secure: false,
            same_site: None,
        };

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (attr.trim(), None),
            };
            match key.to_ascii_lowercase().as_str() {
                "httponly" => cookie.http_only = true,
                "secure" => cookie.secure = true,
                "samesite" => cookie.same_site = val.map(|v| v.to_string()),
                _ => {}
            }
        }

        Some(cookie)
    }

    pub fn is_same_site_strict(&self) -> bool {
        self.same_site
            .as_deref()
            .map(|v| v.eq_ignore_ascii_case("strict"))
            .unwrap_or(false)
    }
}

/// Credential issued by a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token from the response body (or the cookie value when absent)
    pub token: Option<String>,
    pub cookie: Option<SetCookie>,
}

impl Credential {
    pub fn from_login(response: &HttpResponse, cookie_name: &str) -> Self {
        let cookie = response
            .header_all("set-cookie")
            .filter_map(SetCookie::parse)
            .find(|c| c.name == cookie_name);

        let body_token = serde_json::from_str::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|json| {
                json.get("access_token")
                    .or_else(|| json.get("token"))
                    .and_then(|t| t.as_str())
                    .map(|t| t.to_string())
            });

        let token = body_token.or_else(|| cookie.as_ref().map(|c| c.value.clone()));

        Self { token, cookie }
    }
}

/// Everything the workflow observed. Immutable once the driver returns it.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub identity: Identity,
    pub state: WorkflowState,
    pub registration: Option<Observation>,
    pub duplicate_registration: Option<Observation>,
    pub login: Option<Observation>,
    pub credential: Option<Credential>,
    pub upload: Option<Observation>,
}

impl WorkflowOutcome {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            state: WorkflowState::Fresh,
            registration: None,
            duplicate_registration: None,
            login: None,
            credential: None,
            upload: None,
        }
    }

    /// Outcome for a workflow that could not start at all
    pub fn aborted(reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(Identity::generate());
        outcome.state = WorkflowState::LoginFailed(reason.into());
        outcome
    }

    /// Credential, or a prerequisite fault when login never succeeded
    pub fn authenticated(&self) -> Result<&Credential, AuditError> {
        match (&self.state, &self.credential) {
            (WorkflowState::LoginFailed(reason), _) => Err(AuditError::Prerequisite(format!(
                "login did not succeed: {}",
                reason
            ))),
            (_, Some(credential)) => Ok(credential),
            (state, None) => Err(AuditError::Prerequisite(format!(
                "workflow stopped at {:?}",
                state
            ))),
        }
    }
}

/// Run-scoped HTTP context: cookie jar, identity and latest credential
pub struct AuditSession {
    client: reqwest::Client,
    identity: Identity,
    credential: Option<Credential>,
}

impl AuditSession {
    pub fn new(timeout: Duration) -> Result<Self, AuditError> {
        Ok(Self {
            client: build_client(timeout, true)?,
            identity: Identity::generate(),
            credential: None,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> Observation {
        debug!("POST {}", url);
        let response = self.authorize(self.client.post(url).json(body)).send().await?;
        HttpResponse::read(response).await
    }

    pub async fn post_multipart(&self, url: &str, form: Form) -> Observation {
        debug!("POST {} (multipart)", url);
        let response = self.authorize(self.client.post(url).multipart(form)).send().await?;
        HttpResponse::read(response).await
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credential.as_ref().and_then(|c| c.token.as_deref()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Drives one [`AuditSession`] through the workflow, strictly in order
pub struct SessionDriver {
    session: AuditSession,
    target: Arc<Target>,
}

impl SessionDriver {
    pub fn new(target: Arc<Target>, timeout: Duration) -> Result<Self, AuditError> {
        Ok(Self {
            session: AuditSession::new(timeout)?,
            target,
        })
    }

    pub async fn run(mut self) -> WorkflowOutcome {
        let mut outcome = WorkflowOutcome::new(self.session.identity().clone());
        let register_url = self.target.url(REGISTER_PATH);
        let credentials = self.session.identity().as_json();

        info!("Starting authenticated workflow as {}", outcome.identity.username);

        let registration = self.session.post_json(&register_url, &credentials).await;
        log_step("register", &registration);
        outcome.state = outcome.state.next(&registration);
        outcome.registration = Some(registration);

        let duplicate = self.session.post_json(&register_url, &credentials).await;
        log_step("duplicate register", &duplicate);
        outcome.state = outcome.state.next(&duplicate);
        outcome.duplicate_registration = Some(duplicate);

        let login = self
            .session
            .post_json(&self.target.url(LOGIN_PATH), &credentials)
            .await;
        log_step("login", &login);
        outcome.state = outcome.state.next(&login);

        if let (WorkflowState::Authenticated, Ok(response)) = (&outcome.state, &login) {
            let credential = Credential::from_login(response, &self.target.session_cookie);
            self.session.credential = Some(credential.clone());
            outcome.credential = Some(credential);
        }
        outcome.login = Some(login);

        if outcome.state.is_terminal() {
            warn!("Login failed, authenticated checks will be indeterminate");
            return outcome;
        }

        let upload = match malicious_upload_form() {
            Ok(form) => {
                self.session
                    .post_multipart(&self.target.url(UPLOAD_PATH), form)
                    .await
            }
            Err(e) => Err(e),
        };
        log_step("upload", &upload);
        outcome.state = outcome.state.next(&upload);
        outcome.upload = Some(upload);

        outcome
    }
}

fn malicious_upload_form() -> Result<Form, AuditError> {
    let part = Part::bytes(MALICIOUS_FILE_BODY)
        .file_name(MALICIOUS_FILE_NAME)
        .mime_str(MALICIOUS_FILE_MIME)
        .map_err(|e| AuditError::Internal(format!("Invalid upload part: {}", e)))?;
    Ok(Form::new().part("file", part))
}

fn log_step(step: &str, observed: &Observation) {
    match observed {
        Ok(response) => debug!("Workflow {}: HTTP {}", step, response.status),
        Err(e) => warn!("Workflow {} failed: {}", step, e),
    }
}
