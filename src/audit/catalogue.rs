use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Target;
use crate::probe::Probe;
use crate::types::{AuditError, CheckInfo, Outcome};

use super::session::WorkflowOutcome;
use super::{app_logic, auth_workflow, http_config, infrastructure, storage};

/// Everything a check may look at while evaluating
#[derive(Clone)]
pub struct CheckContext {
    pub probe: Arc<dyn Probe>,
    pub target: Arc<Target>,
    /// Present only for checks that declared `requires_session`
    pub workflow: Option<Arc<WorkflowOutcome>>,
}

impl CheckContext {
    pub fn new(probe: Arc<dyn Probe>, target: Arc<Target>) -> Self {
        Self {
            probe,
            target,
            workflow: None,
        }
    }

    pub fn with_workflow(mut self, workflow: Arc<WorkflowOutcome>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// Workflow outcome, or a prerequisite fault when it never ran
    pub fn workflow(&self) -> Result<&WorkflowOutcome, AuditError> {
        self.workflow
            .as_deref()
            .ok_or_else(|| AuditError::Prerequisite("authenticated workflow did not run".to_string()))
    }
}

/// A single named, independently reportable compliance test
#[async_trait]
pub trait Check: Send + Sync {
    fn info(&self) -> &CheckInfo;

    /// Whether evaluation reads the authenticated workflow outcome
    fn requires_session(&self) -> bool {
        false
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError>;
}

/// Ordered registry of checks
#[derive(Default, Clone)]
pub struct Catalogue {
    checks: Vec<Arc<dyn Check>>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check: impl Check + 'static) -> &mut Self {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn checks(&self) -> &[Arc<dyn Check>] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// The full catalogue, in report order
pub fn default_catalogue(target: &Target) -> Catalogue {
    let mut catalogue = Catalogue::new();
    infrastructure::register(&mut catalogue, target);
    http_config::register(&mut catalogue);
    app_logic::register(&mut catalogue, target);
    auth_workflow::register(&mut catalogue);
    storage::register(&mut catalogue, target);
    catalogue
}
