use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::probe::{NetworkProbe, Probe};
use crate::types::{AuditError, AuditReport, CheckInfo, CheckResult, Outcome};

use super::catalogue::{default_catalogue, Catalogue, Check, CheckContext};
use super::session::{SessionDriver, WorkflowOutcome};

type Evaluation = JoinHandle<Result<Outcome, AuditError>>;

pub struct AuditEngine {
    config: Config,
    catalogue: Catalogue,
    probe: Arc<dyn Probe>,
}

impl AuditEngine {
    /// Engine with the full catalogue over the real network
    pub fn new(config: Config) -> Result<Self, AuditError> {
        if config.concurrency == 0 {
            return Err(AuditError::InvalidConfig("concurrency must be at least 1".to_string()));
        }
        let probe = Arc::new(NetworkProbe::new(config.timeout)?);
        let catalogue = default_catalogue(&config.target);
        Ok(Self::with_parts(config, catalogue, probe))
    }

    pub fn with_parts(config: Config, catalogue: Catalogue, probe: Arc<dyn Probe>) -> Self {
        Self {
            config,
            catalogue,
            probe,
        }
    }

    /// Run every selected check once and collect one result per check
    pub async fn run(&self) -> AuditReport {
        let started_at = chrono::Utc::now();
        if self.catalogue.is_empty() {
            warn!("No checks registered");
        }
        let target = Arc::new(self.config.target.clone());
        let ctx = CheckContext::new(self.probe.clone(), target.clone());

        let selected: Vec<(usize, Arc<dyn Check>)> = self
            .catalogue
            .checks()
            .iter()
            .cloned()
            .enumerate()
            .filter(|(_, check)| self.config.includes(check.info().category))
            .collect();

        let (dependent, independent): (Vec<_>, Vec<_>) =
            selected.into_iter().partition(|(_, check)| check.requires_session());

        info!(
            "Starting audit of {} ({} of {} checks selected: {} independent, {} session)",
            target.base_url,
            independent.len() + dependent.len(),
            self.catalogue.len(),
            independent.len(),
            dependent.len()
        );

        // The workflow runs on its own task alongside the independent checks
        let workflow = if dependent.is_empty() {
            None
        } else {
            Some(self.spawn_workflow())
        };

        let limit = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut pending: Vec<(usize, CheckInfo, Evaluation)> = independent
            .into_iter()
            .map(|(idx, check)| (idx, check.info().clone(), spawn_check(check, ctx.clone(), limit.clone())))
            .collect();

        if let Some(handle) = workflow {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Authenticated workflow aborted: {}", e);
                    WorkflowOutcome::aborted(format!("workflow aborted: {}", panic_message(e)))
                }
            };
            let session_ctx = ctx.clone().with_workflow(Arc::new(outcome));
            pending.extend(dependent.into_iter().map(|(idx, check)| {
                (idx, check.info().clone(), spawn_check(check, session_ctx.clone(), limit.clone()))
            }));
        }

        let mut results: Vec<(usize, CheckResult)> = Vec::with_capacity(pending.len());
        for (idx, info, handle) in pending {
            results.push((idx, settle(info, handle.await)));
        }
        results.sort_by_key(|(idx, result)| (result.check.category, *idx));

        let report = AuditReport::new(
            target.base_url.as_str(),
            started_at,
            results.into_iter().map(|(_, result)| result).collect(),
        );

        info!(
            "Audit completed: {} checks, {} passed, {} failed, {} indeterminate",
            report.summary.total(),
            report.summary.passed,
            report.summary.failed,
            report.summary.indeterminate
        );

        report
    }

    fn spawn_workflow(&self) -> JoinHandle<WorkflowOutcome> {
        let target = Arc::new(self.config.target.clone());
        let timeout = self.config.timeout;

        tokio::spawn(async move {
            match SessionDriver::new(target, timeout) {
                Ok(driver) => driver.run().await,
                Err(e) => {
                    warn!("Could not start authenticated workflow: {}", e);
                    WorkflowOutcome::aborted(e.to_string())
                }
            }
        })
    }
}

fn spawn_check(check: Arc<dyn Check>, ctx: CheckContext, limit: Arc<Semaphore>) -> Evaluation {
    tokio::spawn(async move {
        // The semaphore is never closed, so a permit always arrives
        let _permit = limit.acquire_owned().await.ok();
        debug!("Evaluating {} ({})", check.info().code, check.info().name);
        check.evaluate(&ctx).await
    })
}

/// Turn whatever a check produced (value, fault or panic) into its result
fn settle(info: CheckInfo, joined: Result<Result<Outcome, AuditError>, JoinError>) -> CheckResult {
    let outcome = match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!("{} {}: {}", info.code, info.name, e);
            Outcome {
                verdict: e.verdict(),
                detail: Some(e.to_string()),
            }
        }
        Err(e) => {
            error!("{} {} aborted: {}", info.code, info.name, e);
            Outcome::fail(format!("check aborted: {}", panic_message(e)))
        }
    };

    CheckResult::new(info, outcome)
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::ScriptedProbe;
    use crate::probe::PortStatus;
    use crate::types::{Category, Verdict};
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Panicking(CheckInfo);

    #[async_trait]
    impl Check for Panicking {
        fn info(&self) -> &CheckInfo {
            &self.0
        }

        async fn evaluate(&self, _ctx: &CheckContext) -> Result<Outcome, AuditError> {
            panic!("probe exploded");
        }
    }

    struct Fixed(CheckInfo, Result<Outcome, AuditError>);

    #[async_trait]
    impl Check for Fixed {
        fn info(&self) -> &CheckInfo {
            &self.0
        }

        async fn evaluate(&self, _ctx: &CheckContext) -> Result<Outcome, AuditError> {
            self.1.clone()
        }
    }

    fn info(code: &str, category: Category) -> CheckInfo {
        CheckInfo::new(code, code, category)
    }

    #[tokio::test]
    async fn test_faults_are_isolated() {
        let mut catalogue = Catalogue::new();
        catalogue
            .register(Fixed(info("A", Category::HttpConfig), Ok(Outcome::pass())))
            .register(Panicking(info("B", Category::HttpConfig)))
            .register(Fixed(
                info("C", Category::HttpConfig),
                Err(AuditError::Connectivity("timed out".to_string())),
            ))
            .register(Fixed(
                info("D", Category::HttpConfig),
                Err(AuditError::Protocol("malformed body".to_string())),
            ))
            .register(Fixed(info("E", Category::HttpConfig), Ok(Outcome::fail("bad"))));

        let config = Config::for_target("http://localhost").unwrap();
        let engine = AuditEngine::with_parts(config, catalogue, Arc::new(ScriptedProbe::new()));
        let report = engine.run().await;

        let verdicts: Vec<(&str, Verdict)> = report
            .results
            .iter()
            .map(|r| (r.check.code.as_str(), r.verdict))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                ("A", Verdict::Pass),
                ("B", Verdict::Fail),
                ("C", Verdict::Indeterminate),
                ("D", Verdict::Fail),
                ("E", Verdict::Fail),
            ]
        );
        assert_eq!(report.results[1].detail.as_deref(), Some("check aborted: probe exploded"));
        assert_eq!(report.exit_code(false), 1);
    }

    #[tokio::test]
    async fn test_results_ordered_by_category_then_registration() {
        let mut catalogue = Catalogue::new();
        catalogue
            .register(Fixed(info("S1", Category::StorageSecrets), Ok(Outcome::pass())))
            .register(Fixed(info("I1", Category::Infrastructure), Ok(Outcome::pass())))
            .register(Fixed(info("H1", Category::HttpConfig), Ok(Outcome::pass())))
            .register(Fixed(info("I2", Category::Infrastructure), Ok(Outcome::pass())));

        let mut config = Config::for_target("http://localhost").unwrap();
        config.concurrency = 1;
        let engine = AuditEngine::with_parts(config, catalogue, Arc::new(ScriptedProbe::new()));
        let report = engine.run().await;

        let codes: Vec<&str> = report.results.iter().map(|r| r.check.code.as_str()).collect();
        assert_eq!(codes, vec!["I1", "I2", "H1", "S1"]);
    }

    #[tokio::test]
    async fn test_category_filter_limits_run() {
        let mut config = Config::for_target("http://localhost").unwrap();
        config.categories = vec![Category::Infrastructure];
        let catalogue = default_catalogue(&config.target);
        let probe = ScriptedProbe::new().port(5432, PortStatus::Open);

        let report = AuditEngine::with_parts(config, catalogue, Arc::new(probe)).run().await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].check.code, "M5");
        assert_eq!(report.results[0].verdict, Verdict::Pass);
        assert_eq!(report.results[1].check.code, "M12");
        assert_eq!(report.results[1].verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn test_login_failure_against_live_target() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
            .mount(&server)
            .await;

        let config = Config::for_target(&server.uri()).unwrap();
        let catalogue = default_catalogue(&config.target);
        let expected = catalogue.len();
        let engine = AuditEngine::with_parts(config, catalogue, Arc::new(ScriptedProbe::new()));
        let report = engine.run().await;

        assert_eq!(report.results.len(), expected);
        for result in report.results_in(Category::AuthWorkflow) {
            if result.check.code == "M2" {
                // Duplicate registration does not need a login
                assert_eq!(result.verdict, Verdict::Pass);
            } else {
                assert_eq!(result.verdict, Verdict::Indeterminate, "{}", result.check.name);
            }
        }
    }

    #[tokio::test]
    async fn test_full_catalogue_against_hardened_target() {
        let server = MockServer::start().await;
        let hardened = ResponseTemplate::new(200)
            .insert_header("server", "nginx")
            .insert_header("x-frame-options", "DENY")
            .insert_header("x-content-type-options", "nosniff")
            .insert_header("content-security-policy", "default-src 'self'");
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(hardened)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/users/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"detail":"Username taken"}"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "set-cookie",
                        "session_token=abc; HttpOnly; Secure; SameSite=Strict; Path=/",
                    )
                    .set_body_string(r#"{"access_token":"abc"}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(400).set_body_string("extension not allowed"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let closed_port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = Config::for_target(&server.uri()).unwrap();
        config.target.admin_port = closed_port;
        config.target.db_port = closed_port;
        config.target.storage_health_url =
            url::Url::parse(&format!("http://127.0.0.1:{}/minio/health/live", closed_port)).unwrap();
        let engine = AuditEngine::new(config).unwrap();
        let report = engine.run().await;

        assert_eq!(report.results.len(), 20);
        assert_eq!(report.summary.failed, 0, "{:#?}", report.results);
        assert_eq!(report.exit_code(false), 0);

        let by_code = |code: &str, name_part: &str| {
            report
                .results
                .iter()
                .find(|r| r.check.code == code && r.check.name.contains(name_part))
                .map(|r| r.verdict)
        };
        assert_eq!(by_code("M9", "HttpOnly"), Some(Verdict::Pass));
        assert_eq!(by_code("M9", "SameSite"), Some(Verdict::Pass));
        assert_eq!(by_code("M9", "Secure"), Some(Verdict::Indeterminate));
        assert_eq!(by_code("M13", "Upload"), Some(Verdict::Pass));
        assert_eq!(by_code("M1", "Secrets"), Some(Verdict::Indeterminate));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = Config::for_target("http://localhost").unwrap();
        config.concurrency = 0;
        assert!(matches!(AuditEngine::new(config), Err(AuditError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_repeated_runs_give_identical_verdicts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).insert_header("server", "nginx/1.25.3"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/debug/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"debug":true}"#))
            .mount(&server)
            .await;
        // Every registration looks fresh; the duplicate leaks a traceback
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string("Traceback (most recent call last): sqlalchemy.exc.IntegrityError"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "session_token=abc; Path=/")
                    .set_body_string(r#"{"access_token":"abc"}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"filename":"evil.php"}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let admin = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = Config::for_target(&server.uri()).unwrap();
        config.target.admin_port = admin.local_addr().unwrap().port();
        config.target.db_port = closed_port;
        config
            .target
            .set_storage_url(&format!("http://127.0.0.1:{}/minio/health/live", closed_port))
            .unwrap();
        let engine = AuditEngine::new(config).unwrap();

        let verdicts = |report: &AuditReport| -> Vec<(String, String, Verdict)> {
            report
                .results
                .iter()
                .map(|r| (r.check.code.clone(), r.check.name.clone(), r.verdict))
                .collect()
        };
        let first = engine.run().await;
        let second = engine.run().await;

        assert_eq!(verdicts(&first), verdicts(&second));
        assert_eq!(first.results.len(), 20);

        let verdict_of = |code: &str| {
            first
                .results
                .iter()
                .find(|r| r.check.code == code)
                .map(|r| r.verdict)
        };
        assert_eq!(verdict_of("M2"), Some(Verdict::Fail));
        assert_eq!(verdict_of("M13"), Some(Verdict::Fail));
        assert_eq!(verdict_of("M5"), Some(Verdict::Fail));
        assert_eq!(verdict_of("M10"), Some(Verdict::Fail));
        assert_eq!(verdict_of("M14"), Some(Verdict::Fail));
    }
}
