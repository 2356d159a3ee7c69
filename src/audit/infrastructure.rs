use async_trait::async_trait;
use tracing::debug;

use crate::config::Target;
use crate::probe::PortStatus;
use crate::types::{AuditError, Category, CheckInfo, Outcome};

use super::catalogue::{Catalogue, Check, CheckContext};

pub fn register(catalogue: &mut Catalogue, target: &Target) {
    catalogue
        .register(PortClosedCheck::new(
            "M5",
            format!("Admin Panel Port ({}) Closed", target.admin_port),
            target.admin_port,
        ))
        .register(PortClosedCheck::new(
            "M12",
            format!("Database Port ({}) Closed to Host", target.db_port),
            target.db_port,
        ));
}

/// A port that must not accept connections on the public host.
/// Closed is the safe outcome.
pub struct PortClosedCheck {
    info: CheckInfo,
    port: u16,
}

impl PortClosedCheck {
    pub fn new(code: &str, name: String, port: u16) -> Self {
        Self {
            info: CheckInfo::new(code, name, Category::Infrastructure),
            port,
        }
    }
}

#[async_trait]
impl Check for PortClosedCheck {
    fn info(&self) -> &CheckInfo {
        &self.info
    }

    async fn evaluate(&self, ctx: &CheckContext) -> Result<Outcome, AuditError> {
        let status = ctx.probe.probe_port(&ctx.target.host, self.port).await;
        let addr = if ctx.target.host.contains(':') {
            format!("[{}]:{}", ctx.target.host, self.port)
        } else {
            format!("{}:{}", ctx.target.host, self.port)
        };
        debug!("{} -> {:?}", addr, status);

        Ok(match status {
            PortStatus::Closed => Outcome::pass(),
            PortStatus::Open => Outcome::fail(format!("{} accepts connections", addr)),
            PortStatus::Unreachable(caveat) => Outcome::pass().with_detail(format!("unreachable: {}", caveat)),
        })
    }
}
