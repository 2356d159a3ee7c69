pub mod app_logic;
pub mod auth_workflow;
pub mod catalogue;
pub mod engine;
pub mod http_config;
pub mod infrastructure;
pub mod report;
pub mod session;
pub mod storage;

pub use engine::AuditEngine;
pub use report::{generate_json_report, generate_text_report};
