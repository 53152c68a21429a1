pub mod audit;
pub mod rate_limit;
pub mod rbac;
pub mod sessions;
pub mod store;
pub mod token;

pub use audit::{
    export_csv, export_json, export_xml, AuditContext, AuditFilter, AuditPipeline, AuditSink,
    AuditStatistics, FileSink, MemorySink, TracingSink, DEFAULT_MASKED_FIELDS, MASK,
};
pub use rate_limit::{AuthRateLimiter, RateKey};
pub use rbac::RbacResolver;
pub use sessions::SessionRegistry;
pub use store::{AuthStore, MemoryStore, PurgeStats};
pub use token::TokenService;
