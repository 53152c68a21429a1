pub mod audit;
pub mod identity;
pub mod permission;
pub mod role;
pub mod session;
pub mod token;

pub use audit::{AuditEvent, AuditMetadata, AuditResult};
pub use identity::{Identity, PermissionOverride, RoleAssignment};
pub use permission::{category_wildcard, is_valid_permission_name, permission_matches, GLOBAL_WILDCARD};
pub use role::Role;
pub use session::{OriginMetadata, Session};
pub use token::{Claims, RevocationEntry, TokenPair, TokenRecord, TokenType};
