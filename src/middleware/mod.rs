pub mod guard;

pub use guard::{
    auth_middleware, optional_auth_middleware, require_access_middleware, AuthContext,
    AuthIdentity, RequestGuard, RequiredAccess,
};
