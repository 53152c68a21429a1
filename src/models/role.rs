use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A named permission bundle.
///
/// Roles form a forest through `parent_id`, but the link is organizational:
/// permission resolution reads each role's own permission set only, with no
/// recursive walk up the parent chain. `priority` orders roles for display
/// and tie-breaking (lower value means higher precedence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub priority: u32,
    pub parent_id: Option<String>,
    pub permissions: HashSet<String>,
    /// Modules of the host application this role unlocks.
    pub modules: HashSet<String>,
    pub active: bool,
}

impl Role {
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            parent_id: None,
            permissions: HashSet::new(),
            modules: HashSet::new(),
            active: true,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn with_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules.extend(modules.into_iter().map(Into::into));
        self
    }
}
