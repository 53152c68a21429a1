//! Permission name grammar and wildcard matching.
//!
//! Permission identifiers take the form `category:action` (e.g. `data:read`).
//! Two reserved forms are interpreted specially by the resolver rather than
//! matched literally: the category wildcard `category:*` and the global
//! wildcard `*`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Grants every permission.
pub const GLOBAL_WILDCARD: &str = "*";

static PERMISSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_]+:[a-z_:]+$").expect("permission regex is valid"));

static CATEGORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_]+$").expect("category regex is valid"));

/// Validate a permission identifier, accepting the two reserved wildcard
/// forms alongside the concrete `category:action` grammar.
pub fn is_valid_permission_name(name: &str) -> bool {
    if name == GLOBAL_WILDCARD {
        return true;
    }
    if let Some(category) = name.strip_suffix(":*") {
        return CATEGORY_RE.is_match(category);
    }
    PERMISSION_RE.is_match(name)
}

/// The `category:*` wildcard covering `required`, if it has a category.
pub fn category_wildcard(required: &str) -> Option<String> {
    required
        .split_once(':')
        .map(|(category, _)| format!("{}:*", category))
}

/// Whether a granted permission entry satisfies a required concrete
/// permission, honoring both wildcard forms.
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == GLOBAL_WILDCARD || granted == required {
        return true;
    }
    match category_wildcard(required) {
        Some(wildcard) => granted == wildcard,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_names_validate() {
        assert!(is_valid_permission_name("data:read"));
        assert!(is_valid_permission_name("module_store:install:beta"));
        assert!(!is_valid_permission_name("Data:read"));
        assert!(!is_valid_permission_name("data"));
        assert!(!is_valid_permission_name("data:"));
        assert!(!is_valid_permission_name("data:Read"));
        assert!(!is_valid_permission_name(""));
    }

    #[test]
    fn wildcards_are_reserved_forms() {
        assert!(is_valid_permission_name("*"));
        assert!(is_valid_permission_name("data:*"));
        assert!(!is_valid_permission_name(":*"));
        assert!(!is_valid_permission_name("da*ta:read"));
    }

    #[test]
    fn matching_honors_wildcards() {
        assert!(permission_matches("data:read", "data:read"));
        assert!(permission_matches("data:*", "data:read"));
        assert!(permission_matches("*", "data:read"));
        assert!(!permission_matches("data:*", "admin:read"));
        assert!(!permission_matches("data:write", "data:read"));
    }
}
