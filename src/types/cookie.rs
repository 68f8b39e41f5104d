use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnError, serde_as};

/// One browser cookie held in the shared credential store.
///
/// Identity for merge/delete purposes is `(name, domain, path)`; `value` and
/// the remaining attributes are not part of the key.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    /// Imported cookie dumps occasionally carry a malformed `expires`
    /// (string, bool, whatever the source browser serialized); tolerate it
    /// as absent rather than rejecting the whole import.
    #[serde_as(as = "DefaultOnError")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
}

fn default_path() -> String {
    "/".to_string()
}

/// Identity key used for merge/delete/dedup.
pub type CookieKey = (String, String, String);

impl Cookie {
    pub fn key(&self) -> CookieKey {
        (
            self.name.clone(),
            normalize_domain(&self.domain),
            self.path.clone(),
        )
    }
}

/// Strip exactly one leading `.` and lowercase. No further canonicalization.
pub fn normalize_domain(domain: &str) -> String {
    domain.strip_prefix('.').unwrap_or(domain).to_lowercase()
}

const LOGIN_STATE_KEYWORDS: &[&str] = &["session", "token", "auth", "jwt", "sid", "uid", "login"];

/// True iff at least one cookie's lowercased name contains a login-state keyword.
pub fn looks_logged_in(cookies: &[Cookie]) -> bool {
    cookies.iter().any(|c| {
        let lower = c.name.to_lowercase();
        LOGIN_STATE_KEYWORDS.iter().any(|kw| lower.contains(kw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str) -> Cookie {
        Cookie {
            name: name.into(),
            value: "v".into(),
            domain: domain.into(),
            path: "/".into(),
            secure: true,
            http_only: true,
            same_site: None,
            expires: None,
        }
    }

    #[test]
    fn normalizes_leading_dot_and_case() {
        assert_eq!(normalize_domain(".Example.COM"), "example.com");
        assert_eq!(normalize_domain("example.com"), "example.com");
    }

    #[test]
    fn does_not_collapse_subdomains() {
        assert_ne!(normalize_domain("a.b.com"), normalize_domain("b.com"));
    }

    #[test]
    fn login_heuristic_matches_substring_case_insensitive() {
        assert!(looks_logged_in(&[cookie("SESSION_ID", "x.com")]));
        assert!(looks_logged_in(&[cookie("csrf", "x.com"), cookie("uid_hash", "x.com")]));
        assert!(!looks_logged_in(&[cookie("theme", "x.com")]));
    }

    #[test]
    fn key_uses_normalized_domain() {
        let a = cookie("n", ".Example.com");
        let b = cookie("n", "example.com");
        assert_eq!(a.key().1, b.key().1);
    }
}
