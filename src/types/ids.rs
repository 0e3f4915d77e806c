//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of identifiers (e.g., passing a base
//! SHA where a head SHA is expected) and make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A pull request number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PrNumber {
    fn from(n: u64) -> Self {
        PrNumber(n)
    }
}

/// A git commit SHA.
///
/// Webhook payloads normally carry the full 40-character form, but nothing
/// here enforces it. The base SHA of a pull request may legitimately be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string.
    ///
    /// Note: This does not validate the format.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the SHA is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        // get() avoids a panic on non-ASCII input from untrusted payloads.
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Sha {
    fn from(s: String) -> Self {
        Sha(s)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha(s.to_string())
    }
}

/// A repository name as it appears in webhook payloads.
///
/// Usually `owner/name` (GitHub's `full_name`), but payloads that only carry
/// `repository.name` yield a bare name. The value is kept verbatim; callers
/// that need a filesystem-safe form use [`RepoName::dir_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoName(pub String);

impl RepoName {
    pub fn new(s: impl Into<String>) -> Self {
        RepoName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name with every `/` replaced by `_`.
    ///
    /// This is the directory name used for fresh clones and the canonical
    /// form used when comparing against a configured repository filter.
    ///
    /// # Example
    ///
    /// ```
    /// use review_relay::types::RepoName;
    ///
    /// assert_eq!(RepoName::new("octocat/hello-world").dir_name(), "octocat_hello-world");
    /// ```
    pub fn dir_name(&self) -> String {
        self.0.replace('/', "_")
    }

    /// Returns true if this repository matches `filter`.
    ///
    /// Both sides are normalized with [`RepoName::dir_name`] first, so a
    /// filter of `octocat_hello-world` matches `octocat/hello-world` and
    /// vice versa.
    pub fn matches_filter(&self, filter: &str) -> bool {
        self.dir_name() == filter.replace('/', "_")
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RepoName {
    fn from(s: &str) -> Self {
        RepoName(s.to_string())
    }
}

impl From<String> for RepoName {
    fn from(s: String) -> Self {
        RepoName(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod pr_number {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn display_format(n: u64) {
                let pr = PrNumber(n);
                prop_assert_eq!(format!("{}", pr), format!("#{}", n));
            }

            #[test]
            fn serializes_as_bare_number(n: u64) {
                let json = serde_json::to_string(&PrNumber(n)).unwrap();
                prop_assert_eq!(json, n.to_string());
            }
        }
    }

    mod sha {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn short_returns_7_chars(s in "[0-9a-f]{40}") {
                let sha = Sha::new(&s);
                prop_assert_eq!(sha.short().len(), 7);
                prop_assert_eq!(sha.short(), &s[..7]);
            }
        }

        #[test]
        fn short_handles_short_input() {
            let sha = Sha::new("abc");
            assert_eq!(sha.short(), "abc");
        }

        #[test]
        fn short_handles_multibyte_input() {
            // Byte 7 falls inside a multi-byte character.
            let sha = Sha::new("abcdeféé");
            assert_eq!(sha.short(), "abcdeféé");
        }

        #[test]
        fn empty_sha() {
            assert!(Sha::new("").is_empty());
            assert!(!Sha::new("a").is_empty());
        }
    }

    mod repo_name {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn dir_name_replaces_slash() {
            assert_eq!(RepoName::new("owner/repo").dir_name(), "owner_repo");
            assert_eq!(RepoName::new("bare").dir_name(), "bare");
        }

        #[test]
        fn filter_matches_either_form() {
            let repo = RepoName::new("owner/repo");
            assert!(repo.matches_filter("owner/repo"));
            assert!(repo.matches_filter("owner_repo"));
            assert!(!repo.matches_filter("owner/other"));
            assert!(!repo.matches_filter("repo"));
        }

        proptest! {
            #[test]
            fn dir_name_never_contains_slash(
                owner in "[a-zA-Z][a-zA-Z0-9-]{0,38}",
                repo in "[a-zA-Z][a-zA-Z0-9_.-]{0,99}"
            ) {
                let name = RepoName::new(format!("{}/{}", owner, repo));
                prop_assert!(!name.dir_name().contains('/'));
                prop_assert!(name.matches_filter(&name.dir_name()));
            }
        }
    }
}
