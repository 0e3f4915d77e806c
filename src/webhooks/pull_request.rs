//! Pull request identity extraction.
//!
//! The internal node receives the original GitHub payload inside the relayed
//! [`CanonicalEvent`](super::CanonicalEvent). Before any review can be
//! scheduled it needs to know exactly which pull request, at which commit, in
//! which repository. [`extract_pull_request`] pulls that out, or reports that
//! the payload does not identify one.

use serde_json::Value;

use super::payload::{non_empty, str_at};
use crate::types::{PrNumber, RepoName, Sha};

/// Identity of a pull request at a specific head commit.
///
/// Either every mandatory field is present or no `PullRequestRef` exists:
/// extraction never yields a partially filled value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    /// `owner/name` (or a bare name if the payload only carried that). Never empty.
    pub repo: RepoName,

    pub number: PrNumber,

    /// Never empty.
    pub head_sha: Sha,

    /// May be empty; reviews do not depend on it.
    pub base_sha: Sha,

    /// The payload's `action` (e.g. `opened`, `synchronize`). Empty if absent.
    pub action: String,
}

/// Extracts pull request identity from a GitHub `pull_request` payload.
///
/// Returns `None` if any of these is missing or empty: the `pull_request`
/// object, the `repository` object, the repository name (`full_name`, falling
/// back to `name`), the pull request number, or `pull_request.head.sha`.
///
/// # Example
///
/// ```
/// use review_relay::webhooks::extract_pull_request;
///
/// let payload = serde_json::json!({
///     "action": "opened",
///     "pull_request": {
///         "number": 1,
///         "head": { "sha": "head123abc" },
///         "base": { "sha": "base456def" }
///     },
///     "repository": { "full_name": "owner/repo" }
/// });
///
/// let pr = extract_pull_request(&payload).unwrap();
/// assert_eq!(pr.repo.as_str(), "owner/repo");
/// assert_eq!(pr.number.0, 1);
/// assert_eq!(pr.head_sha.as_str(), "head123abc");
/// assert_eq!(pr.base_sha.as_str(), "base456def");
/// ```
pub fn extract_pull_request(payload: &Value) -> Option<PullRequestRef> {
    let pull_request = payload.get("pull_request").filter(|v| is_non_empty_object(v))?;
    let repository = payload.get("repository").filter(|v| is_non_empty_object(v))?;

    let repo = non_empty(repository, &["full_name"]).or_else(|| non_empty(repository, &["name"]))?;
    let number = pull_request.get("number").and_then(Value::as_u64)?;
    let head_sha = non_empty(pull_request, &["head", "sha"])?;
    let base_sha = str_at(pull_request, &["base", "sha"]).unwrap_or_default();
    let action = str_at(payload, &["action"]).unwrap_or_default();

    Some(PullRequestRef {
        repo: RepoName::new(repo),
        number: PrNumber(number),
        head_sha: Sha::new(head_sha),
        base_sha: Sha::new(base_sha),
        action: action.to_string(),
    })
}

fn is_non_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|o| !o.is_empty())
}
