//! Webhook payload normalization.
//!
//! GitHub sends differently shaped payloads for `push`, `pull_request`,
//! `workflow_run` and friends. The edge node does not care about most of
//! that detail: it reduces every payload to a [`CanonicalEvent`] carrying the
//! repository, branch and commit it refers to, plus the untouched payload so
//! the internal node can dig further.
//!
//! # Field resolution
//!
//! Rules are applied in order; a later rule wins when its value is present and
//! non-empty:
//!
//! 1. `repository.full_name`, falling back to `repository.name`
//! 2. `ref` of the form `refs/heads/<branch>` gives the branch
//! 3. `head_commit.id` (or `head_commit.sha`) gives the commit, and
//!    `head_commit.message` (trimmed) the commit message
//! 4. `after` gives the commit
//! 5. `pull_request.head.ref` / `pull_request.head.sha`
//! 6. `workflow_run.head_branch` / `workflow_run.head_sha`
//!
//! Values of the wrong JSON type are treated as absent. Parsing only fails
//! when the body is not a JSON object.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Prefix GitHub uses for branch refs in push payloads.
const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Error type for payload parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The body is not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The body is valid JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Normalized form of a webhook delivery.
///
/// This is exactly what the edge node relays to the internal node. The
/// serialized field names (`event`, `repo`, `commit`, ...) are the relay wire
/// format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Value of the `X-GitHub-Event` header.
    #[serde(rename = "event")]
    pub event_type: String,

    /// `owner/name`, a bare name, or empty if the payload had no repository.
    #[serde(rename = "repo", default)]
    pub repo_full_name: String,

    #[serde(default)]
    pub branch: String,

    #[serde(rename = "commit", default)]
    pub commit_sha: String,

    #[serde(default)]
    pub commit_message: String,

    /// The complete original payload.
    #[serde(rename = "payload", default)]
    pub raw_payload: Value,
}

/// Parses a webhook body into a [`CanonicalEvent`].
///
/// An empty body is treated as `{}`.
///
/// # Arguments
///
/// * `event_type` - The value of the `X-GitHub-Event` header
/// * `body` - The raw request body
///
/// # Examples
///
/// ```
/// use review_relay::webhooks::parse_payload;
///
/// let body = br#"{
///     "ref": "refs/heads/main",
///     "after": "abc123",
///     "repository": { "full_name": "octocat/hello-world" }
/// }"#;
///
/// let event = parse_payload("push", body).unwrap();
/// assert_eq!(event.repo_full_name, "octocat/hello-world");
/// assert_eq!(event.branch, "main");
/// assert_eq!(event.commit_sha, "abc123");
/// ```
pub fn parse_payload(event_type: &str, body: &[u8]) -> Result<CanonicalEvent, ParseError> {
    let data: Value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(body)?
    };

    if !data.is_object() {
        return Err(ParseError::NotAnObject);
    }

    Ok(normalize(event_type, data))
}

/// Applies the field resolution rules to an already-decoded JSON object.
fn normalize(event_type: &str, data: Value) -> CanonicalEvent {
    let repo_full_name = non_empty(&data, &["repository", "full_name"])
        .or_else(|| non_empty(&data, &["repository", "name"]))
        .unwrap_or_default()
        .to_string();

    let mut branch = String::new();
    let mut commit_sha = String::new();
    let mut commit_message = String::new();

    if let Some(name) = str_at(&data, &["ref"]).and_then(|r| r.strip_prefix(BRANCH_REF_PREFIX)) {
        branch = name.to_string();
    }

    if let Some(head_commit) = data.get("head_commit") {
        commit_sha = non_empty(head_commit, &["id"])
            .or_else(|| non_empty(head_commit, &["sha"]))
            .unwrap_or_default()
            .to_string();
        commit_message = str_at(head_commit, &["message"])
            .unwrap_or_default()
            .trim()
            .to_string();
    }

    if let Some(after) = non_empty(&data, &["after"]) {
        commit_sha = after.to_string();
    }

    if let Some(head_ref) = non_empty(&data, &["pull_request", "head", "ref"]) {
        branch = head_ref.to_string();
    }
    if let Some(head_sha) = non_empty(&data, &["pull_request", "head", "sha"]) {
        commit_sha = head_sha.to_string();
    }

    if let Some(head_branch) = non_empty(&data, &["workflow_run", "head_branch"]) {
        branch = head_branch.to_string();
    }
    if let Some(head_sha) = non_empty(&data, &["workflow_run", "head_sha"]) {
        commit_sha = head_sha.to_string();
    }

    CanonicalEvent {
        event_type: event_type.to_string(),
        repo_full_name,
        branch,
        commit_sha,
        commit_message,
        raw_payload: data,
    }
}

/// Follows `path` through nested objects and returns the string found there.
///
/// Returns `None` if any step is missing or the final value is not a string.
pub(crate) fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_str)
}

/// Like [`str_at`], but also treats the empty string as absent.
pub(crate) fn non_empty<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    str_at(value, path).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn parse_json(event_type: &str, body: Value) -> CanonicalEvent {
        parse_payload(event_type, &serde_json::to_vec(&body).unwrap()).unwrap()
    }

    // ========================================================================
    // Repository resolution
    // ========================================================================

    #[test]
    fn repo_prefers_full_name() {
        let event = parse_json(
            "push",
            json!({ "repository": { "full_name": "owner/repo", "name": "repo" } }),
        );
        assert_eq!(event.repo_full_name, "owner/repo");
    }

    #[test]
    fn repo_falls_back_to_name() {
        let event = parse_json("push", json!({ "repository": { "name": "repo" } }));
        assert_eq!(event.repo_full_name, "repo");

        let event = parse_json(
            "push",
            json!({ "repository": { "full_name": "", "name": "repo" } }),
        );
        assert_eq!(event.repo_full_name, "repo");
    }

    #[test]
    fn repo_missing_is_empty() {
        let event = parse_json("ping", json!({ "zen": "Keep it logically awesome." }));
        assert_eq!(event.repo_full_name, "");
    }

    // ========================================================================
    // Push payloads
    // ========================================================================

    #[test]
    fn push_payload_extracts_branch_commit_and_message() {
        let event = parse_json(
            "push",
            json!({
                "ref": "refs/heads/feature/x",
                "head_commit": {
                    "id": "abc123def456",
                    "message": "  Fix the thing\n"
                },
                "after": "ffffffffffff",
                "repository": { "full_name": "owner/repo" }
            }),
        );

        assert_eq!(event.event_type, "push");
        assert_eq!(event.branch, "feature/x");
        assert_eq!(event.commit_sha, "ffffffffffff");
        assert_eq!(event.commit_message, "Fix the thing");
    }

    #[test]
    fn tag_ref_is_not_a_branch() {
        let event = parse_json("push", json!({ "ref": "refs/tags/v1.0" }));
        assert_eq!(event.branch, "");
    }

    #[test]
    fn head_commit_sha_used_when_id_missing() {
        let event = parse_json("push", json!({ "head_commit": { "sha": "deadbeef" } }));
        assert_eq!(event.commit_sha, "deadbeef");
    }

    #[test]
    fn after_overrides_head_commit() {
        let event = parse_json("push", json!({ "after": "cafef00d" }));
        assert_eq!(event.commit_sha, "cafef00d");

        let event = parse_json(
            "push",
            json!({ "head_commit": { "id": "1111111", "message": "m" }, "after": "2222222" }),
        );
        assert_eq!(event.commit_sha, "2222222");
        assert_eq!(event.commit_message, "m");
    }

    #[test]
    fn empty_after_keeps_head_commit() {
        let event = parse_json(
            "push",
            json!({ "head_commit": { "id": "abc" }, "after": "" }),
        );
        assert_eq!(event.commit_sha, "abc");
    }

    // ========================================================================
    // Pull request and workflow_run overrides
    // ========================================================================

    #[test]
    fn pull_request_head_overrides_push_fields() {
        let event = parse_json(
            "pull_request",
            json!({
                "ref": "refs/heads/main",
                "after": "aaaa",
                "pull_request": {
                    "head": { "ref": "feature", "sha": "bbbb" }
                }
            }),
        );
        assert_eq!(event.branch, "feature");
        assert_eq!(event.commit_sha, "bbbb");
    }

    #[test]
    fn pull_request_empty_values_do_not_override() {
        let event = parse_json(
            "pull_request",
            json!({
                "ref": "refs/heads/main",
                "after": "aaaa",
                "pull_request": { "head": { "ref": "", "sha": "" } }
            }),
        );
        assert_eq!(event.branch, "main");
        assert_eq!(event.commit_sha, "aaaa");
    }

    #[test]
    fn workflow_run_overrides_pull_request() {
        let event = parse_json(
            "workflow_run",
            json!({
                "pull_request": { "head": { "ref": "feature", "sha": "bbbb" } },
                "workflow_run": { "head_branch": "release", "head_sha": "cccc" }
            }),
        );
        assert_eq!(event.branch, "release");
        assert_eq!(event.commit_sha, "cccc");
    }

    // ========================================================================
    // Edge cases
    // ========================================================================

    #[test]
    fn empty_body_is_empty_object() {
        let event = parse_payload("ping", b"").unwrap();
        assert_eq!(event.raw_payload, json!({}));
        assert_eq!(event.repo_full_name, "");
        assert_eq!(event.commit_sha, "");
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(matches!(
            parse_payload("push", b"{not json"),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn non_object_json_is_error() {
        assert!(matches!(
            parse_payload("push", b"[1, 2, 3]"),
            Err(ParseError::NotAnObject)
        ));
        assert!(matches!(
            parse_payload("push", b"\"hello\""),
            Err(ParseError::NotAnObject)
        ));
    }

    #[test]
    fn wrong_types_are_ignored() {
        let event = parse_json(
            "push",
            json!({
                "ref": 7,
                "head_commit": "not an object",
                "after": null,
                "repository": { "full_name": ["x"], "name": 3 },
                "pull_request": { "head": [] }
            }),
        );
        assert_eq!(event.repo_full_name, "");
        assert_eq!(event.branch, "");
        assert_eq!(event.commit_sha, "");
    }

    #[test]
    fn raw_payload_is_preserved() {
        let body = json!({ "action": "opened", "number": 5, "extra": { "nested": true } });
        let event = parse_json("pull_request", body.clone());
        assert_eq!(event.raw_payload, body);
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let event = parse_json(
            "push",
            json!({ "ref": "refs/heads/main", "after": "abc", "repository": { "full_name": "o/r" } }),
        );
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["event"], "push");
        assert_eq!(wire["repo"], "o/r");
        assert_eq!(wire["branch"], "main");
        assert_eq!(wire["commit"], "abc");
        assert_eq!(wire["commit_message"], "");
        assert_eq!(wire["payload"]["after"], "abc");
    }

    // ========================================================================
    // Property-based tests
    // ========================================================================

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z/_]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::hash_map(
                    prop_oneof![
                        Just("ref".to_string()),
                        Just("head".to_string()),
                        Just("sha".to_string()),
                        Just("head_commit".to_string()),
                        Just("pull_request".to_string()),
                        Just("repository".to_string()),
                        "[a-z_]{1,8}",
                    ],
                    inner,
                    0..5
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        /// Property: any JSON object parses successfully.
        #[test]
        fn prop_any_object_parses(
            fields in prop::collection::hash_map("[a-z_]{1,12}", arb_json(), 0..8)
        ) {
            let object = Value::Object(fields.into_iter().collect());
            let body = serde_json::to_vec(&object).unwrap();
            let event = parse_payload("push", &body);
            prop_assert!(event.is_ok());
            prop_assert_eq!(event.unwrap().raw_payload, object);
        }

        /// Property: arbitrary bytes never cause a panic.
        #[test]
        fn prop_arbitrary_bytes_no_panic(body: Vec<u8>) {
            let _ = parse_payload("push", &body);
        }

        /// Property: the branch never keeps the refs/heads/ prefix.
        #[test]
        fn prop_branch_prefix_stripped(name in "[a-z][a-z0-9/_-]{0,20}") {
            let event = parse_json("push", json!({ "ref": format!("refs/heads/{}", name) }));
            prop_assert_eq!(event.branch, name);
        }
    }
}
