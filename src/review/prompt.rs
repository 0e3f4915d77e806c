//! Review instruction templating.
//!
//! The review tool receives exactly one instruction string. By default that is
//! just the configured base instruction (a slash command). Optionally a
//! natural-language paragraph is appended, rendered from a template with the
//! placeholders `{repo}`, `{pr_number}`, `{head_sha}` and `{base_sha}`.
//!
//! Rendering is strict. The template is parsed up front (at configuration
//! time), so an unknown placeholder or a stray brace is a start-up error
//! rather than a surprise in the middle of a review. Substituted values come
//! from a webhook payload and are checked against a narrow character set
//! before they are allowed into the instruction. The instruction is passed to
//! the tool as a single argv element and never goes through a shell.
//!
//! Literal braces are written `{{` and `}}`.

use thiserror::Error;

use crate::types::{PrNumber, RepoName, Sha};

/// Template used when natural-language instructions are enabled but no
/// template is configured.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Review pull request {pr_number} in {repo} \
at head commit {head_sha} (base {base_sha}). Post your findings as comments on the \
pull request. If you find nothing worth changing, still leave one comment on the pull \
request saying so, so that every review is visible.";

/// Errors from parsing a template or rendering it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    /// The template names a placeholder that does not exist.
    #[error("unknown placeholder {{{0}}} in review prompt template")]
    UnknownPlaceholder(String),

    /// A `{` without a matching `}`, or a lone `}`.
    #[error("unbalanced brace at byte {position} in review prompt template")]
    UnbalancedBrace { position: usize },

    /// A value from the payload is not safe to substitute.
    #[error("refusing to substitute {field} value {value:?} into review prompt")]
    InvalidValue { field: &'static str, value: String },
}

/// A placeholder the template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Repo,
    PrNumber,
    HeadSha,
    BaseSha,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "repo" => Some(Placeholder::Repo),
            "pr_number" => Some(Placeholder::PrNumber),
            "head_sha" => Some(Placeholder::HeadSha),
            "base_sha" => Some(Placeholder::BaseSha),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A parsed, validated prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

/// The values substituted into a [`PromptTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct PromptValues<'a> {
    pub repo: &'a RepoName,
    pub pr_number: PrNumber,
    pub head_sha: &'a Sha,
    pub base_sha: &'a Sha,
}

impl PromptTemplate {
    /// Parses a template string.
    ///
    /// # Example
    ///
    /// ```
    /// use review_relay::review::prompt::{PromptError, PromptTemplate};
    ///
    /// assert!(PromptTemplate::parse("Review {repo} at {head_sha}").is_ok());
    /// assert!(PromptTemplate::parse("Literal {{braces}}").is_ok());
    /// assert_eq!(
    ///     PromptTemplate::parse("Hello {name}"),
    ///     Err(PromptError::UnknownPlaceholder("name".to_string()))
    /// );
    /// ```
    pub fn parse(template: &str) -> Result<Self, PromptError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|&(_, next)| next == '{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().is_some_and(|&(_, next)| next == '}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        if c == '{' {
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(PromptError::UnbalancedBrace { position });
                    }
                    let placeholder = Placeholder::from_name(&name)
                        .ok_or(PromptError::UnknownPlaceholder(name))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(placeholder));
                }
                '}' => return Err(PromptError::UnbalancedBrace { position }),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(PromptTemplate { segments })
    }

    /// Renders the template, validating every value first.
    ///
    /// Nothing is rendered if any value is rejected, even values the template
    /// does not reference.
    pub fn render(&self, values: &PromptValues<'_>) -> Result<String, PromptError> {
        validate_values(values)?;

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::Repo) => out.push_str(values.repo.as_str()),
                Segment::Placeholder(Placeholder::PrNumber) => {
                    out.push_str(&values.pr_number.0.to_string())
                }
                Segment::Placeholder(Placeholder::HeadSha) => {
                    out.push_str(values.head_sha.as_str())
                }
                Segment::Placeholder(Placeholder::BaseSha) => {
                    out.push_str(values.base_sha.as_str())
                }
            }
        }
        Ok(out)
    }
}

/// Builds the single instruction string handed to the review tool.
///
/// With no template this is just `base`. With a template, the rendered text
/// follows `base` after a blank line.
pub fn build_instruction(
    base: &str,
    template: Option<&PromptTemplate>,
    values: &PromptValues<'_>,
) -> Result<String, PromptError> {
    match template {
        None => Ok(base.to_string()),
        Some(template) => {
            let rendered = template.render(values)?;
            Ok(format!("{}\n\n{}", base, rendered))
        }
    }
}

fn validate_values(values: &PromptValues<'_>) -> Result<(), PromptError> {
    if !is_valid_repo(values.repo.as_str()) {
        return Err(PromptError::InvalidValue {
            field: "repo",
            value: values.repo.to_string(),
        });
    }
    if values.head_sha.is_empty() || !is_hex(values.head_sha.as_str()) {
        return Err(PromptError::InvalidValue {
            field: "head_sha",
            value: values.head_sha.to_string(),
        });
    }
    if !is_hex(values.base_sha.as_str()) {
        return Err(PromptError::InvalidValue {
            field: "base_sha",
            value: values.base_sha.to_string(),
        });
    }
    Ok(())
}

/// `owner/name` or a bare `name`, each part drawn from `[A-Za-z0-9._-]`.
fn is_valid_repo(repo: &str) -> bool {
    let parts: Vec<&str> = repo.split('/').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && *part != "."
                && *part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        })
}

fn is_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}
