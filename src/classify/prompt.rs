use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Largest slice of a diff included in a prompt.
const MAX_DIFF_CHARS: usize = 8_000;
const MAX_BODY_CHARS: usize = 2_000;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You review GitHub pull requests and classify the work they contain. \
Reply with a single JSON object and nothing else, using these keys: \
\"work_type\" (one of feature, bugfix, refactor, docs, test, chore, other), \
\"complexity_score\", \"risk_score\", \"clarity_score\" (integers from 1 to 10), \
and \"summary\" (one sentence).";

/// A pull request as exported from GitHub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub repo: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub diff: String,
}

impl PullRequestRecord {
    pub fn item_id(&self) -> String {
        format!("{}#{}", self.repo, self.number)
    }
}

/// One unit of classification work. The coordinator never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub payload: String,
    pub fingerprint: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, payload: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            fingerprint: fingerprint.into(),
        }
    }

    pub fn from_pull_request(pr: &PullRequestRecord) -> Self {
        let id = pr.item_id();
        let fingerprint = fingerprint(&pr.title, pr.diff.len(), &id);
        Self {
            id,
            payload: build_prompt(pr),
            fingerprint,
        }
    }
}

/// Hex SHA-256 of `title|diff_len|id`.
pub fn fingerprint(title: &str, diff_len: usize, id: &str) -> String {
    let digest = Sha256::digest(format!("{title}|{diff_len}|{id}").as_bytes());
    hex::encode(digest)
}

fn truncate_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

pub fn build_prompt(pr: &PullRequestRecord) -> String {
    let mut prompt = String::with_capacity(512 + pr.diff.len().min(MAX_DIFF_CHARS));
    let _ = writeln!(prompt, "Repository: {}", pr.repo);
    let _ = writeln!(prompt, "Pull request #{}: {}", pr.number, pr.title.trim());
    if let Some(author) = pr.author.as_deref() {
        let _ = writeln!(prompt, "Author: {author}");
    }
    let _ = writeln!(
        prompt,
        "Size: +{} -{} across {} files",
        pr.additions,
        pr.deletions,
        pr.files_changed.len()
    );
    if !pr.files_changed.is_empty() {
        let _ = writeln!(prompt, "Files: {}", pr.files_changed.join(", "));
    }
    if let Some(body) = pr.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        let (body, _) = truncate_chars(body, MAX_BODY_CHARS);
        let _ = writeln!(prompt, "\nDescription:\n{body}");
    }
    if !pr.diff.is_empty() {
        let (diff, truncated) = truncate_chars(&pr.diff, MAX_DIFF_CHARS);
        let _ = writeln!(prompt, "\nDiff:\n{diff}");
        if truncated {
            let _ = writeln!(prompt, "[diff truncated]");
        }
    }
    prompt
}
