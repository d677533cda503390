use std::fmt::Write;

use anyhow::Result;
use autofix_core::{
    models::{APP_TITLE, PipelineResult, ToolStatus},
    repo_config::{CONFIG_FILE_NAME, RepoConfig},
};

use crate::{GitHubApi, PER_PAGE, paginate};

/// Hidden marker identifying the bot's own PR comment.
pub const COMMENT_MARKER: &str = "<!-- lint-autofix-pro -->";

/// Note used in the comment posted when processing fails unexpectedly.
pub const FAILURE_NOTE: &str =
    "Lint Autofix Pro encountered an error while processing this pull request.";

fn status_icon(status: ToolStatus) -> &'static str {
    match status {
        ToolStatus::Ok => "✅",
        ToolStatus::Failed => "❌",
        ToolStatus::Skipped => "⚠️",
    }
}

fn how_to_fix(result: &PipelineResult) -> String {
    if result.diff.is_empty() {
        return "No fixes were applied. Ensure Prettier/ESLint are installed and try pushing a new commit."
            .to_string();
    }
    match &result.auto_commit {
        Some(outcome) if outcome.attempted && outcome.pushed => {
            "Auto-commit is enabled. Pull the latest commits to get the fixes.".to_string()
        }
        Some(outcome) if outcome.attempted => outcome
            .reason
            .clone()
            .unwrap_or_else(|| "Auto-commit was skipped. You can apply the diff manually.".to_string()),
        _ => format!("Apply the diff below locally or enable auto-commit in `{CONFIG_FILE_NAME}`."),
    }
}

/// A backtick fence longer than any backtick run inside `content`.
fn code_fence(content: &str) -> String {
    let longest = content.split(|c| c != '`').map(str::len).max().unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

/// Render the Markdown body of the PR comment.
pub fn build_comment_body(result: &PipelineResult) -> String {
    let mut out = String::new();
    let config = &result.config;
    let _ = writeln!(out, "## {APP_TITLE}");
    out.push('\n');
    let _ = writeln!(out, "{COMMENT_MARKER}");
    let _ = writeln!(out, "Working directory: `{}`", config.working_directory);
    out.push('\n');
    out.push_str("### What happened\n");
    let _ = writeln!(out, "- Install dependencies: {}", status_icon(result.install_status));
    let _ = writeln!(out, "- Prettier: {}", status_icon(result.prettier_status));
    let _ = writeln!(out, "- ESLint: {}", status_icon(result.eslint_status));
    out.push('\n');
    out.push_str("### Changed files\n");
    if result.changed_files.is_empty() {
        out.push_str("No changes detected.\n");
    } else {
        let shown = result.changed_files.len().min(config.max_files);
        for file in &result.changed_files[..shown] {
            let _ = writeln!(out, "- `{file}`");
        }
        let overflow = result.changed_files.len() - shown;
        if overflow > 0 {
            let _ = writeln!(out, "- …and {overflow} more");
        }
    }
    out.push('\n');
    let diff = if result.diff.is_empty() { "(no changes)" } else { result.diff.as_str() };
    let fence = code_fence(diff);
    let _ = write!(out, "### Diff\n{fence}diff\n{diff}\n{fence}");
    if result.diff_truncated {
        out.push_str("\nDiff truncated to fit GitHub comment limits.");
    }
    if !result.notes.is_empty() {
        out.push_str("\n\n### Notes");
        for note in &result.notes {
            let _ = write!(out, "\n- {note}");
        }
    }
    out.push_str("\n\n### How to fix\n");
    out.push_str(&how_to_fix(result));
    out
}

/// Comment body for a run that failed before producing a result.
pub fn build_failure_comment_body() -> String {
    let mut result = PipelineResult::new(RepoConfig::default());
    result.install_status = ToolStatus::Failed;
    result.notes.push(FAILURE_NOTE.to_string());
    build_comment_body(&result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentUpsert {
    Created,
    Updated(u64),
}

/// Update the first existing comment carrying [`COMMENT_MARKER`], or create one.
pub async fn upsert_comment(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    number: u64,
    body: &str,
) -> Result<CommentUpsert> {
    let existing =
        paginate(PER_PAGE, move |page| api.list_issue_comments(owner, repo, number, page, PER_PAGE))
            .await?;
    let found = existing
        .iter()
        .find(|c| c.body.as_deref().is_some_and(|b| b.contains(COMMENT_MARKER)));
    match found {
        Some(comment) => {
            api.update_issue_comment(owner, repo, comment.id, body).await?;
            Ok(CommentUpsert::Updated(comment.id))
        }
        None => {
            api.create_issue_comment(owner, repo, number, body).await?;
            Ok(CommentUpsert::Created)
        }
    }
}
