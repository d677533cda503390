use std::fmt;

use serde::{Deserialize, Serialize};

use crate::repo_config::RepoConfig;

/// Fixed title of every check run and the PR comment.
pub const APP_TITLE: &str = "Lint Autofix Pro";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckName {
    LintCheck,
    Autofix,
}

impl CheckName {
    pub const ALL: [CheckName; 2] = [CheckName::LintCheck, CheckName::Autofix];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckName::LintCheck => "lint-check",
            CheckName::Autofix => "autofix",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    #[default]
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
}

impl Conclusion {
    /// The commit status reported in place of this conclusion.
    pub fn commit_state(self) -> CommitState {
        match self {
            Conclusion::Success | Conclusion::Neutral | Conclusion::Skipped => CommitState::Success,
            _ => CommitState::Failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

/// Canonical check-run summaries and commit-status descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summary {
    Queued,
    Running,
    NoSupportedFiles,
    NotConfigured,
    DispatchFailed,
    FixesAvailable,
    FixesPushed,
    NoChangesNeeded,
    ToolFailures,
    InternalError,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Summary::Queued => write!(f, "{APP_TITLE} queued."),
            Summary::Running => write!(f, "{APP_TITLE} is running."),
            Summary::NoSupportedFiles => f.write_str("Skipped: no supported files changed"),
            Summary::NotConfigured => f.write_str("Skipped: Prettier/ESLint not configured"),
            Summary::DispatchFailed => f.write_str("Skipped: dispatch failed (best-effort)"),
            Summary::FixesAvailable => write!(f, "{APP_TITLE}: fixes available"),
            Summary::FixesPushed => write!(f, "{APP_TITLE}: fixes pushed"),
            Summary::NoChangesNeeded => write!(f, "{APP_TITLE}: no changes needed"),
            Summary::ToolFailures => write!(f, "{APP_TITLE}: tool failures"),
            Summary::InternalError => write!(f, "{APP_TITLE}: internal error"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    #[default]
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoCommitOutcome {
    pub attempted: bool,
    pub pushed: bool,
    pub reason: Option<String>,
}

/// Outcome of one local pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub config: RepoConfig,
    pub install_status: ToolStatus,
    pub prettier_status: ToolStatus,
    pub eslint_status: ToolStatus,
    /// Paths relative to the working directory.
    pub changed_files: Vec<String>,
    pub diff: String,
    pub diff_truncated: bool,
    pub notes: Vec<String>,
    pub auto_commit: Option<AutoCommitOutcome>,
}

impl PipelineResult {
    pub fn new(config: RepoConfig) -> Self {
        Self {
            config,
            install_status: ToolStatus::Skipped,
            prettier_status: ToolStatus::Skipped,
            eslint_status: ToolStatus::Skipped,
            changed_files: vec![],
            diff: String::new(),
            diff_truncated: false,
            notes: vec![],
            auto_commit: None,
        }
    }

    pub fn has_failures(&self) -> bool {
        [self.install_status, self.prettier_status, self.eslint_status].contains(&ToolStatus::Failed)
    }

    pub fn pushed(&self) -> bool { self.auto_commit.as_ref().is_some_and(|a| a.pushed) }

    /// Terminal summary for the check runs.
    pub fn summary(&self) -> Summary {
        if self.has_failures() {
            Summary::ToolFailures
        } else if self.changed_files.is_empty() {
            Summary::NoChangesNeeded
        } else if self.pushed() {
            Summary::FixesPushed
        } else {
            Summary::FixesAvailable
        }
    }
}

/// Subset of the `pull_request` webhook payload the handler looks at.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub action: Option<String>,
    pub installation: Option<InstallationRef>,
    pub pull_request: Option<PullRequestData>,
    pub repository: Option<RepositoryData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRef {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestData {
    pub number: u64,
    pub html_url: Option<String>,
    pub head: BranchData,
    pub base: BranchData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchData {
    pub sha: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repo: Option<RepoRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoRef {
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryData {
    pub name: String,
    pub full_name: String,
    pub owner: AccountData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountData {
    pub login: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Subset of the `installation` webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationPayload {
    pub action: String,
    pub installation: InstallationData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationData {
    pub id: u64,
    pub account: Option<AccountData>,
}

impl InstallationData {
    pub fn account_login(&self) -> String {
        self.account
            .as_ref()
            .and_then(|a| a.login.clone().or_else(|| a.name.clone()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn account_type(&self) -> String {
        self.account
            .as_ref()
            .and_then(|a| a.kind.clone())
            .unwrap_or_else(|| "Organization".to_string())
    }
}

const HANDLED_ACTIONS: [&str; 4] = ["opened", "synchronize", "reopened", "ready_for_review"];

/// Immutable view of one qualifying pull request delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub head_sha: String,
    pub head_ref: String,
    pub base_sha: String,
    pub head_repo_full_name: String,
    pub base_repo_full_name: String,
    pub installation_id: u64,
    pub html_url: Option<String>,
    /// Account type of the repository owner, `Organization` when absent.
    pub owner_type: String,
}

impl PullRequestEvent {
    /// Applies the precondition gate. The error names the first failed precondition.
    pub fn from_payload(payload: &PullRequestPayload) -> Result<Self, &'static str> {
        let installation = payload.installation.as_ref().ok_or("missing installation")?;
        let pr = payload.pull_request.as_ref().ok_or("missing pull_request")?;
        let action = payload.action.as_deref().unwrap_or_default();
        if !HANDLED_ACTIONS.contains(&action) {
            return Err("unhandled action");
        }
        let repository = payload.repository.as_ref().ok_or("missing repository")?;
        let owner = repository.owner.login.clone().ok_or("missing repository owner")?;
        let head_repo = pr.head.repo.as_ref().ok_or("missing head repository")?;
        let base_repo = pr.base.repo.as_ref().ok_or("missing base repository")?;
        Ok(Self {
            owner,
            repo: repository.name.clone(),
            number: pr.number,
            head_sha: pr.head.sha.clone(),
            head_ref: pr.head.git_ref.clone(),
            base_sha: pr.base.sha.clone(),
            head_repo_full_name: head_repo.full_name.clone(),
            base_repo_full_name: base_repo.full_name.clone(),
            installation_id: installation.id,
            html_url: pr.html_url.clone(),
            owner_type: repository.owner.kind.clone().unwrap_or_else(|| "Organization".to_string()),
        })
    }

    pub fn full_name(&self) -> String { format!("{}/{}", self.owner, self.repo) }

    pub fn is_fork(&self) -> bool { self.head_repo_full_name != self.base_repo_full_name }
}
