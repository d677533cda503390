//! In-memory GitHub fakes recording every call.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    CheckRun, CheckRunUpdate, GitHubApi, GitHubApp, InstallationClient, IssueComment, NewCheckRun,
    NewCommitStatus, PullRequestFile,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListCheckRuns { git_ref: String },
    CreateCheckRun(NewCheckRun),
    UpdateCheckRun { id: u64, update: CheckRunUpdate },
    CreateCommitStatus { sha: String, status: NewCommitStatus },
    GetContent { path: String, git_ref: String },
    ListPullRequestFiles { number: u64, page: u32 },
    ListIssueComments { number: u64, page: u32 },
    CreateIssueComment { number: u64, body: String },
    UpdateIssueComment { comment_id: u64, body: String },
    WorkflowDispatch {
        owner: String,
        repo: String,
        workflow: String,
        git_ref: String,
        inputs: BTreeMap<String, String>,
    },
}

#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<Call>,
    pub check_runs: Vec<CheckRun>,
    pub next_id: u64,
    /// Repository files by path, returned by `get_content` for any ref.
    pub files: HashMap<String, String>,
    pub pr_files: Vec<String>,
    pub comments: Vec<IssueComment>,
    pub fail_checks: bool,
    pub fail_check_updates: bool,
    /// Updates of these check runs fail.
    pub failing_check_run_ids: HashSet<u64>,
    pub fail_commit_statuses: bool,
    pub fail_contents: bool,
    pub fail_comments: bool,
    pub fail_dispatch: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: vec![],
            check_runs: vec![],
            next_id: 1000,
            files: HashMap::new(),
            pr_files: vec![],
            comments: vec![],
            fail_checks: false,
            fail_check_updates: false,
            failing_check_run_ids: HashSet::new(),
            fail_commit_statuses: false,
            fail_contents: false,
            fail_comments: false,
            fail_dispatch: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeGitHub {
    state: Mutex<FakeState>,
}

fn page_of<T: Clone>(items: &[T], page: u32, per_page: u8) -> Vec<T> {
    let start = (page.saturating_sub(1) as usize) * per_page as usize;
    items.iter().skip(start).take(per_page as usize).cloned().collect()
}

impl FakeGitHub {
    pub fn new() -> Self { Self::default() }

    pub fn state(&self) -> MutexGuard<'_, FakeState> { self.state.lock().unwrap() }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.state().files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_pr_files(self, files: &[&str]) -> Self {
        self.state().pr_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<Call> { self.state().calls.clone() }

    /// Number of check-run create/update/list calls.
    pub fn check_run_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(c, Call::ListCheckRuns { .. } | Call::CreateCheckRun(_) | Call::UpdateCheckRun { .. })
            })
            .count()
    }

    pub fn created_check_runs(&self) -> Vec<NewCheckRun> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateCheckRun(run) => Some(run),
                _ => None,
            })
            .collect()
    }

    pub fn check_run_updates(&self) -> Vec<(u64, CheckRunUpdate)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UpdateCheckRun { id, update } => Some((id, update)),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<NewCommitStatus> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateCommitStatus { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn comment_bodies(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateIssueComment { body, .. } | Call::UpdateIssueComment { body, .. } => {
                    Some(body)
                }
                _ => None,
            })
            .collect()
    }

    pub fn dispatches(&self) -> Vec<BTreeMap<String, String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::WorkflowDispatch { inputs, .. } => Some(inputs),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn list_check_runs_for_ref(
        &self,
        _owner: &str,
        _repo: &str,
        git_ref: &str,
        per_page: u8,
    ) -> Result<Vec<CheckRun>> {
        let mut state = self.state();
        state.calls.push(Call::ListCheckRuns { git_ref: git_ref.to_string() });
        if state.fail_checks {
            bail!("Resource not accessible by integration");
        }
        Ok(page_of(&state.check_runs, 1, per_page))
    }

    async fn create_check_run(&self, _owner: &str, _repo: &str, run: &NewCheckRun) -> Result<CheckRun> {
        let mut state = self.state();
        state.calls.push(Call::CreateCheckRun(run.clone()));
        if state.fail_checks {
            bail!("Resource not accessible by integration");
        }
        state.next_id += 1;
        let created = CheckRun { id: state.next_id, name: run.name.clone() };
        state.check_runs.push(created.clone());
        Ok(created)
    }

    async fn update_check_run(
        &self,
        _owner: &str,
        _repo: &str,
        check_run_id: u64,
        update: &CheckRunUpdate,
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::UpdateCheckRun { id: check_run_id, update: update.clone() });
        if state.fail_checks
            || state.fail_check_updates
            || state.failing_check_run_ids.contains(&check_run_id)
        {
            bail!("Resource not accessible by integration");
        }
        Ok(())
    }

    async fn create_commit_status(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
        status: &NewCommitStatus,
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::CreateCommitStatus { sha: sha.to_string(), status: status.clone() });
        if state.fail_commit_statuses {
            bail!("Validation Failed");
        }
        Ok(())
    }

    async fn get_content(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>> {
        let mut state = self.state();
        state.calls.push(Call::GetContent { path: path.to_string(), git_ref: git_ref.to_string() });
        if state.fail_contents {
            bail!("Server Error");
        }
        Ok(state.files.get(path).cloned())
    }

    async fn list_pull_request_files(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<PullRequestFile>> {
        let mut state = self.state();
        state.calls.push(Call::ListPullRequestFiles { number, page });
        Ok(page_of(&state.pr_files, page, per_page)
            .into_iter()
            .map(|filename| PullRequestFile { filename })
            .collect())
    }

    async fn list_issue_comments(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<IssueComment>> {
        let mut state = self.state();
        state.calls.push(Call::ListIssueComments { number, page });
        if state.fail_comments {
            bail!("Server Error");
        }
        Ok(page_of(&state.comments, page, per_page))
    }

    async fn create_issue_comment(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
        body: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::CreateIssueComment { number, body: body.to_string() });
        if state.fail_comments {
            bail!("Server Error");
        }
        state.next_id += 1;
        let id = state.next_id;
        state.comments.push(IssueComment { id, body: Some(body.to_string()) });
        Ok(())
    }

    async fn update_issue_comment(
        &self,
        _owner: &str,
        _repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::UpdateIssueComment { comment_id, body: body.to_string() });
        if state.fail_comments {
            bail!("Server Error");
        }
        if let Some(comment) = state.comments.iter_mut().find(|c| c.id == comment_id) {
            comment.body = Some(body.to_string());
        }
        Ok(())
    }

    async fn create_workflow_dispatch(
        &self,
        owner: &str,
        repo: &str,
        workflow: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::WorkflowDispatch {
            owner: owner.to_string(),
            repo: repo.to_string(),
            workflow: workflow.to_string(),
            git_ref: git_ref.to_string(),
            inputs: inputs.clone(),
        });
        if state.fail_dispatch {
            bail!("No ref found for: main");
        }
        Ok(())
    }
}

/// Hands out clients backed by one shared [`FakeGitHub`].
pub struct FakeApp {
    pub github: Arc<FakeGitHub>,
    pub fail: bool,
    pub requested: Mutex<Vec<u64>>,
}

impl FakeApp {
    pub fn new(github: Arc<FakeGitHub>) -> Self {
        Self { github, fail: false, requested: Mutex::new(vec![]) }
    }
}

pub const FAKE_TOKEN: &str = "ghs_faketoken";

#[async_trait]
impl GitHubApp for FakeApp {
    async fn installation_client(&self, installation_id: u64) -> Result<InstallationClient> {
        self.requested.lock().unwrap().push(installation_id);
        if self.fail {
            bail!("Failed to create access token for installation {installation_id}");
        }
        Ok(InstallationClient { token: FAKE_TOKEN.to_string(), api: self.github.clone() })
    }
}

/// `X-Hub-Signature-256` header value for `body`.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
