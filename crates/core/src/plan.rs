use std::{fmt, time::Duration};

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
}

impl Plan {
    /// Every installation is currently on the free plan.
    pub fn for_repository(_installation_id: u64, _repo_full_name: &str) -> Self { Plan::Free }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "free",
        }
    }

    pub fn policy(self) -> PlanPolicy {
        match self {
            Plan::Free => PlanPolicy {
                plan: self,
                priority: 10,
                max_runtime: Duration::from_secs(900),
                allow_fix_commit: true,
            },
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanPolicy {
    pub plan: Plan,
    pub priority: u32,
    pub max_runtime: Duration,
    pub allow_fix_commit: bool,
}
