use std::{path::Path, sync::OnceLock};

use anyhow::Result;
use regex::Regex;
use serde::Deserialize;

use crate::{GitHubApi, PER_PAGE, paginate};

const SUPPORTED_EXTENSIONS: [&str; 9] = ["js", "ts", "tsx", "jsx", "json", "yaml", "yml", "css", "md"];

pub const ESLINT_CONFIG_FILES: [&str; 10] = [
    ".eslintrc",
    ".eslintrc.js",
    ".eslintrc.cjs",
    ".eslintrc.json",
    ".eslintrc.yaml",
    ".eslintrc.yml",
    "eslint.config.js",
    "eslint.config.mjs",
    "eslint.config.cjs",
    "eslint.config.ts",
];

pub const PRETTIER_CONFIG_FILES: [&str; 11] = [
    ".prettierrc",
    ".prettierrc.js",
    ".prettierrc.cjs",
    ".prettierrc.json",
    ".prettierrc.yaml",
    ".prettierrc.yml",
    ".prettierrc.toml",
    "prettier.config.js",
    "prettier.config.cjs",
    "prettier.config.mjs",
    "prettier.config.ts",
];

/// Whether a changed file is worth running the fixers for. README files never are.
pub fn is_supported_file(filename: &str) -> bool {
    static README: OnceLock<Regex> = OnceLock::new();
    let readme = README.get_or_init(|| Regex::new(r"(?i)^readme(\.|$)").unwrap());
    let path = Path::new(filename);
    let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if readme.is_match(base) {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

pub async fn list_pull_request_files(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    number: u64,
) -> Result<Vec<String>> {
    let files = paginate(PER_PAGE, move |page| {
        api.list_pull_request_files(owner, repo, number, page, PER_PAGE)
    })
    .await?;
    Ok(files.into_iter().map(|f| f.filename).collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepoTooling {
    pub has_eslint: bool,
    pub has_prettier: bool,
}

impl RepoTooling {
    pub fn any(&self) -> bool { self.has_eslint || self.has_prettier }
}

#[derive(Deserialize)]
struct PackageJson {
    #[serde(default)]
    scripts: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, rename = "eslintConfig")]
    eslint_config: Option<serde_json::Value>,
    #[serde(default)]
    prettier: Option<serde_json::Value>,
}

fn truthy(value: &Option<serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => false,
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Tooling signals found in `package.json`.
fn package_json_tooling(raw: &str) -> Result<RepoTooling, serde_json::Error> {
    let package: PackageJson = serde_json::from_str(raw)?;
    let scripts = package
        .scripts
        .iter()
        .flat_map(|s| s.values())
        .filter_map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    Ok(RepoTooling {
        has_eslint: scripts.contains("eslint") || truthy(&package.eslint_config),
        has_prettier: scripts.contains("prettier") || truthy(&package.prettier),
    })
}

async fn has_any_file(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    sha: &str,
    paths: &[&str],
) -> Result<bool> {
    for path in paths {
        if api.get_content(owner, repo, path, sha).await?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Detect ESLint and Prettier from config files in the repository root or from
/// `package.json`. Any single signal is enough for a tool.
pub async fn detect_repo_tooling(
    api: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    sha: &str,
) -> Result<RepoTooling> {
    let package_json = api.get_content(owner, repo, "package.json", sha).await?;
    let mut tooling = RepoTooling {
        has_eslint: has_any_file(api, owner, repo, sha, &ESLINT_CONFIG_FILES).await?,
        has_prettier: has_any_file(api, owner, repo, sha, &PRETTIER_CONFIG_FILES).await?,
    };
    if let Some(raw) = package_json {
        match package_json_tooling(&raw) {
            Ok(found) => {
                tooling.has_eslint |= found.has_eslint;
                tooling.has_prettier |= found.has_prettier;
            }
            Err(e) => {
                tracing::warn!("Failed to parse package.json in {}/{}@{}: {}", owner, repo, sha, e);
            }
        }
    }
    Ok(tooling)
}
