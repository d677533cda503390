use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// File name of the per-repository configuration, looked up in the repository root
/// and again inside the configured working directory.
pub const CONFIG_FILE_NAME: &str = ".lint-autofix-pro.yml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoMode {
    #[default]
    Comment,
    Autocommit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AutocommitConfig {
    pub enabled: bool,
    pub commit_message: String,
    pub author_name: String,
    pub author_email: String,
}

impl Default for AutocommitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            commit_message: "chore: lint autofix".to_string(),
            author_name: "Lint Autofix Pro".to_string(),
            author_email: "lint-autofix-pro@users.noreply.github.com".to_string(),
        }
    }
}

/// Resolved configuration for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepoConfig {
    pub working_directory: String,
    pub run_prettier: bool,
    pub run_eslint: bool,
    pub strict: bool,
    pub max_files: usize,
    pub mode: RepoMode,
    pub autocommit: AutocommitConfig,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            working_directory: ".".to_string(),
            run_prettier: true,
            run_eslint: true,
            strict: false,
            max_files: 10,
            mode: RepoMode::Comment,
            autocommit: AutocommitConfig::default(),
        }
    }
}

impl RepoConfig {
    /// Parses a YAML document over the defaults.
    pub fn parse(input: &Value) -> Self { Self::parse_with_base(input, Self::default()) }

    /// Parses a YAML document, keeping values from `base` for every key that is absent
    /// or has the wrong type. Unknown keys are ignored.
    pub fn parse_with_base(input: &Value, base: RepoConfig) -> Self {
        let mut config = base;
        let Value::Mapping(_) = input else {
            return config;
        };
        if let Some(dir) = non_blank(input.get("working_directory")) {
            config.working_directory = dir;
        }
        if let Some(v) = input.get("run_prettier").and_then(Value::as_bool) {
            config.run_prettier = v;
        }
        if let Some(v) = input.get("run_eslint").and_then(Value::as_bool) {
            config.run_eslint = v;
        }
        if let Some(v) = input.get("strict").and_then(Value::as_bool) {
            config.strict = v;
        }
        if let Some(v) = input.get("max_files").and_then(Value::as_f64)
            && v.is_finite()
        {
            config.max_files = v.floor().max(1.0) as usize;
        }
        match input.get("mode").and_then(Value::as_str) {
            Some("comment") => config.mode = RepoMode::Comment,
            Some("autocommit") => config.mode = RepoMode::Autocommit,
            _ => {}
        }
        if let Some(auto @ Value::Mapping(_)) = input.get("autocommit") {
            if let Some(v) = auto.get("enabled").and_then(Value::as_bool) {
                config.autocommit.enabled = v;
            }
            if let Some(v) = non_blank(auto.get("commit_message")) {
                config.autocommit.commit_message = v;
            }
            if let Some(v) = non_blank(auto.get("author_name")) {
                config.autocommit.author_name = v;
            }
            if let Some(v) = non_blank(auto.get("author_email")) {
                config.autocommit.author_email = v;
            }
        }
        config
    }

    /// Parses raw file contents. Only a YAML syntax error is an error.
    pub fn from_yaml_str(raw: &str, base: RepoConfig) -> Result<Self, serde_yaml::Error> {
        let value: Value = serde_yaml::from_str(raw)?;
        Ok(Self::parse_with_base(&value, base))
    }

    pub fn autocommit_enabled(&self) -> bool {
        self.mode == RepoMode::Autocommit && self.autocommit.enabled
    }
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> RepoConfig { RepoConfig::from_yaml_str(raw, RepoConfig::default()).unwrap() }

    #[test]
    fn empty_documents_use_defaults() {
        for raw in ["{}", "null", "- a\n- b", "just a string"] {
            let config = parse(raw);
            assert_eq!(config, RepoConfig::default(), "input {raw:?}");
        }
        let config = RepoConfig::default();
        assert_eq!(config.working_directory, ".");
        assert!(config.run_prettier);
        assert!(config.run_eslint);
        assert!(!config.strict);
        assert_eq!(config.max_files, 10);
        assert_eq!(config.mode, RepoMode::Comment);
        assert!(!config.autocommit.enabled);
    }

    #[test]
    fn max_files_is_floored_with_minimum_one() {
        assert_eq!(parse("max_files: 3.7").max_files, 3);
        assert_eq!(parse("max_files: 0").max_files, 1);
        assert_eq!(parse("max_files: -5").max_files, 1);
        assert_eq!(parse("max_files: 25").max_files, 25);
        assert_eq!(parse("max_files: .inf").max_files, 10);
        assert_eq!(parse("max_files: many").max_files, 10);
    }

    #[test]
    fn parses_all_recognized_keys() {
        let config = parse(
            r#"
working_directory: packages/web
run_prettier: false
run_eslint: true
strict: true
mode: autocommit
unknown_key: 1
autocommit:
  enabled: true
  commit_message: "style: fix lint"
  author_name: "  "
  author_email: bot@example.com
"#,
        );
        assert_eq!(config.working_directory, "packages/web");
        assert!(!config.run_prettier);
        assert!(config.strict);
        assert_eq!(config.mode, RepoMode::Autocommit);
        assert!(config.autocommit_enabled());
        assert_eq!(config.autocommit.commit_message, "style: fix lint");
        assert_eq!(config.autocommit.author_name, "Lint Autofix Pro");
        assert_eq!(config.autocommit.author_email, "bot@example.com");
    }

    #[test]
    fn wrong_types_keep_base_values() {
        let base = parse("strict: true\nmode: autocommit");
        let config =
            RepoConfig::from_yaml_str("strict: \"yes\"\nmode: fix\nworking_directory: 3", base.clone())
                .unwrap();
        assert_eq!(config, base);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(RepoConfig::from_yaml_str("mode: [", RepoConfig::default()).is_err());
    }
}
