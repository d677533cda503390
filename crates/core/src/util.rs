use std::path::{Component, Path, PathBuf};

/// Join two paths, only including the normal components.
pub fn join_normalized(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let mut out = base.as_ref().to_path_buf();
    out.extend(path.as_ref().components().filter(|v| matches!(v, Component::Normal(_))));
    out
}

/// Relative form of `path` using forward slashes, with `.` and `..` components dropped.
/// Returns an empty string for the repository root.
pub fn normalize_relative(path: &str) -> String {
    Path::new(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether the repository-relative `path` lies inside the working directory `dir`
/// (as returned by [`normalize_relative`]).
pub fn is_within(dir: &str, path: &str) -> bool {
    dir.is_empty() || path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// Truncate `value` to at most `max` characters, returning whether it was cut.
pub fn truncate_chars(value: &str, max: usize) -> (&str, bool) {
    match value.char_indices().nth(max) {
        Some((idx, _)) => (&value[..idx], true),
        None => (value, false),
    }
}
