//! Recently opened scene files, read from Houdini's `file.history`.
//!
//! The history file is a single `HIP{...}` section of concatenated absolute
//! paths with no separators beyond the leading `/` of each path, so parsing
//! walks `/`-delimited fragments and cuts a path whenever one ends in
//! `.hip`.

use std::path::{Path, PathBuf};

/// Locate `file.history` under the newest `~/houdini*` preferences
/// directory, if any.
pub fn find_history_file() -> Option<PathBuf> {
    let home = std::env::home_dir()?;
    find_history_file_in(&home)
}

fn find_history_file_in(home: &Path) -> Option<PathBuf> {
    let mut versions: Vec<PathBuf> = std::fs::read_dir(home)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("houdini"))
        })
        .collect();
    versions.sort();

    let history = versions.pop()?.join("file.history");
    history.exists().then_some(history)
}

/// Extract hip paths from `file.history` content: deduplicated, newest
/// first. Content without a leading `HIP{` section yields nothing.
pub fn parse_hip_history(content: &str) -> Vec<String> {
    let content: String = content.lines().collect();
    if !content.starts_with("HIP{") {
        return Vec::new();
    }
    let Some(end) = content[4..].find('}') else {
        return Vec::new();
    };
    let section = &content[4..4 + end];

    let mut paths = Vec::new();
    let mut current = String::new();
    for part in section.split('/') {
        if part.is_empty() {
            continue;
        }
        current.push('/');
        current.push_str(part);
        if current.ends_with(".hip") {
            paths.push(std::mem::take(&mut current));
        }
    }

    // Dedup preserving order, then newest first.
    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<String> = paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect();
    unique.reverse();
    unique
}

/// Convenience: locate, read and parse the history in one call. IO problems
/// degrade to an empty list.
pub fn recent_hip_files() -> Vec<String> {
    let Some(path) = find_history_file() else {
        return Vec::new();
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => parse_hip_history(&content),
        Err(e) => {
            tracing::debug!(path = %path.display(), "failed to read file.history: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_paths_newest_first() {
        let content = "HIP{/shots/seq_010/a.hip/shots/seq_020/b.hip}";
        assert_eq!(
            parse_hip_history(content),
            vec![
                "/shots/seq_020/b.hip".to_string(),
                "/shots/seq_010/a.hip".to_string(),
            ]
        );
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let content = "HIP{/a/x.hip/b/y.hip/a/x.hip}";
        // The list is reversed afterwards, so the oldest duplicate wins the
        // slot it first appeared in.
        assert_eq!(
            parse_hip_history(content),
            vec!["/b/y.hip".to_string(), "/a/x.hip".to_string()]
        );
    }

    #[test]
    fn survives_wrapped_lines() {
        // Houdini wraps the section across lines; newlines are not path
        // separators.
        let content = "HIP{/long/pa\nth/scene.hip}";
        assert_eq!(parse_hip_history(content), vec!["/long/path/scene.hip"]);
    }

    #[test]
    fn rejects_non_hip_content() {
        assert!(parse_hip_history("POSE{/a/x.bclip}").is_empty());
        assert!(parse_hip_history("HIP{/unterminated").is_empty());
        assert!(parse_hip_history("").is_empty());
    }
}
