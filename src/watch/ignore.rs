//! Glob-style ignore patterns for watched paths

use std::path::Path;

pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/.git/**",
    "**/.DS_Store",
    "**/*.swp",
    "**/*.swx",
    "**/*~",
    "**/.#*",
];

/// Matches paths relative to a watched directory.
///
/// Supports `**` (any number of directories) and `*` (any run of characters
/// inside one segment). Patterns without wildcards match a whole segment.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<String>,
}

impl IgnoreMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().replace('\\', "/"))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_IGNORE_PATTERNS.iter().copied())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_ignored(&self, relative: &Path) -> bool {
        let path = relative.to_string_lossy().replace('\\', "/");
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return false;
        }
        let segments: Vec<&str> = path.split('/').collect();
        self.patterns.iter().any(|pattern| {
            if pattern.contains('*') {
                let parts: Vec<&str> = pattern.trim_start_matches('/').split('/').collect();
                // A trailing `/**` also covers the directory itself
                matches_segments(&parts, &segments)
                    || (parts.last() == Some(&"**")
                        && matches_segments(&parts[..parts.len() - 1], &segments))
            } else {
                segments.iter().any(|s| *s == pattern.as_str())
            }
        })
    }
}

fn matches_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| matches_segments(rest, &path[skip..])),
        Some((first, rest)) => match path.split_first() {
            Some((segment, path_rest)) => {
                matches_segment(first, segment) && matches_segments(rest, path_rest)
            }
            None => false,
        },
    }
}

fn matches_segment(pattern: &str, segment: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == segment;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !segment.starts_with(first) || segment.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &segment[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
