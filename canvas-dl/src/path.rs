//! Mapping Canvas names onto local file system paths.

use std::path::{Path, PathBuf};

/// Characters which are not allowed in file names on at least one common platform, and the
/// look-alike characters we substitute for them.
const REPLACEMENTS: [(char, char); 9] = [
    ('\\', '⧹'),
    ('/', '⧸'),
    ('|', '￨'),
    (':', '꞉'),
    ('*', '∗'),
    ('?', '？'),
    ('"', '″'),
    ('<', '﹤'),
    ('>', '﹥'),
];

/// Make `s` safe to use as a single path component.
pub fn normalize_for_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            REPLACEMENTS
                .iter()
                .find(|(illegal, _)| *illegal == c)
                .map_or(c, |(_, replacement)| *replacement)
        })
        .collect()
}

/// The local path where a file from a course folder is saved.
///
/// `folder` is the full, `/`-separated name of the folder as reported by Canvas (e.g.
/// `course files/Week 1`). Each component is normalized separately, and components which would
/// escape `root` (`.`, `..`, or empty) are dropped.
pub fn local_path(
    root: impl AsRef<Path>,
    course: impl ToString,
    folder: &str,
    filename: &str,
) -> PathBuf {
    let mut path = root.as_ref().join(course.to_string());
    for component in folder.split('/') {
        if let Some(component) = safe_component(component) {
            path.push(component);
        }
    }
    path.push(safe_component(filename).unwrap_or_else(|| "_".into()));
    path
}

fn safe_component(s: &str) -> Option<String> {
    match s.trim() {
        "" | "." | ".." => None,
        _ => Some(normalize_for_filename(s)),
    }
}
