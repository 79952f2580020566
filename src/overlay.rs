//! Path-scoped override blocks (`<location path="...">`).

use crate::markup::MarkupNode;

/// Raw markup of one section as it appeared in a document.
#[derive(Debug, Clone)]
pub(crate) struct RawSection {
    /// `/`-separated section path.
    pub(crate) path: String,
    pub(crate) node: MarkupNode,
    /// Document the markup came from.
    pub(crate) file: String,
}

#[derive(Debug, Clone)]
pub struct Overlay {
    path: String,
    allow_override: bool,
    pub(crate) sections: Vec<RawSection>,
    line: usize,
}

impl Overlay {
    pub(crate) fn new(path: impl Into<String>, allow_override: bool, line: usize) -> Self {
        Self {
            path: path.into(),
            allow_override,
            sections: Vec::new(),
            line,
        }
    }

    /// Virtual path relative to the declaring document.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn allow_override(&self) -> bool {
        self.allow_override
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn section_paths(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.path.as_str())
    }

    /// Whether the overlay applies to `path`: the overlay's path must be a
    /// prefix of it ending on a segment boundary.
    pub fn matches(&self, path: &str) -> bool {
        let ours = self.path.as_bytes();
        let theirs = path.as_bytes();
        if ours.is_empty() || ours.len() > theirs.len() {
            return false;
        }
        if !theirs[..ours.len()].eq_ignore_ascii_case(ours) {
            return false;
        }
        ours.len() == theirs.len() || theirs[ours.len()] == b'/'
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlayCollection {
    overlays: Vec<Overlay>,
}

impl OverlayCollection {
    pub(crate) fn push(&mut self, overlay: Overlay) {
        self.overlays.push(overlay);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.iter()
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Overlay> {
        self.overlays
            .iter()
            .find(|o| o.path.eq_ignore_ascii_case(path))
    }

    /// Longest overlay path that is a segment prefix of `path`.
    pub fn find_best(&self, path: &str) -> Option<&Overlay> {
        self.find_best_below(path, 0)
    }

    /// Like [`find_best`](Self::find_best), ignoring overlays whose path is
    /// not longer than `floor` bytes.
    pub(crate) fn find_best_below(&self, path: &str, floor: usize) -> Option<&Overlay> {
        self.overlays
            .iter()
            .filter(|o| o.path.len() > floor && o.matches(path))
            .max_by_key(|o| o.path.len())
    }
}

/// Canonical relative path: no leading `./` or `/`, no trailing `/`,
/// backslashes folded to `/`.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest.to_string();
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest.to_string();
        } else {
            break;
        }
    }
    while p.ends_with('/') {
        p.pop();
    }
    if p == "." { String::new() } else { p }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(paths: &[&str]) -> OverlayCollection {
        let mut c = OverlayCollection::default();
        for p in paths {
            c.push(Overlay::new(*p, true, 1));
        }
        c
    }

    #[test]
    fn longest_prefix_wins() {
        let c = collection(&["a", "a/b"]);
        assert_eq!(c.find_best("a/b/c").unwrap().path(), "a/b");
        assert_eq!(c.find_best("a/x").unwrap().path(), "a");
        assert!(c.find_best("z").is_none());
    }

    #[test]
    fn exact_length_match_needs_no_boundary() {
        let c = collection(&["a/b"]);
        assert_eq!(c.find_best("a/b").unwrap().path(), "a/b");
    }

    #[test]
    fn segment_boundary_is_required() {
        let c = collection(&["app"]);
        assert!(c.find_best("application").is_none());
        assert!(c.find_best("app/x").is_some());
    }

    #[test]
    fn matching_ignores_ascii_case() {
        let c = collection(&["Admin"]);
        assert!(c.find_best("admin/users").is_some());
        assert!(c.get("ADMIN").is_some());
    }

    #[test]
    fn empty_path_never_matches() {
        let c = collection(&["", "a"]);
        assert!(c.find_best("").is_none());
        assert_eq!(c.find_best("a").unwrap().path(), "a");
    }

    #[test]
    fn floor_skips_shallow_overlays() {
        let c = collection(&["app", "app/admin"]);
        assert_eq!(c.find_best_below("app/admin/x", 3).unwrap().path(), "app/admin");
        assert!(c.find_best_below("app/other", 3).is_none());
    }

    #[test]
    fn normalize_strips_relative_markers() {
        assert_eq!(normalize_path("./a/b/"), "a/b");
        assert_eq!(normalize_path("/a"), "a");
        assert_eq!(normalize_path("a\\b"), "a/b");
        assert_eq!(normalize_path("."), "");
        assert_eq!(normalize_path(""), "");
    }
}
