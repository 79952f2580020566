//! Allow/deny lists restricting what descendant documents may override.
//!
//! Locks an element declares never restrict the document that declares them;
//! they are carried into descendants by `Element::reset` and checked there.

/// The four lock lists, named after their reserved attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    AllAttributesExcept,
    AllElementsExcept,
    Attributes,
    Elements,
}

pub const LOCK_ITEM: &str = "lockItem";

impl LockKind {
    pub const ALL: [LockKind; 4] = [
        LockKind::AllAttributesExcept,
        LockKind::AllElementsExcept,
        LockKind::Attributes,
        LockKind::Elements,
    ];

    pub fn attribute_name(self) -> &'static str {
        match self {
            LockKind::AllAttributesExcept => "lockAllAttributesExcept",
            LockKind::AllElementsExcept => "lockAllElementsExcept",
            LockKind::Attributes => "lockAttributes",
            LockKind::Elements => "lockElements",
        }
    }

    pub fn from_attribute(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.attribute_name() == name)
    }

    pub fn targets_elements(self) -> bool {
        matches!(self, LockKind::AllElementsExcept | LockKind::Elements)
    }
}

/// Whether `name` is one of the reserved lock attributes.
pub fn is_lock_attribute(name: &str) -> bool {
    name == LOCK_ITEM || LockKind::from_attribute(name).is_some()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockList {
    names: Vec<String>,
    wildcard: bool,
}

impl LockList {
    pub fn contains(&self, name: &str) -> bool {
        self.wildcard || self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn insert(&mut self, name: &str) {
        if name == "*" {
            self.wildcard = true;
        } else if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }

    fn union(&mut self, other: &LockList) {
        self.wildcard |= other.wildcard;
        for n in &other.names {
            self.insert(n);
        }
    }

    fn intersect(&mut self, other: &LockList) {
        if other.wildcard {
            return;
        }
        if self.wildcard {
            *self = other.clone();
            return;
        }
        self.names.retain(|n| other.names.contains(n));
    }

    fn render(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if self.wildcard {
            parts.push("*");
        }
        parts.extend(self.names.iter().map(String::as_str));
        parts.join(",")
    }
}

/// Split a comma-separated lock attribute value.
pub fn split_names(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSets {
    all_attributes_except: Option<LockList>,
    all_elements_except: Option<LockList>,
    attributes: Option<LockList>,
    elements: Option<LockList>,
    item: bool,
}

impl LockSets {
    fn slot(&mut self, kind: LockKind) -> &mut Option<LockList> {
        match kind {
            LockKind::AllAttributesExcept => &mut self.all_attributes_except,
            LockKind::AllElementsExcept => &mut self.all_elements_except,
            LockKind::Attributes => &mut self.attributes,
            LockKind::Elements => &mut self.elements,
        }
    }

    pub fn list(&self, kind: LockKind) -> Option<&LockList> {
        match kind {
            LockKind::AllAttributesExcept => self.all_attributes_except.as_ref(),
            LockKind::AllElementsExcept => self.all_elements_except.as_ref(),
            LockKind::Attributes => self.attributes.as_ref(),
            LockKind::Elements => self.elements.as_ref(),
        }
    }

    /// Add an already validated name; creating the list if needed.
    pub(crate) fn insert(&mut self, kind: LockKind, name: &str) {
        self.slot(kind).get_or_insert_with(LockList::default).insert(name);
    }

    /// Declare an (initially empty) list. An empty "all except" list locks
    /// everything of its kind.
    pub(crate) fn declare(&mut self, kind: LockKind) {
        self.slot(kind).get_or_insert_with(LockList::default);
    }

    pub fn set_item(&mut self, locked: bool) {
        self.item = locked;
    }

    pub fn is_item_locked(&self) -> bool {
        self.item
    }

    pub fn is_empty(&self) -> bool {
        !self.item && LockKind::ALL.iter().all(|k| self.list(*k).is_none())
    }

    pub fn forbids_attribute(&self, name: &str) -> bool {
        self.item
            || self.attributes.as_ref().is_some_and(|l| l.contains(name))
            || self
                .all_attributes_except
                .as_ref()
                .is_some_and(|l| !l.contains(name))
    }

    pub fn forbids_element(&self, name: &str) -> bool {
        self.item
            || self.elements.as_ref().is_some_and(|l| l.contains(name))
            || self
                .all_elements_except
                .as_ref()
                .is_some_and(|l| !l.contains(name))
    }

    /// Fold another set into this one; the result forbids whatever either
    /// of them forbids.
    pub fn merge(&mut self, other: &LockSets) {
        self.item |= other.item;
        for kind in [LockKind::Attributes, LockKind::Elements] {
            if let Some(theirs) = other.list(kind) {
                self.slot(kind).get_or_insert_with(LockList::default).union(theirs);
            }
        }
        for kind in [LockKind::AllAttributesExcept, LockKind::AllElementsExcept] {
            if let Some(theirs) = other.list(kind) {
                let slot = self.slot(kind);
                if let Some(mine) = slot {
                    mine.intersect(theirs);
                } else {
                    *slot = Some(theirs.clone());
                }
            }
        }
    }

    /// Reserved attributes describing this set, in a stable order.
    pub fn to_attributes(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for kind in LockKind::ALL {
            if let Some(list) = self.list(kind) {
                out.push((kind.attribute_name().to_string(), list.render()));
            }
        }
        if self.item {
            out.push((LOCK_ITEM.to_string(), "true".to_string()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_list_forbids_listed_names_only() {
        let mut locks = LockSets::default();
        locks.insert(LockKind::Attributes, "timeout");
        assert!(locks.forbids_attribute("timeout"));
        assert!(!locks.forbids_attribute("host"));
        assert!(!locks.forbids_element("timeout"));
    }

    #[test]
    fn all_except_forbids_everything_else() {
        let mut locks = LockSets::default();
        locks.insert(LockKind::AllAttributesExcept, "host");
        assert!(!locks.forbids_attribute("host"));
        assert!(locks.forbids_attribute("port"));
    }

    #[test]
    fn empty_all_except_forbids_all() {
        let mut locks = LockSets::default();
        locks.declare(LockKind::AllElementsExcept);
        assert!(locks.forbids_element("anything"));
    }

    #[test]
    fn wildcard_matches_every_name() {
        let mut locks = LockSets::default();
        locks.insert(LockKind::Elements, "*");
        assert!(locks.forbids_element("limits"));
    }

    #[test]
    fn item_lock_forbids_everything() {
        let mut locks = LockSets::default();
        locks.set_item(true);
        assert!(locks.forbids_attribute("a"));
        assert!(locks.forbids_element("b"));
    }

    #[test]
    fn merge_unions_deny_lists() {
        let mut a = LockSets::default();
        a.insert(LockKind::Attributes, "x");
        let mut b = LockSets::default();
        b.insert(LockKind::Attributes, "y");
        a.merge(&b);
        assert!(a.forbids_attribute("x"));
        assert!(a.forbids_attribute("y"));
    }

    #[test]
    fn merge_intersects_except_lists() {
        let mut a = LockSets::default();
        a.insert(LockKind::AllAttributesExcept, "x");
        a.insert(LockKind::AllAttributesExcept, "y");
        let mut b = LockSets::default();
        b.insert(LockKind::AllAttributesExcept, "y");
        a.merge(&b);
        assert!(a.forbids_attribute("x"));
        assert!(!a.forbids_attribute("y"));
    }

    #[test]
    fn renders_reserved_attributes() {
        let mut locks = LockSets::default();
        locks.insert(LockKind::Attributes, "a");
        locks.insert(LockKind::Attributes, "b");
        locks.set_item(true);
        let attrs = locks.to_attributes();
        assert_eq!(
            attrs,
            vec![
                ("lockAttributes".to_string(), "a,b".to_string()),
                ("lockItem".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn split_trims_and_skips_empty() {
        let names: Vec<&str> = split_names(" a, b ,,c").collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn recognizes_reserved_names() {
        assert!(is_lock_attribute("lockItem"));
        assert!(is_lock_attribute("lockAllElementsExcept"));
        assert!(!is_lock_attribute("lock"));
    }
}
