use std::collections::BTreeMap;

/// Equality over the fields this controller manages. Server-assigned flags
/// are ignored unless an implementation says otherwise.
pub trait SemanticEq {
    fn semantic_eq(&self, other: &Self) -> bool;
}

/// Order-sensitive list equality. Two empty lists are always equal.
pub fn list_eq<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    list_eq_by(a, b, |x, y| x == y)
}

pub fn list_eq_by<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    if a.is_empty() && b.is_empty() {
        return true;
    }
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| eq(x, y))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Creating an object replaces it in place, so a changed object is only
    /// created and never deleted.
    CreateOrReplace,
    /// A changed object is deleted and then created again.
    DeleteThenCreate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    pub to_create: BTreeMap<String, T>,
    pub to_delete: Vec<String>,
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Computes the creates and deletes that converge `existing` on `required`.
/// `existing` must already be filtered down to objects this controller owns.
pub fn calculate_diff<T>(
    existing: &BTreeMap<String, T>,
    required: &BTreeMap<String, T>,
    mode: ReplaceMode,
) -> Diff<T>
where
    T: SemanticEq + Clone,
{
    let to_create = required
        .iter()
        .filter(|(name, req)| {
            existing
                .get(*name)
                .is_none_or(|exist| !exist.semantic_eq(req))
        })
        .map(|(name, req)| (name.clone(), req.clone()))
        .collect::<BTreeMap<_, _>>();

    let to_delete = existing
        .iter()
        .filter(|(name, exist)| {
            required
                .get(*name)
                .is_none_or(|req| !req.semantic_eq(exist))
        })
        .filter(|(name, _)| mode == ReplaceMode::DeleteThenCreate || !to_create.contains_key(*name))
        .map(|(name, _)| name.clone())
        .collect();

    Diff {
        to_create,
        to_delete,
    }
}

#[cfg(test)]
mod tests {
    use super::{ReplaceMode, SemanticEq, calculate_diff, list_eq};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        value: u32,
        flag: bool,
    }

    impl SemanticEq for Item {
        fn semantic_eq(&self, other: &Self) -> bool {
            self.value == other.value
        }
    }

    fn items(entries: &[(&str, u32)]) -> BTreeMap<String, Item> {
        entries
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    Item {
                        value: *value,
                        flag: false,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn list_eq_is_order_sensitive() {
        let empty: Vec<String> = Vec::new();
        assert!(list_eq(&empty, &[]));
        assert!(list_eq(&["a", "b"], &["a", "b"]));
        assert!(!list_eq(&["a", "b"], &["b", "a"]));
        assert!(!list_eq(&["a"], &["a", "a"]));
    }

    #[test]
    fn identical_state_yields_empty_diff() {
        let state = items(&[("a", 1), ("b", 2)]);
        for mode in [ReplaceMode::CreateOrReplace, ReplaceMode::DeleteThenCreate] {
            assert!(calculate_diff(&state, &state, mode).is_empty());
        }
    }

    #[test]
    fn single_added_or_removed_key() {
        let existing = items(&[("a", 1)]);
        let required = items(&[("a", 1), ("b", 2)]);

        let diff = calculate_diff(&existing, &required, ReplaceMode::CreateOrReplace);
        assert_eq!(diff.to_create.keys().collect::<Vec<_>>(), vec!["b"]);
        assert!(diff.to_delete.is_empty());

        let diff = calculate_diff(&required, &existing, ReplaceMode::CreateOrReplace);
        assert!(diff.to_create.is_empty());
        assert_eq!(diff.to_delete, vec!["b".to_string()]);
    }

    #[test]
    fn changed_object_is_created_but_not_deleted() {
        let existing = items(&[("a", 1), ("b", 2)]);
        let required = items(&[("a", 1), ("b", 3)]);
        let diff = calculate_diff(&existing, &required, ReplaceMode::CreateOrReplace);
        assert_eq!(diff.to_create["b"].value, 3);
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn changed_object_is_deleted_and_recreated_when_replace_is_unsupported() {
        let existing = items(&[("a", 1)]);
        let required = items(&[("a", 2)]);
        let diff = calculate_diff(&existing, &required, ReplaceMode::DeleteThenCreate);
        assert_eq!(diff.to_create["a"].value, 2);
        assert_eq!(diff.to_delete, vec!["a".to_string()]);
    }

    #[test]
    fn ignored_fields_do_not_produce_operations() {
        let existing = items(&[("a", 1)]);
        let mut required = existing.clone();
        if let Some(item) = required.get_mut("a") {
            item.flag = true;
        }
        assert!(calculate_diff(&existing, &required, ReplaceMode::CreateOrReplace).is_empty());
    }
}
