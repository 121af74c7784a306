//! Snapshot diff engine.
//!
//! Pure: compares two object sets of one environment by `object_id` and
//! classifies every difference. Objects present on both sides with an equal
//! `last_modified_at` are treated as unchanged even if other fields differ;
//! the remote only reports edits through that timestamp.

use std::collections::BTreeMap;

use metatrack_core::{Change, InvalidObject, ObjectId, TrackedObject};

/// Ordered changes that turn `orig` into `curr`.
///
/// Sorted ascending by `last_modified_at` of the relevant object, ties broken
/// by `object_id`.
pub fn diff(orig: &[TrackedObject], curr: &[TrackedObject]) -> Result<Vec<Change>, InvalidObject> {
    let before = index(orig)?;
    let after = index(curr)?;

    let mut changes = Vec::new();
    for (id, old) in &before {
        match after.get(id) {
            None => changes.push(Change::Deletion {
                object: (*old).clone(),
            }),
            Some(new) if new.last_modified_at == old.last_modified_at => {}
            Some(new) if new.full_name != old.full_name || new.file_path != old.file_path => {
                changes.push(Change::Rename {
                    old: (*old).clone(),
                    new: (*new).clone(),
                })
            }
            Some(new) => changes.push(Change::Modification {
                object: (*new).clone(),
            }),
        }
    }
    for (id, new) in &after {
        if !before.contains_key(id) {
            changes.push(Change::Addition {
                object: (*new).clone(),
            });
        }
    }

    changes.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));

    for change in &changes {
        tracing::info!(kind = %change.kind(), object = %change, "detected change");
        if let Change::Rename { old, new } = change {
            tracing::warn!(
                from = %old.full_name,
                to = %new.full_name,
                "rename detected; deploys cannot rename in place and will delete then re-add"
            );
        }
    }
    Ok(changes)
}

fn index(objects: &[TrackedObject]) -> Result<BTreeMap<&ObjectId, &TrackedObject>, InvalidObject> {
    let mut out = BTreeMap::new();
    for obj in objects {
        if obj.object_id.0.is_empty() {
            return Err(InvalidObject::new(None, "empty object_id"));
        }
        if obj.full_name.is_empty() {
            return Err(InvalidObject::new(Some(&obj.object_id.0), "empty full_name"));
        }
        if out.insert(&obj.object_id, obj).is_some() {
            return Err(InvalidObject::new(
                Some(&obj.object_id.0),
                "object_id occurs more than once in one snapshot",
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use metatrack_core::{ChangeKind, EnvironmentName};
    use rstest::rstest;

    fn obj(id: &str, name: &str, minute: u32) -> TrackedObject {
        TrackedObject {
            object_id: ObjectId::from(id),
            object_type: "ApexClass".into(),
            full_name: name.into(),
            file_path: format!("classes/{name}.cls"),
            last_modified_by: None,
            last_modified_by_id: None,
            last_modified_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            created_by: None,
            created_at: None,
            namespace_prefix: None,
            manageable_state: None,
            environment: EnvironmentName::from("dev"),
        }
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let set = vec![obj("1", "A", 0), obj("2", "B", 1)];
        assert!(diff(&set, &set).unwrap().is_empty());
    }

    #[test]
    fn classifies_every_kind() {
        let orig = vec![obj("1", "Kept", 0), obj("2", "Edited", 0), obj("3", "Old", 0), obj("4", "Gone", 0)];
        let curr = vec![obj("1", "Kept", 0), obj("2", "Edited", 5), obj("3", "New", 6), obj("5", "Fresh", 7)];
        let kinds: Vec<_> = diff(&orig, &curr).unwrap().iter().map(Change::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChangeKind::Deletion,
                ChangeKind::Modification,
                ChangeKind::Rename,
                ChangeKind::Addition
            ]
        );
    }

    #[test]
    fn equal_timestamp_hides_other_field_changes() {
        let orig = vec![obj("1", "A", 3)];
        let mut changed = obj("1", "Renamed", 3);
        changed.last_modified_by = Some("Someone".into());
        assert!(diff(&orig, &[changed]).unwrap().is_empty());
    }

    #[test]
    fn ties_break_on_object_id() {
        let curr = vec![obj("b", "B", 1), obj("a", "A", 1), obj("c", "C", 0)];
        let ids: Vec<_> = diff(&[], &curr)
            .unwrap()
            .iter()
            .map(|c| c.object().object_id.0.clone())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn deletion_orders_by_old_timestamp() {
        let orig = vec![obj("1", "Gone", 30)];
        let curr = vec![obj("2", "Fresh", 10)];
        let kinds: Vec<_> = diff(&orig, &curr).unwrap().iter().map(Change::kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Addition, ChangeKind::Deletion]);
    }

    #[test]
    fn path_only_change_is_a_rename() {
        let orig = vec![obj("1", "A", 0)];
        let mut moved = obj("1", "A", 1);
        moved.file_path = "classes/sub/A.cls".into();
        let changes = diff(&orig, &[moved]).unwrap();
        assert_eq!(changes[0].kind(), ChangeKind::Rename);
    }

    #[rstest]
    #[case(obj("", "A", 0), "empty object_id")]
    #[case(obj("1", "", 0), "empty full_name")]
    fn invalid_records_are_rejected(#[case] bad: TrackedObject, #[case] reason: &str) {
        let err = diff(&[], &[bad]).unwrap_err();
        assert_eq!(err.reason, reason);
    }

    #[test]
    fn duplicate_ids_within_one_side_are_rejected() {
        let err = diff(&[obj("1", "A", 0), obj("1", "B", 1)], &[]).unwrap_err();
        assert_eq!(err.object_id.as_deref(), Some("1"));
    }
}
