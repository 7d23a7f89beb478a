//! Snapshot diffing for the audit trail.

use std::collections::{BTreeMap, BTreeSet};

use crate::record::{Change, LAST_UPDATED_AT_FIELD, LAST_UPDATED_BY_FIELD};

/// Bookkeeping fields stamped on every save; excluded from diffs so a save
/// that changes nothing user-visible produces no history entry.
const UNTRACKED_FIELDS: &[&str] = &[LAST_UPDATED_AT_FIELD, LAST_UPDATED_BY_FIELD];

fn trimmed_or_none(value: Option<&String>) -> Option<&str> {
    match value {
        Some(v) => {
            let t = v.trim();
            if t.is_empty() {
                None
            } else {
                Some(t)
            }
        }
        None => None,
    }
}

/// Compare two field snapshots. A key is recorded when its trimmed values
/// differ; absent and empty-after-trim count as "no value". The recorded
/// `from`/`to` carry the raw, untrimmed originals.
pub fn diff_snapshots(
    previous: &BTreeMap<String, String>,
    next: &BTreeMap<String, String>,
) -> BTreeMap<String, Change> {
    let keys: BTreeSet<&String> = previous.keys().chain(next.keys()).collect();
    let mut changes = BTreeMap::new();
    for key in keys {
        if UNTRACKED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let old = previous.get(key);
        let new = next.get(key);
        if trimmed_or_none(old) != trimmed_or_none(new) {
            changes.insert(
                key.clone(),
                Change {
                    from: old.cloned(),
                    to: new.cloned(),
                },
            );
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let prev = snapshot(&[("last_known_location", "New York")]);
        assert!(diff_snapshots(&prev, &prev.clone()).is_empty());
    }

    #[test]
    fn changed_value_records_raw_from_and_to() {
        let prev = snapshot(&[("last_known_location", "New York")]);
        let next = snapshot(&[("last_known_location", "Philadelphia")]);
        let changes = diff_snapshots(&prev, &next);
        let change = &changes["last_known_location"];
        assert_eq!(change.from.as_deref(), Some("New York"));
        assert_eq!(change.to.as_deref(), Some("Philadelphia"));
    }

    #[test]
    fn whitespace_only_difference_is_ignored() {
        let prev = snapshot(&[("last_known_location", "New York")]);
        let next = snapshot(&[("last_known_location", " New York   ")]);
        assert!(diff_snapshots(&prev, &next).is_empty());
    }

    #[test]
    fn blank_to_spaces_is_ignored() {
        let prev = snapshot(&[("origin", "")]);
        let next = snapshot(&[("origin", "    ")]);
        assert!(diff_snapshots(&prev, &next).is_empty());
    }

    #[test]
    fn absent_to_value_records_none_from() {
        let prev = snapshot(&[]);
        let next = snapshot(&[("gender", "Male")]);
        let changes = diff_snapshots(&prev, &next);
        let change = &changes["gender"];
        assert_eq!(change.from, None);
        assert_eq!(change.to.as_deref(), Some("Male"));
    }

    #[test]
    fn untrimmed_originals_survive_in_output() {
        let prev = snapshot(&[("name", " Dave ")]);
        let next = snapshot(&[("name", "  Bob  ")]);
        let changes = diff_snapshots(&prev, &next);
        let change = &changes["name"];
        assert_eq!(change.from.as_deref(), Some(" Dave "));
        assert_eq!(change.to.as_deref(), Some("  Bob  "));
    }

    #[test]
    fn bookkeeping_fields_are_not_tracked() {
        let prev = snapshot(&[("last_updated_at", "then"), ("last_updated_by", "a")]);
        let next = snapshot(&[("last_updated_at", "now"), ("last_updated_by", "b")]);
        assert!(diff_snapshots(&prev, &next).is_empty());
    }

    #[test]
    fn multiple_changed_fields_in_one_diff() {
        let prev = snapshot(&[("age", "8"), ("last_known_location", "New York")]);
        let next = snapshot(&[("age", "6"), ("last_known_location", "Philadelphia")]);
        let changes = diff_snapshots(&prev, &next);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["age"].from.as_deref(), Some("8"));
        assert_eq!(changes["age"].to.as_deref(), Some("6"));
    }
}
