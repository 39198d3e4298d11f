//! Reconciliation of two entry collections.
//!
//! [`compare`] indexes side B once and walks side A once, so the cost is
//! linear in both sides. Every A entry ends up in exactly one of only-in-A,
//! modified or identical; every B entry that no A entry claimed is only-in-B.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::accessor::{self, SerializeOptions, SerializedEntry};
use crate::matcher::{MatchIndex, MatchMethod};
use crate::models::{Entry, EntryRef, FieldName};

/// One side of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    A,
    B,
}

/// A field whose string value differs between the two sides.
///
/// Values of protected fields are masked; the comparison itself always
/// ran on the real values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub value_a: String,
    pub value_b: String,
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeDiff {
    pub last_mod_a: Option<NaiveDateTime>,
    pub last_mod_b: Option<NaiveDateTime>,
    pub newer_in: Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryChange {
    /// Present only in B.
    Added,
    /// Present only in A.
    Removed,
    /// Present in both with different sizes.
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryDiff {
    pub name: String,
    pub change: BinaryChange,
    pub size_a: Option<usize>,
    pub size_b: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryDiff {
    pub count_a: usize,
    pub count_b: usize,
}

/// All differences between two matched entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryDiff {
    pub field_diffs: Vec<FieldDiff>,
    pub time_diff: Option<TimeDiff>,
    pub binary_diffs: Vec<BinaryDiff>,
    pub history_diff: Option<HistoryDiff>,
}

impl EntryDiff {
    pub fn is_empty(&self) -> bool {
        self.field_diffs.is_empty()
            && self.time_diff.is_none()
            && self.binary_diffs.is_empty()
            && self.history_diff.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifiedEntry {
    pub entry_a: SerializedEntry,
    pub entry_b: SerializedEntry,
    #[serde(flatten)]
    pub diff: EntryDiff,
    pub matched_by_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdenticalEntry {
    pub uuid: String,
    pub matched_by_fallback: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub total_a: usize,
    pub total_b: usize,
    pub only_in_a: usize,
    pub only_in_b: usize,
    pub modified: usize,
    pub identical: usize,
}

/// Result of [`compare`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub only_in_a: Vec<SerializedEntry>,
    pub only_in_b: Vec<SerializedEntry>,
    pub modified: Vec<ModifiedEntry>,
    pub identical: Vec<IdenticalEntry>,
    pub summary: DiffSummary,
}

/// Compare two entry collections.
pub fn compare(a: &[EntryRef<'_>], b: &[EntryRef<'_>]) -> DiffReport {
    let index = MatchIndex::new(b);
    let mut seen = vec![false; b.len()];
    let mut report = DiffReport::default();

    for entry_a in a {
        let Some((position, method)) = index.lookup(entry_a) else {
            report
                .only_in_a
                .push(accessor::serialize(entry_a, SerializeOptions::MASKED));
            continue;
        };

        let entry_b = index.get(position);
        let matched_by_fallback = method == MatchMethod::TitleUsername;
        if matched_by_fallback {
            tracing::warn!(
                "Entry {:?} matched by title+username fallback (uuids differ: {} vs {})",
                entry_a.title(),
                entry_a.uuid,
                entry_b.uuid
            );
        }
        seen[position] = true;

        let diff = diff_entries(entry_a, entry_b);
        if diff.is_empty() {
            report.identical.push(IdenticalEntry {
                uuid: entry_a.uuid.to_string(),
                matched_by_fallback,
            });
        } else {
            report.modified.push(ModifiedEntry {
                entry_a: accessor::serialize(entry_a, SerializeOptions::MASKED),
                entry_b: accessor::serialize(entry_b, SerializeOptions::MASKED),
                diff,
                matched_by_fallback,
            });
        }
    }

    report.only_in_b = b
        .iter()
        .zip(&seen)
        .filter(|&(_, &was_seen)| !was_seen)
        .map(|(entry, _)| accessor::serialize(entry, SerializeOptions::MASKED))
        .collect();

    report.summary = DiffSummary {
        total_a: a.len(),
        total_b: b.len(),
        only_in_a: report.only_in_a.len(),
        only_in_b: report.only_in_b.len(),
        modified: report.modified.len(),
        identical: report.identical.len(),
    };

    tracing::info!(
        "Compared {} vs {} entries: {} only in A, {} only in B, {} modified, {} identical",
        a.len(),
        b.len(),
        report.summary.only_in_a,
        report.summary.only_in_b,
        report.summary.modified,
        report.summary.identical
    );

    report
}

/// Entries of `a` that have no counterpart in `b`, in `a` order.
///
/// This is the only-in-A classification of [`compare`] without building
/// the report.
pub fn unmatched<'s, 'a>(a: &'s [EntryRef<'a>], b: &[EntryRef<'_>]) -> Vec<&'s EntryRef<'a>> {
    let index = MatchIndex::new(b);
    a.iter().filter(|e| index.lookup(e).is_none()).collect()
}

/// Compute every difference between two matched entries.
pub fn diff_entries(a: &Entry, b: &Entry) -> EntryDiff {
    EntryDiff {
        field_diffs: diff_fields(a, b),
        time_diff: diff_times(a, b),
        binary_diffs: diff_binaries(a, b),
        history_diff: diff_history(a, b),
    }
}

fn diff_fields(a: &Entry, b: &Entry) -> Vec<FieldDiff> {
    let names: BTreeSet<&FieldName> = a.fields.keys().chain(b.fields.keys()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let value_a = a.field_as_string(name);
            let value_b = b.field_as_string(name);
            if value_a == value_b {
                return None;
            }

            let protected = a.is_protected(name) || b.is_protected(name);
            let render = |value: &str| {
                if protected {
                    accessor::mask(value)
                } else {
                    value.to_string()
                }
            };

            Some(FieldDiff {
                field: name.as_str().to_string(),
                value_a: render(value_a),
                value_b: render(value_b),
                protected,
            })
        })
        .collect()
}

fn diff_times(a: &Entry, b: &Entry) -> Option<TimeDiff> {
    let last_mod_a = a.times.last_modification;
    let last_mod_b = b.times.last_modification;
    if last_mod_a == last_mod_b {
        return None;
    }

    // `None` orders before any timestamp, so a missing time counts as oldest.
    let newer_in = if last_mod_a > last_mod_b {
        Side::A
    } else {
        Side::B
    };

    Some(TimeDiff {
        last_mod_a,
        last_mod_b,
        newer_in,
    })
}

fn diff_binaries(a: &Entry, b: &Entry) -> Vec<BinaryDiff> {
    let names: BTreeSet<&String> = a.binaries.keys().chain(b.binaries.keys()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let size_a = a.binaries.get(name).map(Vec::len);
            let size_b = b.binaries.get(name).map(Vec::len);
            let change = match (size_a, size_b) {
                (None, Some(_)) => BinaryChange::Added,
                (Some(_), None) => BinaryChange::Removed,
                (Some(x), Some(y)) if x != y => BinaryChange::Modified,
                _ => return None,
            };
            Some(BinaryDiff {
                name: name.clone(),
                change,
                size_a,
                size_b,
            })
        })
        .collect()
}

fn diff_history(a: &Entry, b: &Entry) -> Option<HistoryDiff> {
    let count_a = a.history.len();
    let count_b = b.history.len();
    (count_a != count_b).then_some(HistoryDiff { count_a, count_b })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn login(title: &str, user: &str, hour: u32) -> Entry {
        let mut entry = Entry::new()
            .with_field(FieldName::Title, title)
            .with_field(FieldName::UserName, user)
            .with_protected_field(FieldName::Password, "secret");
        entry.times.last_modification = Some(at(hour));
        entry
    }

    fn refs(entries: &[Entry]) -> Vec<EntryRef<'_>> {
        entries.iter().map(|e| EntryRef::new(e, Vec::new())).collect()
    }

    #[test]
    fn equal_entries_are_identical() {
        let a = login("Mail", "me", 9);
        let b = a.clone();
        let (side_a, side_b) = (vec![a], vec![b]);
        let report = compare(&refs(&side_a), &refs(&side_b));

        assert_eq!(report.summary.identical, 1);
        assert_eq!(report.summary.modified, 0);
        assert!(!report.identical[0].matched_by_fallback);
    }

    #[test]
    fn protected_differences_are_masked_in_the_report() {
        let a = login("Mail", "me", 9);
        let mut b = a.clone();
        b.set_protected_field(FieldName::Password, "changed");
        let (side_a, side_b) = (vec![a], vec![b]);

        let report = compare(&refs(&side_a), &refs(&side_b));
        let modified = &report.modified[0];
        assert_eq!(
            modified.diff.field_diffs,
            vec![FieldDiff {
                field: "Password".into(),
                value_a: accessor::MASK.into(),
                value_b: accessor::MASK.into(),
                protected: true,
            }]
        );
        assert_eq!(modified.entry_a.field("Password"), accessor::MASK);
    }

    #[test]
    fn field_union_reports_one_sided_custom_fields() {
        let a = login("Mail", "me", 9).with_field(FieldName::Custom("PIN".into()), "12");
        let mut b = a.clone();
        b.fields.remove(&FieldName::Custom("PIN".into()));
        b.set_field(FieldName::Custom("Backup".into()), "yes");

        let diff = diff_entries(&a, &b);
        let fields: Vec<_> = diff
            .field_diffs
            .iter()
            .map(|d| (d.field.as_str(), d.value_a.as_str(), d.value_b.as_str()))
            .collect();
        assert_eq!(fields, vec![("Backup", "", "yes"), ("PIN", "12", "")]);
    }

    #[test]
    fn time_diff_reports_newer_side() {
        let a = login("Mail", "me", 9);
        let mut b = a.clone();
        b.times.last_modification = Some(at(10));
        assert_eq!(diff_entries(&a, &b).time_diff.unwrap().newer_in, Side::B);
        assert_eq!(diff_entries(&b, &a).time_diff.unwrap().newer_in, Side::A);

        b.times.last_modification = None;
        assert_eq!(diff_entries(&a, &b).time_diff.unwrap().newer_in, Side::A);
    }

    #[test]
    fn binaries_compare_by_size_only() {
        let mut a = login("Mail", "me", 9);
        let mut b = a.clone();
        a.binaries.insert("same.txt".into(), b"abc".to_vec());
        b.binaries.insert("same.txt".into(), b"xyz".to_vec());
        a.binaries.insert("gone.txt".into(), vec![1]);
        b.binaries.insert("new.txt".into(), vec![1, 2]);
        a.binaries.insert("grown.txt".into(), vec![1]);
        b.binaries.insert("grown.txt".into(), vec![1, 2, 3]);

        let changes: Vec<_> = diff_entries(&a, &b)
            .binary_diffs
            .into_iter()
            .map(|d| (d.name, d.change))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("gone.txt".to_string(), BinaryChange::Removed),
                ("grown.txt".to_string(), BinaryChange::Modified),
                ("new.txt".to_string(), BinaryChange::Added),
            ]
        );
    }

    #[test]
    fn history_length_difference_marks_modified() {
        let a = login("Mail", "me", 9);
        let mut b = a.clone();
        b.history.push(a.clone());
        let (side_a, side_b) = (vec![a], vec![b]);

        let report = compare(&refs(&side_a), &refs(&side_b));
        assert_eq!(
            report.modified[0].diff.history_diff,
            Some(HistoryDiff {
                count_a: 0,
                count_b: 1
            })
        );
    }

    #[test]
    fn partitions_both_sides() {
        let shared = login("Shared", "me", 9);
        let changed_a = login("Changed", "me", 9);
        let mut changed_b = changed_a.clone();
        changed_b.set_field(FieldName::Url, "https://changed.example");
        let side_a = vec![shared.clone(), changed_a, login("Only A", "me", 9)];
        let side_b = vec![login("Only B", "me", 9), changed_b, shared];

        let report = compare(&refs(&side_a), &refs(&side_b));
        assert_eq!(
            report.summary,
            DiffSummary {
                total_a: 3,
                total_b: 3,
                only_in_a: 1,
                only_in_b: 1,
                modified: 1,
                identical: 1,
            }
        );
        assert_eq!(report.only_in_a[0].field("Title"), "Only A");
        assert_eq!(report.only_in_b[0].field("Title"), "Only B");
    }

    #[test]
    fn compare_is_idempotent() {
        let side_a = vec![login("One", "me", 9), login("Two", "me", 9)];
        let mut side_b = vec![side_a[0].clone(), login("Three", "me", 9)];
        side_b[0].times.last_modification = Some(at(11));

        let (ra, rb) = (refs(&side_a), refs(&side_b));
        assert_eq!(compare(&ra, &rb).summary, compare(&ra, &rb).summary);
    }

    #[test]
    fn unmatched_lists_only_in_a_entries() {
        let side_a = vec![login("One", "me", 9), login("Two", "me", 9)];
        let side_b = vec![login("one", "ME", 3)];
        let (ra, rb) = (refs(&side_a), refs(&side_b));

        let titles: Vec<_> = unmatched(&ra, &rb).iter().map(|e| e.entry.title()).collect();
        assert_eq!(titles, vec!["Two"]);
    }
}
