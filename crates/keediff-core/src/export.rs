//! Export of a comparison as a reviewable KeePass database.

use anyhow::{Context, Result};

use std::collections::HashMap;
use uuid::Uuid;

use crate::diff::{DiffReport, FieldDiff};
use crate::models::{parse_uuid, Database, Entry, FieldName, Group};

pub const MISSING_GROUP: &str = "Missing Entries";
pub const MODIFIED_GROUP: &str = "Modified Entries";
const UNKNOWN_DATE: &str = "unknown";

/// Build a database holding the A side of every difference.
///
/// Entries only in A are copied into [`MISSING_GROUP`]. Each modified entry
/// is copied into a subgroup of [`MODIFIED_GROUP`] named after B's last
/// modification date, with its notes replaced by the masked field diffs.
///
/// Entries are resolved in `a` including its recycle bin, so a report built
/// with recycled entries exports them too.
pub fn build_diff_database(a: &Database, report: &DiffReport) -> Result<Database> {
    let mut out = Database::new(format!("{} (differences)", a.root.name));
    let located = a.entries_with(true);
    let by_uuid: HashMap<Uuid, &Entry> = located.iter().map(|e| (e.uuid, e.entry)).collect();

    let mut missing = Group::new(MISSING_GROUP);
    for serialized in &report.only_in_a {
        if let Some(entry) = lookup(&by_uuid, &serialized.uuid) {
            missing.entries.push(entry.clone());
        }
    }

    let mut modified = Group::new(MODIFIED_GROUP);
    for change in &report.modified {
        let Some(entry) = lookup(&by_uuid, &change.entry_a.uuid) else {
            continue;
        };

        let date = change
            .entry_b
            .times
            .last_modification
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| UNKNOWN_DATE.to_string());

        let mut copy = entry.clone();
        copy.set_field(FieldName::Notes, differences_note(&change.diff.field_diffs)?);

        let index = match modified.children.iter().position(|g| g.name == date) {
            Some(index) => index,
            None => {
                modified.children.push(Group::new(date));
                modified.children.len() - 1
            }
        };
        modified.children[index].entries.push(copy);
    }

    tracing::info!(
        "Diff export: {} missing, {} modified",
        missing.entries.len(),
        report.modified.len()
    );

    out.root.children.push(missing);
    out.root.children.push(modified);
    Ok(out)
}

fn lookup<'a>(by_uuid: &HashMap<Uuid, &'a Entry>, uuid: &str) -> Option<&'a Entry> {
    let found = parse_uuid(uuid)
        .ok()
        .and_then(|parsed| by_uuid.get(&parsed).copied());
    if found.is_none() {
        tracing::warn!("Entry {} from the report is not in database A, not exported", uuid);
    }
    found
}

fn differences_note(diffs: &[FieldDiff]) -> Result<String> {
    let json = serde_json::to_string_pretty(diffs).context("Failed to render field differences")?;
    Ok(format!("Differences found:\n{json}"))
}
