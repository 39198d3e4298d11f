//! Moving entries between databases.
//!
//! Two operations:
//! - [`import_entries`] copies entries in bulk from a source into a target,
//!   recreating each entry's group path in the target.
//! - [`transfer`] applies individual copy/overwrite requests in either
//!   direction between two databases.
//!
//! Copies keep the source uuid so that a later comparison still matches
//! them by identity. Ids that do not resolve are skipped and counted; they
//! never abort the batch.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::diff;
use crate::error::ReconcileError;
use crate::models::{self, Database, EntryRef};

/// Which source entries [`import_entries`] copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportMode {
    /// Only entries with no counterpart in the target.
    SkipExisting,
    /// Exactly the entries named by the caller.
    Selected,
    /// Every source entry.
    All,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::SkipExisting => "skip-existing",
            ImportMode::Selected => "selected",
            ImportMode::All => "all",
        }
    }
}

impl FromStr for ImportMode {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip-existing" => Ok(ImportMode::SkipExisting),
            "selected" => Ok(ImportMode::Selected),
            "all" => Ok(ImportMode::All),
            other => Err(ReconcileError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub imported: usize,
    /// Selected ids that were not found in the source.
    pub skipped: usize,
}

/// Copy entries from `source` into `target` according to `mode`.
///
/// `selected` is only consulted in [`ImportMode::Selected`]. Each copy is
/// placed in a group path matching its source path, created as needed.
/// A copy whose uuid already exists in the target gets a fresh uuid so
/// that identities stay unique within the target.
pub fn import_entries(
    source: &Database,
    target: &mut Database,
    mode: ImportMode,
    selected: &[Uuid],
) -> ImportOutcome {
    let source_entries = source.entries();
    let mut outcome = ImportOutcome::default();

    let chosen: Vec<&EntryRef<'_>> = match mode {
        ImportMode::SkipExisting => {
            let target_entries = target.entries();
            diff::unmatched(&source_entries, &target_entries)
        }
        ImportMode::Selected => {
            let wanted: HashSet<&Uuid> = selected.iter().collect();
            let chosen: Vec<_> = source_entries
                .iter()
                .filter(|e| wanted.contains(&e.uuid))
                .collect();
            let found: HashSet<&Uuid> = chosen.iter().map(|e| &e.entry.uuid).collect();
            outcome.skipped = wanted.len() - found.len();
            chosen
        }
        ImportMode::All => source_entries.iter().collect(),
    };

    for located in chosen {
        let mut copy = located.entry.clone();
        if target.contains_uuid(&copy.uuid) {
            let fresh = Uuid::new_v4();
            tracing::warn!(
                "Entry {} already exists in target, importing {:?} as {}",
                copy.uuid,
                copy.title(),
                fresh
            );
            copy.uuid = fresh;
        }
        target
            .ensure_group_path(located.group_path_names())
            .entries
            .push(copy);
        outcome.imported += 1;
    }

    tracing::info!(
        "Imported {} entries ({} mode, {} skipped)",
        outcome.imported,
        mode,
        outcome.skipped
    );
    outcome
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    /// Duplicate an entry that exists on one side only.
    Copy,
    /// Replace the contents of an entry that exists on both sides.
    Overwrite,
}

impl FromStr for TransferAction {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "copy" => Ok(TransferAction::Copy),
            "overwrite" => Ok(TransferAction::Overwrite),
            other => Err(ReconcileError::InvalidAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "toA")]
    ToA,
    #[serde(rename = "toB")]
    ToB,
}

impl FromStr for Direction {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toA" => Ok(Direction::ToA),
            "toB" => Ok(Direction::ToB),
            other => Err(ReconcileError::InvalidDirection(other.to_string())),
        }
    }
}

/// One item of a [`transfer`] batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(deserialize_with = "deserialize_uuid")]
    pub uuid: Uuid,
    pub action: TransferAction,
    pub direction: Direction,
}

impl TransferRequest {
    pub fn new(uuid: Uuid, action: TransferAction, direction: Direction) -> Self {
        Self {
            uuid,
            action,
            direction,
        }
    }
}

fn deserialize_uuid<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    models::parse_uuid(&raw).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub copied_to_a: usize,
    pub copied_to_b: usize,
    pub overwritten: usize,
    /// Requests whose entry did not resolve on the required side.
    pub skipped: usize,
}

/// Apply a batch of copy/overwrite requests between `a` and `b`.
///
/// - copy: the entry must exist in the source side and not in the
///   destination; the clone goes into the destination's root group.
/// - overwrite: the entry must exist on both sides; the destination keeps
///   its uuid and group and takes everything else from the source.
pub fn transfer(
    a: &mut Database,
    b: &mut Database,
    transfers: &[TransferRequest],
) -> TransferOutcome {
    let mut outcome = TransferOutcome::default();

    for request in transfers {
        let (source, destination) = match request.direction {
            Direction::ToA => (&*b, &mut *a),
            Direction::ToB => (&*a, &mut *b),
        };

        let applied = match request.action {
            TransferAction::Copy => copy_entry(source, destination, &request.uuid),
            TransferAction::Overwrite => overwrite_entry(source, destination, &request.uuid),
        };

        if !applied {
            tracing::debug!(
                "Skipping {:?} {:?} for unresolved entry {}",
                request.action,
                request.direction,
                request.uuid
            );
            outcome.skipped += 1;
            continue;
        }

        match (request.action, request.direction) {
            (TransferAction::Copy, Direction::ToA) => outcome.copied_to_a += 1,
            (TransferAction::Copy, Direction::ToB) => outcome.copied_to_b += 1,
            (TransferAction::Overwrite, _) => outcome.overwritten += 1,
        }
    }

    tracing::info!(
        "Transfer done: {} copied to A, {} copied to B, {} overwritten, {} skipped",
        outcome.copied_to_a,
        outcome.copied_to_b,
        outcome.overwritten,
        outcome.skipped
    );
    outcome
}

fn copy_entry(source: &Database, destination: &mut Database, uuid: &Uuid) -> bool {
    let Some(found) = source.find_entry(uuid) else {
        return false;
    };
    if destination.contains_uuid(uuid) {
        return false;
    }
    destination.root.entries.push(found.entry.clone());
    true
}

fn overwrite_entry(source: &Database, destination: &mut Database, uuid: &Uuid) -> bool {
    let Some(found) = source.find_entry(uuid) else {
        return false;
    };
    let Some(target) = destination.find_entry_mut(uuid) else {
        return false;
    };
    target.replace_contents(found.entry);
    true
}
