//! Counterpart lookup across two entry collections.
//!
//! Identity always wins. Only when no target shares the source's uuid do we
//! fall back to the lowercased (title, username) pair, and an entry with
//! neither a title nor a username never takes part in that fallback.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::models::{Entry, EntryRef};

/// How a counterpart was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatchMethod {
    #[serde(rename = "id")]
    Id,
    #[serde(rename = "title+username")]
    TitleUsername,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Id => "id",
            MatchMethod::TitleUsername => "title+username",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased (title, username) key, or `None` when both are empty.
pub fn fallback_key(entry: &Entry) -> Option<(String, String)> {
    let title = entry.title();
    let username = entry.username();
    if title.is_empty() && username.is_empty() {
        return None;
    }
    Some((title.to_lowercase(), username.to_lowercase()))
}

/// Find the counterpart of `source` in `targets` with a linear scan.
///
/// When several targets share the fallback key the first one in `targets`
/// order is returned.
pub fn find_counterpart<'s, 'a>(
    source: &Entry,
    targets: &'s [EntryRef<'a>],
) -> Option<(&'s EntryRef<'a>, MatchMethod)> {
    if let Some(found) = targets.iter().find(|t| t.uuid == source.uuid) {
        return Some((found, MatchMethod::Id));
    }

    let key = fallback_key(source)?;
    targets
        .iter()
        .find(|t| fallback_key(t).as_ref() == Some(&key))
        .map(|found| (found, MatchMethod::TitleUsername))
}

/// Hash index over a target collection for repeated lookups.
///
/// Same semantics as [`find_counterpart`]: the first target for a given uuid
/// or fallback key is the one returned.
pub struct MatchIndex<'s, 'a> {
    targets: &'s [EntryRef<'a>],
    by_uuid: HashMap<Uuid, usize>,
    by_title_user: HashMap<(String, String), usize>,
}

impl<'s, 'a> MatchIndex<'s, 'a> {
    pub fn new(targets: &'s [EntryRef<'a>]) -> Self {
        let mut by_uuid = HashMap::with_capacity(targets.len());
        let mut by_title_user = HashMap::with_capacity(targets.len());

        for (index, target) in targets.iter().enumerate() {
            by_uuid.entry(target.uuid).or_insert(index);
            if let Some(key) = fallback_key(target) {
                by_title_user.entry(key).or_insert(index);
            }
        }

        Self {
            targets,
            by_uuid,
            by_title_user,
        }
    }

    /// Index into the target slice of the counterpart, with the method used.
    pub fn lookup(&self, source: &Entry) -> Option<(usize, MatchMethod)> {
        if let Some(&index) = self.by_uuid.get(&source.uuid) {
            return Some((index, MatchMethod::Id));
        }
        let key = fallback_key(source)?;
        self.by_title_user
            .get(&key)
            .map(|&index| (index, MatchMethod::TitleUsername))
    }

    pub fn get(&self, index: usize) -> &'s EntryRef<'a> {
        &self.targets[index]
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
