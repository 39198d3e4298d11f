//! Near-duplicate detection within one database.
//!
//! Entries are bucketed by a normalized key. Buckets with a single entry are
//! dropped; in the rest the most recently modified entry is suggested for
//! keeping and the others for removal. Nothing is removed here: removal is
//! a separate, explicit call to [`remove_entries`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::accessor::{self, SerializeOptions, SerializedEntry};
use crate::error::ReconcileError;
use crate::models::{Database, Entry, EntryRef};

/// Which fields make two entries duplicates of each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DuplicateCriteria {
    #[default]
    #[serde(rename = "username+url")]
    UsernameUrl,
    #[serde(rename = "title+username")]
    TitleUsername,
}

impl DuplicateCriteria {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateCriteria::UsernameUrl => "username+url",
            DuplicateCriteria::TitleUsername => "title+username",
        }
    }

    /// Normalized key for an entry, `None` when it cannot take part.
    pub fn key(&self, entry: &Entry) -> Option<String> {
        let (first, second) = match self {
            DuplicateCriteria::UsernameUrl => {
                (entry.username().to_lowercase(), normalize_url(entry.url()))
            }
            DuplicateCriteria::TitleUsername => {
                (normalize_title(entry.title()), entry.username().to_lowercase())
            }
        };
        if first.is_empty() || second.is_empty() {
            return None;
        }
        Some(format!("{first}|{second}"))
    }
}

impl FromStr for DuplicateCriteria {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "username+url" => Ok(DuplicateCriteria::UsernameUrl),
            "title+username" => Ok(DuplicateCriteria::TitleUsername),
            other => Err(ReconcileError::InvalidCriteria(other.to_string())),
        }
    }
}

impl fmt::Display for DuplicateCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9+.\-]*://").expect("valid scheme pattern"));
static WWW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^www\.").expect("valid www pattern"));
static QUERY_OR_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?#].*$").expect("valid query pattern"));
static TRAILING_SLASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/+$").expect("valid slash pattern"));
static AUTH_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:login|log-in|signin|sign-in|auth|account)\b.*$").expect("valid auth pattern")
});

static TRAILING_PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^()]*\)$").expect("valid parenthetical pattern"));
static NOISE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[-–—]\s*(?:login|log-in|sign in|signin|account|old|copy|duplicate|backup|new)$")
        .expect("valid suffix pattern")
});

/// Reduce a URL to something like `host/path` for duplicate grouping.
///
/// Steps, in order: lowercase, drop the scheme, drop `www.`, drop query and
/// fragment, drop trailing slashes, drop an auth path segment (`/login`,
/// `/signin`, ...) with everything after it, drop trailing slashes again.
/// This is a heuristic, not a canonicalization.
pub fn normalize_url(url: &str) -> String {
    let lowered = url.trim().to_lowercase();
    let without_scheme = SCHEME.replace(&lowered, "");
    let without_www = WWW.replace(&without_scheme, "");
    let without_query = QUERY_OR_FRAGMENT.replace(&without_www, "");
    let trimmed = TRAILING_SLASHES.replace(&without_query, "");
    let without_auth = AUTH_SUFFIX.replace(&trimmed, "");
    TRAILING_SLASHES.replace(&without_auth, "").into_owned()
}

/// Lowercase, collapse whitespace and peel trailing noise off a title.
///
/// Parenthetical notes (`"(2)"`, `"(old account)"`) and suffixes such as
/// `- login` or `- copy` are stripped repeatedly until the title is stable.
pub fn normalize_title(title: &str) -> String {
    let mut current = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    loop {
        let stripped = TRAILING_PARENTHETICAL.replace(&current, "");
        let stripped = NOISE_SUFFIX.replace(&stripped, "");
        let stripped = stripped.trim_end().to_string();
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Suggestion {
    Keep,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCandidate {
    #[serde(flatten)]
    pub entry: SerializedEntry,
    pub suggested: Suggestion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: String,
    /// Newest first.
    pub entries: Vec<DuplicateCandidate>,
}

impl DuplicateGroup {
    /// Uuids of the entries suggested for removal.
    pub fn removable(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|c| c.suggested == Suggestion::Remove)
            .map(|c| c.entry.uuid.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateSummary {
    pub total_groups: usize,
    /// Sum over groups of `len - 1`.
    pub total_duplicates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    pub summary: DuplicateSummary,
}

/// Group near-duplicate entries.
///
/// Groups come out in order of their first member in `entries`. Within a
/// group entries are sorted by last modification, newest first; entries
/// without a timestamp sort last and ties keep their input order.
pub fn find_duplicates(entries: &[EntryRef<'_>], criteria: DuplicateCriteria) -> DuplicateReport {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<&EntryRef<'_>>> = HashMap::new();

    for entry in entries {
        let Some(key) = criteria.key(entry) else {
            continue;
        };
        let bucket = buckets.entry(key.clone()).or_default();
        if bucket.is_empty() {
            order.push(key);
        }
        bucket.push(entry);
    }

    let groups: Vec<DuplicateGroup> = order
        .into_iter()
        .filter_map(|key| {
            let mut members = buckets.remove(&key)?;
            if members.len() < 2 {
                return None;
            }
            members.sort_by(|a, b| b.times.last_modification.cmp(&a.times.last_modification));

            let entries = members
                .into_iter()
                .enumerate()
                .map(|(position, member)| DuplicateCandidate {
                    entry: accessor::serialize(member, SerializeOptions::MASKED),
                    suggested: if position == 0 {
                        Suggestion::Keep
                    } else {
                        Suggestion::Remove
                    },
                })
                .collect();

            Some(DuplicateGroup { key, entries })
        })
        .collect();

    let summary = DuplicateSummary {
        total_groups: groups.len(),
        total_duplicates: groups.iter().map(|g| g.entries.len() - 1).sum(),
    };

    tracing::info!(
        "Found {} duplicate groups ({} removable entries) by {}",
        summary.total_groups,
        summary.total_duplicates,
        criteria
    );

    DuplicateReport { groups, summary }
}

/// Outcome of [`remove_entries`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovalOutcome {
    pub removed: usize,
    /// Ids that did not resolve to an entry.
    pub skipped: usize,
}

/// Delete the identified entries; unknown ids are skipped.
///
/// Pass the same `include_recycle_bin` the duplicate report was built with
/// so that every suggested entry resolves.
pub fn remove_entries(
    db: &mut Database,
    uuids: &[Uuid],
    include_recycle_bin: bool,
) -> RemovalOutcome {
    let mut outcome = RemovalOutcome::default();
    for uuid in uuids {
        match db.remove_entry_with(uuid, include_recycle_bin) {
            Some(entry) => {
                tracing::debug!("Removed entry {} ({:?})", uuid, entry.title());
                outcome.removed += 1;
            }
            None => {
                tracing::debug!("Entry {} not found, skipping removal", uuid);
                outcome.skipped += 1;
            }
        }
    }
    tracing::info!(
        "Removed {} entries ({} skipped)",
        outcome.removed,
        outcome.skipped
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldName, Group};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn login(title: &str, user: &str, url: &str, day: Option<u32>) -> Entry {
        let mut entry = Entry::new()
            .with_field(FieldName::Title, title)
            .with_field(FieldName::UserName, user)
            .with_field(FieldName::Url, url);
        entry.times.last_modification = day.map(at);
        entry
    }

    fn refs(entries: &[Entry]) -> Vec<EntryRef<'_>> {
        entries.iter().map(|e| EntryRef::new(e, Vec::new())).collect()
    }

    #[test]
    fn url_normalization_collapses_auth_pages() {
        assert_eq!(normalize_url("https://example.com/signin"), "example.com");
        assert_eq!(normalize_url("https://example.com"), "example.com");
        assert_eq!(normalize_url("example.com/"), "example.com");
        assert_eq!(normalize_url("HTTP://WWW.Example.com/login?next=/home#top"), "example.com");
        assert_eq!(normalize_url("https://example.com/app/sign-in/step2"), "example.com/app");
        assert_eq!(normalize_url("https://example.com/log-in.php"), "example.com");
        assert_eq!(normalize_url("https://example.com/loginhelp"), "example.com/loginhelp");
        assert_eq!(normalize_url("https://example.com/author/42"), "example.com/author/42");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn auth_segment_must_be_a_whole_word() {
        assert_eq!(normalize_url("https://example.com/account/settings"), "example.com");
        assert_eq!(normalize_url("https://example.com/accounts"), "example.com/accounts");
        assert_eq!(normalize_url("https://example.com/logins/new"), "example.com/logins/new");
    }

    #[test]
    fn title_normalization_strips_noise() {
        assert_eq!(normalize_title("Example - Login"), "example");
        assert_eq!(normalize_title("  Example   Bank  "), "example bank");
        assert_eq!(normalize_title("Example (work)"), "example");
        assert_eq!(normalize_title("Example - Old (2)"), "example");
        assert_eq!(normalize_title("Example - COPY - duplicate"), "example");
        assert_eq!(normalize_title("Copy"), "copy");
        assert_eq!(normalize_title("(old)"), "");
    }

    #[test]
    fn criteria_parsing_rejects_unknown_values() {
        assert_eq!(
            "username+url".parse::<DuplicateCriteria>().unwrap(),
            DuplicateCriteria::UsernameUrl
        );
        assert_eq!(
            "title+username".parse::<DuplicateCriteria>().unwrap(),
            DuplicateCriteria::TitleUsername
        );
        assert_eq!(
            "url".parse::<DuplicateCriteria>(),
            Err(ReconcileError::InvalidCriteria("url".into()))
        );
    }

    #[test]
    fn signin_and_bare_domain_are_duplicates_newest_kept() {
        let entries = vec![
            login("Example", "u", "https://example.com/signin", Some(1)),
            login("Example - Login", "u", "https://example.com", Some(3)),
        ];
        let report = find_duplicates(&refs(&entries), DuplicateCriteria::UsernameUrl);

        assert_eq!(report.summary.total_groups, 1);
        let group = &report.groups[0];
        assert_eq!(group.key, "u|example.com");
        assert_eq!(group.entries[0].entry.field("Title"), "Example - Login");
        assert_eq!(group.entries[0].suggested, Suggestion::Keep);
        assert_eq!(group.entries[1].suggested, Suggestion::Remove);
        assert_eq!(
            group.removable().collect::<Vec<_>>(),
            vec![entries[0].uuid.to_string()]
        );
    }

    #[test]
    fn entries_missing_a_key_part_are_ignored() {
        let entries = vec![
            login("", "", "", None),
            login("", "", "", None),
            login("A", "", "https://a.example", None),
            login("A", "", "https://a.example", None),
        ];
        let report = find_duplicates(&refs(&entries), DuplicateCriteria::UsernameUrl);
        assert!(report.groups.is_empty());
        let report = find_duplicates(&refs(&entries), DuplicateCriteria::TitleUsername);
        assert!(report.groups.is_empty());
    }

    #[test]
    fn summary_counts_removable_entries() {
        let entries = vec![
            login("Mail", "me", "https://mail.example", Some(2)),
            login("Bank", "me", "https://bank.example", Some(1)),
            login("mail (old)", "ME", "https://other.example", None),
            login("Mail - copy", "me", "https://x.example", Some(5)),
            login("Bank", "me", "https://bank2.example", Some(4)),
            login("Solo", "me", "https://solo.example", Some(4)),
        ];
        let report = find_duplicates(&refs(&entries), DuplicateCriteria::TitleUsername);

        assert!(report.groups.iter().all(|g| g.entries.len() > 1));
        assert_eq!(report.summary.total_groups, 2);
        assert_eq!(
            report.summary.total_duplicates,
            report.groups.iter().map(|g| g.entries.len() - 1).sum::<usize>()
        );
        assert_eq!(report.summary.total_duplicates, 3);

        // First-seen order, newest first, undated last.
        assert_eq!(report.groups[0].key, "mail|me");
        let titles: Vec<_> = report.groups[0]
            .entries
            .iter()
            .map(|c| c.entry.field("Title"))
            .collect();
        assert_eq!(titles, vec!["Mail - copy", "Mail", "mail (old)"]);
    }

    #[test]
    fn remove_entries_counts_only_resolved_ids() {
        let mut db = Database::new("Root");
        let keep = login("Keep", "me", "https://k.example", None);
        let drop = login("Drop", "me", "https://d.example", None);
        let drop_id = drop.uuid;
        let mut group = Group::new("Web");
        group.entries.push(drop);
        db.root.children.push(group);
        db.root.entries.push(keep);

        let outcome = remove_entries(&mut db, &[drop_id, Uuid::new_v4(), drop_id], false);
        assert_eq!(
            outcome,
            RemovalOutcome {
                removed: 1,
                skipped: 2
            }
        );
        assert_eq!(db.entries().len(), 1);
    }

    #[test]
    fn suggested_recycled_duplicate_is_removed() {
        let mut db = Database::new("Root");
        db.root
            .entries
            .push(login("Mail", "me", "https://mail.example", Some(5)));
        let mut bin = Group::new("Recycle Bin");
        bin.is_recycle_bin = true;
        bin.entries
            .push(login("Mail", "me", "https://mail.example/login", Some(1)));
        db.root.children.push(bin);

        let report = find_duplicates(&db.entries_with(true), DuplicateCriteria::UsernameUrl);
        let suggested: Vec<Uuid> = report.groups[0]
            .removable()
            .map(|id| Uuid::parse_str(id).unwrap())
            .collect();

        assert_eq!(remove_entries(&mut db.clone(), &suggested, false).skipped, 1);
        let outcome = remove_entries(&mut db, &suggested, true);
        assert_eq!(outcome.removed, 1);
        assert!(db.recycle_bin().unwrap().entries.is_empty());
    }
}
