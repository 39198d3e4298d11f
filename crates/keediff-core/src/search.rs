//! Entry lookup across one or both databases.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::Serialize;
use uuid::Uuid;

use crate::accessor::{self, SerializeOptions, SerializedEntry};
use crate::matcher::{self, MatchMethod};
use crate::models::{EntryRef, FieldName};

/// Maximum results returned per side.
pub const SEARCH_RESULT_LIMIT: usize = 100;

/// Fields searched when the caller does not name any.
pub fn default_search_fields() -> Vec<FieldName> {
    vec![FieldName::Title, FieldName::UserName, FieldName::Url]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchSummary {
    pub count_a: usize,
    pub count_b: usize,
    pub total_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchReport {
    pub results_a: Vec<SerializedEntry>,
    pub results_b: Vec<SerializedEntry>,
    pub summary: SearchSummary,
}

/// Case-insensitive substring search over each side independently.
///
/// An entry matches when any of `fields` contains `query`. Results keep
/// enumeration order and stop at [`SEARCH_RESULT_LIMIT`] per side. An empty
/// `fields` slice falls back to [`default_search_fields`].
pub fn search(
    a: Option<&[EntryRef<'_>]>,
    b: Option<&[EntryRef<'_>]>,
    query: &str,
    fields: &[FieldName],
) -> SearchReport {
    let defaults;
    let fields = if fields.is_empty() {
        defaults = default_search_fields();
        defaults.as_slice()
    } else {
        fields
    };
    let needle = query.to_lowercase();

    let results_a = a
        .map(|entries| search_side(entries, &needle, fields))
        .unwrap_or_default();
    let results_b = b
        .map(|entries| search_side(entries, &needle, fields))
        .unwrap_or_default();

    let summary = SearchSummary {
        count_a: results_a.len(),
        count_b: results_b.len(),
        total_count: results_a.len() + results_b.len(),
    };
    tracing::debug!("Search {:?}: {} + {} results", query, summary.count_a, summary.count_b);

    SearchReport {
        results_a,
        results_b,
        summary,
    }
}

fn search_side(entries: &[EntryRef<'_>], needle: &str, fields: &[FieldName]) -> Vec<SerializedEntry> {
    entries
        .iter()
        .filter(|entry| {
            fields
                .iter()
                .any(|field| entry.field_as_string(field).to_lowercase().contains(needle))
        })
        .take(SEARCH_RESULT_LIMIT)
        .map(|entry| accessor::serialize(entry, SerializeOptions::MASKED))
        .collect()
}

/// Options for [`find_counterpart`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterpartOptions {
    /// Render protected fields in plaintext. Off unless the caller asks.
    pub show_protected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterpartReport {
    pub source_entry: Option<SerializedEntry>,
    pub counterpart: Option<SerializedEntry>,
    pub match_method: Option<MatchMethod>,
}

/// Look up one source entry and its counterpart on the other side.
///
/// This is the only lookup that may return protected values unmasked, and
/// only with [`CounterpartOptions::show_protected`] set.
pub fn find_counterpart(
    source: &[EntryRef<'_>],
    target: Option<&[EntryRef<'_>]>,
    uuid: &Uuid,
    options: CounterpartOptions,
) -> CounterpartReport {
    let Some(source_entry) = source.iter().find(|e| e.uuid == *uuid) else {
        return CounterpartReport::default();
    };

    let serialize_options = SerializeOptions {
        mask_protected: !options.show_protected,
    };
    if options.show_protected {
        tracing::info!("Revealing protected fields for entry {}", uuid);
    }

    let mut report = CounterpartReport {
        source_entry: Some(accessor::serialize(source_entry, serialize_options)),
        ..CounterpartReport::default()
    };

    if let Some((found, method)) = target.and_then(|t| matcher::find_counterpart(source_entry, t)) {
        report.counterpart = Some(accessor::serialize(found, serialize_options));
        report.match_method = Some(method);
    }

    report
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuzzyHit {
    pub entry: SerializedEntry,
    pub score: i64,
}

/// Fuzzy-ranked search over title, username and group path.
///
/// Highest score first, at most `limit` hits. A blank query yields nothing.
pub fn fuzzy_search(entries: &[EntryRef<'_>], query: &str, limit: usize) -> Vec<FuzzyHit> {
    if query.trim().is_empty() {
        return Vec::new();
    }

    let matcher = SkimMatcherV2::default();

    let mut scored: Vec<_> = entries
        .iter()
        .filter_map(|entry| {
            let search_text = format!(
                "{} {} {}",
                entry.title(),
                entry.username(),
                entry.group_path_names().join(" / ")
            );
            matcher
                .fuzzy_match(&search_text, query)
                .map(|score| (score, entry))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(limit)
        .map(|(score, entry)| FuzzyHit {
            entry: accessor::serialize(entry, SerializeOptions::MASKED),
            score,
        })
        .collect()
}
