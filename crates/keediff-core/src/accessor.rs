//! Plain-record rendering of entries.
//!
//! [`serialize`] is the one place where protected values are masked. Every
//! report the engine hands back carries entries in this form.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{Entry, EntryRef, FieldName};

/// Placeholder shown instead of a non-empty protected value.
pub const MASK: &str = "********";

/// Controls how protected fields are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeOptions {
    pub mask_protected: bool,
}

impl SerializeOptions {
    pub const MASKED: Self = Self {
        mask_protected: true,
    };
    pub const REVEALED: Self = Self {
        mask_protected: false,
    };
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self::MASKED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerializedTimes {
    pub creation: Option<NaiveDateTime>,
    pub last_modification: Option<NaiveDateTime>,
    pub last_access: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryInfo {
    pub name: String,
    pub size: usize,
}

/// External representation of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerializedEntry {
    pub uuid: String,
    pub fields: BTreeMap<String, String>,
    pub times: SerializedTimes,
    /// Group names joined by `/`, root excluded.
    pub group_path: String,
    pub binaries: Vec<BinaryInfo>,
    pub history_count: usize,
}

impl SerializedEntry {
    /// Rendered value of a field, `""` when absent.
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }
}

/// Render a value for output, masking it if the field is protected.
pub(crate) fn render_value(
    entry: &Entry,
    name: &FieldName,
    value: &str,
    options: SerializeOptions,
) -> String {
    if options.mask_protected && entry.is_protected(name) {
        mask(value)
    } else {
        value.to_string()
    }
}

/// The mask for a non-empty value; empty stays empty.
pub(crate) fn mask(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        MASK.to_string()
    }
}

/// Serialize an entry with its group path.
pub fn serialize(entry: &EntryRef<'_>, options: SerializeOptions) -> SerializedEntry {
    serialize_with_path(entry.entry, &entry.group_path_names().join("/"), options)
}

pub(crate) fn serialize_with_path(
    entry: &Entry,
    group_path: &str,
    options: SerializeOptions,
) -> SerializedEntry {
    let fields = entry
        .fields
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                render_value(entry, name, value, options),
            )
        })
        .collect();

    let binaries = entry
        .binaries
        .iter()
        .map(|(name, data)| BinaryInfo {
            name: name.clone(),
            size: data.len(),
        })
        .collect();

    SerializedEntry {
        uuid: entry.uuid.to_string(),
        fields,
        times: SerializedTimes {
            creation: entry.times.creation,
            last_modification: entry.times.last_modification,
            last_access: entry.times.last_access,
        },
        group_path: group_path.to_string(),
        binaries,
        history_count: entry.history.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entry;

    fn secret_entry() -> Entry {
        let mut entry = Entry::new()
            .with_field(FieldName::Title, "Bank")
            .with_field(FieldName::UserName, "alice")
            .with_protected_field(FieldName::Password, "hunter2")
            .with_protected_field(FieldName::Custom("PIN".into()), "")
            .with_field(FieldName::Custom("Recovery".into()), "words");
        entry.binaries.insert("key.pem".into(), vec![0u8; 42]);
        entry.history.push(Entry::new());
        entry
    }

    #[test]
    fn masks_protected_fields_by_default() {
        let entry = secret_entry();
        let located = EntryRef::new(&entry, vec!["Finance".into(), "Banks".into()]);
        let out = serialize(&located, SerializeOptions::default());

        assert_eq!(out.field("Password"), MASK);
        assert_eq!(out.field("PIN"), "");
        assert_eq!(out.field("UserName"), "alice");
        assert_eq!(out.field("Recovery"), "words");
        assert_eq!(out.group_path, "Finance/Banks");
        assert_eq!(
            out.binaries,
            vec![BinaryInfo {
                name: "key.pem".into(),
                size: 42
            }]
        );
        assert_eq!(out.history_count, 1);
        assert_eq!(out.uuid, entry.uuid.to_string());
    }

    #[test]
    fn unmasked_serialization_reproduces_plaintext() {
        let entry = secret_entry();
        let out = serialize(&EntryRef::new(&entry, Vec::new()), SerializeOptions::REVEALED);

        for (name, value) in &entry.fields {
            assert_eq!(out.field(name.as_str()), value);
        }
        assert_eq!(out.group_path, "");
    }
}
