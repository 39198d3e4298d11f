//! Shared data types for the reconciliation engine.
//!
//! A [`Database`] is an owned tree of [`Group`]s holding [`Entry`] records.
//! Group paths are never stored on entries; they are derived while walking
//! the tree and handed out through [`EntryRef`].

use base64::Engine as _;
use chrono::{NaiveDateTime, Timelike as _};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ReconcileError, ReconcileResult};

/// Name of an entry field.
///
/// The well-known KeePass fields sort before custom ones, which keeps field
/// diffs in a stable, readable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldName {
    Title,
    UserName,
    Password,
    Url,
    Notes,
    Custom(String),
}

impl FieldName {
    /// The field key as stored in a KDBX file.
    pub fn as_str(&self) -> &str {
        match self {
            FieldName::Title => "Title",
            FieldName::UserName => "UserName",
            FieldName::Password => "Password",
            FieldName::Url => "URL",
            FieldName::Notes => "Notes",
            FieldName::Custom(name) => name,
        }
    }

    /// Whether this is one of the five standard KeePass fields.
    pub fn is_standard(&self) -> bool {
        !matches!(self, FieldName::Custom(_))
    }
}

impl From<&str> for FieldName {
    fn from(key: &str) -> Self {
        match key {
            "Title" => FieldName::Title,
            "UserName" => FieldName::UserName,
            "Password" => FieldName::Password,
            "URL" => FieldName::Url,
            "Notes" => FieldName::Notes,
            other => FieldName::Custom(other.to_string()),
        }
    }
}

/// Lenient parsing for user input: standard names match case-insensitively,
/// anything else is taken as a custom field name verbatim.
impl FromStr for FieldName {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ReconcileError::InvalidField(s.to_string()));
        }
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "title" => FieldName::Title,
            "username" | "user" => FieldName::UserName,
            "password" => FieldName::Password,
            "url" => FieldName::Url,
            "notes" => FieldName::Notes,
            _ => FieldName::Custom(trimmed.to_string()),
        })
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Times {
    pub creation: Option<NaiveDateTime>,
    pub last_modification: Option<NaiveDateTime>,
    pub last_access: Option<NaiveDateTime>,
}

impl Times {
    /// All three timestamps set to the current UTC time, truncated to seconds.
    pub fn now() -> Self {
        let now = chrono::Utc::now().naive_utc();
        let now = now.with_nanosecond(0).unwrap_or(now);
        Self {
            creation: Some(now),
            last_modification: Some(now),
            last_access: Some(now),
        }
    }
}

/// Represents a password entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub uuid: Uuid,
    pub fields: BTreeMap<FieldName, String>,
    /// Names of fields holding sensitive values.
    pub protected: BTreeSet<FieldName>,
    /// Attachment name to content.
    pub binaries: BTreeMap<String, Vec<u8>>,
    /// Prior versions, oldest first.
    pub history: Vec<Entry>,
    pub times: Times,
    pub tags: Vec<String>,
}

impl Entry {
    /// Create an empty entry with a fresh identity.
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            fields: BTreeMap::new(),
            protected: BTreeSet::new(),
            binaries: BTreeMap::new(),
            history: Vec::new(),
            times: Times::now(),
            tags: Vec::new(),
        }
    }

    /// Builder-style setter for an unprotected field.
    pub fn with_field(mut self, name: FieldName, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Builder-style setter for a protected field.
    pub fn with_protected_field(mut self, name: FieldName, value: impl Into<String>) -> Self {
        self.set_protected_field(name, value);
        self
    }

    pub fn set_field(&mut self, name: FieldName, value: impl Into<String>) {
        self.protected.remove(&name);
        self.fields.insert(name, value.into());
    }

    pub fn set_protected_field(&mut self, name: FieldName, value: impl Into<String>) {
        self.protected.insert(name.clone());
        self.fields.insert(name, value.into());
    }

    /// The real value of a field, or `""` when absent.
    ///
    /// Protected values are returned in plaintext: this is for comparisons
    /// inside the engine. Anything leaving the engine goes through
    /// [`crate::accessor::serialize`].
    pub fn field_as_string(&self, name: &FieldName) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }

    pub fn is_protected(&self, name: &FieldName) -> bool {
        self.protected.contains(name)
    }

    pub fn title(&self) -> &str {
        self.field_as_string(&FieldName::Title)
    }

    pub fn username(&self) -> &str {
        self.field_as_string(&FieldName::UserName)
    }

    pub fn url(&self) -> &str {
        self.field_as_string(&FieldName::Url)
    }

    /// Replace everything but identity with the contents of `src`.
    ///
    /// Copies fields, protection flags, attachments, history, timestamps and
    /// tags. The destination keeps its own uuid; group placement is untouched
    /// because entries do not know their group.
    pub fn replace_contents(&mut self, src: &Entry) {
        self.fields = src.fields.clone();
        self.protected = src.protected.clone();
        self.binaries = src.binaries.clone();
        self.history = src.history.clone();
        self.times = src.times.clone();
        self.tags = src.tags.clone();
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

/// Represents a group (folder) in the database tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    pub children: Vec<Group>,
    pub entries: Vec<Entry>,
    pub is_recycle_bin: bool,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            children: Vec::new(),
            entries: Vec::new(),
            is_recycle_bin: false,
        }
    }

    /// Find a direct child group by name.
    pub fn child(&self, name: &str) -> Option<&Group> {
        self.children.iter().find(|g| g.name == name)
    }

    fn count_groups(&self) -> usize {
        1 + self.children.iter().map(Group::count_groups).sum::<usize>()
    }
}

/// An entry together with the names of the groups above it.
#[derive(Debug, Clone)]
pub struct EntryRef<'a> {
    pub entry: &'a Entry,
    group_path: Vec<String>,
}

impl<'a> EntryRef<'a> {
    pub fn new(entry: &'a Entry, group_path: Vec<String>) -> Self {
        Self { entry, group_path }
    }

    /// Group names from the top level down to the entry's parent.
    ///
    /// The root group is not part of the path.
    pub fn group_path_names(&self) -> &[String] {
        &self.group_path
    }
}

impl Deref for EntryRef<'_> {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        self.entry
    }
}

/// Counts reported after opening a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DatabaseStats {
    pub entry_count: usize,
    pub group_count: usize,
}

/// In-memory database: a tree of groups under one root.
#[derive(Debug, Clone, PartialEq)]
pub struct Database {
    pub root: Group,
}

impl Database {
    /// Create an empty database whose root group carries `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            root: Group::new(name),
        }
    }

    /// All entries outside the recycle bin, in tree order.
    pub fn entries(&self) -> Vec<EntryRef<'_>> {
        self.entries_with(false)
    }

    /// All entries, optionally including the ones in the recycle bin.
    ///
    /// Each group yields its own entries before descending into its children.
    pub fn entries_with(&self, include_recycle_bin: bool) -> Vec<EntryRef<'_>> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        collect_entries(&self.root, &mut path, include_recycle_bin, true, &mut out);
        out
    }

    /// Find an entry outside the recycle bin.
    pub fn find_entry(&self, uuid: &Uuid) -> Option<EntryRef<'_>> {
        self.find_entry_with(uuid, false)
    }

    /// Find an entry, optionally looking inside the recycle bin too.
    pub fn find_entry_with(&self, uuid: &Uuid, include_recycle_bin: bool) -> Option<EntryRef<'_>> {
        self.entries_with(include_recycle_bin)
            .into_iter()
            .find(|e| e.uuid == *uuid)
    }

    /// Mutable access to an entry outside the recycle bin.
    pub fn find_entry_mut(&mut self, uuid: &Uuid) -> Option<&mut Entry> {
        find_entry_in_group_mut(&mut self.root, uuid)
    }

    /// Whether any entry, recycle bin included, carries this uuid.
    pub fn contains_uuid(&self, uuid: &Uuid) -> bool {
        contains_in_group(&self.root, uuid)
    }

    /// Remove an entry outside the recycle bin, returning it.
    pub fn remove_entry(&mut self, uuid: &Uuid) -> Option<Entry> {
        self.remove_entry_with(uuid, false)
    }

    /// Remove an entry, optionally looking inside the recycle bin too.
    pub fn remove_entry_with(&mut self, uuid: &Uuid, include_recycle_bin: bool) -> Option<Entry> {
        remove_from_group(&mut self.root, uuid, include_recycle_bin)
    }

    /// Walk `names` down from the root, creating missing groups.
    ///
    /// `names` is a path as returned by [`EntryRef::group_path_names`], so it
    /// never includes the root itself. Existing groups are reused by name
    /// (first match).
    pub fn ensure_group_path(&mut self, names: &[String]) -> &mut Group {
        let mut current = &mut self.root;

        for name in names {
            let index = match current.children.iter().position(|g| g.name == *name) {
                Some(index) => index,
                None => {
                    tracing::debug!("Creating group {:?} under {:?}", name, current.name);
                    current.children.push(Group::new(name.clone()));
                    current.children.len() - 1
                }
            };
            current = &mut current.children[index];
        }

        current
    }

    /// The recycle bin group, if the database has one.
    pub fn recycle_bin(&self) -> Option<&Group> {
        find_recycle_bin(&self.root)
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            entry_count: self.entries().len(),
            group_count: self.root.count_groups(),
        }
    }
}

fn collect_entries<'a>(
    group: &'a Group,
    path: &mut Vec<String>,
    include_recycle_bin: bool,
    is_root: bool,
    out: &mut Vec<EntryRef<'a>>,
) {
    if group.is_recycle_bin && !include_recycle_bin {
        return;
    }

    if !is_root {
        path.push(group.name.clone());
    }

    for entry in &group.entries {
        out.push(EntryRef::new(entry, path.clone()));
    }
    for child in &group.children {
        collect_entries(child, path, include_recycle_bin, false, out);
    }

    if !is_root {
        path.pop();
    }
}

fn find_entry_in_group_mut<'a>(group: &'a mut Group, uuid: &Uuid) -> Option<&'a mut Entry> {
    if group.is_recycle_bin {
        return None;
    }
    if let Some(entry) = group.entries.iter_mut().find(|e| e.uuid == *uuid) {
        return Some(entry);
    }
    for child in &mut group.children {
        if let Some(entry) = find_entry_in_group_mut(child, uuid) {
            return Some(entry);
        }
    }
    None
}

fn contains_in_group(group: &Group, uuid: &Uuid) -> bool {
    group.entries.iter().any(|e| e.uuid == *uuid)
        || group.children.iter().any(|g| contains_in_group(g, uuid))
}

fn remove_from_group(group: &mut Group, uuid: &Uuid, include_recycle_bin: bool) -> Option<Entry> {
    if group.is_recycle_bin && !include_recycle_bin {
        return None;
    }
    if let Some(index) = group.entries.iter().position(|e| e.uuid == *uuid) {
        return Some(group.entries.remove(index));
    }
    group
        .children
        .iter_mut()
        .find_map(|child| remove_from_group(child, uuid, include_recycle_bin))
}

fn find_recycle_bin(group: &Group) -> Option<&Group> {
    if group.is_recycle_bin {
        return Some(group);
    }
    group.children.iter().find_map(find_recycle_bin)
}

/// Parse an entry uuid as typed by a user.
///
/// Accepts the hyphenated and simple hex forms as well as the base64 form
/// KeePass shows in its UI (22 characters followed by `==`).
pub fn parse_uuid(input: &str) -> ReconcileResult<Uuid> {
    let trimmed = input.trim();
    if let Ok(uuid) = Uuid::parse_str(trimmed) {
        return Ok(uuid);
    }

    if trimmed.len() == 24 && trimmed.ends_with("==") {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(trimmed) {
            if let Ok(uuid) = Uuid::from_slice(&bytes) {
                return Ok(uuid);
            }
        }
    }

    Err(ReconcileError::InvalidUuid(input.to_string()))
}
