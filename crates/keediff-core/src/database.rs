//! KeePass file handling: unlock, convert to the in-memory model, write back.

use crate::models::{Database, Entry, FieldName, Group, Times};
use anyhow::{Context, Result};
use keepass::db::{History, Node, Value};
use keepass::{config::DatabaseConfig, DatabaseKey};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// An unlocked KeePass file together with the key needed to save it again.
pub struct KeepassDatabase {
    db: keepass::Database,
    path: PathBuf,
    key: DatabaseKey,
}

impl KeepassDatabase {
    /// Open and unlock a KeePass database with a password.
    pub fn unlock(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        Self::unlock_with(path, Some(password), None)
    }

    /// Open and unlock a KeePass database with a password, a key file or both.
    pub fn unlock_with(
        path: impl AsRef<Path>,
        password: Option<&str>,
        keyfile: Option<&Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let key = build_key(password, keyfile)?;

        let mut file = std::fs::File::open(path)
            .with_context(|| format!("Failed to read database file: {}", path.display()))?;
        let db = keepass::Database::open(&mut file, key.clone())
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        tracing::info!("Unlocked {}", path.display());
        Ok(Self {
            db,
            path: path.to_path_buf(),
            key,
        })
    }

    /// Write `model` to a new password-protected KDBX file at `path`.
    pub fn create(path: impl AsRef<Path>, password: &str, model: &Database) -> Result<Self> {
        let mut db = keepass::Database::new(DatabaseConfig::default());
        db.meta.database_name = Some(model.root.name.clone());

        let mut created = Self {
            db,
            path: path.as_ref().to_path_buf(),
            key: DatabaseKey::new().with_password(password),
        };
        created.apply(model);
        created.save()?;
        Ok(created)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Convert the unlocked file into the in-memory model.
    pub fn to_model(&self) -> Database {
        let recycle_bin = self.db.meta.recyclebin_uuid;
        Database {
            root: convert_group(&self.db.root, recycle_bin),
        }
    }

    /// Replace the file's contents with `model`.
    ///
    /// Groups and entries that already exist keep the KeePass-only data the
    /// model does not carry (icons, auto-type, custom data).
    pub fn apply(&mut self, model: &Database) {
        let mut groups = HashMap::new();
        let mut entries = HashMap::new();
        index_group(&self.db.root, &mut groups, &mut entries);

        self.db.root = build_group(&model.root, &groups, &entries);
        if let Some(bin) = model.recycle_bin() {
            self.db.meta.recyclebin_uuid = Some(bin.uuid);
            self.db.meta.recyclebin_enabled = Some(true);
        }
    }

    /// Save to the file the database was opened from.
    pub fn save(&self) -> Result<()> {
        self.save_as(&self.path)
    }

    /// Save to `path` with the same key.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so an interrupted save leaves the previous file intact.
    pub fn save_as(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        self.db
            .save(tmp.as_file_mut(), self.key.clone())
            .with_context(|| "Failed to save database")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write database file: {}", path.display()))?;

        tracing::info!("Saved {}", path.display());
        Ok(())
    }
}

fn build_key(password: Option<&str>, keyfile: Option<&Path>) -> Result<DatabaseKey> {
    let mut key = DatabaseKey::new();
    if let Some(password) = password {
        key = key.with_password(password);
    }
    if let Some(keyfile) = keyfile {
        let mut file = std::fs::File::open(keyfile)
            .with_context(|| format!("Failed to open key file: {}", keyfile.display()))?;
        key = key
            .with_keyfile(&mut file)
            .with_context(|| format!("Failed to read key file: {}", keyfile.display()))?;
    }
    if password.is_none() && keyfile.is_none() {
        anyhow::bail!("A password or a key file is required");
    }
    Ok(key)
}

fn convert_group(kg: &keepass::db::Group, recycle_bin: Option<Uuid>) -> Group {
    let mut group = Group::new(kg.name.clone());
    group.uuid = kg.uuid;
    group.is_recycle_bin = recycle_bin == Some(kg.uuid);

    for node in &kg.children {
        match node {
            Node::Group(g) => group.children.push(convert_group(g, recycle_bin)),
            Node::Entry(e) => group.entries.push(convert_entry(e)),
        }
    }
    group
}

fn convert_entry(ke: &keepass::db::Entry) -> Entry {
    let mut entry = Entry::new();
    entry.uuid = ke.uuid;

    for (key, value) in &ke.fields {
        match value {
            Value::Bytes(bytes) => {
                entry.binaries.insert(key.clone(), bytes.clone());
            }
            Value::Unprotected(s) => entry.set_field(FieldName::from(key.as_str()), s.clone()),
            Value::Protected(_) => {
                let plain = ke.get(key).unwrap_or_default();
                entry.set_protected_field(FieldName::from(key.as_str()), plain);
            }
        }
    }

    entry.times = Times {
        creation: ke.times.get_creation().copied(),
        last_modification: ke.times.get_last_modification().copied(),
        last_access: ke.times.get_last_access().copied(),
    };
    entry.tags = ke.tags.clone();
    entry.history = ke
        .history
        .as_ref()
        .map(|h| h.get_entries().iter().map(convert_entry).collect())
        .unwrap_or_default();
    entry
}

fn index_group(
    kg: &keepass::db::Group,
    groups: &mut HashMap<Uuid, keepass::db::Group>,
    entries: &mut HashMap<Uuid, keepass::db::Entry>,
) {
    let mut shell = kg.clone();
    shell.children.clear();
    groups.insert(kg.uuid, shell);

    for node in &kg.children {
        match node {
            Node::Group(g) => index_group(g, groups, entries),
            Node::Entry(e) => {
                entries.insert(e.uuid, e.clone());
            }
        }
    }
}

fn build_group(
    group: &Group,
    groups: &HashMap<Uuid, keepass::db::Group>,
    entries: &HashMap<Uuid, keepass::db::Entry>,
) -> keepass::db::Group {
    let mut kg = groups
        .get(&group.uuid)
        .cloned()
        .unwrap_or_else(|| keepass::db::Group::new(&group.name));
    kg.uuid = group.uuid;
    kg.name = group.name.clone();

    for entry in &group.entries {
        kg.children
            .push(Node::Entry(build_entry(entry, entries.get(&entry.uuid))));
    }
    for child in &group.children {
        kg.children.push(Node::Group(build_group(child, groups, entries)));
    }
    kg
}

fn build_entry(entry: &Entry, existing: Option<&keepass::db::Entry>) -> keepass::db::Entry {
    let mut ke = existing.cloned().unwrap_or_else(keepass::db::Entry::new);
    ke.uuid = entry.uuid;
    ke.fields.clear();

    for (name, value) in &entry.fields {
        let value = if entry.is_protected(name) {
            Value::Protected(value.as_bytes().into())
        } else {
            Value::Unprotected(value.clone())
        };
        ke.fields.insert(name.as_str().to_string(), value);
    }
    for (name, data) in &entry.binaries {
        ke.fields.insert(name.clone(), Value::Bytes(data.clone()));
    }

    if let Some(t) = entry.times.creation {
        ke.times.set_creation(t);
    }
    if let Some(t) = entry.times.last_modification {
        ke.times.set_last_modification(t);
    }
    if let Some(t) = entry.times.last_access {
        ke.times.set_last_access(t);
    }
    ke.tags = entry.tags.clone();

    ke.history = if entry.history.is_empty() {
        None
    } else {
        let mut history = History::default();
        // add_entry puts each new entry first
        for old in entry.history.iter().rev() {
            history.add_entry(build_entry(old, None));
        }
        Some(history)
    };
    ke
}
