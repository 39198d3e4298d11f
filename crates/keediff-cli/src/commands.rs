//! Subcommand definitions and handlers.
//!
//! Each handler unlocks the databases it needs, runs one engine operation
//! and prints the result as JSON on stdout. Databases are only written back
//! when `--write` is given.

use anyhow::{Context, Result};
use clap::Subcommand;
use keediff_core::duplicates::{self, DuplicateReport};
use keediff_core::merge::{Direction, TransferAction};
use keediff_core::search::{CounterpartOptions, SEARCH_RESULT_LIMIT};
use keediff_core::{
    csv_import, export, parse_uuid, Database, DuplicateCriteria, EntryRef, FieldName, ImportMode,
    KeepassDatabase, ReconcileError, TransferRequest,
};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Config;
use crate::Credentials;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compare two databases entry by entry
    Compare {
        a: PathBuf,
        b: PathBuf,
        /// Write the differences as a new KeePass database
        #[arg(long, value_name = "FILE", requires = "export_password")]
        export: Option<PathBuf>,
        /// Password for the exported database
        #[arg(long, value_name = "PASSWORD")]
        export_password: Option<String>,
    },

    /// Find near-duplicate entries in one database
    Duplicates {
        database: PathBuf,
        /// username+url or title+username (defaults to the configured criteria)
        #[arg(long)]
        criteria: Option<DuplicateCriteria>,
        /// Remove these entries
        #[arg(long, value_name = "UUID", value_parser = parse_uuid, num_args = 1..)]
        remove: Vec<Uuid>,
        /// Remove every entry suggested for removal
        #[arg(long)]
        remove_suggested: bool,
        #[command(flatten)]
        save: SaveArgs,
    },

    /// Copy entries from SOURCE into TARGET
    Import {
        source: PathBuf,
        target: PathBuf,
        /// skip-existing, selected or all
        #[arg(long)]
        mode: ImportMode,
        /// Entries to import in `selected` mode
        #[arg(long, value_name = "UUID", value_parser = parse_uuid, num_args = 1..)]
        select: Vec<Uuid>,
        #[command(flatten)]
        save: SaveArgs,
    },

    /// Copy or overwrite individual entries between A and B
    Transfer {
        a: PathBuf,
        b: PathBuf,
        #[arg(long, value_name = "UUID", value_parser = parse_uuid, num_args = 1..)]
        copy_to_a: Vec<Uuid>,
        #[arg(long, value_name = "UUID", value_parser = parse_uuid, num_args = 1..)]
        copy_to_b: Vec<Uuid>,
        /// Overwrite the A copy of these entries with B's contents
        #[arg(long, value_name = "UUID", value_parser = parse_uuid, num_args = 1..)]
        overwrite_a: Vec<Uuid>,
        /// Overwrite the B copy of these entries with A's contents
        #[arg(long, value_name = "UUID", value_parser = parse_uuid, num_args = 1..)]
        overwrite_b: Vec<Uuid>,
        /// JSON file with a list of {uuid, action, direction} requests
        #[arg(long, value_name = "FILE")]
        plan: Option<PathBuf>,
        /// Save both databases back to their files
        #[arg(long)]
        write: bool,
    },

    /// Search entries by substring or fuzzy match
    Search {
        database: PathBuf,
        query: String,
        /// Also search this database (reported as side B)
        #[arg(long, value_name = "FILE")]
        with: Option<PathBuf>,
        /// Field to search; repeatable (defaults to the configured fields)
        #[arg(long = "field", value_name = "NAME", value_parser = parse_field)]
        fields: Vec<FieldName>,
        /// Rank by fuzzy score instead of substring matching
        #[arg(long, conflicts_with = "with")]
        fuzzy: bool,
    },

    /// Show one entry of A and its counterpart in B
    Show {
        a: PathBuf,
        b: PathBuf,
        #[arg(value_parser = parse_uuid)]
        uuid: Uuid,
        /// Print protected fields in plaintext
        #[arg(long)]
        reveal: bool,
    },

    /// Convert a browser password export into a KeePass database
    CsvImport {
        csv: PathBuf,
        output: PathBuf,
        #[arg(long)]
        password: String,
    },
}

/// Where a modified database goes.
#[derive(clap::Args, Debug, Default)]
pub struct SaveArgs {
    /// Save the modified database
    #[arg(long)]
    pub write: bool,
    /// Save to this file instead of overwriting the original
    #[arg(long, value_name = "FILE", requires = "write")]
    pub output: Option<PathBuf>,
}

/// Shared state for one invocation.
pub struct Session {
    pub config: Config,
    pub credentials: Credentials,
    pub summary_only: bool,
}

impl Session {
    fn open_a(&self, path: &Path) -> Result<KeepassDatabase> {
        open(
            path,
            self.credentials.password_a(),
            self.credentials.keyfile_a.as_deref(),
        )
    }

    fn open_b(&self, path: &Path) -> Result<KeepassDatabase> {
        open(
            path,
            self.credentials.password_b(),
            self.credentials.keyfile_b.as_deref(),
        )
    }

    fn entries<'a>(&self, db: &'a Database) -> Vec<EntryRef<'a>> {
        db.entries_with(self.config.include_recycle_bin)
    }

    fn print<T: Serialize>(&self, value: &T) -> Result<()> {
        let rendered = if self.config.pretty_json {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .context("Failed to serialize output")?;
        println!("{rendered}");
        Ok(())
    }

    /// Print the whole value, or only its `summary` with `--summary`.
    fn print_report<T: Serialize>(&self, value: &T) -> Result<()> {
        if !self.summary_only {
            return self.print(value);
        }
        let value = serde_json::to_value(value).context("Failed to serialize output")?;
        match value.get("summary") {
            Some(summary) => self.print(summary),
            None => self.print(&value),
        }
    }
}

/// Field names typed by the user; standard names match case-insensitively.
fn parse_field(name: &str) -> Result<FieldName, ReconcileError> {
    name.parse()
}

fn open(path: &Path, password: Option<String>, keyfile: Option<&Path>) -> Result<KeepassDatabase> {
    KeepassDatabase::unlock_with(path, password.as_deref(), keyfile)
}

fn store(db: &mut KeepassDatabase, model: &Database, save: &SaveArgs) -> Result<()> {
    if !save.write {
        tracing::info!("Dry run, {} left unchanged (use --write)", db.path().display());
        return Ok(());
    }
    db.apply(model);
    match &save.output {
        Some(output) => db.save_as(output),
        None => db.save(),
    }
}

pub fn run(command: Command, session: &Session) -> Result<()> {
    match command {
        Command::Compare {
            a,
            b,
            export,
            export_password,
        } => compare(session, &a, &b, export.zip(export_password)),
        Command::Duplicates {
            database,
            criteria,
            remove,
            remove_suggested,
            save,
        } => {
            let criteria = criteria.unwrap_or(session.config.duplicate_criteria);
            find_duplicates(session, &database, criteria, remove, remove_suggested, &save)
        }
        Command::Import {
            source,
            target,
            mode,
            select,
            save,
        } => import(session, &source, &target, mode, &select, &save),
        Command::Transfer {
            a,
            b,
            copy_to_a,
            copy_to_b,
            overwrite_a,
            overwrite_b,
            plan,
            write,
        } => {
            let mut requests = match plan {
                Some(path) => read_plan(&path)?,
                None => Vec::new(),
            };
            requests.extend(transfer_requests(&copy_to_a, &copy_to_b, &overwrite_a, &overwrite_b));
            transfer(session, &a, &b, &requests, write)
        }
        Command::Search {
            database,
            query,
            with,
            fields,
            fuzzy,
        } => search(session, &database, with.as_deref(), &query, fields, fuzzy),
        Command::Show { a, b, uuid, reveal } => show(session, &a, &b, &uuid, reveal),
        Command::CsvImport {
            csv,
            output,
            password,
        } => import_csv(session, &csv, &output, &password),
    }
}

fn compare(session: &Session, a: &Path, b: &Path, export: Option<(PathBuf, String)>) -> Result<()> {
    let model_a = session.open_a(a)?.to_model();
    let model_b = session.open_b(b)?.to_model();

    let report = keediff_core::compare(&session.entries(&model_a), &session.entries(&model_b));

    if let Some((path, password)) = export {
        let diff_db = export::build_diff_database(&model_a, &report)?;
        KeepassDatabase::create(&path, &password, &diff_db)?;
        tracing::info!("Exported differences to {}", path.display());
    }

    session.print_report(&json!({
        "stats_a": model_a.stats(),
        "stats_b": model_b.stats(),
        "only_in_a": report.only_in_a,
        "only_in_b": report.only_in_b,
        "modified": report.modified,
        "identical": report.identical,
        "summary": report.summary,
    }))
}

fn find_duplicates(
    session: &Session,
    path: &Path,
    criteria: DuplicateCriteria,
    mut remove: Vec<Uuid>,
    remove_suggested: bool,
    save: &SaveArgs,
) -> Result<()> {
    let mut db = session.open_a(path)?;
    let mut model = db.to_model();
    let report = keediff_core::find_duplicates(&session.entries(&model), criteria);

    if remove_suggested {
        remove.extend(suggested_removals(&report)?);
    }
    if remove.is_empty() {
        return session.print_report(&report);
    }

    let removal = duplicates::remove_entries(&mut model, &remove, session.config.include_recycle_bin);
    store(&mut db, &model, save)?;
    session.print_report(&json!({
        "groups": report.groups,
        "removal": removal,
        "summary": report.summary,
    }))
}

fn suggested_removals(report: &DuplicateReport) -> Result<Vec<Uuid>> {
    report
        .groups
        .iter()
        .flat_map(|group| group.removable())
        .map(|uuid| parse_uuid(uuid).context("Duplicate report holds an invalid uuid"))
        .collect()
}

fn import(
    session: &Session,
    source: &Path,
    target: &Path,
    mode: ImportMode,
    select: &[Uuid],
    save: &SaveArgs,
) -> Result<()> {
    let source = session.open_a(source)?.to_model();
    let mut target_db = session.open_b(target)?;
    let mut target_model = target_db.to_model();

    let outcome = keediff_core::import_entries(&source, &mut target_model, mode, select);
    store(&mut target_db, &target_model, save)?;
    session.print(&outcome)
}

fn read_plan(path: &Path) -> Result<Vec<TransferRequest>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transfer plan: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse transfer plan: {}", path.display()))
}

fn transfer_requests(
    copy_to_a: &[Uuid],
    copy_to_b: &[Uuid],
    overwrite_a: &[Uuid],
    overwrite_b: &[Uuid],
) -> Vec<TransferRequest> {
    let batches = [
        (copy_to_a, TransferAction::Copy, Direction::ToA),
        (copy_to_b, TransferAction::Copy, Direction::ToB),
        (overwrite_a, TransferAction::Overwrite, Direction::ToA),
        (overwrite_b, TransferAction::Overwrite, Direction::ToB),
    ];
    batches
        .into_iter()
        .flat_map(|(uuids, action, direction)| {
            uuids
                .iter()
                .map(move |uuid| TransferRequest::new(*uuid, action, direction))
        })
        .collect()
}

fn transfer(
    session: &Session,
    a: &Path,
    b: &Path,
    requests: &[TransferRequest],
    write: bool,
) -> Result<()> {
    let mut db_a = session.open_a(a)?;
    let mut db_b = session.open_b(b)?;
    let (mut model_a, mut model_b) = (db_a.to_model(), db_b.to_model());

    let outcome = keediff_core::transfer(&mut model_a, &mut model_b, requests);

    let save = SaveArgs {
        write,
        output: None,
    };
    store(&mut db_a, &model_a, &save)?;
    store(&mut db_b, &model_b, &save)?;
    session.print(&outcome)
}

fn search(
    session: &Session,
    path: &Path,
    with: Option<&Path>,
    query: &str,
    fields: Vec<FieldName>,
    fuzzy: bool,
) -> Result<()> {
    let model_a = session.open_a(path)?.to_model();
    let entries_a = session.entries(&model_a);

    if fuzzy {
        let hits = keediff_core::search::fuzzy_search(&entries_a, query, SEARCH_RESULT_LIMIT);
        return session.print(&hits);
    }

    let model_b = with
        .map(|path| session.open_b(path).map(|db| db.to_model()))
        .transpose()?;
    let entries_b = model_b.as_ref().map(|db| session.entries(db));

    let fields = if fields.is_empty() {
        session.config.search_field_names()
    } else {
        fields
    };

    let report = keediff_core::search(
        Some(entries_a.as_slice()),
        entries_b.as_deref(),
        query,
        &fields,
    );
    session.print_report(&report)
}

fn show(session: &Session, a: &Path, b: &Path, uuid: &Uuid, reveal: bool) -> Result<()> {
    let model_a = session.open_a(a)?.to_model();
    let model_b = session.open_b(b)?.to_model();
    let entries_b = session.entries(&model_b);

    let report = keediff_core::find_counterpart(
        &session.entries(&model_a),
        Some(entries_b.as_slice()),
        uuid,
        CounterpartOptions {
            show_protected: reveal,
        },
    );
    if report.source_entry.is_none() {
        anyhow::bail!("Entry {uuid} not found in {}", a.display());
    }
    session.print(&report)
}

fn import_csv(session: &Session, csv: &Path, output: &Path, password: &str) -> Result<()> {
    let content = std::fs::read_to_string(csv)
        .with_context(|| format!("Failed to read CSV file: {}", csv.display()))?;
    let import = csv_import::parse(&content)?;
    let model = csv_import::to_database(&import);
    KeepassDatabase::create(output, password, &model)?;

    session.print(&json!({
        "format": import.format,
        "stats": model.stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_flags_become_requests_in_order() {
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let requests = transfer_requests(&[x], &[], &[], &[y, x]);
        assert_eq!(
            requests,
            vec![
                TransferRequest::new(x, TransferAction::Copy, Direction::ToA),
                TransferRequest::new(y, TransferAction::Overwrite, Direction::ToB),
                TransferRequest::new(x, TransferAction::Overwrite, Direction::ToB),
            ]
        );
    }

    #[test]
    fn reads_transfer_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let id = Uuid::new_v4();
        std::fs::write(
            &path,
            format!(r#"[{{"uuid": "{id}", "action": "overwrite", "direction": "toA"}}]"#),
        )
        .unwrap();

        let plan = read_plan(&path).unwrap();
        assert_eq!(
            plan,
            vec![TransferRequest::new(id, TransferAction::Overwrite, Direction::ToA)]
        );

        std::fs::write(&path, r#"[{"uuid": "nope", "action": "copy", "direction": "toA"}]"#)
            .unwrap();
        assert!(read_plan(&path).is_err());
    }
}
