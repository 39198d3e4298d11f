//! Browser password export (CSV) import.
//!
//! Chrome, Firefox and Safari exports are recognized from their header row.
//! Each row becomes one entry in the root group of a fresh database.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::models::{Database, Entry, FieldName};

/// Name given to the root group of an imported database.
pub const CSV_DATABASE_NAME: &str = "CSV Import";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvFormat {
    Chrome,
    Firefox,
    Safari,
}

/// One credential read from a CSV row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvRecord {
    pub title: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvImport {
    pub format: CsvFormat,
    pub records: Vec<CsvRecord>,
}

/// Detect the export format from the header row.
fn detect_format(headers: &[String]) -> Result<CsvFormat> {
    let has = |name: &str| headers.iter().any(|h| h == name);

    if has("httprealm") || has("formactionorigin") || has("guid") {
        return Ok(CsvFormat::Firefox);
    }
    if has("otpauth") || (has("title") && has("notes") && has("username")) {
        return Ok(CsvFormat::Safari);
    }
    if has("name") && has("url") && has("username") {
        return Ok(CsvFormat::Chrome);
    }
    bail!("Unrecognized CSV format. Supported formats: Chrome, Firefox, Safari")
}

/// Parse CSV content from a browser password export.
pub fn parse(content: &str) -> Result<CsvImport> {
    if content.trim().is_empty() {
        bail!("CSV content is empty");
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.trim().as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let format = detect_format(&headers)?;

    let column = |name: &str| headers.iter().position(|h| h == name);
    let (title_col, url_col, user_col, pass_col, notes_col) = (
        column(match format {
            CsvFormat::Chrome => "name",
            CsvFormat::Firefox | CsvFormat::Safari => "title",
        }),
        column("url"),
        column("username"),
        column("password"),
        column(match format {
            CsvFormat::Chrome => "note",
            CsvFormat::Firefox | CsvFormat::Safari => "notes",
        }),
    );

    let mut records = Vec::new();
    let mut rows = 0usize;
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Failed to parse CSV row {}", line + 2))?;
        rows += 1;
        if row.iter().all(|value| value.trim().is_empty()) {
            continue;
        }

        let get = |col: Option<usize>| col.and_then(|i| row.get(i)).unwrap_or_default().to_string();
        let url = get(url_col);
        let title = match format {
            CsvFormat::Firefox => host_or_url(&url),
            _ => get(title_col),
        };
        let notes = match format {
            CsvFormat::Firefox => String::new(),
            _ => get(notes_col),
        };

        records.push(CsvRecord {
            title,
            url,
            username: get(user_col),
            password: get(pass_col),
            notes,
        });
    }

    if rows == 0 {
        bail!("CSV file must have a header row and at least one data row");
    }

    tracing::info!("Parsed {} entries from {:?} CSV export", records.len(), format);
    Ok(CsvImport { format, records })
}

fn host_or_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Build a database with one entry per record, all in the root group.
pub fn to_database(import: &CsvImport) -> Database {
    let mut db = Database::new(CSV_DATABASE_NAME);
    db.root.entries = import
        .records
        .iter()
        .map(|record| {
            Entry::new()
                .with_field(FieldName::Title, &record.title)
                .with_field(FieldName::Url, &record.url)
                .with_field(FieldName::UserName, &record.username)
                .with_protected_field(FieldName::Password, &record.password)
                .with_field(FieldName::Notes, &record.notes)
        })
        .collect();
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chrome_export() {
        let csv = "name,url,username,password,note\n\
                   GitHub,https://github.com/login,octo,\"pa,ss\",\"multi\nline\"\n";
        let import = parse(csv).unwrap();
        assert_eq!(import.format, CsvFormat::Chrome);
        assert_eq!(
            import.records,
            vec![CsvRecord {
                title: "GitHub".into(),
                url: "https://github.com/login".into(),
                username: "octo".into(),
                password: "pa,ss".into(),
                notes: "multi\nline".into(),
            }]
        );
    }

    #[test]
    fn firefox_title_is_the_host() {
        let csv = "\"url\",\"username\",\"password\",\"httpRealm\",\"formActionOrigin\",\"guid\"\n\
                   \"https://accounts.example.com/signin\",\"me\",\"pw\",,\"\",\"{abc}\"\n\
                   \"not a url\",\"me\",\"pw\",,\"\",\"{def}\"\n";
        let import = parse(csv).unwrap();
        assert_eq!(import.format, CsvFormat::Firefox);
        assert_eq!(import.records[0].title, "accounts.example.com");
        assert_eq!(import.records[1].title, "not a url");
        assert!(import.records[0].notes.is_empty());
    }

    #[test]
    fn parses_safari_export_and_skips_blank_rows() {
        let csv = "Title,URL,Username,Password,Notes,OTPAuth\n\
                   Bank,https://bank.example,alice,pw,note,\n\
                   ,,,,,\n";
        let import = parse(csv).unwrap();
        assert_eq!(import.format, CsvFormat::Safari);
        assert_eq!(import.records.len(), 1);
        assert_eq!(import.records[0].notes, "note");
    }

    #[test]
    fn rejects_empty_headerless_and_unknown_input() {
        assert!(parse("   ").is_err());
        assert!(parse("name,url,username,password,note\n").is_err());
        assert!(parse("foo,bar\n1,2\n").is_err());
    }

    #[test]
    fn builds_database_with_protected_passwords() {
        let import = parse("name,url,username,password,note\nSite,https://s.example,u,p,\n").unwrap();
        let db = to_database(&import);
        assert_eq!(db.root.name, CSV_DATABASE_NAME);
        let entry = &db.root.entries[0];
        assert_eq!(entry.title(), "Site");
        assert!(entry.is_protected(&FieldName::Password));
        assert_eq!(entry.field_as_string(&FieldName::Password), "p");
    }
}
