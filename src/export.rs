//! CSV export of filtered records.
//!
//! [`CsvMode::Raw`] reproduces the web client's export byte for byte: fields
//! joined with `,`, rows with `\n`, nothing quoted. A value containing a comma
//! or newline therefore shifts the row. [`CsvMode::Quoted`] writes RFC 4180
//! output through the `csv` crate for callers that opt in.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::records::{
    display_text, resolve, value_at, value_date, value_f64, value_str, FieldRef, Record, When,
};

pub type CellFn = Arc<dyn Fn(&Record) -> String + Send + Sync>;

#[derive(Clone)]
pub enum Accessor {
    /// Display text of the resolved value.
    Field(FieldRef),
    /// Number with fixed decimals; empty when missing or non-numeric.
    Money { field: FieldRef, decimals: usize },
    /// Date rendered with a chrono format string; empty when unparseable.
    Date { field: FieldRef, format: String },
    /// Array elements (or one key of each element) joined with `separator`.
    Join {
        field: FieldRef,
        item_key: Option<String>,
        separator: String,
    },
    Custom(CellFn),
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Field(field) => f.debug_tuple("Field").field(field).finish(),
            Accessor::Money { field, decimals } => f
                .debug_struct("Money")
                .field("field", field)
                .field("decimals", decimals)
                .finish(),
            Accessor::Date { field, format } => f
                .debug_struct("Date")
                .field("field", field)
                .field("format", format)
                .finish(),
            Accessor::Join {
                field,
                item_key,
                separator,
            } => f
                .debug_struct("Join")
                .field("field", field)
                .field("item_key", item_key)
                .field("separator", separator)
                .finish(),
            Accessor::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Accessor {
    pub fn cell(&self, record: &Record) -> String {
        match self {
            Accessor::Field(field) => value_str(record, field).unwrap_or_default(),
            Accessor::Money { field, decimals } => value_f64(record, field)
                .map(|v| format!("{:.*}", *decimals, v))
                .unwrap_or_default(),
            Accessor::Date { field, format } => value_date(record, field)
                .map(|when| format_when(when, format))
                .unwrap_or_default(),
            Accessor::Join {
                field,
                item_key,
                separator,
            } => match resolve(record, field) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| match item_key {
                        Some(key) => value_at(item, key).and_then(display_text),
                        None => display_text(item),
                    })
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(separator),
                Some(other) => display_text(other).unwrap_or_default(),
                None => String::new(),
            },
            Accessor::Custom(f) => f(record),
        }
    }
}

/// Formats with a user-supplied pattern. chrono panics in `to_string` on a
/// bad pattern, so write through `fmt::Write` and fall back to ISO.
pub(crate) fn format_when(when: When, pattern: &str) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    let ok = match when {
        When::Day(d) => write!(out, "{}", d.format(pattern)),
        When::At(dt) => write!(out, "{}", dt.format(pattern)),
    };
    if ok.is_err() {
        return when.date().format("%Y-%m-%d").to_string();
    }
    out
}

#[derive(Debug, Clone)]
pub struct Column {
    pub header: String,
    pub accessor: Accessor,
}

/// Ordered `(header, accessor)` columns.
#[derive(Debug, Clone, Default)]
pub struct ExportSpec {
    columns: Vec<Column>,
}

impl ExportSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, header: impl Into<String>, accessor: Accessor) -> Self {
        self.columns.push(Column {
            header: header.into(),
            accessor,
        });
        self
    }

    pub fn field(self, header: impl Into<String>, field: impl Into<FieldRef>) -> Self {
        self.column(header, Accessor::Field(field.into()))
    }

    pub fn money(self, header: impl Into<String>, field: impl Into<FieldRef>) -> Self {
        self.column(
            header,
            Accessor::Money {
                field: field.into(),
                decimals: 2,
            },
        )
    }

    pub fn date(self, header: impl Into<String>, field: impl Into<FieldRef>, format: &str) -> Self {
        self.column(
            header,
            Accessor::Date {
                field: field.into(),
                format: format.to_string(),
            },
        )
    }

    pub fn custom<F>(self, header: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Record) -> String + Send + Sync + 'static,
    {
        self.column(header, Accessor::Custom(Arc::new(f)))
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.header.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn row(&self, record: &Record) -> Vec<String> {
        self.columns.iter().map(|c| c.accessor.cell(record)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvMode {
    #[default]
    Raw,
    Quoted,
}

/// Header row plus one row per record, unescaped.
pub fn to_csv<'r, I>(records: I, spec: &ExportSpec) -> String
where
    I: IntoIterator<Item = &'r Record>,
{
    let mut lines: Vec<String> = vec![spec.headers().collect::<Vec<_>>().join(",")];
    lines.extend(records.into_iter().map(|r| spec.row(r).join(",")));
    lines.join("\n")
}

/// Same shape as [`to_csv`], in the requested mode. Quoted output has no
/// trailing newline either, so the two modes differ only in escaping.
pub fn to_csv_with<'r, I>(records: I, spec: &ExportSpec, mode: CsvMode) -> Result<String>
where
    I: IntoIterator<Item = &'r Record>,
{
    match mode {
        CsvMode::Raw => Ok(to_csv(records, spec)),
        CsvMode::Quoted => {
            let mut writer = csv::WriterBuilder::new()
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(Vec::new());
            writer.write_record(spec.headers())?;
            for record in records {
                writer.write_record(spec.row(record))?;
            }
            let bytes = writer.into_inner()?;
            let mut text = String::from_utf8(bytes).map_err(|e| {
                EngineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?;
            if text.ends_with('\n') {
                text.pop();
            }
            Ok(text)
        }
    }
}

/// `<resource>-<unix-ms>.csv`
pub fn export_filename(resource: &str, unix_ms: i64) -> String {
    let slug: String = resource
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = if slug.is_empty() { "export".to_string() } else { slug };
    format!("{slug}-{unix_ms}.csv")
}

/// Writes `text` into `dir` under [`export_filename`] and returns the path.
pub fn write_export(dir: &Path, resource: &str, text: &str, unix_ms: i64) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_filename(resource, unix_ms));
    std::fs::write(&path, text)?;
    info!(path = %path.display(), bytes = text.len(), "CSV export written");
    Ok(path)
}
