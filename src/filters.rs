//! Declarative record filtering.
//!
//! A [`FilterSpec`] is an ordered list of clauses; a record passes when every
//! active clause matches. A clause with an empty value is inactive and matches
//! everything, so a page can hand its raw search-box state straight in.
//!
//! Output order always equals input order. Records whose date field does not
//! parse are excluded by every active date clause.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::records::{display_text, parse_when, resolve, value_at, value_date, FieldRef, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    /// Case-insensitive substring match on the first resolved candidate.
    TextContains,
    /// Case-insensitive substring match on *any* candidate path (search box
    /// spanning several columns).
    TextContainsAny,
    /// Strict equality with the stored value.
    ExactMatch,
    DateOnOrAfter,
    /// Inclusive through 23:59:59.999 when the bound is a bare date.
    DateOnOrBefore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterClause {
    pub field: FieldRef,
    pub kind: FilterKind,
    #[serde(default)]
    pub value: Option<Value>,
}

impl FilterClause {
    pub fn new(field: impl Into<FieldRef>, kind: FilterKind, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            kind,
            value,
        }
    }

    pub fn contains(field: impl Into<FieldRef>, term: Option<&str>) -> Self {
        Self::new(field, FilterKind::TextContains, term.map(Value::from))
    }

    pub fn contains_any(fields: impl Into<FieldRef>, term: Option<&str>) -> Self {
        Self::new(fields, FilterKind::TextContainsAny, term.map(Value::from))
    }

    pub fn equals(field: impl Into<FieldRef>, value: Option<Value>) -> Self {
        Self::new(field, FilterKind::ExactMatch, value)
    }

    pub fn on_or_after(field: impl Into<FieldRef>, bound: Option<&str>) -> Self {
        Self::new(field, FilterKind::DateOnOrAfter, bound.map(Value::from))
    }

    pub fn on_or_before(field: impl Into<FieldRef>, bound: Option<&str>) -> Self {
        Self::new(field, FilterKind::DateOnOrBefore, bound.map(Value::from))
    }

    /// Inactive clauses (no value, null, or a blank string) match everything.
    pub fn is_active(&self) -> bool {
        match &self.value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Evaluates a single clause against one record.
    pub fn matches(&self, record: &Record) -> bool {
        match Compiled::from_clause(self) {
            Some(compiled) => compiled.matches(record),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec {
    clauses: Vec<FilterClause>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, clause: FilterClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn push(&mut self, clause: FilterClause) {
        self.clauses.push(clause);
    }

    /// Adds an inclusive date range over `field`; either side may be empty.
    pub fn with_date_range(self, field: impl Into<FieldRef>, from: Option<&str>, to: Option<&str>) -> Self {
        let field = field.into();
        self.with(FilterClause::on_or_after(field.clone(), from))
            .with(FilterClause::on_or_before(field, to))
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn active_count(&self) -> usize {
        self.clauses.iter().filter(|c| c.is_active()).count()
    }

    /// Rejects date clauses whose bound cannot be parsed. Filtering itself
    /// never fails; this is for callers that want to flag bad input early.
    pub fn validate(&self) -> Result<()> {
        for clause in self.clauses.iter().filter(|c| c.is_active()) {
            if matches!(
                clause.kind,
                FilterKind::DateOnOrAfter | FilterKind::DateOnOrBefore
            ) && bound_when(clause.value.as_ref()).is_none()
            {
                return Err(EngineError::InvalidDateBound {
                    field: clause.field.primary().to_string(),
                    value: clause
                        .value
                        .as_ref()
                        .and_then(display_text)
                        .unwrap_or_default(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn bound_when(value: Option<&Value>) -> Option<crate::records::When> {
    match value? {
        Value::String(s) => parse_when(s),
        _ => None,
    }
}

/// A clause with its search term lowered and its date bound parsed once per
/// pass rather than once per record.
pub(crate) enum Compiled<'a> {
    Text { field: &'a FieldRef, needle: String },
    TextAny { field: &'a FieldRef, needle: String },
    Exact { field: &'a FieldRef, expected: &'a Value },
    After { field: &'a FieldRef, bound: Option<NaiveDateTime> },
    Before { field: &'a FieldRef, bound: Option<NaiveDateTime> },
}

impl<'a> Compiled<'a> {
    /// `None` for an inactive clause, which matches everything.
    pub(crate) fn from_clause(clause: &'a FilterClause) -> Option<Self> {
        if !clause.is_active() {
            return None;
        }
        let value = clause.value.as_ref()?;
        let field = &clause.field;
        let compiled = match clause.kind {
            FilterKind::TextContains => Compiled::Text {
                field,
                needle: display_text(value)?.to_lowercase(),
            },
            FilterKind::TextContainsAny => Compiled::TextAny {
                field,
                needle: display_text(value)?.to_lowercase(),
            },
            FilterKind::ExactMatch => Compiled::Exact {
                field,
                expected: value,
            },
            FilterKind::DateOnOrAfter => Compiled::After {
                field,
                bound: bound_when(Some(value)).map(|w| w.start()),
            },
            FilterKind::DateOnOrBefore => Compiled::Before {
                field,
                bound: bound_when(Some(value)).map(|w| w.end()),
            },
        };
        if matches!(
            compiled,
            Compiled::After { bound: None, .. } | Compiled::Before { bound: None, .. }
        ) {
            warn!(
                field = field.primary(),
                value = %value,
                "Unparseable date bound, clause excludes every record"
            );
        }
        Some(compiled)
    }

    pub(crate) fn matches(&self, record: &Record) -> bool {
        match self {
            Compiled::Text { field, needle } => {
                resolve(record, field).is_some_and(|v| text_contains(v, needle))
            }
            Compiled::TextAny { field, needle } => field
                .candidates()
                .filter_map(|path| value_at(record, path))
                .any(|v| text_contains(v, needle)),
            Compiled::Exact { field, expected } => {
                resolve(record, field).is_some_and(|actual| strict_eq(actual, expected))
            }
            Compiled::After { field, bound } => match (bound, value_date(record, field)) {
                (Some(bound), Some(when)) => when.start() >= *bound,
                _ => false,
            },
            Compiled::Before { field, bound } => match (bound, value_date(record, field)) {
                (Some(bound), Some(when)) => when.start() <= *bound,
                _ => false,
            },
        }
    }
}

fn text_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| text_contains(item, needle)),
        other => display_text(other)
            .map(|text| text.to_lowercase().contains(needle))
            .unwrap_or(false),
    }
}

/// Equality without coercion across types. Numbers compare by value so `1`
/// and `1.0` are equal, but `"1"` never equals `1`.
fn strict_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Records passing every active clause, borrowed in input order.
pub fn filter_refs<'r>(records: &'r [Record], spec: &FilterSpec) -> Vec<&'r Record> {
    let compiled: Vec<Compiled<'_>> = spec
        .clauses
        .iter()
        .filter_map(Compiled::from_clause)
        .collect();
    let out: Vec<&Record> = records
        .iter()
        .filter(|record| compiled.iter().all(|c| c.matches(record)))
        .collect();
    debug!(
        input = records.len(),
        output = out.len(),
        active_clauses = compiled.len(),
        "Filter pass complete"
    );
    out
}

/// Records passing every active clause, as a fresh sequence. `records` is
/// left untouched.
pub fn filter(records: &[Record], spec: &FilterSpec) -> Vec<Record> {
    filter_refs(records, spec).into_iter().cloned().collect()
}

// ---------------------------------------------------------------------------
// Relative ranges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateRangePreset {
    #[default]
    All,
    Today,
    Last7Days,
    Last30Days,
    ThisMonth,
}

impl DateRangePreset {
    pub fn from_value(value: Option<&str>) -> Self {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("today") => Self::Today,
            Some("last7days") | Some("week") | Some("7d") => Self::Last7Days,
            Some("last30days") | Some("month30") | Some("30d") => Self::Last30Days,
            Some("thismonth") | Some("month") => Self::ThisMonth,
            _ => Self::All,
        }
    }

    /// Inclusive `(from, to)` calendar days relative to `now`, or `None` for
    /// [`DateRangePreset::All`].
    pub fn bounds(self, now: NaiveDateTime) -> Option<(NaiveDate, NaiveDate)> {
        let today = now.date();
        match self {
            Self::All => None,
            Self::Today => Some((today, today)),
            Self::Last7Days => Some((today - Duration::days(6), today)),
            Self::Last30Days => Some((today - Duration::days(29), today)),
            Self::ThisMonth => Some((today.with_day(1).unwrap_or(today), today)),
        }
    }

    /// Appends the preset's range as two date clauses.
    pub fn apply(self, spec: FilterSpec, field: impl Into<FieldRef>, now: NaiveDateTime) -> FilterSpec {
        match self.bounds(now) {
            Some((from, to)) => {
                let from = from.format("%Y-%m-%d").to_string();
                let to = to.format("%Y-%m-%d").to_string();
                spec.with_date_range(field, Some(&from), Some(&to))
            }
            None => spec,
        }
    }
}
