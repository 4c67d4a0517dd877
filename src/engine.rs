//! Filter-derive-export pipeline.
//!
//! `run` takes already-fetched records and a per-page [`EngineConfig`] and
//! returns the filtered rows, their summary statistics and the CSV text in
//! one pass. The wall clock is read once per run into an [`EvalContext`] so
//! every relative-date decision in that run agrees.

use std::cmp::Ordering;

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::{aggregate_at, AggregationSpec, Stats};
use crate::export::{to_csv, to_csv_with, CsvMode, ExportSpec};
use crate::filters::{filter_refs, FilterSpec};
use crate::records::{value_date, value_f64, value_str, FieldRef, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalContext {
    /// Local wall-clock time.
    pub now: NaiveDateTime,
    pub unix_ms: i64,
}

impl EvalContext {
    pub fn capture() -> Self {
        let now = Local::now();
        Self {
            now: now.naive_local(),
            unix_ms: now.timestamp_millis(),
        }
    }

    /// Fixed context; `now` doubles as the UTC instant.
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            now,
            unix_ms: now.and_utc().timestamp_millis(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKind {
    #[default]
    Text,
    Number,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field: FieldRef,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub kind: SortKind,
}

impl SortSpec {
    pub fn newest_first(field: impl Into<FieldRef>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
            kind: SortKind::Date,
        }
    }
}

#[derive(Debug, PartialEq, PartialOrd)]
enum SortKey {
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

fn sort_key(record: &Record, spec: &SortSpec) -> Option<SortKey> {
    match spec.kind {
        SortKind::Text => value_str(record, &spec.field).map(|s| SortKey::Text(s.to_lowercase())),
        SortKind::Number => value_f64(record, &spec.field).map(SortKey::Number),
        SortKind::Date => value_date(record, &spec.field).map(|w| SortKey::Date(w.start())),
    }
}

/// Stable sort; records without a usable key go last in either direction.
pub fn sort_records(records: &mut [&Record], spec: &SortSpec) {
    records.sort_by(|a, b| match (sort_key(a, spec), sort_key(b, spec)) {
        (Some(ka), Some(kb)) => {
            let ord = ka.partial_cmp(&kb).unwrap_or(Ordering::Equal);
            match spec.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Which rows the summary cards describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsScope {
    #[default]
    Filtered,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub filters: FilterSpec,
    pub aggregations: AggregationSpec,
    pub export: ExportSpec,
    pub sort: Option<SortSpec>,
    pub stats_scope: StatsScope,
    pub csv_mode: CsvMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOutput {
    pub filtered: Vec<Record>,
    pub stats: Stats,
    pub export_text: String,
}

/// Runs the pipeline with an explicit context.
pub fn run_at(records: &[Record], config: &EngineConfig, ctx: &EvalContext) -> EngineOutput {
    let mut rows = filter_refs(records, &config.filters);
    if let Some(sort) = &config.sort {
        sort_records(&mut rows, sort);
    }

    let stats = match config.stats_scope {
        StatsScope::Filtered => aggregate_at(rows.iter().copied(), &config.aggregations, ctx),
        StatsScope::All => aggregate_at(records, &config.aggregations, ctx),
    };

    let export_text = if config.export.is_empty() {
        String::new()
    } else {
        to_csv_with(rows.iter().copied(), &config.export, config.csv_mode).unwrap_or_else(|e| {
            warn!(error = %e, "Quoted CSV export failed, falling back to raw");
            to_csv(rows.iter().copied(), &config.export)
        })
    };

    debug!(
        input = records.len(),
        filtered = rows.len(),
        stats = stats.len(),
        "Engine run complete"
    );

    EngineOutput {
        filtered: rows.into_iter().cloned().collect(),
        stats,
        export_text,
    }
}

/// Runs the pipeline, reading the clock once.
pub fn run(records: &[Record], config: &EngineConfig) -> EngineOutput {
    run_at(records, config, &EvalContext::capture())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Reducer;
    use crate::filters::FilterClause;
    use serde_json::json;

    fn sales() -> Vec<Record> {
        vec![
            json!({ "id": 1, "createdAt": "2024-03-01T10:00:00", "total": 10, "cashier": "Ana" }),
            json!({ "id": 2, "createdAt": "2024-03-03T09:00:00", "total": 30, "cashier": "bo" }),
            json!({ "id": 3, "createdAt": "bad", "total": 5, "cashier": "Cy" }),
            json!({ "id": 4, "createdAt": "2024-03-02T12:00:00", "total": 20 }),
        ]
    }

    fn ids(rows: &[Record]) -> Vec<i64> {
        rows.iter().filter_map(|r| r["id"].as_i64()).collect()
    }

    #[test]
    fn newest_first_puts_undated_rows_last() {
        let records = sales();
        let mut rows: Vec<&Record> = records.iter().collect();
        sort_records(&mut rows, &SortSpec::newest_first("createdAt"));
        let order: Vec<i64> = rows.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn text_sort_is_case_insensitive() {
        let records = sales();
        let mut rows: Vec<&Record> = records.iter().collect();
        sort_records(
            &mut rows,
            &SortSpec {
                field: "cashier".into(),
                direction: SortDirection::Asc,
                kind: SortKind::Text,
            },
        );
        let order: Vec<i64> = rows.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn run_produces_filtered_stats_and_export() {
        let config = EngineConfig {
            filters: FilterSpec::new().with_date_range("createdAt", Some("2024-03-02"), None),
            aggregations: AggregationSpec::new()
                .with("count", Reducer::Count)
                .with("revenue", Reducer::Sum("total".into())),
            export: ExportSpec::new().field("Id", "id").money("Total", "total"),
            sort: Some(SortSpec::newest_first("createdAt")),
            ..EngineConfig::default()
        };
        let records = sales();
        let out = run(&records, &config);
        assert_eq!(ids(&out.filtered), vec![2, 4]);
        assert_eq!(out.stats.get("count"), 2.0);
        assert_eq!(out.stats.get("revenue"), 50.0);
        assert_eq!(out.export_text, "Id,Total\n2,30.00\n4,20.00");
        assert_eq!(records, sales());
    }

    #[test]
    fn stats_scope_all_ignores_filters() {
        let config = EngineConfig {
            filters: FilterSpec::new().with(FilterClause::equals("id", Some(json!(1)))),
            aggregations: AggregationSpec::new().with("count", Reducer::Count),
            stats_scope: StatsScope::All,
            ..EngineConfig::default()
        };
        let out = run(&sales(), &config);
        assert_eq!(out.filtered.len(), 1);
        assert_eq!(out.stats.get("count"), 4.0);
        assert!(out.export_text.is_empty());
    }

    #[test]
    fn context_exposes_day_and_millis() {
        let now = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let ctx = EvalContext::at(now);
        assert_eq!(ctx.today(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(ctx.unix_ms, 1_704_153_600_000);
    }
}
