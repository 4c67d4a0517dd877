//! Product batches and their expiry tiers.
//!
//! Expiry status is computed, not stored, so [`annotate`] writes it onto each
//! row before filtering. Stats classify directly against the run's `today`.

use chrono::NaiveDate;
use serde_json::Value;

use crate::aggregate::{AggregationSpec, Reducer};
use crate::classify::{classify_expiry_record, days_until, ExpiryStatus};
use crate::engine::{run_at, EngineConfig, EngineOutput, EvalContext, SortDirection, SortKind, SortSpec};
use crate::export::ExportSpec;
use crate::filters::{FilterClause, FilterSpec};
use crate::pages::{annotate as annotate_row, non_blank, ListFilterInput};
use crate::records::{value_date, value_f64_or_zero, FieldResolver, Record};
use crate::settings::Settings;

pub const EXPIRY_STATUS_KEY: &str = "expiryStatus";
pub const DAYS_LEFT_KEY: &str = "daysToExpiry";

/// Copies of `records` carrying [`EXPIRY_STATUS_KEY`] and, when the expiry
/// date parses, [`DAYS_LEFT_KEY`].
pub fn annotate(
    records: &[Record],
    resolver: &FieldResolver,
    today: NaiveDate,
    horizon_days: i64,
) -> Vec<Record> {
    let expiry = resolver.resolve("expiry");
    records
        .iter()
        .map(|record| {
            let status = classify_expiry_record(record, resolver, today, horizon_days);
            let days = value_date(record, &expiry)
                .map(|when| Value::from(days_until(when, today)))
                .unwrap_or(Value::Null);
            annotate_row(
                record,
                &[
                    (EXPIRY_STATUS_KEY, Value::from(status.label())),
                    (DAYS_LEFT_KEY, days),
                ],
            )
        })
        .collect()
}

fn count_expiry(resolver: &FieldResolver, horizon_days: i64, status: ExpiryStatus) -> Reducer {
    let resolver = resolver.clone();
    Reducer::custom(0.0, move |acc, record, ctx| {
        if classify_expiry_record(record, &resolver, ctx.today(), horizon_days) == status {
            acc + 1.0
        } else {
            acc
        }
    })
}

/// Expects rows from [`annotate`]; the status dropdown filters on the
/// annotated label and the date range applies to the expiry date.
pub fn config(
    input: &ListFilterInput,
    settings: &Settings,
    resolver: &FieldResolver,
    _ctx: &EvalContext,
) -> EngineConfig {
    let horizon = settings.near_expiry_days;
    let expiry = resolver.resolve("expiry");
    let search = resolver
        .resolve("batchNumber")
        .or(resolver.resolve("name"))
        .or(resolver.resolve("supplier"));
    let status = input
        .status_value()
        .map(|s| ExpiryStatus::from_value(Some(s)).map_or(s, |status| status.label()));

    let at_risk = {
        let resolver = resolver.clone();
        Reducer::custom(0.0, move |acc, record, ctx| {
            match classify_expiry_record(record, &resolver, ctx.today(), horizon) {
                ExpiryStatus::Expired | ExpiryStatus::NearExpiry => {
                    acc + value_f64_or_zero(record, &resolver.resolve("quantity"))
                }
                _ => acc,
            }
        })
    };

    EngineConfig {
        filters: FilterSpec::new()
            .with(FilterClause::contains_any(search, input.search_term()))
            .with(FilterClause::equals(EXPIRY_STATUS_KEY, status.map(Value::from)))
            .with_date_range(
                expiry.clone(),
                non_blank(input.date_from.as_deref()),
                non_blank(input.date_to.as_deref()),
            ),
        aggregations: AggregationSpec::new()
            .with("total", Reducer::Count)
            .with("expired", count_expiry(resolver, horizon, ExpiryStatus::Expired))
            .with("nearExpiry", count_expiry(resolver, horizon, ExpiryStatus::NearExpiry))
            .with("valid", count_expiry(resolver, horizon, ExpiryStatus::Valid))
            .with("unknown", count_expiry(resolver, horizon, ExpiryStatus::Unknown))
            .with("quantityAtRisk", at_risk),
        export: ExportSpec::new()
            .field("Batch #", resolver.resolve("batchNumber"))
            .field("Product", resolver.resolve("name"))
            .field("Quantity", resolver.resolve("quantity"))
            .date("Expiry Date", expiry.clone(), &settings.date_format)
            .field("Days Left", DAYS_LEFT_KEY)
            .field("Status", EXPIRY_STATUS_KEY),
        sort: Some(SortSpec {
            field: expiry,
            direction: SortDirection::Asc,
            kind: SortKind::Date,
        }),
        csv_mode: settings.csv_mode,
        ..EngineConfig::default()
    }
}

/// Annotates then runs the batches page in one call.
pub fn run(
    records: &[Record],
    input: &ListFilterInput,
    settings: &Settings,
    resolver: &FieldResolver,
    ctx: &EvalContext,
) -> EngineOutput {
    let rows = annotate(records, resolver, ctx.today(), settings.near_expiry_days);
    run_at(&rows, &config(input, settings, resolver, ctx), ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext::at(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
        )
    }

    fn batches() -> Vec<Record> {
        vec![
            json!({ "batchNumber": "B-1", "productName": "Yogurt", "quantity": 10, "expiryDate": "2024-05-30" }),
            json!({ "batchNumber": "B-2", "productName": "Cheese", "quantity": 4, "expiryDate": "2024-06-01" }),
            json!({ "batchNumber": "B-3", "productName": "Honey", "quantity": 7, "expiry_date": "2025-01-01" }),
            json!({ "batchNumber": "B-4", "productName": "Salt", "quantity": 3 }),
        ]
    }

    #[test]
    fn annotate_adds_status_and_days_left() {
        let rows = annotate(&batches(), &FieldResolver::default_table(), ctx().today(), 30);
        assert_eq!(rows[0][EXPIRY_STATUS_KEY], "Expired");
        assert_eq!(rows[0][DAYS_LEFT_KEY], -2);
        assert_eq!(rows[1][EXPIRY_STATUS_KEY], "Near Expiry");
        assert_eq!(rows[1][DAYS_LEFT_KEY], 0);
        assert_eq!(rows[3][EXPIRY_STATUS_KEY], "Unknown");
        assert!(rows[3][DAYS_LEFT_KEY].is_null());
    }

    #[test]
    fn stats_count_each_tier() {
        let out = run(
            &batches(),
            &ListFilterInput::default(),
            &Settings::default(),
            &FieldResolver::default_table(),
            &ctx(),
        );
        assert_eq!(out.stats.get("total"), 4.0);
        assert_eq!(out.stats.get("expired"), 1.0);
        assert_eq!(out.stats.get("nearExpiry"), 1.0);
        assert_eq!(out.stats.get("valid"), 1.0);
        assert_eq!(out.stats.get("unknown"), 1.0);
        assert_eq!(out.stats.get("quantityAtRisk"), 14.0);
        let order: Vec<&str> = out
            .filtered
            .iter()
            .filter_map(|r| r["batchNumber"].as_str())
            .collect();
        assert_eq!(order, vec!["B-1", "B-2", "B-3", "B-4"]);
    }

    #[test]
    fn status_dropdown_accepts_slug_values() {
        let input = ListFilterInput {
            status: Some("near-expiry".into()),
            ..ListFilterInput::default()
        };
        let out = run(
            &batches(),
            &input,
            &Settings::default(),
            &FieldResolver::default_table(),
            &ctx(),
        );
        assert_eq!(
            out.export_text,
            "Batch #,Product,Quantity,Expiry Date,Days Left,Status\n\
             B-2,Cheese,4,2024-06-01,0,Near Expiry"
        );
    }
}
