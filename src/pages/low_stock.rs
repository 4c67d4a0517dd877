//! Low stock alerts.
//!
//! Inventory rows are joined to their product so per-product thresholds win
//! over the row's own and over the store defaults.

use std::collections::HashMap;

use serde_json::Value;

use crate::aggregate::{chart_series, group_by_category, AggregationSpec, ChartData, GroupSpec, Reducer, SeriesConfig};
use crate::classify::{classify_stock, StockSeverity, StockThresholds};
use crate::engine::{run_at, EngineConfig, EngineOutput, EvalContext, SortDirection, SortKind, SortSpec};
use crate::export::ExportSpec;
use crate::filters::{FilterClause, FilterSpec};
use crate::pages::{annotate as annotate_row, ListFilterInput};
use crate::records::{value_f64, value_f64_or_zero, value_str, FieldRef, FieldResolver, Record};
use crate::settings::Settings;

pub const SEVERITY_KEY: &str = "severity";
pub const CRITICAL_LEVEL_KEY: &str = "criticalLevel";
pub const MINIMUM_LEVEL_KEY: &str = "minimumLevel";

fn product_ref() -> FieldRef {
    FieldRef::from(["productId", "product_id", "product.id", "product._id"])
}

fn id_of(record: &Record, field: &FieldRef) -> Option<String> {
    value_str(record, field)
}

/// Copies of `inventory` carrying the severity label and the thresholds it
/// was computed from.
pub fn annotate(
    inventory: &[Record],
    products: &[Record],
    resolver: &FieldResolver,
    defaults: StockThresholds,
) -> Vec<Record> {
    let product_id = FieldRef::from(["id", "_id"]);
    let by_id: HashMap<String, &Record> = products
        .iter()
        .filter_map(|p| id_of(p, &product_id).map(|id| (id, p)))
        .collect();
    let quantity = resolver.resolve("quantity");
    let product_ref = product_ref();

    inventory
        .iter()
        .map(|row| {
            let product = id_of(row, &product_ref).and_then(|id| by_id.get(&id).copied());
            let thresholds = StockThresholds::resolve(row, product, resolver, defaults);
            let qty = value_f64(row, &quantity).unwrap_or(0.0);
            let severity = classify_stock(qty, &thresholds);
            annotate_row(
                row,
                &[
                    (SEVERITY_KEY, Value::from(severity.label())),
                    (CRITICAL_LEVEL_KEY, Value::from(thresholds.critical)),
                    (MINIMUM_LEVEL_KEY, Value::from(thresholds.minimum)),
                ],
            )
        })
        .collect()
}

fn severity_is(severity: StockSeverity) -> FilterClause {
    FilterClause::equals(SEVERITY_KEY, Some(Value::from(severity.label())))
}

/// Units needed to bring an annotated row back up to its minimum level.
pub fn reorder_units(row: &Record, resolver: &FieldResolver) -> f64 {
    let minimum = value_f64_or_zero(row, &FieldRef::from(MINIMUM_LEVEL_KEY));
    let qty = value_f64_or_zero(row, &resolver.resolve("quantity"));
    (minimum - qty).max(0.0)
}

/// Expects rows from [`annotate`].
pub fn config(
    input: &ListFilterInput,
    settings: &Settings,
    resolver: &FieldResolver,
    _ctx: &EvalContext,
) -> EngineConfig {
    let search = resolver
        .resolve("name")
        .or(resolver.resolve("category"))
        .or(["sku", "barcode", "product.sku"]);
    let severity = input
        .status_value()
        .map(|s| StockSeverity::from_value(Some(s)).map_or(s, |sev| sev.label()));

    let reorder_value = {
        let resolver = resolver.clone();
        Reducer::custom(0.0, move |acc, row, _| {
            acc + reorder_units(row, &resolver) * value_f64_or_zero(row, &resolver.resolve("unitPrice"))
        })
    };
    let reorder_total = {
        let resolver = resolver.clone();
        Reducer::custom(0.0, move |acc, row, _| acc + reorder_units(row, &resolver))
    };

    EngineConfig {
        filters: FilterSpec::new()
            .with(FilterClause::contains_any(search, input.search_term()))
            .with(FilterClause::equals(SEVERITY_KEY, severity.map(Value::from))),
        aggregations: AggregationSpec::new()
            .with("total", Reducer::Count)
            .with("critical", Reducer::CountWhere(severity_is(StockSeverity::Critical)))
            .with("warning", Reducer::CountWhere(severity_is(StockSeverity::Warning)))
            .with("low", Reducer::CountWhere(severity_is(StockSeverity::Low)))
            .with("reorderUnits", reorder_total)
            .with("reorderValue", reorder_value),
        export: ExportSpec::new()
            .field("Product", resolver.resolve("name"))
            .field("Category", resolver.resolve("category"))
            .field("Quantity", resolver.resolve("quantity"))
            .field("Critical Level", CRITICAL_LEVEL_KEY)
            .field("Minimum Level", MINIMUM_LEVEL_KEY)
            .field("Severity", SEVERITY_KEY),
        sort: Some(SortSpec {
            field: resolver.resolve("quantity"),
            direction: SortDirection::Asc,
            kind: SortKind::Number,
        }),
        csv_mode: settings.csv_mode,
        ..EngineConfig::default()
    }
}

/// Units on hand per category among Critical and Warning rows.
pub fn category_distribution(rows: &[Record], resolver: &FieldResolver, limit: Option<usize>) -> ChartData {
    let alerts = rows.iter().filter(|row| {
        StockSeverity::from_value(value_str(row, &FieldRef::from(SEVERITY_KEY)).as_deref())
            .is_some_and(|s| s >= StockSeverity::Warning)
    });
    let groups = group_by_category(alerts, &GroupSpec::from_resolver(resolver));
    ChartData::from_points(
        &chart_series(&groups, limit),
        "category",
        SeriesConfig {
            key: "quantity".to_string(),
            label: "Units on hand".to_string(),
            color: None,
        },
    )
}

/// Joins, annotates and runs the low stock page in one call.
pub fn run(
    inventory: &[Record],
    products: &[Record],
    input: &ListFilterInput,
    settings: &Settings,
    resolver: &FieldResolver,
    ctx: &EvalContext,
) -> EngineOutput {
    let rows = annotate(inventory, products, resolver, settings.stock_thresholds);
    run_at(&rows, &config(input, settings, resolver, ctx), ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext::at(
            NaiveDate::from_ymd_opt(2024, 5, 5)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        )
    }

    fn inventory() -> Vec<Record> {
        vec![
            json!({ "productId": "p1", "productName": "Cola", "category": "Drinks", "stockQty": 2, "unitPrice": 1.5 }),
            json!({ "productId": "p2", "productName": "Chips", "category": "Snacks", "stockQty": 4, "unitPrice": 2 }),
            json!({ "productId": "p3", "productName": "Water", "category": "Drinks", "stockQty": 9, "unitPrice": 0.5 }),
            json!({ "productName": "Soap", "category": "Home", "stockQty": 40 }),
        ]
    }

    fn products() -> Vec<Record> {
        vec![json!({ "id": "p2", "criticalStockLevel": 3, "minStockLevel": 12 })]
    }

    #[test]
    fn product_thresholds_override_defaults() {
        let rows = annotate(&inventory(), &products(), &FieldResolver::default_table(), StockThresholds::default());
        assert_eq!(rows[0][SEVERITY_KEY], "Critical");
        assert_eq!(rows[1][SEVERITY_KEY], "Warning");
        assert_eq!(rows[1][MINIMUM_LEVEL_KEY], 12.0);
        assert_eq!(rows[2][SEVERITY_KEY], "Warning");
        assert_eq!(rows[3][SEVERITY_KEY], "Low");
    }

    #[test]
    fn stats_include_reorder_value() {
        let resolver = FieldResolver::default_table();
        let out = run(&inventory(), &products(), &ListFilterInput::default(), &Settings::default(), &resolver, &ctx());
        assert_eq!(out.stats.get("critical"), 1.0);
        assert_eq!(out.stats.get("warning"), 2.0);
        assert_eq!(out.stats.get("low"), 1.0);
        // Cola 8 x 1.5, Chips 8 x 2, Water 1 x 0.5
        assert_eq!(out.stats.get("reorderUnits"), 17.0);
        assert_eq!(out.stats.get("reorderValue"), 28.5);
        let order: Vec<&str> = out.filtered.iter().filter_map(|r| r["productName"].as_str()).collect();
        assert_eq!(order, vec!["Cola", "Chips", "Water", "Soap"]);
    }

    #[test]
    fn severity_filter_and_export() {
        let input = ListFilterInput {
            status: Some("critical".into()),
            ..ListFilterInput::default()
        };
        let out = run(&inventory(), &products(), &input, &Settings::default(), &FieldResolver::default_table(), &ctx());
        assert_eq!(
            out.export_text,
            "Product,Category,Quantity,Critical Level,Minimum Level,Severity\n\
             Cola,Drinks,2,5,10,Critical"
        );
    }

    #[test]
    fn distribution_covers_alert_rows_only() {
        let resolver = FieldResolver::default_table();
        let rows = annotate(&inventory(), &products(), &resolver, StockThresholds::default());
        let chart = category_distribution(&rows, &resolver, None);
        assert_eq!(chart.data.len(), 2);
        assert_eq!(chart.data[0]["category"], "Drinks");
        assert_eq!(chart.data[0]["quantity"], 11.0);
        assert_eq!(chart.data[1]["category"], "Snacks");
    }
}
