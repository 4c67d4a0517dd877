//! Inventory overview: stock valuation and the category chart.

use crate::aggregate::{chart_series, group_by_category, AggregationSpec, ChartData, GroupSpec, Reducer, SeriesConfig};
use crate::classify::{classify_stock_record, StockSeverity};
use crate::engine::{EngineConfig, EvalContext, SortDirection, SortKind, SortSpec};
use crate::export::ExportSpec;
use crate::filters::{FilterClause, FilterSpec};
use crate::pages::ListFilterInput;
use crate::records::{value_f64, value_f64_or_zero, FieldResolver, Record};
use crate::settings::Settings;

/// Default number of slices before the rest fold into "Other".
pub const CHART_SLICES: usize = 8;

pub fn stock_value(record: &Record, resolver: &FieldResolver) -> f64 {
    value_f64_or_zero(record, &resolver.resolve("quantity"))
        * value_f64_or_zero(record, &resolver.resolve("unitPrice"))
}

/// The status dropdown on this page selects a category.
pub fn config(
    input: &ListFilterInput,
    settings: &Settings,
    resolver: &FieldResolver,
    _ctx: &EvalContext,
) -> EngineConfig {
    let quantity = resolver.resolve("quantity");
    let search = resolver
        .resolve("name")
        .or(["sku", "barcode"])
        .or(resolver.resolve("category"));

    let out_of_stock = {
        let quantity = quantity.clone();
        Reducer::custom(0.0, move |acc, record, _| match value_f64(record, &quantity) {
            Some(q) if q > 0.0 => acc,
            _ => acc + 1.0,
        })
    };
    let needs_reorder = {
        let resolver = resolver.clone();
        let defaults = settings.stock_thresholds;
        Reducer::custom(0.0, move |acc, record, _| {
            if classify_stock_record(record, None, &resolver, defaults) >= StockSeverity::Warning {
                acc + 1.0
            } else {
                acc
            }
        })
    };
    let value_column = {
        let resolver = resolver.clone();
        move |record: &Record| format!("{:.2}", stock_value(record, &resolver))
    };

    EngineConfig {
        filters: FilterSpec::new()
            .with(FilterClause::contains_any(search, input.search_term()))
            .with(FilterClause::contains(resolver.resolve("category"), input.status_value())),
        aggregations: AggregationSpec::new()
            .with("products", Reducer::Count)
            .with("units", Reducer::Sum(quantity.clone()))
            .with(
                "stockValue",
                Reducer::SumProduct {
                    left: quantity.clone(),
                    right: resolver.resolve("unitPrice"),
                },
            )
            .with("outOfStock", out_of_stock)
            .with("needsReorder", needs_reorder),
        export: ExportSpec::new()
            .field("Product", resolver.resolve("name"))
            .field("SKU", ["sku", "barcode"])
            .field("Category", resolver.resolve("category"))
            .field("Quantity", quantity)
            .money("Unit Price", resolver.resolve("unitPrice"))
            .custom("Stock Value", value_column),
        sort: Some(SortSpec {
            field: resolver.resolve("name"),
            direction: SortDirection::Asc,
            kind: SortKind::Text,
        }),
        csv_mode: settings.csv_mode,
        ..EngineConfig::default()
    }
}

/// Units per category, largest first, for the pie chart.
pub fn category_chart(records: &[Record], resolver: &FieldResolver, limit: Option<usize>) -> ChartData {
    let groups = group_by_category(records, &GroupSpec::from_resolver(resolver));
    ChartData::from_points(
        &chart_series(&groups, limit),
        "category",
        SeriesConfig {
            key: "quantity".to_string(),
            label: "Units".to_string(),
            color: None,
        },
    )
}
