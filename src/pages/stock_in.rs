//! Goods received notes (stock-in).

use crate::aggregate::{AggregationSpec, Reducer};
use crate::engine::{EngineConfig, EvalContext, SortSpec};
use crate::export::ExportSpec;
use crate::pages::{count_status, line_items, line_quantity, line_total, list_filters, ListFilterInput};
use crate::records::{f64_text, value_f64, FieldResolver, Record};
use crate::settings::Settings;

/// Units received across every line item.
pub fn received_units(record: &Record) -> f64 {
    line_items(record).iter().map(line_quantity).sum()
}

/// Stored GRN total, or the sum of its line totals.
pub fn received_value(record: &Record, resolver: &FieldResolver) -> f64 {
    value_f64(record, &resolver.resolve("amount"))
        .unwrap_or_else(|| line_items(record).iter().map(line_total).sum())
}

pub fn config(
    input: &ListFilterInput,
    settings: &Settings,
    resolver: &FieldResolver,
    ctx: &EvalContext,
) -> EngineConfig {
    let status = resolver.resolve("status");
    let date = resolver.resolve("date").or(["receivedAt", "received_date"]);
    let search = resolver
        .resolve("grnNumber")
        .or(resolver.resolve("supplier"))
        .or(resolver.resolve("invoiceNumber"))
        .or(["notes"]);

    let value_reducer = {
        let resolver = resolver.clone();
        Reducer::custom(0.0, move |acc, record, _| acc + received_value(record, &resolver))
    };
    let value_column = {
        let resolver = resolver.clone();
        move |record: &Record| format!("{:.2}", received_value(record, &resolver))
    };

    EngineConfig {
        filters: list_filters(input, search, status.clone(), date.clone(), ctx),
        aggregations: AggregationSpec::new()
            .with("count", Reducer::Count)
            .with(
                "lineItems",
                Reducer::custom(0.0, |acc, record, _| acc + line_items(record).len() as f64),
            )
            .with("units", Reducer::custom(0.0, |acc, record, _| acc + received_units(record)))
            .with("value", value_reducer)
            .with("pending", count_status(status.clone(), "Pending"))
            .with("received", count_status(status.clone(), "Received")),
        export: ExportSpec::new()
            .field("GRN #", resolver.resolve("grnNumber"))
            .date("Date", date.clone(), &settings.date_format)
            .field("Supplier", resolver.resolve("supplier"))
            .custom("Items", |record| line_items(record).len().to_string())
            .custom("Quantity", |record| f64_text(received_units(record)))
            .custom("Value", value_column)
            .field("Status", status),
        sort: Some(SortSpec::newest_first(date)),
        csv_mode: settings.csv_mode,
        ..EngineConfig::default()
    }
}
