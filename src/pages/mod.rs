//! Per-page engine configurations.
//!
//! Each list page (returns, invoices, stock-in, batches, low stock, inventory)
//! supplies only its filter, aggregation and export definitions; the shared
//! engine does the rest. Pages take the raw UI filter state as a
//! [`ListFilterInput`], which accepts the spellings the web client used.

pub mod batches;
pub mod invoices;
pub mod inventory;
pub mod low_stock;
pub mod returns;
pub mod stock_in;

use serde::Deserialize;
use serde_json::Value;

use crate::aggregate::Reducer;
use crate::engine::EvalContext;
use crate::filters::{DateRangePreset, FilterClause, FilterSpec};
use crate::records::{resolve, value_f64, value_str, FieldRef, Record};

/// Search box, status dropdown and date range as the page holds them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilterInput {
    #[serde(default, alias = "searchTerm", alias = "query")]
    pub search: Option<String>,
    #[serde(default, alias = "statusFilter")]
    pub status: Option<String>,
    #[serde(default, alias = "date_from", alias = "startDate")]
    pub date_from: Option<String>,
    #[serde(default, alias = "date_to", alias = "endDate")]
    pub date_to: Option<String>,
    /// Relative range (`today`, `last7days`, ...) used when no explicit
    /// bounds are given.
    #[serde(default, alias = "dateRange")]
    pub range: Option<String>,
}

impl ListFilterInput {
    /// A bare string is treated as the search term; anything unparseable
    /// yields an empty (match-all) input.
    pub fn from_payload(arg0: Option<Value>) -> Self {
        match arg0 {
            Some(Value::String(search)) => Self {
                search: Some(search),
                ..Self::default()
            },
            Some(v) => serde_json::from_value(v).unwrap_or_default(),
            None => Self::default(),
        }
    }

    pub fn search_term(&self) -> Option<&str> {
        non_blank(self.search.as_deref())
    }

    /// `all` (any case) and blanks mean "no status filter".
    pub fn status_value(&self) -> Option<&str> {
        non_blank(self.status.as_deref()).filter(|s| !s.eq_ignore_ascii_case("all"))
    }

    fn has_explicit_dates(&self) -> bool {
        non_blank(self.date_from.as_deref()).is_some() || non_blank(self.date_to.as_deref()).is_some()
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Search, status and date clauses shared by every dated list page.
pub(crate) fn list_filters(
    input: &ListFilterInput,
    search_fields: FieldRef,
    status_field: FieldRef,
    date_field: FieldRef,
    ctx: &EvalContext,
) -> FilterSpec {
    let spec = FilterSpec::new()
        .with(FilterClause::contains_any(search_fields, input.search_term()))
        .with(FilterClause::equals(
            status_field,
            input.status_value().map(Value::from),
        ));
    if input.has_explicit_dates() {
        spec.with_date_range(
            date_field,
            non_blank(input.date_from.as_deref()),
            non_blank(input.date_to.as_deref()),
        )
    } else {
        DateRangePreset::from_value(input.range.as_deref()).apply(spec, date_field, ctx.now)
    }
}

/// Inserts computed display fields into object records; other values pass
/// through untouched.
pub(crate) fn annotate(record: &Value, fields: &[(&str, Value)]) -> Value {
    let mut out = record.clone();
    if let Value::Object(map) = &mut out {
        for (key, value) in fields {
            map.insert((*key).to_string(), value.clone());
        }
    }
    out
}

/// Counts records whose status equals `status`, ignoring case.
pub(crate) fn count_status(field: FieldRef, status: &'static str) -> Reducer {
    Reducer::custom(0.0, move |acc, record, _| {
        match value_str(record, &field) {
            Some(s) if s.eq_ignore_ascii_case(status) => acc + 1.0,
            _ => acc,
        }
    })
}

// ---------------------------------------------------------------------------
// Line items (invoices, GRNs)
// ---------------------------------------------------------------------------

const ITEMS: [&str; 4] = ["items", "lineItems", "line_items", "products"];
const LINE_QTY: [&str; 5] = ["quantity", "qty", "receivedQuantity", "received_quantity", "receivedQty"];
const LINE_PRICE: [&str; 7] = [
    "unitPrice",
    "unit_price",
    "price",
    "unitCost",
    "unit_cost",
    "costPrice",
    "cost_price",
];
const LINE_TOTAL: [&str; 4] = ["lineTotal", "line_total", "total", "subtotal"];

/// Line items of an invoice or GRN; empty when the record has none.
pub fn line_items(record: &Record) -> &[Value] {
    match resolve(record, &FieldRef::from(ITEMS)) {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

pub fn line_quantity(item: &Value) -> f64 {
    value_f64(item, &FieldRef::from(LINE_QTY)).unwrap_or(0.0)
}

pub fn line_unit_price(item: &Value) -> f64 {
    value_f64(item, &FieldRef::from(LINE_PRICE)).unwrap_or(0.0)
}

/// Stored line total, or quantity times unit price.
pub fn line_total(item: &Value) -> f64 {
    value_f64(item, &FieldRef::from(LINE_TOTAL))
        .unwrap_or_else(|| line_quantity(item) * line_unit_price(item))
}

pub fn line_name(item: &Value) -> String {
    value_str(
        item,
        &FieldRef::from(["name", "productName", "product_name", "product.name", "description"]),
    )
    .unwrap_or_default()
}
