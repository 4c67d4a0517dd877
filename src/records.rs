//! Record access helpers.
//!
//! Records are the raw JSON objects returned by the store API. Their field
//! names drifted over time (`stockQty` vs `quantity` vs `stock`), so every
//! lookup goes through a [`FieldRef`]: an ordered list of candidate key paths
//! where the first present, non-empty candidate wins.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One business entity (return, invoice, GRN, inventory row) as delivered by
/// the API. The engine imposes no schema on it.
pub type Record = Value;

/// Category used when none of the candidate fields resolve.
pub const UNCATEGORIZED: &str = "Uncategorized";

// ---------------------------------------------------------------------------
// FieldRef
// ---------------------------------------------------------------------------

/// Ordered candidate key paths for one logical field.
///
/// Paths are dot-separated (`"product.category"`). In JSON a `FieldRef` may be
/// written either as a single string or as an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<String>")]
pub struct FieldRef(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for FieldRef {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => FieldRef(vec![s]),
            OneOrMany::Many(v) => FieldRef(v),
        }
    }
}

impl From<FieldRef> for Vec<String> {
    fn from(f: FieldRef) -> Self {
        f.0
    }
}

impl From<&str> for FieldRef {
    fn from(path: &str) -> Self {
        FieldRef(vec![path.to_string()])
    }
}

impl<const N: usize> From<[&str; N]> for FieldRef {
    fn from(paths: [&str; N]) -> Self {
        FieldRef(paths.iter().map(|p| p.to_string()).collect())
    }
}

impl From<&[&str]> for FieldRef {
    fn from(paths: &[&str]) -> Self {
        FieldRef(paths.iter().map(|p| p.to_string()).collect())
    }
}

impl FieldRef {
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// First candidate path, used for labels and log fields.
    pub fn primary(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    /// Appends candidates from `other` that are not already present.
    pub fn or(mut self, other: impl Into<FieldRef>) -> Self {
        for path in other.into().0 {
            if !self.0.contains(&path) {
                self.0.push(path);
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Resolution table
// ---------------------------------------------------------------------------

/// Central table mapping a logical field name to its physical candidates.
#[derive(Debug, Clone)]
pub struct FieldResolver {
    table: HashMap<&'static str, FieldRef>,
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self::default_table()
    }
}

impl FieldResolver {
    pub fn default_table() -> Self {
        let entries: [(&'static str, &[&str]); 16] = [
            (
                "quantity",
                &["stockQty", "quantity", "stock", "qty", "currentStock", "current_stock"],
            ),
            (
                "category",
                &[
                    "category",
                    "categoryName",
                    "category_name",
                    "product.category",
                    "product.categoryName",
                ],
            ),
            ("name", &["name", "productName", "product_name", "product.name", "title"]),
            ("status", &["status", "state"]),
            (
                "date",
                &["createdAt", "created_at", "date", "returnDate", "invoiceDate", "receivedDate"],
            ),
            (
                "amount",
                &["totalAmount", "total_amount", "total", "amount", "grandTotal"],
            ),
            ("unitPrice", &["unitPrice", "unit_price", "price", "costPrice", "cost_price"]),
            ("expiry", &["expiryDate", "expiry_date", "expiresAt", "expirationDate"]),
            ("customer", &["customerName", "customer_name", "customer.name", "customer"]),
            ("supplier", &["supplierName", "supplier_name", "supplier.name", "supplier"]),
            (
                "criticalStock",
                &[
                    "criticalStockLevel",
                    "critical_stock_level",
                    "criticalStock",
                    "product.criticalStockLevel",
                    "product.critical_stock_level",
                ],
            ),
            (
                "minStock",
                &[
                    "minStockLevel",
                    "min_stock_level",
                    "minimumStock",
                    "reorderLevel",
                    "product.minStockLevel",
                    "product.min_stock_level",
                    "product.reorderLevel",
                ],
            ),
            ("batchNumber", &["batchNumber", "batch_number", "batchNo", "lotNumber"]),
            ("grnNumber", &["grnNumber", "grn_number", "referenceNumber", "reference"]),
            ("invoiceNumber", &["invoiceNumber", "invoice_number", "invoiceNo", "number"]),
            ("returnNumber", &["returnNumber", "return_number", "returnId", "id"]),
        ];
        let table = entries
            .into_iter()
            .map(|(logical, paths)| (logical, FieldRef::from(paths)))
            .collect();
        Self { table }
    }

    /// Candidates for `logical`. Unknown names resolve to themselves so a
    /// caller can always pass a physical key.
    pub fn resolve(&self, logical: &str) -> FieldRef {
        self.table
            .get(logical)
            .cloned()
            .unwrap_or_else(|| FieldRef::from(logical))
    }

    pub fn set(&mut self, logical: &'static str, candidates: impl Into<FieldRef>) {
        self.table.insert(logical, candidates.into());
    }
}

// ---------------------------------------------------------------------------
// Value access
// ---------------------------------------------------------------------------

/// Walks a dot-separated path. Numeric segments index into arrays.
pub fn value_at<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// First candidate value that is present, non-null and not a blank string.
pub fn resolve<'a>(record: &'a Value, field: &FieldRef) -> Option<&'a Value> {
    field
        .candidates()
        .filter_map(|path| value_at(record, path))
        .find(|v| !is_blank(v))
}

/// Renders a scalar as display text. Objects with a `name` key render as that
/// name; other containers render as compact JSON.
pub fn display_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(number_text(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => match map.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => Some(name.trim().to_string()),
            _ => Some(v.to_string()),
        },
        Value::Array(_) => Some(v.to_string()),
    }
}

/// Whole floats print without a trailing `.0`, the way the web client showed
/// them.
pub fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() => f64_text(f),
        _ => n.to_string(),
    }
}

pub fn f64_text(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

pub fn value_str(record: &Value, field: &FieldRef) -> Option<String> {
    resolve(record, field).and_then(display_text)
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// First candidate that parses as a number. Numeric-looking strings count;
/// a candidate that exists but does not parse falls through to the next.
pub fn value_f64(record: &Value, field: &FieldRef) -> Option<f64> {
    field
        .candidates()
        .filter_map(|path| value_at(record, path))
        .find_map(as_number)
}

/// Like [`value_f64`] with missing values treated as zero.
pub fn value_f64_or_zero(record: &Value, field: &FieldRef) -> f64 {
    value_f64(record, field).unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// A parsed calendar value: either a whole day or a local instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Day(NaiveDate),
    At(NaiveDateTime),
}

impl When {
    pub fn date(self) -> NaiveDate {
        match self {
            When::Day(d) => d,
            When::At(dt) => dt.date(),
        }
    }

    /// The instant itself, or midnight for a whole day.
    pub fn start(self) -> NaiveDateTime {
        match self {
            When::Day(d) => d.and_time(NaiveTime::MIN),
            When::At(dt) => dt,
        }
    }

    /// The instant itself, or 23:59:59.999 for a whole day.
    pub fn end(self) -> NaiveDateTime {
        match self {
            When::Day(d) => d.and_time(end_of_day()),
            When::At(dt) => dt,
        }
    }
}

pub(crate) fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses the timestamp shapes the API emits. Offsets are converted to local
/// wall-clock time; naive values are taken as local already.
pub fn parse_when(raw: &str) -> Option<When> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(When::At(dt.with_timezone(&Local).naive_local()));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(When::At(dt));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(When::Day)
}

/// Date value of a record field. Integers are unix milliseconds.
pub fn value_date(record: &Value, field: &FieldRef) -> Option<When> {
    match resolve(record, field)? {
        Value::String(s) => parse_when(s),
        Value::Number(n) => {
            let ms = n.as_i64()?;
            Local
                .timestamp_millis_opt(ms)
                .single()
                .map(|dt| When::At(dt.naive_local()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_at_walks_nested_objects_and_arrays() {
        let rec = json!({ "product": { "category": { "name": "Drinks" } }, "items": [{ "sku": "A1" }] });
        assert_eq!(
            value_at(&rec, "product.category.name"),
            Some(&json!("Drinks"))
        );
        assert_eq!(value_at(&rec, "items.0.sku"), Some(&json!("A1")));
        assert_eq!(value_at(&rec, "items.3.sku"), None);
        assert_eq!(value_at(&rec, "missing.path"), None);
    }

    #[test]
    fn resolve_skips_blank_candidates() {
        let rec = json!({ "stockQty": null, "quantity": "  ", "stock": 7 });
        let field = FieldRef::from(["stockQty", "quantity", "stock"]);
        assert_eq!(resolve(&rec, &field), Some(&json!(7)));
    }

    #[test]
    fn value_f64_parses_numeric_strings_in_priority_order() {
        let rec = json!({ "stockQty": "abc", "quantity": "12.5", "stock": 3 });
        let field = FieldRef::from(["stockQty", "quantity", "stock"]);
        assert_eq!(value_f64(&rec, &field), Some(12.5));
        assert_eq!(value_f64_or_zero(&json!({}), &field), 0.0);
    }

    #[test]
    fn display_text_uses_name_of_objects() {
        assert_eq!(
            display_text(&json!({ "name": "Snacks", "id": 4 })).as_deref(),
            Some("Snacks")
        );
        assert_eq!(display_text(&json!(42)).as_deref(), Some("42"));
        assert_eq!(display_text(&json!(12.0)).as_deref(), Some("12"));
        assert_eq!(display_text(&json!(2.5)).as_deref(), Some("2.5"));
        assert_eq!(display_text(&Value::Null), None);
    }

    #[test]
    fn parse_when_distinguishes_days_from_instants() {
        let day = parse_when("2024-06-15").unwrap();
        assert_eq!(day, When::Day(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()));
        assert_eq!(day.end().format("%H:%M:%S%.3f").to_string(), "23:59:59.999");

        let at = parse_when("2024-06-15T23:00:00").unwrap();
        assert!(matches!(at, When::At(_)));
        assert_eq!(at.date(), NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());

        assert!(parse_when("not a date").is_none());
        assert!(parse_when("").is_none());
    }

    #[test]
    fn field_ref_deserializes_from_string_or_list() {
        let one: FieldRef = serde_json::from_value(json!("status")).unwrap();
        let many: FieldRef = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(one, FieldRef::from("status"));
        assert_eq!(many.candidates().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn resolver_falls_back_to_physical_name() {
        let resolver = FieldResolver::default_table();
        assert_eq!(resolver.resolve("quantity").primary(), "stockQty");
        assert_eq!(resolver.resolve("supplierCode"), FieldRef::from("supplierCode"));
    }
}
