//! Sales invoices list.
//!
//! Payment status may be stored in any case or not at all, so [`annotate`]
//! writes the effective label onto each row and the status dropdown filters
//! on that.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{AggregationSpec, Reducer};
use crate::engine::{run_at, EngineConfig, EngineOutput, EvalContext, SortSpec};
use crate::export::ExportSpec;
use crate::pages::{annotate as annotate_row, line_items, line_name, list_filters, ListFilterInput};
use crate::records::{value_f64, value_str, FieldRef, FieldResolver, Record};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Partial,
    Unpaid,
}

impl PaymentStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Paid => "Paid",
            Self::Partial => "Partial",
            Self::Unpaid => "Unpaid",
        }
    }

    pub fn from_value(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("paid") | Some("completed") => Some(Self::Paid),
            Some("partial") | Some("partially_paid") | Some("partially paid") => Some(Self::Partial),
            Some("unpaid") | Some("pending") | Some("due") => Some(Self::Unpaid),
            _ => None,
        }
    }

    /// Stored status when recognisable, otherwise derived from the amounts.
    pub fn of(record: &Record, resolver: &FieldResolver) -> Self {
        if let Some(status) = Self::from_value(value_str(record, &status_field()).as_deref()) {
            return status;
        }
        let total = invoice_total(record, resolver);
        let paid = amount_paid(record);
        if total > 0.0 && paid >= total {
            Self::Paid
        } else if paid > 0.0 {
            Self::Partial
        } else {
            Self::Unpaid
        }
    }
}

pub const PAYMENT_LABEL_KEY: &str = "paymentLabel";

/// Copies of `records` carrying their effective [`PaymentStatus`] label under
/// [`PAYMENT_LABEL_KEY`].
pub fn annotate(records: &[Record], resolver: &FieldResolver) -> Vec<Record> {
    records
        .iter()
        .map(|record| {
            let label = PaymentStatus::of(record, resolver).label();
            annotate_row(record, &[(PAYMENT_LABEL_KEY, Value::from(label))])
        })
        .collect()
}

fn status_field() -> FieldRef {
    FieldRef::from(["paymentStatus", "payment_status", "status"])
}

fn paid_field() -> FieldRef {
    FieldRef::from(["paidAmount", "paid_amount", "amountPaid", "amount_paid"])
}

pub fn invoice_total(record: &Record, resolver: &FieldResolver) -> f64 {
    value_f64(record, &resolver.resolve("amount")).unwrap_or(0.0)
}

pub fn amount_paid(record: &Record) -> f64 {
    value_f64(record, &paid_field()).unwrap_or(0.0)
}

/// Never negative; overpayment is not a credit here.
pub fn balance_due(record: &Record, resolver: &FieldResolver) -> f64 {
    (invoice_total(record, resolver) - amount_paid(record)).max(0.0)
}

fn count_payment(resolver: &FieldResolver, status: PaymentStatus) -> Reducer {
    let resolver = resolver.clone();
    Reducer::custom(0.0, move |acc, record, _| {
        if PaymentStatus::of(record, &resolver) == status {
            acc + 1.0
        } else {
            acc
        }
    })
}

/// Expects rows from [`annotate`]; see [`run`].
pub fn config(
    input: &ListFilterInput,
    settings: &Settings,
    resolver: &FieldResolver,
    ctx: &EvalContext,
) -> EngineConfig {
    let amount = resolver.resolve("amount");
    let search = resolver
        .resolve("invoiceNumber")
        .or(resolver.resolve("customer"))
        .or(["customerPhone", "customer.phone"]);

    let outstanding = {
        let resolver = resolver.clone();
        Reducer::custom(0.0, move |acc, record, _| acc + balance_due(record, &resolver))
    };
    let balance_column = {
        let resolver = resolver.clone();
        move |record: &Record| format!("{:.2}", balance_due(record, &resolver))
    };
    let status_column = {
        let resolver = resolver.clone();
        move |record: &Record| PaymentStatus::of(record, &resolver).label().to_string()
    };

    let input = ListFilterInput {
        status: input
            .status_value()
            .map(|s| PaymentStatus::from_value(Some(s)).map_or(s, |status| status.label()))
            .map(str::to_string),
        ..input.clone()
    };

    EngineConfig {
        filters: list_filters(&input, search, PAYMENT_LABEL_KEY.into(), resolver.resolve("date"), ctx),
        aggregations: AggregationSpec::new()
            .with("count", Reducer::Count)
            .with("revenue", Reducer::Sum(amount.clone()))
            .with("collected", Reducer::Sum(paid_field()))
            .with("outstanding", outstanding)
            .with("averageValue", Reducer::Average(amount.clone()))
            .with("paid", count_payment(resolver, PaymentStatus::Paid))
            .with("partial", count_payment(resolver, PaymentStatus::Partial))
            .with("unpaid", count_payment(resolver, PaymentStatus::Unpaid)),
        export: ExportSpec::new()
            .field("Invoice #", resolver.resolve("invoiceNumber"))
            .date("Date", resolver.resolve("date"), &settings.date_format)
            .field("Customer", resolver.resolve("customer"))
            .custom("Items", |record| {
                line_items(record)
                    .iter()
                    .map(line_name)
                    .filter(|n| !n.is_empty())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .money("Total", amount)
            .money("Paid", paid_field())
            .custom("Balance", balance_column)
            .custom("Status", status_column),
        sort: Some(SortSpec::newest_first(resolver.resolve("date"))),
        csv_mode: settings.csv_mode,
        ..EngineConfig::default()
    }
}

/// Annotates then runs the invoices page in one call.
pub fn run(
    records: &[Record],
    input: &ListFilterInput,
    settings: &Settings,
    resolver: &FieldResolver,
    ctx: &EvalContext,
) -> EngineOutput {
    let rows = annotate(records, resolver);
    run_at(&rows, &config(input, settings, resolver, ctx), ctx)
}
