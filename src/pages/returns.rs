//! Product returns list.
//!
//! The Pending -> Approved | Rejected lifecycle is enforced by the server;
//! [`ReturnStatus::can_transition_to`] only stops the client from asking for
//! a transition the server would refuse.
//!
//! Stored statuses arrive in any case; [`annotate`] writes the canonical one
//! onto each row so the dropdown and the summary cards agree.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{AggregationSpec, Reducer};
use crate::engine::{run_at, EngineConfig, EngineOutput, EvalContext, SortSpec};
use crate::export::ExportSpec;
use crate::pages::{annotate as annotate_row, list_filters, ListFilterInput};
use crate::records::{value_f64_or_zero, value_str, FieldRef, FieldResolver, Record};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReturnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn from_value(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("pending") => Some(Self::Pending),
            Some("approved") => Some(Self::Approved),
            Some("rejected") | Some("declined") => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn of(record: &Record) -> Option<Self> {
        Self::from_value(value_str(record, &FieldRef::from(["status", "state"])).as_deref())
    }

    pub fn can_transition_to(self, next: ReturnStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected)
        )
    }

    /// Actions to offer for a return in this state.
    pub fn next_statuses(self) -> &'static [ReturnStatus] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected],
            Self::Approved | Self::Rejected => &[],
        }
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const RETURN_STATUS_KEY: &str = "returnStatus";

/// Copies of `records` carrying the canonical status under
/// [`RETURN_STATUS_KEY`]. Unrecognised statuses are copied as stored.
pub fn annotate(records: &[Record], resolver: &FieldResolver) -> Vec<Record> {
    let stored = resolver.resolve("status");
    records
        .iter()
        .map(|record| {
            let status = match ReturnStatus::of(record) {
                Some(status) => Value::from(status.as_str()),
                None => value_str(record, &stored).map_or(Value::Null, Value::from),
            };
            annotate_row(record, &[(RETURN_STATUS_KEY, status)])
        })
        .collect()
}

fn count_return(status: ReturnStatus) -> Reducer {
    Reducer::custom(0.0, move |acc, record, _| {
        if ReturnStatus::of(record) == Some(status) {
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
    let amount = FieldRef::from(["refundAmount", "refund_amount"]).or(resolver.resolve("amount"));
    let search = resolver
        .resolve("returnNumber")
        .or(resolver.resolve("customer"))
        .or(resolver.resolve("name"))
        .or(["reason", "invoiceNumber"]);

    let approved_refunds = {
        let amount = amount.clone();
        Reducer::custom(0.0, move |acc, record, _| {
            if ReturnStatus::of(record) == Some(ReturnStatus::Approved) {
                acc + value_f64_or_zero(record, &amount)
            } else {
                acc
            }
        })
    };
    let input = ListFilterInput {
        status: input
            .status_value()
            .map(|s| ReturnStatus::from_value(Some(s)).map_or(s, |status| status.as_str()))
            .map(str::to_string),
        ..input.clone()
    };

    EngineConfig {
        filters: list_filters(
            &input,
            search,
            RETURN_STATUS_KEY.into(),
            resolver.resolve("date"),
            ctx,
        ),
        aggregations: AggregationSpec::new()
            .with("total", Reducer::Count)
            .with("pending", count_return(ReturnStatus::Pending))
            .with("approved", count_return(ReturnStatus::Approved))
            .with("rejected", count_return(ReturnStatus::Rejected))
            .with("refundTotal", Reducer::Sum(amount.clone()))
            .with("approvedRefundTotal", approved_refunds),
        export: ExportSpec::new()
            .field("Return #", resolver.resolve("returnNumber"))
            .date("Date", resolver.resolve("date"), &settings.date_format)
            .field("Customer", resolver.resolve("customer"))
            .field("Product", resolver.resolve("name"))
            .field("Quantity", resolver.resolve("quantity"))
            .money("Amount", amount)
            .field("Status", resolver.resolve("status"))
            .field("Reason", "reason"),
        sort: Some(SortSpec::newest_first(resolver.resolve("date"))),
        csv_mode: settings.csv_mode,
        ..EngineConfig::default()
    }
}

/// Annotates then runs the returns page in one call.
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext::at(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        )
    }

    fn returns() -> Vec<Record> {
        vec![
            json!({ "id": "RET-1", "createdAt": "2024-01-01", "status": "Pending", "customerName": "Ana", "productName": "Kettle", "quantity": 1, "refundAmount": 40, "reason": "Broken" }),
            json!({ "id": "RET-2", "createdAt": "2024-01-15", "status": "Approved", "customerName": "Bo", "productName": "Toaster", "quantity": 2, "refundAmount": "25.5" }),
            json!({ "id": "RET-3", "createdAt": "2024-02-01", "status": "Pending", "customer": { "name": "Cy" }, "totalAmount": 10 }),
        ]
    }

    #[test]
    fn transitions_only_leave_pending() {
        assert!(ReturnStatus::Pending.can_transition_to(ReturnStatus::Approved));
        assert!(ReturnStatus::Pending.can_transition_to(ReturnStatus::Rejected));
        assert!(!ReturnStatus::Approved.can_transition_to(ReturnStatus::Rejected));
        assert!(!ReturnStatus::Rejected.can_transition_to(ReturnStatus::Pending));
        assert!(!ReturnStatus::Pending.can_transition_to(ReturnStatus::Pending));
        assert!(ReturnStatus::Approved.next_statuses().is_empty());
        assert_eq!(ReturnStatus::of(&json!({ "status": "declined" })), Some(ReturnStatus::Rejected));
    }

    #[test]
    fn unfiltered_stats_cover_every_status() {
        let out = run(
            &returns(),
            &ListFilterInput::default(),
            &Settings::default(),
            &FieldResolver::default_table(),
            &ctx(),
        );
        assert_eq!(out.filtered.len(), 3);
        assert_eq!(out.filtered[0]["id"], "RET-3");
        assert_eq!(out.stats.get("total"), 3.0);
        assert_eq!(out.stats.get("pending"), 2.0);
        assert_eq!(out.stats.get("approved"), 1.0);
        assert_eq!(out.stats.get("rejected"), 0.0);
        assert_eq!(out.stats.get("refundTotal"), 75.5);
        assert_eq!(out.stats.get("approvedRefundTotal"), 25.5);
    }

    #[test]
    fn search_spans_customer_and_product() {
        let resolver = FieldResolver::default_table();
        let input = ListFilterInput {
            search: Some("toast".into()),
            ..ListFilterInput::default()
        };
        let out = run(&returns(), &input, &Settings::default(), &resolver, &ctx());
        assert_eq!(out.filtered.len(), 1);
        assert_eq!(out.filtered[0]["id"], "RET-2");

        let input = ListFilterInput {
            search: Some("cy".into()),
            ..ListFilterInput::default()
        };
        let out = run(&returns(), &input, &Settings::default(), &resolver, &ctx());
        assert_eq!(out.filtered.len(), 1);
        assert_eq!(out.filtered[0]["id"], "RET-3");
    }

    #[test]
    fn export_lists_rows_newest_first() {
        let input = ListFilterInput {
            status: Some("Approved".into()),
            ..ListFilterInput::default()
        };
        let out = run(&returns(), &input, &Settings::default(), &FieldResolver::default_table(), &ctx());
        assert_eq!(
            out.export_text,
            "Return #,Date,Customer,Product,Quantity,Amount,Status,Reason\n\
             RET-2,2024-01-15,Bo,Toaster,2,25.50,Approved,"
        );
    }

    #[test]
    fn lowercase_statuses_count_and_filter_like_canonical_ones() {
        let mut records = returns();
        records.push(json!({ "id": "RET-9", "createdAt": "2024-02-02", "status": "pending", "refundAmount": 5 }));
        records.push(json!({ "id": "RET-10", "createdAt": "2024-02-03", "status": "APPROVED", "refundAmount": 7 }));
        let resolver = FieldResolver::default_table();

        let out = run(&records, &ListFilterInput::default(), &Settings::default(), &resolver, &ctx());
        assert_eq!(out.stats.get("total"), 5.0);
        assert_eq!(out.stats.get("pending"), 3.0);
        assert_eq!(out.stats.get("approved"), 2.0);
        assert_eq!(
            out.stats.get("pending") + out.stats.get("approved") + out.stats.get("rejected"),
            out.stats.get("total")
        );
        assert_eq!(out.stats.get("approvedRefundTotal"), 32.5);

        let input = ListFilterInput {
            status: Some("pending".into()),
            ..ListFilterInput::default()
        };
        let out = run(&records, &input, &Settings::default(), &resolver, &ctx());
        let ids: Vec<&str> = out.filtered.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["RET-9", "RET-3", "RET-1"]);
        assert_eq!(out.stats.get("pending"), 3.0);
    }

    #[test]
    fn unrecognised_status_is_kept_for_the_dropdown() {
        let records = vec![json!({ "id": "RET-5", "status": "Processing" })];
        let rows = annotate(&records, &FieldResolver::default_table());
        assert_eq!(rows[0][RETURN_STATUS_KEY], "Processing");
        assert!(annotate(&[json!({ "id": "RET-6" })], &FieldResolver::default_table())[0][RETURN_STATUS_KEY].is_null());
    }
}
