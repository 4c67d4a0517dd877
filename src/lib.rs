//! StockDesk - store management list engine
//!
//! Shared filter, derive and export pipeline behind the returns, invoices,
//! stock-in, batches, low stock and inventory pages. Callers fetch records
//! (see [`api`]), build a page configuration (see [`pages`]) and get back the
//! filtered rows, summary stats and CSV text from [`engine::run`].

pub mod aggregate;
pub mod api;
pub mod classify;
pub mod engine;
pub mod error;
pub mod export;
pub mod filters;
pub mod logging;
pub mod pages;
pub mod print;
pub mod records;
pub mod settings;

pub use aggregate::{
    aggregate, aggregate_at, chart_series, daily_totals, group_by_category, AggregationSpec,
    ChartData, ChartPoint, GroupSpec, Reducer, SeriesConfig, Stats,
};
pub use api::{ApiClient, Resource};
pub use classify::{
    classify_expiry, classify_stock, days_until, ExpiryStatus, StockSeverity, StockThresholds,
};
pub use engine::{
    run, run_at, sort_records, EngineConfig, EngineOutput, EvalContext, SortDirection, SortKind,
    SortSpec, StatsScope,
};
pub use error::{EngineError, Result};
pub use export::{export_filename, to_csv, to_csv_with, write_export, Accessor, Column, CsvMode, ExportSpec};
pub use filters::{filter, filter_refs, DateRangePreset, FilterClause, FilterKind, FilterSpec};
pub use pages::ListFilterInput;
pub use print::{open_print_view, render_invoice_html, InvoiceDoc};
pub use records::{value_at, value_date, value_f64, value_str, FieldRef, FieldResolver, Record, When};
pub use settings::{Settings, SettingsStore};
