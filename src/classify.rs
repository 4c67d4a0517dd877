//! Severity tiers for stock levels and batch expiry.
//!
//! Both classifiers are total: missing quantities, thresholds or dates map to
//! a defined tier instead of an error. Tiers derive `Ord` in ascending
//! severity, so `a > b` reads as "a is more severe than b".

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::{value_date, value_f64, FieldResolver, Record, When};

pub const DEFAULT_CRITICAL_STOCK: f64 = 5.0;
pub const DEFAULT_MIN_STOCK: f64 = 10.0;
pub const NEAR_EXPIRY_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Stock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StockSeverity {
    Low,
    Warning,
    Critical,
}

impl StockSeverity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }

    pub fn from_value(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("critical") => Some(Self::Critical),
            Some("warning") => Some(Self::Warning),
            Some("low") => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockThresholds {
    pub critical: f64,
    pub minimum: f64,
}

impl Default for StockThresholds {
    fn default() -> Self {
        Self {
            critical: DEFAULT_CRITICAL_STOCK,
            minimum: DEFAULT_MIN_STOCK,
        }
    }
}

impl StockThresholds {
    /// Thresholds configured on the related product, then on the row itself,
    /// then `defaults`.
    pub fn resolve(
        record: &Record,
        product: Option<&Record>,
        resolver: &FieldResolver,
        defaults: StockThresholds,
    ) -> Self {
        let lookup = |logical: &str| {
            let field = resolver.resolve(logical);
            product
                .and_then(|p| value_f64(p, &field))
                .or_else(|| value_f64(record, &field))
        };
        Self {
            critical: lookup("criticalStock").unwrap_or(defaults.critical),
            minimum: lookup("minStock").unwrap_or(defaults.minimum),
        }
    }
}

/// `quantity <= critical` is Critical, `quantity <= minimum` is Warning,
/// anything above is Low.
pub fn classify_stock(quantity: f64, thresholds: &StockThresholds) -> StockSeverity {
    if quantity <= thresholds.critical {
        StockSeverity::Critical
    } else if quantity <= thresholds.minimum {
        StockSeverity::Warning
    } else {
        StockSeverity::Low
    }
}

/// Classifies an inventory row. A missing quantity counts as zero stock.
pub fn classify_stock_record(
    record: &Record,
    product: Option<&Record>,
    resolver: &FieldResolver,
    defaults: StockThresholds,
) -> StockSeverity {
    let quantity = value_f64(record, &resolver.resolve("quantity")).unwrap_or(0.0);
    let thresholds = StockThresholds::resolve(record, product, resolver, defaults);
    classify_stock(quantity, &thresholds)
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

/// `Unknown` (no parseable expiry date) sorts below `Valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExpiryStatus {
    Unknown,
    Valid,
    NearExpiry,
    Expired,
}

impl ExpiryStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Valid => "Valid",
            Self::NearExpiry => "Near Expiry",
            Self::Expired => "Expired",
        }
    }

    pub fn from_value(value: Option<&str>) -> Option<Self> {
        let normalized: String = value?
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "expired" => Some(Self::Expired),
            "nearexpiry" | "near" | "expiringsoon" => Some(Self::NearExpiry),
            "valid" | "ok" => Some(Self::Valid),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Whole days from `today` to the expiry day; negative once expired.
pub fn days_until(expiry: When, today: NaiveDate) -> i64 {
    (expiry.date() - today).num_days()
}

/// Day-level comparison: a batch expiring today is near expiry, not expired.
pub fn classify_expiry(expiry: Option<When>, today: NaiveDate, horizon_days: i64) -> ExpiryStatus {
    match expiry {
        None => ExpiryStatus::Unknown,
        Some(when) => {
            let days = days_until(when, today);
            if days < 0 {
                ExpiryStatus::Expired
            } else if days <= horizon_days {
                ExpiryStatus::NearExpiry
            } else {
                ExpiryStatus::Valid
            }
        }
    }
}

pub fn classify_expiry_record(
    record: &Record,
    resolver: &FieldResolver,
    today: NaiveDate,
    horizon_days: i64,
) -> ExpiryStatus {
    classify_expiry(
        value_date(record, &resolver.resolve("expiry")),
        today,
        horizon_days,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn stock_tiers_follow_thresholds() {
        let t = StockThresholds::default();
        assert_eq!(classify_stock(0.0, &t), StockSeverity::Critical);
        assert_eq!(classify_stock(5.0, &t), StockSeverity::Critical);
        assert_eq!(classify_stock(6.0, &t), StockSeverity::Warning);
        assert_eq!(classify_stock(10.0, &t), StockSeverity::Warning);
        assert_eq!(classify_stock(11.0, &t), StockSeverity::Low);
    }

    #[test]
    fn lowering_critical_threshold_never_increases_severity() {
        let loose = StockThresholds { critical: 5.0, minimum: 10.0 };
        let strict = StockThresholds { critical: 3.0, minimum: 10.0 };
        let before = classify_stock(4.0, &loose);
        let after = classify_stock(4.0, &strict);
        assert_eq!(before, StockSeverity::Critical);
        assert_eq!(after, StockSeverity::Warning);
        assert!(after < before);

        for qty in 0..20 {
            let q = qty as f64;
            assert!(classify_stock(q, &strict) <= classify_stock(q, &loose));
        }
    }

    #[test]
    fn thresholds_prefer_product_then_row_then_defaults() {
        let resolver = FieldResolver::default_table();
        let row = json!({ "stockQty": 7, "minStockLevel": "8" });
        let product = json!({ "criticalStockLevel": 2 });

        let t = StockThresholds::resolve(&row, Some(&product), &resolver, StockThresholds::default());
        assert_eq!(t, StockThresholds { critical: 2.0, minimum: 8.0 });

        let t = StockThresholds::resolve(&json!({}), None, &resolver, StockThresholds::default());
        assert_eq!(t, StockThresholds::default());

        assert_eq!(
            classify_stock_record(&row, Some(&product), &resolver, StockThresholds::default()),
            StockSeverity::Warning
        );
        assert_eq!(
            classify_stock_record(&json!({}), None, &resolver, StockThresholds::default()),
            StockSeverity::Critical
        );
    }

    #[test]
    fn expiry_tiers_use_day_granularity() {
        let today = day(2024, 6, 1);
        let at = |y, m, d| Some(When::Day(day(y, m, d)));
        assert_eq!(classify_expiry(at(2024, 5, 31), today, 30), ExpiryStatus::Expired);
        assert_eq!(classify_expiry(at(2024, 6, 1), today, 30), ExpiryStatus::NearExpiry);
        assert_eq!(classify_expiry(at(2024, 7, 1), today, 30), ExpiryStatus::NearExpiry);
        assert_eq!(classify_expiry(at(2024, 7, 2), today, 30), ExpiryStatus::Valid);
        assert_eq!(classify_expiry(None, today, 30), ExpiryStatus::Unknown);
    }

    #[test]
    fn widening_horizon_never_decreases_severity() {
        let today = day(2024, 6, 1);
        for offset in -5..60 {
            let when = Some(When::Day(today + chrono::Duration::days(offset)));
            assert!(classify_expiry(when, today, 45) >= classify_expiry(when, today, 30));
        }
    }

    #[test]
    fn expiry_record_reads_candidate_fields() {
        let resolver = FieldResolver::default_table();
        let today = day(2024, 6, 1);
        let batch = json!({ "expiry_date": "2024-06-10T00:00:00" });
        assert_eq!(
            classify_expiry_record(&batch, &resolver, today, NEAR_EXPIRY_DAYS),
            ExpiryStatus::NearExpiry
        );
        let broken = json!({ "expiryDate": "n/a" });
        assert_eq!(
            classify_expiry_record(&broken, &resolver, today, NEAR_EXPIRY_DAYS),
            ExpiryStatus::Unknown
        );
    }

    #[test]
    fn labels_parse_back() {
        assert_eq!(StockSeverity::from_value(Some(" Critical ")), Some(StockSeverity::Critical));
        assert_eq!(StockSeverity::from_value(Some("all")), None);
        assert_eq!(ExpiryStatus::from_value(Some("near-expiry")), Some(ExpiryStatus::NearExpiry));
        assert_eq!(ExpiryStatus::from_value(Some(ExpiryStatus::NearExpiry.label())), Some(ExpiryStatus::NearExpiry));
    }
}
