//! Summary statistics and chart data over filtered records.
//!
//! All reducers run in a single pass. Missing or non-numeric fields count as
//! zero, numeric-looking strings are parsed, and empty inputs yield zero for
//! every reducer, so summary cards never show `NaN`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::engine::EvalContext;
use crate::filters::{Compiled, FilterClause};
use crate::records::{value_date, value_f64_or_zero, value_str, FieldRef, FieldResolver, Record, UNCATEGORIZED};

/// `(accumulator, record, context) -> accumulator`.
pub type StepFn = Arc<dyn Fn(f64, &Record, &EvalContext) -> f64 + Send + Sync>;

#[derive(Clone)]
pub enum Reducer {
    Count,
    CountWhere(FilterClause),
    Sum(FieldRef),
    SumWhere { field: FieldRef, when: FilterClause },
    /// Sum of `left * right` per record, e.g. quantity times unit price.
    SumProduct { left: FieldRef, right: FieldRef },
    Average(FieldRef),
    Min(FieldRef),
    Max(FieldRef),
    Custom { init: f64, step: StepFn },
}

impl Reducer {
    pub fn custom<F>(init: f64, step: F) -> Self
    where
        F: Fn(f64, &Record, &EvalContext) -> f64 + Send + Sync + 'static,
    {
        Reducer::Custom {
            init,
            step: Arc::new(step),
        }
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Count => f.write_str("Count"),
            Reducer::CountWhere(c) => f.debug_tuple("CountWhere").field(c).finish(),
            Reducer::Sum(field) => f.debug_tuple("Sum").field(field).finish(),
            Reducer::SumWhere { field, when } => f
                .debug_struct("SumWhere")
                .field("field", field)
                .field("when", when)
                .finish(),
            Reducer::SumProduct { left, right } => f
                .debug_struct("SumProduct")
                .field("left", left)
                .field("right", right)
                .finish(),
            Reducer::Average(field) => f.debug_tuple("Average").field(field).finish(),
            Reducer::Min(field) => f.debug_tuple("Min").field(field).finish(),
            Reducer::Max(field) => f.debug_tuple("Max").field(field).finish(),
            Reducer::Custom { init, .. } => f.debug_struct("Custom").field("init", init).finish(),
        }
    }
}

/// Ordered, named reducers.
#[derive(Debug, Clone, Default)]
pub struct AggregationSpec {
    reducers: Vec<(String, Reducer)>,
}

impl AggregationSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, reducer: Reducer) -> Self {
        self.reducers.push((name.into(), reducer));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.reducers.iter().map(|(name, _)| name.as_str())
    }
}

/// Flat stat name -> number mapping. Unknown names read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stats(BTreeMap<String, f64>);

impl Stats {
    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

enum Acc {
    Scalar(f64),
    Mean { sum: f64, n: usize },
    Extreme(Option<f64>),
}

impl Acc {
    fn start(reducer: &Reducer) -> Self {
        match reducer {
            Reducer::Average(_) => Acc::Mean { sum: 0.0, n: 0 },
            Reducer::Min(_) | Reducer::Max(_) => Acc::Extreme(None),
            Reducer::Custom { init, .. } => Acc::Scalar(*init),
            _ => Acc::Scalar(0.0),
        }
    }

    /// `when` is the reducer's condition, compiled once for the pass; `None`
    /// passes every record.
    fn step(&mut self, reducer: &Reducer, when: Option<&Compiled<'_>>, record: &Record, ctx: &EvalContext) {
        let passes = when.map_or(true, |clause| clause.matches(record));
        match (self, reducer) {
            (Acc::Scalar(acc), Reducer::Count) => *acc += 1.0,
            (Acc::Scalar(acc), Reducer::CountWhere(_)) => {
                if passes {
                    *acc += 1.0;
                }
            }
            (Acc::Scalar(acc), Reducer::Sum(field)) => *acc += value_f64_or_zero(record, field),
            (Acc::Scalar(acc), Reducer::SumWhere { field, .. }) => {
                if passes {
                    *acc += value_f64_or_zero(record, field);
                }
            }
            (Acc::Scalar(acc), Reducer::SumProduct { left, right }) => {
                *acc += value_f64_or_zero(record, left) * value_f64_or_zero(record, right);
            }
            (Acc::Scalar(acc), Reducer::Custom { step, .. }) => *acc = step(*acc, record, ctx),
            (Acc::Mean { sum, n }, Reducer::Average(field)) => {
                *sum += value_f64_or_zero(record, field);
                *n += 1;
            }
            (Acc::Extreme(current), Reducer::Min(field)) => {
                let v = value_f64_or_zero(record, field);
                *current = Some(current.map_or(v, |c| c.min(v)));
            }
            (Acc::Extreme(current), Reducer::Max(field)) => {
                let v = value_f64_or_zero(record, field);
                *current = Some(current.map_or(v, |c| c.max(v)));
            }
            _ => {}
        }
    }

    fn finish(self) -> f64 {
        match self {
            Acc::Scalar(v) => v,
            Acc::Mean { n: 0, .. } => 0.0,
            Acc::Mean { sum, n } => sum / n as f64,
            Acc::Extreme(v) => v.unwrap_or(0.0),
        }
    }
}

/// Runs every reducer once over `records` with an explicit context.
pub fn aggregate_at<'r, I>(records: I, spec: &AggregationSpec, ctx: &EvalContext) -> Stats
where
    I: IntoIterator<Item = &'r Record>,
{
    let mut accs: Vec<Acc> = spec.reducers.iter().map(|(_, r)| Acc::start(r)).collect();
    let conditions: Vec<Option<Compiled<'_>>> = spec
        .reducers
        .iter()
        .map(|(_, reducer)| match reducer {
            Reducer::CountWhere(clause) | Reducer::SumWhere { when: clause, .. } => {
                Compiled::from_clause(clause)
            }
            _ => None,
        })
        .collect();
    let mut seen = 0usize;
    for record in records {
        seen += 1;
        for ((acc, (_, reducer)), when) in accs.iter_mut().zip(&spec.reducers).zip(&conditions) {
            acc.step(reducer, when.as_ref(), record, ctx);
        }
    }
    let mut stats = Stats::default();
    for (acc, (name, _)) in accs.into_iter().zip(&spec.reducers) {
        stats.insert(name.clone(), acc.finish());
    }
    debug!(records = seen, stats = stats.len(), "Aggregation complete");
    stats
}

/// Runs every reducer once over `records`, capturing `now` for this pass.
pub fn aggregate<'r, I>(records: I, spec: &AggregationSpec) -> Stats
where
    I: IntoIterator<Item = &'r Record>,
{
    aggregate_at(records, spec, &EvalContext::capture())
}

// ---------------------------------------------------------------------------
// Group-by-category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub category: FieldRef,
    pub quantity: FieldRef,
    pub fallback: String,
}

impl GroupSpec {
    pub fn new(category: impl Into<FieldRef>, quantity: impl Into<FieldRef>) -> Self {
        Self {
            category: category.into(),
            quantity: quantity.into(),
            fallback: UNCATEGORIZED.to_string(),
        }
    }

    /// Category and quantity candidates from the resolution table.
    pub fn from_resolver(resolver: &FieldResolver) -> Self {
        Self::new(resolver.resolve("category"), resolver.resolve("quantity"))
    }
}

/// Sums the resolved quantity per resolved category. Records with no
/// category land in `spec.fallback`.
pub fn group_by_category<'r, I>(records: I, spec: &GroupSpec) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = &'r Record>,
{
    let mut groups: BTreeMap<String, f64> = BTreeMap::new();
    for record in records {
        let category = value_str(record, &spec.category)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| spec.fallback.clone());
        *groups.entry(category).or_insert(0.0) += value_f64_or_zero(record, &spec.quantity);
    }
    groups
}

// ---------------------------------------------------------------------------
// Chart data
// ---------------------------------------------------------------------------

pub const OTHER_BUCKET: &str = "Other";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// Points sorted by value (descending) then label. With `limit`, everything
/// past the first `limit` points is folded into an `"Other"` point.
pub fn chart_series(groups: &BTreeMap<String, f64>, limit: Option<usize>) -> Vec<ChartPoint> {
    let mut points: Vec<ChartPoint> = groups
        .iter()
        .map(|(label, value)| ChartPoint {
            label: label.clone(),
            value: *value,
        })
        .collect();
    points.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    if let Some(limit) = limit {
        if points.len() > limit {
            let rest: f64 = points.drain(limit..).map(|p| p.value).sum();
            points.push(ChartPoint {
                label: OTHER_BUCKET.to_string(),
                value: rest,
            });
        }
    }
    points
}

/// Totals per calendar day in ascending date order. Without `value` each
/// record counts as one. Records with unparseable dates are skipped.
pub fn daily_totals<'r, I>(records: I, date: &FieldRef, value: Option<&FieldRef>) -> Vec<ChartPoint>
where
    I: IntoIterator<Item = &'r Record>,
{
    let mut days: BTreeMap<chrono::NaiveDate, f64> = BTreeMap::new();
    for record in records {
        let Some(when) = value_date(record, date) else {
            continue;
        };
        let amount = value.map_or(1.0, |field| value_f64_or_zero(record, field));
        *days.entry(when.date()).or_insert(0.0) += amount;
    }
    days.into_iter()
        .map(|(day, value)| ChartPoint {
            label: day.format("%Y-%m-%d").to_string(),
            value,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesConfig {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// `{data, seriesConfig, axisKey}` as consumed by the charting library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub data: Vec<Value>,
    pub series_config: Vec<SeriesConfig>,
    pub axis_key: String,
}

impl ChartData {
    pub fn from_points(points: &[ChartPoint], axis_key: &str, series: SeriesConfig) -> Self {
        let data = points
            .iter()
            .map(|p| {
                let mut row = serde_json::Map::new();
                row.insert(axis_key.to_string(), Value::from(p.label.clone()));
                row.insert(series.key.clone(), Value::from(p.value));
                Value::Object(row)
            })
            .collect();
        Self {
            data,
            series_config: vec![series],
            axis_key: axis_key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::{self, Layer, SubscriberExt};

    fn inventory() -> Vec<Record> {
        vec![
            json!({ "name": "Cola", "category": "Drinks", "stockQty": "12", "unitPrice": 1.5 }),
            json!({ "name": "Chips", "category": { "name": "Snacks" }, "quantity": 4, "unitPrice": "2" }),
            json!({ "name": "Water", "categoryName": "Drinks", "stock": 8, "unitPrice": 0.5 }),
            json!({ "name": "Mystery", "stock": null }),
        ]
    }

    fn spec() -> AggregationSpec {
        let qty = FieldResolver::default_table().resolve("quantity");
        AggregationSpec::new()
            .with("count", Reducer::Count)
            .with("units", Reducer::Sum(qty.clone()))
            .with(
                "value",
                Reducer::SumProduct {
                    left: qty.clone(),
                    right: FieldRef::from("unitPrice"),
                },
            )
            .with("avgUnits", Reducer::Average(qty.clone()))
            .with("maxUnits", Reducer::Max(qty))
            .with(
                "drinks",
                Reducer::CountWhere(FilterClause::equals("category", Some(json!("Drinks")))),
            )
    }

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: layer::Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn conditional_reducers_compile_their_clause_once_per_pass() {
        let bad_bound = FilterClause::on_or_after("date", Some("next tuesday"));
        let spec = AggregationSpec::new()
            .with("recent", Reducer::CountWhere(bad_bound.clone()))
            .with(
                "recentUnits",
                Reducer::SumWhere {
                    field: FieldRef::from("quantity"),
                    when: bad_bound,
                },
            );
        let records = vec![
            json!({ "date": "2024-01-01", "quantity": 1 }),
            json!({ "date": "2024-01-02", "quantity": 2 }),
            json!({ "date": "2024-01-03", "quantity": 3 }),
        ];

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let stats = tracing::subscriber::with_default(subscriber, || aggregate(&records, &spec));

        assert_eq!(stats.get("recent"), 0.0);
        assert_eq!(stats.get("recentUnits"), 0.0);
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reducers_treat_missing_as_zero_and_parse_strings() {
        let stats = aggregate(&inventory(), &spec());
        assert_eq!(stats.get("count"), 4.0);
        assert_eq!(stats.get("units"), 24.0);
        assert_eq!(stats.get("value"), 12.0 * 1.5 + 4.0 * 2.0 + 8.0 * 0.5);
        assert_eq!(stats.get("avgUnits"), 6.0);
        assert_eq!(stats.get("maxUnits"), 12.0);
        assert_eq!(stats.get("drinks"), 1.0);
        assert_eq!(stats.get("unknown"), 0.0);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let records = inventory();
        let ctx = EvalContext::capture();
        let a = aggregate_at(&records, &spec(), &ctx);
        let b = aggregate_at(&records, &spec(), &ctx);
        for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
            assert_eq!(ka, kb);
            assert_eq!(va.to_bits(), vb.to_bits());
        }
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let stats = aggregate(std::iter::empty::<&Record>(), &spec());
        assert_eq!(stats.len(), 6);
        assert!(stats.iter().all(|(_, v)| v == 0.0));
    }

    #[test]
    fn custom_reducer_sees_context() {
        let records = inventory();
        let spec = AggregationSpec::new().with(
            "flagged",
            Reducer::custom(10.0, |acc, record, _ctx| {
                if record.get("stock").is_some() {
                    acc + 1.0
                } else {
                    acc
                }
            }),
        );
        assert_eq!(aggregate(&records, &spec).get("flagged"), 12.0);
    }

    #[test]
    fn group_by_category_falls_back_to_uncategorized() {
        let groups = group_by_category(
            &inventory(),
            &GroupSpec::from_resolver(&FieldResolver::default_table()),
        );
        assert_eq!(groups.get("Drinks"), Some(&20.0));
        assert_eq!(groups.get("Snacks"), Some(&4.0));
        assert_eq!(groups.get(UNCATEGORIZED), Some(&0.0));
    }

    #[test]
    fn chart_series_sorts_and_folds_tail() {
        let mut groups = BTreeMap::new();
        groups.insert("A".to_string(), 1.0);
        groups.insert("B".to_string(), 5.0);
        groups.insert("C".to_string(), 5.0);
        groups.insert("D".to_string(), 2.0);
        let points = chart_series(&groups, Some(2));
        let labels: Vec<&str> = points.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["B", "C", OTHER_BUCKET]);
        assert_eq!(points[2].value, 3.0);
    }

    #[test]
    fn daily_totals_bucket_by_calendar_day() {
        let sales = vec![
            json!({ "createdAt": "2024-03-02T09:00:00", "total": 10 }),
            json!({ "createdAt": "2024-03-01T18:30:00", "total": "4.5" }),
            json!({ "createdAt": "2024-03-02T20:00:00", "total": 5 }),
            json!({ "createdAt": "garbage", "total": 100 }),
        ];
        let points = daily_totals(&sales, &FieldRef::from("createdAt"), Some(&FieldRef::from("total")));
        assert_eq!(
            points,
            vec![
                ChartPoint { label: "2024-03-01".into(), value: 4.5 },
                ChartPoint { label: "2024-03-02".into(), value: 15.0 },
            ]
        );
    }

    #[test]
    fn chart_data_uses_axis_and_series_keys() {
        let points = vec![ChartPoint { label: "Drinks".into(), value: 20.0 }];
        let chart = ChartData::from_points(
            &points,
            "category",
            SeriesConfig { key: "units".into(), label: "Units".into(), color: None },
        );
        let v = serde_json::to_value(&chart).unwrap();
        assert_eq!(v["axisKey"], "category");
        assert_eq!(v["data"][0]["category"], "Drinks");
        assert_eq!(v["data"][0]["units"], 20.0);
        assert_eq!(v["seriesConfig"][0]["key"], "units");
    }
}
