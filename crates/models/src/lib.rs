use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// Input models

/// One retail sale record, columns B:R of the "Sales" sheet plus the
/// derived `hour` column computed at load time from `time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRow {
    pub invoice_id: String,
    pub branch: String,
    pub city: String,
    pub customer_type: String,
    pub gender: String,
    pub product_line: String,
    pub unit_price: f64,
    pub quantity: f64,
    pub tax: f64,
    pub total: f64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub payment: String,
    pub cogs: f64,
    pub gross_margin_pct: f64,
    pub gross_income: f64,
    pub rating: f64,
    /// Hour of day 0-23, derived from `time`.
    pub hour: u32,
}

/// Ordered collection of rows, fixed at load time and immutable afterwards.
/// Iteration order is the original sheet order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionSet {
    rows: Vec<TransactionRow>,
}

impl TransactionSet {
    pub fn new(rows: Vec<TransactionRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[TransactionRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionRow> {
        self.rows.iter()
    }

    /// Distinct values of a field in first-seen (sheet) order.
    fn distinct(&self, field: impl Fn(&TransactionRow) -> &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in &self.rows {
            let value = field(row);
            if seen.insert(value.to_string()) {
                out.push(value.to_string());
            }
        }
        out
    }

    pub fn distinct_cities(&self) -> Vec<String> {
        self.distinct(|r| r.city.as_str())
    }

    pub fn distinct_customer_types(&self) -> Vec<String> {
        self.distinct(|r| r.customer_type.as_str())
    }

    pub fn distinct_genders(&self) -> Vec<String> {
        self.distinct(|r| r.gender.as_str())
    }
}

/// Conjunctive filter over the three categorical fields.
///
/// A row passes iff each of its three values is a member of the
/// corresponding set. An empty set matches nothing for that field;
/// it does not mean "no filter".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub cities: HashSet<String>,
    pub customer_types: HashSet<String>,
    pub genders: HashSet<String>,
}

impl SelectionCriteria {
    /// Default criteria: every distinct value observed in `rows`, per field.
    pub fn all_from(rows: &TransactionSet) -> Self {
        Self {
            cities: rows.distinct_cities().into_iter().collect(),
            customer_types: rows.distinct_customer_types().into_iter().collect(),
            genders: rows.distinct_genders().into_iter().collect(),
        }
    }

    pub fn matches(&self, row: &TransactionRow) -> bool {
        self.cities.contains(&row.city)
            && self.customer_types.contains(&row.customer_type)
            && self.genders.contains(&row.gender)
    }
}

// Output models

/// The three scalar KPIs of the dashboard.
///
/// For an empty row set `total_sales` is 0 and both means are 0.0; the
/// reference behavior (NaN propagation) is deliberately not reproduced so
/// the shell can render the values as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KpiSummary {
    /// Sum of `total`, truncated to an integer amount.
    pub total_sales: i64,
    /// Mean of `rating`, rounded to 1 decimal.
    pub average_rating: f64,
    /// Mean of `total`, rounded to 2 decimals.
    pub average_transaction_value: f64,
}

/// One bar of a category series: a label and the summed `total` behind it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub label: String,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartOrientation {
    Horizontal,
    Vertical,
}

/// An ordered category series together with the rendering hints the chart
/// layer needs (mirrors the plotly layout the dashboard uses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardChart {
    pub title: String,
    pub orientation: ChartOrientation,
    pub tick_mode: String,
    pub show_grid: bool,
    pub color: String,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardCharts {
    pub sales_by_product_line: DashboardChart,
    pub sales_by_hour: DashboardChart,
}

/// Criteria echoed back into the output document, sorted for stable JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedFilters {
    pub cities: Vec<String>,
    pub customer_types: Vec<String>,
    pub genders: Vec<String>,
}

impl AppliedFilters {
    pub fn from_criteria(criteria: &SelectionCriteria) -> Self {
        let sorted = |set: &HashSet<String>| {
            let mut v: Vec<String> = set.iter().cloned().collect();
            v.sort();
            v
        };
        Self {
            cities: sorted(&criteria.cities),
            customer_types: sorted(&criteria.customer_types),
            genders: sorted(&criteria.genders),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardMetadata {
    pub generated_at: String,
    pub engine_version: String,
    pub source: String,
    pub rows_loaded: usize,
    pub rows_selected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardOutput {
    pub metadata: DashboardMetadata,
    pub filters: AppliedFilters,
    pub kpis: KpiSummary,
    pub star_rating: String,
    pub charts: DashboardCharts,
}
