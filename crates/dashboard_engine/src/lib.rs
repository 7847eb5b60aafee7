use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use models::{
    AppliedFilters, ChartOrientation, DashboardChart, DashboardCharts, DashboardMetadata,
    DashboardOutput, KpiSummary, SelectionCriteria, SeriesPoint, TransactionSet,
};

/// Bar color shared by both charts, matching the dashboard theme.
pub const BAR_COLOR: &str = "#0083B8";

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Returns the subset of `rows` whose city, customer type and gender are all
/// members of the corresponding criteria set, in original order.
///
/// Pure function: the input set is never mutated. An empty criteria set
/// yields zero rows for that field (matches the "empty selection shows
/// nothing" semantics of the UI).
pub fn select(rows: &TransactionSet, criteria: &SelectionCriteria) -> TransactionSet {
    let selected = rows
        .iter()
        .filter(|row| criteria.matches(row))
        .cloned()
        .collect();
    TransactionSet::new(selected)
}

/// Computes the three scalar KPIs over `rows`.
///
/// Empty input policy: sums are 0 and both means are 0.0 rather than NaN,
/// so an empty selection renders as zeros instead of crashing the shell.
pub fn summarize(rows: &TransactionSet) -> KpiSummary {
    let count = rows.len();
    let total_sum: f64 = rows.iter().map(|r| r.total).sum();
    let total_sales = total_sum.trunc() as i64;

    let (average_rating, average_transaction_value) = if count == 0 {
        (0.0, 0.0)
    } else {
        let rating_sum: f64 = rows.iter().map(|r| r.rating).sum();
        (
            round1(rating_sum / count as f64),
            round2(total_sum / count as f64),
        )
    };

    KpiSummary {
        total_sales,
        average_rating,
        average_transaction_value,
    }
}

/// Group-by-sum of `total` over product lines, sorted ascending by summed
/// total (ties broken by label so the order is deterministic).
pub fn by_product_line(rows: &TransactionSet) -> Vec<SeriesPoint> {
    let mut sums: HashMap<String, f64> = HashMap::new();
    for row in rows.iter() {
        *sums.entry(row.product_line.clone()).or_insert(0.0) += row.total;
    }

    let mut points: Vec<SeriesPoint> = sums
        .into_iter()
        .map(|(label, total)| SeriesPoint { label, total })
        .collect();
    points.sort_by(|a, b| {
        a.total
            .partial_cmp(&b.total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });
    points
}

/// Group-by-sum of `total` over the derived hour column, sorted ascending
/// by hour key. Hours with no rows are absent (sparse, not zero-filled).
pub fn by_hour(rows: &TransactionSet) -> Vec<SeriesPoint> {
    let mut sums: BTreeMap<u32, f64> = BTreeMap::new();
    for row in rows.iter() {
        *sums.entry(row.hour).or_insert(0.0) += row.total;
    }

    sums.into_iter()
        .map(|(hour, total)| SeriesPoint {
            label: hour.to_string(),
            total,
        })
        .collect()
}

/// Star glyph string for an average rating: the rating rounded to the
/// nearest whole star, clamped to the 0-10 rating scale. Pure formatting.
pub fn star_rating(average_rating: f64) -> String {
    let stars = average_rating.round().clamp(0.0, 10.0) as usize;
    "⭐".repeat(stars)
}

/// Assembles the full output document for the chart layer: KPIs, star
/// rating and both series wrapped with their rendering hints.
pub fn build_dashboard(
    source: &str,
    loaded: &TransactionSet,
    criteria: &SelectionCriteria,
    selection: &TransactionSet,
) -> DashboardOutput {
    let kpis = summarize(selection);
    let star_rating = star_rating(kpis.average_rating);

    let rounded = |points: Vec<SeriesPoint>| -> Vec<SeriesPoint> {
        points
            .into_iter()
            .map(|p| SeriesPoint {
                label: p.label,
                total: round2(p.total),
            })
            .collect()
    };

    let charts = DashboardCharts {
        sales_by_product_line: DashboardChart {
            title: "Sales by Product Line".to_string(),
            orientation: ChartOrientation::Horizontal,
            tick_mode: "auto".to_string(),
            show_grid: false,
            color: BAR_COLOR.to_string(),
            points: rounded(by_product_line(selection)),
        },
        sales_by_hour: DashboardChart {
            title: "Sales by Hour".to_string(),
            orientation: ChartOrientation::Vertical,
            tick_mode: "linear".to_string(),
            show_grid: false,
            color: BAR_COLOR.to_string(),
            points: rounded(by_hour(selection)),
        },
    };

    DashboardOutput {
        metadata: DashboardMetadata {
            generated_at: Utc::now().to_rfc3339(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            source: source.to_string(),
            rows_loaded: loaded.len(),
            rows_selected: selection.len(),
        },
        filters: AppliedFilters::from_criteria(criteria),
        kpis,
        star_rating,
        charts,
    }
}

/// Writes the dashboard document to a JSON file with optional pretty formatting.
pub fn write_dashboard_json(output: &DashboardOutput, path: &Path, pretty: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating output dir: {}", parent.display()))?;
    }

    let json = if pretty {
        serde_json::to_string_pretty(output)?
    } else {
        serde_json::to_string(output)?
    };

    fs::write(path, json).with_context(|| format!("Writing output file: {}", path.display()))?;
    Ok(())
}

pub struct Config {
    pub source: PathBuf,
    pub output_file: PathBuf,
    /// None means "all observed values" for that field; an explicit empty
    /// list means "match nothing".
    pub cities: Option<Vec<String>>,
    pub customer_types: Option<Vec<String>>,
    pub genders: Option<Vec<String>>,
    pub pretty: bool,
}

pub struct RunSummary {
    pub rows_loaded: usize,
    pub rows_selected: usize,
    pub kpis: KpiSummary,
    pub star_rating: String,
    pub output_file: PathBuf,
}

/// Main pipeline: one load of the workbook, one select pass, one aggregate
/// pass, one dashboard document written. The loaded set is owned here and
/// passed by reference downstream; nothing is cached process-wide.
pub fn run(cfg: Config) -> Result<RunSummary> {
    let loaded = sales_import::load(&cfg.source)
        .with_context(|| format!("Loading sales workbook: {}", cfg.source.display()))?;

    let mut criteria = SelectionCriteria::all_from(&loaded);
    if let Some(cities) = cfg.cities {
        criteria.cities = cities.into_iter().collect();
    }
    if let Some(customer_types) = cfg.customer_types {
        criteria.customer_types = customer_types.into_iter().collect();
    }
    if let Some(genders) = cfg.genders {
        criteria.genders = genders.into_iter().collect();
    }

    let selection = select(&loaded, &criteria);
    let dashboard = build_dashboard(
        &cfg.source.display().to_string(),
        &loaded,
        &criteria,
        &selection,
    );
    write_dashboard_json(&dashboard, &cfg.output_file, cfg.pretty)?;

    Ok(RunSummary {
        rows_loaded: loaded.len(),
        rows_selected: selection.len(),
        kpis: dashboard.kpis,
        star_rating: dashboard.star_rating,
        output_file: cfg.output_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use models::TransactionRow;

    fn row(city: &str, total: f64, rating: f64, hour: u32, product: &str) -> TransactionRow {
        TransactionRow {
            invoice_id: format!("INV-{}-{}-{}", city, hour, total),
            branch: "A".to_string(),
            city: city.to_string(),
            customer_type: "Member".to_string(),
            gender: "Female".to_string(),
            product_line: product.to_string(),
            unit_price: total,
            quantity: 1.0,
            tax: 0.0,
            total,
            date: NaiveDate::from_ymd_opt(2019, 1, 5).unwrap(),
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            payment: "Cash".to_string(),
            cogs: total,
            gross_margin_pct: 0.0,
            gross_income: 0.0,
            rating,
            hour,
        }
    }

    fn scenario() -> TransactionSet {
        TransactionSet::new(vec![
            row("A", 10.0, 4.0, 9, "X"),
            row("B", 20.0, 6.0, 9, "Y"),
            row("A", 5.0, 8.0, 10, "X"),
        ])
    }

    fn city_criteria(rows: &TransactionSet, cities: &[&str]) -> SelectionCriteria {
        let mut criteria = SelectionCriteria::all_from(rows);
        criteria.cities = cities.iter().map(|c| c.to_string()).collect();
        criteria
    }

    #[test]
    fn test_select_city_a_scenario() {
        let rows = scenario();
        let selection = select(&rows, &city_criteria(&rows, &["A"]));
        assert_eq!(selection.len(), 2);

        let kpis = summarize(&selection);
        assert_eq!(kpis.total_sales, 15);
        assert_eq!(kpis.average_rating, 6.0);
        assert_eq!(kpis.average_transaction_value, 7.5);

        let by_product = by_product_line(&selection);
        assert_eq!(by_product.len(), 1);
        assert_eq!(by_product[0].label, "X");
        assert_eq!(by_product[0].total, 15.0);

        let hourly = by_hour(&selection);
        assert_eq!(hourly.len(), 2);
        assert_eq!((hourly[0].label.as_str(), hourly[0].total), ("9", 10.0));
        assert_eq!((hourly[1].label.as_str(), hourly[1].total), ("10", 5.0));
    }

    #[test]
    fn test_select_is_idempotent() {
        let rows = scenario();
        let criteria = city_criteria(&rows, &["A"]);
        let first = select(&rows, &criteria);
        let second = select(&rows, &criteria);
        let ids =
            |s: &TransactionSet| -> Vec<String> { s.iter().map(|r| r.invoice_id.clone()).collect() };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_select_filter_correctness() {
        let rows = scenario();
        let criteria = city_criteria(&rows, &["A"]);
        let selection = select(&rows, &criteria);

        for r in selection.iter() {
            assert!(criteria.cities.contains(&r.city));
            assert!(criteria.customer_types.contains(&r.customer_type));
            assert!(criteria.genders.contains(&r.gender));
        }
        for r in rows.iter() {
            let included = selection.iter().any(|s| s.invoice_id == r.invoice_id);
            if !included {
                assert!(!criteria.matches(r));
            }
        }
    }

    #[test]
    fn test_select_conjunction_subset() {
        let rows = scenario();
        let broad = city_criteria(&rows, &["A", "B"]);
        let narrow = city_criteria(&rows, &["A"]);

        let broad_ids: Vec<String> = select(&rows, &broad)
            .iter()
            .map(|r| r.invoice_id.clone())
            .collect();
        for r in select(&rows, &narrow).iter() {
            assert!(broad_ids.contains(&r.invoice_id));
        }
    }

    #[test]
    fn test_select_preserves_order() {
        let rows = scenario();
        let selection = select(&rows, &SelectionCriteria::all_from(&rows));
        let cities: Vec<&str> = selection.iter().map(|r| r.city.as_str()).collect();
        assert_eq!(cities, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_empty_city_set_yields_nothing() {
        let rows = scenario();
        let selection = select(&rows, &city_criteria(&rows, &[]));
        assert!(selection.is_empty());

        let kpis = summarize(&selection);
        assert_eq!(kpis.total_sales, 0);
        assert_eq!(kpis.average_rating, 0.0);
        assert_eq!(kpis.average_transaction_value, 0.0);
        assert_eq!(star_rating(kpis.average_rating), "");
    }

    #[test]
    fn test_sum_decomposition_with_all_values() {
        let rows = scenario();
        let selection = select(&rows, &SelectionCriteria::all_from(&rows));
        let expected: f64 = rows.iter().map(|r| r.total).sum();
        assert_eq!(summarize(&selection).total_sales, expected.trunc() as i64);
    }

    #[test]
    fn test_total_sales_is_truncated_not_rounded() {
        let rows = TransactionSet::new(vec![
            row("A", 10.7, 5.0, 9, "X"),
            row("A", 4.6, 5.0, 9, "X"),
        ]);
        // 15.3 truncates down to 15
        assert_eq!(summarize(&rows).total_sales, 15);
    }

    #[test]
    fn test_grouped_sum_conservation() {
        let rows = scenario();
        let series_sum: f64 = by_product_line(&rows).iter().map(|p| p.total).sum();
        let total_sum: f64 = rows.iter().map(|r| r.total).sum();
        assert!((series_sum - total_sum).abs() < 1e-9);
        assert_eq!(summarize(&rows).total_sales, total_sum.trunc() as i64);
    }

    #[test]
    fn test_by_product_line_sorted_ascending_by_total() {
        let rows = TransactionSet::new(vec![
            row("A", 30.0, 5.0, 9, "Sports and travel"),
            row("A", 10.0, 5.0, 9, "Health and beauty"),
            row("A", 20.0, 5.0, 9, "Food and beverages"),
        ]);
        let series = by_product_line(&rows);
        for pair in series.windows(2) {
            assert!(pair[0].total <= pair[1].total);
        }
        assert_eq!(series[0].label, "Health and beauty");
        assert_eq!(series[2].label, "Sports and travel");
    }

    #[test]
    fn test_by_hour_sorted_by_key_and_sparse() {
        let rows = TransactionSet::new(vec![
            row("A", 10.0, 5.0, 19, "X"),
            row("A", 10.0, 5.0, 9, "X"),
            row("A", 10.0, 5.0, 19, "X"),
        ]);
        let series = by_hour(&rows);
        let labels: Vec<&str> = series.iter().map(|p| p.label.as_str()).collect();
        // only the hours that actually occur, ascending
        assert_eq!(labels, vec!["9", "19"]);
        assert_eq!(series[1].total, 20.0);
    }

    #[test]
    fn test_star_rating_formatting() {
        assert_eq!(star_rating(6.0), "⭐".repeat(6));
        assert_eq!(star_rating(9.6), "⭐".repeat(10));
        assert_eq!(star_rating(0.4), "");
        assert_eq!(star_rating(0.0), "");
        // ratings never exceed 10, but a bad value must not panic
        assert_eq!(star_rating(42.0), "⭐".repeat(10));
    }

    #[test]
    fn test_build_dashboard_document() {
        let rows = scenario();
        let criteria = city_criteria(&rows, &["A"]);
        let selection = select(&rows, &criteria);
        let dashboard = build_dashboard("supermarkt_sales.xlsx", &rows, &criteria, &selection);

        assert_eq!(dashboard.metadata.rows_loaded, 3);
        assert_eq!(dashboard.metadata.rows_selected, 2);
        assert_eq!(dashboard.metadata.source, "supermarkt_sales.xlsx");
        assert_eq!(dashboard.kpis.total_sales, 15);
        assert_eq!(dashboard.star_rating, "⭐".repeat(6));
        assert_eq!(dashboard.filters.cities, vec!["A"]);

        let product = &dashboard.charts.sales_by_product_line;
        assert_eq!(product.orientation, ChartOrientation::Horizontal);
        assert!(!product.show_grid);
        assert_eq!(product.color, BAR_COLOR);

        let hourly = &dashboard.charts.sales_by_hour;
        assert_eq!(hourly.orientation, ChartOrientation::Vertical);
        assert_eq!(hourly.tick_mode, "linear");
        assert_eq!(hourly.points.len(), 2);
    }

    #[test]
    fn test_chart_totals_rounded_to_two_decimals() {
        let rows = TransactionSet::new(vec![
            row("A", 548.9715, 9.1, 13, "Health and beauty"),
            row("A", 80.22, 9.6, 10, "Health and beauty"),
        ]);
        let criteria = SelectionCriteria::all_from(&rows);
        let selection = select(&rows, &criteria);
        let dashboard = build_dashboard("test.xlsx", &rows, &criteria, &selection);
        let point = &dashboard.charts.sales_by_product_line.points[0];
        assert_eq!(point.total, 629.19);
    }
}
