use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use models::{TransactionRow, TransactionSet};

/// Sheet holding the transaction table.
pub const SHEET_NAME: &str = "Sales";

/// The export carries at most this many data rows below the header.
pub const MAX_ROWS: usize = 1000;

// The transaction table occupies spreadsheet columns B:R (zero-based 1..=17);
// cells outside that window are banner/margin content and never mapped.
const FIRST_COL: usize = 1;
const LAST_COL: usize = 17;

/// Loader failure classes. All of them are fatal to startup: the dashboard
/// cannot render without data, so callers surface these and stop.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source workbook not found: {path}")]
    SourceNotFound { path: String },

    #[error("cannot open workbook {path}")]
    Workbook {
        path: String,
        #[source]
        source: calamine::XlsxError,
    },

    #[error("sheet '{sheet}' not found in {path}")]
    SheetNotFound { sheet: String, path: String },

    #[error("no header row found in sheet '{sheet}'")]
    HeaderNotFound { sheet: String },

    #[error("missing expected column '{column}'")]
    Schema { column: &'static str },

    #[error("row {row}: cannot parse {column} value '{value}'")]
    Parse {
        row: usize,
        column: &'static str,
        value: String,
    },
}

/// Reads the supermarket sales export into a typed [`TransactionSet`].
///
/// The workbook layout is fixed: three banner rows above the header, the
/// transaction table in columns B:R of the "Sales" sheet, at most 1000 data
/// rows. The header row is located by name so leading banner rows (empty or
/// not) never shift the column mapping.
pub struct SalesXlsxImporter {
    pub sheet_name: String,
    pub max_rows: usize,
}

impl SalesXlsxImporter {
    pub fn new() -> Self {
        Self {
            sheet_name: SHEET_NAME.to_string(),
            max_rows: MAX_ROWS,
        }
    }

    pub fn with_sheet_name(mut self, sheet_name: impl Into<String>) -> Self {
        self.sheet_name = sheet_name.into();
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Parse the workbook at `path` into an immutable row set, deriving the
    /// `hour` column from each row's time-of-day value.
    pub fn parse_file(&self, path: &Path) -> Result<TransactionSet, LoadError> {
        if !path.exists() {
            return Err(LoadError::SourceNotFound {
                path: path.display().to_string(),
            });
        }

        let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| LoadError::Workbook {
            path: path.display().to_string(),
            source: e,
        })?;

        if !workbook.sheet_names().iter().any(|s| s == &self.sheet_name) {
            return Err(LoadError::SheetNotFound {
                sheet: self.sheet_name.clone(),
                path: path.display().to_string(),
            });
        }

        let range = workbook
            .worksheet_range(&self.sheet_name)
            .map_err(|e| LoadError::Workbook {
                path: path.display().to_string(),
                source: e,
            })?;

        self.parse_range(&range)
    }

    /// Parse the already-read sheet range. Split out from [`parse_file`] so
    /// the header mapping and row decoding can be exercised without a
    /// workbook on disk.
    ///
    /// [`parse_file`]: Self::parse_file
    fn parse_range(&self, range: &calamine::Range<Data>) -> Result<TransactionSet, LoadError> {
        let (header_row_idx, header_map) =
            find_header_row(range).ok_or_else(|| LoadError::HeaderNotFound {
                sheet: self.sheet_name.clone(),
            })?;

        let col = |name: &'static str| -> Result<usize, LoadError> {
            header_map
                .get(name)
                .copied()
                .ok_or(LoadError::Schema { column: name })
        };

        let c_invoice = col("Invoice ID")?;
        let c_branch = col("Branch")?;
        let c_city = col("City")?;
        let c_customer_type = col("Customer type")?;
        let c_gender = col("Gender")?;
        let c_product_line = col("Product line")?;
        let c_unit_price = col("Unit price")?;
        let c_quantity = col("Quantity")?;
        let c_tax = col("Tax 5%")?;
        let c_total = col("Total")?;
        let c_date = col("Date")?;
        let c_time = col("Time")?;
        let c_payment = col("Payment")?;
        let c_cogs = col("cogs")?;
        let c_margin = col("gross margin percentage")?;
        let c_gross_income = col("gross income")?;
        let c_rating = col("Rating")?;

        let mut rows = Vec::new();

        for (row_idx, row) in range
            .rows()
            .enumerate()
            .skip(header_row_idx + 1)
            .take(self.max_rows)
        {
            let invoice_id = cell_str(row.get(c_invoice)).trim().to_string();
            let total_raw = cell_str(row.get(c_total)).trim().to_string();

            // The fixed range often ends with blank rows; skip them quietly.
            if invoice_id.is_empty() && total_raw.is_empty() {
                continue;
            }

            let number = |column: &'static str, idx: usize| -> Result<f64, LoadError> {
                cell_f64(row.get(idx)).ok_or_else(|| LoadError::Parse {
                    row: row_idx + 1,
                    column,
                    value: cell_str(row.get(idx)),
                })
            };

            let time = parse_excel_time(row.get(c_time)).ok_or_else(|| LoadError::Parse {
                row: row_idx + 1,
                column: "Time",
                value: cell_str(row.get(c_time)),
            })?;

            let date = parse_excel_date(row.get(c_date)).ok_or_else(|| LoadError::Parse {
                row: row_idx + 1,
                column: "Date",
                value: cell_str(row.get(c_date)),
            })?;

            rows.push(TransactionRow {
                invoice_id,
                branch: cell_str(row.get(c_branch)).trim().to_string(),
                city: cell_str(row.get(c_city)).trim().to_string(),
                customer_type: cell_str(row.get(c_customer_type)).trim().to_string(),
                gender: cell_str(row.get(c_gender)).trim().to_string(),
                product_line: cell_str(row.get(c_product_line)).trim().to_string(),
                unit_price: number("Unit price", c_unit_price)?,
                quantity: number("Quantity", c_quantity)?,
                tax: number("Tax 5%", c_tax)?,
                total: number("Total", c_total)?,
                date,
                time,
                payment: cell_str(row.get(c_payment)).trim().to_string(),
                cogs: number("cogs", c_cogs)?,
                gross_margin_pct: number("gross margin percentage", c_margin)?,
                gross_income: number("gross income", c_gross_income)?,
                rating: number("Rating", c_rating)?,
                hour: time.hour(),
            });
        }

        Ok(TransactionSet::new(rows))
    }
}

impl Default for SalesXlsxImporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper with the fixed default layout.
pub fn load(path: &Path) -> Result<TransactionSet, LoadError> {
    SalesXlsxImporter::new().parse_file(path)
}

/// Find the header row of the transaction table, mapping header names to
/// in-range column indices. Only cells inside the fixed B:R window are
/// considered. We require at least: Invoice ID, City, Total.
fn find_header_row(range: &calamine::Range<Data>) -> Option<(usize, HashMap<String, usize>)> {
    // calamine trims the range to the used area, so the absolute sheet
    // column of slice index `c_idx` is `first_col + c_idx`.
    let first_col = range.start().map(|(_, c)| c as usize).unwrap_or(0);

    for (r_idx, row) in range.rows().enumerate() {
        let mut map = HashMap::new();

        for (c_idx, cell) in row.iter().enumerate() {
            let abs_col = first_col + c_idx;
            if !(FIRST_COL..=LAST_COL).contains(&abs_col) {
                continue;
            }
            let name = cell_str(Some(cell)).trim().to_string();
            if !name.is_empty() {
                map.insert(name, c_idx);
            }
        }

        let has_invoice = map.contains_key("Invoice ID");
        let has_city = map.contains_key("City");
        let has_total = map.contains_key("Total");

        if has_invoice && has_city && has_total {
            return Some((r_idx, map));
        }
    }
    None
}

fn cell_str(cell: Option<&Data>) -> String {
    let Some(c) = cell else {
        return String::new();
    };

    match c {
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Empty => String::new(),
        _ => c.to_string(),
    }
}

fn cell_f64(cell: Option<&Data>) -> Option<f64> {
    let c = cell?;
    match c {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => {
            let s = s.trim().replace(',', "");
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Handles times that may come as:
/// - a time string: "13:08:00"
/// - an Excel serial datetime (time is the fractional day part)
fn parse_excel_time(cell: Option<&Data>) -> Option<NaiveTime> {
    let c = cell?;
    match c {
        Data::String(s) => parse_time_string(s),
        Data::DateTime(dt) => excel_fraction_to_time(dt.as_f64()),
        Data::Float(f) => excel_fraction_to_time(*f),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S")
            .map(|dt| dt.time())
            .ok()
            .or_else(|| parse_time_string(s)),
        _ => None,
    }
}

fn parse_time_string(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Fraction-of-day to time of day, seconds resolution.
fn excel_fraction_to_time(v: f64) -> Option<NaiveTime> {
    if !v.is_finite() || v < 0.0 {
        return None;
    }
    let secs = (v.fract() * 86_400.0).round() as u32 % 86_400;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
}

/// Handles dates that may come as:
/// - Excel serial number
/// - date string: "1/5/2019" or "2019-01-05"
fn parse_excel_date(cell: Option<&Data>) -> Option<NaiveDate> {
    let c = cell?;
    match c {
        Data::Float(f) => excel_serial_to_date(*f),
        Data::Int(i) => excel_serial_to_date(*i as f64),
        Data::String(s) => parse_date_string(s),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::DateTimeIso(s) => parse_date_string(s),
        _ => None,
    }
}

fn parse_date_string(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .ok()
}

/// Excel serial date conversion using 1899-12-30 base (common convention).
fn excel_serial_to_date(v: f64) -> Option<NaiveDate> {
    if !v.is_finite() {
        return None;
    }
    let days = v.floor() as i64;
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    Some(base + Duration::days(days))
}
