use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use dashboard_engine::{run, Config};

#[derive(Parser, Debug)]
#[command(
    name = "generate-dashboard",
    about = "Load the sales workbook, apply filters and write dashboard.json."
)]
struct Args {
    /// Path to the sales workbook (.xlsx)
    #[arg(short, long, default_value = "supermarkt_sales.xlsx")]
    source: PathBuf,

    /// Output path for the dashboard document
    #[arg(short, long, default_value = "dashboard/dashboard.json")]
    out: PathBuf,

    /// City to include (repeatable); omit to include all observed cities
    #[arg(long = "city")]
    cities: Option<Vec<String>>,

    /// Customer type to include (repeatable); omit to include all
    #[arg(long = "customer-type")]
    customer_types: Option<Vec<String>>,

    /// Gender to include (repeatable); omit to include all
    #[arg(long = "gender")]
    genders: Option<Vec<String>>,

    /// Pretty-print the output JSON (compact by default)
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "generate_dashboard=info,dashboard_engine=info".into()),
        )
        .init();

    let args = Args::parse();

    tracing::info!(source = %args.source.display(), out = %args.out.display(), "generating dashboard");

    let summary = run(Config {
        source: args.source,
        output_file: args.out,
        cities: args.cities,
        customer_types: args.customer_types,
        genders: args.genders,
        pretty: args.pretty,
    })?;

    if summary.rows_selected == 0 {
        tracing::warn!("selection matched no rows; dashboard contains zeroed KPIs");
    }

    println!("📊 Sales Dashboard");
    println!(
        "Rows: {} loaded, {} selected",
        summary.rows_loaded, summary.rows_selected
    );
    println!("Total Sales: US $ {}", summary.kpis.total_sales);
    println!(
        "Average Rating: {} {}",
        summary.kpis.average_rating, summary.star_rating
    );
    println!(
        "Average Sales Per Transaction: US $ {}",
        summary.kpis.average_transaction_value
    );
    println!("✅ Dashboard written to: {}", summary.output_file.display());

    Ok(())
}
