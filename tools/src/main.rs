//! loanbook-cli: headless runner for the portfolio analytics engine.
//!
//! Usage:
//!   loanbook-cli --db portfolio.db --seed 42 --customers 1000 --loans 5000 --txns 20000
//!   loanbook-cli --db portfolio.db --recompute 2024-06-30
//!   loanbook-cli --db portfolio.db --query "SELECT * FROM active_portfolio"
//!   loanbook-cli --db portfolio.db --history 20
//!   loanbook-cli --db portfolio.db --raroc --early-warning --cohorts --rfm

mod seed;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use loanbook_core::{query_executor::SqlValue, AnalyticsConfig, PortfolioEngine};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag_value(&args, "--db").unwrap_or(":memory:").to_string();
    let config = match flag_value(&args, "--config") {
        Some(path) => AnalyticsConfig::from_file(path).context("loading config")?,
        None => AnalyticsConfig::default(),
    };

    let engine = PortfolioEngine::open(&db, config).context("opening database")?;

    if let Some(seed_str) = flag_value(&args, "--seed") {
        let master_seed: u64 = seed_str.parse().context("--seed must be an integer")?;
        let n_customers = parse_flag(&args, "--customers", 1000)?;
        let n_loans = parse_flag(&args, "--loans", 5000)?;
        let n_txns = parse_flag(&args, "--txns", 20000)?;

        log::info!("seeding demo portfolio (seed={master_seed})");
        let mut rng = seed::SeedRng::new(master_seed);
        let demo = seed::generate(&mut rng, n_customers, n_loans, n_txns);

        let customers = engine.load_customers(&demo.customers)?;
        let loans = engine.load_loans(&demo.loans)?;
        let txns = engine.load_transactions(&demo.transactions)?;
        println!(
            "seeded: {} customers, {} loans, {} transactions ({} rejected)",
            customers.inserted,
            loans.inserted,
            txns.inserted,
            customers.rejected.len() + loans.rejected.len() + txns.rejected.len()
        );
    }

    if let Some(date_str) = flag_value(&args, "--recompute") {
        let as_of = if date_str == "today" {
            Utc::now().date_naive()
        } else {
            NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .context("--recompute expects YYYY-MM-DD or 'today'")?
        };
        let report = engine.recompute(as_of)?;
        println!(
            "recompute {}: {} features derived ({} failures), {} months, \
             {} loans / delinquency {:.2}% / collection {:.2}%",
            report.as_of,
            report.derivation.derived,
            report.derivation.failures.len(),
            report.months_updated,
            report.summary.total_loans,
            report.summary.delinquency_rate * 100.0,
            report.summary.collection_efficiency * 100.0,
        );
        for failure in &report.derivation.failures {
            log::warn!("loan {}: {}", failure.loan_id, failure.error);
        }
    }

    if args.iter().any(|a| a == "--raroc") {
        for row in engine.raroc_by_band()? {
            println!(
                "band {}: {} loans, exposure {:.0}, raroc {:.2}%",
                row.risk_band, row.loan_count, row.total_exposure, row.raroc_pct
            );
        }
    }

    if args.iter().any(|a| a == "--early-warning") {
        for row in engine.early_warning()? {
            println!(
                "{}: {} loans ({} delinquent, {} behind schedule), avg score {}, avg bounce {:.2}%",
                row.risk_stage,
                row.loan_count,
                row.already_delinquent,
                row.behind_schedule,
                row.avg_risk_score
                    .map_or("n/a".to_string(), |s| format!("{s:.2}")),
                row.avg_bounce_rate,
            );
        }
    }

    if args.iter().any(|a| a == "--cohorts") {
        for row in engine.customer_cohorts()? {
            println!(
                "{} -> {}: {} customers, {} loans, retention {:.2}%",
                row.cohort_quarter,
                row.loan_quarter,
                row.active_customers,
                row.total_loans,
                row.retention_rate,
            );
        }
    }

    if args.iter().any(|a| a == "--rfm") {
        for row in engine.rfm_segments(Utc::now().date_naive())? {
            println!(
                "{} {}: {} customers, recency {:.1}d, frequency {:.1}, monetary {:.0}",
                row.rfm_cell,
                row.segment,
                row.customer_count,
                row.avg_recency,
                row.avg_frequency,
                row.avg_monetary,
            );
        }
    }

    if let Some(query) = flag_value(&args, "--query") {
        let as_json = args.iter().any(|a| a == "--json");
        match engine.execute_query(query) {
            Ok(rows) if as_json => {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            Ok(rows) => {
                let names: Vec<&str> =
                    rows.columns.iter().map(|c| c.name.as_str()).collect();
                println!("{}", names.join(" | "));
                for row in &rows.rows {
                    let cells: Vec<String> = row.iter().map(render_value).collect();
                    println!("{}", cells.join(" | "));
                }
                println!("({} rows)", rows.row_count());
            }
            Err(err) => {
                eprintln!("query failed: {err}");
                std::process::exit(1);
            }
        }
    }

    if let Some(limit_str) = flag_value(&args, "--history") {
        let limit: usize = limit_str.parse().context("--history must be an integer")?;
        for entry in engine.query_history(limit)? {
            println!(
                "{} [{}] {} rows {}ms: {}",
                entry.executed_at,
                entry.outcome.as_str(),
                entry.row_count,
                entry.duration_ms,
                entry.query_text.replace('\n', " ")
            );
        }
    }

    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_flag(args: &[String], flag: &str, default: usize) -> Result<usize> {
    match flag_value(args, flag) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{flag} must be an integer")),
        None => Ok(default),
    }
}

fn render_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(r) => format!("{r:.2}"),
        SqlValue::Text(t) => t.clone(),
        SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
