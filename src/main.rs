//! ChurnForge: customer value analysis and churn prediction CLI
//!
//! This is the main entrypoint that orchestrates table loading, the
//! analysis pipeline, and the printed report.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::time::Instant;

use churnforge::sample::{generate_sample_data, SampleConfig};
use churnforge::tables::{
    clean_tables, load_customers_csv, load_products_csv, load_transactions_csv, CleanTables,
};
use churnforge::{pipeline, Args};

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.verbose {
        println!("ChurnForge - Customer Value & Churn Analysis");
        println!("============================================\n");
    }

    let start_time = Instant::now();

    let tables = load_tables(&args)?;
    let config = args.to_config()?;
    let report = pipeline::run(&tables, &config)?;

    print_report(&args, &report);

    if let Some(path) = &args.json {
        write_json_report(path, &report)?;
        println!("\nJSON report written to: {path}");
    }

    println!(
        "\nTotal processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

fn load_tables(args: &Args) -> Result<CleanTables> {
    if let Some((customers_path, products_path, transactions_path)) = args.csv_paths() {
        if args.verbose {
            println!("Loading tables from CSV");
            println!("  customers:    {customers_path}");
            println!("  products:     {products_path}");
            println!("  transactions: {transactions_path}");
        }
        let customers = load_customers_csv(customers_path)?;
        let products = load_products_csv(products_path)?;
        let transactions = load_transactions_csv(transactions_path)?;
        return Ok(clean_tables(customers, products, transactions)?);
    }

    if args.demo {
        if args.verbose {
            println!("Generating sample data (seed {})", args.seed);
        }
        let mut sample = SampleConfig::new(Utc::now());
        sample.seed = args.seed;
        let (customers, products, transactions) = generate_sample_data(&sample);
        return Ok(clean_tables(customers, products, transactions)?);
    }

    anyhow::bail!("provide --customers, --products, and --transactions, or run with --demo");
}

fn print_report(args: &Args, report: &pipeline::AnalysisReport) {
    println!("=== Customer Features ===");
    println!("✓ {} customers aggregated", report.customer_features.len());
    println!("✓ {} products aggregated", report.product_features.len());

    println!("\n=== RFM Segments ===");
    let mut rfm_counts: std::collections::BTreeMap<&str, usize> = Default::default();
    for row in &report.rfm {
        *rfm_counts.entry(row.segment.as_str()).or_default() += 1;
    }
    for (segment, count) in &rfm_counts {
        println!("{segment}: {count} customers");
    }

    println!("\n=== Value Segments ===");
    for (cluster, (label, size)) in report
        .segmentation
        .cluster_labels
        .iter()
        .zip(&report.segmentation.cluster_sizes)
        .enumerate()
    {
        let share = *size as f64 / report.customer_features.len().max(1) as f64 * 100.0;
        println!("Cluster {cluster} [{label}]: {size} customers ({share:.1}%)");
    }

    println!("\n=== Model Comparison ===");
    for result in &report.training.results {
        println!(
            "{:<20} accuracy {:.4}  AUC {:.4}",
            result.name, result.accuracy, result.auc
        );
    }
    let best = report.training.best_result();
    println!("Best model: {} (AUC {:.4})", best.name, best.auc);

    if args.verbose {
        if let Some(importances) = &best.feature_importances {
            println!("\nTop features for {}:", best.name);
            let mut ranked: Vec<(&String, f64)> = report
                .training
                .feature_names
                .iter()
                .zip(importances.iter().copied())
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (name, importance) in ranked.iter().take(10) {
                println!("  {name:<30} {importance:.4}");
            }
        }
    }

    println!("\n=== Churn Risk ===");
    let insights = &report.insights;
    println!("Churn rate: {:.1}%", insights.churn_rate * 100.0);
    println!(
        "Risk tiers: {} high / {} medium / {} low",
        insights.high_risk_customers, insights.medium_risk_customers, insights.low_risk_customers
    );
    println!(
        "Average churn probability: {:.3}",
        insights.avg_churn_probability
    );
    println!("Customers at risk: {}", insights.customers_at_risk);

    println!("\n=== Insights ===");
    println!("Total customers: {}", insights.total_customers);
    println!("Total revenue: ${:.2}", insights.total_revenue);
    println!("Top segment: {}", insights.top_segment);
    println!("Champions: {}", insights.champions_count);
    println!("At-risk (RFM): {}", insights.at_risk_count);
    println!(
        "Retention rate: {:.1}%",
        insights.customer_retention_rate * 100.0
    );

    println!("\n=== Recommendations ===");
    for (i, recommendation) in report.recommendations.iter().enumerate() {
        println!("{}. {recommendation}", i + 1);
    }
}

fn write_json_report(path: &str, report: &pipeline::AnalysisReport) -> Result<()> {
    let comparison: Vec<serde_json::Value> = report
        .training
        .results
        .iter()
        .map(|r| {
            serde_json::json!({
                "model": r.name,
                "accuracy": r.accuracy,
                "auc": r.auc,
            })
        })
        .collect();
    let output = serde_json::json!({
        "insights": report.insights,
        "model_comparison": comparison,
        "best_model": report.training.best_result().name,
        "selected_features": report.selected_feature_names,
        "risk_scores": report.risk_scores,
        "recommendations": report.recommendations,
    });
    std::fs::write(path, serde_json::to_string_pretty(&output)?)?;
    Ok(())
}
