//! Cost analytics commands

use anyhow::Result;
use ccopt_lib::observability::OptimizerMetrics;
use ccopt_lib::{CostOptimizer, OptimizerError, RecommendationFilter};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{
    format_currency, format_percent, format_timestamp, print_heading, print_info, print_json,
    print_table, print_warning, OutputFormat,
};

#[derive(Serialize)]
struct PortfolioSummary<'a> {
    summary: &'a str,
    generated_at: DateTime<Utc>,
}

/// Row for the per-environment breakdown
#[derive(Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "Environment")]
    environment: String,
    #[tabled(rename = "Instances")]
    instances: usize,
    #[tabled(rename = "Downsize")]
    downsize: usize,
    #[tabled(rename = "Baseline/mo")]
    baseline: String,
    #[tabled(rename = "Optimized/mo")]
    optimized: String,
}

/// Row for the daily cost trend
#[derive(Tabled)]
struct TrendRow {
    #[tabled(rename = "Day")]
    day: String,
    #[tabled(rename = "Baseline")]
    baseline: String,
    #[tabled(rename = "Optimized")]
    optimized: String,
}

/// Show portfolio cost totals
pub async fn show_analytics(optimizer: &CostOptimizer, format: OutputFormat) -> Result<()> {
    let summary = optimizer.get_analytics_summary().await?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            print_heading("Cost Analysis", '=');
            println!("Instances:              {}", summary.instance_count);
            println!("Downsize candidates:    {}", summary.downsize_count);
            println!();

            print_heading("Monthly Costs", '-');
            println!(
                "Current:                {}",
                format_currency(summary.total_baseline_monthly_cost)
            );
            println!(
                "Optimized:              {}",
                format_currency(summary.total_optimized_monthly_cost).green()
            );
            let savings_pct = if summary.total_baseline_monthly_cost > 0.0 {
                summary.total_monthly_savings / summary.total_baseline_monthly_cost
            } else {
                0.0
            };
            println!(
                "{} {} ({})",
                "Potential Savings:".bold(),
                format_currency(summary.total_monthly_savings).green().bold(),
                format_percent(savings_pct)
            );
            println!();

            if !summary.env_breakdown.is_empty() {
                print_heading("By Environment", '-');
                let rows: Vec<EnvironmentRow> = summary
                    .env_breakdown
                    .iter()
                    .map(|e| EnvironmentRow {
                        environment: e.environment.clone(),
                        instances: e.instance_count,
                        downsize: e.downsize_count,
                        baseline: format_currency(e.baseline_monthly_cost),
                        optimized: format_currency(e.optimized_monthly_cost),
                    })
                    .collect();
                print_table(rows);
                println!();
            }

            match &summary.model {
                Some(model) => println!(
                    "Model v{} trained {} ({} validation accuracy)",
                    model.version,
                    format_timestamp(&model.trained_at).dimmed(),
                    format_percent(model.validation_accuracy)
                ),
                None => print_info("No model trained yet; savings assume every instance is kept"),
            }
            println!("Recommendation requests: {}", summary.recommendation_requests);
        }
    }

    Ok(())
}

/// Show the simulated daily cost trend ending today
pub async fn show_trends(optimizer: &CostOptimizer, days: u32, format: OutputFormat) -> Result<()> {
    let trend = optimizer.get_cost_trends(days, Utc::now().date_naive()).await?;

    match format {
        OutputFormat::Json => print_json(&trend)?,
        OutputFormat::Table => {
            print_heading("Daily Cost Trend", '=');
            let rows: Vec<TrendRow> = trend
                .days
                .iter()
                .zip(&trend.baseline_daily_cost)
                .zip(&trend.optimized_daily_cost)
                .map(|((day, baseline), optimized)| TrendRow {
                    day: day.format("%Y-%m-%d").to_string(),
                    baseline: format_currency(*baseline),
                    optimized: format_currency(*optimized),
                })
                .collect();
            print_table(rows);

            let baseline: f64 = trend.baseline_daily_cost.iter().sum();
            let optimized: f64 = trend.optimized_daily_cost.iter().sum();
            println!(
                "\nWindow total: {} baseline, {} optimized",
                format_currency(baseline),
                format_currency(optimized).green()
            );
        }
    }

    Ok(())
}

/// Print a generated overview of portfolio savings
pub async fn show_summary(optimizer: &CostOptimizer, format: OutputFormat) -> Result<()> {
    let text = match optimizer.get_portfolio_summary().await {
        Ok(text) => text,
        Err(OptimizerError::Unavailable(reason)) => {
            print_warning(&format!("Summaries are disabled: {}", reason));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Json => print_json(&PortfolioSummary {
            summary: &text,
            generated_at: Utc::now(),
        })?,
        OutputFormat::Table => {
            print_heading("Portfolio Summary", '=');
            println!("{}", text);
        }
    }
    Ok(())
}

/// Evaluate the portfolio once and print the Prometheus exposition
pub async fn show_metrics(optimizer: &CostOptimizer) -> Result<()> {
    match optimizer
        .get_recommendations(&RecommendationFilter::default())
        .await
    {
        Ok(_) | Err(OptimizerError::ModelNotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    print!("{}", OptimizerMetrics::new().render());
    Ok(())
}
