//! Recommendation-related CLI commands

use anyhow::Result;
use ccopt_lib::{Action, CostOptimizer, OptimizerError, RecommendationFilter};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{
    color_action, color_confidence, format_currency, print_json, print_table, print_warning,
    OutputFormat,
};

/// Row for recommendations table
#[derive(Tabled)]
struct RecommendationRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Type")]
    instance_type: String,
    #[tabled(rename = "Env")]
    environment: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Savings/mo")]
    savings: String,
    #[tabled(rename = "Top reason")]
    reason: String,
}

#[derive(Serialize)]
struct Explanation<'a> {
    instance_ref: &'a str,
    explanation: &'a str,
}

/// List recommendations matching the filter, best savings first
pub async fn get_recommendations(
    optimizer: &CostOptimizer,
    filter: RecommendationFilter,
    downsize_only: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut recs = optimizer.get_recommendations(&filter).await?;
    if downsize_only {
        recs.retain(|r| r.action == Action::Downsize);
    }

    match format {
        OutputFormat::Json => print_json(&recs)?,
        OutputFormat::Table => {
            if recs.is_empty() {
                print_warning("No recommendations found");
                return Ok(());
            }

            let total: f64 = recs.iter().map(|r| r.projected_monthly_savings).sum();
            let downsize = recs.iter().filter(|r| r.action == Action::Downsize).count();
            let rows: Vec<RecommendationRow> = recs
                .iter()
                .map(|r| RecommendationRow {
                    instance: r.cloud_instance_id.clone(),
                    instance_type: r.instance_type.clone().unwrap_or_default(),
                    environment: r.environment.clone().unwrap_or_default(),
                    region: r.region.clone().unwrap_or_default(),
                    action: color_action(r.action),
                    confidence: color_confidence(r.confidence_downsize),
                    savings: format_currency(r.projected_monthly_savings),
                    reason: r.reasons.first().cloned().unwrap_or_default(),
                })
                .collect();

            print_table(rows);
            println!(
                "\nTotal: {} recommendations, {} downsize, {} potential monthly savings",
                recs.len(),
                downsize,
                format_currency(total).green().bold()
            );
        }
    }

    Ok(())
}

/// Explain one instance's recommendation in plain language
pub async fn explain(optimizer: &CostOptimizer, instance_ref: &str, format: OutputFormat) -> Result<()> {
    let text = match optimizer.get_recommendation_explanation(instance_ref).await {
        Ok(text) => text,
        Err(OptimizerError::Unavailable(reason)) => {
            print_warning(&format!("Explanations are disabled: {}", reason));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Json => print_json(&Explanation {
            instance_ref,
            explanation: &text,
        })?,
        OutputFormat::Table => {
            println!("{}", instance_ref.bold());
            println!("{}", text);
        }
    }
    Ok(())
}
