//! Prompt text for recommendation explanations and portfolio summaries

use crate::analytics::AnalyticsSummary;
use crate::models::Recommendation;

/// System instructions for the explanation generator
pub const SYSTEM_PROMPT: &str = "You are a cloud cost optimization assistant. Explain the reasoning \
behind optimization recommendations for compute instances in simple, FinOps-friendly language. \
Keep explanations concise (2-4 sentences) and focus on cost savings and resource utilization.";

/// User prompt describing one recommendation
pub fn build_prompt(rec: &Recommendation) -> String {
    let hourly_cost = rec
        .hourly_cost
        .map(|c| format!("${:.3}/hr", c))
        .unwrap_or_else(|| "unknown".to_string());
    let reasons = if rec.reasons.is_empty() {
        "None".to_string()
    } else {
        rec.reasons.join(", ")
    };

    format!(
        "Recommendation details:\n\
         - Action: {action}\n\
         - Instance: {id} ({ty})\n\
         - Environment: {env}, Region: {region}\n\
         - Current hourly cost: {hourly_cost}\n\
         - Projected monthly savings: ${savings:.2}\n\
         - Downsize confidence: {confidence:.1}%\n\
         - Reasons: {reasons}\n\
         \n\
         Provide a clear, concise explanation of this recommendation.",
        action = rec.action,
        id = rec.cloud_instance_id,
        ty = rec.instance_type.as_deref().unwrap_or("unknown"),
        env = rec.environment.as_deref().unwrap_or("unknown"),
        region = rec.region.as_deref().unwrap_or("unknown"),
        hourly_cost = hourly_cost,
        savings = rec.projected_monthly_savings,
        confidence = rec.confidence_downsize * 100.0,
        reasons = reasons,
    )
}

/// User prompt asking for a short portfolio-wide savings summary
pub fn build_portfolio_prompt(summary: &AnalyticsSummary, avg_daily_savings: Option<f64>) -> String {
    let downsize_rate = if summary.instance_count > 0 {
        summary.downsize_count as f64 / summary.instance_count as f64 * 100.0
    } else {
        0.0
    };

    let mut prompt = format!(
        "Acting as a cloud cost optimization analyst, analyze the following data and \
         provide a 2-3 sentence summary:\n\
         \n\
         Cost Summary:\n\
         - Total baseline monthly cost: ${baseline:.2}\n\
         - Total optimized monthly cost: ${optimized:.2}\n\
         - Total monthly savings: ${savings:.2}\n\
         - {downsize} out of {instances} instances recommended for downsizing ({rate:.1}%)\n",
        baseline = summary.total_baseline_monthly_cost,
        optimized = summary.total_optimized_monthly_cost,
        savings = summary.total_monthly_savings,
        downsize = summary.downsize_count,
        instances = summary.instance_count,
        rate = downsize_rate,
    );
    if let Some(daily) = avg_daily_savings {
        prompt.push_str(&format!("- Average daily savings: ${:.2}\n", daily));
    }

    prompt.push_str("\nEnvironment Breakdown:\n");
    for env in &summary.env_breakdown {
        prompt.push_str(&format!(
            "- {}: ${:.2} baseline -> ${:.2} optimized\n",
            env.environment, env.baseline_monthly_cost, env.optimized_monthly_cost
        ));
    }

    prompt.push_str("\nModel Performance:\n");
    match &summary.model {
        Some(model) => prompt.push_str(&format!(
            "- Model version: {}\n- Validation accuracy: {:.1}%\n",
            model.version,
            model.validation_accuracy * 100.0
        )),
        None => prompt.push_str("- No trained model\n"),
    }

    prompt.push_str(
        "\nProvide a concise summary highlighting the most significant savings \
         opportunities and efficiency insights.",
    );
    prompt
}
