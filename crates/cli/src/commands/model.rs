//! Model training and inspection commands

use anyhow::Result;
use ccopt_lib::model::ModelMetadata;
use ccopt_lib::CostOptimizer;
use colored::Colorize;
use tabled::Tabled;

use crate::output::{
    format_percent, format_timestamp, print_heading, print_json, print_success, print_table,
    OutputFormat,
};

/// Row for the confusion matrix table
#[derive(Tabled)]
struct ConfusionRow {
    #[tabled(rename = "Actual")]
    actual: &'static str,
    #[tabled(rename = "Predicted keep")]
    predicted_keep: usize,
    #[tabled(rename = "Predicted downsize")]
    predicted_downsize: usize,
}

/// Train on the current snapshot and commit a new model version
pub async fn train(optimizer: &CostOptimizer, format: OutputFormat) -> Result<()> {
    let meta = optimizer.train().await?;
    match format {
        OutputFormat::Json => print_json(&meta)?,
        OutputFormat::Table => {
            print_success(&format!("Trained model version {}", meta.version));
            println!();
            print_metadata(&meta);
        }
    }
    Ok(())
}

/// Show metadata of the latest committed model
pub fn show_model(optimizer: &CostOptimizer, format: OutputFormat) -> Result<()> {
    let meta = optimizer.get_model_metadata()?;
    match format {
        OutputFormat::Json => print_json(&meta)?,
        OutputFormat::Table => print_metadata(&meta),
    }
    Ok(())
}

fn print_metadata(meta: &ModelMetadata) {
    print_heading("Model", '=');
    println!("Version:                {}", meta.version.to_string().cyan());
    println!("Trained at:             {}", format_timestamp(&meta.trained_at));
    println!("Training runtime:       {:.2}s", meta.training_runtime_seconds);
    println!(
        "Examples:               {} train / {} validation",
        meta.train_size, meta.val_size
    );
    println!(
        "Labeling rule:          CPU < {}% and memory < {}%",
        meta.labeling_rule.cpu_threshold, meta.labeling_rule.mem_threshold
    );
    println!(
        "Boosting:               {} trees, depth {}, learning rate {}",
        meta.boosting.n_estimators, meta.boosting.max_depth, meta.boosting.learning_rate
    );
    println!("Features:               {}", meta.feature_schema.fields.join(", ").dimmed());
    println!();

    print_heading("Validation", '-');
    println!("Train accuracy:         {}", format_percent(meta.train_accuracy));
    println!(
        "Validation accuracy:    {}",
        format_percent(meta.validation_accuracy).green()
    );
    println!("Precision (downsize):   {}", format_percent(meta.precision_downsize));
    println!("Recall (downsize):      {}", format_percent(meta.recall_downsize));
    println!("F1 (downsize):          {}", format_percent(meta.f1_downsize));
    println!();

    let cm = &meta.confusion_matrix;
    print_table(vec![
        ConfusionRow {
            actual: "keep",
            predicted_keep: cm.true_keep,
            predicted_downsize: cm.false_downsize,
        },
        ConfusionRow {
            actual: "downsize",
            predicted_keep: cm.false_keep,
            predicted_downsize: cm.true_downsize,
        },
    ]);
    println!("{}", format!("Checksum: {}", meta.artifact_checksum).dimmed());
}
