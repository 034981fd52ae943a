//! Optimization pass: one extra model call per aggregated document.
//!
//! The optimizer rewrites the page-by-page transcription into a single
//! coherent sheet. A failed call never loses content: the aggregated text
//! stays in place and the status records why.

use crate::config::ConversionConfig;
use crate::output::{FileOutput, OptimizationStatus};
use crate::pipeline::llm::{call_with_policy, ModelClient};
use crate::pipeline::request::build_optimization_request;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Replace `output.text` with the optimizer's result, or fall back.
///
/// Files that failed to render are left untouched with
/// [`OptimizationStatus::Skipped`].
pub async fn optimize_document(
    client: &dyn ModelClient,
    permits: &Semaphore,
    mut output: FileOutput,
    config: &ConversionConfig,
) -> FileOutput {
    if output.render_error.is_some() {
        output.optimization = OptimizationStatus::Skipped;
        return output;
    }

    let request = build_optimization_request(&output.text, config);
    let label = format!("{} optimization", output.file_id);

    match call_with_policy(client, permits, &request, config, &label).await {
        Ok(text) => {
            info!(
                "{}: optimized {} → {} chars",
                output.file_id,
                output.text.len(),
                text.len()
            );
            output.text = text;
            output.optimization = OptimizationStatus::Applied;
        }
        Err(failure) => {
            warn!(
                "{}: optimization failed, keeping aggregated text: {}",
                output.file_id, failure.error
            );
            output.optimization = OptimizationStatus::FellBack(failure.error.to_string());
        }
    }

    output
}
