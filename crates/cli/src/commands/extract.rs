use std::fs;
use std::path::Path;

use propdraft_core::{ExtractionMethod, PipelineError};
use propdraft_pipeline::{ExtractionRequest, PipelineComponents};

use crate::commands::{
    block_on, load_config, open_database, to_data, CommandResult, Failure, EXIT_INPUT,
    EXIT_PIPELINE, EXIT_RUNTIME,
};

pub fn run(
    file: &Path,
    actor_id: &str,
    product_group: &str,
    method: Option<&str>,
) -> CommandResult {
    let method = match method.map(str::parse::<ExtractionMethod>).transpose() {
        Ok(method) => method.unwrap_or_default(),
        Err(message) => return pipeline_failure(PipelineError::Validation(message)),
    };

    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return CommandResult::from_failure("extract", failure),
    };

    let bytes = match fs::read(file) {
        Ok(bytes) => bytes,
        Err(error) => {
            return CommandResult::failure(
                "extract",
                "input_file",
                format!("failed to read `{}`: {error}", file.display()),
                EXIT_INPUT,
            );
        }
    };
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let result = block_on(async {
        let pool = open_database(&config).await?;
        let components = PipelineComponents::from_config(&config, pool.clone()).map_err(
            |error| Failure::new("http_client", error.to_string(), EXIT_RUNTIME),
        )?;

        let request = ExtractionRequest::new(file_name, bytes).with_method(method);
        let outcome = components.service.extract(request, actor_id, product_group).await;
        pool.close().await;
        outcome.map_err(|error| {
            Failure::new(error.error_class(), error.to_string(), EXIT_PIPELINE)
        })
    });

    match result {
        Ok(result) => {
            let message = match (&result.draft, &result.draft_skipped_reason) {
                (Some(draft), _) => format!(
                    "draft {} written with {} items",
                    draft.proposal_number, draft.item_count
                ),
                (None, Some(reason)) => format!("extraction finished without a draft: {reason}"),
                (None, None) => "extraction finished without a draft".to_string(),
            };
            CommandResult::success_with_data("extract", message, to_data(&result))
        }
        Err(failure) => CommandResult::from_failure("extract", failure),
    }
}

fn pipeline_failure(error: PipelineError) -> CommandResult {
    CommandResult::failure("extract", error.error_class(), error.to_string(), EXIT_PIPELINE)
}
