use std::path::Path;

use tokio::io::AsyncWriteExt;

use super::format::render_text;
use crate::args::OutputFormat;
use crate::error::{AppError, AppResult, SinkError};
use crate::metrics::Summary;

/// Renders the summary in the requested format.
///
/// # Errors
///
/// Returns an error when serialization fails.
pub fn render_summary(summary: &Summary, format: OutputFormat) -> AppResult<String> {
    match format {
        OutputFormat::Text => render_text(summary),
        OutputFormat::Json => {
            let mut rendered = serde_json::to_string_pretty(summary)
                .map_err(|err| AppError::sink(SinkError::Serialize { source: err }))?;
            rendered.push('\n');
            Ok(rendered)
        }
    }
}

/// Writes the rendered summary to `output`, or stdout when no path is given.
///
/// # Errors
///
/// Returns an error when rendering or writing fails.
pub async fn emit_summary(
    summary: &Summary,
    format: OutputFormat,
    output: Option<&Path>,
) -> AppResult<()> {
    let rendered = render_summary(summary, format)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, rendered.as_bytes())
                .await
                .map_err(|err| {
                    AppError::sink(SinkError::WriteFile {
                        path: path.to_path_buf(),
                        source: err,
                    })
                })?;
            tracing::info!("Summary written to {}", path.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(rendered.as_bytes())
                .await
                .map_err(|err| AppError::sink(SinkError::Stdout { source: err }))?;
            stdout
                .flush()
                .await
                .map_err(|err| AppError::sink(SinkError::Stdout { source: err }))?;
        }
    }
    Ok(())
}
