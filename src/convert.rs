//! Format-to-format conversion through the IR.
//!
//! `extract-ir` on the source plugin, then `emit-native` on the target
//! plugin. The IR file stays in the output directory next to the native
//! output, so a conversion can be inspected or re-emitted later.

use serde::Serialize;
use std::path::Path;

use codex_bridge_core::LossClass;

use crate::dispatch::Dispatcher;
use crate::error::PluginError;
use crate::protocol::{EmitNativeResult, ExtractIrResult};

#[derive(Debug, Clone, Serialize)]
pub struct ConvertResult {
    pub source_plugin: String,
    pub target_plugin: String,
    pub extract: ExtractIrResult,
    pub emit: EmitNativeResult,
    /// The worse of the two steps.
    pub loss_class: LossClass,
}

/// Convert `input` to the format of `target`. The source plugin is
/// detected when `source` is `None`.
pub async fn convert(
    dispatcher: &Dispatcher,
    input: &Path,
    source: Option<&str>,
    target: &str,
    output_dir: &Path,
) -> Result<ConvertResult, PluginError> {
    let source_plugin = match source {
        Some(id) => id.to_string(),
        None => dispatcher
            .detect_any(input)
            .await
            .map(|(id, _)| id)
            .ok_or_else(|| {
                PluginError::Argument(format!("no plugin detected a format for {}", input.display()))
            })?,
    };

    let extract = dispatcher.extract_ir(&source_plugin, input, output_dir).await?;
    let emit = dispatcher.emit_native(target, &extract.ir_path, output_dir).await?;
    let loss_class = extract.loss_class.worst(emit.loss_class);
    tracing::info!(
        source = %source_plugin,
        target = %target,
        loss = %loss_class,
        "converted {}",
        input.display()
    );

    Ok(ConvertResult {
        source_plugin,
        target_plugin: target.to_string(),
        extract,
        emit,
        loss_class,
    })
}
