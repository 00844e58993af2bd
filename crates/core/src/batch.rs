//! Batch submission specification and validation.
//!
//! A [`BatchSpec`] describes one batch operation over many photos (render or
//! download). Validation happens at submission time; an invalid spec never
//! becomes a job.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::JobKind;
use crate::types::ItemId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on items in a single batch. Larger selections should be split
/// by the caller.
pub const MAX_BATCH_ITEMS: usize = 10_000;

/// JPEG/WebP quality bounds.
pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

// ---------------------------------------------------------------------------
// Spec types
// ---------------------------------------------------------------------------

/// Which photos a batch operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchScope {
    /// Every photo in the catalog.
    All,
    /// Every photo of one roll (`roll_id` required).
    Roll,
    /// An explicit, non-empty list of photo IDs.
    Selection,
}

/// Where per-photo processing parameters come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamsSource {
    /// Each photo's own stored edit parameters.
    Photo,
    /// A named preset applied uniformly (`preset_id` required).
    Preset,
}

/// Output image format for render batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Tiff,
}

impl OutputFormat {
    /// File extension for output files of this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tif",
        }
    }
}

/// Output configuration shared by every item of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Encoder quality, 1-100. Ignored for lossless formats but still
    /// validated so a bad UI value is caught early.
    pub quality: u8,
    /// Optional long-edge bound in pixels.
    pub max_dimension: Option<u32>,
    /// Destination directory on the requesting device.
    pub destination: String,
}

/// A validated-at-submission description of one batch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSpec {
    pub kind: JobKind,
    pub scope: BatchScope,
    /// Photo IDs; required (non-empty) when `scope` is `Selection`.
    #[serde(default)]
    pub item_ids: Vec<ItemId>,
    /// Roll ID; required when `scope` is `Roll`.
    pub roll_id: Option<i64>,
    pub params_source: ParamsSource,
    /// Preset ID; required when `params_source` is `Preset`.
    pub preset_id: Option<i64>,
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a batch spec at submission time.
///
/// Rules:
/// - `Selection` scope requires a non-empty, bounded, duplicate-free item list.
/// - `Roll` scope requires `roll_id`.
/// - `Preset` params source requires `preset_id`.
/// - Output quality must be within 1-100 and the destination non-empty.
pub fn validate_spec(spec: &BatchSpec) -> Result<(), CoreError> {
    match spec.scope {
        BatchScope::Selection => {
            if spec.item_ids.is_empty() {
                return Err(CoreError::Validation(
                    "Batch selection must contain at least one photo".to_string(),
                ));
            }
            if spec.item_ids.len() > MAX_BATCH_ITEMS {
                return Err(CoreError::Validation(format!(
                    "Batch selection exceeds {MAX_BATCH_ITEMS} items"
                )));
            }
            let mut seen = std::collections::HashSet::with_capacity(spec.item_ids.len());
            for id in &spec.item_ids {
                if !seen.insert(id) {
                    return Err(CoreError::Validation(format!(
                        "Duplicate photo ID in batch selection: {id}"
                    )));
                }
            }
        }
        BatchScope::Roll => {
            if spec.roll_id.is_none() {
                return Err(CoreError::Validation(
                    "Roll-scoped batch requires a roll ID".to_string(),
                ));
            }
        }
        BatchScope::All => {}
    }

    if spec.params_source == ParamsSource::Preset && spec.preset_id.is_none() {
        return Err(CoreError::Validation(
            "Preset params source requires a preset ID".to_string(),
        ));
    }

    validate_output(&spec.output)
}

/// Validate the output configuration of a batch spec.
pub fn validate_output(output: &OutputConfig) -> Result<(), CoreError> {
    if output.quality < MIN_QUALITY || output.quality > MAX_QUALITY {
        return Err(CoreError::Validation(format!(
            "Output quality must be between {MIN_QUALITY} and {MAX_QUALITY}, got {}",
            output.quality
        )));
    }
    if let Some(dim) = output.max_dimension {
        if dim == 0 {
            return Err(CoreError::Validation(
                "Output max dimension must be greater than zero".to_string(),
            ));
        }
    }
    if output.destination.trim().is_empty() {
        return Err(CoreError::Validation(
            "Output destination must not be empty".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> OutputConfig {
        OutputConfig {
            format: OutputFormat::Jpeg,
            quality: 90,
            max_dimension: Some(2048),
            destination: "/exports".to_string(),
        }
    }

    fn selection_spec(item_ids: Vec<ItemId>) -> BatchSpec {
        BatchSpec {
            kind: JobKind::Render,
            scope: BatchScope::Selection,
            item_ids,
            roll_id: None,
            params_source: ParamsSource::Photo,
            preset_id: None,
            output: output(),
        }
    }

    // -- scope rules ---------------------------------------------------------

    #[test]
    fn selection_with_items_accepted() {
        assert!(validate_spec(&selection_spec(vec![1, 2, 3])).is_ok());
    }

    #[test]
    fn empty_selection_rejected() {
        assert!(validate_spec(&selection_spec(vec![])).is_err());
    }

    #[test]
    fn duplicate_selection_rejected() {
        let err = validate_spec(&selection_spec(vec![1, 2, 1])).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn oversized_selection_rejected() {
        let ids: Vec<ItemId> = (0..(MAX_BATCH_ITEMS as i64 + 1)).collect();
        assert!(validate_spec(&selection_spec(ids)).is_err());
    }

    #[test]
    fn roll_scope_requires_roll_id() {
        let mut spec = selection_spec(vec![]);
        spec.scope = BatchScope::Roll;
        assert!(validate_spec(&spec).is_err());

        spec.roll_id = Some(12);
        assert!(validate_spec(&spec).is_ok());
    }

    #[test]
    fn all_scope_needs_no_items() {
        let mut spec = selection_spec(vec![]);
        spec.scope = BatchScope::All;
        assert!(validate_spec(&spec).is_ok());
    }

    // -- params source -------------------------------------------------------

    #[test]
    fn preset_source_requires_preset_id() {
        let mut spec = selection_spec(vec![1]);
        spec.params_source = ParamsSource::Preset;
        assert!(validate_spec(&spec).is_err());

        spec.preset_id = Some(4);
        assert!(validate_spec(&spec).is_ok());
    }

    // -- output config -------------------------------------------------------

    #[test]
    fn quality_out_of_range_rejected() {
        let mut spec = selection_spec(vec![1]);
        spec.output.quality = 0;
        assert!(validate_spec(&spec).is_err());
        spec.output.quality = 101;
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn zero_max_dimension_rejected() {
        let mut spec = selection_spec(vec![1]);
        spec.output.max_dimension = Some(0);
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn empty_destination_rejected() {
        let mut spec = selection_spec(vec![1]);
        spec.output.destination = "   ".to_string();
        assert!(validate_spec(&spec).is_err());
    }
}
