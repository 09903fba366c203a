//! Reshape a decoded box-plot payload into per-subgroup summary records.

use crate::metrics;
use crate::model::{RawResponse, SummaryRecord};

/// Errors raised while reducing a payload to summary records.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    /// `x` and `y` of a group are not the same length.
    LengthMismatch {
        group: String,
        x_len: usize,
        y_len: usize,
    },
    /// A subgroup has no samples and empty sets are being rejected.
    EmptySamples { group: String, subgroup: String },
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::LengthMismatch { group, x_len, y_len } => write!(
                f,
                "group {}: {} subgroup labels but {} sample sets",
                group, x_len, y_len
            ),
            TransformError::EmptySamples { group, subgroup } => {
                write!(f, "group {}: subgroup {} has no samples", group, subgroup)
            }
        }
    }
}

impl std::error::Error for TransformError {}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransformOptions {
    /// Fail on empty sample arrays instead of emitting NaN statistics.
    pub reject_empty: bool,
}

/// Transform with default options (empty sample arrays produce NaN statistics).
pub fn transform_response(raw: &RawResponse) -> Result<Vec<SummaryRecord>, TransformError> {
    transform_response_with(raw, TransformOptions::default())
}

/// Emit one record per (group, subgroup), in group order then `x` order.
pub fn transform_response_with(
    raw: &RawResponse,
    opts: TransformOptions,
) -> Result<Vec<SummaryRecord>, TransformError> {
    let mut records = Vec::new();
    for (group, series) in &raw.groups {
        if series.x.len() != series.y.len() {
            return Err(TransformError::LengthMismatch {
                group: group.clone(),
                x_len: series.x.len(),
                y_len: series.y.len(),
            });
        }
        for (subgroup, samples) in series.x.iter().zip(&series.y) {
            let values = samples.values();
            let stats = if opts.reject_empty {
                metrics::try_compute_statistics(values).ok_or_else(|| {
                    TransformError::EmptySamples {
                        group: group.clone(),
                        subgroup: subgroup.clone(),
                    }
                })?
            } else {
                metrics::compute_statistics(values)
            };
            records.push(SummaryRecord {
                group: group.clone(),
                subgroup: subgroup.clone(),
                stats,
            });
        }
    }
    Ok(records)
}
