use serde::{Deserialize, Serialize};

/// Parameters carried by a `queue` row, per spec.md §3 "Job parameters".
///
/// `trim_thresholds` and the aligner name/params are forwarded verbatim to
/// the external collaborators described in spec.md §6 — the scheduler core
/// never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    /// Directory holding the per-sequence `.ss2` secondary-structure files.
    pub psipred_dir: String,
    pub master_id: i64,
    pub aligner_name: String,
    pub aligner_params: String,
    pub trim_thresholds: Vec<f64>,
    pub gap_open: f64,
    pub gap_extend: f64,
}

impl JobParams {
    pub fn trim_thresholds_as_str(&self) -> String {
        self.trim_thresholds
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn parse_trim_thresholds(raw: &str) -> Vec<f64> {
        raw.split_whitespace()
            .filter_map(|tok| tok.parse::<f64>().ok())
            .collect()
    }
}
