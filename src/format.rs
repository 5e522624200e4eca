use crate::combiner::FinalMapping;
use crate::stats::Stats;
use itertools::Itertools;
use serde::Serialize;

/// Round to one decimal place; a value on the `.x5` boundary goes up to the next tenth.
#[inline]
pub fn round_tenth(x: f64) -> f64 {
    ((x + 0.05) * 10.0).floor() / 10.0
}

/// Mean as rendered in the summary.
///
/// The sum is rounded before dividing so floating point noise accumulated over many additions
/// does not leak into the result.
pub fn rounded_mean(stats: &Stats) -> f64 {
    round_tenth(round_tenth(stats.sum) / stats.count as f64)
}

/// One rendered line of the summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub key: String,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub count: u64,
    pub sum: f64,
}

/// Rows in ascending byte-wise key order.
pub fn summary_rows(mapping: &FinalMapping) -> Vec<SummaryRow> {
    mapping
        .sorted()
        .into_iter()
        .map(|(key, stats)| SummaryRow {
            key: key.to_string(),
            min: stats.min,
            mean: rounded_mean(stats),
            max: stats.max,
            count: stats.count,
            sum: stats.sum,
        })
        .collect()
}

/// `{k1=min/mean/max, k2=min/mean/max, ...}` with keys sorted and one fractional digit per field.
pub fn format_summary(mapping: &FinalMapping) -> String {
    let body = mapping
        .sorted()
        .into_iter()
        .map(|(key, stats)| {
            format!(
                "{}={:.1}/{:.1}/{:.1}",
                key,
                stats.min,
                rounded_mean(stats),
                stats.max
            )
        })
        .join(", ");
    format!("{{{}}}", body)
}

/// The summary rows as a JSON array.
pub fn format_json(mapping: &FinalMapping) -> Result<String, serde_json::Error> {
    serde_json::to_string(&summary_rows(mapping))
}
