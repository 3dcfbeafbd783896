//! Reading the output a checkup wrote into its result record

use super::RunError;
use crate::models::{keys, CheckupResults};
use std::collections::BTreeMap;

/// Extract succeeded flag, failure reason and `status.result.*` entries
pub fn read_results(
    data: Option<&BTreeMap<String, String>>,
) -> Result<CheckupResults, RunError> {
    let data = data.ok_or(RunError::ResultsDataIsNil)?;

    let succeeded = match data.get(keys::SUCCEEDED) {
        None => None,
        Some(raw) => Some(
            parse_bool(raw).ok_or_else(|| RunError::SucceededIllegal(raw.to_string()))?,
        ),
    };

    let results = data
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(keys::RESULT_PREFIX)
                .map(|name| (name.to_string(), value.clone()))
        })
        .collect();

    Ok(CheckupResults {
        succeeded,
        failure_reason: data.get(keys::FAILURE_REASON).cloned(),
        results,
    })
}

/// Boolean spellings checkups commonly emit: `1`, `t`, `true`, `TRUE`, `True` and their negations
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
