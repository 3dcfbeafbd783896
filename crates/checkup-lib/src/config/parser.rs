//! Checkup record parsing

use super::ConfigError;
use crate::checkup::{param_env_name, RESULT_RECORD_NAMESPACE_ENV, RESULT_RECORD_NAME_ENV};
use crate::models::{keys, CheckupSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Service account every namespace gets implicitly
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Parse the raw field map of a checkup record
///
/// A missing map and a record that already carries a start timestamp are
/// rejected before any field is looked at.
pub fn parse(data: Option<&BTreeMap<String, String>>) -> Result<CheckupSpec, ConfigError> {
    let data = data.ok_or(ConfigError::DataIsNil)?;

    // Presence alone marks the record as consumed, even with an empty value
    if data.contains_key(keys::START_TIMESTAMP) {
        return Err(ConfigError::AlreadyInUse);
    }

    let image = parse_image(data)?;
    let timeout = parse_timeout(data)?;
    let service_account_name = parse_service_account(data)?;
    let params = parse_params(data)?;
    let cluster_role_names = parse_list(data.get(keys::CLUSTER_ROLES));
    let role_names = parse_list(data.get(keys::ROLES));
    validate_role_names(&role_names)?;

    Ok(CheckupSpec {
        image,
        timeout,
        service_account_name,
        params,
        cluster_role_names,
        role_names,
    })
}

fn parse_image(data: &BTreeMap<String, String>) -> Result<String, ConfigError> {
    match data.get(keys::IMAGE) {
        None => Err(ConfigError::ImageMissing),
        Some(image) if image.is_empty() => Err(ConfigError::ImageIllegal),
        Some(image) => Ok(image.clone()),
    }
}

fn parse_timeout(data: &BTreeMap<String, String>) -> Result<Duration, ConfigError> {
    let raw = data.get(keys::TIMEOUT).ok_or(ConfigError::TimeoutMissing)?;
    parse_duration(raw).map_err(ConfigError::TimeoutIllegal)
}

fn parse_service_account(data: &BTreeMap<String, String>) -> Result<String, ConfigError> {
    match data.get(keys::SERVICE_ACCOUNT_NAME).map(String::as_str) {
        None => Err(ConfigError::ServiceAccountMissing),
        Some("") => Err(ConfigError::ServiceAccountEmpty),
        Some(DEFAULT_SERVICE_ACCOUNT) => Err(ConfigError::ServiceAccountIllegal),
        Some(name) => Ok(name.to_string()),
    }
}

/// Params keyed by name; every param must map to its own environment variable
fn parse_params(
    data: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut taken: BTreeSet<String> = [RESULT_RECORD_NAME_ENV, RESULT_RECORD_NAMESPACE_ENV]
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut params = BTreeMap::new();
    for (key, value) in data {
        if let Some(name) = key.strip_prefix(keys::PARAM_PREFIX) {
            if name.is_empty() {
                return Err(ConfigError::ParamNameIllegal);
            }
            let env = param_env_name(name);
            if !taken.insert(env.clone()) {
                return Err(ConfigError::ParamNameConflict {
                    name: name.to_string(),
                    env,
                });
            }
            params.insert(name.to_string(), value.clone());
        }
    }
    Ok(params)
}

/// Newline separated list; an absent or blank value is an empty list
fn parse_list(raw: Option<&String>) -> Vec<String> {
    match raw.map(|s| s.trim()) {
        None | Some("") => Vec::new(),
        Some(trimmed) => trimmed.split('\n').map(str::to_string).collect(),
    }
}

fn validate_role_names(role_names: &[String]) -> Result<(), ConfigError> {
    for full_name in role_names {
        let valid = matches!(
            full_name.split_once('/'),
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/')
        );
        if !valid {
            return Err(ConfigError::RoleNameIllegal(full_name.clone()));
        }
    }
    Ok(())
}

/// Parse a duration string such as `300ms`, `1m` or `1h30m`
///
/// Accepted units are ns, us (µs, μs), ms, s, m and h. A bare `0` is allowed;
/// any other number needs a unit. Negative durations are rejected.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid duration {:?}", raw);

    let mut s = raw.strip_prefix('+').unwrap_or(raw);
    if s.starts_with('-') {
        return Err(format!("negative duration {:?}", raw));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, rest) = s.split_at(int_len);
        let (frac_part, rest) = match rest.strip_prefix('.') {
            Some(after) => {
                let frac_len = after.bytes().take_while(u8::is_ascii_digit).count();
                after.split_at(frac_len)
            }
            None => ("", rest),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let (unit, rest) = rest.split_at(unit_len);
        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(format!("missing unit in duration {:?}", raw)),
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, raw)),
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(invalid)?;
        if !frac_part.is_empty() {
            // Digits beyond nanosecond resolution of the largest unit are noise
            let digits = &frac_part[..frac_part.len().min(18)];
            let frac: u128 = digits.parse().map_err(|_| invalid())?;
            nanos += frac * scale / 10u128.pow(digits.len() as u32);
        }

        total = total.checked_add(nanos).ok_or_else(invalid)?;
        if total > u64::MAX as u128 {
            return Err(invalid());
        }
        s = rest;
    }

    Ok(Duration::from_nanos(total as u64))
}
