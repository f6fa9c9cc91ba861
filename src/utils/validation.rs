use crate::utils::error::{EuiccError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// ICCID：18 到 20 位數字，部分卡片會補一個 F
const ICCID_PATTERN: &str = r"^[0-9]{18,20}F?$";

pub fn validate_iccid(field_name: &str, iccid: &str) -> Result<()> {
    let re = Regex::new(ICCID_PATTERN).map_err(|e| EuiccError::ValidationError {
        message: format!("Invalid ICCID pattern: {}", e),
    })?;

    if !re.is_match(iccid) {
        return Err(EuiccError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: iccid.to_string(),
            reason: "ICCID must be 18-20 digits, optionally followed by 'F'".to_string(),
        });
    }
    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: u64, min_value: u64) -> Result<()> {
    if value < min_value {
        return Err(EuiccError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EuiccError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(EuiccError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

pub fn validate_unique<T, I>(field_name: &str, values: I) -> Result<()>
where
    T: Eq + Hash + Display,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    for value in values {
        if seen.contains(&value) {
            return Err(EuiccError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: value.to_string(),
                reason: "Duplicate value".to_string(),
            });
        }
        seen.insert(value);
    }
    Ok(())
}
