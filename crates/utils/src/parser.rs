use std::time::Duration;

use clippy_utilities::OverflowArithmetic;
use thiserror::Error;

use crate::config::{LevelConfig, RetentionPolicyConfig, RotationConfig};

/// seconds per minute
const SECS_PER_MINUTE: u64 = 60;
/// seconds per hour
const SECS_PER_HOUR: u64 = 3600;
/// seconds per day, equals to 24 * 60 * 60 = 86400
const SECS_PER_DAY: u64 = 86400;

/// Config Parse Error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseError {
    /// Invalid number when parsing `Duration`
    #[error("Invalid Number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),
    /// Invalid time unit
    #[error("Invalid Unit: {0}")]
    InvalidUnit(String),
    /// Invalid values
    #[error("Invalid Value: {0}")]
    InvalidValue(String),
}

/// Config File Error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigFileError {
    /// Config file cannot be read
    #[error("Couldn't read config file {0}")]
    FileError(String, #[source] std::io::Error),
}

/// Parse `Duration` from string
/// # Errors
/// Return error when parsing the given string to `Duration` failed
#[inline]
pub fn parse_duration(s: &str) -> Result<Duration, ConfigParseError> {
    let s = s.to_lowercase();
    if s.ends_with("us") {
        if let Some(dur) = s.strip_suffix("us") {
            Ok(Duration::from_micros(dur.parse()?))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty. ({s})"
            )))
        }
    } else if s.ends_with("ms") {
        if let Some(dur) = s.strip_suffix("ms") {
            Ok(Duration::from_millis(dur.parse()?))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty. ({s})"
            )))
        }
    } else if s.ends_with('s') {
        if let Some(dur) = s.strip_suffix('s') {
            Ok(Duration::from_secs(dur.parse()?))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty. ({s})"
            )))
        }
    } else if s.ends_with('m') {
        if let Some(dur) = s.strip_suffix('m') {
            let minutes: u64 = dur.parse()?;
            Ok(Duration::from_secs(minutes.overflow_mul(SECS_PER_MINUTE)))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty. ({s})"
            )))
        }
    } else if s.ends_with('h') {
        if let Some(dur) = s.strip_suffix('h') {
            let hours: u64 = dur.parse()?;
            Ok(Duration::from_secs(hours.overflow_mul(SECS_PER_HOUR)))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty. ({s})"
            )))
        }
    } else if s.ends_with('d') {
        if let Some(dur) = s.strip_suffix('d') {
            let days: u64 = dur.parse()?;
            Ok(Duration::from_secs(days.overflow_mul(SECS_PER_DAY)))
        } else {
            Err(ConfigParseError::InvalidValue(format!(
                "the value of time should not be empty. ({s})"
            )))
        }
    } else {
        Err(ConfigParseError::InvalidUnit(format!(
            "the unit of time should be one of 'us', 'ms', 's', 'm', 'h' or 'd' ({s})"
        )))
    }
}

/// Parse `LevelConfig` from string
/// # Errors
/// Return error when parsing the given string to `LevelConfig` failed
#[inline]
pub fn parse_log_level(s: &str) -> Result<LevelConfig, ConfigParseError> {
    match s {
        "trace" => Ok(LevelConfig::TRACE),
        "debug" => Ok(LevelConfig::DEBUG),
        "info" => Ok(LevelConfig::INFO),
        "warn" => Ok(LevelConfig::WARN),
        "error" => Ok(LevelConfig::ERROR),
        _ => Err(ConfigParseError::InvalidValue(format!(
            "the log level should be one of 'trace', 'debug', 'info', 'warn' or 'error' ({s})"
        ))),
    }
}

/// Parse `RotationConfig` from string
/// # Errors
/// Return error when parsing the given string to `RotationConfig` failed
#[inline]
pub fn parse_rotation(s: &str) -> Result<RotationConfig, ConfigParseError> {
    match s {
        "hourly" => Ok(RotationConfig::Hourly),
        "daily" => Ok(RotationConfig::Daily),
        "never" => Ok(RotationConfig::Never),
        _ => Err(ConfigParseError::InvalidValue(format!(
            "the rotation config should be one of 'hourly', 'daily' or 'never' ({s})"
        ))),
    }
}

/// Parse `RetentionPolicyConfig` from string
/// # Errors
/// Return error when parsing the given string to `RetentionPolicyConfig` failed
#[inline]
pub fn parse_retention_policy(s: &str) -> Result<RetentionPolicyConfig, ConfigParseError> {
    match s {
        "Exponential" => Ok(RetentionPolicyConfig::Exponential),
        "LimitBased" => Ok(RetentionPolicyConfig::LimitBased),
        _ => Err(ConfigParseError::InvalidValue(format!(
            "the garbage collection policy should be one of 'Exponential' or 'LimitBased' ({s})"
        ))),
    }
}

/// Parse expected member names from a string like "node1,node2,node3"
/// # Errors
/// Return error when the list contains an empty name
#[inline]
pub fn parse_expected_members(s: &str) -> Result<Vec<String>, ConfigParseError> {
    let names: Vec<String> = s.split(',').map(str::to_owned).collect();
    if names.iter().any(String::is_empty) {
        return Err(ConfigParseError::InvalidValue(format!(
            "expected member names should not be empty ({s})"
        )));
    }
    Ok(names)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_duration() {
        let values = [
            ("5us", Duration::from_micros(5)),
            ("3ms", Duration::from_millis(3)),
            ("10s", Duration::from_secs(10)),
            ("2m", Duration::from_secs(120)),
            ("12h", Duration::from_secs(43200)),
            ("30d", Duration::from_secs(2_592_000)),
        ];
        for (s, expected) in values {
            assert_eq!(parse_duration(s).unwrap(), expected);
        }
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_retention_policy() {
        assert_eq!(
            parse_retention_policy("Exponential").unwrap(),
            RetentionPolicyConfig::Exponential
        );
        assert_eq!(
            parse_retention_policy("LimitBased").unwrap(),
            RetentionPolicyConfig::LimitBased
        );
        assert!(parse_retention_policy("KeepEverything").is_err());
        assert!(parse_retention_policy("limitbased").is_err());
    }

    #[test]
    fn test_parse_expected_members() {
        assert_eq!(
            parse_expected_members("node1,node2,node3").unwrap(),
            vec!["node1", "node2", "node3"]
        );
        assert!(parse_expected_members("node1,,node3").is_err());
        assert!(parse_expected_members("").is_err());
    }
}
