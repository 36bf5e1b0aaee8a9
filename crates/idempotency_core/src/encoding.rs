//! Pure value conversions for transport-encoded inputs and environment
//! toggles. No coordination logic lives here.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("base64 decode failed: {message}")]
    Base64 { message: String },

    #[error("utf-8 decode failed: {message}")]
    Utf8 { message: String },

    #[error("invalid truth value {value:?}")]
    InvalidTruthValue { value: String },
}

pub fn base64_decode(value: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD.decode(value).map_err(|error| DecodeError::Base64 {
        message: error.to_string(),
    })
}

pub fn bytes_to_string(value: &[u8]) -> Result<String, DecodeError> {
    std::str::from_utf8(value)
        .map(str::to_string)
        .map_err(|error| DecodeError::Utf8 {
            message: error.to_string(),
        })
}

/// Convert a string representation of truth to a bool.
///
/// True values are `y`, `yes`, `t`, `true`, `on`, and `1`; false values are
/// `n`, `no`, `f`, `false`, `off`, and `0`. Anything else is a value error.
pub fn strtobool(value: &str) -> Result<bool, DecodeError> {
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        _ => Err(DecodeError::InvalidTruthValue {
            value: value.to_string(),
        }),
    }
}

/// Pick the explicit choice over the truthy environment value, if available.
pub fn resolve_truthy_env_var_choice(
    env: &str,
    choice: Option<bool>,
) -> Result<bool, DecodeError> {
    match choice {
        Some(choice) => Ok(choice),
        None => strtobool(env),
    }
}

/// Pick the explicit choice over the environment value, if available.
pub fn resolve_env_var_choice(env: Option<String>, choice: Option<String>) -> Option<String> {
    choice.or(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard_base64() {
        let decoded = base64_decode("aWRlbXBvdGVudA==").expect("input should decode");
        assert_eq!(decoded, b"idempotent");
    }

    #[test]
    fn invalid_base64_fails_fast() {
        let error = base64_decode("not base64!").expect_err("input should not decode");
        assert!(matches!(error, DecodeError::Base64 { .. }));
    }

    #[test]
    fn invalid_utf8_fails_fast() {
        let error = bytes_to_string(&[0xff, 0xfe]).expect_err("bytes should not decode");
        assert!(matches!(error, DecodeError::Utf8 { .. }));
    }

    #[test]
    fn truth_table_resolves_known_values() {
        assert!(strtobool("yes").expect("yes should parse"));
        assert!(strtobool("ON").expect("ON should parse"));
        assert!(!strtobool("0").expect("0 should parse"));
        assert!(!strtobool("No").expect("No should parse"));
    }

    #[test]
    fn unknown_truth_value_is_a_value_error() {
        let error = strtobool("maybe").expect_err("maybe should not parse");
        assert_eq!(
            error,
            DecodeError::InvalidTruthValue {
                value: "maybe".to_string()
            }
        );
    }

    #[test]
    fn explicit_choice_beats_truthy_env_value() {
        let resolved =
            resolve_truthy_env_var_choice("false", Some(true)).expect("choice should win");
        assert!(resolved);

        let from_env = resolve_truthy_env_var_choice("true", None).expect("env should parse");
        assert!(from_env);
    }

    #[test]
    fn explicit_choice_beats_env_value() {
        assert_eq!(
            resolve_env_var_choice(Some("from-env".to_string()), Some("explicit".to_string())),
            Some("explicit".to_string())
        );
        assert_eq!(
            resolve_env_var_choice(Some("from-env".to_string()), None),
            Some("from-env".to_string())
        );
        assert_eq!(resolve_env_var_choice(None, None), None);
    }
}
