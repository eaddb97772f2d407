//! Integer values written as decimal or `0x` hexadecimal
//!
//! USB ids are usually quoted in hex (`"0x1038"`), so config files and the
//! command line accept either form.

use serde::de::{Deserializer, Error as _};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NumberError {
    #[error("invalid number '{0}'")]
    Invalid(String),

    #[error("'{0}' is out of range")]
    OutOfRange(String),
}

/// Parse `"4152"`, `"0x1038"` or `"0X1038"`
pub fn parse_int<T: TryFrom<u64>>(text: &str) -> Result<T, NumberError> {
    let trimmed = text.trim();
    let value = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    }
    .map_err(|_| NumberError::Invalid(text.to_string()))?;

    T::try_from(value).map_err(|_| NumberError::OutOfRange(text.to_string()))
}

/// clap value parser for `u16` arguments
pub fn parse_u16(text: &str) -> Result<u16, NumberError> {
    parse_int(text)
}

/// clap value parser for `u8` arguments
pub fn parse_u8(text: &str) -> Result<u8, NumberError> {
    parse_int(text)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Number(u64),
    Text(String),
}

/// serde `deserialize_with` for integer fields accepting numbers or strings
pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    match RawNumber::deserialize(deserializer)? {
        RawNumber::Number(n) => {
            T::try_from(n).map_err(|_| D::Error::custom(NumberError::OutOfRange(n.to_string())))
        }
        RawNumber::Text(text) => parse_int(&text).map_err(D::Error::custom),
    }
}
