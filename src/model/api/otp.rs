use std::fmt::Display;
use std::str::FromStr;

use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CODE_LENGTH: usize = 6;
const MIN_CODE: u32 = 100_000;
const MAX_CODE: u32 = 999_999;

/// A six-digit one-time-password code. Never starts with a zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(u32);

impl Code {
    /// Generate a code uniformly at random from the whole six-digit range.
    pub fn random() -> Self {
        let dist = Uniform::from(MIN_CODE..=MAX_CODE);
        Self(dist.sample(&mut rand::thread_rng()))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Display for Code {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("code must contain exactly {CODE_LENGTH} characters")]
    InvalidLength(usize),
    #[error("code must contain only digits, found '{0}'")]
    InvalidChar(char),
    #[error("code must not start with zero")]
    LeadingZero,
}

impl FromStr for Code {
    type Err = ParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let string = string.trim();
        let len = string.chars().count();
        if len != CODE_LENGTH {
            return Err(ParseError::InvalidLength(len));
        }
        if let Some(c) = string.chars().find(|c| !c.is_ascii_digit()) {
            return Err(ParseError::InvalidChar(c));
        }
        if string.starts_with('0') {
            return Err(ParseError::LeadingZero);
        }
        // Six ASCII digits always fit.
        let value = string
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidLength(len))?;
        Ok(Self(value))
    }
}

impl TryFrom<String> for Code {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_codes_stay_in_range() {
        for _ in 0..1000 {
            let code = Code::random();
            assert!((MIN_CODE..=MAX_CODE).contains(&code.value()));
            assert_eq!(CODE_LENGTH, code.to_string().len());
        }
    }

    #[test]
    fn parsing() {
        assert_eq!(Ok(Code(123456)), "123456".parse());
        assert_eq!(Ok(Code(987654)), " 987654 ".parse());
        assert_eq!(Err(ParseError::InvalidLength(5)), "12345".parse::<Code>());
        assert_eq!(Err(ParseError::InvalidLength(7)), "1234567".parse::<Code>());
        assert_eq!(Err(ParseError::InvalidChar('a')), "12a456".parse::<Code>());
        assert_eq!(Err(ParseError::LeadingZero), "012345".parse::<Code>());
    }
}
