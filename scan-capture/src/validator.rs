use std::error::Error;
use std::fmt::Display;

use regex::Regex;

/// Institutional ids: the graduation year's leading "20", then five digits.
pub const DEFAULT_ID_PATTERN: &str = r"^20\d{5}$";

/// Number of leading identifier digits that encode the graduation year.
pub const GRAD_YEAR_DIGITS: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub enum InvalidIdReason {
    Empty,
    Format,
}

impl InvalidIdReason {
    pub fn reason(&self) -> &str {
        match *self {
            Self::Empty => "missing id",
            Self::Format => "invalid id format",
        }
    }
}

impl Display for InvalidIdReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

impl Error for InvalidIdReason {}

/// The identifier format contract. A single instance is shared by the payload
/// parser's identifier-only detection and by both ingestion paths.
#[derive(Clone, Debug)]
pub struct IdentifierFormat {
    pattern: Regex,
}

impl IdentifierFormat {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(IdentifierFormat {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn check(&self, identifier: &str) -> Result<(), InvalidIdReason> {
        if identifier.is_empty() {
            return Err(InvalidIdReason::Empty);
        }

        if !self.pattern.is_match(identifier) {
            return Err(InvalidIdReason::Format);
        }

        Ok(())
    }

    pub fn validate(&self, identifier: &str) -> bool {
        self.check(identifier).is_ok()
    }
}

impl Default for IdentifierFormat {
    fn default() -> Self {
        IdentifierFormat::new(DEFAULT_ID_PATTERN).expect("default id pattern must compile")
    }
}
