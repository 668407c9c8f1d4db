use time::{Month, OffsetDateTime};

use crate::payload::IdentityFragment;
use crate::validator::GRAD_YEAR_DIGITS;

/// Caller-supplied values, taking precedence over anything decoded from the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides<'a> {
    pub grade: Option<&'a str>,
    pub grad_year: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFields {
    pub grade: String,
    pub grad_year: String,
}

/// Fills in grade and graduation year from whatever partial data a scan carries.
#[derive(Debug, Clone, Copy)]
pub struct FieldResolver {
    rollover: Month,
}

impl Default for FieldResolver {
    fn default() -> Self {
        FieldResolver {
            rollover: Month::July,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_year(value: &str) -> bool {
    value.len() == GRAD_YEAR_DIGITS && value.bytes().all(|b| b.is_ascii_digit())
}

fn year_prefix(identifier: &str) -> Option<&str> {
    let prefix = identifier.get(..GRAD_YEAR_DIGITS)?;
    prefix.bytes().all(|b| b.is_ascii_digit()).then_some(prefix)
}

impl FieldResolver {
    /// `rollover_month` is the first month (1-12) counted in the next school year.
    pub fn new(rollover_month: u8) -> Result<Self, time::error::ComponentRange> {
        Ok(FieldResolver {
            rollover: Month::try_from(rollover_month)?,
        })
    }

    /// Calendar year in which the current school year ends.
    pub fn school_year_end(&self, now: OffsetDateTime) -> i32 {
        if u8::from(now.month()) < u8::from(self.rollover) {
            now.year()
        } else {
            now.year() + 1
        }
    }

    pub fn resolve(
        &self,
        fragment: &IdentityFragment,
        overrides: Overrides<'_>,
        now: OffsetDateTime,
    ) -> ResolvedFields {
        let mut grad_year = non_empty(overrides.grad_year)
            .or_else(|| non_empty(fragment.grad_year.as_deref()))
            .map(str::to_string);
        let mut grade = non_empty(overrides.grade)
            .or_else(|| non_empty(fragment.grade.as_deref()))
            .map(str::to_string);

        if grad_year.is_none() {
            grad_year = year_prefix(&fragment.identifier).map(str::to_string);
        }

        if grade.is_none() {
            grade = grad_year
                .as_deref()
                .filter(|year| is_year(year))
                .and_then(|year| year.parse::<i32>().ok())
                .map(|year| 12 - (year - self.school_year_end(now)))
                .filter(|g| (9..=12).contains(g))
                .map(|g| g.to_string());
        }

        ResolvedFields {
            grade: grade.unwrap_or_default(),
            grad_year: grad_year.unwrap_or_default(),
        }
    }
}
