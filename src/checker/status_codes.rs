use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

const VALID_CODES: RangeInclusive<u16> = 100..=599;

/// Set of accepted HTTP status codes, e.g. `200,202,300-399`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusCodes {
    ranges: Vec<RangeInclusive<u16>>,
}

impl Default for StatusCodes {
    fn default() -> Self {
        StatusCodes {
            ranges: vec![200..=200],
        }
    }
}

impl StatusCodes {
    pub fn contains(&self, code: u16) -> bool {
        self.ranges.iter().any(|range| range.contains(&code))
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum StatusCodesError {
    #[error("empty status code list")]
    Empty,
    #[error("invalid status code {0:?}")]
    InvalidCode(String),
    #[error("status code {0} out of range 100-599")]
    OutOfRange(u16),
    #[error("invalid status code range {0:?}")]
    InvalidRange(String),
}

impl FromStr for StatusCodes {
    type Err = StatusCodesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ranges = vec![];
        for item in s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
        {
            let range = match item.split_once('-') {
                Some((lo, hi)) => {
                    let (lo, hi) = (parse_code(lo)?, parse_code(hi)?);
                    if lo > hi {
                        return Err(StatusCodesError::InvalidRange(item.to_owned()));
                    }
                    lo..=hi
                }
                None => {
                    let code = parse_code(item)?;
                    code..=code
                }
            };
            ranges.push(range);
        }
        if ranges.is_empty() {
            return Err(StatusCodesError::Empty);
        }
        Ok(StatusCodes { ranges })
    }
}

fn parse_code(s: &str) -> Result<u16, StatusCodesError> {
    let code = s
        .trim()
        .parse::<u16>()
        .map_err(|_| StatusCodesError::InvalidCode(s.trim().to_owned()))?;
    if !VALID_CODES.contains(&code) {
        return Err(StatusCodesError::OutOfRange(code));
    }
    Ok(code)
}

impl fmt::Display for StatusCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .ranges
            .iter()
            .map(|range| {
                if range.start() == range.end() {
                    range.start().to_string()
                } else {
                    format!("{}-{}", range.start(), range.end())
                }
            })
            .collect();
        write!(f, "[{}]", items.join(","))
    }
}
