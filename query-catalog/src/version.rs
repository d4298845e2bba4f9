//! Server versions, and the ranges of them a query supports

use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[allow(clippy::unwrap_used)] // regex is a literal
static MARKED_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:opengauss|mogdb)\s+(\d+)\.(\d+)(?:\.(\d+))?").unwrap()
});

#[allow(clippy::unwrap_used)] // regex is a literal
static ANY_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not find a version number in '{0}'")]
pub struct VersionParseError(String);

/// Extract the semantic version from the string a server returns for `SELECT version()`.
///
/// An explicit `openGauss x.y.z` marker takes precedence, since openGauss also reports the
/// PostgreSQL version it was forked from. Otherwise the first `major.minor[.patch]` number is
/// used. A missing patch number is 0.
///
/// ```
/// use query_catalog::version::parse_server_version;
///
/// let v = parse_server_version("PostgreSQL 14.5 on x86_64-pc-linux-gnu").unwrap();
/// assert_eq!(v.to_string(), "14.5.0");
/// ```
pub fn parse_server_version(version_string: &str) -> Result<Version, VersionParseError> {
    let captures = MARKED_VERSION
        .captures(version_string)
        .or_else(|| ANY_VERSION.captures(version_string))
        .ok_or_else(|| VersionParseError(version_string.to_owned()))?;

    let part = |idx: usize| -> Result<u64, VersionParseError> {
        captures
            .get(idx)
            .map_or(Ok(0), |m| m.as_str().parse())
            .map_err(|_| VersionParseError(version_string.to_owned()))
    };

    Ok(Version::new(part(1)?, part(2)?, part(3)?))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version range '{range}': {reason}")]
pub struct VersionRangeError {
    range: String,
    reason: String,
}

/// A set of server versions a query supports.
///
/// Written as comparators separated by whitespace or commas, all of which must hold (eg
/// `>=9.6.0 <13.0.0`), with alternatives joined by `||`. A bare version means exactly that
/// version. The empty range accepts every version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    source: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// A range that accepts every version
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.is_empty() || self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Joins operators written apart from their version (`>= 9.6`) and makes bare versions exact,
/// then produces the comma separated form [`VersionReq`] expects.
fn normalize_comparators(alternative: &str) -> String {
    let mut comparators: Vec<String> = vec![];
    let mut pending_op = String::new();
    for token in alternative
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        if token.chars().all(|c| "<>=~^".contains(c)) {
            pending_op.push_str(token);
            continue;
        }
        let op = std::mem::take(&mut pending_op);
        if op.is_empty() && token.starts_with(|c: char| c.is_ascii_digit()) {
            comparators.push(format!("={token}"));
        } else {
            comparators.push(format!("{op}{token}"));
        }
    }
    comparators.join(", ")
}

impl FromStr for VersionRange {
    type Err = VersionRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim().to_owned();
        if source.is_empty() {
            return Ok(Self::any());
        }
        let alternatives = source
            .split("||")
            .map(|alternative| {
                VersionReq::parse(&normalize_comparators(alternative)).map_err(|e| {
                    VersionRangeError {
                        range: source.clone(),
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source,
            alternatives,
        })
    }
}

impl TryFrom<String> for VersionRange {
    type Error = VersionRangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(range: VersionRange) -> Self {
        range.source
    }
}

impl Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&self.source)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parse_versions() {
        assert_eq!(
            parse_server_version(
                "PostgreSQL 9.2.4 (openGauss 2.0.0 build 78689da9) compiled at 2021-03-31"
            )
            .unwrap(),
            v("2.0.0")
        );
        assert_eq!(
            parse_server_version("PostgreSQL 12.3 (Debian 12.3-1.pgdg100+1)").unwrap(),
            v("12.3.0")
        );
        assert_eq!(parse_server_version("8.0.33-0ubuntu0.22.04.2").unwrap(), v("8.0.33"));
        assert!(parse_server_version("unknown").is_err());
    }

    #[test]
    fn empty_range_matches_everything() {
        let range: VersionRange = "".parse().unwrap();
        assert!(range.matches(&v("0.0.0")));
        assert!(range.matches(&v("99.1.2")));
        assert_eq!(range.to_string(), "*");
    }

    #[test]
    fn blank_separated_comparators() {
        let range: VersionRange = ">=9.6.0 <13.0.0".parse().unwrap();
        assert!(range.matches(&v("9.6.0")));
        assert!(range.matches(&v("12.9.1")));
        assert!(!range.matches(&v("13.0.0")));
        assert!(!range.matches(&v("9.5.99")));
    }

    #[test]
    fn detached_operators_and_alternatives() {
        let range: VersionRange = ">= 10.0.0, < 11.0.0 || =2.0.0".parse().unwrap();
        assert!(range.matches(&v("10.4.0")));
        assert!(range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("2.0.1")));
    }

    #[test]
    fn bare_version_is_exact() {
        let range: VersionRange = "1.2.3".parse().unwrap();
        assert!(range.matches(&v("1.2.3")));
        assert!(!range.matches(&v("1.2.4")));
    }

    #[test]
    fn invalid_range() {
        assert!(">=banana".parse::<VersionRange>().is_err());
    }
}
