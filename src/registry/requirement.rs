use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{PreviewError, Result};

/// Version of this crate, which converters may require as their host
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Accepted versions of the host or of another converter.
///
/// Versions compare component-wise over the length of the required version, so
/// `"0.7"` accepts every `0.7.x`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionRequirement {
    AtLeast(String),
    OneOf(Vec<String>),
    /// Inclusive on both ends
    Between(String, String),
}

impl VersionRequirement {
    pub fn matches(&self, current: &str) -> bool {
        let current = parse_version(current);
        match self {
            VersionRequirement::AtLeast(req) => compare_prefix(req, &current) != Ordering::Greater,
            VersionRequirement::OneOf(reqs) => reqs.iter().any(|req| compare_prefix(req, &current) == Ordering::Equal),
            VersionRequirement::Between(low, high) => {
                compare_prefix(low, &current) != Ordering::Greater
                    && compare_prefix(high, &current) != Ordering::Less
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            VersionRequirement::AtLeast(req) => format!("{} or higher", req),
            VersionRequirement::OneOf(reqs) => format!("one of {}", reqs.join(", ")),
            VersionRequirement::Between(low, high) => format!("between {} and {}", low, high),
        }
    }
}

/// A dependency a converter declares at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum Requirement {
    Host { version: VersionRequirement },
    Converter { id: String, version: VersionRequirement },
}

impl Requirement {
    /// Check against the host version and, for converter requirements, the version
    /// `lookup` reports for the named converter (`None` when it is not registered,
    /// `Some(None)` when it declares no version).
    pub fn check<F>(&self, converter: &str, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<Option<String>>,
    {
        match self {
            Requirement::Host { version } => {
                if version.matches(HOST_VERSION) {
                    Ok(())
                } else {
                    Err(PreviewError::Requirement(format!(
                        "{} converter requires docpreview {} but current is {}",
                        converter,
                        version.describe(),
                        HOST_VERSION
                    )))
                }
            }
            Requirement::Converter { id, version } => {
                let current = lookup(id).ok_or_else(|| {
                    PreviewError::Requirement(format!("{} converter requires the {} converter", converter, id))
                })?;
                let current = current.unwrap_or_else(|| "0".to_string());
                if version.matches(&current) {
                    Ok(())
                } else {
                    Err(PreviewError::Requirement(format!(
                        "{} converter requires the {} converter {} but current is {}",
                        converter,
                        id,
                        version.describe(),
                        current
                    )))
                }
            }
        }
    }
}

/// Numeric components of a version; non-numeric components count as 0
fn parse_version(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

/// Compare `requirement` with the same number of leading components of `current`
fn compare_prefix(requirement: &str, current: &[u64]) -> Ordering {
    let requirement = parse_version(requirement);
    let len = requirement.len().min(current.len());
    requirement.as_slice().cmp(&current[..len])
}
