//! Validated version strings and patch suffixes.

use serde::{Deserialize, Serialize};

/// Errors raised when an upstream string cannot be used in an artifact name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The version string was empty.
    #[error("empty version")]
    EmptyVersion,

    /// The version does not start with a digit (Debian requires it).
    #[error("version '{0}' must start with a digit")]
    LeadingNonDigit(String),

    /// The patch suffix was empty.
    #[error("empty patch suffix")]
    EmptySuffix,

    /// A character outside `[A-Za-z0-9.+~]` was found.
    #[error("invalid character '{ch}' in '{value}'")]
    InvalidChar {
        /// The offending string.
        value: String,
        /// The first rejected character.
        ch: char,
    },
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~')
}

fn check_chars(s: &str) -> Result<(), NameError> {
    match s.chars().find(|c| !is_name_char(*c)) {
        Some(ch) => Err(NameError::InvalidChar {
            value: s.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

/// An upstream version identifier (e.g. `6.0.27`).
///
/// Restricted to `[A-Za-z0-9.+~]` with a leading digit. Hyphens and
/// underscores are excluded because they delimit the patch suffix and the
/// fields of an [`ArtifactName`](crate::ArtifactName).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Validate and wrap an upstream version string.
    ///
    /// # Errors
    ///
    /// Returns a [`NameError`] if `s` is empty, does not start with a digit,
    /// or contains a character outside `[A-Za-z0-9.+~]`.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        let first = s.chars().next().ok_or(NameError::EmptyVersion)?;
        if !first.is_ascii_digit() {
            return Err(NameError::LeadingNonDigit(s.to_string()));
        }
        check_chars(s)?;
        Ok(Self(s.to_string()))
    }

    /// Return the version as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Version {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = NameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.0
    }
}

/// Packaging revision appended to a version (`6.0.27-p1`).
///
/// Used when a package has to be rebuilt for an unchanged upstream version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatchSuffix(String);

impl PatchSuffix {
    /// Validate and wrap a patch suffix.
    ///
    /// # Errors
    ///
    /// Returns a [`NameError`] if `s` is empty or contains a character
    /// outside `[A-Za-z0-9.+~]`.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        if s.is_empty() {
            return Err(NameError::EmptySuffix);
        }
        check_chars(s)?;
        Ok(Self(s.to_string()))
    }

    /// Return the suffix as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PatchSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PatchSuffix {
    type Error = NameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PatchSuffix> for String {
    fn from(p: PatchSuffix) -> Self {
        p.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_release_versions() {
        assert!(Version::parse("6.0.27").is_ok());
        assert!(Version::parse("7.0+ds1").is_ok());
        assert!(Version::parse("7.0~rc1").is_ok());
    }

    #[test]
    fn rejects_delimiters() {
        assert_eq!(
            Version::parse("7.0.0-beta.5"),
            Err(NameError::InvalidChar {
                value: "7.0.0-beta.5".to_string(),
                ch: '-'
            })
        );
        assert!(Version::parse("6_0").is_err());
        assert!(Version::parse("").is_err());
        assert!(Version::parse("v6.0").is_err());
    }

    #[test]
    fn suffix_rules() {
        assert!(PatchSuffix::parse("p1").is_ok());
        assert_eq!(PatchSuffix::parse(""), Err(NameError::EmptySuffix));
        assert!(PatchSuffix::parse("p-1").is_err());
    }
}
