//! # Column Specifiers
//!
//! Legacy callers name columns as `family` or `family:qualifier` byte
//! strings. This module splits them into a (family, qualifier) pair.
//!
//! | Input        | Family | Qualifier           |
//! |--------------|--------|---------------------|
//! | `cf`         | `cf`   | absent              |
//! | `cf:`        | `cf`   | present, empty      |
//! | `cf:name`    | `cf`   | present, `name`     |
//! | `cf::`       | error (more than one separator) |
//! | `:name`      | error (empty family)            |

use std::fmt;

use crate::error::{HbrError, HbrResult};

/// Separator between family and qualifier.
pub const COLUMN_SEPARATOR: u8 = b':';

/// A parsed column specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec {
    /// Column family name.
    pub family: String,
    /// Qualifier bytes; `None` when the specifier named only a family.
    pub qualifier: Option<Vec<u8>>,
}

impl ColumnSpec {
    /// Parses one specifier.
    ///
    /// # Errors
    /// Returns `HbrError::MalformedColumn` on a repeated separator, an empty
    /// or non-UTF-8 family, or a missing qualifier when `require_qualifier`
    /// is set.
    pub fn parse(column: &[u8], require_qualifier: bool) -> HbrResult<Self> {
        let mut parts = column.splitn(3, |&b| b == COLUMN_SEPARATOR);
        let family = parts.next().unwrap_or_default();
        let qualifier = parts.next();
        if parts.next().is_some() {
            return Err(HbrError::malformed_column(
                column,
                "column contains the separator more than once",
            ));
        }

        if family.is_empty() {
            return Err(HbrError::malformed_column(column, "column family is empty"));
        }
        let family = std::str::from_utf8(family)
            .map_err(|_| HbrError::malformed_column(column, "column family is not UTF-8"))?;

        if qualifier.is_none() && require_qualifier {
            return Err(HbrError::malformed_column(
                column,
                "column does not contain a qualifier",
            ));
        }

        Ok(ColumnSpec {
            family: family.to_string(),
            qualifier: qualifier.map(<[u8]>::to_vec),
        })
    }

    /// True when this names a whole family (`fam` or `fam:`).
    pub fn is_family(&self) -> bool {
        self.qualifier.as_ref().map_or(true, Vec::is_empty)
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}:{}", self.family, String::from_utf8_lossy(qualifier)),
            None => write!(f, "{}", self.family),
        }
    }
}

/// Parses every specifier, failing on the first malformed one.
pub fn parse_columns<I, C>(columns: I, require_qualifier: bool) -> HbrResult<Vec<ColumnSpec>>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    columns
        .into_iter()
        .map(|column| ColumnSpec::parse(column.as_ref(), require_qualifier))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_family() {
        let spec = ColumnSpec::parse(b"cf", false).unwrap();
        assert_eq!(spec.family, "cf");
        assert_eq!(spec.qualifier, None);
        assert!(spec.is_family());
    }

    #[test]
    fn trailing_separator_is_empty_qualifier() {
        let spec = ColumnSpec::parse(b"cf:", false).unwrap();
        assert_eq!(spec.family, "cf");
        assert_eq!(spec.qualifier, Some(Vec::new()));
        assert!(spec.is_family());

        // An explicit empty qualifier satisfies require_qualifier.
        assert!(ColumnSpec::parse(b"cf:", true).is_ok());
    }

    #[test]
    fn family_and_qualifier() {
        let spec = ColumnSpec::parse(b"cf:name", true).unwrap();
        assert_eq!(spec.family, "cf");
        assert_eq!(spec.qualifier.as_deref(), Some(&b"name"[..]));
        assert!(!spec.is_family());
        assert_eq!(spec.to_string(), "cf:name");
    }

    #[test]
    fn double_separator_rejected() {
        for column in [&b"cf::"[..], b"cf:a:b", b"::"] {
            assert!(matches!(
                ColumnSpec::parse(column, false),
                Err(HbrError::MalformedColumn { .. })
            ));
        }
    }

    #[test]
    fn require_qualifier_rejects_bare_family() {
        let err = ColumnSpec::parse(b"cf", true).unwrap_err();
        assert!(matches!(err, HbrError::MalformedColumn { reason, .. } if reason.contains("qualifier")));
    }

    #[test]
    fn empty_family_rejected() {
        assert!(ColumnSpec::parse(b":q", false).is_err());
        assert!(ColumnSpec::parse(b"", false).is_err());
    }

    #[test]
    fn binary_qualifier_kept_verbatim() {
        let spec = ColumnSpec::parse(b"cf:\x00\xff", true).unwrap();
        assert_eq!(spec.qualifier, Some(vec![0x00, 0xff]));
    }

    #[test]
    fn parse_columns_stops_at_first_error() {
        let parsed = parse_columns([&b"a:1"[..], b"b"], false).unwrap();
        assert_eq!(parsed.len(), 2);

        assert!(parse_columns([&b"a:1"[..], b"b::"], false).is_err());
        assert!(parse_columns([&b"a:1"[..], b"b"], true).is_err());
    }
}
