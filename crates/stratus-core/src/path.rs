//! Property paths.
//!
//! A [`PropertyPath`] addresses one slot inside a resource's nested property
//! tree: `a.b[0].c["key"]` is the field `a`, then field `b`, then list index
//! `0`, then field `c`, then map key `key`. Paths are parsed once and walked
//! as typed segments; the string form round-trips through `Display`.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PropertyError;

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Dotted field access: `.name`
    Field(String),
    /// List index access: `[0]`
    Index(usize),
    /// Quoted map key access: `["key"]`
    Key(String),
}

/// A parsed property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PropertyPath(pub Vec<PathSegment>);

impl PropertyPath {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// The leading field name, when the path starts with one.
    pub fn root_field(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Field(f)) => Some(f),
            _ => None,
        }
    }

    /// Extends this path with another segment, returning a new path.
    pub fn join(&self, segment: PathSegment) -> PropertyPath {
        let mut segments = self.0.clone();
        segments.push(segment);
        PropertyPath(segments)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                PathSegment::Key(key) => write!(f, "[\"{key}\"]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for PropertyPath {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PropertyError::InvalidPath {
            path: s.to_string(),
        };
        let mut segments = Vec::new();
        let mut chars = s.chars().peekable();
        let mut field = String::new();
        let mut expect_field = true;

        let flush =
            |field: &mut String, segments: &mut Vec<PathSegment>| -> Result<(), PropertyError> {
                if field.is_empty() {
                    return Err(PropertyError::InvalidPath {
                        path: s.to_string(),
                    });
                }
                segments.push(PathSegment::Field(std::mem::take(field)));
                Ok(())
            };

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    flush(&mut field, &mut segments)?;
                    expect_field = true;
                }
                '[' => {
                    if !field.is_empty() {
                        flush(&mut field, &mut segments)?;
                    } else if segments.is_empty() || expect_field {
                        return Err(invalid());
                    }
                    expect_field = false;
                    match chars.peek() {
                        Some('"') => {
                            chars.next();
                            let mut key = String::new();
                            loop {
                                match chars.next() {
                                    Some('"') => break,
                                    Some(k) => key.push(k),
                                    None => return Err(invalid()),
                                }
                            }
                            if chars.next() != Some(']') {
                                return Err(invalid());
                            }
                            segments.push(PathSegment::Key(key));
                        }
                        _ => {
                            let mut digits = String::new();
                            loop {
                                match chars.next() {
                                    Some(']') => break,
                                    Some(d) if d.is_ascii_digit() => digits.push(d),
                                    _ => return Err(invalid()),
                                }
                            }
                            let idx = digits.parse().map_err(|_| invalid())?;
                            segments.push(PathSegment::Index(idx));
                        }
                    }
                }
                _ => {
                    field.push(c);
                    expect_field = false;
                }
            }
        }
        if !field.is_empty() {
            flush(&mut field, &mut segments)?;
        } else if expect_field && !segments.is_empty() {
            // trailing dot
            return Err(invalid());
        }
        if segments.is_empty() {
            return Err(invalid());
        }
        Ok(PropertyPath(segments))
    }
}

impl Serialize for PropertyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PropertyPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_fields() {
        let path: PropertyPath = "a.b.c".parse().unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Field("a".into()),
                PathSegment::Field("b".into()),
                PathSegment::Field("c".into()),
            ]
        );
    }

    #[test]
    fn parses_indexes_and_keys() {
        let path: PropertyPath = "a.b[0].c[\"key\"]".parse().unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Field("a".into()),
                PathSegment::Field("b".into()),
                PathSegment::Index(0),
                PathSegment::Field("c".into()),
                PathSegment::Key("key".into()),
            ]
        );
    }

    #[test]
    fn display_roundtrip() {
        for raw in ["a.b[3].c", "EnvironmentVariables[\"DB_HOST\"]", "Subnets[1]"] {
            let path: PropertyPath = raw.parse().unwrap();
            assert_eq!(path.to_string(), raw);
        }
    }

    #[test]
    fn rejects_malformed() {
        for raw in ["", ".", "a..b", "a[", "a[1", "a[\"x\"", "[0]"] {
            assert!(raw.parse::<PropertyPath>().is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn root_field() {
        let path: PropertyPath = "Subnets[1]".parse().unwrap();
        assert_eq!(path.root_field(), Some("Subnets"));
    }
}
