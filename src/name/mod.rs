// Copyright 2024 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implementation of data structures related to domain names.

use std::fmt;
use std::str::FromStr;

mod error;
mod label;
pub use error::Error;
pub use label::Label;

use label::LabelBuilder;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// An absolute domain name.
///
/// A `Name` stores its non-root labels from left to right; the root
/// label is implied. `Name`s are normally constructed through the
/// [`FromStr`] implementation, which treats every name as fully
/// qualified whether or not it ends with a dot. Thus `example.com` and
/// `example.com.` parse to the same `Name`.
///
/// Comparison and hashing are ASCII-case-insensitive (see [`Label`]).
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Name {
    labels: Vec<Label>,
}

#[allow(clippy::len_without_is_empty)] // We have is_root().
impl Name {
    /// Returns the DNS root, `.`.
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    /// Returns whether the `Name` is the DNS root `.`.
    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns whether every label of the `Name` is a valid host-name
    /// label (see [`Label::is_host_label`]). The root is not a host
    /// name.
    pub fn is_host_name(&self) -> bool {
        !self.is_root() && self.labels.iter().all(Label::is_host_label)
    }

    /// Returns an iterator over the non-root labels of this `Name`,
    /// from left to right.
    pub fn labels(&self) -> std::slice::Iter<'_, Label> {
        self.labels.iter()
    }

    /// Returns the number of non-root labels in this `Name`.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns whether this `Name` is equal to or a subdomain of
    /// `other`.
    pub fn eq_or_subdomain_of(&self, other: &Name) -> bool {
        self.len() >= other.len()
            && self
                .labels()
                .rev()
                .zip(other.labels().rev())
                .all(|(a, b)| a == b)
    }

    /// Returns whether this `Name` is a proper subdomain of `other`.
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        self.len() > other.len() && self.eq_or_subdomain_of(other)
    }

    /// Returns this `Name` as an owner name relative to `zone`, in the
    /// textual form used by DNS provider APIs: the labels that precede
    /// the zone apex joined with dots, or `@` if the `Name` is the apex
    /// itself. Returns `None` if the `Name` is not within `zone`.
    pub fn relative_to(&self, zone: &Name) -> Option<String> {
        if !self.eq_or_subdomain_of(zone) {
            None
        } else if self.len() == zone.len() {
            Some("@".to_owned())
        } else {
            let prefix = &self.labels[..self.len() - zone.len()];
            Some(
                prefix
                    .iter()
                    .map(Label::to_string)
                    .collect::<Vec<_>>()
                    .join("."),
            )
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels() {
            write!(f, "{}.", label)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

////////////////////////////////////////////////////////////////////////
// PARSING OF NAMES FROM RUST STRINGS                                 //
////////////////////////////////////////////////////////////////////////

/// Allows for conversion of a Rust [`str`] into a [`Name`]. The passed
/// string must be strictly ASCII. Escape sequences as defined by
/// [RFC 4343 § 2.1] are supported. A single trailing dot is optional.
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::StrEmpty);
        } else if s == "." {
            return Ok(Self::root());
        }

        let mut labels = Vec::new();
        let mut builder = LabelBuilder::default();
        let mut wire_len = 1;
        let mut remaining_octets: &[u8] = s.as_ref();

        // NOTE: to check that the string is ASCII, it suffices to check
        // that each octet is ASCII as we go, since all multi-byte
        // characters start with an octet that is not ASCII.
        while let Some(&octet) = remaining_octets.first() {
            if octet == b'\\' {
                let (value, consumed) = parse_escape(&remaining_octets[1..])?;
                builder.try_push(value)?;
                remaining_octets = &remaining_octets[consumed + 1..];
            } else if octet == b'.' {
                if builder.is_empty() {
                    return Err(Error::NullNonTerminal);
                }
                finish_label(&mut builder, &mut labels, &mut wire_len)?;
                remaining_octets = &remaining_octets[1..];
            } else if !octet.is_ascii() {
                return Err(Error::StrNotAscii);
            } else {
                builder.try_push(octet)?;
                remaining_octets = &remaining_octets[1..];
            }
        }

        // Without a trailing dot, the final label is still pending.
        if !builder.is_empty() {
            finish_label(&mut builder, &mut labels, &mut wire_len)?;
        }
        Ok(Self { labels })
    }
}

/// Moves the label accumulated in `builder` onto `labels`, enforcing
/// the limit on the name's on-the-wire length.
fn finish_label(
    builder: &mut LabelBuilder,
    labels: &mut Vec<Label>,
    wire_len: &mut usize,
) -> Result<(), Error> {
    let label = builder.take();
    *wire_len += label.len() + 1;
    if *wire_len > MAX_WIRE_LEN {
        return Err(Error::NameTooLong);
    }
    labels.push(label);
    Ok(())
}

/// Parses an escape sequence. We expect `remaining_octets` to start
/// with the octet immediately *after* the backslash that introduces the
/// escape sequence.
fn parse_escape(remaining_octets: &[u8]) -> Result<(u8, usize), Error> {
    match remaining_octets {
        [] => Err(Error::InvalidEscape),
        [first, ..] if first.is_ascii_digit() => {
            let digits = remaining_octets.get(..3).ok_or(Error::InvalidEscape)?;
            if !digits.iter().all(u8::is_ascii_digit) {
                return Err(Error::InvalidEscape);
            }
            let value = digits
                .iter()
                .fold(0usize, |acc, d| 10 * acc + (d - b'0') as usize);
            u8::try_from(value)
                .map(|v| (v, 3))
                .map_err(|_| Error::InvalidEscape)
        }
        [first, ..] => Ok((*first, 1)),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn root_is_root() {
        assert!(Name::root().is_root());
        assert!(name(".").is_root());
        assert_eq!(Name::root().to_string(), ".");
    }

    #[test]
    fn trailing_dot_is_optional() {
        assert_eq!(name("example.com"), name("example.com."));
        assert_eq!(name("example.com").to_string(), "example.com.");
    }

    #[test]
    fn comparison_is_case_insensitive() {
        assert_eq!(name("Example.COM."), name("example.com."));
    }

    #[test]
    fn eq_or_subdomain_of_works() {
        let subdomain = name("subdomain.example.test.");
        let domain = name("example.test.");
        let root = Name::root();
        assert!(subdomain.eq_or_subdomain_of(&subdomain));
        assert!(subdomain.eq_or_subdomain_of(&domain));
        assert!(subdomain.eq_or_subdomain_of(&root));
        assert!(!domain.eq_or_subdomain_of(&subdomain));
        assert!(!root.eq_or_subdomain_of(&domain));

        // Suffix matching is by label, not by character.
        assert!(!name("badexample.test.").eq_or_subdomain_of(&domain));
        assert!(!domain.eq_or_subdomain_of(&name("other.test.")));
    }

    #[test]
    fn is_subdomain_of_is_strict() {
        let domain = name("example.test.");
        assert!(name("a.example.test.").is_subdomain_of(&domain));
        assert!(!domain.is_subdomain_of(&domain));
    }

    #[test]
    fn relative_to_works() {
        let zone = name("example.com.");
        assert_eq!(
            name("_acme-challenge.foo.example.com.").relative_to(&zone),
            Some("_acme-challenge.foo".to_owned()),
        );
        assert_eq!(zone.relative_to(&zone), Some("@".to_owned()));
        assert_eq!(name("example.org.").relative_to(&zone), None);
    }

    #[test]
    fn is_host_name_works() {
        assert!(name("_acme-challenge.www.example.com").is_host_name());
        assert!(!name("*.example.com").is_host_name());
        assert!(!name("exa\\032mple.com").is_host_name());
        assert!(!Name::root().is_host_name());
    }

    #[test]
    fn fromstr_rejects_empty() {
        assert_eq!("".parse::<Name>(), Err(Error::StrEmpty));
    }

    #[test]
    fn fromstr_rejects_non_ascii() {
        assert_eq!("✈.aero.".parse::<Name>(), Err(Error::StrNotAscii));
    }

    #[test]
    fn fromstr_rejects_long_label() {
        assert_eq!(
            "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx."
                .parse::<Name>(),
            Err(Error::LabelTooLong)
        );
    }

    #[test]
    fn fromstr_rejects_long_name() {
        assert_eq!(
            "x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.\
             x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.\
             x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.\
             x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x.x."
                .parse::<Name>(),
            Err(Error::NameTooLong)
        );
    }

    #[test]
    fn fromstr_rejects_empty_labels() {
        assert_eq!("a.b..c.".parse::<Name>(), Err(Error::NullNonTerminal));
        assert_eq!(".example.com".parse::<Name>(), Err(Error::NullNonTerminal));
        assert_eq!("example.com..".parse::<Name>(), Err(Error::NullNonTerminal));
    }

    #[test]
    fn fromstr_escaping_works() {
        let escaped = name("a\\.b.c\\\\.\\065.");
        assert_eq!(escaped.len(), 3);
        assert_eq!(escaped.labels().next().unwrap().octets(), b"a.b");
        assert_eq!(escaped.to_string(), "a\\.b.c\\\\.A.");
    }

    #[test]
    fn fromstr_rejects_invalid_escapes() {
        assert_eq!("\\00".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("\\00x.".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("\\256.".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("abc\\".parse::<Name>(), Err(Error::InvalidEscape));
    }
}
