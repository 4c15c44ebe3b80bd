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

//! Implementation of the [`Label`] type.

use std::convert::TryFrom;
use std::fmt;
use std::hash::{Hash, Hasher};

use arrayvec::ArrayVec;

use super::{Error, MAX_LABEL_LEN};

/// A single, non-null label of a domain name.
///
/// In accordance with [RFC 1034 § 3.1] (clarified by RFC 4343),
/// comparisons and hashing are ASCII-case-insensitive, but case is
/// preserved in the internal representation.
///
/// [RFC 1034 § 3.1]: https://tools.ietf.org/html/rfc1034#section-3.1
#[derive(Clone)]
pub struct Label {
    octets: ArrayVec<u8, MAX_LABEL_LEN>,
}

#[allow(clippy::len_without_is_empty)] // Labels in a Name are never empty.
impl Label {
    /// Returns the number of octets in this `Label`.
    pub fn len(&self) -> usize {
        self.octets.len()
    }

    /// Returns the octets of this `Label`.
    pub fn octets(&self) -> &[u8] {
        &self.octets
    }

    /// Returns whether this `Label` may appear in a host name. We
    /// accept the letter-digit-hyphen syntax of [RFC 952] and
    /// [RFC 1123 § 2.1], and additionally allow underscores, which
    /// appear in service labels such as `_acme-challenge`.
    ///
    /// [RFC 952]: https://datatracker.ietf.org/doc/html/rfc952
    /// [RFC 1123 § 2.1]: https://datatracker.ietf.org/doc/html/rfc1123#section-2.1
    pub fn is_host_label(&self) -> bool {
        let octets = self.octets();
        !octets.is_empty()
            && octets[0] != b'-'
            && octets[octets.len() - 1] != b'-'
            && octets
                .iter()
                .all(|o| o.is_ascii_alphanumeric() || *o == b'-' || *o == b'_')
    }
}

impl TryFrom<&[u8]> for Label {
    type Error = Error;

    fn try_from(octets: &[u8]) -> Result<Self, Self::Error> {
        ArrayVec::try_from(octets)
            .map(|octets| Self { octets })
            .map_err(|_| Error::LabelTooLong)
    }
}

/// Builds up a [`Label`] one octet at a time during parsing.
#[derive(Default)]
pub(super) struct LabelBuilder {
    octets: ArrayVec<u8, MAX_LABEL_LEN>,
}

impl LabelBuilder {
    pub(super) fn try_push(&mut self, octet: u8) -> Result<(), Error> {
        self.octets.try_push(octet).map_err(|_| Error::LabelTooLong)
    }

    pub(super) fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    /// Takes the accumulated label, leaving the builder empty.
    pub(super) fn take(&mut self) -> Label {
        Label {
            octets: std::mem::take(&mut self.octets),
        }
    }
}

/// When a `Label` is displayed, periods, backslashes, and octets that
/// are not ASCII graphic characters are escaped in accordance with
/// RFC 1035 § 5.1 and RFC 4343 § 2.1.
impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for octet in self.octets() {
            if *octet == b'.' {
                f.write_str("\\.")?;
            } else if *octet == b'\\' {
                f.write_str("\\\\")?;
            } else if octet.is_ascii_graphic() {
                write!(f, "{}", *octet as char)?;
            } else {
                write!(f, "\\{:03}", *octet)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.octets().eq_ignore_ascii_case(other.octets())
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Hash in a case-insensitive manner to match PartialEq and Eq.
        state.write_usize(self.len());
        for octet in self.octets() {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn label(octets: &[u8]) -> Label {
        Label::try_from(octets).unwrap()
    }

    #[test]
    fn comparison_is_case_insensitive() {
        assert_eq!(label(b"Example"), label(b"eXAMPLE"));
        assert_ne!(label(b"example"), label(b"examples"));
    }

    #[test]
    fn hash_is_case_insensitive() {
        let set: HashSet<Label> = [label(b"EXAMPLE")].into_iter().collect();
        assert!(set.contains(&label(b"example")));
    }

    #[test]
    fn long_labels_are_rejected() {
        assert_eq!(Label::try_from(&[b'x'; 64][..]).err(), Some(Error::LabelTooLong));
        assert!(Label::try_from(&[b'x'; 63][..]).is_ok());
    }

    #[test]
    fn host_label_syntax_is_enforced() {
        assert!(label(b"www").is_host_label());
        assert!(label(b"_acme-challenge").is_host_label());
        assert!(label(b"x1-y2").is_host_label());
        assert!(!label(b"-leading").is_host_label());
        assert!(!label(b"trailing-").is_host_label());
        assert!(!label(b"*").is_host_label());
        assert!(!label(b"sp ace").is_host_label());
    }

    #[test]
    fn display_escapes_special_octets() {
        assert_eq!(label(b"a.b\\c\x07").to_string(), "a\\.b\\\\c\\007");
    }
}
