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

//! Implementation of the [`DomainPattern`] type.

use std::fmt;
use std::str::FromStr;

use super::PatternError;
use crate::name::Name;

/// A pattern in an allow or deny list.
///
/// Two forms are accepted:
///
/// * `example.com` matches `example.com` itself and every name below
///   it, such as `www.example.com` and `a.b.example.com`.
/// * `*.example.com` matches only the names strictly below
///   `example.com`, not `example.com` itself.
///
/// Matching is by whole labels and ignores ASCII case, so
/// `example.com` does not match `badexample.com`. A trailing dot is
/// optional in either form.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum DomainPattern {
    Subtree(Name),
    Subdomains(Name),
}

impl DomainPattern {
    /// Returns whether `name` matches this pattern.
    pub fn matches(&self, name: &Name) -> bool {
        match self {
            Self::Subtree(base) => name.eq_or_subdomain_of(base),
            Self::Subdomains(base) => name.is_subdomain_of(base),
        }
    }
}

impl FromStr for DomainPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, make): (&str, fn(Name) -> Self) = match s.strip_prefix("*.") {
            Some(rest) => (rest, Self::Subdomains),
            None => (s, Self::Subtree),
        };
        let name: Name = base.parse().map_err(|source| PatternError::InvalidName {
            pattern: s.to_owned(),
            source,
        })?;
        if name.is_root() {
            Err(PatternError::Root)
        } else if !name.is_host_name() {
            Err(PatternError::NotHostName {
                pattern: s.to_owned(),
            })
        } else {
            Ok(make(name))
        }
    }
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Subtree(base) => base.fmt(f),
            Self::Subdomains(base) => write!(f, "*.{}", base),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
