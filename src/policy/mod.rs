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

//! Per-client allow/deny policies over domain names.
//!
//! A [`DomainPolicy`] is compiled once from the raw pattern lists in a
//! client's configuration and is immutable afterward. Evaluation is a
//! pure function of the policy and the requested domain:
//!
//! 1. if the domain matches any denied pattern, it is not allowed;
//! 2. otherwise, if there are allowed patterns and the domain matches
//!    none of them, it is not allowed;
//! 3. otherwise, it is allowed.
//!
//! An empty allow list therefore places no restriction, and the deny
//! list always wins. See [`DomainPattern`] for the matching rules.

use std::fmt;

use crate::name::{self, Name};

mod pattern;
pub use pattern::DomainPattern;

////////////////////////////////////////////////////////////////////////
// DOMAIN POLICIES                                                    //
////////////////////////////////////////////////////////////////////////

/// A compiled allow/deny policy. See the [module
/// documentation](self) for the evaluation rules.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DomainPolicy {
    allowed: Vec<DomainPattern>,
    denied: Vec<DomainPattern>,
}

impl DomainPolicy {
    /// Compiles a policy from raw allow and deny lists. Fails on the
    /// first pattern that does not parse.
    pub fn new<A, D>(allowed: A, denied: D) -> Result<Self, PatternError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Ok(Self {
            allowed: compile(allowed)?,
            denied: compile(denied)?,
        })
    }

    /// Returns a policy that allows every valid host name.
    pub fn permit_all() -> Self {
        Self::default()
    }

    /// Returns the allowed patterns.
    pub fn allowed(&self) -> &[DomainPattern] {
        &self.allowed
    }

    /// Returns the denied patterns.
    pub fn denied(&self) -> &[DomainPattern] {
        &self.denied
    }

    /// Determines whether `domain` is allowed by this policy. The
    /// domain may be given with or without a trailing dot. Fails if
    /// `domain` is not a valid host name.
    pub fn is_allowed(&self, domain: &str) -> Result<bool, EvaluationError> {
        let name: Name = domain
            .parse()
            .map_err(|source| EvaluationError::Unparseable {
                domain: domain.to_owned(),
                source,
            })?;
        if !name.is_host_name() {
            return Err(EvaluationError::NotHostName {
                domain: domain.to_owned(),
            });
        }
        Ok(self.is_name_allowed(&name))
    }

    /// Determines whether the already-parsed `name` is allowed by this
    /// policy.
    pub fn is_name_allowed(&self, name: &Name) -> bool {
        if self.denied.iter().any(|p| p.matches(name)) {
            false
        } else {
            self.allowed.is_empty() || self.allowed.iter().any(|p| p.matches(name))
        }
    }
}

fn compile<I>(raw: I) -> Result<Vec<DomainPattern>, PatternError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    raw.into_iter().map(|s| s.as_ref().parse()).collect()
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error compiling a [`DomainPattern`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PatternError {
    /// The pattern is not a valid domain name.
    InvalidName {
        pattern: String,
        source: name::Error,
    },

    /// The pattern contains something other than host-name labels
    /// (apart from a leading `*.`).
    NotHostName { pattern: String },

    /// The pattern is the DNS root, which would match everything.
    Root,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidName { pattern, .. } => {
                write!(f, "domain pattern {:?} is not a valid domain name", pattern)
            }
            Self::NotHostName { pattern } => {
                write!(f, "domain pattern {:?} is not a valid host name", pattern)
            }
            Self::Root => f.write_str("the root domain is not allowed as a pattern"),
        }
    }
}

impl std::error::Error for PatternError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// An error evaluating a domain against a [`DomainPolicy`]. Both
/// variants mean that the requested domain is invalid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EvaluationError {
    /// The domain could not be parsed as a domain name.
    Unparseable {
        domain: String,
        source: name::Error,
    },

    /// The domain parsed, but is not a valid host name.
    NotHostName { domain: String },
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unparseable { domain, .. } => {
                write!(f, "cannot parse {:?} as a domain name", domain)
            }
            Self::NotHostName { domain } => write!(f, "{:?} is not a valid host name", domain),
        }
    }
}

impl std::error::Error for EvaluationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unparseable { source, .. } => Some(source),
            Self::NotHostName { .. } => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
