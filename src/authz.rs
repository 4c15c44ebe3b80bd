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

//! Authorization of challenge domains.
//!
//! The [`ChallengeAuthorizer`] decides whether an identified client may
//! answer a DNS-01 challenge at a given name. Every decision is one of
//! the three cases of [`Authorization`]; nothing that is not explicitly
//! [`Authorization::Allowed`] lets a request proceed.

use std::fmt;

use crate::client::ClientRegistry;
use crate::policy::EvaluationError;

/// DNS names for answering DNS-01 challenges must have this prefix.
pub const CHALLENGE_DOMAIN_PREFIX: &str = "_acme-challenge.";

////////////////////////////////////////////////////////////////////////
// DECISIONS                                                          //
////////////////////////////////////////////////////////////////////////

/// The reason a request was not authorized. Deny reasons are recorded
/// for operators and are never disclosed to the client.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DenyReason {
    /// The client's user ID is not in the registry.
    UnknownUser,

    /// The client's policy does not allow the requested domain.
    DomainNotAllowed,

    /// The requested challenge name is not valid.
    InvalidDomain,

    /// Authorization could not be performed. This is the reason
    /// recorded for [`Authorization::Failed`] decisions.
    InternalError,
}

impl DenyReason {
    /// Returns the human-readable form used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownUser => "unknown user",
            Self::DomainNotAllowed => "requested domain denied by policy",
            Self::InvalidDomain => "requested domain not valid",
            Self::InternalError => "an error occurred",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of an authorization decision.
#[derive(Debug, Eq, PartialEq)]
pub enum Authorization {
    /// The client may answer the challenge.
    Allowed,

    /// The client was identified and may not answer the challenge.
    Denied(DenyReason),

    /// No decision could be made.
    Failed(AuthorizationError),
}

impl Authorization {
    /// Returns whether this is [`Authorization::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Returns the reason to record for a decision that is not
    /// [`Authorization::Allowed`].
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Allowed => None,
            Self::Denied(reason) => Some(*reason),
            Self::Failed(_) => Some(DenyReason::InternalError),
        }
    }
}

/// An error that prevented an authorization decision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthorizationError {
    /// No identity was established for the request. This indicates a
    /// configuration problem (e.g., authentication is not set up), not
    /// a client that is merely unknown.
    NoIdentity,
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoIdentity => {
                f.write_str("unable to determine user ID (is authentication configured?)")
            }
        }
    }
}

impl std::error::Error for AuthorizationError {}

////////////////////////////////////////////////////////////////////////
// THE AUTHORIZER                                                     //
////////////////////////////////////////////////////////////////////////

/// Authorizes clients against a [`ClientRegistry`].
#[derive(Clone, Copy, Debug)]
pub struct ChallengeAuthorizer<'a> {
    registry: &'a ClientRegistry,
}

impl<'a> ChallengeAuthorizer<'a> {
    pub fn new(registry: &'a ClientRegistry) -> Self {
        Self { registry }
    }

    /// Determines whether the client identified by `identity` may
    /// answer a DNS-01 challenge at `challenge_fqdn`.
    ///
    /// The checks, in order:
    ///
    /// 1. An identity must be present; otherwise the decision fails.
    /// 2. The identity must be in the registry.
    /// 3. `challenge_fqdn` must start with [`CHALLENGE_DOMAIN_PREFIX`].
    /// 4. After removing the prefix and at most one trailing dot, the
    ///    remaining domain must be non-empty and must neither start nor
    ///    end with a dot.
    /// 5. The client's domain policy must allow the remaining domain.
    pub fn authorize(&self, identity: Option<&str>, challenge_fqdn: &str) -> Authorization {
        let user_id = match identity {
            Some(user_id) => user_id,
            None => return Authorization::Failed(AuthorizationError::NoIdentity),
        };
        let client = match self.registry.lookup(user_id) {
            Some(client) => client,
            None => return Authorization::Denied(DenyReason::UnknownUser),
        };

        let domain = match challenge_fqdn.strip_prefix(CHALLENGE_DOMAIN_PREFIX) {
            Some(rest) => rest.strip_suffix('.').unwrap_or(rest),
            None => return Authorization::Denied(DenyReason::InvalidDomain),
        };
        if domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
            return Authorization::Denied(DenyReason::InvalidDomain);
        }

        match client.domain_policy().is_allowed(domain) {
            Ok(true) => Authorization::Allowed,
            Ok(false) => Authorization::Denied(DenyReason::DomainNotAllowed),
            Err(EvaluationError::Unparseable { .. } | EvaluationError::NotHostName { .. }) => {
                Authorization::Denied(DenyReason::InvalidDomain)
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RawAccount;

    fn registry() -> ClientRegistry {
        ClientRegistry::provision(vec![
            RawAccount {
                user_id: "host1".to_owned(),
                allow_domains: vec!["example.com".to_owned()],
                deny_domains: vec!["secret.example.com".to_owned()],
                ..Default::default()
            },
            RawAccount {
                user_id: "anything".to_owned(),
                ..Default::default()
            },
        ])
        .unwrap()
    }

    fn authorize(identity: Option<&str>, fqdn: &str) -> Authorization {
        let registry = registry();
        ChallengeAuthorizer::new(&registry).authorize(identity, fqdn)
    }

    #[test]
    fn allowed_domain_is_authorized() {
        assert_eq!(
            authorize(Some("host1"), "_acme-challenge.foo.example.com."),
            Authorization::Allowed,
        );
        assert_eq!(
            authorize(Some("host1"), "_acme-challenge.example.com"),
            Authorization::Allowed,
        );
    }

    #[test]
    fn missing_identity_fails_rather_than_denies() {
        let decision = authorize(None, "_acme-challenge.foo.example.com.");
        assert_eq!(decision, Authorization::Failed(AuthorizationError::NoIdentity));
        assert_eq!(decision.deny_reason(), Some(DenyReason::InternalError));
    }

    #[test]
    fn unknown_identity_is_denied() {
        assert_eq!(
            authorize(Some("stranger"), "_acme-challenge.foo.example.com."),
            Authorization::Denied(DenyReason::UnknownUser),
        );
    }

    #[test]
    fn missing_prefix_is_invalid() {
        for fqdn in [
            "foo.example.com.",
            "_acme-challengefoo.example.com",
            "_ACME-CHALLENGE.foo.example.com",
        ] {
            assert_eq!(
                authorize(Some("host1"), fqdn),
                Authorization::Denied(DenyReason::InvalidDomain),
                "{}",
                fqdn,
            );
        }
    }

    #[test]
    fn empty_or_dotted_remainder_is_invalid() {
        for fqdn in [
            "_acme-challenge.",
            "_acme-challenge..",
            "_acme-challenge..example.com.",
            "_acme-challenge.example.com..",
            "_acme-challenge...",
        ] {
            assert_eq!(
                authorize(Some("anything"), fqdn),
                Authorization::Denied(DenyReason::InvalidDomain),
                "{}",
                fqdn,
            );
        }
    }

    #[test]
    fn unparseable_domain_is_invalid() {
        assert_eq!(
            authorize(Some("anything"), "_acme-challenge.foo..example.com"),
            Authorization::Denied(DenyReason::InvalidDomain),
        );
        assert_eq!(
            authorize(Some("anything"), "_acme-challenge.*.example.com"),
            Authorization::Denied(DenyReason::InvalidDomain),
        );
    }

    #[test]
    fn policy_denial_is_reported() {
        assert_eq!(
            authorize(Some("host1"), "_acme-challenge.example.org."),
            Authorization::Denied(DenyReason::DomainNotAllowed),
        );
        assert_eq!(
            authorize(Some("host1"), "_acme-challenge.secret.example.com."),
            Authorization::Denied(DenyReason::DomainNotAllowed),
        );
    }

    #[test]
    fn empty_policy_allows_any_valid_domain() {
        assert!(authorize(Some("anything"), "_acme-challenge.example.org.").is_allowed());
    }
}
