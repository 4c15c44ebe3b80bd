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

//! Clients (tenants) of the proxy and the registry that holds them.
//!
//! Clients are described in configuration by [`RawAccount`]s.
//! Provisioning turns an ordered list of them into an immutable
//! [`ClientRegistry`] of [`ClientPolicy`]s; the raw accounts are
//! consumed in the process.

use serde::Deserialize;

use crate::policy::{DomainPolicy, PatternError};

mod error;
mod registry;
pub use error::ProvisionError;
pub use registry::ClientRegistry;

/// A client account as it appears in configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawAccount {
    /// Identifies the client.
    pub user_id: String,

    /// The client's password hash (see
    /// [`identity::hash_password`](crate::identity::hash_password)).
    /// Optional; without one, the client must be identified by other
    /// means.
    #[serde(default)]
    pub password: Option<String>,

    /// Patterns for the domains at which the client may answer
    /// challenges. Empty means no restriction.
    #[serde(default)]
    pub allow_domains: Vec<String>,

    /// Patterns for the domains at which the client may never answer
    /// challenges.
    #[serde(default)]
    pub deny_domains: Vec<String>,
}

/// A client's identity together with its compiled [`DomainPolicy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientPolicy {
    user_id: String,
    domain_policy: DomainPolicy,
}

impl ClientPolicy {
    /// Creates a `ClientPolicy` from already compiled parts.
    pub fn new(user_id: String, domain_policy: DomainPolicy) -> Self {
        Self {
            user_id,
            domain_policy,
        }
    }

    /// Compiles the policy of a [`RawAccount`], consuming it.
    pub fn provision(raw: RawAccount) -> Result<Self, PatternError> {
        let domain_policy = DomainPolicy::new(&raw.allow_domains, &raw.deny_domains)?;
        Ok(Self::new(raw.user_id, domain_policy))
    }

    /// Returns the client's user ID.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the client's domain policy.
    pub fn domain_policy(&self) -> &DomainPolicy {
        &self.domain_policy
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_compiles_both_lists() {
        let policy = ClientPolicy::provision(RawAccount {
            user_id: "host1".to_owned(),
            allow_domains: vec!["example.com".to_owned()],
            deny_domains: vec!["*.example.com".to_owned()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(policy.user_id(), "host1");
        assert_eq!(policy.domain_policy().allowed().len(), 1);
        assert_eq!(policy.domain_policy().denied().len(), 1);
        assert_eq!(policy.domain_policy().is_allowed("example.com"), Ok(true));
        assert_eq!(policy.domain_policy().is_allowed("www.example.com"), Ok(false));
    }

    #[test]
    fn raw_accounts_deserialize_with_defaults() {
        let raw: RawAccount = serde_json::from_str(r#"{"user_id": "host1"}"#).unwrap();
        assert_eq!(raw.user_id, "host1");
        assert!(raw.password.is_none());
        assert!(raw.allow_domains.is_empty());
        assert!(raw.deny_domains.is_empty());
    }

    #[test]
    fn raw_accounts_reject_unknown_fields() {
        let result =
            serde_json::from_str::<RawAccount>(r#"{"user_id": "host1", "domains": []}"#);
        assert!(result.is_err());
    }
}
