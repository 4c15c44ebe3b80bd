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

//! Implementation of the [`ClientRegistry`] structure.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::debug;

use super::{ClientPolicy, ProvisionError, RawAccount};

/// The table of all known clients, keyed by user ID.
///
/// A `ClientRegistry` is built once by [`ClientRegistry::provision`]
/// and never modified afterward, so it can be shared between any
/// number of concurrent request handlers without locking. To change
/// the set of clients, provision a new registry and replace the old
/// one wholesale.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientPolicy>,
}

impl ClientRegistry {
    /// Provisions a registry from an ordered list of raw accounts.
    ///
    /// User IDs are checked for uniqueness in list order, so the
    /// reported duplicate is always the earliest repeated entry. Only
    /// once every ID has been accepted are the domain policies
    /// compiled. Any failure discards all work done so far.
    pub fn provision<I>(accounts: I) -> Result<Self, ProvisionError>
    where
        I: IntoIterator<Item = RawAccount>,
    {
        let mut raw_by_user_id = HashMap::new();
        let mut order = Vec::new();
        for (index, account) in accounts.into_iter().enumerate() {
            match raw_by_user_id.entry(account.user_id.clone()) {
                Entry::Occupied(_) => {
                    return Err(ProvisionError::DuplicateUserId {
                        index,
                        user_id: account.user_id,
                    });
                }
                Entry::Vacant(entry) => {
                    order.push(account.user_id.clone());
                    entry.insert(account);
                }
            }
        }

        let mut clients = HashMap::with_capacity(order.len());
        for user_id in order {
            if let Some(account) = raw_by_user_id.remove(&user_id) {
                let policy = ClientPolicy::provision(account).map_err(|source| {
                    ProvisionError::InvalidPolicy {
                        user_id: user_id.clone(),
                        source,
                    }
                })?;
                debug!(
                    "Provisioned client {:?} ({} allowed, {} denied patterns).",
                    user_id,
                    policy.domain_policy().allowed().len(),
                    policy.domain_policy().denied().len(),
                );
                clients.insert(user_id, policy);
            }
        }
        Ok(Self { clients })
    }

    /// Looks up the client with the given user ID.
    pub fn lookup(&self, user_id: &str) -> Option<&ClientPolicy> {
        self.clients.get(user_id)
    }

    /// Returns the number of clients in the registry.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns whether the registry has no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Returns an iterator over the user IDs in the registry, in no
    /// particular order.
    pub fn user_ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PatternError;

    fn account(user_id: &str, allow: &[&str]) -> RawAccount {
        RawAccount {
            user_id: user_id.to_owned(),
            allow_domains: allow.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn lookup_finds_every_provisioned_client() {
        let registry = ClientRegistry::provision(vec![
            account("alpha", &["alpha.example.com"]),
            account("beta", &[]),
            account("gamma", &["*.gamma.example.com"]),
        ])
        .unwrap();
        assert_eq!(registry.len(), 3);
        for user_id in ["alpha", "beta", "gamma"] {
            assert_eq!(registry.lookup(user_id).unwrap().user_id(), user_id);
        }
    }

    #[test]
    fn lookup_returns_none_for_unknown_user() {
        let registry = ClientRegistry::provision(vec![account("alpha", &[])]).unwrap();
        assert!(registry.lookup("beta").is_none());
        assert!(registry.lookup("").is_none());
        assert!(registry.lookup("ALPHA").is_none());
    }

    #[test]
    fn duplicate_user_ids_are_rejected() {
        let result = ClientRegistry::provision(vec![
            account("alpha", &[]),
            account("beta", &[]),
            account("alpha", &["example.com"]),
            account("beta", &[]),
        ]);
        assert_eq!(
            result.unwrap_err(),
            ProvisionError::DuplicateUserId {
                index: 2,
                user_id: "alpha".to_owned(),
            }
        );
    }

    #[test]
    fn duplicates_are_detected_before_policies_compile() {
        // The invalid pattern belongs to an account that is listed
        // before the duplicate, but the duplicate is still reported.
        let result = ClientRegistry::provision(vec![
            account("alpha", &["bad..example.com"]),
            account("alpha", &[]),
        ]);
        assert!(matches!(
            result,
            Err(ProvisionError::DuplicateUserId { index: 1, .. })
        ));
    }

    #[test]
    fn invalid_policy_aborts_provisioning() {
        let result = ClientRegistry::provision(vec![
            account("alpha", &["example.com"]),
            account("beta", &["."]),
        ]);
        assert_eq!(
            result.unwrap_err(),
            ProvisionError::InvalidPolicy {
                user_id: "beta".to_owned(),
                source: PatternError::Root,
            }
        );
    }

    #[test]
    fn empty_account_list_gives_empty_registry() {
        let registry = ClientRegistry::provision(Vec::new()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.user_ids().count(), 0);
    }
}
