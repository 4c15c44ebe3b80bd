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

//! Implementation of the [`ZoneCatalog`] zone resolver.

use std::collections::HashMap;
use std::iter::FromIterator;

use async_trait::async_trait;
use log::debug;

use super::{Error, ZoneResolver};
use crate::name::{Label, Name};

/// A [`ZoneResolver`] over a fixed set of zone apexes.
///
/// A `ZoneCatalog` places each apex at a node of a tree that mirrors
/// the DNS namespace. Resolving a name walks down the tree from the
/// root and returns the deepest apex encountered, i.e., the configured
/// zone that is the nearest ancestor of the name.
///
/// The catalog answers from its own contents, so the resolver list
/// passed to [`ZoneResolver::find_zone`] is not consulted.
#[derive(Debug, Default)]
pub struct ZoneCatalog {
    root: Node,
    len: usize,
}

#[derive(Debug, Default)]
struct Node {
    apex: Option<Name>,
    children: HashMap<Label, Node>,
}

impl ZoneCatalog {
    /// Creates a new, initially empty `ZoneCatalog`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the zone with apex `apex`. Returns `false` if the zone was
    /// already present.
    pub fn insert(&mut self, apex: Name) -> bool {
        let mut node = &mut self.root;
        for label in apex.labels().rev() {
            node = node.children.entry(label.clone()).or_default();
        }
        if node.apex.is_some() {
            false
        } else {
            node.apex = Some(apex);
            self.len += 1;
            true
        }
    }

    /// Looks up the zone in the `ZoneCatalog` that is the nearest
    /// ancestor to `name` (i.e., the zone whose apex matches the most
    /// consecutive labels in `name`, starting from the right).
    pub fn lookup(&self, name: &Name) -> Option<&Name> {
        let labels: Vec<&Label> = name.labels().collect();
        lookup_from(&self.root, &labels)
    }

    /// Returns the number of zones in the catalog.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the catalog contains no zones.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Implements catalog lookup. `node` is the deepest node we have
/// matched so far, and `remaining` holds the labels of the name that
/// have yet to be matched.
fn lookup_from<'a>(node: &'a Node, remaining: &[&Label]) -> Option<&'a Name> {
    let longer_match = match remaining.split_last() {
        Some((label, rest)) => node
            .children
            .get(*label)
            .and_then(|child| lookup_from(child, rest)),
        None => None,
    };
    longer_match.or(node.apex.as_ref())
}

impl FromIterator<Name> for ZoneCatalog {
    fn from_iter<I: IntoIterator<Item = Name>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for apex in iter {
            catalog.insert(apex);
        }
        catalog
    }
}

#[async_trait]
impl ZoneResolver for ZoneCatalog {
    async fn find_zone(&self, fqdn: &Name, _resolvers: &[String]) -> Result<Name, Error> {
        match self.lookup(fqdn) {
            Some(apex) => {
                debug!("Resolved {} to zone {}.", fqdn, apex);
                Ok(apex.clone())
            }
            None => Err(Error::NoZone(fqdn.clone())),
        }
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
    fn lookup_works() {
        let catalog: ZoneCatalog = [name("test."), name("x.quandary.test.")]
            .into_iter()
            .collect();

        assert!(catalog.lookup(&Name::root()).is_none());
        assert_eq!(catalog.lookup(&name("test.")), Some(&name("test.")));
        assert_eq!(
            catalog.lookup(&name("quandary.test.")),
            Some(&name("test.")),
        );
        assert_eq!(
            catalog.lookup(&name("x.quandary.test.")),
            Some(&name("x.quandary.test.")),
        );
        assert_eq!(
            catalog.lookup(&name("y.x.quandary.test.")),
            Some(&name("x.quandary.test.")),
        );
        assert!(catalog.lookup(&name("example.com.")).is_none());
    }

    #[test]
    fn insert_reports_duplicates() {
        let mut catalog = ZoneCatalog::new();
        assert!(catalog.insert(name("example.com.")));
        assert!(!catalog.insert(name("EXAMPLE.com")));
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn find_zone_returns_nearest_apex() {
        let catalog: ZoneCatalog = [name("example.com.")].into_iter().collect();
        let zone = catalog
            .find_zone(&name("_acme-challenge.foo.example.com."), &[])
            .await
            .unwrap();
        assert_eq!(zone, name("example.com."));
    }

    #[tokio::test]
    async fn find_zone_fails_outside_all_zones() {
        let catalog: ZoneCatalog = [name("example.com.")].into_iter().collect();
        let result = catalog.find_zone(&name("example.org."), &[]).await;
        assert!(matches!(result, Err(Error::NoZone(_))));
    }
}
