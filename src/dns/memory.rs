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

//! Implementation of the in-memory [`MemoryProvider`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;

use super::{Error, RecordProvider, TxtRecord, Ttl};
use crate::name::Name;

/// A [`RecordProvider`] that keeps TXT records in memory.
///
/// Records are grouped into sets by zone and relative owner name.
/// Appending adds each value to its set; deleting removes matching
/// values and drops sets that become empty. Nothing is published to
/// the DNS, which makes this provider suitable for dry runs and tests.
/// The most recent calls are also kept in a journal of bounded size
/// (see [`MemoryProvider::calls`]).
#[derive(Debug)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    journal_capacity: usize,
}

#[derive(Debug, Default)]
struct Inner {
    sets: HashMap<(Name, String), Vec<(String, Ttl)>>,
    calls: VecDeque<ProviderCall>,
}

/// The number of calls a [`MemoryProvider`] journals by default.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 256;

/// The operation requested of a [`RecordProvider`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    Append,
    Delete,
}

/// A journal entry recorded by the [`MemoryProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderCall {
    pub operation: Operation,
    pub zone: Name,
    pub records: Vec<TxtRecord>,
}

impl MemoryProvider {
    /// Creates a new, initially empty `MemoryProvider`.
    pub fn new() -> Self {
        Self::with_journal_capacity(DEFAULT_JOURNAL_CAPACITY)
    }

    /// Creates a new, initially empty `MemoryProvider` that journals at
    /// most `capacity` calls. Older calls are forgotten first.
    pub fn with_journal_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::default(),
            journal_capacity: capacity,
        }
    }

    /// Returns the TXT values currently stored at `name` (relative to
    /// `zone`).
    pub fn values(&self, zone: &Name, name: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .sets
            .get(&(zone.clone(), name.to_owned()))
            .map(|set| set.iter().map(|(text, _)| text.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the journaled calls, oldest first.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.inner.lock().unwrap().calls.iter().cloned().collect()
    }

    fn journal(&self, inner: &mut Inner, operation: Operation, zone: &Name, records: &[TxtRecord]) {
        if self.journal_capacity == 0 {
            return;
        }
        if inner.calls.len() == self.journal_capacity {
            inner.calls.pop_front();
        }
        inner.calls.push_back(ProviderCall {
            operation,
            zone: zone.clone(),
            records: records.to_vec(),
        });
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordProvider for MemoryProvider {
    async fn append_records(
        &self,
        zone: &Name,
        records: &[TxtRecord],
    ) -> Result<Vec<TxtRecord>, Error> {
        let mut inner = self.inner.lock().unwrap();
        self.journal(&mut inner, Operation::Append, zone, records);
        for record in records {
            debug!("Appending TXT {} at {} in {}.", record.text, record.name, zone);
            inner
                .sets
                .entry((zone.clone(), record.name.clone()))
                .or_default()
                .push((record.text.clone(), record.ttl));
        }
        Ok(records.to_vec())
    }

    async fn delete_records(
        &self,
        zone: &Name,
        records: &[TxtRecord],
    ) -> Result<Vec<TxtRecord>, Error> {
        let mut inner = self.inner.lock().unwrap();
        self.journal(&mut inner, Operation::Delete, zone, records);
        let mut deleted = Vec::new();
        for record in records {
            let key = (zone.clone(), record.name.clone());
            if let Some(set) = inner.sets.get_mut(&key) {
                let before = set.len();
                set.retain(|(text, _)| *text != record.text);
                if set.len() < before {
                    debug!("Deleted TXT {} at {} in {}.", record.text, record.name, zone);
                    deleted.push(record.clone());
                }
                if set.is_empty() {
                    inner.sets.remove(&key);
                }
            }
        }
        Ok(deleted)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Name {
        "example.com.".parse().unwrap()
    }

    fn record(text: &str) -> TxtRecord {
        TxtRecord {
            name: "_acme-challenge.www".to_owned(),
            ttl: Ttl::from(60),
            text: text.to_owned(),
        }
    }

    #[tokio::test]
    async fn append_then_delete_works() {
        let provider = MemoryProvider::new();
        provider
            .append_records(&zone(), &[record("\"a\""), record("\"b\"")])
            .await
            .unwrap();
        assert_eq!(
            provider.values(&zone(), "_acme-challenge.www"),
            vec!["\"a\"".to_owned(), "\"b\"".to_owned()],
        );

        let deleted = provider
            .delete_records(&zone(), &[record("\"a\"")])
            .await
            .unwrap();
        assert_eq!(deleted, vec![record("\"a\"")]);
        assert_eq!(
            provider.values(&zone(), "_acme-challenge.www"),
            vec!["\"b\"".to_owned()],
        );
    }

    #[tokio::test]
    async fn deleting_a_missing_record_deletes_nothing() {
        let provider = MemoryProvider::new();
        let deleted = provider
            .delete_records(&zone(), &[record("\"a\"")])
            .await
            .unwrap();
        assert!(deleted.is_empty());
    }

    #[tokio::test]
    async fn calls_are_journaled_in_order() {
        let provider = MemoryProvider::new();
        provider.append_records(&zone(), &[record("\"a\"")]).await.unwrap();
        provider.delete_records(&zone(), &[record("\"a\"")]).await.unwrap();
        let operations: Vec<Operation> =
            provider.calls().iter().map(|c| c.operation).collect();
        assert_eq!(operations, vec![Operation::Append, Operation::Delete]);
        assert!(provider.values(&zone(), "_acme-challenge.www").is_empty());
    }

    #[tokio::test]
    async fn journal_keeps_only_recent_calls() {
        let provider = MemoryProvider::with_journal_capacity(2);
        for text in ["\"a\"", "\"b\"", "\"c\""] {
            provider.append_records(&zone(), &[record(text)]).await.unwrap();
        }
        let texts: Vec<String> = provider
            .calls()
            .iter()
            .map(|c| c.records[0].text.clone())
            .collect();
        assert_eq!(texts, vec!["\"b\"".to_owned(), "\"c\"".to_owned()]);
        assert_eq!(provider.values(&zone(), "_acme-challenge.www").len(), 3);

        let silent = MemoryProvider::with_journal_capacity(0);
        silent.append_records(&zone(), &[record("\"a\"")]).await.unwrap();
        assert!(silent.calls().is_empty());
    }
}
