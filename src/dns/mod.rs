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

//! Interfaces to the DNS collaborators that the proxy writes through.
//!
//! The proxy does not serve DNS itself. Publishing a challenge answer
//! happens in two steps, each behind its own capability trait:
//!
//! 1. A [`ZoneResolver`] finds the apex of the zone that owns the
//!    challenge name.
//! 2. A [`RecordProvider`] appends or deletes a TXT record in that
//!    zone, usually by calling a DNS hosting provider's API.
//!
//! Both traits are object-safe, and the rest of the crate only ever
//! holds them as `Arc<dyn ...>`, so any provider can be plugged in
//! without the authorization and request-handling code knowing its
//! concrete type. Ready-made implementations are provided:
//! [`ZoneCatalog`] resolves against a configured list of zones,
//! [`MemoryProvider`] keeps records in memory, and [`AcmeProxyProvider`]
//! forwards records to an upstream httpreq/acmeproxy server.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::name::Name;

mod acmeproxy;
mod catalog;
mod memory;
mod ttl;

pub use acmeproxy::AcmeProxyProvider;
pub use catalog::ZoneCatalog;
pub use memory::{MemoryProvider, Operation, ProviderCall};
pub use ttl::Ttl;

////////////////////////////////////////////////////////////////////////
// RECORDS                                                            //
////////////////////////////////////////////////////////////////////////

/// A TXT record, as handed to a [`RecordProvider`].
///
/// Following the conventions of DNS provider APIs, `name` is relative
/// to the zone passed alongside the record (`@` denotes the apex), and
/// `text` holds the presentation-format value, including any
/// surrounding double quotes.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TxtRecord {
    pub name: String,
    pub ttl: Ttl,
    pub text: String,
}

////////////////////////////////////////////////////////////////////////
// CAPABILITY TRAITS                                                  //
////////////////////////////////////////////////////////////////////////

/// Finds the zone that owns a domain name.
#[async_trait]
pub trait ZoneResolver: Send + Sync {
    /// Returns the apex of the zone that owns `fqdn`. `resolvers` lists
    /// the DNS resolvers (`host` or `host:port`) that implementations
    /// which query the DNS should prefer.
    async fn find_zone(&self, fqdn: &Name, resolvers: &[String]) -> Result<Name, Error>;
}

/// Creates and deletes records in a zone.
#[async_trait]
pub trait RecordProvider: Send + Sync {
    /// Adds `records` to `zone`, returning the records that were added.
    async fn append_records(&self, zone: &Name, records: &[TxtRecord])
        -> Result<Vec<TxtRecord>, Error>;

    /// Deletes `records` from `zone`, returning the records that were
    /// deleted.
    async fn delete_records(&self, zone: &Name, records: &[TxtRecord])
        -> Result<Vec<TxtRecord>, Error>;
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors reported by [`ZoneResolver`]s and [`RecordProvider`]s.
#[derive(Debug)]
pub enum Error {
    /// No known zone contains the name.
    NoZone(Name),

    /// The operation did not complete within the allotted time.
    TimedOut(Duration),

    /// An upstream server answered with a non-success HTTP status.
    UpstreamStatus(u16),

    /// Any other provider-specific failure.
    Provider(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps a provider-specific error.
    pub fn provider(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Provider(error.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoZone(name) => write!(f, "no known zone contains {}", name),
            Self::TimedOut(after) => write!(f, "timed out after {:?}", after),
            Self::UpstreamStatus(status) => {
                write!(f, "upstream server responded with HTTP status {}", status)
            }
            Self::Provider(_) => f.write_str("the DNS provider reported an error"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
