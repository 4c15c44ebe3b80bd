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

//! A multi-tenant proxy for answering ACME DNS-01 challenges.
//!
//! ACME clients that cannot (or should not) hold credentials for a DNS
//! provider send `present` and `cleanup` requests to the proxy instead,
//! in the JSON format of lego's httpreq provider. The proxy identifies
//! the client, checks the requested challenge name against the client's
//! allow/deny policy, and then creates or deletes the TXT record through
//! a DNS provider on the client's behalf.
//!
//! The crate is organized bottom-up:
//!
//! * [`name`]: domain names;
//! * [`policy`]: per-client allow/deny policies over domain names;
//! * [`client`]: client accounts and the immutable [`ClientRegistry`];
//! * [`authz`]: the [`ChallengeAuthorizer`];
//! * [`identity`]: establishing who sent a request;
//! * [`dns`]: zone resolution and record providers;
//! * [`pipeline`]: the [`ChallengeRequestPipeline`];
//! * [`proxy`]: the HTTP surface.
//!
//! [`ClientRegistry`]: client::ClientRegistry
//! [`ChallengeAuthorizer`]: authz::ChallengeAuthorizer
//! [`ChallengeRequestPipeline`]: pipeline::ChallengeRequestPipeline

pub mod authz;
pub mod client;
pub mod dns;
pub mod identity;
pub mod name;
pub mod pipeline;
pub mod policy;
pub mod proxy;

/// Returns the version string printed by `dns01proxyd version`.
pub fn version() -> String {
    format!(
        "dns01proxy {} {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}
