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

//! Processing of `present` and `cleanup` requests.
//!
//! Both kinds of request go through the same steps, and processing
//! stops at the first step that fails:
//!
//! 1. the body is decoded as a [`ChallengeRequest`];
//! 2. both fields must be non-empty;
//! 3. the client must be authorized by the [`ChallengeAuthorizer`];
//! 4. the zone that owns the challenge name is found;
//! 5. exactly one TXT record is appended to (present) or deleted from
//!    (cleanup) that zone;
//! 6. the request is echoed back.
//!
//! The result is an [`Outcome`], which the HTTP layer turns into a
//! response.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::authz::{Authorization, AuthorizationError, ChallengeAuthorizer, DenyReason};
use crate::client::ClientRegistry;
use crate::dns::{self, RecordProvider, Ttl, TxtRecord, ZoneResolver};
use crate::name::{self, Name};

/// The default bound on each upstream call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

////////////////////////////////////////////////////////////////////////
// REQUESTS AND SETTINGS                                              //
////////////////////////////////////////////////////////////////////////

/// The two operations the proxy supports.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Mode {
    /// Publish a challenge answer.
    Present,

    /// Remove a previously published answer.
    Cleanup,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The body of a request, in the format used by lego's httpreq DNS
/// provider and by acmeproxy. Missing fields decode as empty strings
/// and then fail validation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChallengeRequest {
    /// The full name at which the challenge is answered, including the
    /// `_acme-challenge.` prefix. A trailing dot is optional.
    #[serde(rename = "fqdn", default)]
    pub challenge_fqdn: String,

    /// The challenge answer (the TXT record value).
    #[serde(default)]
    pub value: String,
}

/// The body of a successful response, which echoes the request.
pub type ChallengeResponse = ChallengeRequest;

impl ChallengeRequest {
    /// Returns whether both fields are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.challenge_fqdn.is_empty() && !self.value.is_empty()
    }
}

/// Settings that apply to every client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DnsSettings {
    /// The TTL of records created by `present` requests.
    pub ttl: Ttl,

    /// DNS resolvers handed to the [`ZoneResolver`].
    pub resolvers: Vec<String>,

    /// The bound on each call to the [`ZoneResolver`] or the
    /// [`RecordProvider`].
    pub timeout: Duration,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            ttl: Ttl::ZERO,
            resolvers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// OBSERVABILITY                                                      //
////////////////////////////////////////////////////////////////////////

/// The field under which the requested challenge name is recorded.
pub const FIELD_DOMAIN: &str = "domain";

/// The field under which the deny reason is recorded.
pub const FIELD_DENY_REASON: &str = "deny_reason";

/// Receives structured fields describing the request being handled.
/// Recording a field never affects how the request is handled.
pub trait FieldSink {
    fn record(&mut self, key: &'static str, value: &str);
}

/// A [`FieldSink`] that collects fields in the order recorded. Its
/// [`Display`](fmt::Display) form is suitable for log lines.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestFields {
    fields: Vec<(&'static str, String)>,
}

impl RequestFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recently recorded value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FieldSink for RequestFields {
    fn record(&mut self, key: &'static str, value: &str) {
        self.fields.push((key, value.to_owned()));
    }
}

impl fmt::Display for RequestFields {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={:?}", key, value)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// OUTCOMES AND ERRORS                                                //
////////////////////////////////////////////////////////////////////////

/// The result of handling a request.
#[derive(Debug)]
pub enum Outcome {
    /// The record was changed. The response echoes the request.
    Success(ChallengeResponse),

    /// The body could not be decoded or had an empty field.
    MalformedRequest,

    /// The client may not answer this challenge. The reason is for
    /// logging only.
    Forbidden(DenyReason),

    /// Something went wrong on our side or upstream.
    Failed(PipelineError),
}

impl Outcome {
    /// Returns the HTTP status for the outcome.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Success(_) => StatusCode::OK,
            Self::MalformedRequest => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An error that made a request fail.
#[derive(Debug)]
pub enum PipelineError {
    /// No identity was established for the request.
    Unauthenticated(AuthorizationError),

    /// The challenge name passed authorization but is not a valid
    /// domain name as a whole (e.g., it is too long).
    InvalidFqdn { fqdn: String, source: name::Error },

    /// The owning zone could not be found.
    ZoneResolution(dns::Error),

    /// The resolver returned a zone that does not contain the
    /// challenge name.
    OutsideZone { fqdn: Name, zone: Name },

    /// The DNS provider failed to change the record.
    RecordMutation { mode: Mode, source: dns::Error },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unauthenticated(_) => f.write_str("request is not authenticated"),
            Self::InvalidFqdn { fqdn, .. } => {
                write!(f, "challenge name {:?} is not a valid domain name", fqdn)
            }
            Self::ZoneResolution(_) => f.write_str("unable to find the zone of the challenge name"),
            Self::OutsideZone { fqdn, zone } => {
                write!(f, "resolved zone {} does not contain {}", zone, fqdn)
            }
            Self::RecordMutation { mode, .. } => match mode {
                Mode::Present => f.write_str("unable to append the TXT record"),
                Mode::Cleanup => f.write_str("unable to delete the TXT record"),
            },
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unauthenticated(e) => Some(e),
            Self::InvalidFqdn { source, .. } => Some(source),
            Self::ZoneResolution(e) => Some(e),
            Self::OutsideZone { .. } => None,
            Self::RecordMutation { source, .. } => Some(source),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// THE PIPELINE                                                       //
////////////////////////////////////////////////////////////////////////

/// Handles `present` and `cleanup` requests. See the [module
/// documentation](self) for the steps involved.
///
/// The pipeline holds no per-request state; a single instance serves
/// all requests concurrently. The client registry is passed to each
/// call so that it can be replaced between requests.
#[derive(Clone)]
pub struct ChallengeRequestPipeline {
    settings: DnsSettings,
    resolver: Arc<dyn ZoneResolver>,
    provider: Arc<dyn RecordProvider>,
}

impl ChallengeRequestPipeline {
    pub fn new(
        settings: DnsSettings,
        resolver: Arc<dyn ZoneResolver>,
        provider: Arc<dyn RecordProvider>,
    ) -> Self {
        Self {
            settings,
            resolver,
            provider,
        }
    }

    /// Returns the settings the pipeline was created with.
    pub fn settings(&self) -> &DnsSettings {
        &self.settings
    }

    /// Handles one request. `identity` is the user ID established for
    /// the request, if any; `body` is the raw request body. Fields for
    /// observability are recorded into `fields`.
    ///
    /// Dropping the returned future abandons any upstream call in
    /// progress.
    pub async fn handle<S>(
        &self,
        mode: Mode,
        registry: &ClientRegistry,
        identity: Option<&str>,
        body: &[u8],
        fields: &mut S,
    ) -> Outcome
    where
        S: FieldSink + Send,
    {
        let request: ChallengeRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => {
                debug!("Unable to decode {} request body: {}.", mode, e);
                return Outcome::MalformedRequest;
            }
        };
        if !request.is_valid() {
            return Outcome::MalformedRequest;
        }
        fields.record(FIELD_DOMAIN, &request.challenge_fqdn);

        let authorization =
            ChallengeAuthorizer::new(registry).authorize(identity, &request.challenge_fqdn);
        if let Some(reason) = authorization.deny_reason() {
            fields.record(FIELD_DENY_REASON, reason.as_str());
        }
        match authorization {
            Authorization::Allowed => (),
            Authorization::Denied(reason) => return Outcome::Forbidden(reason),
            Authorization::Failed(e) => {
                return Outcome::Failed(PipelineError::Unauthenticated(e));
            }
        }

        match self.mutate(mode, &request).await {
            Ok(()) => Outcome::Success(request),
            Err(e) => Outcome::Failed(e),
        }
    }

    /// Carries out steps 4 and 5 for an authorized request.
    async fn mutate(&self, mode: Mode, request: &ChallengeRequest) -> Result<(), PipelineError> {
        let fqdn: Name =
            request
                .challenge_fqdn
                .parse()
                .map_err(|source| PipelineError::InvalidFqdn {
                    fqdn: request.challenge_fqdn.clone(),
                    source,
                })?;

        let zone = self
            .bounded(self.resolver.find_zone(&fqdn, &self.settings.resolvers))
            .await
            .map_err(PipelineError::ZoneResolution)?;
        let name = fqdn
            .relative_to(&zone)
            .ok_or_else(|| PipelineError::OutsideZone {
                fqdn: fqdn.clone(),
                zone: zone.clone(),
            })?;

        let ttl = match mode {
            Mode::Present => self.settings.ttl,
            Mode::Cleanup => Ttl::ZERO,
        };
        let record = [TxtRecord {
            name,
            ttl,
            text: format!("\"{}\"", request.value),
        }];
        debug!(
            "{}: TXT {} at {} in zone {} (TTL {}).",
            mode, record[0].text, record[0].name, zone, ttl
        );

        let result = match mode {
            Mode::Present => {
                self.bounded(self.provider.append_records(&zone, &record))
                    .await
            }
            Mode::Cleanup => {
                self.bounded(self.provider.delete_records(&zone, &record))
                    .await
            }
        };
        result
            .map(|_| ())
            .map_err(|source| PipelineError::RecordMutation { mode, source })
    }

    /// Bounds an upstream call by the configured timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T, dns::Error>
    where
        F: Future<Output = Result<T, dns::Error>>,
    {
        let timeout = self.settings.timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(dns::Error::TimedOut(timeout)),
        }
    }
}

impl fmt::Debug for ChallengeRequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChallengeRequestPipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
