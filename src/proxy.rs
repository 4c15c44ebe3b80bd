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

//! The HTTP face of the proxy.
//!
//! A [`Proxy`] ties a [`ChallengeRequestPipeline`] to the current
//! [`Accounts`] and exposes both through an [`axum::Router`] with two
//! routes, `POST /present` and `POST /cleanup`.

use std::fmt;
use std::sync::{Arc, RwLock};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use log::{info, warn};

use crate::client::{ClientRegistry, ProvisionError, RawAccount};
use crate::identity::{self, BasicAuth, IdentitySource, TrustedHeader, Unauthorized, Unconfigured};
use crate::pipeline::{ChallengeRequestPipeline, Mode, Outcome, RequestFields};

/// The body of 400 responses.
const MALFORMED_BODY: &str = "Unable to read request body as JSON";

////////////////////////////////////////////////////////////////////////
// ACCOUNTS                                                           //
////////////////////////////////////////////////////////////////////////

/// Everything derived from the account configuration: the client
/// registry and the means of identifying clients. The two are always
/// provisioned, and replaced, together.
pub struct Accounts {
    registry: ClientRegistry,
    identity: Box<dyn IdentitySource>,
}

impl Accounts {
    pub fn new(registry: ClientRegistry, identity: Box<dyn IdentitySource>) -> Self {
        Self { registry, identity }
    }

    /// Provisions `Accounts` from raw account configuration.
    ///
    /// If any account has a password, clients are identified by HTTP
    /// Basic authentication. Otherwise, if `identity_header` is
    /// provided, the header is trusted to carry the user ID. Otherwise,
    /// no client can be identified and every request fails.
    pub fn provision(
        raw_accounts: Vec<RawAccount>,
        identity_header: Option<HeaderName>,
    ) -> Result<Self, ProvisionError> {
        let registry = ClientRegistry::provision(raw_accounts.iter().cloned())?;

        let with_password = raw_accounts.iter().filter(|a| a.password.is_some()).count();
        let identity: Box<dyn IdentitySource> = if with_password > 0 {
            if with_password < raw_accounts.len() {
                warn!(
                    "Only {} of {} accounts have a password; the rest cannot authenticate.",
                    with_password,
                    raw_accounts.len()
                );
            }
            if let Some(header) = identity_header {
                warn!("Passwords are configured; ignoring identity header {}.", header);
            }
            Box::new(BasicAuth::provision(&raw_accounts)?)
        } else if let Some(header) = identity_header {
            Box::new(TrustedHeader::new(header))
        } else {
            if !raw_accounts.is_empty() {
                warn!("No passwords or identity header are configured; all requests will fail.");
            }
            Box::new(Unconfigured)
        };

        Ok(Self::new(registry, identity))
    }

    /// Returns the client registry.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Returns the identity source.
    pub fn identity(&self) -> &dyn IdentitySource {
        self.identity.as_ref()
    }
}

impl fmt::Debug for Accounts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Accounts")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////
// THE PROXY                                                          //
////////////////////////////////////////////////////////////////////////

/// The proxy. Its [`Accounts`] may be replaced at any time with
/// [`Proxy::set_accounts`]; each request uses the accounts that were
/// current when it started.
pub struct Proxy {
    pipeline: ChallengeRequestPipeline,
    accounts: RwLock<Arc<Accounts>>,
}

impl Proxy {
    pub fn new(pipeline: ChallengeRequestPipeline, accounts: Arc<Accounts>) -> Self {
        Self {
            pipeline,
            accounts: RwLock::new(accounts),
        }
    }

    /// Returns the current accounts.
    pub fn accounts(&self) -> Arc<Accounts> {
        self.accounts.read().unwrap().clone()
    }

    /// Sets the accounts of the `Proxy`. Requests already in flight
    /// finish with the old accounts; requests started after this call
    /// completes see the new ones.
    pub fn set_accounts(&self, accounts: Arc<Accounts>) {
        *self.accounts.write().unwrap() = accounts;
    }

    /// Returns the request pipeline.
    pub fn pipeline(&self) -> &ChallengeRequestPipeline {
        &self.pipeline
    }

    /// Returns a [`Router`] that serves the proxy. Methods other than
    /// `POST` get a 405 response, and other paths get a 404 response.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/present", post(present))
            .route("/cleanup", post(cleanup))
            .with_state(self)
    }

    /// Handles one request.
    pub async fn handle(&self, mode: Mode, headers: &HeaderMap, body: &[u8]) -> Response {
        let accounts = self.accounts();
        let identity = match accounts.identity().authenticate(headers) {
            Ok(identity) => identity,
            Err(Unauthorized) => {
                info!("{} {} (unauthenticated)", mode, StatusCode::UNAUTHORIZED.as_u16());
                return unauthorized();
            }
        };

        let mut fields = RequestFields::new();
        let outcome = self
            .pipeline
            .handle(mode, accounts.registry(), identity.as_deref(), body, &mut fields)
            .await;
        log_access(mode, identity.as_deref(), &fields, &outcome);
        into_response(outcome)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

async fn present(State(proxy): State<Arc<Proxy>>, headers: HeaderMap, body: Bytes) -> Response {
    proxy.handle(Mode::Present, &headers, &body).await
}

async fn cleanup(State(proxy): State<Arc<Proxy>>, headers: HeaderMap, body: Bytes) -> Response {
    proxy.handle(Mode::Cleanup, &headers, &body).await
}

////////////////////////////////////////////////////////////////////////
// RESPONSES AND LOGGING                                              //
////////////////////////////////////////////////////////////////////////

fn into_response(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Success(response) => (StatusCode::OK, Json(response)).into_response(),
        Outcome::MalformedRequest => (StatusCode::BAD_REQUEST, MALFORMED_BODY).into_response(),
        other => other.status().into_response(),
    }
}

fn unauthorized() -> Response {
    let challenge = format!("Basic realm=\"{}\"", identity::REALM);
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(WWW_AUTHENTICATE, value);
    }
    response
}

fn log_access(mode: Mode, user_id: Option<&str>, fields: &RequestFields, outcome: &Outcome) {
    let status = outcome.status().as_u16();
    let user_id = user_id.unwrap_or("-");
    match outcome {
        Outcome::Failed(error) => warn!(
            "{} {} user={:?} {} error: {}",
            mode,
            status,
            user_id,
            fields,
            ErrorChain(error)
        ),
        _ => info!("{} {} user={:?} {}", mode, status, user_id, fields),
    }
}

/// Displays an error followed by its chain of sources.
struct ErrorChain<'a>(&'a (dyn std::error::Error + 'static));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {}", error)?;
            source = error.source();
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
