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

//! Implementation of the [`AcmeProxyProvider`].

use async_trait::async_trait;
use log::debug;
use serde::Serialize;

use super::{Error, RecordProvider, TxtRecord};
use crate::name::Name;

/// A [`RecordProvider`] that forwards challenge records to an upstream
/// server speaking the httpreq/acmeproxy protocol (such as another
/// instance of this proxy).
///
/// Each record becomes one `POST {endpoint}/present` (to append) or
/// `POST {endpoint}/cleanup` (to delete) request whose JSON body is
/// `{"fqdn": ..., "value": ...}`. The FQDN is rebuilt from the record's
/// relative name and the zone, and the double quotes surrounding the
/// TXT value are removed, since the upstream adds its own.
#[derive(Debug)]
pub struct AcmeProxyProvider {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<(String, String)>,
}

#[derive(Serialize)]
struct UpstreamBody<'a> {
    fqdn: String,
    value: &'a str,
}

impl AcmeProxyProvider {
    /// Creates a provider that sends requests to `endpoint` (e.g.
    /// `https://dns01proxy.example.net`), authenticating with HTTP
    /// basic credentials if `credentials` is provided.
    pub fn new(endpoint: &str, credentials: Option<(String, String)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            credentials,
        }
    }

    async fn send(&self, action: &str, zone: &Name, record: &TxtRecord) -> Result<(), Error> {
        let fqdn = if record.name == "@" {
            zone.to_string()
        } else if zone.is_root() {
            format!("{}.", record.name)
        } else {
            format!("{}.{}", record.name, zone)
        };
        let value = record
            .text
            .strip_prefix('"')
            .and_then(|text| text.strip_suffix('"'))
            .unwrap_or(&record.text);

        let url = format!("{}/{}", self.endpoint, action);
        debug!("Forwarding {} for {} to {}.", action, fqdn, url);
        let mut request = self.client.post(&url).json(&UpstreamBody { fqdn, value });
        if let Some((ref username, ref password)) = self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(Error::provider)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::UpstreamStatus(status.as_u16()))
        }
    }
}

#[async_trait]
impl RecordProvider for AcmeProxyProvider {
    async fn append_records(
        &self,
        zone: &Name,
        records: &[TxtRecord],
    ) -> Result<Vec<TxtRecord>, Error> {
        for record in records {
            self.send("present", zone, record).await?;
        }
        Ok(records.to_vec())
    }

    async fn delete_records(
        &self,
        zone: &Name,
        records: &[TxtRecord],
    ) -> Result<Vec<TxtRecord>, Error> {
        for record in records {
            self.send("cleanup", zone, record).await?;
        }
        Ok(records.to_vec())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::*;
    use crate::dns::Ttl;

    type Seen = Arc<Mutex<Vec<(String, Value, Option<String>)>>>;

    /// Starts an upstream that records what it receives and answers
    /// with `status`.
    async fn start_upstream(status: StatusCode) -> (SocketAddr, Seen) {
        let seen = Seen::default();
        let record = |action: &'static str| {
            move |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                seen.lock().unwrap().push((action.to_owned(), body, auth));
                status
            }
        };
        let app = Router::new()
            .route("/present", post(record("present")))
            .route("/cleanup", post(record("cleanup")))
            .with_state(seen.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (addr, seen)
    }

    fn record() -> TxtRecord {
        TxtRecord {
            name: "_acme-challenge.foo".to_owned(),
            ttl: Ttl::from(60),
            text: "\"xyz\"".to_owned(),
        }
    }

    #[tokio::test]
    async fn present_and_cleanup_are_forwarded() {
        let (addr, seen) = start_upstream(StatusCode::OK).await;
        let provider = AcmeProxyProvider::new(
            &format!("http://{}/", addr),
            Some(("user".to_owned(), "secret".to_owned())),
        );
        let zone: Name = "example.com.".parse().unwrap();

        provider.append_records(&zone, &[record()]).await.unwrap();
        provider.delete_records(&zone, &[record()]).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "present");
        assert_eq!(seen[1].0, "cleanup");
        for (_, body, auth) in seen.iter() {
            assert_eq!(body["fqdn"], "_acme-challenge.foo.example.com.");
            assert_eq!(body["value"], "xyz");
            assert_eq!(auth.as_deref(), Some("Basic dXNlcjpzZWNyZXQ="));
        }
    }

    #[tokio::test]
    async fn upstream_failure_is_reported() {
        let (addr, _) = start_upstream(StatusCode::FORBIDDEN).await;
        let provider = AcmeProxyProvider::new(&format!("http://{}", addr), None);
        let zone: Name = "example.com.".parse().unwrap();
        let result = provider.append_records(&zone, &[record()]).await;
        assert!(matches!(result, Err(Error::UpstreamStatus(403))));
    }
}
