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

//! Establishing the identity of the client behind a request.
//!
//! An [`IdentitySource`] examines the headers of an HTTP request and
//! produces one of three results:
//!
//! * `Ok(Some(user_id))`: the client is identified;
//! * `Ok(None)`: no identity could be established at all, which means
//!   that authentication is not set up properly;
//! * `Err(Unauthorized)`: the client presented bad or no credentials
//!   and should be challenged to authenticate.
//!
//! Three sources are provided. [`BasicAuth`] checks HTTP Basic
//! credentials against password hashes in the account configuration
//! (see [`hash_password`]). [`TrustedHeader`] takes the identity from a
//! header set by an authenticating reverse proxy in front of this one.
//! [`Unconfigured`] never identifies anyone.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::client::{ProvisionError, RawAccount};

/// The realm sent with HTTP Basic authentication challenges.
pub const REALM: &str = "dns01proxy";

////////////////////////////////////////////////////////////////////////
// IDENTITY SOURCES                                                   //
////////////////////////////////////////////////////////////////////////

/// Determines the user ID of the client that sent a request.
pub trait IdentitySource: Send + Sync {
    /// Examines the request headers. See the [module
    /// documentation](self) for the meaning of the results.
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<String>, Unauthorized>;
}

/// The client must authenticate (again) before the request can be
/// handled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Unauthorized;

impl fmt::Display for Unauthorized {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("missing or invalid credentials")
    }
}

impl std::error::Error for Unauthorized {}

/// An [`IdentitySource`] that never identifies anyone. Every request
/// then fails authorization as unauthenticated.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unconfigured;

impl IdentitySource for Unconfigured {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<Option<String>, Unauthorized> {
        Ok(None)
    }
}

/// An [`IdentitySource`] that trusts a request header to carry the user
/// ID. This is only safe when every request passes through a fronting
/// proxy that authenticates the client and sets (or strips) the header.
#[derive(Clone, Debug)]
pub struct TrustedHeader {
    header: HeaderName,
}

impl TrustedHeader {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    /// Returns the name of the trusted header.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl IdentitySource for TrustedHeader {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<String>, Unauthorized> {
        Ok(headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user_id| !user_id.is_empty())
            .map(str::to_owned))
    }
}

/// An [`IdentitySource`] that checks HTTP Basic credentials against
/// the password hashes of the configured accounts.
pub struct BasicAuth {
    hashes: HashMap<String, PasswordHash>,

    // The costliest configured hash, checked when the user is unknown so
    // that unknown and known users take the same time to reject.
    decoy: Option<PasswordHash>,
}

impl BasicAuth {
    /// Builds a `BasicAuth` from the accounts that have a password.
    /// Accounts without one can never authenticate.
    pub fn provision<'a, I>(accounts: I) -> Result<Self, ProvisionError>
    where
        I: IntoIterator<Item = &'a RawAccount>,
    {
        let mut hashes: HashMap<String, PasswordHash> = HashMap::new();
        for account in accounts {
            if let Some(ref hash) = account.password {
                let hash = hash
                    .parse()
                    .map_err(|source| ProvisionError::InvalidPasswordHash {
                        user_id: account.user_id.clone(),
                        source,
                    })?;
                hashes.insert(account.user_id.clone(), hash);
            }
        }
        let decoy = hashes.values().max_by_key(|hash| hash.cost()).cloned();
        Ok(Self { hashes, decoy })
    }

    /// Returns the number of users that can authenticate.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Returns whether no user can authenticate.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl IdentitySource for BasicAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<String>, Unauthorized> {
        let (user_id, password) = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_basic_credentials)
            .ok_or(Unauthorized)?;
        match self.hashes.get(&user_id) {
            Some(hash) if hash.verify(password.as_bytes()) => Ok(Some(user_id)),
            Some(_) => Err(Unauthorized),
            None => {
                if let Some(ref decoy) = self.decoy {
                    decoy.verify(password.as_bytes());
                }
                Err(Unauthorized)
            }
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("users", &self.hashes.len())
            .finish()
    }
}

/// Parses the value of an `Authorization` header that uses the Basic
/// scheme ([RFC 7617]) into a user ID and password.
///
/// [RFC 7617]: https://datatracker.ietf.org/doc/html/rfc7617
fn parse_basic_credentials(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user_id, password) = decoded.split_once(':')?;
    Some((user_id.to_owned(), password.to_owned()))
}

////////////////////////////////////////////////////////////////////////
// PASSWORD HASHES                                                    //
////////////////////////////////////////////////////////////////////////

/// The bcrypt cost used by [`hash_password`].
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// The smallest bcrypt cost accepted.
pub const MIN_COST: u32 = 4;

/// The largest bcrypt cost accepted.
pub const MAX_COST: u32 = 31;

const VERSIONS: [&str; 4] = ["2a", "2b", "2x", "2y"];

// 22 characters of salt followed by 31 of digest.
const PAYLOAD_LEN: usize = 53;

/// A bcrypt password hash, in the modular crypt form
/// `$2b$<cost>$<salt><digest>` produced by `caddy hash-password` and
/// [`hash_password`].
#[derive(Clone, Eq, PartialEq)]
pub struct PasswordHash {
    encoded: String,
    cost: u32,
}

impl PasswordHash {
    /// Hashes `password` with a fresh random salt at the given cost.
    pub fn generate(password: &[u8], cost: u32) -> Result<Self, HashError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(HashError::Cost);
        }
        bcrypt::hash(password, cost)
            .map_err(|_| HashError::Generation)?
            .parse()
    }

    /// Returns the bcrypt cost of the hash.
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Checks `password` against the hash. The digests are compared in
    /// constant time.
    pub fn verify(&self, password: &[u8]) -> bool {
        bcrypt::verify(password, &self.encoded).unwrap_or(false)
    }
}

impl FromStr for PasswordHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.strip_prefix('$').ok_or(HashError::Format)?.split('$');
        if !fields.next().map_or(false, |v| VERSIONS.contains(&v)) {
            return Err(HashError::UnknownVersion);
        }
        let (cost_field, payload) = match (fields.next(), fields.next(), fields.next()) {
            (Some(cost_field), Some(payload), None) => (cost_field, payload),
            _ => return Err(HashError::Format),
        };
        let cost = match cost_field.parse::<u32>() {
            Ok(cost) if cost_field.len() == 2 && (MIN_COST..=MAX_COST).contains(&cost) => cost,
            _ => return Err(HashError::Cost),
        };
        if payload.len() != PAYLOAD_LEN
            || !payload
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'/')
        {
            return Err(HashError::Encoding);
        }
        Ok(Self {
            encoded: s.to_owned(),
            cost,
        })
    }
}

impl fmt::Display for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PasswordHash(cost {})", self.cost)
    }
}

/// Hashes `password` for use in account configuration.
pub fn hash_password(password: &str) -> Result<String, HashError> {
    hash_password_with_cost(password, DEFAULT_COST)
}

/// Hashes `password` at the given bcrypt cost.
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, HashError> {
    PasswordHash::generate(password.as_bytes(), cost).map(|hash| hash.to_string())
}

/// An error parsing or generating a [`PasswordHash`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashError {
    Format,
    UnknownVersion,
    Cost,
    Encoding,
    Generation,
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Format => f.write_str("password hash is not of the form $version$cost$hash"),
            Self::UnknownVersion => f.write_str("password hash is not a bcrypt hash"),
            Self::Cost => write!(
                f,
                "bcrypt cost is not a two-digit number from {} to {}",
                MIN_COST, MAX_COST
            ),
            Self::Encoding => f.write_str("bcrypt salt and digest are malformed"),
            Self::Generation => f.write_str("failed to generate a bcrypt hash"),
        }
    }
}

impl std::error::Error for HashError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic(user_id: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode(format!("{}:{}", user_id, password));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap(),
        );
        headers
    }

    fn accounts() -> Vec<RawAccount> {
        vec![
            RawAccount {
                user_id: "host1".to_owned(),
                password: Some(hash_password_with_cost("hunter2", MIN_COST).unwrap()),
                ..Default::default()
            },
            RawAccount {
                user_id: "nopass".to_owned(),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn hashes_verify_only_their_password() {
        let hash: PasswordHash = hash_password_with_cost("correct horse", MIN_COST)
            .unwrap()
            .parse()
            .unwrap();
        assert!(hash.verify(b"correct horse"));
        assert!(!hash.verify(b"correct horse "));
        assert!(!hash.verify(b""));
    }

    #[test]
    fn hashes_use_fresh_salts() {
        assert_ne!(
            hash_password_with_cost("same", MIN_COST).unwrap(),
            hash_password_with_cost("same", MIN_COST).unwrap()
        );
    }

    #[test]
    fn hash_text_round_trips() {
        let text = hash_password_with_cost("pw", 5).unwrap();
        assert!(text.starts_with("$2b$05$"));
        let hash = text.parse::<PasswordHash>().unwrap();
        assert_eq!(hash.cost(), 5);
        assert_eq!(hash.to_string(), text);
    }

    #[test]
    fn known_bcrypt_hashes_verify() {
        let hash: PasswordHash = "$2a$05$CCCCCCCCCCCCCCCCCCCCC.E5YPO9kmyuRGyh0XouQYb4YMJKvyOeW"
            .parse()
            .unwrap();
        assert!(hash.verify(b"U*U"));
        assert!(!hash.verify(b"U*V"));
    }

    #[test]
    fn out_of_range_costs_are_not_generated() {
        assert_eq!(hash_password_with_cost("pw", 3), Err(HashError::Cost));
        assert_eq!(hash_password_with_cost("pw", 32), Err(HashError::Cost));
    }

    #[test]
    fn malformed_hashes_are_rejected() {
        let payload = "C".repeat(PAYLOAD_LEN);
        assert_eq!("".parse::<PasswordHash>(), Err(HashError::Format));
        assert_eq!(
            format!("2b$04${}", payload).parse::<PasswordHash>(),
            Err(HashError::Format)
        );
        assert_eq!("$2b$04".parse::<PasswordHash>(), Err(HashError::Format));
        assert_eq!(
            "$argon2id$v=19$m=65536,t=3,p=4$c2FsdA$aGFzaA".parse::<PasswordHash>(),
            Err(HashError::UnknownVersion)
        );
        assert_eq!(
            format!("$2b$4${}", payload).parse::<PasswordHash>(),
            Err(HashError::Cost)
        );
        assert_eq!(
            format!("$2b$32${}", payload).parse::<PasswordHash>(),
            Err(HashError::Cost)
        );
        assert_eq!(
            "$2b$04$tooshort".parse::<PasswordHash>(),
            Err(HashError::Encoding)
        );
        assert_eq!(
            format!("$2b$04${}!", &payload[1..]).parse::<PasswordHash>(),
            Err(HashError::Encoding)
        );
    }

    #[test]
    fn basic_auth_identifies_valid_credentials() {
        let auth = BasicAuth::provision(&accounts()).unwrap();
        assert_eq!(auth.len(), 1);
        assert_eq!(
            auth.authenticate(&basic("host1", "hunter2")),
            Ok(Some("host1".to_owned()))
        );
    }

    #[test]
    fn basic_auth_rejects_bad_credentials() {
        let auth = BasicAuth::provision(&accounts()).unwrap();
        assert_eq!(auth.authenticate(&basic("host1", "wrong")), Err(Unauthorized));
        assert_eq!(auth.authenticate(&basic("nopass", "")), Err(Unauthorized));
        assert_eq!(auth.authenticate(&basic("stranger", "x")), Err(Unauthorized));
        assert_eq!(auth.authenticate(&HeaderMap::new()), Err(Unauthorized));

        let mut bearer = HeaderMap::new();
        bearer.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(auth.authenticate(&bearer), Err(Unauthorized));
    }

    #[test]
    fn basic_auth_provisioning_rejects_bad_hashes() {
        let accounts = vec![RawAccount {
            user_id: "host1".to_owned(),
            password: Some("plaintext".to_owned()),
            ..Default::default()
        }];
        assert_eq!(
            BasicAuth::provision(&accounts).unwrap_err(),
            ProvisionError::InvalidPasswordHash {
                user_id: "host1".to_owned(),
                source: HashError::Format,
            }
        );
    }

    #[test]
    fn trusted_header_reads_identity() {
        let source = TrustedHeader::new(HeaderName::from_static("x-remote-user"));
        let mut headers = HeaderMap::new();
        assert_eq!(source.authenticate(&headers), Ok(None));
        headers.insert("x-remote-user", HeaderValue::from_static(""));
        assert_eq!(source.authenticate(&headers), Ok(None));
        headers.insert("x-remote-user", HeaderValue::from_static("host1"));
        assert_eq!(source.authenticate(&headers), Ok(Some("host1".to_owned())));
    }

    #[test]
    fn unconfigured_identifies_nobody() {
        assert_eq!(Unconfigured.authenticate(&basic("host1", "hunter2")), Ok(None));
    }
}
