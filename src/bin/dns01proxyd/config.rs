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

//! Implements the configuration file.

use std::fmt::{self, Write};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::http::HeaderName;
use log::Level::Debug;
use log::{debug, log_enabled, warn};
use paste::paste;
use serde::{de, Deserialize};

use dns01proxy::client::{ProvisionError, RawAccount};
use dns01proxy::dns::{
    AcmeProxyProvider, MemoryProvider, RecordProvider, Ttl, ZoneCatalog, ZoneResolver,
};
use dns01proxy::name::Name;
use dns01proxy::pipeline::{ChallengeRequestPipeline, DnsSettings, DEFAULT_TIMEOUT};
use dns01proxy::proxy::Accounts;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// The formats the configuration file may be written in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    /// Chooses the format by file extension: `.toml` files are TOML,
    /// and anything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Loads the configuration from the file given by `path`.
///
/// The `reloading` parameter controls how the configuration is
/// summarized in the log: if reloading, only the accounts (the only
/// thing that we support reloading) are summarized. This parameter
/// does *not* otherwise affect processing.
pub fn load_from_path(path: impl AsRef<Path>, reloading: bool) -> Result<Config> {
    let path = path.as_ref();
    let raw_config = fs::read(path).context("failed to read the configuration file")?;
    let config = parse(&raw_config, Format::from_path(path))
        .context("failed to parse the configuration file")?;

    if reloading {
        log_account_summary(&config.accounts);
    } else {
        log_config_summary(&config);
    }
    Ok(config)
}

/// Parses a configuration file's contents.
pub fn parse(raw_config: &[u8], format: Format) -> Result<Config> {
    match format {
        Format::Toml => toml::from_slice(raw_config).map_err(Into::into),
        Format::Json => serde_json::from_slice(raw_config).map_err(Into::into),
    }
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    let listen = config
        .listen
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let identity = match config.identity_header {
        Some(ref header) => format!("header {}", header.0),
        None => "passwords".to_owned(),
    };
    let mut message = format!(
        "Configuration loaded:\n\
         Listen:       {}\n\
         Identity:     {}\n\
         DNS provider: {}\n\
         TTL:          {}\n\
         Timeout:      {}s\n\
         Zones:        ",
        listen,
        identity,
        config.dns.provider.name(),
        config.dns.ttl,
        config.dns.timeout,
    );
    if config.dns.zones.is_empty() {
        message.push_str("none");
    } else {
        write!(message, "{}", config.dns.zones.len()).unwrap();
        for zone in &config.dns.zones {
            write!(message, "\n  {}", zone.0).unwrap();
        }
    }
    message.push_str("\nAccounts:     ");
    summarize_accounts(&config.accounts, &mut message);
    debug!("{}", message);
}

/// Summarizes only the accounts in the log, if the debug log level is
/// enabled. Used when reloading.
fn log_account_summary(accounts: &[RawAccount]) {
    if log_enabled!(Debug) {
        let mut message = String::from("Accounts reloaded:\nAccounts: ");
        summarize_accounts(accounts, &mut message);
        debug!("{}", message);
    }
}

/// Produces the account summary for [`log_config_summary`] and
/// [`log_account_summary`].
fn summarize_accounts(accounts: &[RawAccount], message: &mut String) {
    if accounts.is_empty() {
        message.push_str("none");
    } else {
        write!(message, "{}", accounts.len()).unwrap();
        for account in accounts {
            write!(
                message,
                "\n  {:?} ({} allowed, {} denied{})",
                account.user_id,
                account.allow_domains.len(),
                account.deny_domains.len(),
                if account.password.is_some() {
                    ", password"
                } else {
                    ""
                },
            )
            .unwrap();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: Vec<SocketAddr>,
    pub identity_header: Option<ConfigHeaderName>,
    pub dns: DnsConfig,
    #[serde(default)]
    pub accounts: Vec<RawAccount>,
}

const DEFAULT_LISTEN_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const DEFAULT_LISTEN_PORT: u16 = 9095;

fn default_listen() -> Vec<SocketAddr> {
    vec![SocketAddr::new(DEFAULT_LISTEN_IP, DEFAULT_LISTEN_PORT)]
}

impl Config {
    /// Provisions [`Accounts`] from the account configuration.
    pub fn provision_accounts(&self) -> Result<Accounts, ProvisionError> {
        Accounts::provision(
            self.accounts.clone(),
            self.identity_header.as_ref().map(|h| h.0.clone()),
        )
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: DNS                                         //
////////////////////////////////////////////////////////////////////////

/// The DNS settings, which apply to all accounts.
#[derive(Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub resolvers: Vec<String>,
    #[serde(default)]
    pub zones: Vec<ConfigName>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl DnsConfig {
    /// Creates the request pipeline described by this configuration.
    pub fn build_pipeline(&self) -> Result<ChallengeRequestPipeline> {
        if !self.resolvers.is_empty() {
            return Err(anyhow!(
                "dns.resolvers is not supported; zones are found from dns.zones"
            ));
        }
        if self.zones.is_empty() {
            warn!("No zones are configured; every request will fail zone resolution.");
        }
        let resolver: Arc<dyn ZoneResolver> =
            Arc::new(self.zones.iter().map(|z| z.0.clone()).collect::<ZoneCatalog>());
        let provider = self
            .provider
            .build()
            .context("failed to set up the DNS provider")?;
        let settings = DnsSettings {
            ttl: Ttl::from(self.ttl),
            resolvers: self.resolvers.clone(),
            timeout: Duration::from_secs(self.timeout),
        };
        Ok(ChallengeRequestPipeline::new(settings, resolver, provider))
    }
}

/// The selection of DNS provider and its configuration.
#[derive(Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "name")]
pub enum ProviderConfig {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "acmeproxy")]
    AcmeProxy(AcmeProxyConfig),
}

/// Configuration for the [`AcmeProxyProvider`].
#[derive(Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AcmeProxyConfig {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProviderConfig {
    /// Returns the name of the selected provider.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::AcmeProxy(_) => "acmeproxy",
        }
    }

    /// Creates the selected provider.
    pub fn build(&self) -> Result<Arc<dyn RecordProvider>> {
        match self {
            Self::Memory => {
                warn!("Using the in-memory DNS provider; no records will be published.");
                Ok(Arc::new(MemoryProvider::new()))
            }
            Self::AcmeProxy(config) => {
                let credentials = match (&config.username, &config.password) {
                    (Some(username), Some(password)) => Some((username.clone(), password.clone())),
                    (None, None) => None,
                    _ => {
                        return Err(anyhow!(
                            "the acmeproxy username and password must be given together"
                        ))
                    }
                };
                let endpoint = &config.endpoint;
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(anyhow!(
                        "the acmeproxy endpoint must be an http:// or https:// URL"
                    ));
                }
                Ok(Arc::new(AcmeProxyProvider::new(&config.endpoint, credentials)))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS OVER LIBRARY TYPES FOR SERDE                              //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type,
/// using its [`FromStr`](std::str::FromStr) implementation.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper.
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigName, Name, "domain name");
make_serde_wrapper!(ConfigHeaderName, HeaderName, "HTTP header name");

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
