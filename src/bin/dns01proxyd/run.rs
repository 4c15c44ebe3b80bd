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

//! Implements the `run` command (i.e., running the proxy).

use std::fmt::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info, warn};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use dns01proxy::proxy::Proxy;

use crate::args::RunArgs;
use crate::config::{self, Config};

/// Runs the proxy.
pub fn run(args: RunArgs) {
    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::init_from_env(Env::new().default_filter_or(default_filter));

    if let Err(e) = try_running(args) {
        error!("{}", describe_failure("Failed to run:", &e));
        process::exit(1);
    }
    info!("Exiting with success.");
}

/// Formats an error and its causes as a numbered list.
fn describe_failure(heading: &str, e: &anyhow::Error) -> String {
    let mut message = String::from(heading);
    for (i, cause) in e.chain().enumerate() {
        write!(message, "\n[{}] {}", i + 1, cause).unwrap();
    }
    message
}

fn try_running(run_args: RunArgs) -> Result<()> {
    info!("{} starting.", dns01proxy::version());

    info!("Loading the configuration from {}.", run_args.config.display());
    let config = config::load_from_path(&run_args.config, false)
        .context("failed to load the configuration")?;

    // Set up the proxy. Provisioning is cheap, but it is still better
    // to fail before anything is bound.
    let pipeline = config
        .dns
        .build_pipeline()
        .context("failed to set up the DNS settings")?;
    let accounts = config
        .provision_accounts()
        .context("failed to provision the accounts")?;
    info!("Provisioned {} accounts.", accounts.registry().len());
    let proxy = Arc::new(Proxy::new(pipeline, Arc::new(accounts)));

    // Start the runtime and bind every listener before serving on any.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let listeners = runtime
        .block_on(bind_all(&config.listen))
        .context("failed to bind sockets")?;

    // Set up signal handling.
    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;

    // Start serving.
    info!("Set-up is complete; starting the proxy.");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let servers = start_servers(&runtime, &proxy, listeners, shutdown_rx);

    // Process incoming signals.
    for signal in signals.forever() {
        match signal {
            s @ (SIGINT | SIGTERM) => {
                let name = match s {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    _ => unreachable!(),
                };
                info!("Received {}; shutting down.", name);
                break;
            }
            SIGHUP => {
                info!("Received SIGHUP; reloading accounts.");
                if let Err(e) = reload_accounts(&run_args.config, &config, &proxy) {
                    error!(
                        "{}\nThe previous accounts remain in effect.",
                        describe_failure("Failed to reload accounts:", &e)
                    );
                }
            }
            _ => unreachable!(),
        }
    }

    // Shut down the servers, letting in-flight requests finish.
    let _ = shutdown_tx.send(true);
    runtime.block_on(async {
        for server in servers {
            match server.await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => warn!("A listener failed: {}.", e),
                Err(e) => warn!("A listener task failed: {}.", e),
            }
        }
    });
    info!("Shutdown complete.");
    Ok(())
}

async fn bind_all(addrs: &[SocketAddr]) -> Result<Vec<TcpListener>> {
    let mut listeners = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("Listening on {}.", addr);
        listeners.push(listener);
    }
    Ok(listeners)
}

fn start_servers(
    runtime: &Runtime,
    proxy: &Arc<Proxy>,
    listeners: Vec<TcpListener>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<std::io::Result<()>>> {
    listeners
        .into_iter()
        .map(|listener| {
            let router = proxy.clone().router();
            let mut shutdown = shutdown.clone();
            runtime.spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.changed().await;
                    })
                    .await
            })
        })
        .collect()
}

fn set_up_signal_handling() -> Result<Signals> {
    let all_signals = &[SIGHUP, SIGINT, SIGTERM];
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // This sets up signal handlers to exit immediately if a second
    // termination signal arrives before the process finishes shutting
    // down gracefully.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(all_signals).map_err(Into::into)
}

/// Reloads the configuration file and replaces the proxy's accounts.
/// Only the accounts (and the identity header, which belongs with
/// them) take effect; other changes are reported and ignored.
fn reload_accounts(path: &Path, current: &Config, proxy: &Proxy) -> Result<()> {
    let config =
        config::load_from_path(path, true).context("failed to reload the configuration")?;
    if config.listen != current.listen {
        warn!("The listen addresses changed; this requires a restart to take effect.");
    }
    if config.dns != current.dns {
        warn!("The DNS settings changed; this requires a restart to take effect.");
    }

    let accounts = config
        .provision_accounts()
        .context("failed to provision the accounts")?;
    info!("Reloaded {} accounts.", accounts.registry().len());
    proxy.set_accounts(Arc::new(accounts));
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    const ONE_ACCOUNT: &str = r#"{
        "dns": {"provider": {"name": "memory"}, "zones": ["example.com"]},
        "accounts": [{"user_id": "host1"}]
    }"#;

    /// Writes a configuration file unique to this process and test.
    fn write_config(test: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "dns01proxyd-{}-{}.json",
            process::id(),
            test
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    fn start(path: &Path) -> (Config, Proxy) {
        let config = config::load_from_path(path, false).unwrap();
        let proxy = Proxy::new(
            config.dns.build_pipeline().unwrap(),
            Arc::new(config.provision_accounts().unwrap()),
        );
        (config, proxy)
    }

    #[test]
    fn failed_reload_keeps_previous_accounts() {
        let path = write_config("failed-reload", ONE_ACCOUNT);
        let (config, proxy) = start(&path);
        let before = proxy.accounts();

        fs::write(
            &path,
            r#"{
                "dns": {"provider": {"name": "memory"}, "zones": ["example.com"]},
                "accounts": [{"user_id": "host1"}, {"user_id": "host1"}]
            }"#,
        )
        .unwrap();
        let duplicate = reload_accounts(&path, &config, &proxy);
        fs::write(&path, "not a configuration").unwrap();
        let unparseable = reload_accounts(&path, &config, &proxy);
        fs::remove_file(&path).unwrap();
        let missing = reload_accounts(&path, &config, &proxy);

        assert!(duplicate.is_err());
        assert!(unparseable.is_err());
        assert!(missing.is_err());
        assert!(Arc::ptr_eq(&before, &proxy.accounts()));
    }

    #[test]
    fn reload_replaces_accounts() {
        let path = write_config("reload", ONE_ACCOUNT);
        let (config, proxy) = start(&path);
        let before = proxy.accounts();

        fs::write(
            &path,
            r#"{
                "dns": {"provider": {"name": "memory"}, "ttl": 60},
                "accounts": [{"user_id": "host1"}, {"user_id": "host2"}]
            }"#,
        )
        .unwrap();
        let result = reload_accounts(&path, &config, &proxy);
        fs::remove_file(&path).unwrap();

        assert!(result.is_ok());
        let after = proxy.accounts();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.registry().len(), 2);
        assert!(after.registry().lookup("host2").is_some());

        // DNS changes are reported but not applied.
        assert_eq!(proxy.pipeline().settings().ttl, dns01proxy::dns::Ttl::ZERO);
    }
}
