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

//! Implements command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// A proxy for answering ACME DNS-01 challenges
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the proxy
    Run(RunArgs),

    /// Hash a password for use in the configuration file
    HashPassword(HashPasswordArgs),

    /// Print the version
    Version,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Set the configuration file to use (TOML if it ends in .toml,
    /// JSON otherwise)
    #[clap(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Enable debug logging
    #[clap(long)]
    pub debug: bool,
}

#[derive(Debug, Parser)]
pub struct HashPasswordArgs {
    /// The password to hash; read from standard input if omitted
    #[clap(long, value_name = "PASSWORD")]
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_config() {
        assert!(Args::try_parse_from(["dns01proxyd", "run"]).is_err());
        let args =
            Args::try_parse_from(["dns01proxyd", "run", "--config", "proxy.toml", "--debug"])
                .unwrap();
        match args.command {
            Command::Run(run_args) => {
                assert_eq!(run_args.config, PathBuf::from("proxy.toml"));
                assert!(run_args.debug);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn hash_password_takes_optional_password() {
        let args = Args::try_parse_from(["dns01proxyd", "hash-password"]).unwrap();
        assert!(matches!(
            args.command,
            Command::HashPassword(HashPasswordArgs { password: None })
        ));
        let args =
            Args::try_parse_from(["dns01proxyd", "hash-password", "--password", "pw"]).unwrap();
        assert!(matches!(
            args.command,
            Command::HashPassword(HashPasswordArgs { password: Some(ref p) }) if p == "pw"
        ));
    }
}
