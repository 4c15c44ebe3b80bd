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

//! The dns01proxy daemon.

use std::io::{self, BufRead};
use std::process;

use anyhow::{anyhow, Context, Result};

use crate::args::{Command, HashPasswordArgs};

mod args;
mod config;
mod run;

fn main() {
    match args::parse().command {
        Command::Run(run_args) => run::run(run_args),
        Command::HashPassword(hash_args) => {
            if let Err(e) = hash_password(hash_args) {
                eprintln!("Failed to hash the password: {:#}", e);
                process::exit(1);
            }
        }
        Command::Version => println!("{}", dns01proxy::version()),
    }
}

/// Implements the `hash-password` command.
fn hash_password(args: HashPasswordArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => {
            eprintln!("Enter the password to hash:");
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read the password")?;
            line.trim_end_matches(&['\r', '\n'][..]).to_owned()
        }
    };
    if password.is_empty() {
        return Err(anyhow!("the password is empty"));
    }
    let hash = dns01proxy::identity::hash_password(&password)
        .context("failed to hash the password")?;
    println!("{}", hash);
    Ok(())
}
