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

//! Implementation of the [`ProvisionError`] type.

use std::fmt;

use crate::identity::HashError;
use crate::policy::PatternError;

/// Errors that abort provisioning. A failed provisioning never exposes
/// a partially built registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProvisionError {
    /// Two accounts share a user ID. `index` is the position of the
    /// second occurrence in the account list.
    DuplicateUserId { index: usize, user_id: String },

    /// An account's domain policy failed to compile.
    InvalidPolicy {
        user_id: String,
        source: PatternError,
    },

    /// An account's password hash is malformed.
    InvalidPasswordHash { user_id: String, source: HashError },
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DuplicateUserId { index, user_id } => {
                write!(f, "account {}: user ID is not unique: {:?}", index, user_id)
            }
            Self::InvalidPolicy { user_id, .. } => write!(
                f,
                "unable to provision client policy for user ID {:?}",
                user_id
            ),
            Self::InvalidPasswordHash { user_id, .. } => {
                write!(f, "invalid password hash for user ID {:?}", user_id)
            }
        }
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DuplicateUserId { .. } => None,
            Self::InvalidPolicy { source, .. } => Some(source),
            Self::InvalidPasswordHash { source, .. } => Some(source),
        }
    }
}
