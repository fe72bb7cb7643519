// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Opaque secrets.

use std::collections::BTreeMap;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::{ObjectKey, ObjectMeta};
use crate::error::{EstError, Result};

/// A secret whose values are base64-encoded.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Base64-encoded values by key.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("metadata", &self.metadata)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Secret {
    /// Identity of the secret.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Decode the value stored under `field`.
    ///
    /// # Errors
    ///
    /// Returns [`EstError::MissingCredential`] if the field is absent or is
    /// not valid base64.
    pub fn decode(&self, field: &str) -> Result<Vec<u8>> {
        let value = self.data.get(field).ok_or_else(|| {
            EstError::missing_credential(format!("secret {} has no '{}' field", self.key(), field))
        })?;

        let cleaned: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        BASE64_STANDARD.decode(cleaned).map_err(|e| {
            EstError::missing_credential(format!(
                "secret {} field '{}' is not valid base64: {}",
                self.key(),
                field,
                e
            ))
        })
    }

    /// Decode the value stored under `field` as UTF-8 text.
    pub fn decode_string(&self, field: &str) -> Result<String> {
        String::from_utf8(self.decode(field)?).map_err(|_| {
            EstError::missing_credential(format!(
                "secret {} field '{}' is not valid UTF-8",
                self.key(),
                field
            ))
        })
    }
}
