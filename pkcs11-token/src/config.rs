// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODULE_PATH: &str = "libshuttle_p11v220.so.1.0.0";
pub const MODULE_PATH_ENV: &str = "PKCS11_TOKEN_MODULE";

/// How [`crate::Pkcs11Library::initialize`] finds and loads the vendor module.
///
/// ```
/// use pkcs11_token::LibraryConfig;
///
/// let config = LibraryConfig::new().with_module_path("/opt/vendor/libp11.so");
/// assert!(config.load_aux());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    module_path: Option<PathBuf>,
    load_aux: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            module_path: None,
            load_aux: true,
        }
    }
}

impl LibraryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.module_path = Some(path.into());
        self
    }

    /// Whether to look up `E_GetAuxFunctionList` after loading.
    pub fn with_aux(mut self, load_aux: bool) -> Self {
        self.load_aux = load_aux;
        self
    }

    pub fn module_path(&self) -> Option<&Path> {
        self.module_path.as_deref()
    }

    pub fn load_aux(&self) -> bool {
        self.load_aux
    }

    /// Explicit path, then `$PKCS11_TOKEN_MODULE`, then the vendor default. Empty values count
    /// as unset.
    pub fn resolve_module_path(&self) -> PathBuf {
        if let Some(path) = self.module_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            return path.clone();
        }
        match env::var_os(MODULE_PATH_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_MODULE_PATH),
        }
    }
}
