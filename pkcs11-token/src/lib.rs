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

//! Result-oriented access to a vendor PKCS #11 token module.
//!
//! The module is loaded at runtime and driven through its `CK_FUNCTION_LIST`, plus the vendor
//! auxiliary table for PIN counters, token label and timeout, blanking and slot events. Every
//! failure comes back as an [`Error`] carrying a translated [`Status`] and the raw return code.

mod attribute;
pub mod config;
pub mod error;
mod guard;
mod library;
mod loader;
pub mod mechanism;
pub mod types;
pub mod util;

pub use config::{LibraryConfig, DEFAULT_MODULE_PATH, MODULE_PATH_ENV};
pub use error::{rv_to_string, Error, Result, Status};
pub use guard::SessionGuard;
pub use library::Pkcs11Library;
pub use loader::{GetAuxFunctionListFn, GetFunctionListFn};
pub use mechanism::{
    signature_mechanism, symmetric_mechanism, AsymmetricAlgorithm, CipherMode, HashAlgorithm,
    Mechanism, SymmetricAlgorithm,
};
pub use types::{
    CertificateInfo, KeyInfo, KeyPair, LibraryInfo, PinInfo, SessionInfo, SlotEvent, SlotInfo,
    TokenInfo, UserType, Version,
};
pub use util::{bytes_to_hex, hex_to_bytes};

pub use pkcs11_sys as sys;
