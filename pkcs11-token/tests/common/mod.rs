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

use std::sync::Once;

use pkcs11_mock::{C_GetFunctionList, E_GetAuxFunctionList, SLOT_WITH_TOKEN, USER_PIN};
use pkcs11_token::{Pkcs11Library, UserType};
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().with_test_writer())
            .with(ErrorLayer::default())
            .try_init();
    });
}

// A library bound to a freshly reset mock module.
pub fn mock_library() -> Pkcs11Library {
    init_tracing();
    pkcs11_mock::reset();
    let mut lib = Pkcs11Library::new();
    unsafe { lib.initialize_with_function_list(C_GetFunctionList, Some(E_GetAuxFunctionList)) }
        .unwrap();
    lib
}

// A library without the vendor extension table.
#[allow(dead_code)]
pub fn mock_library_without_aux() -> Pkcs11Library {
    init_tracing();
    pkcs11_mock::reset();
    let mut lib = Pkcs11Library::new();
    unsafe { lib.initialize_with_function_list(C_GetFunctionList, None) }.unwrap();
    lib
}

// Read-write session on the token slot with the normal user logged in.
#[allow(dead_code)]
pub fn logged_in_library() -> Pkcs11Library {
    let mut lib = mock_library();
    lib.open_session(SLOT_WITH_TOKEN, true).unwrap();
    lib.login(USER_PIN, UserType::User).unwrap();
    lib
}
