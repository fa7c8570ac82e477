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

mod common;

use std::env;
use std::path::PathBuf;

use pkcs11_mock::{
    DEFAULT_TIMEOUT_MS, EMPTY_SLOT, LIBRARY_DESCRIPTION, MANUFACTURER_ID, MECHANISMS,
    SLOT_WITH_TOKEN, TOKEN_LABEL, TOKEN_MODEL, TOKEN_SERIAL,
};
use pkcs11_token::sys::*;
use pkcs11_token::{LibraryConfig, Pkcs11Library, Status, Version};
use serial_test::serial;

#[test]
#[serial]
fn uninitialized_library_is_rejected() {
    common::init_tracing();
    let lib = Pkcs11Library::new();
    assert!(!lib.is_initialized());
    assert_eq!(
        lib.get_info().unwrap_err().status(),
        Status::CryptokiNotInitialized
    );
    assert_eq!(
        lib.get_slot_list(true).unwrap_err().status(),
        Status::CryptokiNotInitialized
    );
}

#[test]
#[serial]
fn missing_module_fails_to_load() {
    common::init_tracing();
    let mut lib = Pkcs11Library::new();
    let config = LibraryConfig::new().with_module_path("/nonexistent/libmissing-pkcs11.so");
    let err = lib.initialize(&config).unwrap_err();
    assert_eq!(err.status(), Status::LibraryLoadFailed);
    assert_eq!(err.rv(), None);
    assert!(!lib.is_initialized());
}

#[test]
#[serial]
fn initialize_is_idempotent_and_finalize_resets() {
    let mut lib = common::mock_library();
    assert!(lib.is_initialized());
    assert!(lib.has_aux_functions());

    // A second initialize is a no-op.
    unsafe {
        lib.initialize_with_function_list(
            pkcs11_mock::C_GetFunctionList,
            Some(pkcs11_mock::E_GetAuxFunctionList),
        )
    }
    .unwrap();

    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    lib.finalize().unwrap();
    assert!(!lib.is_initialized());
    assert!(!lib.has_session());
    assert_eq!(lib.current_slot(), None);

    // Finalize twice is fine.
    lib.finalize().unwrap();

    unsafe { lib.initialize_with_function_list(pkcs11_mock::C_GetFunctionList, None) }.unwrap();
    assert!(lib.is_initialized());
    assert!(!lib.has_aux_functions());
}

#[test]
#[serial]
fn library_info() {
    let lib = common::mock_library();
    let info = lib.get_info().unwrap();
    assert_eq!(info.cryptoki_version, Version { major: 2, minor: 20 });
    assert_eq!(info.manufacturer_id, MANUFACTURER_ID);
    assert_eq!(info.library_description, LIBRARY_DESCRIPTION);
}

#[test]
#[serial]
fn slot_lists() {
    let lib = common::mock_library();
    assert_eq!(lib.get_slot_list(true).unwrap(), vec![SLOT_WITH_TOKEN]);
    assert_eq!(
        lib.get_slot_list(false).unwrap(),
        vec![SLOT_WITH_TOKEN, EMPTY_SLOT]
    );

    let slot = lib.get_slot_info(SLOT_WITH_TOKEN).unwrap();
    assert!(slot.token_present());
    assert_eq!(slot.manufacturer_id, MANUFACTURER_ID);

    let empty = lib.get_slot_info(EMPTY_SLOT).unwrap();
    assert!(!empty.token_present());

    let err = lib.get_slot_info(99).unwrap_err();
    assert_eq!(err.status(), Status::SlotIdInvalid);
}

#[test]
#[serial]
fn token_info() {
    let lib = common::mock_library();
    let info = lib.get_token_info(SLOT_WITH_TOKEN).unwrap();
    assert_eq!(info.label, TOKEN_LABEL);
    assert_eq!(info.model, TOKEN_MODEL);
    assert_eq!(info.serial_number, TOKEN_SERIAL);
    assert!(info.is_initialized());
    assert!(info.login_required());
    assert!(info.user_pin_initialized());
    assert_eq!(info.session_count, 0);

    let err = lib.get_token_info(EMPTY_SLOT).unwrap_err();
    assert_eq!(err.status(), Status::TokenNotPresent);
    assert!(err.is_token_not_present());
}

#[test]
#[serial]
fn mechanism_list() {
    let lib = common::mock_library();
    let mechanisms = lib.get_mechanism_list(SLOT_WITH_TOKEN).unwrap();
    assert_eq!(mechanisms.len(), MECHANISMS.len());
    assert!(mechanisms.contains(&CKM_SHA256_RSA_PKCS));
    assert!(mechanisms.contains(&CKM_AES_CBC_PAD));

    let err = lib.get_mechanism_list(EMPTY_SLOT).unwrap_err();
    assert!(err.is_token_not_present());
}

// The mock's cdylib, built next to the test binary or one directory up.
fn mock_shared_library() -> PathBuf {
    let name = format!(
        "{}pkcs11_mock{}",
        env::consts::DLL_PREFIX,
        env::consts::DLL_SUFFIX
    );
    let exe = env::current_exe().unwrap();
    exe.ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| panic!("{} not found near {}", name, exe.display()))
}

#[test]
#[serial]
fn load_module_from_disk() {
    common::init_tracing();
    let path = mock_shared_library();
    let mut lib = Pkcs11Library::new();
    lib.initialize(&LibraryConfig::new().with_module_path(&path))
        .unwrap();
    assert!(lib.is_initialized());
    assert!(lib.has_aux_functions());
    assert_eq!(lib.module_path(), Some(path.as_path()));

    assert_eq!(lib.get_slot_list(true).unwrap(), vec![SLOT_WITH_TOKEN]);
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    assert_eq!(lib.get_token_timeout().unwrap(), DEFAULT_TIMEOUT_MS / 1000);

    lib.finalize().unwrap();
    assert!(!lib.is_initialized());
    assert_eq!(lib.module_path(), None);

    // Without the aux lookup the vendor functions are unavailable.
    lib.initialize(&LibraryConfig::new().with_module_path(&path).with_aux(false))
        .unwrap();
    assert!(!lib.has_aux_functions());
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    assert_eq!(
        lib.get_token_timeout().unwrap_err().status(),
        Status::AuxFunctionNotAvailable
    );
}
