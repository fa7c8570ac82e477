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

use std::thread;
use std::time::Duration;

use pkcs11_mock::{
    push_slot_event, DEFAULT_TIMEOUT_MS, EMPTY_SLOT, SLOT_EVENT_TOKEN_INSERTED,
    SLOT_EVENT_TOKEN_REMOVED, SLOT_WITH_TOKEN, SO_PIN, SO_PIN_MAX_RETRIES, TOKEN_LABEL, USER_PIN,
    USER_PIN_MAX_RETRIES,
};
use pkcs11_token::sys::CK_ULONG;
use pkcs11_token::{SlotEvent, Status, UserType};
use serial_test::serial;

#[test]
#[serial]
fn vendor_functions_need_a_session() {
    let lib = common::mock_library();
    assert_eq!(lib.get_pin_info().unwrap_err().status(), Status::SessionClosed);
    assert_eq!(
        lib.wait_for_slot_event(false).unwrap_err().status(),
        Status::SessionClosed
    );
}

#[test]
#[serial]
fn vendor_functions_need_the_aux_table() {
    let mut lib = common::mock_library_without_aux();
    lib.open_session(SLOT_WITH_TOKEN, true).unwrap();
    for err in [
        lib.get_pin_info().unwrap_err(),
        lib.set_token_label("label").unwrap_err(),
        lib.get_token_timeout().unwrap_err(),
        lib.blank_token(SO_PIN).unwrap_err(),
    ] {
        assert_eq!(err.status(), Status::AuxFunctionNotAvailable);
        assert_eq!(err.rv(), None);
    }
    // Standard functions still work.
    assert!(lib.find_certificates().is_ok());
}

#[test]
#[serial]
fn pin_info() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, true).unwrap();
    let info = lib.get_pin_info().unwrap();
    assert_eq!(info.user_max_retries, USER_PIN_MAX_RETRIES);
    assert_eq!(info.user_cur_counter, USER_PIN_MAX_RETRIES);
    assert_eq!(info.so_max_retries, SO_PIN_MAX_RETRIES);
    assert_eq!(info.so_cur_counter, SO_PIN_MAX_RETRIES);

    lib.login("0000", UserType::So).unwrap_err();
    let info = lib.get_pin_info().unwrap();
    assert_eq!(info.so_cur_counter, SO_PIN_MAX_RETRIES - 1);
    assert_eq!(info.user_cur_counter, USER_PIN_MAX_RETRIES);
}

#[test]
#[serial]
fn token_label() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, true).unwrap();
    assert_eq!(lib.get_token_info(SLOT_WITH_TOKEN).unwrap().label, TOKEN_LABEL);
    lib.set_token_label("Renamed Token").unwrap();
    assert_eq!(
        lib.get_token_info(SLOT_WITH_TOKEN).unwrap().label,
        "Renamed Token"
    );

    let err = lib.set_token_label(&"x".repeat(33)).unwrap_err();
    assert_eq!(err.status(), Status::ArgumentsBad);

    let err = lib.set_token_label("bad\0label").unwrap_err();
    assert_eq!(err.status(), Status::InvalidParameter);

    assert_eq!(
        lib.get_token_info(SLOT_WITH_TOKEN).unwrap().label,
        "Renamed Token"
    );
}

#[test]
#[serial]
fn token_timeout_in_seconds() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    assert_eq!(lib.get_token_timeout().unwrap(), DEFAULT_TIMEOUT_MS / 1000);
    lib.set_token_timeout(30).unwrap();
    assert_eq!(lib.get_token_timeout().unwrap(), 30);

    let err = lib.set_token_timeout(CK_ULONG::MAX).unwrap_err();
    assert_eq!(err.status(), Status::InvalidParameter);
}

#[test]
#[serial]
fn blank_token() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, true).unwrap();

    let err = lib.blank_token("00000000").unwrap_err();
    assert_eq!(err.status(), Status::PinIncorrect);
    assert_eq!(lib.find_certificates().unwrap().len(), 1);

    lib.blank_token(SO_PIN).unwrap();
    assert!(lib.find_certificates().unwrap().is_empty());
    assert!(lib.find_data_objects().unwrap().is_empty());
    let info = lib.get_token_info(SLOT_WITH_TOKEN).unwrap();
    assert!(!info.user_pin_initialized());
    assert_eq!(info.label, "");

    let err = lib.login(USER_PIN, UserType::User).unwrap_err();
    assert_eq!(err.status(), Status::UserPinNotInitialized);

    // The SO can set up a new user PIN.
    lib.login(SO_PIN, UserType::So).unwrap();
    lib.init_pin("24681357").unwrap();
    lib.logout().unwrap();
    lib.login("24681357", UserType::User).unwrap();
}

#[test]
#[serial]
fn poll_for_slot_events() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    assert_eq!(lib.wait_for_slot_event(false).unwrap(), None);

    push_slot_event(EMPTY_SLOT, SLOT_EVENT_TOKEN_INSERTED);
    push_slot_event(EMPTY_SLOT, SLOT_EVENT_TOKEN_REMOVED);
    assert_eq!(
        lib.wait_for_slot_event(false).unwrap(),
        Some(SlotEvent {
            slot_id: EMPTY_SLOT,
            event: SLOT_EVENT_TOKEN_INSERTED,
        })
    );
    assert_eq!(
        lib.wait_for_slot_event(false).unwrap(),
        Some(SlotEvent {
            slot_id: EMPTY_SLOT,
            event: SLOT_EVENT_TOKEN_REMOVED,
        })
    );
    assert_eq!(lib.wait_for_slot_event(false).unwrap(), None);
}

#[test]
#[serial]
fn block_for_slot_event() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();

    let pusher = thread::spawn(|| {
        thread::sleep(Duration::from_millis(50));
        push_slot_event(SLOT_WITH_TOKEN, SLOT_EVENT_TOKEN_REMOVED);
    });
    let event = lib.wait_for_slot_event(true).unwrap();
    pusher.join().unwrap();
    assert_eq!(
        event,
        Some(SlotEvent {
            slot_id: SLOT_WITH_TOKEN,
            event: SLOT_EVENT_TOKEN_REMOVED,
        })
    );
}
