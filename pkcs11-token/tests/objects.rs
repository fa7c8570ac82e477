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

use std::fs;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use pkcs1::der::Decode;
use pkcs11_mock::{
    CERTIFICATE_DER, CERTIFICATE_ID, CERTIFICATE_LABEL, CERTIFICATE_SUBJECT, DATA_LABEL,
    RSA_KEY_BITS, RSA_KEY_LABEL, SLOT_WITH_TOKEN,
};
use pkcs11_token::sys::*;
use pkcs11_token::{Pkcs11Library, Status, SymmetricAlgorithm};
use serial_test::serial;

static FIND_FINAL_CALLS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn failing_find_objects(
    _session: CK_SESSION_HANDLE,
    _objects: CK_OBJECT_HANDLE_PTR,
    _max_count: CK_ULONG,
    _count: CK_ULONG_PTR,
) -> CK_RV {
    CKR_DEVICE_ERROR
}

unsafe extern "C" fn counting_find_objects_final(session: CK_SESSION_HANDLE) -> CK_RV {
    FIND_FINAL_CALLS.fetch_add(1, Ordering::SeqCst);
    pkcs11_mock::C_FindObjectsFinal(session)
}

// The mock's table with a C_FindObjects that always fails. Each call leaks one table.
unsafe extern "C" fn failing_find_function_list(pp: CK_FUNCTION_LIST_PTR_PTR) -> CK_RV {
    let mut mock: CK_FUNCTION_LIST_PTR = ptr::null_mut();
    let rv = pkcs11_mock::C_GetFunctionList(&mut mock);
    if rv != CKR_OK {
        return rv;
    }
    let mut list = *mock;
    list.C_FindObjects = Some(failing_find_objects);
    list.C_FindObjectsFinal = Some(counting_find_objects_final);
    *pp = Box::into_raw(Box::new(list));
    CKR_OK
}

#[test]
#[serial]
fn object_search_needs_a_session() {
    let lib = common::mock_library();
    assert_eq!(
        lib.find_certificates().unwrap_err().status(),
        Status::SessionClosed
    );
}

#[test]
#[serial]
fn find_certificates() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();

    let certificates = lib.find_certificates().unwrap();
    assert_eq!(certificates.len(), 1);
    let cert = &certificates[0];
    assert_eq!(cert.label, CERTIFICATE_LABEL);
    assert_eq!(cert.id, CERTIFICATE_ID);
    assert_eq!(cert.subject, CERTIFICATE_SUBJECT);
    assert_eq!(cert.value, CERTIFICATE_DER);
    assert_eq!(cert.certificate_type, CKC_X_509);

    assert_eq!(lib.export_certificate(cert.handle).unwrap(), CERTIFICATE_DER);
}

#[test]
#[serial]
fn export_certificate_to_file() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    let handle = lib.find_certificates().unwrap()[0].handle;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mock.der");
    lib.export_certificate_to_file(handle, &path).unwrap();
    assert_eq!(fs::read(&path).unwrap(), CERTIFICATE_DER);

    let err = lib
        .export_certificate_to_file(handle, dir.path().join("missing").join("mock.der"))
        .unwrap_err();
    assert_eq!(err.status(), Status::FileIo);
    assert_eq!(err.rv(), None);
}

#[test]
#[serial]
fn private_keys_need_login() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    assert!(lib.find_keys(CKO_PRIVATE_KEY).unwrap().is_empty());

    let public = lib.find_keys(CKO_PUBLIC_KEY).unwrap();
    assert_eq!(public.len(), 1);
    assert_eq!(public[0].label, RSA_KEY_LABEL);
    assert_eq!(public[0].key_type, CKK_RSA);
    assert_eq!(public[0].object_class, CKO_PUBLIC_KEY);
    assert!(public[0].can_verify);
    assert!(public[0].can_encrypt);
    assert!(!public[0].can_sign);
    assert!(!public[0].can_wrap);
    drop(lib);

    let lib = common::logged_in_library();
    let private = lib.find_keys(CKO_PRIVATE_KEY).unwrap();
    assert_eq!(private.len(), 1);
    let key = &private[0];
    assert_eq!(key.id, CERTIFICATE_ID);
    assert!(key.can_sign);
    assert!(key.can_decrypt);
    assert!(!key.can_encrypt);
    assert!(key.is_sensitive);
    assert!(!key.is_extractable);
}

#[test]
#[serial]
fn data_objects_and_attributes() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    let data = lib.find_data_objects().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(
        lib.get_object_attribute(data[0], CKA_LABEL).unwrap(),
        DATA_LABEL.as_bytes()
    );
    assert_eq!(
        lib.get_object_attribute(data[0], CKA_VALUE).unwrap(),
        b"mock data"
    );

    let err = lib.get_object_attribute(data[0], CKA_MODULUS).unwrap_err();
    assert_eq!(err.status(), Status::AttributeTypeInvalid);

    let err = lib.get_object_attribute(0xdead, CKA_LABEL).unwrap_err();
    assert_eq!(err.status(), Status::ObjectHandleInvalid);
    assert!(err.is_object_error());
}

#[test]
#[serial]
fn export_rsa_public_key() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();
    let public = lib.find_keys(CKO_PUBLIC_KEY).unwrap();

    let der = lib.export_rsa_public_key(public[0].handle).unwrap();
    let key = pkcs1::RsaPublicKey::from_der(&der).unwrap();
    assert_eq!(key.modulus.as_bytes().len(), (RSA_KEY_BITS / 8) as usize);
    assert_eq!(key.public_exponent.as_bytes(), [0x01, 0x00, 0x01]);

    let certificate = lib.find_certificates().unwrap()[0].handle;
    let err = lib.export_rsa_public_key(certificate).unwrap_err();
    assert_eq!(err.status(), Status::AttributeTypeInvalid);
}

#[test]
#[serial]
fn generate_rsa_key_pair() {
    let mut lib = common::mock_library();
    lib.open_session(SLOT_WITH_TOKEN, true).unwrap();
    let err = lib.generate_rsa_key_pair(1024, "generated").unwrap_err();
    assert_eq!(err.status(), Status::UserNotLoggedIn);
    drop(lib);

    let lib = common::logged_in_library();
    let pair = lib.generate_rsa_key_pair(1024, "generated").unwrap();
    assert_eq!(pair.public_key.label, "generated");
    assert_eq!(pair.private_key.object_class, CKO_PRIVATE_KEY);
    assert!(pair.private_key.can_sign);
    assert!(pair.private_key.is_sensitive);
    assert!(pair.private_key.is_extractable);
    assert!(pair.public_key.can_verify);
    assert_eq!(
        lib.get_object_attribute(pair.private_key.handle, CKA_EXTRACTABLE).unwrap(),
        [CK_TRUE]
    );
    assert_eq!(
        lib.get_object_attribute(pair.private_key.handle, CKA_SENSITIVE).unwrap(),
        [CK_TRUE]
    );
    let private = lib.find_keys(CKO_PRIVATE_KEY).unwrap();
    let generated = private
        .iter()
        .find(|key| key.handle == pair.private_key.handle)
        .unwrap();
    assert!(generated.is_extractable);

    let modulus = lib
        .get_object_attribute(pair.public_key.handle, CKA_MODULUS)
        .unwrap();
    assert_eq!(modulus.len(), 128);
    assert_eq!(lib.find_keys(CKO_PUBLIC_KEY).unwrap().len(), 2);
    assert_eq!(lib.find_keys(CKO_PRIVATE_KEY).unwrap().len(), 2);

    let err = lib.generate_rsa_key_pair(100, "tiny").unwrap_err();
    assert_eq!(err.status(), Status::KeySizeRange);
    assert!(err.is_key_error());
}

#[test]
#[serial]
fn generate_symmetric_keys() {
    let lib = common::logged_in_library();
    let key = lib
        .generate_symmetric_key(SymmetricAlgorithm::Aes, 32, "aes")
        .unwrap();
    assert_eq!(key.key_type, CKK_AES);
    assert_eq!(key.object_class, CKO_SECRET_KEY);
    assert_eq!(
        lib.get_object_attribute(key.handle, CKA_VALUE_LEN).unwrap(),
        (32 as CK_ULONG).to_ne_bytes()
    );

    // DES lengths are fixed by the algorithm.
    let des3 = lib
        .generate_symmetric_key(SymmetricAlgorithm::Des3, 5, "des3")
        .unwrap();
    assert_eq!(
        lib.get_object_attribute(des3.handle, CKA_VALUE_LEN).unwrap(),
        (24 as CK_ULONG).to_ne_bytes()
    );

    let err = lib
        .generate_symmetric_key(SymmetricAlgorithm::Aes, 20, "odd")
        .unwrap_err();
    assert_eq!(err.status(), Status::KeySizeRange);

    // Session keys are not part of the token object search.
    assert!(lib.find_keys(CKO_SECRET_KEY).unwrap().is_empty());
}

#[test]
#[serial]
fn destroy_object() {
    let lib = common::logged_in_library();
    let key = lib
        .generate_symmetric_key(SymmetricAlgorithm::Rc4, 16, "rc4")
        .unwrap();
    lib.destroy_object(key.handle).unwrap();
    let err = lib.get_object_attribute(key.handle, CKA_LABEL).unwrap_err();
    assert_eq!(err.status(), Status::ObjectHandleInvalid);
    assert_eq!(
        lib.destroy_object(key.handle).unwrap_err().status(),
        Status::ObjectHandleInvalid
    );
}

#[test]
#[serial]
fn session_keys_vanish_with_the_session() {
    let mut lib = common::logged_in_library();
    let key = lib
        .generate_symmetric_key(SymmetricAlgorithm::Aes, 16, "aes")
        .unwrap();
    lib.open_session(SLOT_WITH_TOKEN, true).unwrap();
    let err = lib.get_object_attribute(key.handle, CKA_LABEL).unwrap_err();
    assert_eq!(err.status(), Status::ObjectHandleInvalid);
}

#[test]
#[serial]
fn failed_search_is_still_finalized() {
    common::init_tracing();
    pkcs11_mock::reset();
    FIND_FINAL_CALLS.store(0, Ordering::SeqCst);
    let mut lib = Pkcs11Library::new();
    unsafe { lib.initialize_with_function_list(failing_find_function_list, None) }.unwrap();
    lib.open_session(SLOT_WITH_TOKEN, false).unwrap();

    let err = lib.find_certificates().unwrap_err();
    assert_eq!(err.status(), Status::DeviceError);
    assert_eq!(FIND_FINAL_CALLS.load(Ordering::SeqCst), 1);

    // A search left open would make the next init fail with OperationActive.
    let err = lib.find_keys(CKO_PUBLIC_KEY).unwrap_err();
    assert_eq!(err.status(), Status::DeviceError);
    assert_eq!(FIND_FINAL_CALLS.load(Ordering::SeqCst), 2);
}
