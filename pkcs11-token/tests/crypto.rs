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

use pkcs11_mock::RSA_KEY_BITS;
use pkcs11_token::sys::*;
use pkcs11_token::{CipherMode, HashAlgorithm, Pkcs11Library, Status, SymmetricAlgorithm};
use serial_test::serial;
use strum::IntoEnumIterator;

// Handles of the fixture RSA key pair: (public, private).
fn fixture_key_pair(lib: &Pkcs11Library) -> (CK_OBJECT_HANDLE, CK_OBJECT_HANDLE) {
    let public = lib.find_keys(CKO_PUBLIC_KEY).unwrap();
    let private = lib.find_keys(CKO_PRIVATE_KEY).unwrap();
    (public[0].handle, private[0].handle)
}

#[test]
#[serial]
fn sign_and_verify() {
    let lib = common::logged_in_library();
    let (public, private) = fixture_key_pair(&lib);
    let data = b"data to be signed";

    for hash in HashAlgorithm::iter() {
        let signature = lib.sign(private, data, hash).unwrap();
        assert_eq!(signature.len(), (RSA_KEY_BITS / 8) as usize, "{}", hash);
        lib.verify(public, data, &signature, hash).unwrap();
    }

    let signature = lib.sign(private, data, HashAlgorithm::Sha256).unwrap();
    let err = lib
        .verify(public, b"tampered data", &signature, HashAlgorithm::Sha256)
        .unwrap_err();
    assert_eq!(err.status(), Status::SignatureInvalid);

    let mut tampered = signature.clone();
    tampered[0] ^= 0xff;
    let err = lib
        .verify(public, data, &tampered, HashAlgorithm::Sha256)
        .unwrap_err();
    assert_eq!(err.status(), Status::SignatureInvalid);

    // The hash is part of the signature.
    let err = lib
        .verify(public, data, &signature, HashAlgorithm::Sha1)
        .unwrap_err();
    assert_eq!(err.status(), Status::SignatureInvalid);

    let err = lib
        .verify(public, data, &signature[..16], HashAlgorithm::Sha256)
        .unwrap_err();
    assert_eq!(err.status(), Status::SignatureLenRange);
}

#[test]
#[serial]
fn signing_needs_the_right_key() {
    let mut lib = common::logged_in_library();
    let (public, private) = fixture_key_pair(&lib);

    let err = lib.sign(public, b"data", HashAlgorithm::Sha256).unwrap_err();
    assert_eq!(err.status(), Status::KeyTypeInconsistent);
    assert!(err.is_key_error());

    // Failed operations do not leave anything active.
    lib.sign(private, b"data", HashAlgorithm::Sha256).unwrap();

    // The private key disappears with the login.
    lib.logout().unwrap();
    let err = lib.sign(private, b"data", HashAlgorithm::Sha256).unwrap_err();
    assert_eq!(err.status(), Status::KeyHandleInvalid);
}

#[test]
#[serial]
fn symmetric_round_trips() {
    let lib = common::logged_in_library();
    let cases = [
        (SymmetricAlgorithm::Des, 8, 8),
        (SymmetricAlgorithm::Des3, 24, 8),
        (SymmetricAlgorithm::Rc2, 16, 8),
        (SymmetricAlgorithm::Aes, 16, 16),
        (SymmetricAlgorithm::Aes, 32, 16),
    ];
    let aligned = [0x5au8; 32];
    let unaligned = b"not a multiple of the block size";

    for (algorithm, key_len, block) in cases {
        let key = lib
            .generate_symmetric_key(algorithm, key_len, "cipher")
            .unwrap()
            .handle;
        let iv = vec![7u8; block];

        for mode in [CipherMode::Ecb, CipherMode::Cbc] {
            let ct = lib.encrypt(key, &aligned, algorithm, mode, &iv).unwrap();
            assert_eq!(ct.len(), aligned.len());
            assert_ne!(ct, aligned);
            let pt = lib.decrypt(key, &ct, algorithm, mode, &iv).unwrap();
            assert_eq!(pt, aligned, "{} {}", algorithm, mode);
        }

        let ct = lib
            .encrypt(key, &unaligned[..], algorithm, CipherMode::CbcPad, &iv)
            .unwrap();
        assert_eq!(ct.len() % block, 0);
        assert!(ct.len() > unaligned.len());
        let pt = lib
            .decrypt(key, &ct, algorithm, CipherMode::CbcPad, &iv)
            .unwrap();
        assert_eq!(pt, &unaligned[..]);
    }
}

#[test]
#[serial]
fn rc4_is_a_stream_cipher() {
    let lib = common::logged_in_library();
    let key = lib
        .generate_symmetric_key(SymmetricAlgorithm::Rc4, 16, "rc4")
        .unwrap()
        .handle;
    let data = b"any length at all";
    // The IV is ignored.
    let ct = lib
        .encrypt(key, data, SymmetricAlgorithm::Rc4, CipherMode::Cbc, &[])
        .unwrap();
    assert_eq!(ct.len(), data.len());
    let pt = lib
        .decrypt(key, &ct, SymmetricAlgorithm::Rc4, CipherMode::Ecb, &[])
        .unwrap();
    assert_eq!(pt, data);
}

#[test]
#[serial]
fn symmetric_parameter_errors() {
    let lib = common::logged_in_library();
    let key = lib
        .generate_symmetric_key(SymmetricAlgorithm::Aes, 16, "aes")
        .unwrap()
        .handle;

    let err = lib
        .encrypt(key, &[0; 16], SymmetricAlgorithm::Aes, CipherMode::Cbc, &[])
        .unwrap_err();
    assert_eq!(err.status(), Status::InvalidParameter);
    assert_eq!(err.rv(), None);

    let err = lib
        .encrypt(key, &[0; 16], SymmetricAlgorithm::Aes, CipherMode::Cbc, &[1; 8])
        .unwrap_err();
    assert_eq!(err.status(), Status::MechanismParamInvalid);

    let err = lib
        .encrypt(key, &[0; 15], SymmetricAlgorithm::Aes, CipherMode::Ecb, &[])
        .unwrap_err();
    assert_eq!(err.status(), Status::DataLenRange);

    let err = lib
        .encrypt(key, &[0; 16], SymmetricAlgorithm::Des, CipherMode::Ecb, &[])
        .unwrap_err();
    assert_eq!(err.status(), Status::KeyTypeInconsistent);

    // Still usable after the failures above.
    lib.encrypt(key, &[0; 16], SymmetricAlgorithm::Aes, CipherMode::Ecb, &[])
        .unwrap();
}

#[test]
#[serial]
fn rsa_encrypt_and_decrypt() {
    let lib = common::logged_in_library();
    let (public, private) = fixture_key_pair(&lib);

    let ct = lib.encrypt_rsa(public, b"top secret").unwrap();
    assert_eq!(ct.len(), (RSA_KEY_BITS / 8) as usize);
    assert_eq!(lib.decrypt_rsa(private, &ct).unwrap(), b"top secret");

    let too_long = vec![1u8; (RSA_KEY_BITS / 8) as usize - 10];
    let err = lib.encrypt_rsa(public, &too_long).unwrap_err();
    assert_eq!(err.status(), Status::DataLenRange);

    let err = lib.decrypt_rsa(public, &ct).unwrap_err();
    assert_eq!(err.status(), Status::KeyTypeInconsistent);
}

#[test]
#[serial]
fn generated_key_pair_signs() {
    let lib = common::logged_in_library();
    let pair = lib.generate_rsa_key_pair(1024, "signer").unwrap();
    let signature = lib
        .sign(pair.private_key.handle, b"payload", HashAlgorithm::Sha512)
        .unwrap();
    assert_eq!(signature.len(), 128);
    lib.verify(
        pair.public_key.handle,
        b"payload",
        &signature,
        HashAlgorithm::Sha512,
    )
    .unwrap();

    // Another key pair does not verify it.
    let (other_public, _) = fixture_key_pair(&lib);
    let err = lib
        .verify(other_public, b"payload", &signature, HashAlgorithm::Sha512)
        .unwrap_err();
    assert_eq!(err.status(), Status::SignatureLenRange);
}

#[test]
#[serial]
fn random_bytes() {
    let lib = common::logged_in_library();
    let a = lib.generate_random(32).unwrap();
    let b = lib.generate_random(32).unwrap();
    assert_eq!(a.len(), 32);
    assert_ne!(a, b);
}
