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

use std::ptr;

use pkcs11_sys::*;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{Result, Status};
use crate::errorf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Md5,
}

impl HashAlgorithm {
    pub fn rsa_pkcs_mechanism(self) -> CK_MECHANISM_TYPE {
        match self {
            HashAlgorithm::Sha1 => CKM_SHA1_RSA_PKCS,
            HashAlgorithm::Sha224 => CKM_SHA224_RSA_PKCS,
            HashAlgorithm::Sha256 => CKM_SHA256_RSA_PKCS,
            HashAlgorithm::Sha384 => CKM_SHA384_RSA_PKCS,
            HashAlgorithm::Sha512 => CKM_SHA512_RSA_PKCS,
            HashAlgorithm::Md5 => CKM_MD5_RSA_PKCS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum SymmetricAlgorithm {
    #[default]
    Des,
    Des3,
    Rc2,
    Rc4,
    Aes,
}

impl SymmetricAlgorithm {
    pub fn key_type(self) -> CK_KEY_TYPE {
        match self {
            SymmetricAlgorithm::Des => CKK_DES,
            SymmetricAlgorithm::Des3 => CKK_DES3,
            SymmetricAlgorithm::Rc2 => CKK_RC2,
            SymmetricAlgorithm::Rc4 => CKK_RC4,
            SymmetricAlgorithm::Aes => CKK_AES,
        }
    }

    pub fn key_gen_mechanism(self) -> CK_MECHANISM_TYPE {
        match self {
            SymmetricAlgorithm::Des => CKM_DES_KEY_GEN,
            SymmetricAlgorithm::Des3 => CKM_DES3_KEY_GEN,
            SymmetricAlgorithm::Rc2 => CKM_RC2_KEY_GEN,
            SymmetricAlgorithm::Rc4 => CKM_RC4_KEY_GEN,
            SymmetricAlgorithm::Aes => CKM_AES_KEY_GEN,
        }
    }

    // DES and DES3 keys have a fixed size whatever the caller asks for.
    pub fn key_length(self, requested: CK_ULONG) -> CK_ULONG {
        match self {
            SymmetricAlgorithm::Des => 8,
            SymmetricAlgorithm::Des3 => 24,
            _ => requested,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum CipherMode {
    Ecb,
    #[default]
    Cbc,
    CbcPad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum AsymmetricAlgorithm {
    Rsa,
    Dsa,
    Ecdsa,
}

/// A mechanism type plus its optional parameter, borrowed from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mechanism<'a> {
    mechanism_type: CK_MECHANISM_TYPE,
    parameter: Option<&'a [u8]>,
}

impl<'a> Mechanism<'a> {
    pub fn new(mechanism_type: CK_MECHANISM_TYPE) -> Self {
        Mechanism {
            mechanism_type,
            parameter: None,
        }
    }

    pub fn with_parameter(mechanism_type: CK_MECHANISM_TYPE, parameter: &'a [u8]) -> Self {
        Mechanism {
            mechanism_type,
            parameter: Some(parameter),
        }
    }

    pub fn mechanism_type(&self) -> CK_MECHANISM_TYPE {
        self.mechanism_type
    }

    pub fn parameter(&self) -> Option<&'a [u8]> {
        self.parameter
    }

    // The returned struct points into the borrowed parameter and must not outlive it.
    pub(crate) fn to_raw(&self) -> CK_MECHANISM {
        match self.parameter {
            Some(param) => CK_MECHANISM {
                mechanism: self.mechanism_type,
                pParameter: param.as_ptr() as CK_VOID_PTR,
                ulParameterLen: param.len() as CK_ULONG,
            },
            None => CK_MECHANISM {
                mechanism: self.mechanism_type,
                pParameter: ptr::null_mut(),
                ulParameterLen: 0,
            },
        }
    }
}

/// Picks the cipher mechanism for an algorithm and mode. CBC modes take the IV as parameter;
/// ECB and RC4 take none.
pub fn symmetric_mechanism(
    algorithm: SymmetricAlgorithm,
    mode: CipherMode,
    iv: &[u8],
) -> Result<Mechanism<'_>> {
    use CipherMode::*;
    use SymmetricAlgorithm::*;

    let mechanism_type = match (algorithm, mode) {
        (Rc4, _) => return Ok(Mechanism::new(CKM_RC4)),
        (Des, Ecb) => CKM_DES_ECB,
        (Des, Cbc) => CKM_DES_CBC,
        (Des, CbcPad) => CKM_DES_CBC_PAD,
        (Des3, Ecb) => CKM_DES3_ECB,
        (Des3, Cbc) => CKM_DES3_CBC,
        (Des3, CbcPad) => CKM_DES3_CBC_PAD,
        (Rc2, Ecb) => CKM_RC2_ECB,
        (Rc2, Cbc) => CKM_RC2_CBC,
        (Rc2, CbcPad) => CKM_RC2_CBC_PAD,
        (Aes, Ecb) => CKM_AES_ECB,
        (Aes, Cbc) => CKM_AES_CBC,
        (Aes, CbcPad) => CKM_AES_CBC_PAD,
    };
    if mode == Ecb {
        return Ok(Mechanism::new(mechanism_type));
    }
    if iv.is_empty() {
        return Err(errorf!(
            Status::InvalidParameter,
            "{} {} requires an IV",
            algorithm,
            mode
        ));
    }
    Ok(Mechanism::with_parameter(mechanism_type, iv))
}

pub fn signature_mechanism(
    hash: HashAlgorithm,
    algorithm: AsymmetricAlgorithm,
) -> Result<Mechanism<'static>> {
    match algorithm {
        AsymmetricAlgorithm::Rsa => Ok(Mechanism::new(hash.rsa_pkcs_mechanism())),
        AsymmetricAlgorithm::Dsa | AsymmetricAlgorithm::Ecdsa => Err(errorf!(
            Status::UnsupportedAlgorithm,
            "{} signatures are not supported",
            algorithm
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn defaults() {
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Sha1);
        assert_eq!(SymmetricAlgorithm::default(), SymmetricAlgorithm::Des);
        assert_eq!(CipherMode::default(), CipherMode::Cbc);
    }

    #[test]
    fn parse_names() {
        assert_eq!(HashAlgorithm::from_str("sha256").unwrap(), HashAlgorithm::Sha256);
        assert_eq!(SymmetricAlgorithm::from_str("des3").unwrap(), SymmetricAlgorithm::Des3);
        assert_eq!(CipherMode::from_str("cbc-pad").unwrap(), CipherMode::CbcPad);
        assert_eq!(CipherMode::CbcPad.to_string(), "cbc-pad");
        assert!(HashAlgorithm::from_str("sha3").is_err());
    }

    #[test]
    fn cbc_modes_carry_the_iv() {
        let iv = [7u8; 16];
        let mech = symmetric_mechanism(SymmetricAlgorithm::Aes, CipherMode::CbcPad, &iv).unwrap();
        assert_eq!(mech.mechanism_type(), CKM_AES_CBC_PAD);
        let raw = mech.to_raw();
        assert_eq!(raw.ulParameterLen, 16);
        assert_eq!(raw.pParameter as *const u8, iv.as_ptr());

        let mech = symmetric_mechanism(SymmetricAlgorithm::Des, CipherMode::Ecb, &iv).unwrap();
        assert_eq!(mech.mechanism_type(), CKM_DES_ECB);
        assert!(mech.parameter().is_none());
        assert!(mech.to_raw().pParameter.is_null());
    }

    #[test]
    fn rc4_ignores_mode() {
        for mode in CipherMode::iter() {
            let mech = symmetric_mechanism(SymmetricAlgorithm::Rc4, mode, &[]).unwrap();
            assert_eq!(mech.mechanism_type(), CKM_RC4);
            assert!(mech.parameter().is_none());
        }
    }

    #[test]
    fn cbc_without_iv_is_rejected() {
        for algorithm in [
            SymmetricAlgorithm::Des,
            SymmetricAlgorithm::Des3,
            SymmetricAlgorithm::Rc2,
            SymmetricAlgorithm::Aes,
        ] {
            for mode in [CipherMode::Cbc, CipherMode::CbcPad] {
                let err = symmetric_mechanism(algorithm, mode, &[]).unwrap_err();
                assert_eq!(err.status(), Status::InvalidParameter);
            }
        }
    }

    #[test]
    fn signature_mechanisms() {
        let expected = [
            CKM_SHA1_RSA_PKCS,
            CKM_SHA224_RSA_PKCS,
            CKM_SHA256_RSA_PKCS,
            CKM_SHA384_RSA_PKCS,
            CKM_SHA512_RSA_PKCS,
            CKM_MD5_RSA_PKCS,
        ];
        for (hash, mech) in HashAlgorithm::iter().zip(expected) {
            let m = signature_mechanism(hash, AsymmetricAlgorithm::Rsa).unwrap();
            assert_eq!(m.mechanism_type(), mech);
        }
        for algorithm in [AsymmetricAlgorithm::Dsa, AsymmetricAlgorithm::Ecdsa] {
            let err = signature_mechanism(HashAlgorithm::Sha256, algorithm).unwrap_err();
            assert_eq!(err.status(), Status::UnsupportedAlgorithm);
        }
    }

    #[test]
    fn key_lengths() {
        assert_eq!(SymmetricAlgorithm::Des.key_length(16), 8);
        assert_eq!(SymmetricAlgorithm::Des3.key_length(8), 24);
        assert_eq!(SymmetricAlgorithm::Aes.key_length(32), 32);
        assert_eq!(SymmetricAlgorithm::Rc4.key_gen_mechanism(), CKM_RC4_KEY_GEN);
        assert_eq!(SymmetricAlgorithm::Rc2.key_type(), CKK_RC2);
    }
}
