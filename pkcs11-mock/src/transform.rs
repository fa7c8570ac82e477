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

// Keyed stand-ins for the token's ciphers. They keep the shape of the real mechanisms (block
// sizes, padding, output lengths, error codes) but provide no security at all.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::result;

use pkcs11_sys::*;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

type Result<T> = result::Result<T, CK_RV>;

// Deterministic byte stream derived from all of `parts`.
fn keystream(parts: &[&[u8]], len: usize) -> Vec<u8> {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    let mut out = vec![0u8; len];
    rng.fill_bytes(&mut out);
    out
}

fn xor_in_place(buf: &mut [u8], stream: &[u8]) {
    buf.iter_mut().zip(stream).for_each(|(b, k)| *b ^= k);
}

pub const SIGNATURE_MECHANISMS: [CK_MECHANISM_TYPE; 6] = [
    CKM_SHA1_RSA_PKCS,
    CKM_SHA224_RSA_PKCS,
    CKM_SHA256_RSA_PKCS,
    CKM_SHA384_RSA_PKCS,
    CKM_SHA512_RSA_PKCS,
    CKM_MD5_RSA_PKCS,
];

pub const MECHANISMS: [CK_MECHANISM_TYPE; 26] = [
    CKM_RSA_PKCS_KEY_PAIR_GEN,
    CKM_RSA_PKCS,
    CKM_SHA1_RSA_PKCS,
    CKM_SHA224_RSA_PKCS,
    CKM_SHA256_RSA_PKCS,
    CKM_SHA384_RSA_PKCS,
    CKM_SHA512_RSA_PKCS,
    CKM_MD5_RSA_PKCS,
    CKM_DES_KEY_GEN,
    CKM_DES_ECB,
    CKM_DES_CBC,
    CKM_DES_CBC_PAD,
    CKM_DES3_KEY_GEN,
    CKM_DES3_ECB,
    CKM_DES3_CBC,
    CKM_DES3_CBC_PAD,
    CKM_RC2_KEY_GEN,
    CKM_RC2_ECB,
    CKM_RC2_CBC,
    CKM_RC2_CBC_PAD,
    CKM_RC4_KEY_GEN,
    CKM_RC4,
    CKM_AES_KEY_GEN,
    CKM_AES_ECB,
    CKM_AES_CBC,
    CKM_AES_CBC_PAD,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chaining {
    Ecb,
    Cbc,
    CbcPad,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cipher {
    pub key_type: CK_KEY_TYPE,
    pub block_size: usize,
    pub chaining: Chaining,
}

impl Cipher {
    pub fn for_mechanism(mechanism: CK_MECHANISM_TYPE) -> Option<Self> {
        let (key_type, block_size, chaining) = match mechanism {
            CKM_DES_ECB => (CKK_DES, 8, Chaining::Ecb),
            CKM_DES_CBC => (CKK_DES, 8, Chaining::Cbc),
            CKM_DES_CBC_PAD => (CKK_DES, 8, Chaining::CbcPad),
            CKM_DES3_ECB => (CKK_DES3, 8, Chaining::Ecb),
            CKM_DES3_CBC => (CKK_DES3, 8, Chaining::Cbc),
            CKM_DES3_CBC_PAD => (CKK_DES3, 8, Chaining::CbcPad),
            CKM_RC2_ECB => (CKK_RC2, 8, Chaining::Ecb),
            CKM_RC2_CBC => (CKK_RC2, 8, Chaining::Cbc),
            CKM_RC2_CBC_PAD => (CKK_RC2, 8, Chaining::CbcPad),
            CKM_AES_ECB => (CKK_AES, 16, Chaining::Ecb),
            CKM_AES_CBC => (CKK_AES, 16, Chaining::Cbc),
            CKM_AES_CBC_PAD => (CKK_AES, 16, Chaining::CbcPad),
            CKM_RC4 => (CKK_RC4, 1, Chaining::Stream),
            _ => return None,
        };
        Some(Cipher {
            key_type,
            block_size,
            chaining,
        })
    }

    pub fn needs_iv(&self) -> bool {
        matches!(self.chaining, Chaining::Cbc | Chaining::CbcPad)
    }

    pub fn encrypt(&self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        match self.chaining {
            Chaining::CbcPad => {
                let pad = self.block_size - data.len() % self.block_size;
                buf.resize(data.len() + pad, pad as u8);
            }
            Chaining::Ecb | Chaining::Cbc if data.len() % self.block_size != 0 => {
                return Err(CKR_DATA_LEN_RANGE);
            }
            _ => {}
        }
        let stream = keystream(&[key, iv], buf.len());
        xor_in_place(&mut buf, &stream);
        Ok(buf)
    }

    pub fn decrypt(&self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if self.chaining != Chaining::Stream && data.len() % self.block_size != 0 {
            return Err(CKR_ENCRYPTED_DATA_LEN_RANGE);
        }
        let mut buf = data.to_vec();
        let stream = keystream(&[key, iv], buf.len());
        xor_in_place(&mut buf, &stream);
        if self.chaining == Chaining::CbcPad {
            let pad = *buf.last().ok_or(CKR_ENCRYPTED_DATA_LEN_RANGE)? as usize;
            if pad == 0
                || pad > self.block_size
                || buf[buf.len() - pad..].iter().any(|&b| b as usize != pad)
            {
                return Err(CKR_ENCRYPTED_DATA_INVALID);
            }
            buf.truncate(buf.len() - pad);
        }
        Ok(buf)
    }
}

pub fn rsa_sign(
    secret: &[u8],
    mechanism: CK_MECHANISM_TYPE,
    data: &[u8],
    modulus_len: usize,
) -> Vec<u8> {
    keystream(&[secret, &mechanism.to_be_bytes()[..], data], modulus_len)
}

pub fn rsa_verify(
    secret: &[u8],
    mechanism: CK_MECHANISM_TYPE,
    data: &[u8],
    signature: &[u8],
    modulus_len: usize,
) -> Result<()> {
    if signature.len() != modulus_len {
        return Err(CKR_SIGNATURE_LEN_RANGE);
    }
    if rsa_sign(secret, mechanism, data, modulus_len) != signature {
        return Err(CKR_SIGNATURE_INVALID);
    }
    Ok(())
}

// PKCS #1 v1.5 leaves room for 11 bytes of padding.
pub fn rsa_encrypt(secret: &[u8], data: &[u8], modulus_len: usize) -> Result<Vec<u8>> {
    if data.len() + 11 > modulus_len {
        return Err(CKR_DATA_LEN_RANGE);
    }
    let mut block = Vec::with_capacity(modulus_len);
    block.extend_from_slice(&(data.len() as u16).to_be_bytes());
    block.extend_from_slice(data);
    block.resize(modulus_len, 0);
    xor_in_place(&mut block, &keystream(&[secret, &b"rsa"[..]], modulus_len));
    Ok(block)
}

pub fn rsa_decrypt(secret: &[u8], data: &[u8], modulus_len: usize) -> Result<Vec<u8>> {
    if data.len() != modulus_len {
        return Err(CKR_ENCRYPTED_DATA_LEN_RANGE);
    }
    let mut block = data.to_vec();
    xor_in_place(&mut block, &keystream(&[secret, &b"rsa"[..]], modulus_len));
    let len = u16::from_be_bytes([block[0], block[1]]) as usize;
    if len + 11 > modulus_len {
        return Err(CKR_ENCRYPTED_DATA_INVALID);
    }
    Ok(block[2..2 + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_pad_round_trip() {
        let cipher = Cipher::for_mechanism(CKM_AES_CBC_PAD).unwrap();
        let key = [3u8; 16];
        let iv = [9u8; 16];
        let ct = cipher.encrypt(&key, &iv, b"hello world").unwrap();
        assert_eq!(ct.len(), 16);
        assert_ne!(&ct[..11], b"hello world");
        assert_eq!(cipher.decrypt(&key, &iv, &ct).unwrap(), b"hello world");

        // Full padding block for aligned input.
        let ct = cipher.encrypt(&key, &iv, &[0u8; 16]).unwrap();
        assert_eq!(ct.len(), 32);
    }

    #[test]
    fn unpadded_modes_need_whole_blocks() {
        let cipher = Cipher::for_mechanism(CKM_DES_CBC).unwrap();
        assert!(cipher.needs_iv());
        assert_eq!(cipher.encrypt(&[1; 8], &[0; 8], b"short"), Err(CKR_DATA_LEN_RANGE));
        assert_eq!(cipher.decrypt(&[1; 8], &[0; 8], b"short"), Err(CKR_ENCRYPTED_DATA_LEN_RANGE));

        let rc4 = Cipher::for_mechanism(CKM_RC4).unwrap();
        assert!(!rc4.needs_iv());
        assert_eq!(rc4.encrypt(&[1; 5], &[], b"short").unwrap().len(), 5);
    }

    #[test]
    fn wrong_key_breaks_padding() {
        let cipher = Cipher::for_mechanism(CKM_DES3_CBC_PAD).unwrap();
        let ct = cipher.encrypt(&[1; 24], &[0; 8], b"payload").unwrap();
        let pt = cipher.decrypt(&[2; 24], &[0; 8], &ct);
        assert_ne!(pt, Ok(b"payload".to_vec()));
    }

    #[test]
    fn rsa_stand_ins() {
        let secret = [5u8; 32];
        let sig = rsa_sign(&secret, CKM_SHA256_RSA_PKCS, b"msg", 256);
        assert_eq!(sig.len(), 256);
        assert_eq!(rsa_verify(&secret, CKM_SHA256_RSA_PKCS, b"msg", &sig, 256), Ok(()));
        assert_eq!(
            rsa_verify(&secret, CKM_SHA256_RSA_PKCS, b"other", &sig, 256),
            Err(CKR_SIGNATURE_INVALID)
        );
        assert_eq!(
            rsa_verify(&secret, CKM_SHA1_RSA_PKCS, b"msg", &sig[..10], 256),
            Err(CKR_SIGNATURE_LEN_RANGE)
        );

        let ct = rsa_encrypt(&secret, b"secret", 128).unwrap();
        assert_eq!(ct.len(), 128);
        assert_eq!(rsa_decrypt(&secret, &ct, 128).unwrap(), b"secret");
        assert_eq!(rsa_encrypt(&secret, &[0; 118], 128), Err(CKR_DATA_LEN_RANGE));
        assert_eq!(rsa_decrypt(&secret, &ct[1..], 128), Err(CKR_ENCRYPTED_DATA_LEN_RANGE));
    }
}
