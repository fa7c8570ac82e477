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

use std::collections::BTreeMap;
use std::mem;
use std::result;

use pkcs11_sys::*;
use rand::RngCore;

use crate::errorf;
use crate::module::Result;

pub const SLOT_WITH_TOKEN: CK_SLOT_ID = 1;
pub const EMPTY_SLOT: CK_SLOT_ID = 2;
pub const SLOTS: [CK_SLOT_ID; 2] = [SLOT_WITH_TOKEN, EMPTY_SLOT];

pub const TOKEN_LABEL: &str = "Mock Token";
pub const USER_PIN: &str = "123456";
pub const SO_PIN: &str = "12345678";
pub const USER_PIN_MAX_RETRIES: u8 = 6;
pub const SO_PIN_MAX_RETRIES: u8 = 10;
pub const MIN_PIN_LEN: usize = 4;
pub const MAX_PIN_LEN: usize = 16;
pub const DEFAULT_TIMEOUT_MS: CK_ULONG = 60_000;

pub const CERTIFICATE_LABEL: &str = "Mock Certificate";
pub const CERTIFICATE_ID: &[u8] = &[0x01];
pub const CERTIFICATE_SUBJECT: &[u8] =
    b"\x30\x13\x31\x11\x30\x0f\x06\x03\x55\x04\x03\x0c\x08Mock CA1";
pub const CERTIFICATE_DER: &[u8] =
    b"\x30\x82\x00\x10\x30\x0a\x02\x01\x01\x06\x05\x2b\x0e\x03\x02\x1a\x03\x02\x00\x00";
pub const DATA_LABEL: &str = "Mock Data";
pub const RSA_KEY_LABEL: &str = "Mock RSA Key";
pub const RSA_KEY_BITS: CK_ULONG = 2048;

// Per-key-pair secret that drives the stand-in RSA transforms. Never readable.
pub(crate) const CKA_MOCK_SECRET: CK_ATTRIBUTE_TYPE = CKA_VENDOR_DEFINED | 0x4d4f;

// A single attribute as passed in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub typ: CK_ATTRIBUTE_TYPE,
    pub val: Vec<u8>,
}

impl Attribute {
    pub fn bool(typ: CK_ATTRIBUTE_TYPE, val: bool) -> Self {
        Attribute {
            typ,
            val: vec![if val { CK_TRUE } else { CK_FALSE }],
        }
    }

    pub fn ulong(typ: CK_ATTRIBUTE_TYPE, val: CK_ULONG) -> Self {
        Attribute {
            typ,
            val: val.to_ne_bytes().to_vec(),
        }
    }

    pub fn bytes(typ: CK_ATTRIBUTE_TYPE, val: &[u8]) -> Self {
        Attribute {
            typ,
            val: val.to_vec(),
        }
    }
}

pub fn get_attribute_val(attrs: &[Attribute], typ: CK_ATTRIBUTE_TYPE) -> Option<&[u8]> {
    attrs.iter().find(|a| a.typ == typ).map(|a| a.val.as_slice())
}

pub fn get_attribute_ulong(
    attrs: &[Attribute],
    typ: CK_ATTRIBUTE_TYPE,
) -> Result<Option<CK_ULONG>> {
    match get_attribute_val(attrs, typ) {
        None => Ok(None),
        Some(val) => decode_ulong(val).map(Some).ok_or_else(|| {
            errorf!(
                CKR_ATTRIBUTE_VALUE_INVALID,
                "attribute 0x{:x} is not a CK_ULONG",
                typ
            )
        }),
    }
}

pub fn get_attribute_bool(attrs: &[Attribute], typ: CK_ATTRIBUTE_TYPE) -> Option<bool> {
    get_attribute_val(attrs, typ).and_then(|v| v.first().map(|&b| b != CK_FALSE))
}

fn decode_ulong(val: &[u8]) -> Option<CK_ULONG> {
    let bytes: [u8; mem::size_of::<CK_ULONG>()] = val.try_into().ok()?;
    Some(CK_ULONG::from_ne_bytes(bytes))
}

#[derive(Debug, Clone, Default)]
pub struct Object {
    attributes: BTreeMap<CK_ATTRIBUTE_TYPE, Vec<u8>>,
    // Session that created a session object; None for token objects.
    pub owner: Option<CK_SESSION_HANDLE>,
}

impl Object {
    pub fn from_attributes(attrs: &[Attribute]) -> Self {
        let mut obj = Object::default();
        for a in attrs {
            obj.set(a.typ, a.val.clone());
        }
        obj
    }

    pub fn set(&mut self, typ: CK_ATTRIBUTE_TYPE, val: Vec<u8>) {
        self.attributes.insert(typ, val);
    }

    pub fn set_ulong(&mut self, typ: CK_ATTRIBUTE_TYPE, val: CK_ULONG) {
        self.set(typ, val.to_ne_bytes().to_vec());
    }

    pub fn get(&self, typ: CK_ATTRIBUTE_TYPE) -> Option<&[u8]> {
        self.attributes.get(&typ).map(Vec::as_slice)
    }

    pub fn bool(&self, typ: CK_ATTRIBUTE_TYPE) -> bool {
        self.get(typ)
            .and_then(|v| v.first())
            .map_or(false, |&b| b != CK_FALSE)
    }

    pub fn ulong(&self, typ: CK_ATTRIBUTE_TYPE) -> Option<CK_ULONG> {
        self.get(typ).and_then(decode_ulong)
    }

    pub fn class(&self) -> Option<CK_OBJECT_CLASS> {
        self.ulong(CKA_CLASS)
    }

    pub fn key_type(&self) -> Option<CK_KEY_TYPE> {
        self.ulong(CKA_KEY_TYPE)
    }

    pub fn is_private(&self) -> bool {
        self.bool(CKA_PRIVATE)
    }

    pub fn is_token_object(&self) -> bool {
        self.bool(CKA_TOKEN)
    }

    pub fn matches(&self, template: &[Attribute]) -> bool {
        template
            .iter()
            .all(|a| self.get(a.typ).map_or(false, |v| v == a.val.as_slice()))
    }

    // Value of an attribute as C_GetAttributeValue may reveal it.
    pub fn readable_value(&self, typ: CK_ATTRIBUTE_TYPE) -> result::Result<&[u8], CK_RV> {
        if typ == CKA_MOCK_SECRET {
            return Err(CKR_ATTRIBUTE_SENSITIVE);
        }
        let val = self.get(typ).ok_or(CKR_ATTRIBUTE_TYPE_INVALID)?;
        let secret_class = matches!(self.class(), Some(CKO_PRIVATE_KEY) | Some(CKO_SECRET_KEY));
        let protected = self.bool(CKA_SENSITIVE)
            || self.get(CKA_EXTRACTABLE).map_or(false, |v| v.first() == Some(&CK_FALSE));
        if typ == CKA_VALUE && secret_class && protected {
            return Err(CKR_ATTRIBUTE_SENSITIVE);
        }
        Ok(val)
    }
}

// Persistent token contents. Survives C_Finalize; reset() replaces it.
pub struct Token {
    pub label: String,
    pub timeout_ms: CK_ULONG,
    user_pin: Option<Vec<u8>>,
    so_pin: Vec<u8>,
    user_retries: u8,
    so_retries: u8,
    objects: BTreeMap<CK_OBJECT_HANDLE, Object>,
    next_handle: CK_OBJECT_HANDLE,
}

impl Token {
    pub fn new() -> Self {
        let mut token = Token {
            label: TOKEN_LABEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_pin: Some(USER_PIN.as_bytes().to_vec()),
            so_pin: SO_PIN.as_bytes().to_vec(),
            user_retries: USER_PIN_MAX_RETRIES,
            so_retries: SO_PIN_MAX_RETRIES,
            objects: BTreeMap::new(),
            next_handle: 1,
        };
        token.load_fixtures();
        token
    }

    fn load_fixtures(&mut self) {
        self.insert(Object::from_attributes(&[
            Attribute::ulong(CKA_CLASS, CKO_CERTIFICATE),
            Attribute::bool(CKA_TOKEN, true),
            Attribute::bool(CKA_PRIVATE, false),
            Attribute::bytes(CKA_LABEL, CERTIFICATE_LABEL.as_bytes()),
            Attribute::bytes(CKA_ID, CERTIFICATE_ID),
            Attribute::bytes(CKA_SUBJECT, CERTIFICATE_SUBJECT),
            Attribute::bytes(CKA_VALUE, CERTIFICATE_DER),
            Attribute::ulong(CKA_CERTIFICATE_TYPE, CKC_X_509),
        ]));
        self.insert(Object::from_attributes(&[
            Attribute::ulong(CKA_CLASS, CKO_DATA),
            Attribute::bool(CKA_TOKEN, true),
            Attribute::bool(CKA_PRIVATE, false),
            Attribute::bytes(CKA_LABEL, DATA_LABEL.as_bytes()),
            Attribute::bytes(CKA_VALUE, b"mock data"),
        ]));

        let public = [
            Attribute::ulong(CKA_CLASS, CKO_PUBLIC_KEY),
            Attribute::ulong(CKA_KEY_TYPE, CKK_RSA),
            Attribute::bytes(CKA_LABEL, RSA_KEY_LABEL.as_bytes()),
            Attribute::bytes(CKA_ID, CERTIFICATE_ID),
            Attribute::bool(CKA_TOKEN, true),
            Attribute::bool(CKA_PRIVATE, false),
            Attribute::bool(CKA_ENCRYPT, true),
            Attribute::bool(CKA_VERIFY, true),
            Attribute::bool(CKA_WRAP, false),
            Attribute::ulong(CKA_MODULUS_BITS, RSA_KEY_BITS),
        ];
        let private = [
            Attribute::ulong(CKA_CLASS, CKO_PRIVATE_KEY),
            Attribute::ulong(CKA_KEY_TYPE, CKK_RSA),
            Attribute::bytes(CKA_LABEL, RSA_KEY_LABEL.as_bytes()),
            Attribute::bytes(CKA_ID, CERTIFICATE_ID),
            Attribute::bool(CKA_TOKEN, true),
            Attribute::bool(CKA_PRIVATE, true),
            Attribute::bool(CKA_DECRYPT, true),
            Attribute::bool(CKA_SIGN, true),
            Attribute::bool(CKA_SENSITIVE, true),
            Attribute::bool(CKA_EXTRACTABLE, false),
        ];
        let (public, private) = new_rsa_key_pair(&public, &private, RSA_KEY_BITS);
        self.insert(public);
        self.insert(private);
    }

    pub fn check_slot(&self, slot_id: CK_SLOT_ID) -> Result<()> {
        match slot_id {
            SLOT_WITH_TOKEN => Ok(()),
            EMPTY_SLOT => Err(errorf!(CKR_TOKEN_NOT_PRESENT, "no token in slot {}", slot_id)),
            _ => Err(errorf!(CKR_SLOT_ID_INVALID, "no slot {}", slot_id)),
        }
    }

    pub fn user_pin_initialized(&self) -> bool {
        self.user_pin.is_some()
    }

    pub fn check_pin(&mut self, user_type: CK_USER_TYPE, pin: &[u8]) -> Result<()> {
        let (expected, retries, max) = match user_type {
            CKU_SO => (Some(&self.so_pin), &mut self.so_retries, SO_PIN_MAX_RETRIES),
            CKU_USER => (self.user_pin.as_ref(), &mut self.user_retries, USER_PIN_MAX_RETRIES),
            _ => {
                return Err(errorf!(
                    CKR_USER_TYPE_INVALID,
                    "user type {} not supported",
                    user_type
                ))
            }
        };
        let expected = expected
            .ok_or_else(|| errorf!(CKR_USER_PIN_NOT_INITIALIZED, "user PIN not initialized"))?;
        if *retries == 0 {
            return Err(errorf!(CKR_PIN_LOCKED, "PIN locked"));
        }
        if expected.as_slice() != pin {
            *retries -= 1;
            return Err(errorf!(CKR_PIN_INCORRECT, "incorrect PIN, {} retries left", *retries));
        }
        *retries = max;
        Ok(())
    }

    pub fn change_pin(
        &mut self,
        user_type: CK_USER_TYPE,
        old_pin: &[u8],
        new_pin: &[u8],
    ) -> Result<()> {
        check_pin_len(new_pin)?;
        self.check_pin(user_type, old_pin)?;
        match user_type {
            CKU_SO => self.so_pin = new_pin.to_vec(),
            _ => self.user_pin = Some(new_pin.to_vec()),
        }
        Ok(())
    }

    pub fn init_user_pin(&mut self, pin: &[u8]) -> Result<()> {
        check_pin_len(pin)?;
        self.user_pin = Some(pin.to_vec());
        self.user_retries = USER_PIN_MAX_RETRIES;
        Ok(())
    }

    pub fn pin_info(&self) -> AUX_PIN_INFO {
        AUX_PIN_INFO {
            bSOPinMaxRetries: SO_PIN_MAX_RETRIES,
            bSOPinCurCounter: self.so_retries,
            bUserPinMaxRetries: USER_PIN_MAX_RETRIES,
            bUserPinCurCounter: self.user_retries,
            pinflags: 0,
        }
    }

    // Wipes objects, label and user PIN. Needs the SO PIN.
    pub fn blank(&mut self, so_pin: &[u8]) -> Result<()> {
        self.check_pin(CKU_SO, so_pin)?;
        self.objects.clear();
        self.label.clear();
        self.user_pin = None;
        self.user_retries = USER_PIN_MAX_RETRIES;
        Ok(())
    }

    pub fn insert(&mut self, obj: Object) -> CK_OBJECT_HANDLE {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(handle, obj);
        handle
    }

    pub fn object(&self, handle: CK_OBJECT_HANDLE) -> Option<&Object> {
        self.objects.get(&handle)
    }

    pub fn remove(&mut self, handle: CK_OBJECT_HANDLE) -> Option<Object> {
        self.objects.remove(&handle)
    }

    pub fn objects(&self) -> impl Iterator<Item = (&CK_OBJECT_HANDLE, &Object)> {
        self.objects.iter()
    }

    pub fn remove_session_objects(&mut self, session: Option<CK_SESSION_HANDLE>) {
        self.objects.retain(|_, obj| match (obj.owner, session) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(owner), Some(session)) => owner != session,
        });
    }
}

impl Default for Token {
    fn default() -> Self {
        Token::new()
    }
}

fn check_pin_len(pin: &[u8]) -> Result<()> {
    if pin.len() < MIN_PIN_LEN || pin.len() > MAX_PIN_LEN {
        return Err(errorf!(CKR_PIN_LEN_RANGE, "PIN length {} out of range", pin.len()));
    }
    Ok(())
}

// Builds both halves of a stand-in RSA key pair from the caller's templates.
pub fn new_rsa_key_pair(
    public_template: &[Attribute],
    private_template: &[Attribute],
    modulus_bits: CK_ULONG,
) -> (Object, Object) {
    let mut rng = rand::thread_rng();
    let mut modulus = vec![0u8; (modulus_bits / 8) as usize];
    rng.fill_bytes(&mut modulus);
    if let Some(first) = modulus.first_mut() {
        *first |= 0x80;
    }
    if let Some(last) = modulus.last_mut() {
        *last |= 0x01;
    }
    let exponent = get_attribute_val(public_template, CKA_PUBLIC_EXPONENT)
        .map_or_else(|| vec![0x01, 0x00, 0x01], <[u8]>::to_vec);
    let mut secret = vec![0u8; 32];
    rng.fill_bytes(&mut secret);

    let mut public = Object::from_attributes(public_template);
    public.set_ulong(CKA_CLASS, CKO_PUBLIC_KEY);
    public.set_ulong(CKA_KEY_TYPE, CKK_RSA);
    public.set_ulong(CKA_MODULUS_BITS, modulus_bits);
    public.set(CKA_MODULUS, modulus.clone());
    public.set(CKA_PUBLIC_EXPONENT, exponent.clone());
    public.set(CKA_MOCK_SECRET, secret.clone());

    let mut private = Object::from_attributes(private_template);
    private.set_ulong(CKA_CLASS, CKO_PRIVATE_KEY);
    private.set_ulong(CKA_KEY_TYPE, CKK_RSA);
    private.set(CKA_MODULUS, modulus);
    private.set(CKA_PUBLIC_EXPONENT, exponent);
    private.set(CKA_MOCK_SECRET, secret);

    (public, private)
}
