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

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::result;

use pkcs11_sys::*;
use rand::RngCore;

use crate::token::{
    get_attribute_bool, get_attribute_ulong, new_rsa_key_pair, Attribute, Object, Token,
    CKA_MOCK_SECRET,
};
use crate::transform::{self, Cipher, SIGNATURE_MECHANISMS};

const MAX_SESSIONS: usize = 16;

// A PKCS #11 error with associated context.
#[derive(Debug)]
pub struct Error {
    code: CK_RV,
    msg: String,
}

impl Error {
    // Create a new error with an associated debug message.
    //
    // ```
    // return Err(module::Error::new(CKR_GENERAL_ERROR, "we hit a general error".to_string()));
    // ```
    pub fn new<T: Into<CK_RV>>(code: T, msg: String) -> Self {
        Error {
            code: code.into(),
            msg,
        }
    }

    // Returns the PKCS #11 specific return value for this error.
    pub fn rv(&self) -> CK_RV {
        self.code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        return write!(f, "{} (0x{:x})", self.msg, self.code);
    }
}

#[macro_export]
macro_rules! errorf {
    ($rc:expr, $($arg:tt)*) => ($crate::module::Error::new($rc, format!($($arg)*)));
}

// A result type that uses a PKCS #11 error.
pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
}

impl OperationKind {
    fn usage_attribute(self) -> CK_ATTRIBUTE_TYPE {
        match self {
            OperationKind::Encrypt => CKA_ENCRYPT,
            OperationKind::Decrypt => CKA_DECRYPT,
            OperationKind::Sign => CKA_SIGN,
            OperationKind::Verify => CKA_VERIFY,
        }
    }

    // Class of RSA key the operation runs with.
    fn rsa_key_class(self) -> CK_OBJECT_CLASS {
        match self {
            OperationKind::Encrypt | OperationKind::Verify => CKO_PUBLIC_KEY,
            OperationKind::Decrypt | OperationKind::Sign => CKO_PRIVATE_KEY,
        }
    }
}

#[derive(Debug)]
struct Operation {
    kind: OperationKind,
    mechanism: CK_MECHANISM_TYPE,
    parameter: Vec<u8>,
    key: CK_OBJECT_HANDLE,
}

#[derive(Debug)]
struct Session {
    slot_id: CK_SLOT_ID,
    flags: CK_FLAGS,
    find: Option<VecDeque<CK_OBJECT_HANDLE>>,
    operation: Option<Operation>,
}

impl Session {
    fn is_rw(&self) -> bool {
        self.flags & CKF_RW_SESSION != 0
    }
}

// Per-initialization state: open sessions and the logged in user. Token contents live in Token
// and outlive this.
#[derive(Debug)]
pub struct Module {
    sessions: BTreeMap<CK_SESSION_HANDLE, Session>,
    next_session: CK_SESSION_HANDLE,
    user: Option<CK_USER_TYPE>,
}

impl Module {
    pub fn new() -> Result<Self> {
        Ok(Module {
            sessions: BTreeMap::new(),
            next_session: 1,
            user: None,
        })
    }

    fn session(&self, h: CK_SESSION_HANDLE) -> Result<&Session> {
        self.sessions.get(&h).ok_or_else(|| {
            errorf!(
                CKR_SESSION_HANDLE_INVALID,
                "{} is not a valid session handle",
                h
            )
        })
    }

    fn session_mut(&mut self, h: CK_SESSION_HANDLE) -> Result<&mut Session> {
        self.sessions.get_mut(&h).ok_or_else(|| {
            errorf!(
                CKR_SESSION_HANDLE_INVALID,
                "{} is not a valid session handle",
                h
            )
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn rw_session_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_rw()).count()
    }

    pub fn new_session(
        &mut self,
        token: &Token,
        slot_id: CK_SLOT_ID,
        flags: CK_FLAGS,
    ) -> Result<CK_SESSION_HANDLE> {
        token.check_slot(slot_id)?;
        if flags & CKF_SERIAL_SESSION == 0 {
            return Err(errorf!(
                CKR_SESSION_PARALLEL_NOT_SUPPORTED,
                "CKF_SERIAL_SESSION must be set"
            ));
        }
        if self.sessions.len() >= MAX_SESSIONS {
            return Err(errorf!(CKR_SESSION_COUNT, "too many exisiting sessions"));
        }
        if self.user == Some(CKU_SO) && flags & CKF_RW_SESSION == 0 {
            return Err(errorf!(
                CKR_SESSION_READ_WRITE_SO_EXISTS,
                "SO is logged in, read-only sessions are not allowed"
            ));
        }
        let h = self.next_session;
        self.next_session += 1;
        self.sessions.insert(
            h,
            Session {
                slot_id,
                flags,
                find: None,
                operation: None,
            },
        );
        Ok(h)
    }

    pub fn close_session(&mut self, token: &mut Token, h: CK_SESSION_HANDLE) -> Result<()> {
        self.sessions.remove(&h).ok_or_else(|| {
            errorf!(
                CKR_SESSION_HANDLE_INVALID,
                "{} is not a valid session handle",
                h
            )
        })?;
        token.remove_session_objects(Some(h));
        if self.sessions.is_empty() {
            self.user = None;
        }
        Ok(())
    }

    pub fn close_all_sessions(&mut self, token: &mut Token, slot_id: CK_SLOT_ID) -> Result<()> {
        token.check_slot(slot_id)?;
        self.sessions.clear();
        token.remove_session_objects(None);
        self.user = None;
        Ok(())
    }

    pub fn get_session_info(&self, h: CK_SESSION_HANDLE) -> Result<CK_SESSION_INFO> {
        let s = self.session(h)?;
        let state = match (self.user, s.is_rw()) {
            (Some(CKU_SO), _) => CKS_RW_SO_FUNCTIONS,
            (Some(_), true) => CKS_RW_USER_FUNCTIONS,
            (Some(_), false) => CKS_RO_USER_FUNCTIONS,
            (None, true) => CKS_RW_PUBLIC_SESSION,
            (None, false) => CKS_RO_PUBLIC_SESSION,
        };
        Ok(CK_SESSION_INFO {
            slotID: s.slot_id,
            state,
            flags: s.flags,
            ulDeviceError: 0,
        })
    }

    pub fn login(
        &mut self,
        token: &mut Token,
        h: CK_SESSION_HANDLE,
        user_type: CK_USER_TYPE,
        pin: &[u8],
    ) -> Result<()> {
        self.session(h)?;
        if user_type != CKU_SO && user_type != CKU_USER {
            return Err(errorf!(
                CKR_USER_TYPE_INVALID,
                "user type {} not supported",
                user_type
            ));
        }
        match self.user {
            Some(u) if u == user_type => {
                return Err(errorf!(CKR_USER_ALREADY_LOGGED_IN, "already logged in"))
            }
            Some(_) => {
                return Err(errorf!(
                    CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
                    "another user is logged in"
                ))
            }
            None => {}
        }
        if user_type == CKU_SO && self.sessions.values().any(|s| !s.is_rw()) {
            return Err(errorf!(
                CKR_SESSION_READ_ONLY_EXISTS,
                "SO login with read-only sessions open"
            ));
        }
        token.check_pin(user_type, pin)?;
        self.user = Some(user_type);
        Ok(())
    }

    pub fn logout(&mut self, h: CK_SESSION_HANDLE) -> Result<()> {
        self.session(h)?;
        if self.user.take().is_none() {
            return Err(errorf!(CKR_USER_NOT_LOGGED_IN, "not logged in"));
        }
        Ok(())
    }

    // C_SetPIN acts on the SO PIN when the SO is logged in and on the user PIN otherwise.
    pub fn set_pin(
        &mut self,
        token: &mut Token,
        h: CK_SESSION_HANDLE,
        old_pin: &[u8],
        new_pin: &[u8],
    ) -> Result<()> {
        if !self.session(h)?.is_rw() {
            return Err(errorf!(CKR_SESSION_READ_ONLY, "session {} is read-only", h));
        }
        let user_type = match self.user {
            Some(CKU_SO) => CKU_SO,
            _ => CKU_USER,
        };
        token.change_pin(user_type, old_pin, new_pin)
    }

    pub fn init_pin(&mut self, token: &mut Token, h: CK_SESSION_HANDLE, pin: &[u8]) -> Result<()> {
        let s = self.session(h)?;
        if self.user != Some(CKU_SO) {
            return Err(errorf!(CKR_USER_NOT_LOGGED_IN, "C_InitPIN requires the SO"));
        }
        if !s.is_rw() {
            return Err(errorf!(CKR_SESSION_READ_ONLY, "session {} is read-only", h));
        }
        token.init_user_pin(pin)
    }

    fn is_visible(&self, obj: &Object) -> bool {
        !obj.is_private() || self.user == Some(CKU_USER)
    }

    fn object<'t>(&self, token: &'t Token, h: CK_OBJECT_HANDLE) -> Result<&'t Object> {
        token
            .object(h)
            .filter(|obj| self.is_visible(obj))
            .ok_or_else(|| errorf!(CKR_OBJECT_HANDLE_INVALID, "no object {}", h))
    }

    // Checks that the session may create an object with the given storage flags.
    fn check_create(&self, s: &Session, token_object: bool, private: bool) -> Result<()> {
        if token_object && !s.is_rw() {
            return Err(errorf!(
                CKR_SESSION_READ_ONLY,
                "token objects need a read-write session"
            ));
        }
        if private && self.user != Some(CKU_USER) {
            return Err(errorf!(
                CKR_USER_NOT_LOGGED_IN,
                "private objects need a logged in user"
            ));
        }
        Ok(())
    }

    pub fn get_attribute_values(
        &self,
        token: &Token,
        h: CK_SESSION_HANDLE,
        obj: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> Result<Vec<result::Result<Vec<u8>, CK_RV>>> {
        self.session(h)?;
        let obj = self.object(token, obj)?;
        Ok(types
            .iter()
            .map(|&typ| obj.readable_value(typ).map(<[u8]>::to_vec))
            .collect())
    }

    pub fn destroy_object(
        &mut self,
        token: &mut Token,
        h: CK_SESSION_HANDLE,
        obj: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let s = self.session(h)?;
        let is_token_object = self.object(token, obj)?.is_token_object();
        if is_token_object && !s.is_rw() {
            return Err(errorf!(
                CKR_SESSION_READ_ONLY,
                "token objects need a read-write session"
            ));
        }
        token.remove(obj);
        Ok(())
    }

    pub fn find_objects_init(
        &mut self,
        token: &Token,
        h: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> Result<()> {
        if self.session(h)?.find.is_some() {
            return Err(errorf!(CKR_OPERATION_ACTIVE, "find already in progress"));
        }
        let found: VecDeque<CK_OBJECT_HANDLE> = token
            .objects()
            .filter(|(_, obj)| self.is_visible(obj) && obj.matches(template))
            .map(|(&handle, _)| handle)
            .collect();
        self.session_mut(h)?.find = Some(found);
        Ok(())
    }

    pub fn find_objects(
        &mut self,
        h: CK_SESSION_HANDLE,
        max: usize,
    ) -> Result<Vec<CK_OBJECT_HANDLE>> {
        let found = self
            .session_mut(h)?
            .find
            .as_mut()
            .ok_or_else(|| errorf!(CKR_OPERATION_NOT_INITIALIZED, "no find in progress"))?;
        let n = max.min(found.len());
        Ok(found.drain(..n).collect())
    }

    pub fn find_objects_final(&mut self, h: CK_SESSION_HANDLE) -> Result<()> {
        self.session_mut(h)?
            .find
            .take()
            .ok_or_else(|| errorf!(CKR_OPERATION_NOT_INITIALIZED, "no find in progress"))?;
        Ok(())
    }

    pub fn generate_key(
        &mut self,
        token: &mut Token,
        h: CK_SESSION_HANDLE,
        mechanism: CK_MECHANISM_TYPE,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let s = self.session(h)?;
        let (key_type, min_len, max_len) = match mechanism {
            CKM_DES_KEY_GEN => (CKK_DES, 8, 8),
            CKM_DES3_KEY_GEN => (CKK_DES3, 24, 24),
            CKM_RC2_KEY_GEN => (CKK_RC2, 1, 128),
            CKM_RC4_KEY_GEN => (CKK_RC4, 1, 256),
            CKM_AES_KEY_GEN => (CKK_AES, 16, 32),
            _ => {
                return Err(errorf!(
                    CKR_MECHANISM_INVALID,
                    "mechanism 0x{:x} does not generate secret keys",
                    mechanism
                ))
            }
        };
        if let Some(typ) = get_attribute_ulong(template, CKA_KEY_TYPE)? {
            if typ != key_type {
                return Err(errorf!(
                    CKR_TEMPLATE_INCONSISTENT,
                    "key type 0x{:x} does not match mechanism 0x{:x}",
                    typ,
                    mechanism
                ));
            }
        }
        let len = match get_attribute_ulong(template, CKA_VALUE_LEN)? {
            Some(len) if min_len == max_len && len != min_len => {
                return Err(errorf!(
                    CKR_TEMPLATE_INCONSISTENT,
                    "key length is fixed at {} bytes",
                    min_len
                ))
            }
            Some(len) => len,
            None if min_len == max_len => min_len,
            None => {
                return Err(errorf!(
                    CKR_TEMPLATE_INCOMPLETE,
                    "CKA_VALUE_LEN is required"
                ))
            }
        };
        if len < min_len || len > max_len || (key_type == CKK_AES && len % 8 != 0) {
            return Err(errorf!(CKR_KEY_SIZE_RANGE, "key length {} out of range", len));
        }
        let token_object = get_attribute_bool(template, CKA_TOKEN).unwrap_or(false);
        let private = get_attribute_bool(template, CKA_PRIVATE).unwrap_or(true);
        self.check_create(s, token_object, private)?;

        let mut value = vec![0u8; len as usize];
        rand::thread_rng().fill_bytes(&mut value);
        let mut obj = Object::from_attributes(template);
        obj.set_ulong(CKA_CLASS, CKO_SECRET_KEY);
        obj.set_ulong(CKA_KEY_TYPE, key_type);
        obj.set_ulong(CKA_VALUE_LEN, len);
        obj.set(CKA_VALUE, value);
        obj.set(CKA_TOKEN, vec![token_object as CK_BBOOL]);
        obj.set(CKA_PRIVATE, vec![private as CK_BBOOL]);
        obj.owner = if token_object { None } else { Some(h) };
        Ok(token.insert(obj))
    }

    pub fn generate_key_pair(
        &mut self,
        token: &mut Token,
        h: CK_SESSION_HANDLE,
        mechanism: CK_MECHANISM_TYPE,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        let s = self.session(h)?;
        if mechanism != CKM_RSA_PKCS_KEY_PAIR_GEN {
            return Err(errorf!(
                CKR_MECHANISM_INVALID,
                "mechanism 0x{:x} does not generate key pairs",
                mechanism
            ));
        }
        let bits = get_attribute_ulong(public_template, CKA_MODULUS_BITS)?
            .ok_or_else(|| errorf!(CKR_TEMPLATE_INCOMPLETE, "CKA_MODULUS_BITS is required"))?;
        if !(512..=4096).contains(&bits) || bits % 8 != 0 {
            return Err(errorf!(CKR_KEY_SIZE_RANGE, "modulus of {} bits not supported", bits));
        }
        let public_token = get_attribute_bool(public_template, CKA_TOKEN).unwrap_or(false);
        let private_token = get_attribute_bool(private_template, CKA_TOKEN).unwrap_or(false);
        let public_private = get_attribute_bool(public_template, CKA_PRIVATE).unwrap_or(false);
        let private_private = get_attribute_bool(private_template, CKA_PRIVATE).unwrap_or(true);
        self.check_create(s, public_token, public_private)?;
        self.check_create(s, private_token, private_private)?;

        let (mut public, mut private) = new_rsa_key_pair(public_template, private_template, bits);
        public.set(CKA_TOKEN, vec![public_token as CK_BBOOL]);
        public.set(CKA_PRIVATE, vec![public_private as CK_BBOOL]);
        public.owner = if public_token { None } else { Some(h) };
        private.set(CKA_TOKEN, vec![private_token as CK_BBOOL]);
        private.set(CKA_PRIVATE, vec![private_private as CK_BBOOL]);
        private.owner = if private_token { None } else { Some(h) };
        Ok((token.insert(public), token.insert(private)))
    }

    pub fn operation_init(
        &mut self,
        token: &Token,
        h: CK_SESSION_HANDLE,
        kind: OperationKind,
        mechanism: CK_MECHANISM_TYPE,
        parameter: &[u8],
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        if self.session(h)?.operation.is_some() {
            return Err(errorf!(CKR_OPERATION_ACTIVE, "operation already in progress"));
        }
        let obj = self
            .object(token, key)
            .map_err(|_| errorf!(CKR_KEY_HANDLE_INVALID, "no key {}", key))?;

        if mechanism == CKM_RSA_PKCS || SIGNATURE_MECHANISMS.contains(&mechanism) {
            if mechanism != CKM_RSA_PKCS
                && !matches!(kind, OperationKind::Sign | OperationKind::Verify)
            {
                return Err(errorf!(
                    CKR_MECHANISM_INVALID,
                    "mechanism 0x{:x} only signs and verifies",
                    mechanism
                ));
            }
            if obj.key_type() != Some(CKK_RSA) || obj.class() != Some(kind.rsa_key_class()) {
                return Err(errorf!(
                    CKR_KEY_TYPE_INCONSISTENT,
                    "key {} cannot be used for {:?} with 0x{:x}",
                    key,
                    kind,
                    mechanism
                ));
            }
        } else if let Some(cipher) = Cipher::for_mechanism(mechanism) {
            if !matches!(kind, OperationKind::Encrypt | OperationKind::Decrypt) {
                return Err(errorf!(
                    CKR_MECHANISM_INVALID,
                    "mechanism 0x{:x} only encrypts and decrypts",
                    mechanism
                ));
            }
            if obj.class() != Some(CKO_SECRET_KEY) || obj.key_type() != Some(cipher.key_type) {
                return Err(errorf!(
                    CKR_KEY_TYPE_INCONSISTENT,
                    "key {} does not match mechanism 0x{:x}",
                    key,
                    mechanism
                ));
            }
            let iv_len = if cipher.needs_iv() { cipher.block_size } else { 0 };
            if parameter.len() != iv_len {
                return Err(errorf!(
                    CKR_MECHANISM_PARAM_INVALID,
                    "expected a {} byte parameter, got {}",
                    iv_len,
                    parameter.len()
                ));
            }
        } else {
            return Err(errorf!(
                CKR_MECHANISM_INVALID,
                "mechanism 0x{:x} not supported",
                mechanism
            ));
        }
        if !obj.bool(kind.usage_attribute()) {
            return Err(errorf!(
                CKR_KEY_FUNCTION_NOT_PERMITTED,
                "key {} does not permit {:?}",
                key,
                kind
            ));
        }

        self.session_mut(h)?.operation = Some(Operation {
            kind,
            mechanism,
            parameter: parameter.to_vec(),
            key,
        });
        Ok(())
    }

    pub fn end_operation(&mut self, h: CK_SESSION_HANDLE) {
        if let Some(s) = self.sessions.get_mut(&h) {
            s.operation = None;
        }
    }

    fn active_operation(&self, h: CK_SESSION_HANDLE, kind: OperationKind) -> Result<&Operation> {
        self.session(h)?
            .operation
            .as_ref()
            .filter(|op| op.kind == kind)
            .ok_or_else(|| errorf!(CKR_OPERATION_NOT_INITIALIZED, "no {:?} in progress", kind))
    }

    // Produces the output of the active operation. The operation stays active so a size query
    // can be followed by the real call; callers end it once the output is delivered.
    pub fn transform(
        &mut self,
        token: &Token,
        h: CK_SESSION_HANDLE,
        kind: OperationKind,
        input: &[u8],
    ) -> Result<Vec<u8>> {
        let result = self.run_transform(token, h, kind, input);
        if result.is_err() {
            self.end_operation(h);
        }
        result
    }

    fn run_transform(
        &self,
        token: &Token,
        h: CK_SESSION_HANDLE,
        kind: OperationKind,
        input: &[u8],
    ) -> Result<Vec<u8>> {
        let op = self.active_operation(h, kind)?;
        let key = token
            .object(op.key)
            .ok_or_else(|| errorf!(CKR_KEY_HANDLE_INVALID, "key {} was destroyed", op.key))?;
        let failed =
            |rv: CK_RV| errorf!(rv, "{:?} with mechanism 0x{:x} failed", kind, op.mechanism);

        if let Some(cipher) = Cipher::for_mechanism(op.mechanism) {
            let value = key.get(CKA_VALUE).unwrap_or_default();
            return match kind {
                OperationKind::Encrypt => cipher.encrypt(value, &op.parameter, input),
                _ => cipher.decrypt(value, &op.parameter, input),
            }
            .map_err(failed);
        }

        let secret = key.get(CKA_MOCK_SECRET).unwrap_or_default();
        let modulus_len = key.get(CKA_MODULUS).map_or(0, <[u8]>::len);
        match kind {
            OperationKind::Encrypt => transform::rsa_encrypt(secret, input, modulus_len),
            OperationKind::Decrypt => transform::rsa_decrypt(secret, input, modulus_len),
            OperationKind::Sign
                if op.mechanism == CKM_RSA_PKCS && input.len() + 11 > modulus_len =>
            {
                Err(CKR_DATA_LEN_RANGE)
            }
            OperationKind::Sign => Ok(transform::rsa_sign(
                secret,
                op.mechanism,
                input,
                modulus_len,
            )),
            OperationKind::Verify => Err(CKR_OPERATION_NOT_INITIALIZED),
        }
        .map_err(failed)
    }

    pub fn verify(
        &mut self,
        token: &Token,
        h: CK_SESSION_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let result = self.run_verify(token, h, data, signature);
        self.end_operation(h);
        result
    }

    fn run_verify(
        &self,
        token: &Token,
        h: CK_SESSION_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let op = self.active_operation(h, OperationKind::Verify)?;
        let key = token
            .object(op.key)
            .ok_or_else(|| errorf!(CKR_KEY_HANDLE_INVALID, "key {} was destroyed", op.key))?;
        let secret = key.get(CKA_MOCK_SECRET).unwrap_or_default();
        let modulus_len = key.get(CKA_MODULUS).map_or(0, <[u8]>::len);
        transform::rsa_verify(secret, op.mechanism, data, signature, modulus_len)
            .map_err(|rv| errorf!(rv, "signature check failed"))
    }

    pub fn generate_random(&self, h: CK_SESSION_HANDLE, len: usize) -> Result<Vec<u8>> {
        self.session(h)?;
        let mut out = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut out);
        Ok(out)
    }
}

pub fn mechanism_info(mechanism: CK_MECHANISM_TYPE) -> Result<CK_MECHANISM_INFO> {
    let (min, max, flags) = match mechanism {
        CKM_RSA_PKCS_KEY_PAIR_GEN => (512, 4096, CKF_GENERATE_KEY_PAIR),
        CKM_RSA_PKCS => (512, 4096, CKF_ENCRYPT | CKF_DECRYPT | CKF_SIGN | CKF_VERIFY),
        m if SIGNATURE_MECHANISMS.contains(&m) => (512, 4096, CKF_SIGN | CKF_VERIFY),
        CKM_DES_KEY_GEN => (8, 8, CKF_GENERATE),
        CKM_DES3_KEY_GEN => (24, 24, CKF_GENERATE),
        CKM_RC2_KEY_GEN => (1, 128, CKF_GENERATE),
        CKM_RC4_KEY_GEN => (1, 256, CKF_GENERATE),
        CKM_AES_KEY_GEN => (16, 32, CKF_GENERATE),
        m => match Cipher::for_mechanism(m) {
            Some(_) => (0, 0, CKF_ENCRYPT | CKF_DECRYPT),
            None => {
                return Err(errorf!(
                    CKR_MECHANISM_INVALID,
                    "mechanism 0x{:x} not supported",
                    m
                ))
            }
        },
    };
    Ok(CK_MECHANISM_INFO {
        ulMinKeySize: min,
        ulMaxKeySize: max,
        flags,
    })
}
