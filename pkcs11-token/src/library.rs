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

use std::ffi::CString;
use std::fs;
use std::mem;
use std::path::Path;
use std::ptr;

use der::asn1::UIntRef;
use der::Encode;
use pkcs11_sys::*;
use tracing::{debug, info, instrument, warn};

use crate::attribute::{decode_bool, decode_ulong, Template};
use crate::config::LibraryConfig;
use crate::error::{check_rv, rv_to_string, Error, Result, Status};
use crate::errorf;
use crate::loader::{ck_fn, GetAuxFunctionListFn, GetFunctionListFn, Module};
use crate::mechanism::{
    signature_mechanism, symmetric_mechanism, AsymmetricAlgorithm, CipherMode, HashAlgorithm,
    Mechanism, SymmetricAlgorithm,
};
use crate::types::{
    CertificateInfo, KeyInfo, KeyPair, LibraryInfo, PinInfo, SessionInfo, SlotEvent, SlotInfo,
    TokenInfo, UserType,
};

type TransformFn = unsafe extern "C" fn(
    CK_SESSION_HANDLE,
    CK_BYTE_PTR,
    CK_ULONG,
    CK_BYTE_PTR,
    CK_ULONG_PTR,
) -> CK_RV;

/// A handle on one vendor PKCS #11 module with at most one open session.
///
/// The module is loaded by [`Pkcs11Library::initialize`] and unloaded by
/// [`Pkcs11Library::finalize`] or on drop. Operations that need a session fail with
/// [`Status::SessionClosed`] until [`Pkcs11Library::open_session`] succeeds.
#[derive(Debug, Default)]
pub struct Pkcs11Library {
    module: Option<Module>,
    session: Option<CK_SESSION_HANDLE>,
    current_slot: Option<CK_SLOT_ID>,
    logged_in: bool,
}

impl Pkcs11Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.module.is_some()
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn current_slot(&self) -> Option<CK_SLOT_ID> {
        self.current_slot
    }

    /// Path of the loaded module, if it was loaded from disk.
    pub fn module_path(&self) -> Option<&Path> {
        self.module.as_ref().and_then(|m| m.path())
    }

    pub fn has_aux_functions(&self) -> bool {
        self.module.as_ref().map_or(false, |m| m.aux().is_some())
    }

    fn module(&self) -> Result<&Module> {
        self.module
            .as_ref()
            .ok_or_else(|| errorf!(Status::CryptokiNotInitialized, "library not initialized"))
    }

    fn session(&self) -> Result<(&Module, CK_SESSION_HANDLE)> {
        let module = self.module()?;
        match self.session {
            Some(session) => Ok((module, session)),
            None => Err(errorf!(Status::SessionClosed, "no session open")),
        }
    }

    // Raw auxiliary entry plus the slot it applies to.
    fn aux_entry(&self, index: usize, name: &str) -> Result<(CK_SLOT_ID, CK_VOID_PTR)> {
        let (module, _) = self.session()?;
        let aux = module.aux().ok_or_else(|| {
            errorf!(
                Status::AuxFunctionNotAvailable,
                "auxiliary functions not available"
            )
        })?;
        let entry = aux.entry(index).ok_or_else(|| {
            errorf!(
                Status::AuxFunctionNotAvailable,
                "{} function not available",
                name
            )
        })?;
        let slot = self
            .current_slot
            .ok_or_else(|| errorf!(Status::SessionClosed, "no current slot"))?;
        Ok((slot, entry))
    }

    #[instrument(skip(self))]
    pub fn initialize(&mut self, config: &LibraryConfig) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let path = config.resolve_module_path();
        let module = Module::load(&path, config.load_aux())?;
        self.start(module)
    }

    /// Initializes from a module that is already part of this process.
    ///
    /// # Safety
    ///
    /// The entry points must behave like `C_GetFunctionList` and `E_GetAuxFunctionList`, and the
    /// tables they hand out must remain valid until [`Pkcs11Library::finalize`] returns.
    pub unsafe fn initialize_with_function_list(
        &mut self,
        get_function_list: GetFunctionListFn,
        get_aux_function_list: Option<GetAuxFunctionListFn>,
    ) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let module = Module::from_entry_points(get_function_list, get_aux_function_list)?;
        self.start(module)
    }

    fn start(&mut self, module: Module) -> Result<()> {
        let initialize = ck_fn!(module, C_Initialize);
        let rv = unsafe { initialize(ptr::null_mut()) };
        if rv != CKR_OK && rv != CKR_CRYPTOKI_ALREADY_INITIALIZED {
            return Err(Error::from_rv(rv, "failed to initialize PKCS #11"));
        }
        if module.aux().is_none() {
            debug!("auxiliary functions not available");
        }
        info!(aux = module.aux().is_some(), "PKCS #11 library initialized");
        self.module = Some(module);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn finalize(&mut self) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        if let Err(err) = self.close_session() {
            warn!("close session during finalize failed: {}", err);
        }
        if let Some(module) = self.module.take() {
            if let Some(finalize) = module.functions().C_Finalize {
                let rv = unsafe { finalize(ptr::null_mut()) };
                if rv != CKR_OK {
                    warn!("C_Finalize failed: {}", rv_to_string(rv));
                }
            }
        }
        self.current_slot = None;
        self.logged_in = false;
        info!("PKCS #11 library finalized");
        Ok(())
    }

    pub fn get_info(&self) -> Result<LibraryInfo> {
        let get_info = ck_fn!(self.module()?, C_GetInfo);
        let mut info = CK_INFO::default();
        let rv = unsafe { get_info(&mut info) };
        check_rv(rv, "failed to get library info")?;
        Ok(LibraryInfo::from(&info))
    }

    #[instrument(skip(self))]
    pub fn get_slot_list(&self, token_present: bool) -> Result<Vec<CK_SLOT_ID>> {
        let get_slot_list = ck_fn!(self.module()?, C_GetSlotList);
        let present = if token_present { CK_TRUE } else { CK_FALSE };

        let mut count: CK_ULONG = 0;
        let rv = unsafe { get_slot_list(present, ptr::null_mut(), &mut count) };
        check_rv(rv, "failed to get slot count")?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut slots = vec![0 as CK_SLOT_ID; count as usize];
        let rv = unsafe { get_slot_list(present, slots.as_mut_ptr(), &mut count) };
        check_rv(rv, "failed to get slot list")?;
        slots.truncate(count as usize);
        debug!("found {} slots", slots.len());
        Ok(slots)
    }

    pub fn get_slot_info(&self, slot: CK_SLOT_ID) -> Result<SlotInfo> {
        let get_slot_info = ck_fn!(self.module()?, C_GetSlotInfo);
        let mut info = CK_SLOT_INFO::default();
        let rv = unsafe { get_slot_info(slot, &mut info) };
        check_rv(rv, "failed to get slot info")?;
        Ok(SlotInfo::from(&info))
    }

    pub fn get_token_info(&self, slot: CK_SLOT_ID) -> Result<TokenInfo> {
        let get_token_info = ck_fn!(self.module()?, C_GetTokenInfo);
        let mut info = CK_TOKEN_INFO::default();
        let rv = unsafe { get_token_info(slot, &mut info) };
        check_rv(rv, "failed to get token info")?;
        Ok(TokenInfo::from(&info))
    }

    pub fn get_mechanism_list(&self, slot: CK_SLOT_ID) -> Result<Vec<CK_MECHANISM_TYPE>> {
        let get_mechanism_list = ck_fn!(self.module()?, C_GetMechanismList);
        let mut count: CK_ULONG = 0;
        let rv = unsafe { get_mechanism_list(slot, ptr::null_mut(), &mut count) };
        check_rv(rv, "failed to get mechanism count")?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut mechanisms = vec![0 as CK_MECHANISM_TYPE; count as usize];
        let rv = unsafe { get_mechanism_list(slot, mechanisms.as_mut_ptr(), &mut count) };
        check_rv(rv, "failed to get mechanism list")?;
        mechanisms.truncate(count as usize);
        Ok(mechanisms)
    }

    /// Opens a serial session on `slot`, replacing any session that is already open.
    #[instrument(skip(self))]
    pub fn open_session(&mut self, slot: CK_SLOT_ID, read_write: bool) -> Result<()> {
        let open_session = ck_fn!(self.module()?, C_OpenSession);
        if self.has_session() {
            if let Err(err) = self.close_session() {
                warn!("failed to close previous session: {}", err);
            }
        }

        let mut flags = CKF_SERIAL_SESSION;
        if read_write {
            flags |= CKF_RW_SESSION;
        }
        let mut session = CK_INVALID_HANDLE;
        let rv = unsafe { open_session(slot, flags, ptr::null_mut(), None, &mut session) };
        check_rv(rv, "failed to open session")?;

        self.session = Some(session);
        self.current_slot = Some(slot);
        info!(session, "session opened");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn close_session(&mut self) -> Result<()> {
        if !self.has_session() {
            return Ok(());
        }
        if self.logged_in {
            if let Err(err) = self.logout() {
                warn!("logout before close failed: {}", err);
            }
        }
        let close_session = self.module()?.functions().C_CloseSession;
        let session = self.session.take();
        self.current_slot = None;

        let (close_session, session) = match (close_session, session) {
            (Some(f), Some(s)) => (f, s),
            _ => {
                return Err(errorf!(
                    Status::FunctionNotSupported,
                    "C_CloseSession is not provided by the module"
                ))
            }
        };
        let rv = unsafe { close_session(session) };
        check_rv(rv, "failed to close session")?;
        info!(session, "session closed");
        Ok(())
    }

    #[instrument(skip(self, pin))]
    pub fn login(&mut self, pin: &str, user_type: UserType) -> Result<()> {
        let (module, session) = self.session()?;
        let login = ck_fn!(module, C_Login);
        let rv = unsafe {
            login(
                session,
                user_type.as_raw(),
                pin.as_ptr() as CK_UTF8CHAR_PTR,
                pin.len() as CK_ULONG,
            )
        };
        check_rv(rv, "failed to login")?;
        self.logged_in = true;
        info!("logged in");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn logout(&mut self) -> Result<()> {
        if !self.logged_in {
            return Ok(());
        }
        let result = self.session().and_then(|(module, session)| {
            let logout = ck_fn!(module, C_Logout);
            let rv = unsafe { logout(session) };
            check_rv(rv, "failed to logout")
        });
        self.logged_in = false;
        result
    }

    pub fn get_session_info(&self) -> Result<SessionInfo> {
        let (module, session) = self.session()?;
        let get_session_info = ck_fn!(module, C_GetSessionInfo);
        let mut info = CK_SESSION_INFO::default();
        let rv = unsafe { get_session_info(session, &mut info) };
        check_rv(rv, "failed to get session info")?;
        Ok(SessionInfo::from(&info))
    }

    #[instrument(skip_all)]
    pub fn change_pin(&self, old_pin: &str, new_pin: &str) -> Result<()> {
        let (module, session) = self.session()?;
        let set_pin = ck_fn!(module, C_SetPIN);
        let rv = unsafe {
            set_pin(
                session,
                old_pin.as_ptr() as CK_UTF8CHAR_PTR,
                old_pin.len() as CK_ULONG,
                new_pin.as_ptr() as CK_UTF8CHAR_PTR,
                new_pin.len() as CK_ULONG,
            )
        };
        check_rv(rv, "failed to change PIN")
    }

    #[instrument(skip_all)]
    pub fn init_pin(&self, pin: &str) -> Result<()> {
        let (module, session) = self.session()?;
        let init_pin = ck_fn!(module, C_InitPIN);
        let rv = unsafe {
            init_pin(
                session,
                pin.as_ptr() as CK_UTF8CHAR_PTR,
                pin.len() as CK_ULONG,
            )
        };
        check_rv(rv, "failed to initialize PIN")
    }

    pub fn get_pin_info(&self) -> Result<PinInfo> {
        let (slot, entry) = self.aux_entry(EP_GET_PIN_INFO, "GetPinInfo")?;
        // SAFETY: the EP_GET_PIN_INFO slot holds an EP_GetPinInfo.
        let get_pin_info = unsafe { mem::transmute::<CK_VOID_PTR, EP_GetPinInfo>(entry) };
        let mut info = AUX_PIN_INFO::default();
        let rv = unsafe { get_pin_info(slot, &mut info) };
        check_rv(rv, "failed to get PIN info")?;
        Ok(PinInfo::from(info))
    }

    #[instrument(skip(self))]
    pub fn set_token_label(&self, label: &str) -> Result<()> {
        let (slot, entry) = self.aux_entry(EP_SET_TOKEN_LABEL, "SetTokenLabel")?;
        let label = CString::new(label)
            .map_err(|_| errorf!(Status::InvalidParameter, "label contains a NUL byte"))?;
        // SAFETY: the EP_SET_TOKEN_LABEL slot holds an EP_SetTokenLabel.
        let set_token_label = unsafe { mem::transmute::<CK_VOID_PTR, EP_SetTokenLabel>(entry) };
        let rv = unsafe {
            set_token_label(
                slot,
                CKU_USER,
                ptr::null_mut(),
                0,
                label.as_ptr() as CK_UTF8CHAR_PTR,
            )
        };
        check_rv(rv, "failed to set token label")
    }

    #[instrument(skip(self))]
    pub fn set_token_timeout(&self, seconds: CK_ULONG) -> Result<()> {
        let (slot, entry) = self.aux_entry(EP_SET_TOKEN_TIMEOUT, "SetTokenTimeout")?;
        let millis = seconds
            .checked_mul(1000)
            .ok_or_else(|| errorf!(Status::InvalidParameter, "timeout {}s too large", seconds))?;
        // SAFETY: the EP_SET_TOKEN_TIMEOUT slot holds an EP_SetTokenTimeout.
        let set_token_timeout = unsafe { mem::transmute::<CK_VOID_PTR, EP_SetTokenTimeout>(entry) };
        let rv = unsafe { set_token_timeout(slot, millis) };
        check_rv(rv, "failed to set token timeout")
    }

    /// Token timeout in whole seconds.
    pub fn get_token_timeout(&self) -> Result<CK_ULONG> {
        let (slot, entry) = self.aux_entry(EP_GET_TOKEN_TIMEOUT, "GetTokenTimeout")?;
        // SAFETY: the EP_GET_TOKEN_TIMEOUT slot holds an EP_GetTokenTimeout.
        let get_token_timeout = unsafe { mem::transmute::<CK_VOID_PTR, EP_GetTokenTimeout>(entry) };
        let mut millis: CK_ULONG = 0;
        let rv = unsafe { get_token_timeout(slot, &mut millis) };
        check_rv(rv, "failed to get token timeout")?;
        Ok(millis / 1000)
    }

    /// Erases the token. Needs the SO PIN.
    #[instrument(skip_all)]
    pub fn blank_token(&self, so_pin: &str) -> Result<()> {
        let (slot, entry) = self.aux_entry(EP_BLANK_TOKEN, "BlankToken")?;
        // SAFETY: the EP_BLANK_TOKEN slot holds an EP_BlankToken.
        let blank_token = unsafe { mem::transmute::<CK_VOID_PTR, EP_BlankToken>(entry) };
        let rv = unsafe {
            blank_token(
                slot,
                so_pin.as_ptr() as CK_UTF8CHAR_PTR,
                so_pin.len() as CK_ULONG,
            )
        };
        check_rv(rv, "failed to blank token")?;
        info!(slot, "token blanked");
        Ok(())
    }

    /// Waits for a slot event, or polls for one when `blocking` is false. `None` means the
    /// module had nothing to report.
    #[instrument(skip(self))]
    pub fn wait_for_slot_event(&self, blocking: bool) -> Result<Option<SlotEvent>> {
        let (_, entry) = self.aux_entry(EP_WAITFORSLOTEVENT, "WaitForSlotEvent")?;
        // SAFETY: the EP_WAITFORSLOTEVENT slot holds an EP_WaitForSlotEvent.
        let wait_for_slot_event =
            unsafe { mem::transmute::<CK_VOID_PTR, EP_WaitForSlotEvent>(entry) };
        let flags = if blocking { 0 } else { CKF_DONT_BLOCK };
        let mut slot_id: CK_SLOT_ID = 0;
        let mut event: CK_ULONG = 0;
        let mut ext_data: CK_ULONG = 0;
        let rv = unsafe {
            wait_for_slot_event(
                flags,
                &mut slot_id,
                &mut event,
                &mut ext_data,
                ptr::null_mut(),
            )
        };
        if rv == CKR_NO_EVENT {
            return Ok(None);
        }
        check_rv(rv, "failed to wait for slot event")?;
        debug!(slot_id, event, "slot event");
        Ok(Some(SlotEvent { slot_id, event }))
    }

    // Token objects of one class. FindObjectsFinal always runs once the search has started.
    fn find_objects(&self, class: CK_OBJECT_CLASS) -> Result<Vec<CK_OBJECT_HANDLE>> {
        let (module, session) = self.session()?;
        let find_init = ck_fn!(module, C_FindObjectsInit);
        let find = ck_fn!(module, C_FindObjects);
        let find_final = ck_fn!(module, C_FindObjectsFinal);

        let template = Template::new()
            .ulong(CKA_CLASS, class)
            .bool(CKA_TOKEN, true);
        let mut raw = template.to_raw();
        let rv = unsafe { find_init(session, raw.as_mut_ptr(), raw.count()) };
        check_rv(rv, "failed to initialize object search")?;

        let mut handles = Vec::new();
        let result = loop {
            let mut handle = CK_INVALID_HANDLE;
            let mut count: CK_ULONG = 0;
            let rv = unsafe { find(session, &mut handle, 1, &mut count) };
            if rv != CKR_OK {
                break Err(Error::from_rv(rv, "failed to find objects"));
            }
            if count == 0 {
                break Ok(());
            }
            handles.push(handle);
        };

        let rv = unsafe { find_final(session) };
        if rv != CKR_OK {
            warn!("C_FindObjectsFinal failed: {}", rv_to_string(rv));
        }
        result?;
        debug!(class, "found {} objects", handles.len());
        Ok(handles)
    }

    /// Reads one attribute with a size query followed by the read. A zero length gives an empty
    /// vector.
    pub fn get_object_attribute(
        &self,
        handle: CK_OBJECT_HANDLE,
        attribute_type: CK_ATTRIBUTE_TYPE,
    ) -> Result<Vec<u8>> {
        let (module, session) = self.session()?;
        let get_attribute_value = ck_fn!(module, C_GetAttributeValue);

        let mut attribute = CK_ATTRIBUTE {
            type_: attribute_type,
            pValue: ptr::null_mut(),
            ulValueLen: 0,
        };
        let rv = unsafe { get_attribute_value(session, handle, &mut attribute, 1) };
        check_rv(rv, "failed to get attribute length")?;
        if attribute.ulValueLen == CK_UNAVAILABLE_INFORMATION {
            return Err(errorf!(
                Status::AttributeTypeInvalid,
                "attribute 0x{:x} is unavailable",
                attribute_type
            ));
        }
        if attribute.ulValueLen == 0 {
            return Ok(Vec::new());
        }

        let mut value = vec![0u8; attribute.ulValueLen as usize];
        attribute.pValue = value.as_mut_ptr() as CK_VOID_PTR;
        let rv = unsafe { get_attribute_value(session, handle, &mut attribute, 1) };
        check_rv(rv, "failed to get attribute value")?;
        value.truncate(attribute.ulValueLen as usize);
        Ok(value)
    }

    fn attribute_or_empty(&self, handle: CK_OBJECT_HANDLE, type_: CK_ATTRIBUTE_TYPE) -> Vec<u8> {
        match self.get_object_attribute(handle, type_) {
            Ok(value) => value,
            Err(err) => {
                debug!("attribute 0x{:x} of object {} unreadable: {}", type_, handle, err);
                Vec::new()
            }
        }
    }

    fn attribute_bool(&self, handle: CK_OBJECT_HANDLE, type_: CK_ATTRIBUTE_TYPE) -> bool {
        decode_bool(&self.attribute_or_empty(handle, type_)).unwrap_or(false)
    }

    fn attribute_ulong(&self, handle: CK_OBJECT_HANDLE, type_: CK_ATTRIBUTE_TYPE) -> CK_ULONG {
        decode_ulong(&self.attribute_or_empty(handle, type_)).unwrap_or(0)
    }

    fn attribute_string(&self, handle: CK_OBJECT_HANDLE, type_: CK_ATTRIBUTE_TYPE) -> String {
        String::from_utf8_lossy(&self.attribute_or_empty(handle, type_)).into_owned()
    }

    fn certificate_info(&self, handle: CK_OBJECT_HANDLE) -> CertificateInfo {
        CertificateInfo {
            handle,
            label: self.attribute_string(handle, CKA_LABEL),
            subject: self.attribute_or_empty(handle, CKA_SUBJECT),
            id: self.attribute_or_empty(handle, CKA_ID),
            value: self.attribute_or_empty(handle, CKA_VALUE),
            certificate_type: self.attribute_ulong(handle, CKA_CERTIFICATE_TYPE),
        }
    }

    fn key_info(&self, handle: CK_OBJECT_HANDLE, object_class: CK_OBJECT_CLASS) -> KeyInfo {
        KeyInfo {
            handle,
            label: self.attribute_string(handle, CKA_LABEL),
            key_type: self.attribute_ulong(handle, CKA_KEY_TYPE),
            object_class,
            id: self.attribute_or_empty(handle, CKA_ID),
            can_encrypt: self.attribute_bool(handle, CKA_ENCRYPT),
            can_decrypt: self.attribute_bool(handle, CKA_DECRYPT),
            can_sign: self.attribute_bool(handle, CKA_SIGN),
            can_verify: self.attribute_bool(handle, CKA_VERIFY),
            can_wrap: self.attribute_bool(handle, CKA_WRAP),
            can_unwrap: self.attribute_bool(handle, CKA_UNWRAP),
            can_derive: self.attribute_bool(handle, CKA_DERIVE),
            is_sensitive: self.attribute_bool(handle, CKA_SENSITIVE),
            is_extractable: self.attribute_bool(handle, CKA_EXTRACTABLE),
        }
    }

    #[instrument(skip(self))]
    pub fn find_certificates(&self) -> Result<Vec<CertificateInfo>> {
        let handles = self.find_objects(CKO_CERTIFICATE)?;
        Ok(handles
            .into_iter()
            .map(|handle| self.certificate_info(handle))
            .collect())
    }

    /// Keys of `class` (`CKO_PUBLIC_KEY`, `CKO_PRIVATE_KEY` or `CKO_SECRET_KEY`).
    #[instrument(skip(self))]
    pub fn find_keys(&self, class: CK_OBJECT_CLASS) -> Result<Vec<KeyInfo>> {
        let handles = self.find_objects(class)?;
        Ok(handles
            .into_iter()
            .map(|handle| self.key_info(handle, class))
            .collect())
    }

    #[instrument(skip(self))]
    pub fn find_data_objects(&self) -> Result<Vec<CK_OBJECT_HANDLE>> {
        self.find_objects(CKO_DATA)
    }

    /// DER encoding of a certificate object.
    pub fn export_certificate(&self, handle: CK_OBJECT_HANDLE) -> Result<Vec<u8>> {
        self.get_object_attribute(handle, CKA_VALUE)
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn export_certificate_to_file<P: AsRef<Path>>(
        &self,
        handle: CK_OBJECT_HANDLE,
        path: P,
    ) -> Result<()> {
        let der = self.export_certificate(handle)?;
        fs::write(path.as_ref(), &der).map_err(|err| {
            errorf!(
                Status::FileIo,
                "failed to write {}: {}",
                path.as_ref().display(),
                err
            )
        })
    }

    /// PKCS #1 `RSAPublicKey` DER built from the modulus and public exponent of `handle`.
    pub fn export_rsa_public_key(&self, handle: CK_OBJECT_HANDLE) -> Result<Vec<u8>> {
        let modulus = self.get_object_attribute(handle, CKA_MODULUS)?;
        let exponent = self.get_object_attribute(handle, CKA_PUBLIC_EXPONENT)?;
        let key = pkcs1::RsaPublicKey {
            modulus: UIntRef::new(&modulus)
                .map_err(|err| errorf!(Status::AttributeValueInvalid, "bad modulus: {}", err))?,
            public_exponent: UIntRef::new(&exponent)
                .map_err(|err| errorf!(Status::AttributeValueInvalid, "bad exponent: {}", err))?,
        };
        key.to_vec()
            .map_err(|err| errorf!(Status::General, "failed to encode public key: {}", err))
    }

    #[instrument(skip(self))]
    pub fn destroy_object(&self, handle: CK_OBJECT_HANDLE) -> Result<()> {
        let (module, session) = self.session()?;
        let destroy_object = ck_fn!(module, C_DestroyObject);
        let rv = unsafe { destroy_object(session, handle) };
        check_rv(rv, "failed to destroy object")
    }

    #[instrument(skip(self))]
    pub fn generate_rsa_key_pair(&self, modulus_bits: CK_ULONG, label: &str) -> Result<KeyPair> {
        let (module, session) = self.session()?;
        let generate_key_pair = ck_fn!(module, C_GenerateKeyPair);

        let public_template = Template::new()
            .ulong(CKA_CLASS, CKO_PUBLIC_KEY)
            .ulong(CKA_KEY_TYPE, CKK_RSA)
            .bytes(CKA_LABEL, label.as_bytes())
            .ulong(CKA_MODULUS_BITS, modulus_bits)
            .bool(CKA_ENCRYPT, true)
            .bool(CKA_VERIFY, true)
            .bool(CKA_WRAP, true)
            .bool(CKA_TOKEN, true);
        let private_template = Template::new()
            .ulong(CKA_CLASS, CKO_PRIVATE_KEY)
            .ulong(CKA_KEY_TYPE, CKK_RSA)
            .bytes(CKA_LABEL, label.as_bytes())
            .bool(CKA_DECRYPT, true)
            .bool(CKA_SIGN, true)
            .bool(CKA_UNWRAP, true)
            .bool(CKA_PRIVATE, true)
            .bool(CKA_SENSITIVE, true)
            .bool(CKA_TOKEN, true)
            .bool(CKA_EXTRACTABLE, true);

        let mut mechanism = Mechanism::new(CKM_RSA_PKCS_KEY_PAIR_GEN).to_raw();
        let mut public_raw = public_template.to_raw();
        let mut private_raw = private_template.to_raw();
        let mut public_handle = CK_INVALID_HANDLE;
        let mut private_handle = CK_INVALID_HANDLE;
        let rv = unsafe {
            generate_key_pair(
                session,
                &mut mechanism,
                public_raw.as_mut_ptr(),
                public_raw.count(),
                private_raw.as_mut_ptr(),
                private_raw.count(),
                &mut public_handle,
                &mut private_handle,
            )
        };
        check_rv(rv, "failed to generate RSA key pair")?;
        info!(public_handle, private_handle, "RSA key pair generated");

        Ok(KeyPair {
            public_key: KeyInfo {
                handle: public_handle,
                label: label.to_string(),
                key_type: CKK_RSA,
                object_class: CKO_PUBLIC_KEY,
                can_encrypt: true,
                can_verify: true,
                can_wrap: true,
                ..Default::default()
            },
            private_key: KeyInfo {
                handle: private_handle,
                label: label.to_string(),
                key_type: CKK_RSA,
                object_class: CKO_PRIVATE_KEY,
                can_decrypt: true,
                can_sign: true,
                can_unwrap: true,
                is_sensitive: true,
                is_extractable: true,
                ..Default::default()
            },
        })
    }

    /// Generates a session secret key. DES and DES3 ignore `key_length`.
    #[instrument(skip(self))]
    pub fn generate_symmetric_key(
        &self,
        algorithm: SymmetricAlgorithm,
        key_length: CK_ULONG,
        label: &str,
    ) -> Result<KeyInfo> {
        let (module, session) = self.session()?;
        let generate_key = ck_fn!(module, C_GenerateKey);

        let template = Template::new()
            .ulong(CKA_CLASS, CKO_SECRET_KEY)
            .ulong(CKA_KEY_TYPE, algorithm.key_type())
            .bytes(CKA_LABEL, label.as_bytes())
            .bool(CKA_TOKEN, false)
            .bool(CKA_PRIVATE, true)
            .bool(CKA_ENCRYPT, true)
            .bool(CKA_DECRYPT, true)
            .ulong(CKA_VALUE_LEN, algorithm.key_length(key_length));

        let mut mechanism = Mechanism::new(algorithm.key_gen_mechanism()).to_raw();
        let mut raw = template.to_raw();
        let mut handle = CK_INVALID_HANDLE;
        let rv = unsafe {
            generate_key(
                session,
                &mut mechanism,
                raw.as_mut_ptr(),
                raw.count(),
                &mut handle,
            )
        };
        check_rv(rv, "failed to generate symmetric key")?;
        info!(handle, "{} key generated", algorithm);

        Ok(KeyInfo {
            handle,
            label: label.to_string(),
            key_type: algorithm.key_type(),
            object_class: CKO_SECRET_KEY,
            can_encrypt: true,
            can_decrypt: true,
            ..Default::default()
        })
    }

    // Init with `init`, then size query, allocate, and transform with `transform`.
    fn run_transform(
        &self,
        init: CK_C_OperationInit,
        transform: Option<TransformFn>,
        mechanism: &Mechanism<'_>,
        key: CK_OBJECT_HANDLE,
        input: &[u8],
        operation: &str,
    ) -> Result<Vec<u8>> {
        let (_, session) = self.session()?;
        let (init, transform) = match (init, transform) {
            (Some(init), Some(transform)) => (init, transform),
            _ => {
                return Err(errorf!(
                    Status::FunctionNotSupported,
                    "{} is not provided by the module",
                    operation
                ))
            }
        };

        let mut raw = mechanism.to_raw();
        let rv = unsafe { init(session, &mut raw, key) };
        check_rv(rv, format!("failed to initialize {}", operation))?;

        let input_ptr = input.as_ptr() as CK_BYTE_PTR;
        let input_len = input.len() as CK_ULONG;
        let mut len: CK_ULONG = 0;
        let rv = unsafe { transform(session, input_ptr, input_len, ptr::null_mut(), &mut len) };
        check_rv(rv, format!("failed to get {} output length", operation))?;

        let mut output = vec![0u8; len as usize];
        let rv = unsafe { transform(session, input_ptr, input_len, output.as_mut_ptr(), &mut len) };
        check_rv(rv, format!("{} failed", operation))?;
        output.truncate(len as usize);
        Ok(output)
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn sign(
        &self,
        key: CK_OBJECT_HANDLE,
        data: &[u8],
        hash: HashAlgorithm,
    ) -> Result<Vec<u8>> {
        let mechanism = signature_mechanism(hash, AsymmetricAlgorithm::Rsa)?;
        let functions = self.module()?.functions();
        self.run_transform(
            functions.C_SignInit,
            functions.C_Sign,
            &mechanism,
            key,
            data,
            "sign",
        )
    }

    /// Ok(()) only for a valid signature; a mismatch is [`Status::SignatureInvalid`].
    #[instrument(skip(self, data, signature), fields(len = data.len()))]
    pub fn verify(
        &self,
        key: CK_OBJECT_HANDLE,
        data: &[u8],
        signature: &[u8],
        hash: HashAlgorithm,
    ) -> Result<()> {
        let (module, session) = self.session()?;
        let verify_init = ck_fn!(module, C_VerifyInit);
        let verify = ck_fn!(module, C_Verify);

        let mechanism = signature_mechanism(hash, AsymmetricAlgorithm::Rsa)?;
        let mut raw = mechanism.to_raw();
        let rv = unsafe { verify_init(session, &mut raw, key) };
        check_rv(rv, "failed to initialize verify")?;

        let rv = unsafe {
            verify(
                session,
                data.as_ptr() as CK_BYTE_PTR,
                data.len() as CK_ULONG,
                signature.as_ptr() as CK_BYTE_PTR,
                signature.len() as CK_ULONG,
            )
        };
        check_rv(rv, "signature verification failed")
    }

    #[instrument(skip(self, data, iv), fields(len = data.len()))]
    pub fn encrypt(
        &self,
        key: CK_OBJECT_HANDLE,
        data: &[u8],
        algorithm: SymmetricAlgorithm,
        mode: CipherMode,
        iv: &[u8],
    ) -> Result<Vec<u8>> {
        let mechanism = symmetric_mechanism(algorithm, mode, iv)?;
        let functions = self.module()?.functions();
        self.run_transform(
            functions.C_EncryptInit,
            functions.C_Encrypt,
            &mechanism,
            key,
            data,
            "encrypt",
        )
    }

    #[instrument(skip(self, data, iv), fields(len = data.len()))]
    pub fn decrypt(
        &self,
        key: CK_OBJECT_HANDLE,
        data: &[u8],
        algorithm: SymmetricAlgorithm,
        mode: CipherMode,
        iv: &[u8],
    ) -> Result<Vec<u8>> {
        let mechanism = symmetric_mechanism(algorithm, mode, iv)?;
        let functions = self.module()?.functions();
        self.run_transform(
            functions.C_DecryptInit,
            functions.C_Decrypt,
            &mechanism,
            key,
            data,
            "decrypt",
        )
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn encrypt_rsa(&self, key: CK_OBJECT_HANDLE, data: &[u8]) -> Result<Vec<u8>> {
        let functions = self.module()?.functions();
        self.run_transform(
            functions.C_EncryptInit,
            functions.C_Encrypt,
            &Mechanism::new(CKM_RSA_PKCS),
            key,
            data,
            "RSA encrypt",
        )
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn decrypt_rsa(&self, key: CK_OBJECT_HANDLE, data: &[u8]) -> Result<Vec<u8>> {
        let functions = self.module()?.functions();
        self.run_transform(
            functions.C_DecryptInit,
            functions.C_Decrypt,
            &Mechanism::new(CKM_RSA_PKCS),
            key,
            data,
            "RSA decrypt",
        )
    }

    pub fn generate_random(&self, len: usize) -> Result<Vec<u8>> {
        let (module, session) = self.session()?;
        let generate_random = ck_fn!(module, C_GenerateRandom);
        let mut buf = vec![0u8; len];
        let rv = unsafe { generate_random(session, buf.as_mut_ptr(), len as CK_ULONG) };
        check_rv(rv, "failed to generate random data")?;
        Ok(buf)
    }
}

impl Drop for Pkcs11Library {
    fn drop(&mut self) {
        if let Err(err) = self.finalize() {
            warn!("finalize on drop failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_library() {
        let mut lib = Pkcs11Library::new();
        assert!(!lib.is_initialized());
        assert!(!lib.has_session());
        assert!(!lib.is_logged_in());
        assert_eq!(lib.current_slot(), None);
        assert!(!lib.has_aux_functions());

        let err = lib.get_slot_list(true).unwrap_err();
        assert_eq!(err.status(), Status::CryptokiNotInitialized);
        let err = lib.open_session(1, true).unwrap_err();
        assert_eq!(err.status(), Status::CryptokiNotInitialized);
        let err = lib.find_certificates().unwrap_err();
        assert_eq!(err.status(), Status::CryptokiNotInitialized);

        // Nothing to tear down.
        assert!(lib.close_session().is_ok());
        assert!(lib.logout().is_ok());
        assert!(lib.finalize().is_ok());
    }

    #[test]
    fn load_failure_leaves_library_uninitialized() {
        let mut lib = Pkcs11Library::new();
        let config = LibraryConfig::new().with_module_path("/nonexistent/libvendor.so");
        let err = lib.initialize(&config).unwrap_err();
        assert_eq!(err.status(), Status::LibraryLoadFailed);
        assert!(!lib.is_initialized());
    }

    #[test]
    fn cbc_without_iv_fails_before_module_call() {
        let lib = Pkcs11Library::new();
        let err = lib
            .encrypt(1, b"data", SymmetricAlgorithm::Aes, CipherMode::Cbc, &[])
            .unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);
    }
}
