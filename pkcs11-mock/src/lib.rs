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

//! A software PKCS #11 v2.20 module with the vendor auxiliary table, for exercising token
//! bindings without hardware. Its ciphers are keyed stand-ins and provide no security.

#![allow(non_snake_case)]

extern crate lazy_static;

mod module;
mod token;
mod transform;
mod vendor;

use std::ops;
use std::ptr;
use std::slice;
use std::sync::{self, PoisonError};

use lazy_static::lazy_static;
use module::{Module, OperationKind, Result};
use pkcs11_sys::*;
use token::{Attribute, Token};
use tracing::debug;

pub use token::{
    CERTIFICATE_DER, CERTIFICATE_ID, CERTIFICATE_LABEL, CERTIFICATE_SUBJECT, DATA_LABEL,
    DEFAULT_TIMEOUT_MS, EMPTY_SLOT, MAX_PIN_LEN, MIN_PIN_LEN, RSA_KEY_BITS, RSA_KEY_LABEL, SLOTS,
    SLOT_WITH_TOKEN, SO_PIN, SO_PIN_MAX_RETRIES, TOKEN_LABEL, USER_PIN, USER_PIN_MAX_RETRIES,
};
pub use transform::MECHANISMS;
pub use vendor::{
    push_slot_event, E_BlankToken, E_GetAuxFunctionList, E_GetPinInfo, E_GetTokenTimeout,
    E_SetTokenLabel, E_SetTokenTimeout, E_WaitForSlotEvent, SLOT_EVENT_TOKEN_INSERTED,
    SLOT_EVENT_TOKEN_REMOVED,
};

pub const MANUFACTURER_ID: &str = "Mock Vendor";
pub const LIBRARY_DESCRIPTION: &str = "Mock PKCS #11 Module";
pub const TOKEN_MODEL: &str = "Mock";
pub const TOKEN_SERIAL: &str = "0000000000000001";
const MAX_SESSIONS: CK_ULONG = 16;

fn err_not_supported(name: &str) -> CK_RV {
    debug!("{}() not supported", name);
    return CKR_FUNCTION_NOT_SUPPORTED;
}

lazy_static! {
    // The module as a global singleton held by a mutex. This its set through calls to C_Initialize
    // and cleaned up by C_Finalize.
    //
    // Use result_to_rv_with_mod to access this.
    static ref MODULE: sync::Mutex<Option<Module>> = sync::Mutex::new(None);

    // Token contents. Unlike MODULE this survives C_Finalize, the way a physical token keeps its
    // objects. Always locked after MODULE.
    static ref TOKEN: sync::Mutex<Token> = sync::Mutex::new(Token::new());
}

// Puts the module back in its initial state: finalized, factory token contents and no pending
// slot events.
pub fn reset() {
    *MODULE.lock().unwrap_or_else(PoisonError::into_inner) = None;
    *TOKEN.lock().unwrap_or_else(PoisonError::into_inner) = Token::new();
    vendor::clear_slot_events();
}

// Helper function to convert a function that returns a result to a CK_RV, logging any errors. The
// fn_name should be the corresponding PKCS #11 function this is called by, for example
// "C_GetInfo".
fn result_to_rv<F>(fn_name: &str, f: F) -> CK_RV
where
    F: ops::FnOnce() -> Result<()>,
{
    return match f() {
        Ok(()) => CKR_OK,
        Err(err) => {
            debug!("{}() {}", fn_name, err);
            err.rv()
        }
    };
}

// Helper function that allows mutable access to the global Module and Token, while also
// converting the Result to a CK_RV suitable to be returned from a PKCS #11 function. Similar to
// result_to_rv(), fn_name should be the corresponding PKCS #11 function.
//
// ```
// return result_to_rv_with_mod("C_GetSlotList", |m, token| {
//     // Use "m" and "token" to retrieve the slot list.
//     // ...
//
//     return Ok(());
// });
// ```
fn result_to_rv_with_mod<F>(fn_name: &str, f: F) -> CK_RV
where
    F: ops::FnOnce(&mut Module, &mut Token) -> Result<()>,
{
    return result_to_rv(fn_name, || {
        let mut o = MODULE
            .lock()
            .map_err(|err| errorf!(CKR_GENERAL_ERROR, "failed to acquire lock: {}", err))?;
        let m = o
            .as_mut()
            .ok_or_else(|| errorf!(CKR_CRYPTOKI_NOT_INITIALIZED, "module not initialized"))?;
        let mut token = TOKEN
            .lock()
            .map_err(|err| errorf!(CKR_GENERAL_ERROR, "failed to acquire lock: {}", err))?;
        return f(m, &mut token);
    });
}

// Borrows a caller buffer. A null pointer is only accepted for an empty buffer.
unsafe fn bytes<'a>(data: CK_BYTE_PTR, len: CK_ULONG) -> Result<&'a [u8]> {
    if data.is_null() {
        if len != 0 {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null buffer of length {}", len));
        }
        return Ok(&[]);
    }
    Ok(slice::from_raw_parts(data, len as usize))
}

unsafe fn read_template(template: CK_ATTRIBUTE_PTR, count: CK_ULONG) -> Result<Vec<Attribute>> {
    if template.is_null() {
        if count != 0 {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null template"));
        }
        return Ok(Vec::new());
    }
    slice::from_raw_parts(template, count as usize)
        .iter()
        .map(|a| {
            Ok(Attribute {
                typ: a.type_,
                val: bytes(a.pValue as CK_BYTE_PTR, a.ulValueLen)?.to_vec(),
            })
        })
        .collect()
}

unsafe fn read_mechanism(mechanism: CK_MECHANISM_PTR) -> Result<(CK_MECHANISM_TYPE, Vec<u8>)> {
    let mechanism = mechanism
        .as_ref()
        .ok_or_else(|| errorf!(CKR_ARGUMENTS_BAD, "null mechanism"))?;
    let parameter = bytes(mechanism.pParameter as CK_BYTE_PTR, mechanism.ulParameterLen)?;
    Ok((mechanism.mechanism, parameter.to_vec()))
}

// Two-call output convention: a null buffer only reports the length. Returns whether the data was
// copied.
unsafe fn write_output(data: &[u8], out: CK_BYTE_PTR, out_len: CK_ULONG_PTR) -> Result<bool> {
    if out_len.is_null() {
        return Err(errorf!(CKR_ARGUMENTS_BAD, "null output length"));
    }
    let capacity = *out_len as usize;
    *out_len = data.len() as CK_ULONG;
    if out.is_null() {
        return Ok(false);
    }
    if capacity < data.len() {
        return Err(errorf!(
            CKR_BUFFER_TOO_SMALL,
            "need {} bytes, have {}",
            data.len(),
            capacity
        ));
    }
    ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
    Ok(true)
}

unsafe fn write_ulongs(data: &[CK_ULONG], out: *mut CK_ULONG, count: CK_ULONG_PTR) -> Result<()> {
    if count.is_null() {
        return Err(errorf!(CKR_ARGUMENTS_BAD, "null count"));
    }
    let capacity = *count as usize;
    *count = data.len() as CK_ULONG;
    if out.is_null() {
        return Ok(());
    }
    if capacity < data.len() {
        return Err(errorf!(
            CKR_BUFFER_TOO_SMALL,
            "need {} entries, have {}",
            data.len(),
            capacity
        ));
    }
    ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
    Ok(())
}

// Space-padded fixed width text field.
fn padded<const N: usize>(s: &str) -> [CK_UTF8CHAR; N] {
    let mut field = [b' '; N];
    let n = s.len().min(N);
    field[..n].copy_from_slice(&s.as_bytes()[..n]);
    field
}

static mut FUNC_LIST: CK_FUNCTION_LIST = CK_FUNCTION_LIST {
    version: CK_VERSION {
        major: CRYPTOKI_VERSION_MAJOR,
        minor: CRYPTOKI_VERSION_MINOR,
    },
    C_Initialize: Some(C_Initialize),
    C_Finalize: Some(C_Finalize),
    C_GetInfo: Some(C_GetInfo),
    C_GetFunctionList: Some(C_GetFunctionList),
    C_GetSlotList: Some(C_GetSlotList),
    C_GetSlotInfo: Some(C_GetSlotInfo),
    C_GetTokenInfo: Some(C_GetTokenInfo),
    C_GetMechanismList: Some(C_GetMechanismList),
    C_GetMechanismInfo: Some(C_GetMechanismInfo),
    C_InitToken: Some(C_InitToken),
    C_InitPIN: Some(C_InitPIN),
    C_SetPIN: Some(C_SetPIN),
    C_OpenSession: Some(C_OpenSession),
    C_CloseSession: Some(C_CloseSession),
    C_CloseAllSessions: Some(C_CloseAllSessions),
    C_GetSessionInfo: Some(C_GetSessionInfo),
    C_GetOperationState: Some(C_GetOperationState),
    C_SetOperationState: Some(C_SetOperationState),
    C_Login: Some(C_Login),
    C_Logout: Some(C_Logout),
    C_CreateObject: Some(C_CreateObject),
    C_CopyObject: Some(C_CopyObject),
    C_DestroyObject: Some(C_DestroyObject),
    C_GetObjectSize: Some(C_GetObjectSize),
    C_GetAttributeValue: Some(C_GetAttributeValue),
    C_SetAttributeValue: Some(C_SetAttributeValue),
    C_FindObjectsInit: Some(C_FindObjectsInit),
    C_FindObjects: Some(C_FindObjects),
    C_FindObjectsFinal: Some(C_FindObjectsFinal),
    C_EncryptInit: Some(C_EncryptInit),
    C_Encrypt: Some(C_Encrypt),
    C_EncryptUpdate: Some(C_EncryptUpdate),
    C_EncryptFinal: Some(C_EncryptFinal),
    C_DecryptInit: Some(C_DecryptInit),
    C_Decrypt: Some(C_Decrypt),
    C_DecryptUpdate: Some(C_DecryptUpdate),
    C_DecryptFinal: Some(C_DecryptFinal),
    C_DigestInit: Some(C_DigestInit),
    C_Digest: Some(C_Digest),
    C_DigestUpdate: Some(C_DigestUpdate),
    C_DigestKey: Some(C_DigestKey),
    C_DigestFinal: Some(C_DigestFinal),
    C_SignInit: Some(C_SignInit),
    C_Sign: Some(C_Sign),
    C_SignUpdate: Some(C_SignUpdate),
    C_SignFinal: Some(C_SignFinal),
    C_SignRecoverInit: Some(C_SignRecoverInit),
    C_SignRecover: Some(C_SignRecover),
    C_VerifyInit: Some(C_VerifyInit),
    C_Verify: Some(C_Verify),
    C_VerifyUpdate: Some(C_VerifyUpdate),
    C_VerifyFinal: Some(C_VerifyFinal),
    C_VerifyRecoverInit: Some(C_VerifyRecoverInit),
    C_VerifyRecover: Some(C_VerifyRecover),
    C_DigestEncryptUpdate: Some(C_DigestEncryptUpdate),
    C_DecryptDigestUpdate: Some(C_DecryptDigestUpdate),
    C_SignEncryptUpdate: Some(C_SignEncryptUpdate),
    C_DecryptVerifyUpdate: Some(C_DecryptVerifyUpdate),
    C_GenerateKey: Some(C_GenerateKey),
    C_GenerateKeyPair: Some(C_GenerateKeyPair),
    C_WrapKey: Some(C_WrapKey),
    C_UnwrapKey: Some(C_UnwrapKey),
    C_DeriveKey: Some(C_DeriveKey),
    C_SeedRandom: Some(C_SeedRandom),
    C_GenerateRandom: Some(C_GenerateRandom),
    C_GetFunctionStatus: Some(C_GetFunctionStatus),
    C_CancelFunction: Some(C_CancelFunction),
    C_WaitForSlotEvent: Some(C_WaitForSlotEvent),
};

#[no_mangle]
pub extern "C" fn C_Initialize(init_args: CK_VOID_PTR) -> CK_RV {
    return result_to_rv("C_Initialize", || {
        if !init_args.is_null() {
            let args = unsafe { *(init_args as CK_C_INITIALIZE_ARGS_PTR) };
            if args.flags & CKF_LIBRARY_CANT_CREATE_OS_THREADS != 0 {
                return Err(errorf!(
                    CKR_NEED_TO_CREATE_THREADS,
                    "library requires use of OS threads"
                ));
            }
        }

        let mut o = MODULE
            .lock()
            .map_err(|err| errorf!(CKR_GENERAL_ERROR, "failed to acquire lock: {}", err))?;
        if o.is_some() {
            return Err(errorf!(
                CKR_CRYPTOKI_ALREADY_INITIALIZED,
                "module already initialized"
            ));
        }
        let m = Module::new()
            .map_err(|err| errorf!(CKR_FUNCTION_FAILED, "failed to initialize module: {}", err))?;
        *o = Some(m);
        return Ok(());
    });
}

#[no_mangle]
pub extern "C" fn C_Finalize(reserved: CK_VOID_PTR) -> CK_RV {
    return result_to_rv("C_Finalize", || {
        if !reserved.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "pReserved must be null"));
        }
        let mut o = MODULE
            .lock()
            .map_err(|err| errorf!(CKR_GENERAL_ERROR, "failed to acquire lock: {}", err))?;
        if o.take().is_none() {
            return Err(errorf!(CKR_CRYPTOKI_NOT_INITIALIZED, "module not initialized"));
        }
        let mut token = TOKEN
            .lock()
            .map_err(|err| errorf!(CKR_GENERAL_ERROR, "failed to acquire lock: {}", err))?;
        token.remove_session_objects(None);
        return Ok(());
    });
}

#[no_mangle]
pub extern "C" fn C_GetInfo(info_ptr: CK_INFO_PTR) -> CK_RV {
    return result_to_rv_with_mod("C_GetInfo", |_, _| {
        if info_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null info"));
        }
        let info = CK_INFO {
            cryptokiVersion: CK_VERSION {
                major: CRYPTOKI_VERSION_MAJOR,
                minor: CRYPTOKI_VERSION_MINOR,
            },
            manufacturerID: padded(MANUFACTURER_ID),
            flags: 0,
            libraryDescription: padded(LIBRARY_DESCRIPTION),
            libraryVersion: CK_VERSION { major: 1, minor: 0 },
        };
        unsafe {
            *info_ptr = info;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_GetFunctionList(function_list: CK_FUNCTION_LIST_PTR_PTR) -> CK_RV {
    if function_list.is_null() {
        return CKR_ARGUMENTS_BAD;
    }
    unsafe {
        *function_list = ptr::addr_of_mut!(FUNC_LIST);
    }
    return CKR_OK;
}

#[no_mangle]
pub extern "C" fn C_GetSlotList(
    token_present: CK_BBOOL,
    slot_list_ptr: CK_SLOT_ID_PTR,
    count_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return result_to_rv_with_mod("C_GetSlotList", |_, _| {
        let slots: &[CK_SLOT_ID] = if token_present != CK_FALSE {
            &[SLOT_WITH_TOKEN]
        } else {
            &SLOTS
        };
        unsafe { write_ulongs(slots, slot_list_ptr, count_ptr) }
    });
}

#[no_mangle]
pub extern "C" fn C_GetSlotInfo(slot_id: CK_SLOT_ID, slot_info_ptr: CK_SLOT_INFO_PTR) -> CK_RV {
    return result_to_rv_with_mod("C_GetSlotInfo", |_, _| {
        if !SLOTS.contains(&slot_id) {
            return Err(errorf!(CKR_SLOT_ID_INVALID, "no slot {}", slot_id));
        }
        if slot_info_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null slot info"));
        }
        let mut flags = CKF_REMOVABLE_DEVICE | CKF_HW_SLOT;
        if slot_id == SLOT_WITH_TOKEN {
            flags |= CKF_TOKEN_PRESENT;
        }
        let info = CK_SLOT_INFO {
            slotDescription: padded(&format!("Mock Reader {}", slot_id)),
            manufacturerID: padded(MANUFACTURER_ID),
            flags,
            hardwareVersion: CK_VERSION { major: 1, minor: 0 },
            firmwareVersion: CK_VERSION { major: 1, minor: 0 },
        };
        unsafe {
            *slot_info_ptr = info;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_GetTokenInfo(slot_id: CK_SLOT_ID, info_ptr: CK_TOKEN_INFO_PTR) -> CK_RV {
    return result_to_rv_with_mod("C_GetTokenInfo", |m, token| {
        token.check_slot(slot_id)?;
        if info_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null token info"));
        }
        let mut flags = CKF_RNG | CKF_LOGIN_REQUIRED | CKF_TOKEN_INITIALIZED;
        if token.user_pin_initialized() {
            flags |= CKF_USER_PIN_INITIALIZED;
        }
        let info = CK_TOKEN_INFO {
            label: padded(&token.label),
            manufacturerID: padded(MANUFACTURER_ID),
            model: padded(TOKEN_MODEL),
            serialNumber: padded(TOKEN_SERIAL),
            flags,
            ulMaxSessionCount: MAX_SESSIONS,
            ulSessionCount: m.session_count() as CK_ULONG,
            ulMaxRwSessionCount: MAX_SESSIONS,
            ulRwSessionCount: m.rw_session_count() as CK_ULONG,
            ulMaxPinLen: MAX_PIN_LEN as CK_ULONG,
            ulMinPinLen: MIN_PIN_LEN as CK_ULONG,
            ulTotalPublicMemory: CK_UNAVAILABLE_INFORMATION,
            ulFreePublicMemory: CK_UNAVAILABLE_INFORMATION,
            ulTotalPrivateMemory: CK_UNAVAILABLE_INFORMATION,
            ulFreePrivateMemory: CK_UNAVAILABLE_INFORMATION,
            hardwareVersion: CK_VERSION { major: 1, minor: 0 },
            firmwareVersion: CK_VERSION { major: 1, minor: 0 },
            utcTime: padded(""),
        };
        unsafe {
            *info_ptr = info;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_GetMechanismList(
    slot_id: CK_SLOT_ID,
    mechanism_list_ptr: CK_MECHANISM_TYPE_PTR,
    count_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return result_to_rv_with_mod("C_GetMechanismList", |_, token| {
        token.check_slot(slot_id)?;
        unsafe { write_ulongs(&MECHANISMS, mechanism_list_ptr, count_ptr) }
    });
}

#[no_mangle]
pub extern "C" fn C_GetMechanismInfo(
    slot_id: CK_SLOT_ID,
    typ: CK_MECHANISM_TYPE,
    info_ptr: CK_MECHANISM_INFO_PTR,
) -> CK_RV {
    return result_to_rv_with_mod("C_GetMechanismInfo", |_, token| {
        token.check_slot(slot_id)?;
        if info_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null mechanism info"));
        }
        let info = module::mechanism_info(typ)?;
        unsafe {
            *info_ptr = info;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_InitToken(
    _slot_id: CK_SLOT_ID,
    _pin_ptr: CK_UTF8CHAR_PTR,
    _pin_len: CK_ULONG,
    _label_ptr: CK_UTF8CHAR_PTR,
) -> CK_RV {
    return err_not_supported("C_InitToken");
}

#[no_mangle]
pub extern "C" fn C_InitPIN(
    h: CK_SESSION_HANDLE,
    pin_ptr: CK_UTF8CHAR_PTR,
    pin_len: CK_ULONG,
) -> CK_RV {
    return result_to_rv_with_mod("C_InitPIN", |m, token| {
        let pin = unsafe { bytes(pin_ptr, pin_len)? };
        m.init_pin(token, h, pin)
    });
}

#[no_mangle]
pub extern "C" fn C_SetPIN(
    h: CK_SESSION_HANDLE,
    old_pin_ptr: CK_UTF8CHAR_PTR,
    old_pin_len: CK_ULONG,
    new_pin_ptr: CK_UTF8CHAR_PTR,
    new_pin_len: CK_ULONG,
) -> CK_RV {
    return result_to_rv_with_mod("C_SetPIN", |m, token| {
        let old_pin = unsafe { bytes(old_pin_ptr, old_pin_len)? };
        let new_pin = unsafe { bytes(new_pin_ptr, new_pin_len)? };
        m.set_pin(token, h, old_pin, new_pin)
    });
}

#[no_mangle]
pub extern "C" fn C_OpenSession(
    slot_id: CK_SLOT_ID,
    flags: CK_FLAGS,
    _app_ptr: CK_VOID_PTR,
    _notify: CK_NOTIFY,
    h_ptr: CK_SESSION_HANDLE_PTR,
) -> CK_RV {
    return result_to_rv_with_mod("C_OpenSession", |m, token| {
        if h_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null session handle"));
        }
        let h = m.new_session(token, slot_id, flags)?;
        unsafe {
            *h_ptr = h;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_CloseSession(h: CK_SESSION_HANDLE) -> CK_RV {
    return result_to_rv_with_mod("C_CloseSession", |m, token| m.close_session(token, h));
}

#[no_mangle]
pub extern "C" fn C_CloseAllSessions(slot_id: CK_SLOT_ID) -> CK_RV {
    return result_to_rv_with_mod("C_CloseAllSessions", |m, token| {
        m.close_all_sessions(token, slot_id)
    });
}

#[no_mangle]
pub extern "C" fn C_GetSessionInfo(h: CK_SESSION_HANDLE, info_ptr: CK_SESSION_INFO_PTR) -> CK_RV {
    return result_to_rv_with_mod("C_GetSessionInfo", |m, _| {
        if info_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null session info"));
        }
        let info = m.get_session_info(h)?;
        unsafe {
            *info_ptr = info;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_GetOperationState(
    _h: CK_SESSION_HANDLE,
    _operation_state_ptr: CK_BYTE_PTR,
    _operation_state_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_GetOperationState");
}

#[no_mangle]
pub extern "C" fn C_SetOperationState(
    _h: CK_SESSION_HANDLE,
    _operation_state_ptr: CK_BYTE_PTR,
    _operation_state_len: CK_ULONG,
    _encryption_key_h: CK_OBJECT_HANDLE,
    _authentication_key_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return err_not_supported("C_SetOperationState");
}

#[no_mangle]
pub extern "C" fn C_Login(
    h: CK_SESSION_HANDLE,
    user_type: CK_USER_TYPE,
    pin_ptr: CK_UTF8CHAR_PTR,
    pin_len: CK_ULONG,
) -> CK_RV {
    return result_to_rv_with_mod("C_Login", |m, token| {
        let pin = unsafe { bytes(pin_ptr, pin_len)? };
        m.login(token, h, user_type, pin)
    });
}

#[no_mangle]
pub extern "C" fn C_Logout(h: CK_SESSION_HANDLE) -> CK_RV {
    return result_to_rv_with_mod("C_Logout", |m, _| m.logout(h));
}

#[no_mangle]
pub extern "C" fn C_CreateObject(
    _session_h: CK_SESSION_HANDLE,
    _template_ptr: CK_ATTRIBUTE_PTR,
    _count: CK_ULONG,
    _obj_h_ptr: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    return err_not_supported("C_CreateObject");
}

#[no_mangle]
pub extern "C" fn C_CopyObject(
    _session_h: CK_SESSION_HANDLE,
    _object_h: CK_OBJECT_HANDLE,
    _template_ptr: CK_ATTRIBUTE_PTR,
    _count: CK_ULONG,
    _new_object_h_ptr: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    return err_not_supported("C_CopyObject");
}

#[no_mangle]
pub extern "C" fn C_DestroyObject(
    session_h: CK_SESSION_HANDLE,
    object_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return result_to_rv_with_mod("C_DestroyObject", |m, token| {
        m.destroy_object(token, session_h, object_h)
    });
}

#[no_mangle]
pub extern "C" fn C_GetObjectSize(
    _session_h: CK_SESSION_HANDLE,
    _object_h: CK_OBJECT_HANDLE,
    _size_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_GetObjectSize");
}

// Fills every attribute it can. Attributes that cannot be returned get CK_UNAVAILABLE_INFORMATION
// as their length and the call reports the last such failure.
#[no_mangle]
pub extern "C" fn C_GetAttributeValue(
    session_h: CK_SESSION_HANDLE,
    object_h: CK_OBJECT_HANDLE,
    template_ptr: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
) -> CK_RV {
    return result_to_rv_with_mod("C_GetAttributeValue", |m, token| {
        if template_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null template"));
        }
        let template = unsafe { slice::from_raw_parts_mut(template_ptr, count as usize) };
        let types: Vec<CK_ATTRIBUTE_TYPE> = template.iter().map(|a| a.type_).collect();
        let values = m.get_attribute_values(token, session_h, object_h, &types)?;

        let mut rv = CKR_OK;
        for (attr, value) in template.iter_mut().zip(values) {
            match value {
                Err(code) => {
                    attr.ulValueLen = CK_UNAVAILABLE_INFORMATION;
                    rv = code;
                }
                Ok(val) if attr.pValue.is_null() => {
                    attr.ulValueLen = val.len() as CK_ULONG;
                }
                Ok(val) if (attr.ulValueLen as usize) < val.len() => {
                    attr.ulValueLen = CK_UNAVAILABLE_INFORMATION;
                    rv = CKR_BUFFER_TOO_SMALL;
                }
                Ok(val) => {
                    unsafe {
                        ptr::copy_nonoverlapping(
                            val.as_ptr(),
                            attr.pValue as CK_BYTE_PTR,
                            val.len(),
                        );
                    }
                    attr.ulValueLen = val.len() as CK_ULONG;
                }
            }
        }
        if rv != CKR_OK {
            return Err(errorf!(rv, "not all attributes of object {} returned", object_h));
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_SetAttributeValue(
    _session_h: CK_SESSION_HANDLE,
    _object_h: CK_OBJECT_HANDLE,
    _template_ptr: CK_ATTRIBUTE_PTR,
    _count: CK_ULONG,
) -> CK_RV {
    return err_not_supported("C_SetAttributeValue");
}

#[no_mangle]
pub extern "C" fn C_FindObjectsInit(
    session_h: CK_SESSION_HANDLE,
    template_ptr: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
) -> CK_RV {
    return result_to_rv_with_mod("C_FindObjectsInit", |m, token| {
        let template = unsafe { read_template(template_ptr, count)? };
        m.find_objects_init(token, session_h, &template)
    });
}

#[no_mangle]
pub extern "C" fn C_FindObjects(
    session_h: CK_SESSION_HANDLE,
    object_h_ptr: CK_OBJECT_HANDLE_PTR,
    max_object_count: CK_ULONG,
    object_count_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return result_to_rv_with_mod("C_FindObjects", |m, _| {
        if object_h_ptr.is_null() || object_count_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null output pointer"));
        }
        let found = m.find_objects(session_h, max_object_count as usize)?;
        unsafe {
            ptr::copy_nonoverlapping(found.as_ptr(), object_h_ptr, found.len());
            *object_count_ptr = found.len() as CK_ULONG;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_FindObjectsFinal(session_h: CK_SESSION_HANDLE) -> CK_RV {
    return result_to_rv_with_mod("C_FindObjectsFinal", |m, _| {
        m.find_objects_final(session_h)
    });
}

fn operation_init(
    fn_name: &str,
    session_h: CK_SESSION_HANDLE,
    kind: OperationKind,
    mechanism_ptr: CK_MECHANISM_PTR,
    key_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return result_to_rv_with_mod(fn_name, |m, token| {
        let (mechanism, parameter) = unsafe { read_mechanism(mechanism_ptr)? };
        m.operation_init(token, session_h, kind, mechanism, &parameter, key_h)
    });
}

// Single-part operation. The operation survives a length query or CKR_BUFFER_TOO_SMALL so the
// caller can retry with a big enough buffer.
fn operation_run(
    fn_name: &str,
    session_h: CK_SESSION_HANDLE,
    kind: OperationKind,
    data_ptr: CK_BYTE_PTR,
    data_len: CK_ULONG,
    out_ptr: CK_BYTE_PTR,
    out_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return result_to_rv_with_mod(fn_name, |m, token| {
        let input = unsafe { bytes(data_ptr, data_len)? };
        let output = m.transform(token, session_h, kind, input)?;
        match unsafe { write_output(&output, out_ptr, out_len_ptr) } {
            Ok(true) => {
                m.end_operation(session_h);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) if err.rv() == CKR_BUFFER_TOO_SMALL => Err(err),
            Err(err) => {
                m.end_operation(session_h);
                Err(err)
            }
        }
    });
}

#[no_mangle]
pub extern "C" fn C_EncryptInit(
    session_h: CK_SESSION_HANDLE,
    mechanism_ptr: CK_MECHANISM_PTR,
    key_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return operation_init("C_EncryptInit", session_h, OperationKind::Encrypt, mechanism_ptr, key_h);
}

#[no_mangle]
pub extern "C" fn C_Encrypt(
    session_h: CK_SESSION_HANDLE,
    data_ptr: CK_BYTE_PTR,
    data_len: CK_ULONG,
    encrypted_data_ptr: CK_BYTE_PTR,
    encrypted_data_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return operation_run(
        "C_Encrypt",
        session_h,
        OperationKind::Encrypt,
        data_ptr,
        data_len,
        encrypted_data_ptr,
        encrypted_data_len_ptr,
    );
}

#[no_mangle]
pub extern "C" fn C_EncryptUpdate(
    _session_h: CK_SESSION_HANDLE,
    _part_ptr: CK_BYTE_PTR,
    _part_len: CK_ULONG,
    _encrypted_part_ptr: CK_BYTE_PTR,
    _encrypted_part_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_EncryptUpdate");
}

#[no_mangle]
pub extern "C" fn C_EncryptFinal(
    _session_h: CK_SESSION_HANDLE,
    _last_encrypted_part_ptr: CK_BYTE_PTR,
    _last_encrypted_part_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_EncryptFinal");
}

#[no_mangle]
pub extern "C" fn C_DecryptInit(
    session_h: CK_SESSION_HANDLE,
    mechanism_ptr: CK_MECHANISM_PTR,
    key_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return operation_init("C_DecryptInit", session_h, OperationKind::Decrypt, mechanism_ptr, key_h);
}

#[no_mangle]
pub extern "C" fn C_Decrypt(
    session_h: CK_SESSION_HANDLE,
    encrypted_data_ptr: CK_BYTE_PTR,
    encrypted_data_len: CK_ULONG,
    data_ptr: CK_BYTE_PTR,
    data_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return operation_run(
        "C_Decrypt",
        session_h,
        OperationKind::Decrypt,
        encrypted_data_ptr,
        encrypted_data_len,
        data_ptr,
        data_len_ptr,
    );
}

#[no_mangle]
pub extern "C" fn C_DecryptUpdate(
    _session_h: CK_SESSION_HANDLE,
    _encrypted_part_ptr: CK_BYTE_PTR,
    _encrypted_part_len: CK_ULONG,
    _part_ptr: CK_BYTE_PTR,
    _part_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_DecryptUpdate");
}

#[no_mangle]
pub extern "C" fn C_DecryptFinal(
    _session_h: CK_SESSION_HANDLE,
    _last_part_ptr: CK_BYTE_PTR,
    _last_part_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_DecryptFinal");
}

#[no_mangle]
pub extern "C" fn C_DigestInit(
    _session_h: CK_SESSION_HANDLE,
    _mechanism_ptr: CK_MECHANISM_PTR,
) -> CK_RV {
    return err_not_supported("C_DigestInit");
}

#[no_mangle]
pub extern "C" fn C_Digest(
    _session_h: CK_SESSION_HANDLE,
    _data_ptr: CK_BYTE_PTR,
    _data_len: CK_ULONG,
    _digest_ptr: CK_BYTE_PTR,
    _digest_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_Digest");
}

#[no_mangle]
pub extern "C" fn C_DigestUpdate(
    _session_h: CK_SESSION_HANDLE,
    _part_ptr: CK_BYTE_PTR,
    _part_len: CK_ULONG,
) -> CK_RV {
    return err_not_supported("C_DigestUpdate");
}

#[no_mangle]
pub extern "C" fn C_DigestKey(_session_h: CK_SESSION_HANDLE, _key_h: CK_OBJECT_HANDLE) -> CK_RV {
    return err_not_supported("C_DigestKey");
}

#[no_mangle]
pub extern "C" fn C_DigestFinal(
    _session_h: CK_SESSION_HANDLE,
    _digest_ptr: CK_BYTE_PTR,
    _digest_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_DigestFinal");
}

#[no_mangle]
pub extern "C" fn C_SignInit(
    session_h: CK_SESSION_HANDLE,
    mechanism_ptr: CK_MECHANISM_PTR,
    key_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return operation_init("C_SignInit", session_h, OperationKind::Sign, mechanism_ptr, key_h);
}

#[no_mangle]
pub extern "C" fn C_Sign(
    session_h: CK_SESSION_HANDLE,
    data_ptr: CK_BYTE_PTR,
    data_len: CK_ULONG,
    signature_ptr: CK_BYTE_PTR,
    signature_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return operation_run(
        "C_Sign",
        session_h,
        OperationKind::Sign,
        data_ptr,
        data_len,
        signature_ptr,
        signature_len_ptr,
    );
}

#[no_mangle]
pub extern "C" fn C_SignUpdate(
    _session_h: CK_SESSION_HANDLE,
    _part_ptr: CK_BYTE_PTR,
    _part_len: CK_ULONG,
) -> CK_RV {
    return err_not_supported("C_SignUpdate");
}

#[no_mangle]
pub extern "C" fn C_SignFinal(
    _session_h: CK_SESSION_HANDLE,
    _signature_ptr: CK_BYTE_PTR,
    _signature_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_SignFinal");
}

#[no_mangle]
pub extern "C" fn C_SignRecoverInit(
    _session_h: CK_SESSION_HANDLE,
    _mechanism_ptr: CK_MECHANISM_PTR,
    _key_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return err_not_supported("C_SignRecoverInit");
}

#[no_mangle]
pub extern "C" fn C_SignRecover(
    _session_h: CK_SESSION_HANDLE,
    _data_ptr: CK_BYTE_PTR,
    _data_len: CK_ULONG,
    _signature_ptr: CK_BYTE_PTR,
    _signature_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_SignRecover");
}

#[no_mangle]
pub extern "C" fn C_VerifyInit(
    session_h: CK_SESSION_HANDLE,
    mechanism_ptr: CK_MECHANISM_PTR,
    key_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return operation_init("C_VerifyInit", session_h, OperationKind::Verify, mechanism_ptr, key_h);
}

#[no_mangle]
pub extern "C" fn C_Verify(
    session_h: CK_SESSION_HANDLE,
    data_ptr: CK_BYTE_PTR,
    data_len: CK_ULONG,
    signature_ptr: CK_BYTE_PTR,
    signature_len: CK_ULONG,
) -> CK_RV {
    return result_to_rv_with_mod("C_Verify", |m, token| {
        let data = unsafe { bytes(data_ptr, data_len)? };
        let signature = unsafe { bytes(signature_ptr, signature_len)? };
        m.verify(token, session_h, data, signature)
    });
}

#[no_mangle]
pub extern "C" fn C_VerifyUpdate(
    _session_h: CK_SESSION_HANDLE,
    _part_ptr: CK_BYTE_PTR,
    _part_len: CK_ULONG,
) -> CK_RV {
    return err_not_supported("C_VerifyUpdate");
}

#[no_mangle]
pub extern "C" fn C_VerifyFinal(
    _session_h: CK_SESSION_HANDLE,
    _signature_ptr: CK_BYTE_PTR,
    _signature_len: CK_ULONG,
) -> CK_RV {
    return err_not_supported("C_VerifyFinal");
}

#[no_mangle]
pub extern "C" fn C_VerifyRecoverInit(
    _session_h: CK_SESSION_HANDLE,
    _mechanism_ptr: CK_MECHANISM_PTR,
    _key_h: CK_OBJECT_HANDLE,
) -> CK_RV {
    return err_not_supported("C_VerifyRecoverInit");
}

#[no_mangle]
pub extern "C" fn C_VerifyRecover(
    _session_h: CK_SESSION_HANDLE,
    _signature_ptr: CK_BYTE_PTR,
    _signature_len: CK_ULONG,
    _data_ptr: CK_BYTE_PTR,
    _data_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_VerifyRecover");
}

#[no_mangle]
pub extern "C" fn C_DigestEncryptUpdate(
    _session_h: CK_SESSION_HANDLE,
    _part_ptr: CK_BYTE_PTR,
    _part_len: CK_ULONG,
    _encrypted_part_ptr: CK_BYTE_PTR,
    _encrypted_part_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_DigestEncryptUpdate");
}

#[no_mangle]
pub extern "C" fn C_DecryptDigestUpdate(
    _session_h: CK_SESSION_HANDLE,
    _encrypted_part_ptr: CK_BYTE_PTR,
    _encrypted_part_len: CK_ULONG,
    _part_ptr: CK_BYTE_PTR,
    _part_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_DecryptDigestUpdate");
}

#[no_mangle]
pub extern "C" fn C_SignEncryptUpdate(
    _session_h: CK_SESSION_HANDLE,
    _part_ptr: CK_BYTE_PTR,
    _part_len: CK_ULONG,
    _encrypted_part_ptr: CK_BYTE_PTR,
    _encrypted_part_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_SignEncryptUpdate");
}

#[no_mangle]
pub extern "C" fn C_DecryptVerifyUpdate(
    _session_h: CK_SESSION_HANDLE,
    _encrypted_part_ptr: CK_BYTE_PTR,
    _encrypted_part_len: CK_ULONG,
    _part_ptr: CK_BYTE_PTR,
    _part_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_DecryptVerifyUpdate");
}

#[no_mangle]
pub extern "C" fn C_GenerateKey(
    session_h: CK_SESSION_HANDLE,
    mechanism_ptr: CK_MECHANISM_PTR,
    template_ptr: CK_ATTRIBUTE_PTR,
    count: CK_ULONG,
    key_h_ptr: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    return result_to_rv_with_mod("C_GenerateKey", |m, token| {
        if key_h_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null key handle"));
        }
        let (mechanism, _) = unsafe { read_mechanism(mechanism_ptr)? };
        let template = unsafe { read_template(template_ptr, count)? };
        let key_h = m.generate_key(token, session_h, mechanism, &template)?;
        unsafe {
            *key_h_ptr = key_h;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_GenerateKeyPair(
    session_h: CK_SESSION_HANDLE,
    mechanism_ptr: CK_MECHANISM_PTR,
    public_key_template_ptr: CK_ATTRIBUTE_PTR,
    public_key_attribute_count: CK_ULONG,
    private_key_template_ptr: CK_ATTRIBUTE_PTR,
    private_key_attribute_count: CK_ULONG,
    public_key_h_ptr: CK_OBJECT_HANDLE_PTR,
    private_key_h_ptr: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    return result_to_rv_with_mod("C_GenerateKeyPair", |m, token| {
        if public_key_h_ptr.is_null() || private_key_h_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null key handle"));
        }
        let (mechanism, _) = unsafe { read_mechanism(mechanism_ptr)? };
        let public_template =
            unsafe { read_template(public_key_template_ptr, public_key_attribute_count)? };
        let private_template =
            unsafe { read_template(private_key_template_ptr, private_key_attribute_count)? };
        let (public_h, private_h) =
            m.generate_key_pair(token, session_h, mechanism, &public_template, &private_template)?;
        unsafe {
            *public_key_h_ptr = public_h;
            *private_key_h_ptr = private_h;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_WrapKey(
    _session_h: CK_SESSION_HANDLE,
    _mechanism_ptr: CK_MECHANISM_PTR,
    _wrapping_key_h: CK_OBJECT_HANDLE,
    _key_h: CK_OBJECT_HANDLE,
    _wrapped_key_ptr: CK_BYTE_PTR,
    _wrapped_key_len_ptr: CK_ULONG_PTR,
) -> CK_RV {
    return err_not_supported("C_WrapKey");
}

#[no_mangle]
pub extern "C" fn C_UnwrapKey(
    _session_h: CK_SESSION_HANDLE,
    _mechanism_ptr: CK_MECHANISM_PTR,
    _unwrapping_key_h: CK_OBJECT_HANDLE,
    _wrapped_key_ptr: CK_BYTE_PTR,
    _wrapped_key_len: CK_ULONG,
    _template_ptr: CK_ATTRIBUTE_PTR,
    _attribute_count: CK_ULONG,
    _key_h_ptr: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    return err_not_supported("C_UnwrapKey");
}

#[no_mangle]
pub extern "C" fn C_DeriveKey(
    _session_h: CK_SESSION_HANDLE,
    _mechanism_ptr: CK_MECHANISM_PTR,
    _base_key_h: CK_OBJECT_HANDLE,
    _template_ptr: CK_ATTRIBUTE_PTR,
    _attribute_count: CK_ULONG,
    _key_h_ptr: CK_OBJECT_HANDLE_PTR,
) -> CK_RV {
    return err_not_supported("C_DeriveKey");
}

#[no_mangle]
pub extern "C" fn C_SeedRandom(
    _session_h: CK_SESSION_HANDLE,
    _seed_ptr: CK_BYTE_PTR,
    _seed_len: CK_ULONG,
) -> CK_RV {
    return err_not_supported("C_SeedRandom");
}

#[no_mangle]
pub extern "C" fn C_GenerateRandom(
    session_h: CK_SESSION_HANDLE,
    random_data_ptr: CK_BYTE_PTR,
    random_len: CK_ULONG,
) -> CK_RV {
    return result_to_rv_with_mod("C_GenerateRandom", |m, _| {
        if random_data_ptr.is_null() && random_len != 0 {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null output buffer"));
        }
        let data = m.generate_random(session_h, random_len as usize)?;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), random_data_ptr, data.len());
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn C_GetFunctionStatus(_session_h: CK_SESSION_HANDLE) -> CK_RV {
    return CKR_FUNCTION_NOT_PARALLEL;
}

#[no_mangle]
pub extern "C" fn C_CancelFunction(_session_h: CK_SESSION_HANDLE) -> CK_RV {
    return CKR_FUNCTION_NOT_PARALLEL;
}

#[no_mangle]
pub extern "C" fn C_WaitForSlotEvent(
    flags: CK_FLAGS,
    slot_ptr: CK_SLOT_ID_PTR,
    _reserved: CK_VOID_PTR,
) -> CK_RV {
    return result_to_rv("C_WaitForSlotEvent", || {
        if slot_ptr.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null slot"));
        }
        let (slot_id, _) = vendor::next_slot_event(flags)?;
        unsafe {
            *slot_ptr = slot_id;
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn function_list() -> &'static CK_FUNCTION_LIST {
        let mut list: CK_FUNCTION_LIST_PTR = ptr::null_mut();
        assert_eq!(C_GetFunctionList(&mut list), CKR_OK);
        unsafe { &*list }
    }

    fn open_rw_session() -> CK_SESSION_HANDLE {
        let mut h: CK_SESSION_HANDLE = 0;
        let rv = C_OpenSession(
            SLOT_WITH_TOKEN,
            CKF_SERIAL_SESSION | CKF_RW_SESSION,
            ptr::null_mut(),
            None,
            &mut h,
        );
        assert_eq!(rv, CKR_OK);
        h
    }

    #[test]
    #[serial]
    fn function_list_is_complete() {
        let list = function_list();
        assert_eq!(list.version.major, 2);
        assert_eq!(list.version.minor, 20);
        assert!(list.C_Initialize.is_some());
        assert!(list.C_WaitForSlotEvent.is_some());
        assert!(list.C_GenerateKeyPair.is_some());
    }

    #[test]
    #[serial]
    fn initialize_lifecycle() {
        reset();
        assert_eq!(C_GetInfo(ptr::null_mut()), CKR_CRYPTOKI_NOT_INITIALIZED);
        assert_eq!(C_Initialize(ptr::null_mut()), CKR_OK);
        assert_eq!(C_Initialize(ptr::null_mut()), CKR_CRYPTOKI_ALREADY_INITIALIZED);

        let mut info = CK_INFO::default();
        assert_eq!(C_GetInfo(&mut info), CKR_OK);
        assert_eq!(&info.manufacturerID[..MANUFACTURER_ID.len()], MANUFACTURER_ID.as_bytes());
        assert_eq!(info.manufacturerID[31], b' ');

        assert_eq!(C_Finalize(ptr::null_mut()), CKR_OK);
        assert_eq!(C_Finalize(ptr::null_mut()), CKR_CRYPTOKI_NOT_INITIALIZED);
    }

    #[test]
    #[serial]
    fn initialize_rejects_no_os_threads() {
        reset();
        let mut args = CK_C_INITIALIZE_ARGS {
            flags: CKF_LIBRARY_CANT_CREATE_OS_THREADS,
            ..Default::default()
        };
        let rv = C_Initialize(&mut args as *mut CK_C_INITIALIZE_ARGS as CK_VOID_PTR);
        assert_eq!(rv, CKR_NEED_TO_CREATE_THREADS);
    }

    #[test]
    #[serial]
    fn slot_list_two_call() {
        reset();
        assert_eq!(C_Initialize(ptr::null_mut()), CKR_OK);

        let mut count: CK_ULONG = 0;
        assert_eq!(C_GetSlotList(CK_FALSE, ptr::null_mut(), &mut count), CKR_OK);
        assert_eq!(count, 2);

        let mut slots = [0 as CK_SLOT_ID; 2];
        let mut short: CK_ULONG = 1;
        assert_eq!(
            C_GetSlotList(CK_FALSE, slots.as_mut_ptr(), &mut short),
            CKR_BUFFER_TOO_SMALL
        );
        assert_eq!(short, 2);
        assert_eq!(C_GetSlotList(CK_FALSE, slots.as_mut_ptr(), &mut count), CKR_OK);
        assert_eq!(slots, SLOTS);

        assert_eq!(C_GetSlotList(CK_TRUE, slots.as_mut_ptr(), &mut count), CKR_OK);
        assert_eq!(count, 1);
        assert_eq!(slots[0], SLOT_WITH_TOKEN);
        reset();
    }

    #[test]
    #[serial]
    fn attribute_reads_report_unavailable_entries() {
        reset();
        assert_eq!(C_Initialize(ptr::null_mut()), CKR_OK);
        let h = open_rw_session();

        let mut class = CKO_CERTIFICATE.to_ne_bytes();
        let mut find = [CK_ATTRIBUTE {
            type_: CKA_CLASS,
            pValue: class.as_mut_ptr() as CK_VOID_PTR,
            ulValueLen: class.len() as CK_ULONG,
        }];
        assert_eq!(C_FindObjectsInit(h, find.as_mut_ptr(), 1), CKR_OK);
        let mut cert: CK_OBJECT_HANDLE = 0;
        let mut n: CK_ULONG = 0;
        assert_eq!(C_FindObjects(h, &mut cert, 1, &mut n), CKR_OK);
        assert_eq!(n, 1);
        assert_eq!(C_FindObjectsFinal(h), CKR_OK);

        let mut template = [
            CK_ATTRIBUTE {
                type_: CKA_LABEL,
                ..Default::default()
            },
            CK_ATTRIBUTE {
                type_: CKA_MODULUS,
                ..Default::default()
            },
        ];
        let rv = C_GetAttributeValue(h, cert, template.as_mut_ptr(), 2);
        assert_eq!(rv, CKR_ATTRIBUTE_TYPE_INVALID);
        assert_eq!(template[0].ulValueLen as usize, CERTIFICATE_LABEL.len());
        assert_eq!(template[1].ulValueLen, CK_UNAVAILABLE_INFORMATION);

        let mut label = vec![0u8; 4];
        template[0].pValue = label.as_mut_ptr() as CK_VOID_PTR;
        template[0].ulValueLen = label.len() as CK_ULONG;
        let rv = C_GetAttributeValue(h, cert, template.as_mut_ptr(), 1);
        assert_eq!(rv, CKR_BUFFER_TOO_SMALL);
        reset();
    }

    #[test]
    #[serial]
    fn encrypt_keeps_operation_across_size_query() {
        reset();
        assert_eq!(C_Initialize(ptr::null_mut()), CKR_OK);
        let h = open_rw_session();

        let mut mechanism = CK_MECHANISM {
            mechanism: CKM_AES_KEY_GEN,
            ..Default::default()
        };
        let mut len = (16 as CK_ULONG).to_ne_bytes();
        let mut public = [CK_FALSE];
        let mut yes = [CK_TRUE];
        let mut template = [
            CK_ATTRIBUTE {
                type_: CKA_VALUE_LEN,
                pValue: len.as_mut_ptr() as CK_VOID_PTR,
                ulValueLen: len.len() as CK_ULONG,
            },
            CK_ATTRIBUTE {
                type_: CKA_PRIVATE,
                pValue: public.as_mut_ptr() as CK_VOID_PTR,
                ulValueLen: 1,
            },
            CK_ATTRIBUTE {
                type_: CKA_ENCRYPT,
                pValue: yes.as_mut_ptr() as CK_VOID_PTR,
                ulValueLen: 1,
            },
        ];
        let mut key: CK_OBJECT_HANDLE = 0;
        assert_eq!(
            C_GenerateKey(h, &mut mechanism, template.as_mut_ptr(), 3, &mut key),
            CKR_OK
        );

        mechanism.mechanism = CKM_AES_CBC_PAD;
        let mut iv = [0u8; 16];
        mechanism.pParameter = iv.as_mut_ptr() as CK_VOID_PTR;
        mechanism.ulParameterLen = iv.len() as CK_ULONG;
        assert_eq!(C_EncryptInit(h, &mut mechanism, key), CKR_OK);

        let mut data = *b"plaintext";
        let mut out_len: CK_ULONG = 0;
        let rv = C_Encrypt(h, data.as_mut_ptr(), 9, ptr::null_mut(), &mut out_len);
        assert_eq!(rv, CKR_OK);
        assert_eq!(out_len, 16);

        let mut out = vec![0u8; 8];
        let mut short: CK_ULONG = 8;
        let rv = C_Encrypt(h, data.as_mut_ptr(), 9, out.as_mut_ptr(), &mut short);
        assert_eq!(rv, CKR_BUFFER_TOO_SMALL);

        out.resize(16, 0);
        let rv = C_Encrypt(h, data.as_mut_ptr(), 9, out.as_mut_ptr(), &mut out_len);
        assert_eq!(rv, CKR_OK);
        let rv = C_Encrypt(h, data.as_mut_ptr(), 9, out.as_mut_ptr(), &mut out_len);
        assert_eq!(rv, CKR_OPERATION_NOT_INITIALIZED);
        reset();
    }

    #[test]
    #[serial]
    fn finalize_closes_sessions() {
        reset();
        assert_eq!(C_Initialize(ptr::null_mut()), CKR_OK);
        let h = open_rw_session();
        let mut random = [0u8; 32];
        assert_eq!(C_GenerateRandom(h, random.as_mut_ptr(), 32), CKR_OK);
        assert_ne!(random, [0u8; 32]);
        assert_eq!(C_Finalize(ptr::null_mut()), CKR_OK);

        assert_eq!(C_Initialize(ptr::null_mut()), CKR_OK);
        assert_eq!(
            C_GetSessionInfo(h, &mut CK_SESSION_INFO::default()),
            CKR_SESSION_HANDLE_INVALID
        );
        reset();
    }

    #[test]
    #[serial]
    fn slot_events_poll_and_block() {
        reset();
        let mut slot: CK_SLOT_ID = 0;
        assert_eq!(
            C_WaitForSlotEvent(CKF_DONT_BLOCK, &mut slot, ptr::null_mut()),
            CKR_CRYPTOKI_NOT_INITIALIZED
        );
        assert_eq!(C_Initialize(ptr::null_mut()), CKR_OK);
        assert_eq!(
            C_WaitForSlotEvent(CKF_DONT_BLOCK, &mut slot, ptr::null_mut()),
            CKR_NO_EVENT
        );

        let pusher = std::thread::spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            push_slot_event(EMPTY_SLOT, SLOT_EVENT_TOKEN_INSERTED);
        });
        let mut event: CK_ULONG = 0;
        let rv = E_WaitForSlotEvent(0, &mut slot, &mut event, ptr::null_mut(), ptr::null_mut());
        pusher.join().unwrap();
        assert_eq!(rv, CKR_OK);
        assert_eq!(slot, EMPTY_SLOT);
        assert_eq!(event, SLOT_EVENT_TOKEN_INSERTED);
        reset();
    }

    #[test]
    #[serial]
    fn aux_table_entries() {
        let mut aux: AUX_FUNC_LIST_PTR = ptr::null_mut();
        assert_eq!(E_GetAuxFunctionList(&mut aux), CKR_OK);
        let aux = unsafe { &*aux };
        for index in [
            EP_GET_PIN_INFO,
            EP_SET_TOKEN_LABEL,
            EP_SET_TOKEN_TIMEOUT,
            EP_GET_TOKEN_TIMEOUT,
            EP_BLANK_TOKEN,
            EP_WAITFORSLOTEVENT,
        ] {
            assert!(aux.entry(index).is_some());
        }
        assert!(aux.entry(EP_WAITFORSLOTEVENT + 1).is_none());
    }

    #[test]
    #[serial]
    fn aux_label_and_timeout() {
        reset();
        assert_eq!(C_Initialize(ptr::null_mut()), CKR_OK);
        let label = b"Renamed\0";
        let rv = E_SetTokenLabel(
            SLOT_WITH_TOKEN,
            CKU_USER,
            ptr::null_mut(),
            0,
            label.as_ptr() as CK_UTF8CHAR_PTR,
        );
        assert_eq!(rv, CKR_OK);
        let mut info = CK_TOKEN_INFO::default();
        assert_eq!(C_GetTokenInfo(SLOT_WITH_TOKEN, &mut info), CKR_OK);
        assert_eq!(&info.label[..7], b"Renamed");

        let long = [b'x'; 40].iter().copied().chain([0]).collect::<Vec<u8>>();
        let rv = E_SetTokenLabel(
            SLOT_WITH_TOKEN,
            CKU_USER,
            ptr::null_mut(),
            0,
            long.as_ptr() as CK_UTF8CHAR_PTR,
        );
        assert_eq!(rv, CKR_ARGUMENTS_BAD);

        assert_eq!(E_SetTokenTimeout(SLOT_WITH_TOKEN, 5_000), CKR_OK);
        let mut timeout: CK_ULONG = 0;
        assert_eq!(E_GetTokenTimeout(SLOT_WITH_TOKEN, &mut timeout), CKR_OK);
        assert_eq!(timeout, 5_000);
        assert_eq!(E_GetTokenTimeout(EMPTY_SLOT, &mut timeout), CKR_TOKEN_NOT_PRESENT);
        reset();
    }
}
