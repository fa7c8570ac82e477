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

// Vendor auxiliary functions, reached through E_GetAuxFunctionList.

use std::collections::VecDeque;
use std::ffi::CStr;
use std::sync::{Condvar, Mutex};

use lazy_static::lazy_static;
use pkcs11_sys::*;

use crate::module::Result;
use crate::{errorf, result_to_rv, result_to_rv_with_mod, MODULE};

pub const SLOT_EVENT_TOKEN_INSERTED: CK_ULONG = 1;
pub const SLOT_EVENT_TOKEN_REMOVED: CK_ULONG = 2;

const MAX_LABEL_LEN: usize = 32;

lazy_static! {
    // Pending slot events, fed by push_slot_event().
    static ref SLOT_EVENTS: (Mutex<VecDeque<(CK_SLOT_ID, CK_ULONG)>>, Condvar) =
        (Mutex::new(VecDeque::new()), Condvar::new());
}

// Raw pointers are not Sync; the table is never written after construction.
struct AuxTable(AUX_FUNC_LIST);
unsafe impl Sync for AuxTable {}

lazy_static! {
    static ref AUX_TABLE: AuxTable = {
        let mut list = AUX_FUNC_LIST {
            version: CK_VERSION { major: 1, minor: 0 },
            ..Default::default()
        };
        list.pFunc[EP_GET_PIN_INFO] = E_GetPinInfo as EP_GetPinInfo as CK_VOID_PTR;
        list.pFunc[EP_SET_TOKEN_LABEL] = E_SetTokenLabel as EP_SetTokenLabel as CK_VOID_PTR;
        list.pFunc[EP_SET_TOKEN_TIMEOUT] = E_SetTokenTimeout as EP_SetTokenTimeout as CK_VOID_PTR;
        list.pFunc[EP_GET_TOKEN_TIMEOUT] = E_GetTokenTimeout as EP_GetTokenTimeout as CK_VOID_PTR;
        list.pFunc[EP_BLANK_TOKEN] = E_BlankToken as EP_BlankToken as CK_VOID_PTR;
        list.pFunc[EP_WAITFORSLOTEVENT] = E_WaitForSlotEvent as EP_WaitForSlotEvent as CK_VOID_PTR;
        AuxTable(list)
    };
}

#[no_mangle]
pub extern "C" fn E_GetAuxFunctionList(aux_func: AUX_FUNC_LIST_PTR_PTR) -> CK_RV {
    if aux_func.is_null() {
        return CKR_ARGUMENTS_BAD;
    }
    unsafe {
        *aux_func = &AUX_TABLE.0 as *const AUX_FUNC_LIST as AUX_FUNC_LIST_PTR;
    }
    return CKR_OK;
}

// Queues a slot event for E_WaitForSlotEvent and C_WaitForSlotEvent.
pub fn push_slot_event(slot_id: CK_SLOT_ID, event: CK_ULONG) {
    let (queue, ready) = &*SLOT_EVENTS;
    let mut queue = queue.lock().unwrap_or_else(|err| err.into_inner());
    queue.push_back((slot_id, event));
    ready.notify_all();
}

pub(crate) fn clear_slot_events() {
    let (queue, _) = &*SLOT_EVENTS;
    queue.lock().unwrap_or_else(|err| err.into_inner()).clear();
}

// Takes the next slot event, blocking until one arrives unless CKF_DONT_BLOCK is set.
pub(crate) fn next_slot_event(flags: CK_FLAGS) -> Result<(CK_SLOT_ID, CK_ULONG)> {
    {
        let m = MODULE
            .lock()
            .map_err(|err| errorf!(CKR_GENERAL_ERROR, "failed to acquire lock: {}", err))?;
        if m.is_none() {
            return Err(errorf!(CKR_CRYPTOKI_NOT_INITIALIZED, "module not initialized"));
        }
    }
    let (queue, ready) = &*SLOT_EVENTS;
    let mut queue = queue
        .lock()
        .map_err(|err| errorf!(CKR_GENERAL_ERROR, "failed to acquire lock: {}", err))?;
    loop {
        if let Some(event) = queue.pop_front() {
            return Ok(event);
        }
        if flags & CKF_DONT_BLOCK != 0 {
            return Err(errorf!(CKR_NO_EVENT, "no slot event pending"));
        }
        queue = ready
            .wait(queue)
            .map_err(|err| errorf!(CKR_GENERAL_ERROR, "failed to wait for event: {}", err))?;
    }
}

unsafe fn pin_bytes<'a>(pin: CK_UTF8CHAR_PTR, len: CK_ULONG) -> &'a [u8] {
    if pin.is_null() {
        return &[];
    }
    std::slice::from_raw_parts(pin, len as usize)
}

#[no_mangle]
pub extern "C" fn E_GetPinInfo(slot_id: CK_SLOT_ID, pin_info: AUX_PIN_INFO_PTR) -> CK_RV {
    return result_to_rv_with_mod("E_GetPinInfo", |_, token| {
        token.check_slot(slot_id)?;
        if pin_info.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null pin info"));
        }
        unsafe {
            *pin_info = token.pin_info();
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn E_SetTokenLabel(
    slot_id: CK_SLOT_ID,
    user_type: CK_USER_TYPE,
    pin: CK_UTF8CHAR_PTR,
    pin_len: CK_ULONG,
    label: CK_UTF8CHAR_PTR,
) -> CK_RV {
    return result_to_rv_with_mod("E_SetTokenLabel", |_, token| {
        token.check_slot(slot_id)?;
        if label.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null label"));
        }
        let label = unsafe { CStr::from_ptr(label as *const std::os::raw::c_char) };
        let label = label
            .to_str()
            .map_err(|err| errorf!(CKR_ARGUMENTS_BAD, "label is not UTF-8: {}", err))?;
        if label.len() > MAX_LABEL_LEN {
            return Err(errorf!(
                CKR_ARGUMENTS_BAD,
                "label longer than {} bytes",
                MAX_LABEL_LEN
            ));
        }
        // A PIN, when given, must be valid for the user type.
        if !pin.is_null() {
            token.check_pin(user_type, unsafe { pin_bytes(pin, pin_len) })?;
        }
        token.label = label.to_string();
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn E_SetTokenTimeout(slot_id: CK_SLOT_ID, timeout_ms: CK_ULONG) -> CK_RV {
    return result_to_rv_with_mod("E_SetTokenTimeout", |_, token| {
        token.check_slot(slot_id)?;
        token.timeout_ms = timeout_ms;
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn E_GetTokenTimeout(slot_id: CK_SLOT_ID, timeout_ms: CK_ULONG_PTR) -> CK_RV {
    return result_to_rv_with_mod("E_GetTokenTimeout", |_, token| {
        token.check_slot(slot_id)?;
        if timeout_ms.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null timeout"));
        }
        unsafe {
            *timeout_ms = token.timeout_ms;
        }
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn E_BlankToken(
    slot_id: CK_SLOT_ID,
    so_pin: CK_UTF8CHAR_PTR,
    so_pin_len: CK_ULONG,
) -> CK_RV {
    return result_to_rv_with_mod("E_BlankToken", |_, token| {
        token.check_slot(slot_id)?;
        if so_pin.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null SO PIN"));
        }
        token.blank(unsafe { pin_bytes(so_pin, so_pin_len) })
    });
}

#[no_mangle]
pub extern "C" fn E_WaitForSlotEvent(
    flags: CK_FLAGS,
    slot: CK_SLOT_ID_PTR,
    event: CK_ULONG_PTR,
    ext_data: CK_ULONG_PTR,
    _reserved: CK_VOID_PTR,
) -> CK_RV {
    return result_to_rv("E_WaitForSlotEvent", || {
        if slot.is_null() || event.is_null() {
            return Err(errorf!(CKR_ARGUMENTS_BAD, "null output pointer"));
        }
        let (slot_id, ev) = next_slot_event(flags)?;
        unsafe {
            *slot = slot_id;
            *event = ev;
            if !ext_data.is_null() {
                *ext_data = 0;
            }
        }
        Ok(())
    });
}
