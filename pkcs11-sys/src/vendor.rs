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

// Vendor auxiliary extension table, exported next to C_GetFunctionList as E_GetAuxFunctionList.
// Entries are untyped pointers; the EP_* index decides which signature to cast to.

use crate::{
    CK_BYTE, CK_FLAGS, CK_RV, CK_SLOT_ID, CK_SLOT_ID_PTR, CK_ULONG, CK_ULONG_PTR, CK_USER_TYPE,
    CK_UTF8CHAR_PTR, CK_VERSION, CK_VOID_PTR,
};

pub const AUX_MAX_FUNC_COUNT: usize = 32;

pub const EP_GET_PIN_INFO: usize = 0;
pub const EP_SET_TOKEN_LABEL: usize = 1;
pub const EP_SET_TOKEN_TIMEOUT: usize = 2;
pub const EP_GET_TOKEN_TIMEOUT: usize = 3;
pub const EP_BLANK_TOKEN: usize = 4;
pub const EP_WAITFORSLOTEVENT: usize = 5;

pub const E_GET_AUX_FUNCTION_LIST_SYMBOL: &[u8] = b"E_GetAuxFunctionList\0";

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct AUX_PIN_INFO {
    pub bSOPinMaxRetries: CK_BYTE,
    pub bSOPinCurCounter: CK_BYTE,
    pub bUserPinMaxRetries: CK_BYTE,
    pub bUserPinCurCounter: CK_BYTE,
    pub pinflags: CK_FLAGS,
}
pub type AUX_PIN_INFO_PTR = *mut AUX_PIN_INFO;

#[derive(Debug, Copy, Clone)]
#[repr(C)]
pub struct AUX_FUNC_LIST {
    pub version: CK_VERSION,
    pub pFunc: [CK_VOID_PTR; AUX_MAX_FUNC_COUNT],
}
pub type AUX_FUNC_LIST_PTR = *mut AUX_FUNC_LIST;
pub type AUX_FUNC_LIST_PTR_PTR = *mut AUX_FUNC_LIST_PTR;

pub type E_GetAuxFunctionList =
    Option<unsafe extern "C" fn(ppAuxFunc: AUX_FUNC_LIST_PTR_PTR) -> CK_RV>;

pub type EP_GetPinInfo =
    unsafe extern "C" fn(slotID: CK_SLOT_ID, pPinInfo: AUX_PIN_INFO_PTR) -> CK_RV;
pub type EP_SetTokenLabel = unsafe extern "C" fn(
    slotID: CK_SLOT_ID,
    userType: CK_USER_TYPE,
    pPin: CK_UTF8CHAR_PTR,
    ulPinLen: CK_ULONG,
    pLabel: CK_UTF8CHAR_PTR,
) -> CK_RV;
pub type EP_SetTokenTimeout =
    unsafe extern "C" fn(slotID: CK_SLOT_ID, ulTimeout: CK_ULONG) -> CK_RV;
pub type EP_GetTokenTimeout =
    unsafe extern "C" fn(slotID: CK_SLOT_ID, pulTimeout: CK_ULONG_PTR) -> CK_RV;
pub type EP_BlankToken = unsafe extern "C" fn(
    slotID: CK_SLOT_ID,
    pSOPin: CK_UTF8CHAR_PTR,
    ulSOPinLen: CK_ULONG,
) -> CK_RV;
pub type EP_WaitForSlotEvent = unsafe extern "C" fn(
    flags: CK_FLAGS,
    pSlot: CK_SLOT_ID_PTR,
    pulEvent: CK_ULONG_PTR,
    pulExtData: CK_ULONG_PTR,
    pReserved: CK_VOID_PTR,
) -> CK_RV;

impl Default for AUX_FUNC_LIST {
    fn default() -> Self {
        AUX_FUNC_LIST {
            version: CK_VERSION::default(),
            pFunc: [std::ptr::null_mut(); AUX_MAX_FUNC_COUNT],
        }
    }
}

impl AUX_FUNC_LIST {
    // Returns the raw entry at the given EP_* index, or None if the slot is empty or out of range.
    pub fn entry(&self, index: usize) -> Option<CK_VOID_PTR> {
        self.pFunc.get(index).copied().filter(|p| !p.is_null())
    }
}
