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

use std::fmt;

use pkcs11_sys::*;
use strum_macros::{Display, EnumString};

use crate::util::trim_padded;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl From<CK_VERSION> for Version {
    fn from(version: CK_VERSION) -> Self {
        Version {
            major: version.major,
            minor: version.minor,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryInfo {
    pub cryptoki_version: Version,
    pub manufacturer_id: String,
    pub flags: CK_FLAGS,
    pub library_description: String,
    pub library_version: Version,
}

impl From<&CK_INFO> for LibraryInfo {
    fn from(info: &CK_INFO) -> Self {
        LibraryInfo {
            cryptoki_version: info.cryptokiVersion.into(),
            manufacturer_id: trim_padded(&info.manufacturerID),
            flags: info.flags,
            library_description: trim_padded(&info.libraryDescription),
            library_version: info.libraryVersion.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot_description: String,
    pub manufacturer_id: String,
    pub flags: CK_FLAGS,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

impl SlotInfo {
    pub fn token_present(&self) -> bool {
        self.flags & CKF_TOKEN_PRESENT != 0
    }

    pub fn is_removable(&self) -> bool {
        self.flags & CKF_REMOVABLE_DEVICE != 0
    }

    pub fn is_hardware(&self) -> bool {
        self.flags & CKF_HW_SLOT != 0
    }
}

impl From<&CK_SLOT_INFO> for SlotInfo {
    fn from(info: &CK_SLOT_INFO) -> Self {
        SlotInfo {
            slot_description: trim_padded(&info.slotDescription),
            manufacturer_id: trim_padded(&info.manufacturerID),
            flags: info.flags,
            hardware_version: info.hardwareVersion.into(),
            firmware_version: info.firmwareVersion.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer_id: String,
    pub model: String,
    pub serial_number: String,
    pub flags: CK_FLAGS,
    pub max_session_count: CK_ULONG,
    pub session_count: CK_ULONG,
    pub max_rw_session_count: CK_ULONG,
    pub rw_session_count: CK_ULONG,
    pub max_pin_len: CK_ULONG,
    pub min_pin_len: CK_ULONG,
    pub total_public_memory: CK_ULONG,
    pub free_public_memory: CK_ULONG,
    pub total_private_memory: CK_ULONG,
    pub free_private_memory: CK_ULONG,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

impl TokenInfo {
    pub fn is_initialized(&self) -> bool {
        self.flags & CKF_TOKEN_INITIALIZED != 0
    }

    pub fn login_required(&self) -> bool {
        self.flags & CKF_LOGIN_REQUIRED != 0
    }

    pub fn user_pin_initialized(&self) -> bool {
        self.flags & CKF_USER_PIN_INITIALIZED != 0
    }
}

impl From<&CK_TOKEN_INFO> for TokenInfo {
    fn from(info: &CK_TOKEN_INFO) -> Self {
        TokenInfo {
            label: trim_padded(&info.label),
            manufacturer_id: trim_padded(&info.manufacturerID),
            model: trim_padded(&info.model),
            serial_number: trim_padded(&info.serialNumber),
            flags: info.flags,
            max_session_count: info.ulMaxSessionCount,
            session_count: info.ulSessionCount,
            max_rw_session_count: info.ulMaxRwSessionCount,
            rw_session_count: info.ulRwSessionCount,
            max_pin_len: info.ulMaxPinLen,
            min_pin_len: info.ulMinPinLen,
            total_public_memory: info.ulTotalPublicMemory,
            free_public_memory: info.ulFreePublicMemory,
            total_private_memory: info.ulTotalPrivateMemory,
            free_private_memory: info.ulFreePrivateMemory,
            hardware_version: info.hardwareVersion.into(),
            firmware_version: info.firmwareVersion.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub slot_id: CK_SLOT_ID,
    pub state: CK_STATE,
    pub flags: CK_FLAGS,
    pub device_error: CK_ULONG,
}

impl SessionInfo {
    pub fn is_read_write(&self) -> bool {
        self.flags & CKF_RW_SESSION != 0
    }
}

impl From<&CK_SESSION_INFO> for SessionInfo {
    fn from(info: &CK_SESSION_INFO) -> Self {
        SessionInfo {
            slot_id: info.slotID,
            state: info.state,
            flags: info.flags,
            device_error: info.ulDeviceError,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinInfo {
    pub so_max_retries: u8,
    pub so_cur_counter: u8,
    pub user_max_retries: u8,
    pub user_cur_counter: u8,
    pub pin_flags: CK_FLAGS,
}

impl From<AUX_PIN_INFO> for PinInfo {
    fn from(info: AUX_PIN_INFO) -> Self {
        PinInfo {
            so_max_retries: info.bSOPinMaxRetries,
            so_cur_counter: info.bSOPinCurCounter,
            user_max_retries: info.bUserPinMaxRetries,
            user_cur_counter: info.bUserPinCurCounter,
            pin_flags: info.pinflags,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateInfo {
    pub handle: CK_OBJECT_HANDLE,
    pub label: String,
    pub subject: Vec<u8>,
    pub id: Vec<u8>,
    pub value: Vec<u8>,
    pub certificate_type: CK_CERTIFICATE_TYPE,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInfo {
    pub handle: CK_OBJECT_HANDLE,
    pub label: String,
    pub key_type: CK_KEY_TYPE,
    pub object_class: CK_OBJECT_CLASS,
    pub id: Vec<u8>,
    pub can_encrypt: bool,
    pub can_decrypt: bool,
    pub can_sign: bool,
    pub can_verify: bool,
    pub can_wrap: bool,
    pub can_unwrap: bool,
    pub can_derive: bool,
    pub is_sensitive: bool,
    pub is_extractable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: KeyInfo,
    pub private_key: KeyInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotEvent {
    pub slot_id: CK_SLOT_ID,
    pub event: CK_ULONG,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum UserType {
    So,
    User,
    #[strum(serialize = "context-specific")]
    ContextSpecific,
}

impl UserType {
    pub fn as_raw(self) -> CK_USER_TYPE {
        match self {
            UserType::So => CKU_SO,
            UserType::User => CKU_USER,
            UserType::ContextSpecific => CKU_CONTEXT_SPECIFIC,
        }
    }
}
