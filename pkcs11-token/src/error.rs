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

use pkcs11_sys::*;
use std::io;
use std::result;
use strum_macros::EnumIter;
use tracing_error::SpanTrace;

// Translated failure kinds. Every PKCS #11 return code has its own variant; the tail of the enum
// holds failures that originate in this crate rather than in the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error, EnumIter)]
#[repr(u32)]
pub enum Status {
    #[error("General error")]
    General = 1,
    #[error("Operation was cancelled")]
    Cancel = 2,
    #[error("Host memory allocation error")]
    HostMemory = 3,
    #[error("Invalid slot ID")]
    SlotIdInvalid = 4,
    #[error("Function failed")]
    FunctionFailed = 5,
    #[error("Invalid arguments")]
    ArgumentsBad = 6,
    #[error("No event available")]
    NoEvent = 7,
    #[error("Need to create threads")]
    NeedToCreateThreads = 8,
    #[error("Cannot lock")]
    CantLock = 9,

    #[error("Attribute is read-only")]
    AttributeReadOnly = 10,
    #[error("Attribute is sensitive")]
    AttributeSensitive = 11,
    #[error("Invalid attribute type")]
    AttributeTypeInvalid = 12,
    #[error("Invalid attribute value")]
    AttributeValueInvalid = 13,

    #[error("Invalid data")]
    DataInvalid = 20,
    #[error("Data length out of range")]
    DataLenRange = 21,

    #[error("Device error")]
    DeviceError = 30,
    #[error("Device memory error")]
    DeviceMemory = 31,
    #[error("Device removed")]
    DeviceRemoved = 32,

    #[error("Invalid encrypted data")]
    EncryptedDataInvalid = 40,
    #[error("Encrypted data length out of range")]
    EncryptedDataLenRange = 41,

    #[error("Function was canceled")]
    FunctionCanceled = 50,
    #[error("Function not parallel")]
    FunctionNotParallel = 51,
    #[error("Function not supported")]
    FunctionNotSupported = 52,
    #[error("Function rejected")]
    FunctionRejected = 53,

    #[error("Invalid key handle")]
    KeyHandleInvalid = 60,
    #[error("Key size out of range")]
    KeySizeRange = 61,
    #[error("Inconsistent key type")]
    KeyTypeInconsistent = 62,
    #[error("Key not needed")]
    KeyNotNeeded = 63,
    #[error("Key changed")]
    KeyChanged = 64,
    #[error("Key needed")]
    KeyNeeded = 65,
    #[error("Key indigestible")]
    KeyIndigestible = 66,
    #[error("Key function not permitted")]
    KeyFunctionNotPermitted = 67,
    #[error("Key not wrappable")]
    KeyNotWrappable = 68,
    #[error("Key unextractable")]
    KeyUnextractable = 69,

    #[error("Invalid mechanism")]
    MechanismInvalid = 70,
    #[error("Invalid mechanism parameter")]
    MechanismParamInvalid = 71,

    #[error("Invalid object handle")]
    ObjectHandleInvalid = 80,
    #[error("Object not found")]
    ObjectNotFound = 81,

    #[error("Operation active")]
    OperationActive = 90,
    #[error("Operation not initialized")]
    OperationNotInitialized = 91,

    #[error("Incorrect PIN")]
    PinIncorrect = 100,
    #[error("Invalid PIN")]
    PinInvalid = 101,
    #[error("PIN length out of range")]
    PinLenRange = 102,
    #[error("PIN expired")]
    PinExpired = 103,
    #[error("PIN locked")]
    PinLocked = 104,

    #[error("Session closed")]
    SessionClosed = 110,
    #[error("Session count exceeded")]
    SessionCount = 111,
    #[error("Invalid session handle")]
    SessionHandleInvalid = 112,
    #[error("Parallel sessions not supported")]
    SessionParallelNotSupported = 113,
    #[error("Session is read-only")]
    SessionReadOnly = 114,
    #[error("Session exists")]
    SessionExists = 115,
    #[error("Read-only session exists")]
    SessionReadOnlyExists = 116,
    #[error("Read/write SO session exists")]
    SessionReadWriteSoExists = 117,

    #[error("Invalid signature")]
    SignatureInvalid = 120,
    #[error("Signature length out of range")]
    SignatureLenRange = 121,

    #[error("Template incomplete")]
    TemplateIncomplete = 130,
    #[error("Template inconsistent")]
    TemplateInconsistent = 131,

    #[error("Token not present")]
    TokenNotPresent = 140,
    #[error("Token not recognized")]
    TokenNotRecognized = 141,
    #[error("Token is write-protected")]
    TokenWriteProtected = 142,

    #[error("Invalid unwrapping key handle")]
    UnwrappingKeyHandleInvalid = 150,
    #[error("Unwrapping key size out of range")]
    UnwrappingKeySizeRange = 151,
    #[error("Inconsistent unwrapping key type")]
    UnwrappingKeyTypeInconsistent = 152,
    #[error("Invalid wrapped key")]
    WrappedKeyInvalid = 153,
    #[error("Wrapped key length out of range")]
    WrappedKeyLenRange = 154,
    #[error("Invalid wrapping key handle")]
    WrappingKeyHandleInvalid = 155,
    #[error("Wrapping key size out of range")]
    WrappingKeySizeRange = 156,
    #[error("Inconsistent wrapping key type")]
    WrappingKeyTypeInconsistent = 157,

    #[error("User already logged in")]
    UserAlreadyLoggedIn = 160,
    #[error("User not logged in")]
    UserNotLoggedIn = 161,
    #[error("User PIN not initialized")]
    UserPinNotInitialized = 162,
    #[error("Invalid user type")]
    UserTypeInvalid = 163,
    #[error("Another user already logged in")]
    UserAnotherAlreadyLoggedIn = 164,
    #[error("Too many user types")]
    UserTooManyTypes = 165,

    #[error("Random seed not supported")]
    RandomSeedNotSupported = 170,
    #[error("No random number generator")]
    RandomNoRng = 171,

    #[error("Invalid domain parameters")]
    DomainParamsInvalid = 180,

    #[error("Buffer too small")]
    BufferTooSmall = 190,

    #[error("Invalid saved state")]
    SavedStateInvalid = 200,
    #[error("Information sensitive")]
    InformationSensitive = 201,
    #[error("State unsaveable")]
    StateUnsaveable = 202,

    #[error("Cryptoki not initialized")]
    CryptokiNotInitialized = 210,
    #[error("Cryptoki already initialized")]
    CryptokiAlreadyInitialized = 211,

    #[error("Bad mutex")]
    MutexBad = 220,
    #[error("Mutex not locked")]
    MutexNotLocked = 221,

    #[error("New PIN mode")]
    NewPinMode = 230,
    #[error("Next OTP")]
    NextOtp = 231,

    #[error("Vendor defined error")]
    VendorDefined = 240,

    #[error("Failed to load library")]
    LibraryLoadFailed = 250,
    #[error("Function list not available")]
    FunctionListNotAvailable = 251,
    #[error("Auxiliary function not available")]
    AuxFunctionNotAvailable = 252,
    #[error("Invalid parameter")]
    InvalidParameter = 253,
    #[error("Memory allocation error")]
    Memory = 254,
    #[error("File I/O error")]
    FileIo = 255,
    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm = 256,
    #[error("Unsupported operation")]
    UnsupportedOperation = 257,
}

// (return code, translated status, short name) for every code the module may report.
const RV_TABLE: &[(CK_RV, Status, &str)] = &[
    (CKR_CANCEL, Status::Cancel, "Cancel"),
    (CKR_HOST_MEMORY, Status::HostMemory, "Host memory"),
    (CKR_SLOT_ID_INVALID, Status::SlotIdInvalid, "Slot ID invalid"),
    (CKR_GENERAL_ERROR, Status::General, "General error"),
    (CKR_FUNCTION_FAILED, Status::FunctionFailed, "Function failed"),
    (CKR_ARGUMENTS_BAD, Status::ArgumentsBad, "Arguments bad"),
    (CKR_NO_EVENT, Status::NoEvent, "No event"),
    (CKR_NEED_TO_CREATE_THREADS, Status::NeedToCreateThreads, "Need to create threads"),
    (CKR_CANT_LOCK, Status::CantLock, "Can't lock"),
    (CKR_ATTRIBUTE_READ_ONLY, Status::AttributeReadOnly, "Attribute read only"),
    (CKR_ATTRIBUTE_SENSITIVE, Status::AttributeSensitive, "Attribute sensitive"),
    (CKR_ATTRIBUTE_TYPE_INVALID, Status::AttributeTypeInvalid, "Attribute type invalid"),
    (CKR_ATTRIBUTE_VALUE_INVALID, Status::AttributeValueInvalid, "Attribute value invalid"),
    (CKR_DATA_INVALID, Status::DataInvalid, "Data invalid"),
    (CKR_DATA_LEN_RANGE, Status::DataLenRange, "Data len range"),
    (CKR_DEVICE_ERROR, Status::DeviceError, "Device error"),
    (CKR_DEVICE_MEMORY, Status::DeviceMemory, "Device memory"),
    (CKR_DEVICE_REMOVED, Status::DeviceRemoved, "Device removed"),
    (CKR_ENCRYPTED_DATA_INVALID, Status::EncryptedDataInvalid, "Encrypted data invalid"),
    (CKR_ENCRYPTED_DATA_LEN_RANGE, Status::EncryptedDataLenRange, "Encrypted data len range"),
    (CKR_FUNCTION_CANCELED, Status::FunctionCanceled, "Function canceled"),
    (CKR_FUNCTION_NOT_PARALLEL, Status::FunctionNotParallel, "Function not parallel"),
    (CKR_FUNCTION_NOT_SUPPORTED, Status::FunctionNotSupported, "Function not supported"),
    (CKR_KEY_HANDLE_INVALID, Status::KeyHandleInvalid, "Key handle invalid"),
    (CKR_KEY_SIZE_RANGE, Status::KeySizeRange, "Key size range"),
    (CKR_KEY_TYPE_INCONSISTENT, Status::KeyTypeInconsistent, "Key type inconsistent"),
    (CKR_KEY_NOT_NEEDED, Status::KeyNotNeeded, "Key not needed"),
    (CKR_KEY_CHANGED, Status::KeyChanged, "Key changed"),
    (CKR_KEY_NEEDED, Status::KeyNeeded, "Key needed"),
    (CKR_KEY_INDIGESTIBLE, Status::KeyIndigestible, "Key indigestible"),
    (CKR_KEY_FUNCTION_NOT_PERMITTED, Status::KeyFunctionNotPermitted, "Key function not permitted"),
    (CKR_KEY_NOT_WRAPPABLE, Status::KeyNotWrappable, "Key not wrappable"),
    (CKR_KEY_UNEXTRACTABLE, Status::KeyUnextractable, "Key unextractable"),
    (CKR_MECHANISM_INVALID, Status::MechanismInvalid, "Mechanism invalid"),
    (CKR_MECHANISM_PARAM_INVALID, Status::MechanismParamInvalid, "Mechanism param invalid"),
    (CKR_OBJECT_HANDLE_INVALID, Status::ObjectHandleInvalid, "Object handle invalid"),
    (CKR_OPERATION_ACTIVE, Status::OperationActive, "Operation active"),
    (CKR_OPERATION_NOT_INITIALIZED, Status::OperationNotInitialized, "Operation not initialized"),
    (CKR_PIN_INCORRECT, Status::PinIncorrect, "PIN incorrect"),
    (CKR_PIN_INVALID, Status::PinInvalid, "PIN invalid"),
    (CKR_PIN_LEN_RANGE, Status::PinLenRange, "PIN len range"),
    (CKR_PIN_EXPIRED, Status::PinExpired, "PIN expired"),
    (CKR_PIN_LOCKED, Status::PinLocked, "PIN locked"),
    (CKR_SESSION_CLOSED, Status::SessionClosed, "Session closed"),
    (CKR_SESSION_COUNT, Status::SessionCount, "Session count"),
    (CKR_SESSION_HANDLE_INVALID, Status::SessionHandleInvalid, "Session handle invalid"),
    (
        CKR_SESSION_PARALLEL_NOT_SUPPORTED,
        Status::SessionParallelNotSupported,
        "Session parallel not supported",
    ),
    (CKR_SESSION_READ_ONLY, Status::SessionReadOnly, "Session read only"),
    (CKR_SESSION_EXISTS, Status::SessionExists, "Session exists"),
    (CKR_SESSION_READ_ONLY_EXISTS, Status::SessionReadOnlyExists, "Session read only exists"),
    (
        CKR_SESSION_READ_WRITE_SO_EXISTS,
        Status::SessionReadWriteSoExists,
        "Session read write SO exists",
    ),
    (CKR_SIGNATURE_INVALID, Status::SignatureInvalid, "Signature invalid"),
    (CKR_SIGNATURE_LEN_RANGE, Status::SignatureLenRange, "Signature len range"),
    (CKR_TEMPLATE_INCOMPLETE, Status::TemplateIncomplete, "Template incomplete"),
    (CKR_TEMPLATE_INCONSISTENT, Status::TemplateInconsistent, "Template inconsistent"),
    (CKR_TOKEN_NOT_PRESENT, Status::TokenNotPresent, "Token not present"),
    (CKR_TOKEN_NOT_RECOGNIZED, Status::TokenNotRecognized, "Token not recognized"),
    (CKR_TOKEN_WRITE_PROTECTED, Status::TokenWriteProtected, "Token write protected"),
    (
        CKR_UNWRAPPING_KEY_HANDLE_INVALID,
        Status::UnwrappingKeyHandleInvalid,
        "Unwrapping key handle invalid",
    ),
    (CKR_UNWRAPPING_KEY_SIZE_RANGE, Status::UnwrappingKeySizeRange, "Unwrapping key size range"),
    (
        CKR_UNWRAPPING_KEY_TYPE_INCONSISTENT,
        Status::UnwrappingKeyTypeInconsistent,
        "Unwrapping key type inconsistent",
    ),
    (CKR_USER_ALREADY_LOGGED_IN, Status::UserAlreadyLoggedIn, "User already logged in"),
    (CKR_USER_NOT_LOGGED_IN, Status::UserNotLoggedIn, "User not logged in"),
    (CKR_USER_PIN_NOT_INITIALIZED, Status::UserPinNotInitialized, "User PIN not initialized"),
    (CKR_USER_TYPE_INVALID, Status::UserTypeInvalid, "User type invalid"),
    (
        CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
        Status::UserAnotherAlreadyLoggedIn,
        "User another already logged in",
    ),
    (CKR_USER_TOO_MANY_TYPES, Status::UserTooManyTypes, "User too many types"),
    (CKR_WRAPPED_KEY_INVALID, Status::WrappedKeyInvalid, "Wrapped key invalid"),
    (CKR_WRAPPED_KEY_LEN_RANGE, Status::WrappedKeyLenRange, "Wrapped key len range"),
    (
        CKR_WRAPPING_KEY_HANDLE_INVALID,
        Status::WrappingKeyHandleInvalid,
        "Wrapping key handle invalid",
    ),
    (CKR_WRAPPING_KEY_SIZE_RANGE, Status::WrappingKeySizeRange, "Wrapping key size range"),
    (
        CKR_WRAPPING_KEY_TYPE_INCONSISTENT,
        Status::WrappingKeyTypeInconsistent,
        "Wrapping key type inconsistent",
    ),
    (CKR_RANDOM_SEED_NOT_SUPPORTED, Status::RandomSeedNotSupported, "Random seed not supported"),
    (CKR_RANDOM_NO_RNG, Status::RandomNoRng, "Random no RNG"),
    (CKR_DOMAIN_PARAMS_INVALID, Status::DomainParamsInvalid, "Domain params invalid"),
    (CKR_BUFFER_TOO_SMALL, Status::BufferTooSmall, "Buffer too small"),
    (CKR_SAVED_STATE_INVALID, Status::SavedStateInvalid, "Saved state invalid"),
    (CKR_INFORMATION_SENSITIVE, Status::InformationSensitive, "Information sensitive"),
    (CKR_STATE_UNSAVEABLE, Status::StateUnsaveable, "State unsaveable"),
    (CKR_CRYPTOKI_NOT_INITIALIZED, Status::CryptokiNotInitialized, "Cryptoki not initialized"),
    (
        CKR_CRYPTOKI_ALREADY_INITIALIZED,
        Status::CryptokiAlreadyInitialized,
        "Cryptoki already initialized",
    ),
    (CKR_MUTEX_BAD, Status::MutexBad, "Mutex bad"),
    (CKR_MUTEX_NOT_LOCKED, Status::MutexNotLocked, "Mutex not locked"),
    (CKR_NEW_PIN_MODE, Status::NewPinMode, "New PIN mode"),
    (CKR_NEXT_OTP, Status::NextOtp, "Next OTP"),
    (CKR_FUNCTION_REJECTED, Status::FunctionRejected, "Function rejected"),
    (CKR_VENDOR_DEFINED, Status::VendorDefined, "Vendor defined"),
];

impl Status {
    // Stable numeric code, suitable for crossing a language boundary.
    pub fn code(self) -> u32 {
        self as u32
    }

    // Translates a non-OK return code. Unknown codes in the vendor range become VendorDefined,
    // anything else is a general error.
    pub fn from_rv(rv: CK_RV) -> Self {
        match RV_TABLE.iter().find(|(code, _, _)| *code == rv) {
            Some((_, status, _)) => *status,
            None if rv >= CKR_VENDOR_DEFINED => Status::VendorDefined,
            None => Status::General,
        }
    }
}

// Short human-readable name of a PKCS #11 return code.
pub fn rv_to_string(rv: CK_RV) -> String {
    if rv == CKR_OK {
        return "OK".to_string();
    }
    match RV_TABLE.iter().find(|(code, _, _)| *code == rv) {
        Some((_, _, name)) => name.to_string(),
        None => format!("Unknown error: {}", rv),
    }
}

fn rv_suffix(rv: &Option<CK_RV>) -> String {
    match rv {
        Some(rv) => format!(" ({}, 0x{:08x})", rv_to_string(*rv), rv),
        None => String::new(),
    }
}

// A binding error: what failed, the translated status, and the raw return code when the failure
// came from the module.
#[derive(Debug, thiserror::Error)]
#[error("{msg}: {status}{}", rv_suffix(.rv))]
pub struct Error {
    status: Status,
    msg: String,
    rv: Option<CK_RV>,
    context: SpanTrace,
}

impl Error {
    // ```
    // return Err(Error::new(Status::InvalidParameter, "IV is required"));
    // ```
    pub fn new<S: Into<String>>(status: Status, msg: S) -> Self {
        Error {
            status,
            msg: msg.into(),
            rv: None,
            context: SpanTrace::capture(),
        }
    }

    pub fn from_rv<S: Into<String>>(rv: CK_RV, msg: S) -> Self {
        Error {
            status: Status::from_rv(rv),
            msg: msg.into(),
            rv: Some(rv),
            context: SpanTrace::capture(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    // The raw return code, if the module produced this error.
    pub fn rv(&self) -> Option<CK_RV> {
        self.rv
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn description(&self) -> String {
        self.status.to_string()
    }

    pub fn span_trace(&self) -> &SpanTrace {
        &self.context
    }

    pub fn is_token_not_present(&self) -> bool {
        self.status == Status::TokenNotPresent
    }

    pub fn is_pin_error(&self) -> bool {
        matches!(
            self.status,
            Status::PinIncorrect | Status::PinInvalid | Status::PinLocked | Status::PinExpired
        )
    }

    pub fn is_session_error(&self) -> bool {
        matches!(
            self.status,
            Status::SessionClosed | Status::SessionHandleInvalid | Status::SessionReadOnly
        )
    }

    pub fn is_key_error(&self) -> bool {
        matches!(
            self.status,
            Status::KeyHandleInvalid | Status::KeySizeRange | Status::KeyTypeInconsistent
        )
    }

    pub fn is_object_error(&self) -> bool {
        matches!(
            self.status,
            Status::ObjectHandleInvalid | Status::ObjectNotFound
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::new(Status::FileIo, err.to_string())
    }
}

#[macro_export]
macro_rules! errorf {
    ($status:expr, $($arg:tt)*) => ($crate::Error::new($status, format!($($arg)*)));
}

pub type Result<T> = result::Result<T, Error>;

// Turns a module return code into a Result, attaching msg on failure.
pub(crate) fn check_rv<S: Into<String>>(rv: CK_RV, msg: S) -> Result<()> {
    if rv == CKR_OK {
        return Ok(());
    }
    Err(Error::from_rv(rv, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use strum::IntoEnumIterator;

    #[test]
    fn status_codes_are_unique() {
        let codes: HashSet<u32> = Status::iter().map(Status::code).collect();
        assert_eq!(codes.len(), Status::iter().count());
        assert_eq!(Status::PinLocked.code(), 104);
        assert_eq!(Status::UnsupportedOperation.code(), 257);
    }

    #[test]
    fn every_return_code_has_its_own_status() {
        let statuses: HashSet<Status> = RV_TABLE.iter().map(|(_, s, _)| *s).collect();
        assert_eq!(statuses.len(), RV_TABLE.len());
        assert_eq!(Status::from_rv(CKR_PIN_INCORRECT), Status::PinIncorrect);
        assert_eq!(Status::from_rv(CKR_OBJECT_HANDLE_INVALID), Status::ObjectHandleInvalid);
    }

    #[test]
    fn unknown_codes() {
        assert_eq!(Status::from_rv(0x0000_7777), Status::General);
        assert_eq!(Status::from_rv(CKR_VENDOR_DEFINED + 5), Status::VendorDefined);
        assert_eq!(rv_to_string(0x7777), "Unknown error: 30583");
        assert_eq!(rv_to_string(CKR_OK), "OK");
        assert_eq!(rv_to_string(CKR_PIN_LOCKED), "PIN locked");
    }

    #[test]
    fn error_display_includes_return_code() {
        let err = Error::from_rv(CKR_PIN_INCORRECT, "failed to login");
        assert_eq!(err.status(), Status::PinIncorrect);
        assert_eq!(err.rv(), Some(CKR_PIN_INCORRECT));
        assert!(err.is_pin_error());
        assert!(!err.is_session_error());
        assert_eq!(
            err.to_string(),
            "failed to login: Incorrect PIN (PIN incorrect, 0x000000a0)"
        );

        let err = errorf!(Status::InvalidParameter, "bad length {}", 3);
        assert_eq!(err.rv(), None);
        assert_eq!(err.to_string(), "bad length 3: Invalid parameter");
        assert_eq!(err.description(), "Invalid parameter");
    }

    #[test]
    fn classifiers() {
        assert!(Error::new(Status::TokenNotPresent, "").is_token_not_present());
        assert!(Error::new(Status::SessionReadOnly, "").is_session_error());
        assert!(Error::new(Status::KeySizeRange, "").is_key_error());
        assert!(Error::new(Status::ObjectNotFound, "").is_object_error());
        assert!(!Error::new(Status::General, "").is_object_error());
    }

    #[test]
    fn io_errors_are_file_errors() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.status(), Status::FileIo);
    }

    #[test]
    fn check_rv_passes_ok() {
        assert!(check_rv(CKR_OK, "unused").is_ok());
        let err = check_rv(CKR_DEVICE_REMOVED, "failed to sign data").unwrap_err();
        assert_eq!(err.status(), Status::DeviceRemoved);
        assert_eq!(err.message(), "failed to sign data");
    }
}
