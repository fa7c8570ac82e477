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

use std::ops::{Deref, DerefMut};

use pkcs11_sys::CK_SLOT_ID;
use tracing::warn;

use crate::error::Result;
use crate::library::Pkcs11Library;
use crate::types::UserType;

/// A read-write session that is logged out and closed when dropped.
///
/// ```no_run
/// use pkcs11_token::{LibraryConfig, Pkcs11Library, SessionGuard};
///
/// let mut lib = Pkcs11Library::new();
/// lib.initialize(&LibraryConfig::new())?;
/// let session = SessionGuard::open(&mut lib, 1, Some("123456"))?;
/// let certificates = session.find_certificates()?;
/// # Ok::<(), pkcs11_token::Error>(())
/// ```
pub struct SessionGuard<'a> {
    lib: &'a mut Pkcs11Library,
}

impl<'a> SessionGuard<'a> {
    /// Opens a session on `slot` and, given a non-empty PIN, logs in as the normal user. The
    /// session is closed again if login fails.
    pub fn open(lib: &'a mut Pkcs11Library, slot: CK_SLOT_ID, pin: Option<&str>) -> Result<Self> {
        lib.open_session(slot, true)?;
        if let Some(pin) = pin.filter(|pin| !pin.is_empty()) {
            if let Err(err) = lib.login(pin, UserType::User) {
                if let Err(close_err) = lib.close_session() {
                    warn!("failed to close session after login failure: {}", close_err);
                }
                return Err(err);
            }
        }
        Ok(SessionGuard { lib })
    }
}

impl Deref for SessionGuard<'_> {
    type Target = Pkcs11Library;

    fn deref(&self) -> &Pkcs11Library {
        self.lib
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Pkcs11Library {
        self.lib
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.lib.is_logged_in() {
            if let Err(err) = self.lib.logout() {
                warn!("logout on drop failed: {}", err);
            }
        }
        if let Err(err) = self.lib.close_session() {
            warn!("close session on drop failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;

    #[test]
    fn open_needs_an_initialized_library() {
        let mut lib = Pkcs11Library::new();
        let err = SessionGuard::open(&mut lib, 1, None).err().unwrap();
        assert_eq!(err.status(), Status::CryptokiNotInitialized);
        assert!(!lib.has_session());
    }
}
