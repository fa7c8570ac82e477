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

use std::path::{Path, PathBuf};
use std::ptr;

use libloading::{Library, Symbol};
use pkcs11_sys::*;
use tracing::{debug, info};

use crate::error::{rv_to_string, Result, Status};
use crate::errorf;

pub type GetFunctionListFn = unsafe extern "C" fn(CK_FUNCTION_LIST_PTR_PTR) -> CK_RV;
pub type GetAuxFunctionListFn = unsafe extern "C" fn(AUX_FUNC_LIST_PTR_PTR) -> CK_RV;

// Copies a function pointer out of the table, failing if the module left the entry empty.
macro_rules! ck_fn {
    ($module:expr, $name:ident) => {
        $module.functions().$name.ok_or_else(|| {
            $crate::errorf!(
                $crate::Status::FunctionNotSupported,
                "{} is not provided by the module",
                stringify!($name)
            )
        })?
    };
}
pub(crate) use ck_fn;

// A resolved vendor module: its function table, the optional auxiliary table, and the library
// handle that keeps both alive.
pub(crate) struct Module {
    functions: *const CK_FUNCTION_LIST,
    aux: *const AUX_FUNC_LIST,
    path: Option<PathBuf>,
    _library: Option<Library>,
}

// SAFETY: C_Initialize is called with NULL arguments, so the module may assume a single caller at
// a time. Module is Send but not Sync, and every call goes through &mut Pkcs11Library or a
// borrow of it.
unsafe impl Send for Module {}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("aux", &!self.aux.is_null())
            .finish()
    }
}

impl Module {
    pub fn load(path: &Path, load_aux: bool) -> Result<Self> {
        debug!("loading PKCS #11 module {}", path.display());
        let library = unsafe { Library::new(path) }.map_err(|err| {
            errorf!(
                Status::LibraryLoadFailed,
                "failed to load {}: {}",
                path.display(),
                err
            )
        })?;

        let get_function_list: GetFunctionListFn = unsafe {
            let symbol: Symbol<GetFunctionListFn> =
                library.get(C_GET_FUNCTION_LIST_SYMBOL).map_err(|err| {
                    errorf!(
                        Status::FunctionListNotAvailable,
                        "C_GetFunctionList not found in {}: {}",
                        path.display(),
                        err
                    )
                })?;
            *symbol
        };

        let get_aux_function_list: Option<GetAuxFunctionListFn> = if load_aux {
            match unsafe { library.get::<GetAuxFunctionListFn>(E_GET_AUX_FUNCTION_LIST_SYMBOL) } {
                Ok(symbol) => Some(*symbol),
                Err(err) => {
                    debug!("E_GetAuxFunctionList not found: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let mut module =
            unsafe { Self::from_entry_points(get_function_list, get_aux_function_list)? };
        module.path = Some(path.to_path_buf());
        module._library = Some(library);
        info!("loaded PKCS #11 module {}", path.display());
        Ok(module)
    }

    /// # Safety
    ///
    /// Both entry points must follow the PKCS #11 / vendor calling conventions, and the tables
    /// they return must stay valid for as long as the returned Module lives.
    pub unsafe fn from_entry_points(
        get_function_list: GetFunctionListFn,
        get_aux_function_list: Option<GetAuxFunctionListFn>,
    ) -> Result<Self> {
        let mut functions: CK_FUNCTION_LIST_PTR = ptr::null_mut();
        let rv = get_function_list(&mut functions);
        if rv != CKR_OK {
            return Err(errorf!(
                Status::FunctionListNotAvailable,
                "C_GetFunctionList failed: {}",
                rv_to_string(rv)
            ));
        }
        if functions.is_null() {
            return Err(errorf!(
                Status::FunctionListNotAvailable,
                "C_GetFunctionList returned a null table"
            ));
        }

        let mut aux: AUX_FUNC_LIST_PTR = ptr::null_mut();
        if let Some(get_aux_function_list) = get_aux_function_list {
            let rv = get_aux_function_list(&mut aux);
            if rv != CKR_OK {
                debug!("E_GetAuxFunctionList failed: {}", rv_to_string(rv));
                aux = ptr::null_mut();
            }
        }

        Ok(Module {
            functions,
            aux,
            path: None,
            _library: None,
        })
    }

    pub fn functions(&self) -> &CK_FUNCTION_LIST {
        // SAFETY: checked non-null on construction; the table outlives the library handle we own.
        unsafe { &*self.functions }
    }

    pub fn aux(&self) -> Option<&AUX_FUNC_LIST> {
        // SAFETY: as for functions(), when present.
        unsafe { self.aux.as_ref() }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
