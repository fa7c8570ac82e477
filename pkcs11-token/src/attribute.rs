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

use std::marker::PhantomData;
use std::mem;

use pkcs11_sys::*;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Bool(CK_BBOOL),
    Ulong(CK_ULONG),
    Bytes(Vec<u8>),
}

// Owned attribute template. Values live here; RawTemplate only points at them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Template {
    attributes: Vec<(CK_ATTRIBUTE_TYPE, Value)>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bool(mut self, type_: CK_ATTRIBUTE_TYPE, value: bool) -> Self {
        let value = if value { CK_TRUE } else { CK_FALSE };
        self.attributes.push((type_, Value::Bool(value)));
        self
    }

    pub fn ulong(mut self, type_: CK_ATTRIBUTE_TYPE, value: CK_ULONG) -> Self {
        self.attributes.push((type_, Value::Ulong(value)));
        self
    }

    pub fn bytes(mut self, type_: CK_ATTRIBUTE_TYPE, value: &[u8]) -> Self {
        self.attributes.push((type_, Value::Bytes(value.to_vec())));
        self
    }

    pub fn to_raw(&self) -> RawTemplate<'_> {
        let attributes = self
            .attributes
            .iter()
            .map(|(type_, value)| {
                let (ptr, len) = match value {
                    Value::Bool(b) => (
                        b as *const CK_BBOOL as CK_VOID_PTR,
                        mem::size_of::<CK_BBOOL>(),
                    ),
                    Value::Ulong(u) => (
                        u as *const CK_ULONG as CK_VOID_PTR,
                        mem::size_of::<CK_ULONG>(),
                    ),
                    Value::Bytes(v) => (v.as_ptr() as CK_VOID_PTR, v.len()),
                };
                CK_ATTRIBUTE {
                    type_: *type_,
                    pValue: ptr,
                    ulValueLen: len as CK_ULONG,
                }
            })
            .collect();
        RawTemplate {
            attributes,
            _values: PhantomData,
        }
    }
}

// C view of a Template, valid while the Template is borrowed.
pub(crate) struct RawTemplate<'a> {
    attributes: Vec<CK_ATTRIBUTE>,
    _values: PhantomData<&'a Template>,
}

impl RawTemplate<'_> {
    pub fn as_mut_ptr(&mut self) -> CK_ATTRIBUTE_PTR {
        self.attributes.as_mut_ptr()
    }

    pub fn count(&self) -> CK_ULONG {
        self.attributes.len() as CK_ULONG
    }
}

pub(crate) fn decode_ulong(value: &[u8]) -> Option<CK_ULONG> {
    let bytes: [u8; mem::size_of::<CK_ULONG>()] = value.try_into().ok()?;
    Some(CK_ULONG::from_ne_bytes(bytes))
}

pub(crate) fn decode_bool(value: &[u8]) -> Option<bool> {
    value.first().map(|&b| b != CK_FALSE)
}
