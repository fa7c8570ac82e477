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

use crate::error::{Result, Status};
use crate::errorf;

// Fixed-width PKCS #11 text fields are padded with blanks (or NULs by some modules).
pub(crate) fn trim_padded(field: &[u8]) -> String {
    let end = field
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Lowercase hex, two digits per byte.
pub fn bytes_to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|err| errorf!(Status::InvalidParameter, "invalid hex string: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_blanks_and_nuls() {
        assert_eq!(trim_padded(b"Token   "), "Token");
        assert_eq!(trim_padded(b"Token\0\0\0"), "Token");
        assert_eq!(trim_padded(b"My Token \0 "), "My Token");
        assert_eq!(trim_padded(b"        "), "");
        assert_eq!(trim_padded(b""), "");
    }

    #[test]
    fn hex() {
        assert_eq!(bytes_to_hex(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(hex_to_bytes("00AB10").unwrap(), vec![0x00, 0xab, 0x10]);
        assert_eq!(hex_to_bytes("").unwrap(), Vec::<u8>::new());
        assert_eq!(
            hex_to_bytes("abc").unwrap_err().status(),
            Status::InvalidParameter
        );
        assert_eq!(
            hex_to_bytes("zz").unwrap_err().status(),
            Status::InvalidParameter
        );
    }
}
