// Copyright 2022. The Handsel Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! The reserved-name table.
//!
//! Reserved names skip the auction and may be claimed by their rights holders during the
//! claim period. The table here is a build-time list; the full production table is
//! generated from the claim set committed to by `reserved_root`.

use handsel_common_types::types::NameHash;

use crate::name_state::name_hash;

pub const RESERVED_NAMES: &[&str] = &[
    "example", "invalid", "local", "localhost", "test", "onion", "handsel",
];

pub fn is_reserved(name: &[u8]) -> bool {
    RESERVED_NAMES.iter().any(|r| r.as_bytes() == name)
}

pub fn is_reserved_hash(hash: &NameHash) -> bool {
    RESERVED_NAMES.iter().any(|r| name_hash(r.as_bytes()) == *hash)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserved_lookup_by_name_and_hash() {
        assert!(is_reserved(b"localhost"));
        assert!(!is_reserved(b"dollarydoo"));
        assert!(is_reserved_hash(&name_hash(b"example")));
        assert!(!is_reserved_hash(&name_hash(b"dollarydoo")));
    }
}
