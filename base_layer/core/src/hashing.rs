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

use blake2::{digest::consts::U32, Blake2b, Digest};
use handsel_common_types::types::FixedHash;
use sha3::Sha3_256;

type Blake2b256 = Blake2b<U32>;

/// General-purpose 256-bit hash for block headers, transaction ids and bid blinds.
pub fn blake2b256(bytes: &[u8]) -> FixedHash {
    let out: [u8; 32] = Blake2b256::digest(bytes).into();
    FixedHash::from(out)
}

pub fn blake2b256_pair(a: &[u8], b: &[u8]) -> FixedHash {
    let mut hasher = Blake2b256::new();
    hasher.update(a);
    hasher.update(b);
    let out: [u8; 32] = hasher.finalize().into();
    FixedHash::from(out)
}

/// Names are keyed by the SHA3-256 of their raw bytes.
pub fn sha3_256(bytes: &[u8]) -> FixedHash {
    let out: [u8; 32] = Sha3_256::digest(bytes).into();
    FixedHash::from(out)
}

/// The blind committed to by a BID: `H(value || nonce)`. Revealing the value and nonce
/// proves the bid amount without having exposed it during bidding.
pub fn bid_blind(value: u64, nonce: &[u8; 32]) -> FixedHash {
    blake2b256_pair(&value.to_le_bytes(), nonce)
}
