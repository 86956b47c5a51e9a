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

use borsh::{BorshDeserialize, BorshSerialize};

/// Bookkeeping for the migration framework, persisted under a single key per database.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MigrationState {
    /// Highest migration id that has been handled (run, skipped or faked).
    pub last_migration: u32,
    /// Next migration id to consider on open.
    pub next_migration: u32,
    /// Ids that were skipped (for example under pruning). Warned about on every open.
    pub skipped: Vec<u32>,
    /// True while a migration is mid-flight. Left set by a crash; the next open resumes
    /// from `progress`.
    pub in_progress: bool,
    /// Opaque checkpoint written by a multi-batch migration.
    pub progress: Vec<u8>,
}

impl MigrationState {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("MigrationState serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips() {
        let state = MigrationState {
            last_migration: 3,
            next_migration: 4,
            skipped: vec![1, 2],
            in_progress: true,
            progress: vec![0xde, 0xad],
        };
        assert_eq!(MigrationState::decode(&state.encode()).unwrap(), state);
    }
}
