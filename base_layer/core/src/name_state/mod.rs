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

//! The per-name auction and registration state machine.
//!
//! A name's lifecycle is `UNOWNED -> OPENING -> BIDDING -> REVEALING -> CLOSED`, with the
//! closed super-state resolving to registered, expired or revoked. All timing is in block
//! heights relative to the OPEN, driven by [NetworkParams]. The chain database and the
//! wallet both run covenants through [NameView::apply]; every state change is recorded as
//! an undo delta so a block can be inverted exactly.

mod fsm;
pub mod reserved;

use borsh::{BorshDeserialize, BorshSerialize};
pub use fsm::NameView;
use handsel_common::NetworkParams;
use handsel_common_types::{types::NameHash, Amount, OutPoint};

use crate::hashing::sha3_256;

/// Names are keyed by the SHA3-256 of their raw bytes.
pub fn name_hash(name: &[u8]) -> NameHash {
    sha3_256(name)
}

pub const MAX_NAME_LEN: usize = 63;

/// Lowercase ascii alphanumerics and interior hyphens, at most [MAX_NAME_LEN] bytes.
pub fn is_valid_name(name: &[u8]) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    if name.first() == Some(&b'-') || name.last() == Some(&b'-') {
        return false;
    }
    name.iter()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == b'-')
}

/// Where a name is in its lifecycle at a given height. The absence of a [NameState] record
/// is the UNOWNED state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameStatus {
    Opening,
    Bidding,
    Revealing,
    /// Auction resolved but the winner has not registered yet.
    Closed,
    Registered,
    Expired,
    Revoked,
}

impl NameStatus {
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            NameStatus::Closed | NameStatus::Registered | NameStatus::Expired | NameStatus::Revoked
        )
    }

    /// An expired or revoked (and out of lockup) name can be opened again.
    pub fn is_openable(self) -> bool {
        matches!(self, NameStatus::Expired | NameStatus::Revoked)
    }
}

/// The authoritative record of a name's auction and registration status.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NameState {
    pub name_hash: NameHash,
    pub name: Vec<u8>,
    /// Height of the OPEN (or CLAIM) that started the current round.
    pub height: u64,
    pub renewal: u64,
    /// Outpoint of the current winning reveal or owner output. Null while unowned.
    pub owner: OutPoint,
    /// Highest revealed bid.
    pub highest: Amount,
    /// Second-highest revealed bid: the price the winner actually pays.
    pub value: Amount,
    pub data: Vec<u8>,
    /// Height of the active TRANSFER, or 0.
    pub transfer: u64,
    /// Height of the REVOKE, or 0. Terminal for the round.
    pub revoked: u64,
    pub claimed: u32,
    pub renewals: u32,
    pub weak: bool,
    pub registered: bool,
    /// Height at which the previous round was discarded on a re-open, or 0.
    pub expired_height: u64,
}

impl NameState {
    pub fn open(name_hash: NameHash, name: Vec<u8>, height: u64) -> Self {
        Self {
            name_hash,
            name,
            height,
            renewal: height,
            owner: OutPoint::null(),
            highest: 0,
            value: 0,
            data: Vec::new(),
            transfer: 0,
            revoked: 0,
            claimed: 0,
            renewals: 0,
            weak: false,
            registered: false,
            expired_height: 0,
        }
    }

    /// Start a fresh round for a lapsed name, preserving the identity fields.
    pub fn reset(&mut self, height: u64) {
        self.expired_height = height;
        self.height = height;
        self.renewal = height;
        self.owner = OutPoint::null();
        self.highest = 0;
        self.value = 0;
        self.data = Vec::new();
        self.transfer = 0;
        self.revoked = 0;
        self.renewals = 0;
        self.weak = false;
        self.registered = false;
    }

    pub fn is_expired(&self, height: u64, params: &NetworkParams) -> bool {
        if self.claimed == 0 {
            // A name cannot expire while its auction is still running
            let reveal_done = self.height + params.open_period() + params.bidding_period + params.reveal_period;
            if height < reveal_done {
                return false;
            }
        }
        height >= self.renewal + params.renewal_window
    }

    pub fn status(&self, height: u64, params: &NetworkParams) -> NameStatus {
        if self.revoked > 0 {
            return NameStatus::Revoked;
        }
        if self.claimed > 0 {
            // Claims skip the auction entirely
            if self.is_expired(height, params) {
                return NameStatus::Expired;
            }
            return if self.registered {
                NameStatus::Registered
            } else {
                NameStatus::Closed
            };
        }
        let open_end = self.height + params.open_period();
        let bid_end = open_end + params.bidding_period;
        let reveal_end = bid_end + params.reveal_period;
        if height < open_end {
            NameStatus::Opening
        } else if height < bid_end {
            NameStatus::Bidding
        } else if height < reveal_end {
            NameStatus::Revealing
        } else if self.is_expired(height, params) {
            NameStatus::Expired
        } else if self.registered {
            NameStatus::Registered
        } else {
            NameStatus::Closed
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("NameState serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }

    /// Countdown view of the auction timeline, for wallets and RPC surfaces.
    pub fn to_stats(&self, height: u64, params: &NetworkParams) -> AuctionStats {
        let open_end = self.height + params.open_period();
        let bid_end = open_end + params.bidding_period;
        let reveal_end = bid_end + params.reveal_period;
        AuctionStats {
            status: self.status(height, params),
            blocks_until_bidding: open_end.saturating_sub(height),
            blocks_until_reveal: bid_end.saturating_sub(height),
            blocks_until_close: reveal_end.saturating_sub(height),
            blocks_until_expire: (self.renewal + params.renewal_window).saturating_sub(height),
        }
    }
}

/// How many blocks remain until each phase change. A zero means the phase has begun (or
/// passed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuctionStats {
    pub status: NameStatus,
    pub blocks_until_bidding: u64,
    pub blocks_until_reveal: u64,
    pub blocks_until_close: u64,
    pub blocks_until_expire: u64,
}

/// Prior states of every name a block touched, in touch order, sufficient to invert the
/// block. `None` means the name did not exist before the block.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NameUndo {
    pub entries: Vec<(NameHash, Option<NameState>)>,
}

impl NameUndo {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn touched(&self) -> impl Iterator<Item = &NameHash> {
        self.entries.iter().map(|(hash, _)| hash)
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("NameUndo serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        Self::try_from_slice(bytes)
    }
}

#[cfg(test)]
mod test {
    use handsel_common::Network;

    use super::*;

    fn params() -> NetworkParams {
        Network::Regtest.params()
    }

    #[test]
    fn name_validity() {
        assert!(is_valid_name(b"dollarydoo"));
        assert!(is_valid_name(b"a1-b2"));
        assert!(!is_valid_name(b""));
        assert!(!is_valid_name(b"-leading"));
        assert!(!is_valid_name(b"trailing-"));
        assert!(!is_valid_name(b"UPPER"));
        assert!(!is_valid_name(&[b'a'; 64]));
    }

    #[test]
    fn status_follows_the_auction_timeline() {
        let params = params();
        let ns = NameState::open(name_hash(b"x"), b"x".to_vec(), 100);
        // Regtest: open 6, bidding 5, reveal 10
        assert_eq!(ns.status(100, &params), NameStatus::Opening);
        assert_eq!(ns.status(105, &params), NameStatus::Opening);
        assert_eq!(ns.status(106, &params), NameStatus::Bidding);
        assert_eq!(ns.status(110, &params), NameStatus::Bidding);
        assert_eq!(ns.status(111, &params), NameStatus::Revealing);
        assert_eq!(ns.status(120, &params), NameStatus::Revealing);
        assert_eq!(ns.status(121, &params), NameStatus::Closed);
    }

    #[test]
    fn revoked_is_terminal() {
        let params = params();
        let mut ns = NameState::open(name_hash(b"x"), b"x".to_vec(), 100);
        ns.revoked = 130;
        assert_eq!(ns.status(131, &params), NameStatus::Revoked);
        assert_eq!(ns.status(1_000_000, &params), NameStatus::Revoked);
    }

    #[test]
    fn names_expire_after_the_renewal_window() {
        let params = params();
        let mut ns = NameState::open(name_hash(b"x"), b"x".to_vec(), 100);
        ns.registered = true;
        ns.renewal = 121;
        assert_eq!(ns.status(121 + params.renewal_window - 1, &params), NameStatus::Registered);
        assert_eq!(ns.status(121 + params.renewal_window, &params), NameStatus::Expired);
    }

    #[test]
    fn reset_starts_a_new_round() {
        let mut ns = NameState::open(name_hash(b"x"), b"x".to_vec(), 100);
        ns.registered = true;
        ns.highest = 5000;
        ns.value = 3000;
        ns.data = vec![1, 2, 3];
        ns.reset(9000);
        assert_eq!(ns.height, 9000);
        assert_eq!(ns.expired_height, 9000);
        assert!(!ns.registered);
        assert!(ns.data.is_empty());
        assert_eq!(ns.highest, 0);
        assert_eq!(ns.name, b"x");
    }

    #[test]
    fn stats_count_down_the_phases() {
        let params = params();
        let ns = NameState::open(name_hash(b"x"), b"x".to_vec(), 100);
        let stats = ns.to_stats(100, &params);
        assert_eq!(stats.status, NameStatus::Opening);
        assert_eq!(stats.blocks_until_bidding, 6);
        assert_eq!(stats.blocks_until_reveal, 11);
        assert_eq!(stats.blocks_until_close, 21);
        let stats = ns.to_stats(121, &params);
        assert_eq!(stats.status, NameStatus::Closed);
        assert_eq!(stats.blocks_until_close, 0);
    }

    #[test]
    fn undo_round_trips() {
        let ns = NameState::open(name_hash(b"y"), b"y".to_vec(), 7);
        let undo = NameUndo {
            entries: vec![(ns.name_hash, None), (name_hash(b"z"), Some(ns))],
        };
        assert_eq!(NameUndo::decode(&undo.encode()).unwrap(), undo);
    }
}
