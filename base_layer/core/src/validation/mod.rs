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

//! Consensus checks the state layer performs itself.
//!
//! Full header and body validation (proof of work, difficulty retargeting, script
//! execution) belongs to the outer node; the chain database accepts pluggable validators
//! so tests can relax the rules it does own.

use handsel_common_types::OutPoint;

use crate::blocks::{BlockHeader, ChainEntry};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Previous block hash does not match the chain tip")]
    BadPrevHash,
    #[error("Block height {got} does not follow previous height {prev}")]
    BadHeight { prev: u64, got: u64 },
    #[error("Block timestamp is zero")]
    BadTimestamp,
    #[error("Block has no coinbase transaction")]
    MissingCoinbase,
    #[error("Input refers to a missing or spent coin: {0}")]
    CoinNotFound(OutPoint),
    #[error("Coinbase output spent before maturity: {0}")]
    ImmatureCoinbaseSpend(OutPoint),
    #[error("Malformed covenant: {0}")]
    MalformedCovenant(&'static str),
    #[error("Name rule violated: {0}")]
    Name(#[from] NameRuleError),
}

/// Auction and registration rule violations surfaced by the name state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameRuleError {
    #[error("Name is not reserved and cannot be claimed")]
    NotReserved,
    #[error("Claim period has ended")]
    ClaimPeriodOver,
    #[error("An auction for this name is already active")]
    AuctionActive,
    #[error("Name is owned and not expired")]
    NameOwned,
    #[error("Name is revoked and still in lockup")]
    RevokeLockup,
    #[error("Action not permitted in auction state {0}")]
    WrongState(&'static str),
    #[error("Input is not a {expected} output for this name")]
    WrongInput { expected: &'static str },
    #[error("Reveal does not match the bid blind")]
    BlindMismatch,
    #[error("Only the name owner may do this")]
    NotOwner,
    #[error("The winning reveal must be registered, not redeemed")]
    OwnerMustRegister,
    #[error("Register value must equal the second-highest reveal")]
    BadRegisterValue,
    #[error("Transfer is still in lockup")]
    TransferLockup,
    #[error("No transfer is active")]
    NoActiveTransfer,
    #[error("Name state not found for a name action")]
    StateMissing,
    #[error("Renewal outside the renewal window")]
    OutsideRenewalWindow,
}

/// Header checks against the entry the block claims to extend.
pub trait HeaderValidator: Send + Sync {
    fn validate(&self, header: &BlockHeader, prev: &ChainEntry) -> Result<(), ValidationError>;
}

/// The checks the state layer owns: linkage, height continuity and a sane timestamp.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChainLinkValidator;

impl HeaderValidator for ChainLinkValidator {
    fn validate(&self, header: &BlockHeader, prev: &ChainEntry) -> Result<(), ValidationError> {
        if header.prev_hash != prev.hash {
            return Err(ValidationError::BadPrevHash);
        }
        if header.height != prev.height + 1 {
            return Err(ValidationError::BadHeight {
                prev: prev.height,
                got: header.height,
            });
        }
        if header.time == 0 {
            return Err(ValidationError::BadTimestamp);
        }
        Ok(())
    }
}

/// Accepts or rejects everything. Tests use it to isolate the storage layer from
/// consensus rules.
#[derive(Clone, Copy, Debug)]
pub struct MockValidator {
    is_valid: bool,
}

impl MockValidator {
    pub fn new(is_valid: bool) -> Self {
        Self { is_valid }
    }
}

impl HeaderValidator for MockValidator {
    fn validate(&self, _header: &BlockHeader, _prev: &ChainEntry) -> Result<(), ValidationError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(ValidationError::BadPrevHash)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blocks::genesis_block;

    #[test]
    fn chain_link_validator_enforces_linkage() {
        let genesis = genesis_block(handsel_common::Network::Regtest);
        let entry = ChainEntry::from_header(&genesis.header, 0);
        let good = genesis.header.next(entry.time + 1);
        assert!(ChainLinkValidator.validate(&good, &entry).is_ok());

        let mut bad = good.clone();
        bad.prev_hash = handsel_common_types::types::FixedHash::random();
        assert_eq!(
            ChainLinkValidator.validate(&bad, &entry).unwrap_err(),
            ValidationError::BadPrevHash
        );

        let mut bad = good;
        bad.height = 5;
        assert!(matches!(
            ChainLinkValidator.validate(&bad, &entry).unwrap_err(),
            ValidationError::BadHeight { .. }
        ));
    }
}
