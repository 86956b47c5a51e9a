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

use std::collections::{HashMap, HashSet};

use handsel_common::NetworkParams;
use handsel_common_types::{types::NameHash, OutPoint};
use log::*;

use crate::{
    covenants::CovenantType,
    hashing::bid_blind,
    name_state::{is_valid_name, reserved, NameState, NameStatus, NameUndo},
    transactions::{Coin, TxOutput},
    validation::{NameRuleError, ValidationError},
};

const LOG_TARGET: &str = "c::ns::fsm";

/// An in-memory overlay of name states for one block (or one wallet event).
///
/// The caller loads the current state of every name it is about to touch, applies covenant
/// outputs in tx-then-output order, and collects the resulting final states plus the undo
/// deltas. Nothing is persisted here; the view's output goes into the caller's batch.
#[derive(Default)]
pub struct NameView {
    entries: HashMap<NameHash, Option<NameState>>,
    undo: Vec<(NameHash, Option<NameState>)>,
    recorded: HashSet<NameHash>,
}

impl NameView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `hash` available to [NameView::apply], loading it with `loader` on first use.
    pub fn load_with<E>(
        &mut self,
        hash: NameHash,
        loader: impl FnOnce() -> Result<Option<NameState>, E>,
    ) -> Result<(), E> {
        if !self.entries.contains_key(&hash) {
            let state = loader()?;
            self.entries.insert(hash, state);
        }
        Ok(())
    }

    pub fn get(&self, hash: &NameHash) -> Option<&NameState> {
        self.entries.get(hash).and_then(|state| state.as_ref())
    }

    pub fn is_loaded(&self, hash: &NameHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Apply one covenant output. `outpoint` locates the output; `spent` is the coin (and
    /// its outpoint) consumed by the input at the same index, for covenants that continue
    /// an existing name output chain.
    pub fn apply(
        &mut self,
        params: &NetworkParams,
        height: u64,
        outpoint: OutPoint,
        output: &TxOutput,
        spent: Option<(OutPoint, &Coin)>,
    ) -> Result<(), ValidationError> {
        let cov = &output.covenant;
        if cov.is_none() {
            return Ok(());
        }
        let hash = cov.name_hash()?;
        debug_assert!(self.entries.contains_key(&hash), "name not loaded into view");
        match cov.covenant_type() {
            CovenantType::Claim => self.apply_claim(params, height, outpoint, output, hash),
            CovenantType::Open => self.apply_open(params, height, output, hash),
            CovenantType::Bid => self.apply_bid(params, height, output, hash),
            CovenantType::Reveal => self.apply_reveal(params, height, outpoint, output, spent, hash),
            CovenantType::Redeem => self.apply_redeem(params, height, spent, hash),
            CovenantType::Register => self.apply_register(params, height, outpoint, output, spent, hash),
            CovenantType::Update => self.apply_update(params, height, outpoint, output, spent, hash),
            CovenantType::Renew => self.apply_renew(params, height, outpoint, spent, hash),
            CovenantType::Transfer => self.apply_transfer(params, height, outpoint, spent, hash),
            CovenantType::Finalize => self.apply_finalize(params, height, outpoint, spent, hash),
            CovenantType::Revoke => self.apply_revoke(params, height, spent, hash),
            CovenantType::None => Ok(()),
        }
    }

    /// Final states of every touched name, in touch order, plus the undo deltas.
    pub fn into_parts(self) -> (Vec<(NameHash, Option<NameState>)>, NameUndo) {
        let mut finals = Vec::with_capacity(self.undo.len());
        let mut seen = HashSet::new();
        for (hash, _) in &self.undo {
            if seen.insert(*hash) {
                finals.push((*hash, self.entries.get(hash).cloned().flatten()));
            }
        }
        (finals, NameUndo { entries: self.undo })
    }

    pub fn touched(&self) -> usize {
        self.recorded.len()
    }

    fn record_prior(&mut self, hash: NameHash) {
        if self.recorded.insert(hash) {
            self.undo.push((hash, self.entries.get(&hash).cloned().flatten()));
        }
    }

    fn state(&self, hash: &NameHash) -> Option<&NameState> {
        self.get(hash)
    }

    fn state_required(&self, hash: &NameHash) -> Result<&NameState, ValidationError> {
        self.state(hash).ok_or(ValidationError::Name(NameRuleError::StateMissing))
    }

    fn set(&mut self, hash: NameHash, state: NameState) {
        self.entries.insert(hash, Some(state));
    }

    fn apply_claim(
        &mut self,
        params: &NetworkParams,
        height: u64,
        outpoint: OutPoint,
        output: &TxOutput,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        let name = output.covenant.name()?.to_vec();
        if !is_valid_name(&name) {
            return Err(ValidationError::MalformedCovenant("invalid name"));
        }
        if !reserved::is_reserved(&name) {
            return Err(NameRuleError::NotReserved.into());
        }
        if height >= params.claim_period {
            return Err(NameRuleError::ClaimPeriodOver.into());
        }
        let weak = output.covenant.weak()?;
        match self.state(&hash) {
            None => {},
            Some(ns) => match ns.status(height, params) {
                NameStatus::Expired => {},
                NameStatus::Revoked if height >= ns.revoked + params.revoke_lockup => {},
                NameStatus::Revoked => return Err(NameRuleError::RevokeLockup.into()),
                _ => return Err(NameRuleError::NameOwned.into()),
            },
        }
        self.record_prior(hash);
        let mut ns = match self.state(&hash) {
            Some(existing) => {
                let mut ns = existing.clone();
                ns.reset(height);
                ns
            },
            None => NameState::open(hash, name, height),
        };
        ns.claimed += 1;
        ns.weak = weak;
        ns.owner = outpoint;
        ns.renewal = height;
        debug!(target: LOG_TARGET, "CLAIM {} at height {}", hash, height);
        self.set(hash, ns);
        Ok(())
    }

    fn apply_open(
        &mut self,
        params: &NetworkParams,
        height: u64,
        output: &TxOutput,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        let name = output.covenant.name()?.to_vec();
        if !is_valid_name(&name) {
            return Err(ValidationError::MalformedCovenant("invalid name"));
        }
        if reserved::is_reserved(&name) {
            return Err(NameRuleError::NameOwned.into());
        }
        match self.state(&hash) {
            None => {
                self.record_prior(hash);
                self.set(hash, NameState::open(hash, name, height));
            },
            Some(ns) => {
                match ns.status(height, params) {
                    NameStatus::Opening | NameStatus::Bidding | NameStatus::Revealing => {
                        return Err(NameRuleError::AuctionActive.into());
                    },
                    NameStatus::Registered => return Err(NameRuleError::NameOwned.into()),
                    NameStatus::Revoked => {
                        if height < ns.revoked + params.revoke_lockup {
                            return Err(NameRuleError::RevokeLockup.into());
                        }
                    },
                    // A lapsed round (closed and never registered, or expired) may be
                    // re-opened
                    NameStatus::Closed | NameStatus::Expired => {},
                }
                self.record_prior(hash);
                let mut ns = self.state(&hash).expect("checked above").clone();
                ns.reset(height);
                self.set(hash, ns);
            },
        }
        debug!(target: LOG_TARGET, "OPEN {} at height {}", hash, height);
        Ok(())
    }

    fn apply_bid(
        &mut self,
        params: &NetworkParams,
        height: u64,
        output: &TxOutput,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        let name = output.covenant.name()?;
        if !is_valid_name(name) {
            return Err(ValidationError::MalformedCovenant("invalid name"));
        }
        let ns = self.state_required(&hash)?;
        if ns.status(height, params) != NameStatus::Bidding {
            return Err(NameRuleError::WrongState("must be BIDDING to bid").into());
        }
        // The bid itself lives in the UTXO set; the state record is untouched until reveal
        Ok(())
    }

    fn apply_reveal(
        &mut self,
        params: &NetworkParams,
        height: u64,
        outpoint: OutPoint,
        output: &TxOutput,
        spent: Option<(OutPoint, &Coin)>,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        let ns = self.state_required(&hash)?;
        if ns.status(height, params) != NameStatus::Revealing {
            return Err(NameRuleError::WrongState("must be REVEALING to reveal").into());
        }
        let (_, bid) = spent.ok_or(NameRuleError::WrongInput { expected: "BID" })?;
        if bid.covenant.covenant_type() != CovenantType::Bid || bid.covenant.name_hash()? != hash {
            return Err(NameRuleError::WrongInput { expected: "BID" }.into());
        }
        let nonce = output.covenant.nonce()?;
        if bid.covenant.blind()? != bid_blind(output.value, &nonce) {
            return Err(NameRuleError::BlindMismatch.into());
        }
        self.record_prior(hash);
        let mut ns = self.state(&hash).expect("checked above").clone();
        // Ties keep the earlier outpoint: a later equal reveal does not displace the winner
        if output.value > ns.highest {
            ns.value = ns.highest;
            ns.highest = output.value;
            ns.owner = outpoint;
        } else if output.value > ns.value {
            ns.value = output.value;
        }
        debug!(
            target: LOG_TARGET,
            "REVEAL {} value {} at height {} (highest {}, second {})", hash, output.value, height, ns.highest, ns.value
        );
        self.set(hash, ns);
        Ok(())
    }

    fn apply_redeem(
        &mut self,
        params: &NetworkParams,
        height: u64,
        spent: Option<(OutPoint, &Coin)>,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        let ns = self.state_required(&hash)?;
        if !ns.status(height, params).is_closed() {
            return Err(NameRuleError::WrongState("auction must be closed to redeem").into());
        }
        let (prevout, reveal) = spent.ok_or(NameRuleError::WrongInput { expected: "REVEAL" })?;
        if reveal.covenant.covenant_type() != CovenantType::Reveal || reveal.covenant.name_hash()? != hash {
            return Err(NameRuleError::WrongInput { expected: "REVEAL" }.into());
        }
        if prevout == ns.owner {
            return Err(NameRuleError::OwnerMustRegister.into());
        }
        // Refund of a losing bid; the state record is untouched
        Ok(())
    }

    fn apply_register(
        &mut self,
        params: &NetworkParams,
        height: u64,
        outpoint: OutPoint,
        output: &TxOutput,
        spent: Option<(OutPoint, &Coin)>,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        let ns = self.state_required(&hash)?;
        let (prevout, _) = spent.ok_or(NameRuleError::WrongInput { expected: "REVEAL" })?;
        if prevout != ns.owner {
            return Err(NameRuleError::NotOwner.into());
        }
        if ns.status(height, params) != NameStatus::Closed {
            return Err(NameRuleError::WrongState("must be CLOSED to register").into());
        }
        if output.value != ns.value {
            return Err(NameRuleError::BadRegisterValue.into());
        }
        let data = output.covenant.data()?.to_vec();
        self.record_prior(hash);
        let mut ns = self.state(&hash).expect("checked above").clone();
        ns.registered = true;
        ns.data = data;
        ns.renewal = height;
        ns.owner = outpoint;
        debug!(target: LOG_TARGET, "REGISTER {} at height {}", hash, height);
        self.set(hash, ns);
        Ok(())
    }

    fn apply_update(
        &mut self,
        params: &NetworkParams,
        height: u64,
        outpoint: OutPoint,
        output: &TxOutput,
        spent: Option<(OutPoint, &Coin)>,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        self.check_owner_action(params, height, spent, &hash)?;
        let data = output.covenant.data()?.to_vec();
        self.record_prior(hash);
        let mut ns = self.state(&hash).expect("owner action checked").clone();
        ns.data = data;
        // An update also cancels a pending transfer
        ns.transfer = 0;
        ns.owner = outpoint;
        self.set(hash, ns);
        Ok(())
    }

    fn apply_renew(
        &mut self,
        params: &NetworkParams,
        height: u64,
        outpoint: OutPoint,
        spent: Option<(OutPoint, &Coin)>,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        self.check_owner_action(params, height, spent, &hash)?;
        self.record_prior(hash);
        let mut ns = self.state(&hash).expect("owner action checked").clone();
        ns.renewal = height;
        ns.renewals += 1;
        ns.owner = outpoint;
        self.set(hash, ns);
        Ok(())
    }

    fn apply_transfer(
        &mut self,
        params: &NetworkParams,
        height: u64,
        outpoint: OutPoint,
        spent: Option<(OutPoint, &Coin)>,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        self.check_owner_action(params, height, spent, &hash)?;
        let ns = self.state(&hash).expect("owner action checked");
        if ns.transfer != 0 {
            return Err(NameRuleError::WrongState("a transfer is already pending").into());
        }
        self.record_prior(hash);
        let mut ns = self.state(&hash).expect("owner action checked").clone();
        ns.transfer = height;
        ns.owner = outpoint;
        self.set(hash, ns);
        Ok(())
    }

    fn apply_finalize(
        &mut self,
        params: &NetworkParams,
        height: u64,
        outpoint: OutPoint,
        spent: Option<(OutPoint, &Coin)>,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        let ns = self.state_required(&hash)?;
        let (prevout, _) = spent.ok_or(NameRuleError::WrongInput { expected: "TRANSFER" })?;
        if prevout != ns.owner {
            return Err(NameRuleError::NotOwner.into());
        }
        if ns.transfer == 0 {
            return Err(NameRuleError::NoActiveTransfer.into());
        }
        if height < ns.transfer + params.transfer_lockup {
            return Err(NameRuleError::TransferLockup.into());
        }
        self.record_prior(hash);
        let mut ns = self.state(&hash).expect("checked above").clone();
        ns.transfer = 0;
        ns.renewals += 1;
        ns.renewal = height;
        ns.owner = outpoint;
        debug!(target: LOG_TARGET, "FINALIZE {} at height {}", hash, height);
        self.set(hash, ns);
        Ok(())
    }

    fn apply_revoke(
        &mut self,
        params: &NetworkParams,
        height: u64,
        spent: Option<(OutPoint, &Coin)>,
        hash: NameHash,
    ) -> Result<(), ValidationError> {
        let ns = self.state_required(&hash)?;
        let (prevout, _) = spent.ok_or(NameRuleError::WrongInput { expected: "owner output" })?;
        if prevout != ns.owner {
            return Err(NameRuleError::NotOwner.into());
        }
        let status = ns.status(height, params);
        if !matches!(status, NameStatus::Closed | NameStatus::Registered) {
            return Err(NameRuleError::WrongState("nothing to revoke").into());
        }
        self.record_prior(hash);
        let mut ns = self.state(&hash).expect("checked above").clone();
        ns.revoked = height;
        ns.transfer = 0;
        ns.data = Vec::new();
        warn!(target: LOG_TARGET, "REVOKE {} at height {}", hash, height);
        self.set(hash, ns);
        Ok(())
    }

    /// Common checks for UPDATE/RENEW/TRANSFER: state exists, the spending input is the
    /// current owner output, and the name is registered and current.
    fn check_owner_action(
        &self,
        params: &NetworkParams,
        height: u64,
        spent: Option<(OutPoint, &Coin)>,
        hash: &NameHash,
    ) -> Result<(), ValidationError> {
        let ns = self.state_required(hash)?;
        let (prevout, _) = spent.ok_or(NameRuleError::WrongInput { expected: "owner output" })?;
        if prevout != ns.owner {
            return Err(NameRuleError::NotOwner.into());
        }
        match ns.status(height, params) {
            NameStatus::Registered => Ok(()),
            NameStatus::Expired => Err(NameRuleError::OutsideRenewalWindow.into()),
            _ => Err(NameRuleError::WrongState("name is not registered").into()),
        }
    }
}
