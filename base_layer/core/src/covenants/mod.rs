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

//! Name covenants.
//!
//! A covenant is a typed extension on a transaction output that commits the output to a
//! name-lifecycle action. On the wire and in the store a covenant is `(type, items)` where
//! every item is an opaque byte string; the typed accessors here parse the items each
//! action defines.

use borsh::{BorshDeserialize, BorshSerialize};
use handsel_common_types::types::NameHash;

use crate::validation::ValidationError;

/// The name-lifecycle action a covenant commits its output to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
#[repr(u8)]
#[borsh(use_discriminant = true)]
pub enum CovenantType {
    None = 0,
    Claim = 1,
    Open = 2,
    Bid = 3,
    Reveal = 4,
    Redeem = 5,
    Register = 6,
    Update = 7,
    Renew = 8,
    Transfer = 9,
    Finalize = 10,
    Revoke = 11,
}

impl CovenantType {
    /// Actions that may only be performed by the current name owner.
    pub fn is_owner_action(self) -> bool {
        matches!(
            self,
            CovenantType::Register |
                CovenantType::Update |
                CovenantType::Renew |
                CovenantType::Transfer |
                CovenantType::Finalize |
                CovenantType::Revoke
        )
    }

    /// Actions that carry a name hash in their first item.
    pub fn is_name_action(self) -> bool {
        !matches!(self, CovenantType::None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Covenant {
    covenant_type: CovenantType,
    items: Vec<Vec<u8>>,
}

impl Covenant {
    pub fn none() -> Self {
        Self {
            covenant_type: CovenantType::None,
            items: Vec::new(),
        }
    }

    pub fn claim(name_hash: NameHash, height: u64, name: &[u8], weak: bool) -> Self {
        Self {
            covenant_type: CovenantType::Claim,
            items: vec![
                name_hash.to_vec(),
                height.to_le_bytes().to_vec(),
                name.to_vec(),
                vec![u8::from(weak)],
            ],
        }
    }

    pub fn open(name_hash: NameHash, height: u64, name: &[u8]) -> Self {
        Self {
            covenant_type: CovenantType::Open,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec(), name.to_vec()],
        }
    }

    pub fn bid(name_hash: NameHash, height: u64, name: &[u8], blind: NameHash) -> Self {
        Self {
            covenant_type: CovenantType::Bid,
            items: vec![
                name_hash.to_vec(),
                height.to_le_bytes().to_vec(),
                name.to_vec(),
                blind.to_vec(),
            ],
        }
    }

    pub fn reveal(name_hash: NameHash, height: u64, nonce: [u8; 32]) -> Self {
        Self {
            covenant_type: CovenantType::Reveal,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec(), nonce.to_vec()],
        }
    }

    pub fn redeem(name_hash: NameHash, height: u64) -> Self {
        Self {
            covenant_type: CovenantType::Redeem,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec()],
        }
    }

    pub fn register(name_hash: NameHash, height: u64, data: &[u8]) -> Self {
        Self {
            covenant_type: CovenantType::Register,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec(), data.to_vec()],
        }
    }

    pub fn update(name_hash: NameHash, height: u64, data: &[u8]) -> Self {
        Self {
            covenant_type: CovenantType::Update,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec(), data.to_vec()],
        }
    }

    pub fn renew(name_hash: NameHash, height: u64) -> Self {
        Self {
            covenant_type: CovenantType::Renew,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec()],
        }
    }

    pub fn transfer(name_hash: NameHash, height: u64, destination: &[u8]) -> Self {
        Self {
            covenant_type: CovenantType::Transfer,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec(), destination.to_vec()],
        }
    }

    pub fn finalize(name_hash: NameHash, height: u64, name: &[u8]) -> Self {
        Self {
            covenant_type: CovenantType::Finalize,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec(), name.to_vec()],
        }
    }

    pub fn revoke(name_hash: NameHash, height: u64) -> Self {
        Self {
            covenant_type: CovenantType::Revoke,
            items: vec![name_hash.to_vec(), height.to_le_bytes().to_vec()],
        }
    }

    pub fn covenant_type(&self) -> CovenantType {
        self.covenant_type
    }

    pub fn items(&self) -> &[Vec<u8>] {
        &self.items
    }

    pub fn is_none(&self) -> bool {
        self.covenant_type == CovenantType::None
    }

    pub fn is_name_covenant(&self) -> bool {
        self.covenant_type.is_name_action()
    }

    /// Outputs carrying these covenants lock their value until the action resolves.
    pub fn is_locking(&self) -> bool {
        matches!(
            self.covenant_type,
            CovenantType::Claim | CovenantType::Bid | CovenantType::Reveal | CovenantType::Register
        )
    }

    pub fn name_hash(&self) -> Result<NameHash, ValidationError> {
        let item = self.item(0)?;
        NameHash::try_from(item).map_err(|_| ValidationError::MalformedCovenant("bad name hash item"))
    }

    /// The auction start height the action refers to.
    pub fn covenant_height(&self) -> Result<u64, ValidationError> {
        let item = self.item(1)?;
        let raw: [u8; 8] = item
            .try_into()
            .map_err(|_| ValidationError::MalformedCovenant("bad height item"))?;
        Ok(u64::from_le_bytes(raw))
    }

    pub fn name(&self) -> Result<&[u8], ValidationError> {
        match self.covenant_type {
            CovenantType::Claim | CovenantType::Open | CovenantType::Bid | CovenantType::Finalize => self.item(2),
            _ => Err(ValidationError::MalformedCovenant("covenant carries no name")),
        }
    }

    pub fn blind(&self) -> Result<NameHash, ValidationError> {
        if self.covenant_type != CovenantType::Bid {
            return Err(ValidationError::MalformedCovenant("covenant carries no blind"));
        }
        NameHash::try_from(self.item(3)?).map_err(|_| ValidationError::MalformedCovenant("bad blind item"))
    }

    pub fn nonce(&self) -> Result<[u8; 32], ValidationError> {
        if self.covenant_type != CovenantType::Reveal {
            return Err(ValidationError::MalformedCovenant("covenant carries no nonce"));
        }
        self.item(2)?
            .try_into()
            .map_err(|_| ValidationError::MalformedCovenant("bad nonce item"))
    }

    pub fn data(&self) -> Result<&[u8], ValidationError> {
        match self.covenant_type {
            CovenantType::Register | CovenantType::Update => self.item(2),
            _ => Err(ValidationError::MalformedCovenant("covenant carries no resource data")),
        }
    }

    pub fn weak(&self) -> Result<bool, ValidationError> {
        if self.covenant_type != CovenantType::Claim {
            return Err(ValidationError::MalformedCovenant("covenant carries no claim flags"));
        }
        Ok(self.item(3)?.first().copied().unwrap_or(0) != 0)
    }

    fn item(&self, index: usize) -> Result<&[u8], ValidationError> {
        self.items
            .get(index)
            .map(|i| i.as_slice())
            .ok_or(ValidationError::MalformedCovenant("missing covenant item"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::name_state::name_hash;

    #[test]
    fn typed_accessors_parse_their_items() {
        let hash = name_hash(b"dollarydoo");
        let cov = Covenant::bid(hash, 101, b"dollarydoo", NameHash::from([7u8; 32]));
        assert_eq!(cov.covenant_type(), CovenantType::Bid);
        assert_eq!(cov.name_hash().unwrap(), hash);
        assert_eq!(cov.covenant_height().unwrap(), 101);
        assert_eq!(cov.name().unwrap(), b"dollarydoo");
        assert_eq!(cov.blind().unwrap(), NameHash::from([7u8; 32]));
        assert!(cov.nonce().is_err());
    }

    #[test]
    fn locking_covers_auction_value_holders() {
        let hash = NameHash::from([1u8; 32]);
        assert!(Covenant::bid(hash, 1, b"x", NameHash::zero()).is_locking());
        assert!(Covenant::reveal(hash, 1, [0u8; 32]).is_locking());
        assert!(Covenant::register(hash, 1, b"").is_locking());
        assert!(!Covenant::update(hash, 1, b"").is_locking());
        assert!(!Covenant::none().is_locking());
    }

    #[test]
    fn encoding_round_trips() {
        let cov = Covenant::open(NameHash::from([3u8; 32]), 42, b"example");
        let bytes = borsh::to_vec(&cov).unwrap();
        assert_eq!(Covenant::try_from_slice(&bytes).unwrap(), cov);
    }
}
