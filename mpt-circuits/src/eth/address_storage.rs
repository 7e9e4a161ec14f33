//! Value of a storage slot of an account at a given block: the header hashes
//! to the block hash, the account sits under its state root and the slot
//! under the account's storage root.
use anyhow::{ensure, Result};
use log::debug;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::{target::Target, witness::PartialWitness},
    plonk::circuit_builder::CircuitBuilder,
};
use serde::{Deserialize, Serialize};

use super::{
    nibbles_to_limbs, AccountProof, AccountProofWires, BlockHeader, BlockHeaderWires,
    StorageProof, StorageProofWires,
};
use crate::{
    array::Array,
    keccak::HASH_HEX_LEN,
    mpt::ProofPath,
    utils::bytes_to_nibbles,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressStorageProof {
    header: BlockHeader,
    account: AccountProof,
    storage: StorageProof,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddressStorageWires {
    pub block_hash: Array<Target, HASH_HEX_LEN>,
    pub header: BlockHeaderWires,
    pub account: AccountProofWires,
    pub storage: StorageProofWires,
    /// Boolean, set when every part of the proof holds.
    pub output: Target,
}

impl AddressStorageProof {
    pub fn new(account_max_depth: usize, storage_max_depth: usize) -> Result<Self> {
        Ok(Self {
            header: BlockHeader::new()?,
            account: AccountProof::new(account_max_depth)?,
            storage: StorageProof::new(storage_max_depth)?,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> AddressStorageWires {
        let block_hash = Array::new_nibbles(b);
        let header = self.header.build(b);
        let account = self.account.build(b);
        let storage = self.storage.build(b);

        // the tries are chained by their roots
        account
            .inclusion
            .path
            .root
            .enforce_equal(b, &header.state_root);
        storage
            .inclusion
            .path
            .root
            .enforce_equal(b, &account.storage_root);

        let same_block = block_hash.equals(b, &header.hash);
        let checks = b.add_many([
            same_block.target,
            header.output,
            account.output,
            storage.output,
        ]);
        let output = {
            let expected = b.constant(F::from_canonical_usize(4));
            b.is_equal(checks, expected)
        };
        debug!("[+] Address storage circuit: {} gates", b.num_gates());

        AddressStorageWires {
            block_hash,
            header,
            account,
            storage,
            output: output.target,
        }
    }
}

impl AddressStorageWires {
    pub fn assign<F: RichField>(
        &self,
        pw: &mut PartialWitness<F>,
        block_hash: &[u8],
        header: &[u8],
        account: &ProofPath,
        storage: &ProofPath,
    ) -> Result<()> {
        ensure!(
            block_hash.len() * 2 == HASH_HEX_LEN,
            "block hash of {} bytes",
            block_hash.len()
        );
        self.block_hash
            .assign_nibbles(pw, &bytes_to_nibbles(block_hash))?;
        self.header.assign(pw, header)?;
        self.account.assign(pw, account)?;
        self.storage.assign(pw, storage)
    }
}

/// Exposes, as limbs, the block hash, the block number (two limbs), the
/// account key, the slot key and the slot value. Only valid proofs can be
/// proven.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressStorageCircuit {
    proof: AddressStorageProof,
}

impl AddressStorageCircuit {
    pub fn new(account_max_depth: usize, storage_max_depth: usize) -> Result<Self> {
        Ok(Self {
            proof: AddressStorageProof::new(account_max_depth, storage_max_depth)?,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> AddressStorageWires {
        let wires = self.proof.build(b);
        let tru = b._true();
        b.connect(wires.output, tru.target);

        let block_hash = nibbles_to_limbs(b, &wires.block_hash.to_targets());
        b.register_public_inputs(&block_hash);
        b.register_public_inputs(&wires.header.number);
        for nibbles in [
            wires.account.inclusion.path.key.clone(),
            wires.storage.inclusion.path.key.clone(),
            wires.storage.slot_value.to_targets(),
        ] {
            let limbs = nibbles_to_limbs(b, &nibbles);
            b.register_public_inputs(&limbs);
        }
        wires
    }
}

#[cfg(test)]
mod test {
    use super::AddressStorageCircuit;
    use crate::{
        eth::bytes_to_limbs,
        mpt::{witness::test::storage_proof, ProofPath},
        utils::keccak256,
        C, D, F,
    };
    use eth_trie::Trie;
    use mpt_test::{
        eth::{generate_account_mpt, generate_block_header},
        log::init_logging,
    };
    use plonky2::{
        field::types::Field,
        iop::witness::PartialWitness,
        plonk::{circuit_builder::CircuitBuilder, circuit_data::CircuitConfig},
    };
    use serial_test::serial;
    use std::panic;

    const ACCOUNT_MAX_DEPTH: usize = 3;
    const STORAGE_MAX_DEPTH: usize = 3;
    const NUMBER: u64 = 19_000_000;

    fn limbs(bytes: &[u8]) -> Vec<F> {
        bytes_to_limbs(bytes)
            .into_iter()
            .map(F::from_canonical_u32)
            .collect()
    }

    #[test]
    #[serial]
    fn test_address_storage() {
        init_logging();
        let mut b = CircuitBuilder::<F, D>::new(CircuitConfig::standard_recursion_config());
        let wires = AddressStorageCircuit::new(ACCOUNT_MAX_DEPTH, STORAGE_MAX_DEPTH)
            .unwrap()
            .build(&mut b);
        let data = b.build::<C>();

        let (proof, slot_key) = storage_proof();
        let storage = ProofPath::from_proof(&proof, &slot_key).unwrap();
        let (mut trie, account_key, _) =
            generate_account_mpt(&storage.root(), ACCOUNT_MAX_DEPTH);
        let state_root = trie.root_hash().unwrap();
        let proof = trie.get_proof(&account_key).unwrap();
        let account = ProofPath::from_proof(&proof, &account_key).unwrap();
        let header = generate_block_header(NUMBER, 1_700_000_000, state_root.as_bytes(), true);
        let block_hash = keccak256(&header);

        let mut pw = PartialWitness::new();
        wires
            .assign(&mut pw, &block_hash, &header, &account, &storage)
            .unwrap();
        let proof = data.prove(pw).unwrap();
        let pi = &proof.public_inputs;
        assert_eq!(pi[..8], limbs(&block_hash));
        assert_eq!(pi[8..10], [F::ZERO, F::from_canonical_u64(NUMBER)]);
        assert_eq!(pi[10..18], limbs(&account_key));
        assert_eq!(pi[18..26], limbs(&slot_key));
        let mut slot_value = vec![0; 12];
        slot_value.extend_from_slice(&storage.leaf.value[1..]);
        assert_eq!(pi[26..34], limbs(&slot_value));
        data.verify(proof).unwrap();

        // another block hash
        let mut other_hash = block_hash;
        other_hash[0] ^= 0x01;
        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let mut pw = PartialWitness::new();
            wires
                .assign(&mut pw, &other_hash, &header, &account, &storage)
                .unwrap();
            data.prove(pw)
        }));
        assert!(!matches!(res, Ok(Ok(_))), "proof accepted for another block");
    }
}
