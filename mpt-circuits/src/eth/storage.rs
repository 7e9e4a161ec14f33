use anyhow::Result;
use core::array::from_fn as create_array;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::{target::Target, witness::PartialWitness},
    plonk::circuit_builder::CircuitBuilder,
};
use serde::{Deserialize, Serialize};

use super::{nibbles_to_limbs, right_aligned, STORAGE_KEY_LEN, STORAGE_MAX_VALUE_LEN};
use crate::{
    array::Array,
    keccak::HASH_HEX_LEN,
    mpt::{FixedKeyLength, FixedKeyLengthWires, ProofPath},
    rlp::{field_prefix, ParsedField},
    shift::shift_left,
};

/// Proves the value of a storage slot. Leaves hold the RLP encoding of the
/// slot value, a big endian word without its leading zeros.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageProof {
    inclusion: FixedKeyLength,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageProofWires {
    pub inclusion: FixedKeyLengthWires,
    /// Boolean, set when the path proves a well formed value.
    pub output: Target,
    /// The 32 byte word stored in the slot.
    pub slot_value: Array<Target, HASH_HEX_LEN>,
    /// Nibbles of the word without its leading zero bytes.
    pub slot_value_len: Target,
}

impl StorageProof {
    pub fn new(max_depth: usize) -> Result<Self> {
        Ok(Self {
            inclusion: FixedKeyLength::new(max_depth, STORAGE_KEY_LEN, STORAGE_MAX_VALUE_LEN)?,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> StorageProofWires {
        let inclusion = self.inclusion.build(b);
        let value = &inclusion.value;
        let value_len = inclusion.value_len;
        let two = b.two();

        // single bytes below 0x80 are their own encoding
        let prefix = field_prefix(b, value[0], value[1]);
        let not_big = b.not(prefix.is_big);
        let to_payload = b.mul_const_add(-F::TWO, prefix.is_literal.target, two);
        let payload = shift_left(b, value, 0, 2, to_payload);
        let payload_len = b.sub(value_len, to_payload);
        let is_two = b.is_equal(value_len, two);
        let declared_ok = b.is_equal(prefix.prefix_or_total_hex_len, payload_len);
        let length_ok = b.select(prefix.is_literal, is_two.target, declared_ok.target);

        let checks = b.add_many([
            inclusion.output,
            not_big.target,
            prefix.is_valid.target,
            length_ok,
        ]);
        let output = {
            let expected = b.constant(F::from_canonical_usize(4));
            b.is_equal(checks, expected)
        };

        let word = right_aligned(
            b,
            &ParsedField {
                nibbles: payload,
                len: payload_len,
            },
            HASH_HEX_LEN,
        );

        StorageProofWires {
            inclusion,
            output: output.target,
            slot_value: Array::from_array(create_array(|i| word[i])),
            slot_value_len: payload_len,
        }
    }
}

impl StorageProofWires {
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, path: &ProofPath) -> Result<()> {
        self.inclusion.assign(pw, path)
    }
}

/// Storage proof exposing the storage root, the slot key and the slot value
/// as public inputs, eight limbs each. Only valid paths can be proven.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageCircuit {
    proof: StorageProof,
}

impl StorageCircuit {
    pub fn new(max_depth: usize) -> Result<Self> {
        Ok(Self {
            proof: StorageProof::new(max_depth)?,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> StorageProofWires {
        let wires = self.proof.build(b);
        let tru = b._true();
        b.connect(wires.output, tru.target);

        for nibbles in [
            wires.inclusion.path.root.to_targets(),
            wires.inclusion.path.key.clone(),
            wires.slot_value.to_targets(),
        ] {
            let limbs = nibbles_to_limbs(b, &nibbles);
            b.register_public_inputs(&limbs);
        }
        wires
    }
}
