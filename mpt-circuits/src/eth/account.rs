use anyhow::Result;
use core::array::from_fn as create_array;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::{target::Target, witness::PartialWitness},
    plonk::circuit_builder::CircuitBuilder,
};
use serde::{Deserialize, Serialize};

use super::{nibbles_to_limbs, right_aligned, ACCOUNT_KEY_LEN, ACCOUNT_MAX_VALUE_LEN};
use crate::{
    array::Array,
    keccak::HASH_HEX_LEN,
    mpt::{FixedKeyLength, FixedKeyLengthWires, ProofPath},
    rlp::ParserSchema,
};

const ACCOUNT_FIELDS: usize = 4;
const ACCOUNT_ARRAY_PREFIX_HEX_LEN: usize = 4;
const ACCOUNT_FIELD_MIN_HEX_LEN: [usize; ACCOUNT_FIELDS] = [0, 0, 64, 64];
const ACCOUNT_FIELD_MAX_HEX_LEN: [usize; ACCOUNT_FIELDS] = [64, 24, 64, 64];

const NONCE: usize = 0;
const BALANCE: usize = 1;
const STORAGE_ROOT: usize = 2;
const CODE_HASH: usize = 3;

/// Proves an account of the state trie and decodes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountProof {
    inclusion: FixedKeyLength,
    schema: ParserSchema,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountProofWires {
    pub inclusion: FixedKeyLengthWires,
    /// Boolean, set when the path proves a well formed account.
    pub output: Target,
    /// Right aligned, 64 nibbles.
    pub nonce: Vec<Target>,
    pub nonce_len: Target,
    /// Right aligned, 24 nibbles.
    pub balance: Vec<Target>,
    pub balance_len: Target,
    pub storage_root: Array<Target, HASH_HEX_LEN>,
    pub code_hash: Array<Target, HASH_HEX_LEN>,
}

impl AccountProof {
    pub fn new(max_depth: usize) -> Result<Self> {
        let schema = ParserSchema::new(
            ACCOUNT_MAX_VALUE_LEN,
            ACCOUNT_FIELDS,
            ACCOUNT_ARRAY_PREFIX_HEX_LEN,
            ACCOUNT_FIELD_MIN_HEX_LEN.to_vec(),
            ACCOUNT_FIELD_MAX_HEX_LEN.to_vec(),
        )?;
        Ok(Self {
            inclusion: FixedKeyLength::new(max_depth, ACCOUNT_KEY_LEN, ACCOUNT_MAX_VALUE_LEN)?,
            schema,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> AccountProofWires {
        let inclusion = self.inclusion.build(b);
        let parsed = self.schema.check_array(b, &inclusion.value);
        // the account spans the whole leaf value
        let same_len = b.is_equal(parsed.total_hex_len, inclusion.value_len);
        let checks = b.add_many([inclusion.output, parsed.out.target, same_len.target]);
        let output = {
            let expected = b.constant(F::from_canonical_usize(3));
            b.is_equal(checks, expected)
        };

        let fields = &parsed.fields;
        let hash_field = |i: usize| -> Array<Target, HASH_HEX_LEN> {
            Array::from_array(create_array(|j| fields[i].nibbles[j]))
        };
        let nonce = right_aligned(b, &fields[NONCE], ACCOUNT_FIELD_MAX_HEX_LEN[NONCE]);
        let balance = right_aligned(b, &fields[BALANCE], ACCOUNT_FIELD_MAX_HEX_LEN[BALANCE]);

        AccountProofWires {
            output: output.target,
            nonce,
            nonce_len: fields[NONCE].len,
            balance,
            balance_len: fields[BALANCE].len,
            storage_root: hash_field(STORAGE_ROOT),
            code_hash: hash_field(CODE_HASH),
            inclusion,
        }
    }
}

impl AccountProofWires {
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, path: &ProofPath) -> Result<()> {
        self.inclusion.assign(pw, path)
    }
}

/// Account proof exposing, as limbs, the state root, the account key, the
/// nonce, the balance (three limbs), the storage root and the code hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountCircuit {
    proof: AccountProof,
}

impl AccountCircuit {
    pub fn new(max_depth: usize) -> Result<Self> {
        Ok(Self {
            proof: AccountProof::new(max_depth)?,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> AccountProofWires {
        let wires = self.proof.build(b);
        let tru = b._true();
        b.connect(wires.output, tru.target);

        for nibbles in [
            wires.inclusion.path.root.to_targets(),
            wires.inclusion.path.key.clone(),
            wires.nonce.clone(),
            wires.balance.clone(),
            wires.storage_root.to_targets(),
            wires.code_hash.to_targets(),
        ] {
            let limbs = nibbles_to_limbs(b, &nibbles);
            b.register_public_inputs(&limbs);
        }
        wires
    }
}
