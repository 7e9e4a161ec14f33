use anyhow::{anyhow, ensure, Result};
use core::array::from_fn as create_array;
use log::debug;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::{
        target::Target,
        witness::{PartialWitness, WitnessWrite},
    },
    plonk::circuit_builder::CircuitBuilder,
};
use serde::{Deserialize, Serialize};

use super::{nibbles_to_limbs, right_aligned, HEADER_MAX_BLOCK_HEX_LEN};
use crate::{
    array::{new_nibble_vector, Array},
    keccak::{hash_nibbles, keccak_round_index, padded_nibbles, HASH_HEX_LEN},
    rlp::ParserSchema,
    utils::IntTargetWriter,
};

/// Fields of a header since Shanghai. Older headers carry a prefix of them.
pub const HEADER_FIELDS: usize = 17;
const HEADER_ARRAY_PREFIX_HEX_LEN: usize = 4;
const HEADER_FIELD_MIN_HEX_LEN: [usize; HEADER_FIELDS] =
    [64, 64, 40, 64, 64, 64, 512, 0, 0, 0, 0, 0, 0, 64, 16, 0, 64];
const HEADER_FIELD_MAX_HEX_LEN: [usize; HEADER_FIELDS] =
    [64, 64, 40, 64, 64, 64, 512, 14, 16, 8, 8, 8, 64, 64, 18, 16, 64];

const STATE_ROOT: usize = 3;
const TRANSACTIONS_ROOT: usize = 4;
const RECEIPTS_ROOT: usize = 5;
const NUMBER: usize = 8;
const TIMESTAMP: usize = 11;

/// Parses a block header and hashes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    schema: ParserSchema,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockHeaderWires {
    /// Padded encoding.
    pub rlp: Vec<Target>,
    pub round_index: Target,
    /// Number of fields the header carries.
    pub fields_num: Target,
    /// Boolean, set when the header is well formed.
    pub output: Target,
    pub hash: Array<Target, HASH_HEX_LEN>,
    pub state_root: Array<Target, HASH_HEX_LEN>,
    pub transactions_root: Array<Target, HASH_HEX_LEN>,
    pub receipts_root: Array<Target, HASH_HEX_LEN>,
    /// Two u32 limbs, most significant first.
    pub number: Vec<Target>,
    /// Nibbles of the encoded number.
    pub number_len: Target,
    pub timestamp: Target,
}

impl BlockHeader {
    pub fn new() -> Result<Self> {
        let schema = ParserSchema::new(
            HEADER_MAX_BLOCK_HEX_LEN,
            HEADER_FIELDS,
            HEADER_ARRAY_PREFIX_HEX_LEN,
            HEADER_FIELD_MIN_HEX_LEN.to_vec(),
            HEADER_FIELD_MAX_HEX_LEN.to_vec(),
        )?;
        Ok(Self { schema })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> BlockHeaderWires {
        let rlp = new_nibble_vector(b, HEADER_MAX_BLOCK_HEX_LEN);
        let round_index = b.add_virtual_target();
        let fields_num = b.add_virtual_target();

        let parsed = self.schema.check_header(b, &rlp, fields_num);
        let hash = hash_nibbles(b, &rlp, parsed.total_hex_len, round_index);
        let fields = &parsed.fields;

        let root = |i: usize| -> Array<Target, HASH_HEX_LEN> {
            Array::from_array(create_array(|j| fields[i].nibbles[j]))
        };
        let number = right_aligned(b, &fields[NUMBER], HEADER_FIELD_MAX_HEX_LEN[NUMBER]);
        let number = nibbles_to_limbs(b, &number);
        let timestamp = right_aligned(b, &fields[TIMESTAMP], HEADER_FIELD_MAX_HEX_LEN[TIMESTAMP]);
        let timestamp = nibbles_to_limbs(b, &timestamp)[0];
        debug!("[+] Block header circuit: {} gates so far", b.num_gates());

        BlockHeaderWires {
            rlp,
            round_index,
            fields_num,
            output: parsed.out.target,
            hash: hash.output,
            state_root: root(STATE_ROOT),
            transactions_root: root(TRANSACTIONS_ROOT),
            receipts_root: root(RECEIPTS_ROOT),
            number,
            number_len: fields[NUMBER].len,
            timestamp,
        }
    }
}

impl BlockHeaderWires {
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, header: &[u8]) -> Result<()> {
        let fields_num = rlp::Rlp::new(header)
            .item_count()
            .map_err(|e| anyhow!("invalid header encoding: {e:?}"))?;
        ensure!(
            fields_num <= HEADER_FIELDS,
            "header with {} fields, at most {} supported",
            fields_num,
            HEADER_FIELDS
        );
        pw.set_int_targets(&self.rlp, &padded_nibbles(header, self.rlp.len())?);
        pw.set_target(
            self.round_index,
            F::from_canonical_usize(keccak_round_index(2 * header.len())),
        );
        pw.set_target(self.fields_num, F::from_canonical_usize(fields_num));
        Ok(())
    }
}
