//! Ethereum proofs built on top of the inclusion circuits: block headers,
//! accounts, storage slots, transactions and receipts, and the combinations
//! proving a slot value or a transaction at a given block.
//!
//! 32 byte values cross the circuit boundary as eight u32 limbs, most
//! significant limb first, each limb holding four bytes in big endian order.
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::Target,
    plonk::circuit_builder::CircuitBuilder,
};

use crate::{keccak::KECCAK_BLOCK_HEX_LEN, rlp::ParsedField, shift::shift_right, utils::log_ceil};

mod account;
mod address_storage;
mod header;
mod storage;
mod transaction;

pub use account::{AccountCircuit, AccountProof, AccountProofWires};
pub use address_storage::{AddressStorageCircuit, AddressStorageProof, AddressStorageWires};
pub use header::{BlockHeader, BlockHeaderWires, HEADER_FIELDS};
pub use storage::{StorageCircuit, StorageProof, StorageProofWires};
pub use transaction::{
    BlockTransactionInclusion, BlockTransactionInclusionWires, BlockTrie, TransactionInclusion,
    TransactionInclusionWires,
};

pub const ACCOUNT_KEY_LEN: usize = 64;
pub const ACCOUNT_MPT_MAX_DEPTH: usize = 9;
/// Longest account encoding, in nibbles.
pub const ACCOUNT_MAX_VALUE_LEN: usize = 228;
pub const STORAGE_KEY_LEN: usize = 64;
pub const STORAGE_MPT_MAX_DEPTH: usize = 8;
/// RLP encoding of a 32 byte word, in nibbles.
pub const STORAGE_MAX_VALUE_LEN: usize = 66;
pub const STORAGE_LEAF_MAX_BLOCK_HEX_LEN: usize = KECCAK_BLOCK_HEX_LEN;
pub const HEADER_MAX_BLOCK_HEX_LEN: usize = 5 * KECCAK_BLOCK_HEX_LEN;
/// Transaction and receipt keys are RLP encoded indexes of at most 3 bytes.
pub const TX_MAX_KEY_LEN: usize = 6;

/// Number of limbs of a 32 byte value.
pub const HASH_LIMBS: usize = 8;
const NIBBLES_PER_LIMB: usize = 8;

/// Packs nibbles into big endian u32 limbs, eight nibbles per limb.
pub fn nibbles_to_limbs<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    nibbles: &[Target],
) -> Vec<Target> {
    assert!(nibbles.len() % NIBBLES_PER_LIMB == 0);
    let sixteen = F::from_canonical_u8(16);
    nibbles
        .chunks(NIBBLES_PER_LIMB)
        .map(|chunk| {
            chunk
                .iter()
                .fold(b.zero(), |acc, n| b.mul_const_add(sixteen, acc, *n))
        })
        .collect()
}

/// Expands big endian u32 limbs into nibbles, most significant first. Every
/// limb is range checked to 32 bits by its decomposition.
pub fn limbs_to_nibbles<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    limbs: &[Target],
) -> Vec<Target> {
    let mut nibbles = Vec::with_capacity(limbs.len() * NIBBLES_PER_LIMB);
    for limb in limbs {
        let bits = b.split_le(*limb, 32);
        for nibble_bits in bits.chunks(4).rev() {
            nibbles.push(b.le_sum(nibble_bits.iter()));
        }
    }
    nibbles
}

/// Moves the `field.len` nibbles of a field of at most `max_len` nibbles to
/// the end of a `max_len` buffer, so that it reads as a big endian number.
pub(crate) fn right_aligned<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    field: &ParsedField,
    max_len: usize,
) -> Vec<Target> {
    let max = b.constant(F::from_canonical_usize(max_len));
    let shift = b.sub(max, field.len);
    shift_right(b, &field.nibbles[..max_len], log_ceil(max_len), shift)
}

/// Native counterpart of [`nibbles_to_limbs`] over bytes.
pub fn bytes_to_limbs(bytes: &[u8]) -> Vec<u32> {
    assert!(bytes.len() % 4 == 0);
    bytes
        .chunks(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
