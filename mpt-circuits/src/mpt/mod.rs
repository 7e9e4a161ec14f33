//! Merkle Patricia Trie inclusion proofs over nibble buffers.
//!
//! Every node type has its own check, each returning a sum of boolean
//! signals that equals a known constant when the node is valid. The
//! [`inclusion`] module walks a path of fixed maximum depth, running both the
//! branch and the extension check at every level and keeping the one matching
//! the declared node type.
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::Target,
    plonk::circuit_builder::CircuitBuilder,
};
use serde::{Deserialize, Serialize};

use crate::{
    array::prefix_equal,
    keccak::{HASH_HEX_LEN, KECCAK_BLOCK_HEX_LEN},
    rlp::ParsedField,
    shift::shift_left,
    utils::equal_const,
};

mod branch;
mod extension;
mod inclusion;
mod leaf;
pub mod witness;

pub use branch::BranchCheck;
pub use extension::ExtensionCheck;
pub use inclusion::{
    FixedKeyLength, FixedKeyLengthWires, InclusionConfig, LeafWires, NoBranchTermination,
    NoBranchTerminationWires, ProofPathWires,
};
pub use leaf::{LeafCheck, LeafCheckResult};
pub use witness::{LeafLevel, ProofPath, TrieLevel};

/// Deepest path the aggregator accepts.
pub const MAX_DEPTH_LIMIT: usize = 10;
/// Children are always referenced by their hash.
pub const NODE_REF_HEX_LEN: usize = HASH_HEX_LEN;
/// 17 items: 16 hashes of 33 bytes, the empty value and a 3 byte list prefix.
pub const BRANCH_NODE_MAX_HEX_LEN: usize = 1064;
pub const BRANCH_NODE_ARRAY_PREFIX_HEX_LEN: usize = 8;
pub const BRANCH_NODE_FIELDS: usize = 17;
/// Number of keccak blocks a branch node can span.
pub const BRANCH_NODE_MAX_ROUND_SIZE: usize = 4;
/// Size of the padded buffer holding any intermediate node.
pub const BRANCH_NODE_MAX_BLOCK_SIZE: usize = BRANCH_NODE_MAX_ROUND_SIZE * KECCAK_BLOCK_HEX_LEN;

/// Kind of an intermediate node, as assigned to the node type wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Branch = 0,
    Extension = 1,
}

/// Outcome of a node check. `output` is the sum of the check's boolean
/// signals, each check documents the value it reaches on a valid node.
#[derive(Clone, Debug)]
pub struct CheckResult {
    pub output: Target,
    pub rlp_total_len: Target,
}

/// Checks the hex prefix flag at the front of an encoded path: a single `odd`
/// nibble when `path_prefix_len` is 1, `even` then 0 when it is 2.
pub(crate) fn path_prefix_check<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    path: &ParsedField,
    path_prefix_len: Target,
    odd: usize,
    even: usize,
) -> Target {
    let odd_len = equal_const(b, path_prefix_len, 1);
    let odd_flag = equal_const(b, path.nibbles[0], odd);
    let odd_ok = b.and(odd_len, odd_flag);

    let even_len = equal_const(b, path_prefix_len, 2);
    let even_flag = equal_const(b, path.nibbles[0], even);
    let even_pad = equal_const(b, path.nibbles[1], 0);
    let even_ok = b.and(even_len, even_flag);
    let even_ok = b.and(even_ok, even_pad);

    b.add(odd_ok.target, even_ok.target)
}

/// Strips the hex prefix from an encoded path and compares what remains to
/// the expected key fragment, content and length. Returns a boolean target.
pub(crate) fn path_check<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    path: &ParsedField,
    path_prefix_len: Target,
    expected: &[Target],
    expected_len: Target,
) -> Target {
    let from_rlp = shift_left(b, &path.nibbles, 0, 2, path_prefix_len);
    let fragment_len = b.sub(path.len, path_prefix_len);
    let matched = prefix_equal(b, expected, &from_rlp, expected.len(), fragment_len);
    let same_len = b.is_equal(expected_len, fragment_len);
    b.and(matched, same_len).target
}
