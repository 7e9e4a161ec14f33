//! Inclusion of transactions and receipts in the tries of a block. Their
//! keys are RLP encoded indexes, of variable length, and the leaf is only
//! known by its hash.
use anyhow::Result;
use log::debug;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::{target::Target, witness::PartialWitness},
    plonk::circuit_builder::CircuitBuilder,
};
use serde::{Deserialize, Serialize};

use super::{
    bytes_to_limbs, limbs_to_nibbles, nibbles_to_limbs, BlockHeader, BlockHeaderWires,
    HASH_LIMBS, TX_MAX_KEY_LEN,
};
use crate::{
    mpt::{NoBranchTermination, NoBranchTerminationWires, ProofPath},
    utils::IntTargetWriter,
};

/// Proves that a transaction, or a receipt, of known hash sits in the trie
/// of a block. The root and the leaf hash are public u32 limbs; the key, the
/// RLP encoded index, is public as nibbles along with its length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInclusion {
    inclusion: NoBranchTermination,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionInclusionWires {
    pub inclusion: NoBranchTerminationWires,
    pub root: Vec<Target>,
    pub leaf_hash: Vec<Target>,
}

/// Ties 32 byte values given as limbs to their nibbles.
fn connect_limbs<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    limbs: &[Target],
    nibbles: &[Target],
) {
    let recomposed = limbs_to_nibbles(b, limbs);
    recomposed
        .iter()
        .zip(nibbles.iter())
        .for_each(|(r, n)| b.connect(*r, *n));
}

/// Checks the inclusion and exposes the leaf hash as limbs.
fn build_inclusion<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    inclusion: &NoBranchTermination,
) -> (NoBranchTerminationWires, Vec<Target>) {
    let inclusion = inclusion.build(b);
    let tru = b._true();
    b.connect(inclusion.output, tru.target);
    let leaf_hash = b.add_virtual_targets(HASH_LIMBS);
    connect_limbs(b, &leaf_hash, &inclusion.leaf_hash.to_targets());
    (inclusion, leaf_hash)
}

impl TransactionInclusion {
    pub fn new(max_depth: usize) -> Result<Self> {
        Ok(Self {
            inclusion: NoBranchTermination::new(max_depth, TX_MAX_KEY_LEN)?,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> TransactionInclusionWires {
        let (inclusion, leaf_hash) = build_inclusion(b, &self.inclusion);
        let root = b.add_virtual_targets(HASH_LIMBS);
        connect_limbs(b, &root, &inclusion.path.root.to_targets());

        b.register_public_inputs(&root);
        b.register_public_inputs(&leaf_hash);
        b.register_public_inputs(&inclusion.path.key);
        b.register_public_input(inclusion.key_len);
        TransactionInclusionWires {
            inclusion,
            root,
            leaf_hash,
        }
    }
}

impl TransactionInclusionWires {
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, path: &ProofPath) -> Result<()> {
        pw.set_int_targets(&self.root, &bytes_to_limbs(&path.root()));
        pw.set_int_targets(&self.leaf_hash, &bytes_to_limbs(&path.leaf.hash()));
        self.inclusion.assign(pw, path)
    }
}

/// Trie of a block header a proof is rooted in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockTrie {
    Transactions,
    Receipts,
}

/// Transaction or receipt inclusion in a given block: the header hashes to
/// the public block hash and carries the trie root.
///
/// Public inputs, as limbs: the leaf hash, the block hash, the block number
/// (two limbs) and the timestamp; then the key nibbles and the key length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTransactionInclusion {
    trie: BlockTrie,
    header: BlockHeader,
    inclusion: NoBranchTermination,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockTransactionInclusionWires {
    pub header: BlockHeaderWires,
    pub inclusion: NoBranchTerminationWires,
    pub leaf_hash: Vec<Target>,
    pub block_hash: Vec<Target>,
}

impl BlockTransactionInclusion {
    pub fn new(trie: BlockTrie, max_depth: usize) -> Result<Self> {
        Ok(Self {
            trie,
            header: BlockHeader::new()?,
            inclusion: NoBranchTermination::new(max_depth, TX_MAX_KEY_LEN)?,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> BlockTransactionInclusionWires {
        let (inclusion, leaf_hash) = build_inclusion(b, &self.inclusion);
        let header = self.header.build(b);
        let tru = b._true();
        b.connect(header.output, tru.target);

        let root = match self.trie {
            BlockTrie::Transactions => &header.transactions_root,
            BlockTrie::Receipts => &header.receipts_root,
        };
        inclusion.path.root.enforce_equal(b, root);
        let block_hash = nibbles_to_limbs(b, &header.hash.to_targets());
        debug!(
            "[+] Inclusion in the {:?} trie of a block: {} gates",
            self.trie,
            b.num_gates()
        );

        b.register_public_inputs(&leaf_hash);
        b.register_public_inputs(&block_hash);
        b.register_public_inputs(&header.number);
        b.register_public_input(header.timestamp);
        b.register_public_inputs(&inclusion.path.key);
        b.register_public_input(inclusion.key_len);
        BlockTransactionInclusionWires {
            header,
            inclusion,
            leaf_hash,
            block_hash,
        }
    }
}

impl BlockTransactionInclusionWires {
    pub fn assign<F: RichField>(
        &self,
        pw: &mut PartialWitness<F>,
        header: &[u8],
        path: &ProofPath,
    ) -> Result<()> {
        pw.set_int_targets(&self.leaf_hash, &bytes_to_limbs(&path.leaf.hash()));
        self.header.assign(pw, header)?;
        self.inclusion.assign(pw, path)
    }
}
