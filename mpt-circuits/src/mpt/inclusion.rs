//! Inclusion of a key in a trie along a path of variable depth.
//!
//! The circuit always walks `max_depth - 1` intermediate levels plus the
//! leaf. Levels below the actual depth are zero buffers: every check stays
//! satisfiable on them and their outputs are never selected, the aggregated
//! sums being read at index `depth - 1`.
use anyhow::{ensure, Result};
use core::array::from_fn as create_array;
use log::debug;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::{
        target::{BoolTarget, Target},
        witness::{PartialWitness, WitnessWrite},
    },
    plonk::circuit_builder::CircuitBuilder,
};
use serde::{Deserialize, Serialize};

use super::{
    witness::{LeafLevel, ProofPath},
    BranchCheck, ExtensionCheck, LeafCheck, NodeType, BRANCH_NODE_MAX_BLOCK_SIZE,
    BRANCH_NODE_MAX_HEX_LEN, MAX_DEPTH_LIMIT,
};
use crate::{
    array::{new_nibble_vector, Array},
    keccak::{hash_nibbles, padded_nibbles, NibbleHash, HASH_HEX_LEN, KECCAK_BLOCK_HEX_LEN},
    mux::select_at,
    shift::sub_array,
    utils::{blend, bytes_to_nibbles, equal_const, less_than, less_than_or_equal_to, log_ceil},
};

/// Dimensions shared by both kinds of inclusion circuits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InclusionConfig {
    pub max_depth: usize,
    pub max_key_len: usize,
    extension: ExtensionCheck,
    branch: BranchCheck,
}

/// Wires of the path above the leaf.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofPathWires {
    pub root: Array<Target, HASH_HEX_LEN>,
    /// Key nibbles, left aligned.
    pub key: Vec<Target>,
    /// One per level, leaf included.
    pub key_fragment_starts: Vec<Target>,
    pub node_rlp: Vec<Vec<Target>>,
    pub node_round_indexes: Vec<Target>,
    pub node_path_prefix_lens: Vec<Target>,
    /// Boolean wires set for extension nodes.
    pub node_types: Vec<Target>,
    pub depth: Target,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeafWires {
    pub rlp: Vec<Target>,
    pub round_index: Target,
    pub path_prefix_len: Target,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixedKeyLengthWires {
    pub path: ProofPathWires,
    pub leaf: LeafWires,
    /// Leaf value, left aligned.
    pub value: Vec<Target>,
    /// Boolean, set when the path proves the value.
    pub output: Target,
    pub value_len: Target,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoBranchTerminationWires {
    /// Key nibbles past `key_len` are constrained to zero.
    pub path: ProofPathWires,
    pub key_len: Target,
    pub leaf_hash: Array<Target, HASH_HEX_LEN>,
    /// Boolean, set when the path leads to the leaf hash.
    pub output: Target,
}

/// Proves a key of fixed length and its value, the leaf being fully checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedKeyLength {
    pub config: InclusionConfig,
    leaf: LeafCheck,
}

/// Proves that a leaf of known hash sits at a key of variable length, as
/// done for transactions and receipts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoBranchTermination {
    pub config: InclusionConfig,
}

/// Value the checks of a valid leaf add up to.
const LEAF_OUTPUT: usize = 4;

impl InclusionConfig {
    pub fn new(max_depth: usize, max_key_len: usize) -> Result<Self> {
        ensure!(
            (1..=MAX_DEPTH_LIMIT).contains(&max_depth),
            "max depth must be within [1, {}], got {}",
            MAX_DEPTH_LIMIT,
            max_depth
        );
        ensure!(
            (2..=HASH_HEX_LEN).contains(&max_key_len),
            "key length must be within [2, {}] nibbles, got {}",
            HASH_HEX_LEN,
            max_key_len
        );
        Ok(Self {
            max_depth,
            max_key_len,
            extension: ExtensionCheck::new(max_key_len)?,
            branch: BranchCheck::new()?,
        })
    }

    /// Comparisons are done over this many bits: key offsets and depths fit.
    fn comparison_bits(&self) -> usize {
        log_ceil(self.max_key_len.max(self.max_depth)) + 1
    }

    fn new_path_wires<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> ProofPathWires {
        let levels = self.max_depth - 1;
        ProofPathWires {
            root: Array::new_nibbles(b),
            key: new_nibble_vector(b, self.max_key_len),
            key_fragment_starts: b.add_virtual_targets(self.max_depth),
            node_rlp: (0..levels)
                .map(|_| new_nibble_vector(b, BRANCH_NODE_MAX_BLOCK_SIZE))
                .collect(),
            node_round_indexes: b.add_virtual_targets(levels),
            node_path_prefix_lens: b.add_virtual_targets(levels),
            node_types: (0..levels)
                .map(|_| b.add_virtual_bool_target_safe().target)
                .collect(),
            depth: b.add_virtual_target(),
        }
    }

    /// Checks the path down to a leaf whose hash is `leaf_hash` and whose own
    /// checks add up to `leaf_output`.
    fn check_path<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        w: &ProofPathWires,
        key_len: Target,
        leaf_hash: &NibbleHash,
        leaf_output: Target,
    ) -> BoolTarget {
        let n = self.max_depth;
        let bits = self.comparison_bits();
        let one = b.one();
        let two = b.two();
        let zero = b.zero();
        let depth_minus_one = b.sub(w.depth, one);

        // the root consumes no key nibble
        b.connect(w.key_fragment_starts[0], zero);

        let depth_equal = (0..n)
            .map(|i| equal_const(b, w.depth, i + 1))
            .collect::<Vec<_>>();
        let depth_less_than = (0..n)
            .map(|i| {
                let i_target = b.constant(F::from_canonical_usize(i));
                less_than(b, i_target, w.depth, bits)
            })
            .collect::<Vec<_>>();
        let node_types = w
            .node_types
            .iter()
            .map(|t| BoolTarget::new_unsafe(*t))
            .collect::<Vec<_>>();

        let starts = &w.key_fragment_starts;
        // the leaf may have an empty path, the nodes above always consume a nibble
        let start_in_range = (0..n)
            .map(|i| {
                let strict = less_than(b, starts[i], key_len, bits);
                let loose = less_than_or_equal_to(b, starts[i], key_len, bits);
                b.select(depth_equal[i], loose.target, strict.target)
            })
            .collect::<Vec<_>>();
        let mut tally = Vec::with_capacity(n);
        let mut running = zero;
        for i in 0..n - 1 {
            let below_leaf = b.not(depth_less_than[i + 1]);
            let next = b.add(starts[i], one);
            let single = b.is_equal(next, starts[i + 1]);
            let valid_step = b.or(single, node_types[i]);
            let valid_step = b.or(valid_step, below_leaf);
            let increasing = less_than(b, starts[i], starts[i + 1], bits);
            let increasing = b.or(increasing, below_leaf);
            running = b.add_many([running, valid_step.target, increasing.target, start_in_range[i]]);
            tally.push(running);
        }
        running = b.add_many([running, two, start_in_range[n - 1]]);
        tally.push(running);
        let tally = select_at(b, depth_minus_one, &tally);
        let expected_tally = b.mul_const(F::from_canonical_usize(3), w.depth);
        let fragments_valid = b.is_equal(tally, expected_tally);

        // deepest level first, each one needs the hash of its child
        let mut node_hashes: Vec<NibbleHash> = Vec::with_capacity(n - 1);
        let mut node_outputs = Vec::with_capacity(n - 1);
        for layer in (0..n - 1).rev() {
            let is_leaf_child = depth_equal[layer + 1];
            let (node_ref, node_ref_len) = match node_hashes.last() {
                None => (
                    leaf_hash
                        .output
                        .arr
                        .iter()
                        .map(|x| b.mul(is_leaf_child.target, *x))
                        .collect::<Vec<_>>(),
                    b.mul(is_leaf_child.target, leaf_hash.len),
                ),
                Some(child) => (
                    (0..HASH_HEX_LEN)
                        .map(|i| {
                            blend(
                                b,
                                is_leaf_child.target,
                                leaf_hash.output[i],
                                child.output[i],
                            )
                        })
                        .collect(),
                    blend(b, is_leaf_child.target, leaf_hash.len, child.len),
                ),
            };

            let node_type = node_types[layer];
            let rlp = &w.node_rlp[layer];
            let extension_rlp = rlp[..BRANCH_NODE_MAX_HEX_LEN]
                .iter()
                .map(|x| b.mul(node_type.target, *x))
                .collect::<Vec<_>>();
            let branch_rlp = rlp[..BRANCH_NODE_MAX_HEX_LEN]
                .iter()
                .zip(extension_rlp.iter())
                .map(|(x, masked)| b.sub(*x, *masked))
                .collect::<Vec<_>>();

            let (fragment, fragment_len) = sub_array(
                b,
                &w.key,
                starts[layer],
                starts[layer + 1],
                self.max_key_len,
            );
            let extension = self.extension.check(
                b,
                &fragment,
                fragment_len,
                &node_ref,
                node_ref_len,
                &extension_rlp,
                w.node_path_prefix_lens[layer],
            );

            // the key may be fully consumed past the leaf
            let nibble_index = b.mul(depth_less_than[layer + 1].target, starts[layer]);
            let nibble = select_at(b, nibble_index, &w.key);
            let branch = self
                .branch
                .check(b, nibble, &node_ref, node_ref_len, &branch_rlp);

            let hash_len = blend(
                b,
                node_type.target,
                extension.rlp_total_len,
                branch.rlp_total_len,
            );
            node_hashes.push(hash_nibbles(b, rlp, hash_len, w.node_round_indexes[layer]));
            node_outputs.push(blend(b, node_type.target, extension.output, branch.output));
        }
        node_hashes.reverse();
        node_outputs.reverse();

        let root = match node_hashes.first() {
            None => leaf_hash.output.clone(),
            Some(top) => Array::from_array(create_array(|i| {
                blend(b, depth_equal[0].target, leaf_hash.output[i], top.output[i])
            })),
        };
        let root_ok = w.root.equals(b, &root);

        let mut checks = Vec::with_capacity(n);
        let mut running = b.add_many([root_ok.target, leaf_output, fragments_valid.target]);
        checks.push(running);
        for output in node_outputs {
            running = b.add(running, output);
            checks.push(running);
        }
        let all_checks = select_at(b, depth_minus_one, &checks);
        let expected = b.mul_const_add(F::from_canonical_usize(LEAF_OUTPUT), w.depth, two);
        b.is_equal(all_checks, expected)
    }
}

impl FixedKeyLength {
    pub fn new(max_depth: usize, key_len: usize, max_value_len: usize) -> Result<Self> {
        Ok(Self {
            config: InclusionConfig::new(max_depth, key_len)?,
            leaf: LeafCheck::new(key_len, max_value_len)?,
        })
    }

    pub fn max_value_len(&self) -> usize {
        self.leaf.max_value_len
    }

    /// The leaf buffer holds every possible leaf once padded.
    pub fn leaf_buffer_len(&self) -> usize {
        (self.leaf.rlp_hex_len() / KECCAK_BLOCK_HEX_LEN + 1) * KECCAK_BLOCK_HEX_LEN
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> FixedKeyLengthWires {
        let key_len = self.config.max_key_len;
        debug!(
            "[+] Fixed key length inclusion: max depth {}, key {} nibbles, value {} nibbles",
            self.config.max_depth,
            key_len,
            self.max_value_len()
        );
        let path = self.config.new_path_wires(b);
        let leaf = LeafWires {
            rlp: new_nibble_vector(b, self.leaf_buffer_len()),
            round_index: b.add_virtual_target(),
            path_prefix_len: b.add_virtual_target(),
        };
        let value = new_nibble_vector(b, self.max_value_len());

        let full_key = b.constant(F::from_canonical_usize(key_len));
        let depth_minus_one = {
            let one = b.one();
            b.sub(path.depth, one)
        };
        let leaf_start = select_at(b, depth_minus_one, &path.key_fragment_starts);
        let (remaining, remaining_len) = sub_array(b, &path.key, leaf_start, full_key, key_len);
        let leaf_check = self.leaf.check(
            b,
            &remaining,
            remaining_len,
            &value,
            &leaf.rlp,
            leaf.path_prefix_len,
        );
        let leaf_hash = hash_nibbles(
            b,
            &leaf.rlp,
            leaf_check.result.rlp_total_len,
            leaf.round_index,
        );
        let output =
            self.config
                .check_path(b, &path, full_key, &leaf_hash, leaf_check.result.output);
        debug!("[+] Inclusion circuit: {} gates so far", b.num_gates());

        FixedKeyLengthWires {
            path,
            leaf,
            value,
            output: output.target,
            value_len: leaf_check.value_len,
        }
    }
}

impl NoBranchTermination {
    pub fn new(max_depth: usize, max_key_len: usize) -> Result<Self> {
        Ok(Self {
            config: InclusionConfig::new(max_depth, max_key_len)?,
        })
    }

    pub fn build<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) -> NoBranchTerminationWires {
        debug!(
            "[+] No branch termination inclusion: max depth {}, key up to {} nibbles",
            self.config.max_depth, self.config.max_key_len
        );
        let path = self.config.new_path_wires(b);
        let key_len = b.add_virtual_target();
        let bits = self.config.comparison_bits();
        let tru = b._true();
        let max_key_len = b.constant(F::from_canonical_usize(self.config.max_key_len));
        let fits = less_than_or_equal_to(b, key_len, max_key_len, bits);
        b.connect(fits.target, tru.target);
        // the key is public: nibbles past its length are zero
        for (i, nibble) in path.key.iter().enumerate() {
            let i_target = b.constant(F::from_canonical_usize(i));
            let in_key = less_than(b, i_target, key_len, bits);
            let past_key = b.not(in_key);
            let stray = b.mul(past_key.target, *nibble);
            b.assert_zero(stray);
        }
        let leaf_hash = Array::new_nibbles(b);
        let hash = NibbleHash {
            output: leaf_hash.clone(),
            len: b.constant(F::from_canonical_usize(HASH_HEX_LEN)),
        };
        let leaf_output = b.constant(F::from_canonical_usize(LEAF_OUTPUT));
        let output = self
            .config
            .check_path(b, &path, key_len, &hash, leaf_output);

        NoBranchTerminationWires {
            path,
            key_len,
            leaf_hash,
            output: output.target,
        }
    }
}

impl ProofPathWires {
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, path: &ProofPath) -> Result<()> {
        let max_depth = self.key_fragment_starts.len();
        ensure!(
            path.depth() <= max_depth,
            "proof of depth {} is deeper than the circuit's {}",
            path.depth(),
            max_depth
        );
        ensure!(
            path.key.len() <= self.key.len(),
            "key of {} nibbles is longer than the circuit's {}",
            path.key.len(),
            self.key.len()
        );
        self.root.assign_nibbles(pw, &bytes_to_nibbles(&path.root()))?;

        let mut key = path.key.clone();
        key.resize(self.key.len(), 0);
        for (wire, nibble) in self.key.iter().zip(key) {
            pw.set_target(*wire, F::from_canonical_u8(nibble));
        }
        for (wire, start) in self
            .key_fragment_starts
            .iter()
            .zip(path.key_fragment_starts(max_depth))
        {
            pw.set_target(*wire, F::from_canonical_usize(start));
        }

        for (i, rlp) in self.node_rlp.iter().enumerate() {
            let (nibbles, round_index, path_prefix_len, is_extension) = match path.nodes.get(i) {
                Some(node) => (
                    node.padded_nibbles()?,
                    node.round_index(),
                    node.path_prefix_len,
                    node.node_type == NodeType::Extension,
                ),
                // padding levels parse as empty branches
                None => (vec![0; rlp.len()], 0, 0, false),
            };
            for (wire, nibble) in rlp.iter().zip(nibbles) {
                pw.set_target(*wire, F::from_canonical_u8(nibble));
            }
            pw.set_target(
                self.node_round_indexes[i],
                F::from_canonical_usize(round_index),
            );
            pw.set_target(
                self.node_path_prefix_lens[i],
                F::from_canonical_usize(path_prefix_len),
            );
            pw.set_target(self.node_types[i], F::from_bool(is_extension));
        }
        pw.set_target(self.depth, F::from_canonical_usize(path.depth()));
        Ok(())
    }
}

impl LeafWires {
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, leaf: &LeafLevel) -> Result<()> {
        let nibbles = padded_nibbles(&leaf.rlp, self.rlp.len())?;
        for (wire, nibble) in self.rlp.iter().zip(nibbles) {
            pw.set_target(*wire, F::from_canonical_u8(nibble));
        }
        pw.set_target(self.round_index, F::from_canonical_usize(leaf.round_index()));
        pw.set_target(
            self.path_prefix_len,
            F::from_canonical_usize(leaf.path_prefix_len),
        );
        Ok(())
    }
}

impl FixedKeyLengthWires {
    /// Assigns the path and claims the value found in its leaf.
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, path: &ProofPath) -> Result<()> {
        ensure!(
            path.key.len() == self.path.key.len(),
            "expected a key of {} nibbles, got {}",
            self.path.key.len(),
            path.key.len()
        );
        let mut value = bytes_to_nibbles(&path.leaf.value);
        ensure!(
            value.len() <= self.value.len(),
            "leaf value of {} nibbles doesn't fit in {}",
            value.len(),
            self.value.len()
        );
        value.resize(self.value.len(), 0);
        for (wire, nibble) in self.value.iter().zip(value) {
            pw.set_target(*wire, F::from_canonical_u8(nibble));
        }
        self.leaf.assign(pw, &path.leaf)?;
        self.path.assign(pw, path)
    }
}

impl NoBranchTerminationWires {
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, path: &ProofPath) -> Result<()> {
        pw.set_target(self.key_len, F::from_canonical_usize(path.key.len()));
        self.leaf_hash
            .assign_nibbles(pw, &bytes_to_nibbles(&path.leaf.hash()))?;
        self.path.assign(pw, path)
    }
}
