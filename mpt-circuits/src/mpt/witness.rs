//! Native side of the inclusion circuits: turns an Ethereum proof, i.e. the
//! list of RLP encoded nodes from the root down to the leaf, into the values
//! assigned to the path wires.
use anyhow::{anyhow, bail, ensure, Result};
use log::info;
use rlp::Rlp;
use serde::{Deserialize, Serialize};

use super::{NodeType, BRANCH_NODE_FIELDS, BRANCH_NODE_MAX_BLOCK_SIZE};
use crate::{
    keccak::{keccak_round_index, padded_nibbles},
    utils::{bytes_to_nibbles, keccak256},
};

/// Bit of the hex prefix flag set on leaves. The low bit marks odd paths.
const HP_LEAF_FLAG: u8 = 2;

/// An intermediate node of the path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieLevel {
    pub rlp: Vec<u8>,
    pub node_type: NodeType,
    /// Number of nibbles taken by the hex prefix of an extension path, 0 for
    /// branches.
    pub path_prefix_len: usize,
    /// Number of key nibbles consumed above this node.
    pub key_fragment_start: usize,
}

/// The last node of the path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafLevel {
    pub rlp: Vec<u8>,
    pub path_prefix_len: usize,
    pub key_fragment_start: usize,
    /// Second item of the leaf, still RLP encoded for storage slots.
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPath {
    /// Key nibbles.
    pub key: Vec<u8>,
    pub nodes: Vec<TrieLevel>,
    pub leaf: LeafLevel,
}

impl TrieLevel {
    pub fn round_index(&self) -> usize {
        keccak_round_index(2 * self.rlp.len())
    }

    /// Node encoding padded to the size of a node buffer.
    pub fn padded_nibbles(&self) -> Result<Vec<u8>> {
        padded_nibbles(&self.rlp, BRANCH_NODE_MAX_BLOCK_SIZE)
    }
}

impl LeafLevel {
    pub fn round_index(&self) -> usize {
        keccak_round_index(2 * self.rlp.len())
    }

    pub fn hash(&self) -> Vec<u8> {
        keccak256(&self.rlp)
    }
}

fn decode_err(e: rlp::DecoderError) -> anyhow::Error {
    anyhow!("invalid node encoding: {:?}", e)
}

/// Decodes a hex prefix encoded path. Returns the leaf flag, the number of
/// prefix nibbles and the path nibbles.
fn decode_path(encoded: &[u8]) -> Result<(bool, usize, Vec<u8>)> {
    ensure!(!encoded.is_empty(), "empty node path");
    let flag = encoded[0] >> 4;
    ensure!(flag < 4, "invalid hex prefix flag {}", flag);
    let prefix_len = if flag & 1 == 1 { 1 } else { 2 };
    let nibbles = bytes_to_nibbles(encoded)[prefix_len..].to_vec();
    Ok((flag & HP_LEAF_FLAG != 0, prefix_len, nibbles))
}

/// Checks that `child` is a reference by hash to `node`.
fn ensure_child(child: &[u8], node: Option<&Vec<u8>>) -> Result<()> {
    let node = node.ok_or_else(|| anyhow!("proof ends on an intermediate node"))?;
    ensure!(
        child.len() == 32,
        "embedded nodes of {} bytes are not supported",
        child.len()
    );
    ensure!(
        child == keccak256(node).as_slice(),
        "child reference doesn't match the next node"
    );
    Ok(())
}

impl ProofPath {
    /// Walks `proof` along `key`, both given as bytes.
    pub fn from_proof(proof: &[Vec<u8>], key: &[u8]) -> Result<Self> {
        ensure!(!proof.is_empty(), "empty proof");
        let key = bytes_to_nibbles(key);
        let mut position = 0;
        let mut nodes = Vec::with_capacity(proof.len() - 1);

        for (idx, node) in proof.iter().enumerate() {
            let is_last = idx == proof.len() - 1;
            let next = proof.get(idx + 1);
            let rlp = Rlp::new(node);
            let items = rlp.item_count().map_err(decode_err)?;
            match items {
                BRANCH_NODE_FIELDS => {
                    ensure!(!is_last, "proof ends on a branch node");
                    ensure!(position < key.len(), "key consumed before a branch node");
                    let value = rlp.at(BRANCH_NODE_FIELDS - 1).map_err(decode_err)?;
                    ensure!(value.is_empty(), "branch nodes holding a value are not supported");
                    let child = rlp
                        .at(key[position] as usize)
                        .map_err(decode_err)?
                        .data()
                        .map_err(decode_err)?;
                    ensure_child(child, next)?;
                    nodes.push(TrieLevel {
                        rlp: node.clone(),
                        node_type: NodeType::Branch,
                        path_prefix_len: 0,
                        key_fragment_start: position,
                    });
                    position += 1;
                }
                2 => {
                    let encoded = rlp.at(0).map_err(decode_err)?.data().map_err(decode_err)?;
                    let (is_leaf, path_prefix_len, path) = decode_path(encoded)?;
                    let end = position + path.len();
                    ensure!(
                        end <= key.len() && key[position..end] == path[..],
                        "node path diverges from the key at nibble {}",
                        position
                    );
                    let second = rlp.at(1).map_err(decode_err)?.data().map_err(decode_err)?;
                    if is_leaf {
                        ensure!(is_last, "leaf node in the middle of the proof");
                        ensure!(end == key.len(), "leaf doesn't consume the whole key");
                        info!(
                            "[+] Proof path: depth {}, key {} nibbles",
                            proof.len(),
                            key.len()
                        );
                        return Ok(Self {
                            leaf: LeafLevel {
                                rlp: node.clone(),
                                path_prefix_len,
                                key_fragment_start: position,
                                value: second.to_vec(),
                            },
                            key,
                            nodes,
                        });
                    }
                    ensure!(!path.is_empty(), "empty extension path");
                    ensure_child(second, next)?;
                    nodes.push(TrieLevel {
                        rlp: node.clone(),
                        node_type: NodeType::Extension,
                        path_prefix_len,
                        key_fragment_start: position,
                    });
                    position = end;
                }
                n => bail!("node with {} items is neither a branch nor a short node", n),
            }
        }
        bail!("proof doesn't end on a leaf")
    }

    pub fn depth(&self) -> usize {
        self.nodes.len() + 1
    }

    /// Hash of the top node.
    pub fn root(&self) -> Vec<u8> {
        match self.nodes.first() {
            Some(node) => keccak256(&node.rlp),
            None => self.leaf.hash(),
        }
    }

    /// Start of the key fragment of every level, the levels below the leaf
    /// starting at the end of the key.
    pub fn key_fragment_starts(&self, max_depth: usize) -> Vec<usize> {
        let mut starts = self
            .nodes
            .iter()
            .map(|n| n.key_fragment_start)
            .chain(std::iter::once(self.leaf.key_fragment_start))
            .collect::<Vec<_>>();
        starts.resize(max_depth.max(starts.len()), self.key.len());
        starts
    }
}
