//! Tries with a known shape, built with the same node encoding as Ethereum.
use eth_trie::{EthTrie, MemoryDB, Trie};
use log::debug;
use std::sync::Arc;

use crate::utils::random_vector;

/// Number of nibbles of a hashed key.
const KEY_NIBBLE_LEN: usize = 64;

fn new_trie() -> EthTrie<MemoryDB> {
    let memdb = Arc::new(MemoryDB::new(true));
    EthTrie::new(Arc::clone(&memdb))
}

/// Random trie with 32 byte keys and a key whose proof is exactly DEPTH
/// nodes long. Every value is VALUE_LEN random bytes.
pub fn generate_random_storage_mpt<const DEPTH: usize, const VALUE_LEN: usize>(
) -> (EthTrie<MemoryDB>, Vec<u8>) {
    let mut trie = new_trie();
    let mut keys: Vec<Vec<u8>> = Vec::new();
    loop {
        let key = random_vector::<u8>(KEY_NIBBLE_LEN / 2);
        trie.insert(&key, &random_vector::<u8>(VALUE_LEN))
            .expect("can't insert");
        keys.push(key);
        trie.root_hash().expect("root hash problem");
        let found = keys
            .iter()
            .find(|k| trie.get_proof(k).expect("can't get proof").len() == DEPTH);
        if let Some(key) = found {
            debug!(
                "[+] Random trie of {} keys with a proof of depth {}",
                keys.len(),
                DEPTH
            );
            return (trie, key.clone());
        }
    }
}

/// Trie of two keys sharing their first 62 nibbles: the root is an extension
/// over a branch holding two leaves. Returns the first key.
pub fn generate_extension_mpt() -> (EthTrie<MemoryDB>, Vec<u8>) {
    let mut trie = new_trie();
    let mut first = [0xab; KEY_NIBBLE_LEN / 2];
    let mut second = first;
    first[31] = 0x01;
    second[31] = 0x21;
    trie.insert(&first, &random_vector::<u8>(31))
        .expect("can't insert");
    trie.insert(&second, &random_vector::<u8>(31))
        .expect("can't insert");
    trie.root_hash().expect("root hash problem");
    (trie, first.to_vec())
}

/// Trie keyed like the transaction and receipt tries: key `i` is the RLP
/// encoding of `i`, values are 100 random bytes. Returns the trie and its
/// keys in index order.
pub fn generate_tx_like_mpt(n: usize) -> (EthTrie<MemoryDB>, Vec<Vec<u8>>) {
    let mut trie = new_trie();
    let keys = (0..n)
        .map(|i| rlp::encode(&(i as u64)).to_vec())
        .collect::<Vec<_>>();
    for key in keys.iter() {
        trie.insert(key, &random_vector::<u8>(100))
            .expect("can't insert");
    }
    trie.root_hash().expect("root hash problem");
    (trie, keys)
}
