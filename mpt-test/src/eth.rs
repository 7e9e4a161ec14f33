//! Synthetic Ethereum objects: block headers and account tries.
use eth_trie::{EthTrie, MemoryDB, Trie};
use log::debug;
use rand::{thread_rng, Rng};
use rlp::RlpStream;
use std::sync::Arc;

use crate::utils::random_vector;

const HASH_LEN: usize = 32;
const BLOOM_LEN: usize = 256;

/// Encodes a post-merge header: 17 fields, or 16 when the withdrawals root
/// is left out as before Shanghai. The transactions and receipts roots are
/// random.
pub fn generate_block_header(
    number: u64,
    timestamp: u32,
    state_root: &[u8],
    with_withdrawals: bool,
) -> Vec<u8> {
    let transactions_root = random_vector::<u8>(HASH_LEN);
    let receipts_root = random_vector::<u8>(HASH_LEN);
    generate_block_header_with_roots(
        number,
        timestamp,
        [state_root, transactions_root.as_slice(), receipts_root.as_slice()],
        with_withdrawals,
    )
}

/// Same as [`generate_block_header`] with the state, transactions and
/// receipts roots given in that order.
pub fn generate_block_header_with_roots(
    number: u64,
    timestamp: u32,
    roots: [&[u8]; 3],
    with_withdrawals: bool,
) -> Vec<u8> {
    let mut rng = thread_rng();
    let mut stream = RlpStream::new_list(if with_withdrawals { 17 } else { 16 });
    // parent hash, uncles hash, coinbase
    stream.append(&random_vector::<u8>(HASH_LEN));
    stream.append(&random_vector::<u8>(HASH_LEN));
    stream.append(&random_vector::<u8>(20));
    // state, transactions and receipts roots
    for root in roots.iter() {
        stream.append(&root.to_vec());
    }
    stream.append(&random_vector::<u8>(BLOOM_LEN));
    // difficulty
    stream.append(&0u64);
    stream.append(&number);
    // gas limit, gas used
    stream.append(&rng.gen_range(1u32 << 24..u32::MAX));
    stream.append(&rng.gen_range(1u32 << 24..u32::MAX));
    stream.append(&timestamp);
    // extra data, mix hash, nonce
    stream.append(&random_vector::<u8>(HASH_LEN));
    stream.append(&random_vector::<u8>(HASH_LEN));
    stream.append(&random_vector::<u8>(8));
    // base fee
    stream.append(&rng.gen_range(1u64 << 48..1u64 << 56));
    if with_withdrawals {
        stream.append(&random_vector::<u8>(HASH_LEN));
    }
    stream.out().to_vec()
}

/// Encodes an account: nonce, balance, storage root and code hash.
pub fn encode_account(nonce: u64, balance: &[u8], storage_root: &[u8], code_hash: &[u8]) -> Vec<u8> {
    let mut stream = RlpStream::new_list(4);
    stream.append(&nonce);
    stream.append(&balance.to_vec());
    stream.append(&storage_root.to_vec());
    stream.append(&code_hash.to_vec());
    stream.out().to_vec()
}

/// State trie of a few random accounts plus one whose storage root is
/// `storage_root`, sitting at most `max_depth` nodes below the root.
/// Returns the trie, the account key and its encoding.
pub fn generate_account_mpt(
    storage_root: &[u8],
    max_depth: usize,
) -> (EthTrie<MemoryDB>, Vec<u8>, Vec<u8>) {
    let mut rng = thread_rng();
    loop {
        let memdb = Arc::new(MemoryDB::new(true));
        let mut trie = EthTrie::new(Arc::clone(&memdb));
        for _ in 0..7 {
            let mut balance = random_vector::<u8>(10);
            balance[0] |= 1;
            let account = encode_account(
                rng.gen_range(0..1000),
                &balance,
                &random_vector::<u8>(HASH_LEN),
                &random_vector::<u8>(HASH_LEN),
            );
            trie.insert(&random_vector::<u8>(HASH_LEN), &account)
                .expect("can't insert");
        }
        let key = random_vector::<u8>(HASH_LEN);
        let account = encode_account(
            rng.gen_range(0..1000),
            &[0x0d, 0xe0, 0xb6, 0xb3, 0xa7, 0x64, 0x00, 0x00],
            storage_root,
            &random_vector::<u8>(HASH_LEN),
        );
        trie.insert(&key, &account).expect("can't insert");
        trie.root_hash().expect("root hash problem");
        let depth = trie.get_proof(&key).expect("can't get proof").len();
        if depth <= max_depth {
            debug!("[+] Account trie with the target account at depth {}", depth);
            return (trie, key, account);
        }
    }
}

/// Storage trie holding `words` under random keys, each word being a big
/// endian number without leading zeros. Returns the trie and the keys in
/// the order of the words.
pub fn generate_storage_mpt(words: &[Vec<u8>]) -> (EthTrie<MemoryDB>, Vec<Vec<u8>>) {
    let memdb = Arc::new(MemoryDB::new(true));
    let mut trie = EthTrie::new(Arc::clone(&memdb));
    let keys = words
        .iter()
        .map(|word| {
            let key = random_vector::<u8>(HASH_LEN);
            trie.insert(&key, &rlp::encode(word))
                .expect("can't insert");
            key
        })
        .collect::<Vec<_>>();
    trie.root_hash().expect("root hash problem");
    (trie, keys)
}
