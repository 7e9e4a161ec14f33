//! Plonky2 circuits proving inclusion in Ethereum Merkle Patricia Tries.
//!
//! Everything works over nibble buffers of fixed capacity: RLP items are
//! decoded with barrel shifters, nodes are hashed with keccak over padded
//! buffers and paths of variable depth are checked against the maximum
//! depth a circuit is built for.
use plonky2::plonk::config::{GenericConfig, PoseidonGoldilocksConfig};

pub mod array;
pub mod eth;
pub mod keccak;
pub mod mpt;
pub mod mux;
pub mod rlp;
pub mod serialization;
pub mod shift;
pub mod utils;

pub const D: usize = 2;
pub type C = PoseidonGoldilocksConfig;
pub type F = <C as GenericConfig<D>>::F;
