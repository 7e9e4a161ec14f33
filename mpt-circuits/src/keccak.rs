use anyhow::{ensure, Result};
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::Target,
    plonk::circuit_builder::CircuitBuilder,
};
use plonky2_crypto::{
    biguint::BigUintTarget,
    hash::{
        keccak256::{CircuitBuilderHashKeccak, KECCAK256_R},
        HashInputTarget,
    },
};
use serde::{Deserialize, Serialize};

use crate::{
    array::Array,
    utils::{
        blend, bytes_to_nibbles, convert_u8_targets_to_u32, less_than, less_than_const, log_ceil,
        nibbles_to_byte_targets,
    },
};

/// Number of bytes absorbed by one keccak permutation.
pub const KECCAK_RATE_BYTES: usize = KECCAK256_R / 8;
/// Same as [`KECCAK_RATE_BYTES`] in nibbles.
pub const KECCAK_BLOCK_HEX_LEN: usize = 2 * KECCAK_RATE_BYTES;
/// Length of a keccak digest in nibbles.
pub const HASH_HEX_LEN: usize = 64;
/// Encodings shorter than this are embedded as is by their parent instead of
/// being referenced by hash.
const MAX_INLINE_HEX_LEN: usize = 63;

/// Digest of a nibble buffer along with the length of the reference a parent
/// node would hold for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NibbleHash {
    pub output: Array<Target, HASH_HEX_LEN>,
    pub len: Target,
}

/// Hashes the first `in_len` nibbles of `padded`.
///
/// `padded` must be a whole number of keccak blocks and the encoding must end
/// within block `round_index`, i.e. `272 * round_index <= in_len < 272 *
/// (round_index + 1)`, which is enforced. The 10*1 padding is derived in
/// circuit from `in_len`: whatever the buffer holds after the encoding is
/// ignored.
pub fn hash_nibbles<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    padded: &[Target],
    in_len: Target,
    round_index: Target,
) -> NibbleHash {
    assert!(
        !padded.is_empty() && padded.len() % KECCAK_BLOCK_HEX_LEN == 0,
        "buffer of {} nibbles is not made of keccak blocks",
        padded.len()
    );
    let n_blocks = padded.len() / KECCAK_BLOCK_HEX_LEN;
    let block_bits = log_ceil(n_blocks);
    let tru = b._true();

    let within_buffer = less_than_const(b, round_index, n_blocks, block_bits + 1);
    b.connect(within_buffer.target, tru.target);
    let block_start = b.mul_const(F::from_canonical_usize(KECCAK_BLOCK_HEX_LEN), round_index);
    let offset = b.sub(in_len, block_start);
    let in_last_block = less_than_const(b, offset, KECCAK_BLOCK_HEX_LEN, 32);
    b.connect(in_last_block.target, tru.target);

    // last byte of the last absorbed block
    let end_padding = {
        let one = b.one();
        let next_block = b.add(round_index, one);
        let end = b.mul_const(F::from_canonical_usize(KECCAK_RATE_BYTES), next_block);
        b.sub(end, one)
    };
    let begin_pad = b.constant(F::from_canonical_u8(0x01));
    let end_pad = b.constant(F::from_canonical_u8(0x80));
    let bytes = nibbles_to_byte_targets(b, padded);
    let padded_bytes = bytes
        .iter()
        .enumerate()
        .map(|(i, byte)| {
            // byte i covers nibbles 2i and 2i + 1
            let first_nibble = b.constant(F::from_canonical_usize(2 * i));
            let i_target = b.constant(F::from_canonical_usize(i));
            let is_data = less_than(b, first_nibble, in_len, 32);
            let is_start_padding = b.is_equal(first_nibble, in_len);
            let is_end_padding = b.is_equal(i_target, end_padding);
            // both paddings on the same byte sum up to 0x81
            let mut item = b.mul(is_data.target, *byte);
            item = b.mul_add(is_start_padding.target, begin_pad, item);
            b.mul_add(is_end_padding.target, end_pad, item)
        })
        .collect::<Vec<_>>();

    // keccak always absorbs the first block, flag i tells whether block i + 1 is
    let blocks = (0..n_blocks - 1)
        .map(|i| {
            let i_target = b.constant(F::from_canonical_usize(i));
            less_than(b, i_target, round_index, block_bits + 1)
        })
        .collect::<Vec<_>>();

    let hash_target = HashInputTarget {
        input: BigUintTarget {
            limbs: convert_u8_targets_to_u32(b, &padded_bytes),
        },
        input_bits: 0,
        blocks,
    };
    let hash_output = b.hash_keccak256(&hash_target);

    // limb i holds digest bytes 4i..4i+4 in little endian order
    let mut output = Vec::with_capacity(HASH_HEX_LEN);
    for limb in hash_output.limbs.iter() {
        let bits = b.split_le(limb.0, 32);
        for byte_bits in bits.chunks(8) {
            let high = b.le_sum(byte_bits[4..].iter());
            let low = b.le_sum(byte_bits[..4].iter());
            output.push(high);
            output.push(low);
        }
    }
    let output = Array {
        arr: core::array::from_fn(|i| output[i]),
    };

    let is_short = less_than_const(b, in_len, MAX_INLINE_HEX_LEN, 32);
    let full = b.constant(F::from_canonical_usize(HASH_HEX_LEN));
    let len = blend(b, is_short.target, in_len, full);

    NibbleHash { output, len }
}

/// Applies the keccak 10*1 padding: a 0x01 byte, zeros up to the end of the
/// block and the last bit set. A single pad byte is then 0x81.
pub fn pad101_bytes(data: &[u8]) -> Vec<u8> {
    let missing = KECCAK_RATE_BYTES - data.len() % KECCAK_RATE_BYTES;
    let mut padded = data.to_vec();
    padded.push(0x01);
    padded.resize(data.len() + missing, 0);
    if let Some(last) = padded.last_mut() {
        *last ^= 0x80;
    }
    padded
}

/// Index of the block holding the end of an encoding of `hex_len` nibbles.
pub const fn keccak_round_index(hex_len: usize) -> usize {
    hex_len / KECCAK_BLOCK_HEX_LEN
}

/// Nibbles of the padded `data`, extended with zeros to `max_hex_len`.
pub fn padded_nibbles(data: &[u8], max_hex_len: usize) -> Result<Vec<u8>> {
    let mut nibbles = bytes_to_nibbles(&pad101_bytes(data));
    ensure!(
        nibbles.len() <= max_hex_len,
        "{} bytes don't fit in a buffer of {} nibbles once padded",
        data.len(),
        max_hex_len
    );
    nibbles.resize(max_hex_len, 0);
    Ok(nibbles)
}

#[cfg(test)]
mod test {
    use super::{
        hash_nibbles, keccak_round_index, pad101_bytes, padded_nibbles, KECCAK_BLOCK_HEX_LEN,
    };
    use crate::{
        array::new_nibble_vector,
        utils::{bytes_to_nibbles, keccak256, IntTargetWriter},
        C, D, F,
    };
    use plonky2::{
        field::types::Field,
        iop::witness::{PartialWitness, WitnessWrite},
        plonk::{circuit_builder::CircuitBuilder, circuit_data::CircuitConfig},
    };
    use rand::{thread_rng, Rng};
    use std::panic;

    #[test]
    fn test_pad101() {
        let padded = pad101_bytes(&[0xaa; 135]);
        assert_eq!(padded.len(), 136);
        assert_eq!(padded[135], 0x81);
        let padded = pad101_bytes(&[0xaa; 136]);
        assert_eq!(padded.len(), 272);
        assert_eq!(padded[136], 0x01);
        assert_eq!(padded[271], 0x80);
        assert_eq!(pad101_bytes(&[]).len(), 136);
        assert_eq!(keccak_round_index(270), 0);
        assert_eq!(keccak_round_index(272), 1);
        assert!(padded_nibbles(&[0; 136], KECCAK_BLOCK_HEX_LEN).is_err());
    }

    #[test]
    fn test_hash_nibbles() {
        const BLOCKS: usize = 2;
        let config = CircuitConfig::standard_recursion_config();
        let mut b = CircuitBuilder::<F, D>::new(config);
        let input = new_nibble_vector(&mut b, BLOCKS * KECCAK_BLOCK_HEX_LEN);
        let in_len = b.add_virtual_target();
        let round = b.add_virtual_target();
        let hash = hash_nibbles(&mut b, &input, in_len, round);
        hash.output.register_as_public_input(&mut b);
        b.register_public_input(hash.len);
        let data = b.build::<C>();

        let mut rng = thread_rng();
        for len in [20, 31, 100, 135, 136, 200] {
            let bytes = (0..len).map(|_| rng.gen::<u8>()).collect::<Vec<_>>();
            let mut pw = PartialWitness::new();
            let nibbles = padded_nibbles(&bytes, input.len()).unwrap();
            pw.set_int_targets(&input, &nibbles);
            pw.set_target(in_len, F::from_canonical_usize(2 * len));
            pw.set_target(
                round,
                F::from_canonical_usize(keccak_round_index(2 * len)),
            );
            let proof = data.prove(pw).unwrap();
            let expected = bytes_to_nibbles(&keccak256(&bytes));
            for (got, exp) in proof.public_inputs[..64].iter().zip(expected.iter()) {
                assert_eq!(*got, F::from_canonical_u8(*exp));
            }
            let expected_len = if 2 * len < 63 { 2 * len } else { 64 };
            assert_eq!(proof.public_inputs[64], F::from_canonical_usize(expected_len));
            data.verify(proof).unwrap();
        }

        // the round index has to match the length
        let bytes = vec![7u8; 200];
        let mut pw = PartialWitness::new();
        pw.set_int_targets(&input, &padded_nibbles(&bytes, input.len()).unwrap());
        pw.set_target(in_len, F::from_canonical_usize(400));
        pw.set_target(round, F::ZERO);
        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| data.prove(pw)));
        assert!(!matches!(res, Ok(Ok(_))));
    }
}
