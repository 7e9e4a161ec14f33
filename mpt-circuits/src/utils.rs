use itertools::Itertools;
use plonky2::field::extension::Extendable;
use plonky2::hash::hash_types::RichField;
use plonky2::iop::target::{BoolTarget, Target};
use plonky2::iop::witness::{PartialWitness, WitnessWrite};
use plonky2::plonk::circuit_builder::CircuitBuilder;
use plonky2_crypto::u32::arithmetic_u32::U32Target;
use sha3::Digest;
use sha3::Keccak256;

const TWO_POWER_8: usize = 256;
const TWO_POWER_16: usize = 65536;
const TWO_POWER_24: usize = 16777216;

/// Allows to write directly a vector of integers into a partial witness
pub trait IntTargetWriter {
    fn set_int_targets<T: Into<u32> + Clone>(&mut self, t: &[Target], v: &[T]);
}
impl<F: RichField> IntTargetWriter for PartialWitness<F> {
    fn set_int_targets<T: Into<u32> + Clone>(&mut self, t: &[Target], v: &[T]) {
        assert_eq!(t.len(), v.len());
        for (target, value) in t.iter().zip(v) {
            self.set_target(*target, F::from_canonical_u32(value.clone().into()));
        }
    }
}

/// Compute the keccak256 hash of the given data.
pub fn keccak256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Number of bits needed to represent `n`, i.e. 0 for 0, 1 for 1, 3 for 4.
/// Every barrel shifter and length-of-length computation is sized with it.
pub const fn log_ceil(n: usize) -> usize {
    (usize::BITS - n.leading_zeros()) as usize
}

/// Splits every byte into its two nibbles, most significant first.
pub fn bytes_to_nibbles(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|b| [b >> 4, b & 0x0F]).collect()
}

/// Inverse of [`bytes_to_nibbles`]. The input must have an even length.
pub fn nibbles_to_bytes(nibbles: &[u8]) -> Vec<u8> {
    assert!(nibbles.len() % 2 == 0, "odd number of nibbles");
    nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | (pair[1] & 0x0F))
        .collect()
}

/// Converts nibble targets into byte targets, two nibbles per byte with the
/// first one being the most significant.
pub(crate) fn nibbles_to_byte_targets<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    nibbles: &[Target],
) -> Vec<Target> {
    assert!(nibbles.len() % 2 == 0);
    let sixteen = F::from_canonical_u8(16);
    nibbles
        .chunks(2)
        .map(|pair| b.mul_const_add(sixteen, pair[0], pair[1]))
        .collect()
}

pub(crate) fn convert_u8_targets_to_u32<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    data: &[Target],
) -> Vec<U32Target> {
    assert!(data.len() % 4 == 0);

    // u32 = u8[0] + u8[1] * 2^8 + u8[2] * 2^16 + u8[3] * 2^24
    let two_power_8: Target = b.constant(F::from_canonical_usize(TWO_POWER_8));
    let two_power_16: Target = b.constant(F::from_canonical_usize(TWO_POWER_16));
    let two_power_24: Target = b.constant(F::from_canonical_usize(TWO_POWER_24));

    data.chunks(4)
        .map(|bytes| {
            let mut x = b.mul_add(bytes[1], two_power_8, bytes[0]);
            x = b.mul_add(bytes[2], two_power_16, x);
            x = b.mul_add(bytes[3], two_power_24, x);
            U32Target(x)
        })
        .collect_vec()
}

/// Returns the bits of the given number.
pub fn num_to_bits<F: RichField + Extendable<D>, const D: usize>(
    builder: &mut CircuitBuilder<F, D>,
    n: usize,
    x: Target,
) -> Vec<BoolTarget> {
    builder.split_le(x, n)
}

/// Returns true if a < b in the first n bits. False otherwise.
/// Both operands must fit in n bits, otherwise the witness is unsatisfiable.
pub fn less_than<F: RichField + Extendable<D>, const D: usize>(
    builder: &mut CircuitBuilder<F, D>,
    a: Target,
    b: Target,
    n: usize,
) -> BoolTarget {
    assert!(n < 64);

    let power_of_two = builder.constant(F::from_canonical_u64(1 << n));
    let mut lin_pol = builder.add(a, power_of_two);
    // 2^n + a - b
    lin_pol = builder.sub(lin_pol, b);

    let binary = num_to_bits(builder, n + 1, lin_pol);
    // bin(2^n + a - b)[n] == false is correct only when a < b otherwise
    // 2^n + a - b > 2^n so binary[n] will be set
    builder.not(binary[n])
}

/// Same as [`less_than`] with a constant right hand side.
pub fn less_than_const<F: RichField + Extendable<D>, const D: usize>(
    builder: &mut CircuitBuilder<F, D>,
    a: Target,
    c: usize,
    n: usize,
) -> BoolTarget {
    let c = builder.constant(F::from_canonical_usize(c));
    less_than(builder, a, c, n)
}

pub fn less_than_or_equal_to<F: RichField + Extendable<D>, const D: usize>(
    builder: &mut CircuitBuilder<F, D>,
    a: Target,
    b: Target,
    n: usize,
) -> BoolTarget {
    let one = builder.one();
    let b_plus_1 = builder.add(b, one);
    less_than(builder, a, b_plus_1, n)
}

/// Returns a boolean equal to `x == c`.
pub fn equal_const<F: RichField + Extendable<D>, const D: usize>(
    builder: &mut CircuitBuilder<F, D>,
    x: Target,
    c: usize,
) -> BoolTarget {
    let c = builder.constant(F::from_canonical_usize(c));
    builder.is_equal(x, c)
}

/// Returns `cond * (a - b) + b`, i.e. `a` when `cond` is set and `b` otherwise.
/// `cond` is a 0/1 target that is not necessarily typed as a boolean.
pub fn blend<F: RichField + Extendable<D>, const D: usize>(
    builder: &mut CircuitBuilder<F, D>,
    cond: Target,
    a: Target,
    b: Target,
) -> Target {
    let diff = builder.sub(a, b);
    builder.mul_add(cond, diff, b)
}
