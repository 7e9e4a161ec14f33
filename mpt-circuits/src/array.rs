use anyhow::{ensure, Result};
use core::array::from_fn as create_array;
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
use std::ops::Index;

use crate::{
    mux::multiplex,
    serialization::{deserialize_long_array, serialize_long_array},
};

/// Fixed size array of wires. Mostly used for 64-nibble digests and keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Array<T, const N: usize>
where
    T: Clone + Serialize,
    for<'d> T: Deserialize<'d>,
{
    // serde doesn't support const generic arrays longer than 32
    #[serde(
        serialize_with = "serialize_long_array",
        deserialize_with = "deserialize_long_array"
    )]
    pub(crate) arr: [T; N],
}

impl<T: Targetable + Clone + Serialize, const N: usize> PartialEq for Array<T, N>
where
    for<'d> T: Deserialize<'d>,
{
    fn eq(&self, other: &Self) -> bool {
        self.arr
            .iter()
            .zip(other.arr.iter())
            .all(|(first, second)| first.to_target() == second.to_target())
    }
}

impl<T: Targetable + Clone + Serialize, const N: usize> Eq for Array<T, N> where
    for<'d> T: Deserialize<'d>
{
}

/// Wires an [`Array`] can hold.
pub trait Targetable: Copy {
    fn to_target(&self) -> Target;
    fn from_target(t: Target) -> Self;
}

impl Targetable for Target {
    fn to_target(&self) -> Target {
        *self
    }
    fn from_target(t: Target) -> Self {
        t
    }
}

impl<T: Clone + Serialize, const SIZE: usize> Index<usize> for Array<T, SIZE>
where
    for<'de> T: Deserialize<'de>,
{
    type Output = T;
    fn index(&self, index: usize) -> &Self::Output {
        self.arr.index(index)
    }
}

impl<const SIZE: usize> Array<Target, SIZE> {
    /// Allocates SIZE wires, each range checked to be a nibble.
    pub fn new_nibbles<F: RichField + Extendable<D>, const D: usize>(
        b: &mut CircuitBuilder<F, D>,
    ) -> Self {
        let arr = Self::new(b);
        arr.assert_nibbles(b);
        arr
    }

    pub fn assert_nibbles<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) {
        for nibble in self.arr {
            b.range_check(nibble, 4)
        }
    }

    /// Assigns a slice of nibbles, one per wire.
    pub fn assign_nibbles<F: RichField>(
        &self,
        pw: &mut PartialWitness<F>,
        nibbles: &[u8],
    ) -> Result<()> {
        ensure!(
            nibbles.len() == SIZE,
            "expected {} nibbles, got {}",
            SIZE,
            nibbles.len()
        );
        self.assign(pw, &create_array(|i| F::from_canonical_u8(nibbles[i])));
        Ok(())
    }
}

impl<T: Targetable + Clone + Serialize, const SIZE: usize> Array<T, SIZE>
where
    for<'de> T: Deserialize<'de>,
{
    /// Creates new wires of the given SIZE.
    pub fn new<F: RichField + Extendable<D>, const D: usize>(b: &mut CircuitBuilder<F, D>) -> Self {
        Self {
            arr: create_array(|_| T::from_target(b.add_virtual_target())),
        }
    }

    /// Encapsulate the native array within the Array struct.
    pub fn from_array(arr: [T; SIZE]) -> Self {
        Self { arr }
    }

    /// Assigns each value in the given array to the respective wire in `self`
    pub fn assign<F: RichField>(&self, pw: &mut PartialWitness<F>, array: &[F; SIZE]) {
        for (wire, value) in self.arr.iter().zip(array.iter()) {
            pw.set_target(wire.to_target(), *value)
        }
    }

    /// Conditionally select this array if condition is true or the other array
    /// if condition is false. Cost is O(SIZE) call to select()
    pub fn select<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        condition: BoolTarget,
        other: &Self,
    ) -> Self {
        Array {
            arr: create_array(|i| {
                T::from_target(b.select(
                    condition,
                    self.arr[i].to_target(),
                    other.arr[i].to_target(),
                ))
            }),
        }
    }

    /// Returns true if self == other, false otherwise.
    pub fn equals<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        other: &Self,
    ) -> BoolTarget {
        let mut res = b._true();
        for (our, other) in self.arr.iter().zip(other.arr.iter()) {
            let eq = b.is_equal(our.to_target(), other.to_target());
            res = b.and(res, eq);
        }
        res
    }

    /// Enforce this array is equal to another one.
    pub fn enforce_equal<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        other: &Self,
    ) {
        self.arr
            .iter()
            .zip(other.arr.iter())
            .for_each(|(our, other)| b.connect(our.to_target(), other.to_target()));
    }

    pub fn register_as_public_input<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
    ) {
        b.register_public_inputs(&self.to_targets());
    }

    pub fn to_targets(&self) -> Vec<Target> {
        self.arr.iter().map(|t| t.to_target()).collect()
    }
}

/// Allocates `len` wires range checked to be nibbles.
pub fn new_nibble_vector<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    len: usize,
) -> Vec<Target> {
    let nibbles = b.add_virtual_targets(len);
    for n in &nibbles {
        b.range_check(*n, 4);
    }
    nibbles
}

/// Returns true if `a[..len] == other[..len]`, with `len` a wire lower or
/// equal to `max_len`. Both slices need at least `max_len` entries. The
/// witness is unsatisfiable if `len > max_len`.
///
/// The running count of matching positions is read at index `len` with an
/// oblivious select and compared to `len` itself, so the cost is linear in
/// `max_len` regardless of the actual length.
pub fn prefix_equal<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    a: &[Target],
    other: &[Target],
    max_len: usize,
    len: Target,
) -> BoolTarget {
    assert!(a.len() >= max_len && other.len() >= max_len);
    let mut match_sum = vec![b.zero()];
    for i in 0..max_len {
        let eq = b.is_equal(a[i], other[i]);
        let running = b.add(match_sum[i], eq.target);
        match_sum.push(running);
    }
    let matched = multiplex(b, len, &[match_sum]);
    b.is_equal(matched[0], len)
}
