//! Barrel shifters over fixed size buffers.
//!
//! Each layer of the shifter moves the buffer by a power of two depending on
//! one bit of the shift amount, so the cost is `len * bits` selects whatever
//! the actual shift is.
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::Target,
    plonk::circuit_builder::CircuitBuilder,
};

use crate::utils::{log_ceil, num_to_bits};

/// Rotates `input` to the left by `shift`, with `min_shift <= shift <= max_shift`.
///
/// The selector is `shift - min_shift` decomposed over `log_ceil(max_shift - min_shift)`
/// bits; the constant `min_shift` rotation is folded into the first layer.
/// When the range is a single value, the rotation is fixed and `shift` is
/// constrained to be equal to it.
pub fn shift_left<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    input: &[Target],
    min_shift: usize,
    max_shift: usize,
    shift: Target,
) -> Vec<Target> {
    assert!(min_shift <= max_shift, "invalid shift range");
    let n = input.len();
    if min_shift == max_shift {
        let fixed = b.constant(F::from_canonical_usize(min_shift));
        b.connect(shift, fixed);
        return (0..n).map(|j| input[(j + min_shift) % n]).collect();
    }

    let n_bits = log_ceil(max_shift - min_shift);
    let min = b.constant(F::from_canonical_usize(min_shift));
    let relative = b.sub(shift, min);
    let bits = num_to_bits(b, n_bits, relative);

    let mut layer = (0..n)
        .map(|j| {
            b.select(
                bits[0],
                input[(j + min_shift + 1) % n],
                input[(j + min_shift) % n],
            )
        })
        .collect::<Vec<_>>();
    for (idx, bit) in bits.iter().enumerate().skip(1) {
        let step = 1 << idx;
        layer = (0..n)
            .map(|j| b.select(*bit, layer[(j + step) % n], layer[j]))
            .collect();
    }
    layer
}

/// Moves `input` to the right by `shift < 2^n_bits`. The first `shift` slots
/// are filled with zeros and the last ones are dropped.
pub fn shift_right<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    input: &[Target],
    n_bits: usize,
    shift: Target,
) -> Vec<Target> {
    let bits = num_to_bits(b, n_bits, shift);
    let zero = b.zero();
    let mut layer = input.to_vec();
    for (idx, bit) in bits.iter().enumerate() {
        let step = 1 << idx;
        layer = (0..layer.len())
            .map(|j| {
                let moved = if j >= step { layer[j - step] } else { zero };
                b.select(*bit, moved, layer[j])
            })
            .collect();
    }
    layer
}

/// Extracts `input[from..end]`, left aligned in a buffer of `max_select`
/// elements, and returns it with its length `end - from`.
///
/// Asserts `from <= end <= input.len()` and `end - from <= max_select`. The
/// slots after the length carry whatever follows in the input.
pub fn sub_array<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    input: &[Target],
    from: Target,
    end: Target,
    max_select: usize,
) -> (Vec<Target>, Target) {
    let n = input.len();
    assert!(max_select <= n, "can't select more than the input");
    // n < 2^bits so every valid difference fits and negative ones wrap
    // around the field and fail the range check
    let bits = log_ceil(n);
    let len = b.sub(end, from);
    b.range_check(len, bits);
    let n_target = b.constant(F::from_canonical_usize(n));
    let remaining = b.sub(n_target, end);
    b.range_check(remaining, bits);
    let max = b.constant(F::from_canonical_usize(max_select));
    let slack = b.sub(max, len);
    b.range_check(slack, bits);

    let rotated = shift_left(b, input, 0, n, from);
    (rotated[..max_select].to_vec(), len)
}

#[cfg(test)]
mod test {
    use super::{shift_left, shift_right, sub_array};
    use crate::{utils::IntTargetWriter, C, D, F};
    use mpt_test::circuit::{run_circuit, UserCircuit};
    use plonky2::{
        field::types::Field,
        iop::{
            target::Target,
            witness::{PartialWitness, WitnessWrite},
        },
        plonk::{circuit_builder::CircuitBuilder, circuit_data::CircuitConfig},
    };
    use rand::{thread_rng, Rng};
    use rstest::rstest;
    use std::panic;

    const LEN: usize = 24;
    const MIN: usize = 2;
    const MAX: usize = 9;

    fn random_nibbles(n: usize) -> Vec<u8> {
        let mut rng = thread_rng();
        (0..n).map(|_| rng.gen_range(0..16)).collect()
    }

    /// Shifts left then right by the same amount and exposes both results.
    #[derive(Clone, Debug)]
    struct RoundTripCircuit {
        input: Vec<u8>,
        shift: usize,
    }

    impl UserCircuit<F, D> for RoundTripCircuit {
        type Wires = (Vec<Target>, Target, Vec<Target>, Vec<Target>);

        fn build(c: &mut CircuitBuilder<F, D>) -> Self::Wires {
            let input = c.add_virtual_targets(LEN);
            let shift = c.add_virtual_target();
            let left = shift_left(c, &input, MIN, MAX, shift);
            let right = shift_right(c, &left, 4, shift);
            let exp_left = c.add_virtual_targets(LEN);
            let exp_right = c.add_virtual_targets(LEN);
            left.iter()
                .zip(&exp_left)
                .for_each(|(a, e)| c.connect(*a, *e));
            right
                .iter()
                .zip(&exp_right)
                .for_each(|(a, e)| c.connect(*a, *e));
            (input, shift, exp_left, exp_right)
        }

        fn prove(&self, pw: &mut PartialWitness<F>, wires: &Self::Wires) {
            pw.set_int_targets(&wires.0, &self.input);
            pw.set_target(wires.1, F::from_canonical_usize(self.shift));
            let mut left = self.input.clone();
            left.rotate_left(self.shift);
            pw.set_int_targets(&wires.2, &left);
            let right = (0..LEN)
                .map(|j| if j < self.shift { 0 } else { left[j - self.shift] })
                .collect::<Vec<_>>();
            // every slot after the zero fill is restored
            assert_eq!(right[self.shift..], self.input[self.shift..]);
            pw.set_int_targets(&wires.3, &right);
        }
    }

    #[rstest]
    #[case(MIN)]
    #[case(5)]
    #[case(MAX)]
    fn test_shift_round_trip(#[case] shift: usize) {
        run_circuit::<F, D, C, _>(RoundTripCircuit {
            input: random_nibbles(LEN),
            shift,
        });
    }

    #[test]
    fn test_shift_below_min() {
        let res = panic::catch_unwind(|| {
            run_circuit::<F, D, C, _>(RoundTripCircuit {
                input: random_nibbles(LEN),
                shift: MIN - 1,
            })
        });
        assert!(res.is_err());
    }

    #[test]
    fn test_fixed_shift() {
        let config = CircuitConfig::standard_recursion_config();
        let mut b = CircuitBuilder::<F, D>::new(config);
        let input = b.add_virtual_targets(LEN);
        let shift = b.add_virtual_target();
        let out = shift_left(&mut b, &input, 3, 3, shift);
        b.register_public_inputs(&out);
        let data = b.build::<C>();

        let nibbles = random_nibbles(LEN);
        let mut pw = PartialWitness::new();
        pw.set_int_targets(&input, &nibbles);
        pw.set_target(shift, F::from_canonical_usize(3));
        let proof = data.prove(pw).unwrap();
        for (j, pi) in proof.public_inputs.iter().enumerate() {
            assert_eq!(*pi, F::from_canonical_u8(nibbles[(j + 3) % LEN]));
        }

        let mut pw = PartialWitness::new();
        pw.set_int_targets(&input, &nibbles);
        pw.set_target(shift, F::from_canonical_usize(4));
        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| data.prove(pw)));
        assert!(!matches!(res, Ok(Ok(_))), "only the fixed shift is allowed");
    }

    #[derive(Clone, Debug)]
    struct SubArrayCircuit {
        input: Vec<u8>,
        from: usize,
        end: usize,
    }

    const SUB_MAX: usize = 8;

    impl UserCircuit<F, D> for SubArrayCircuit {
        type Wires = (Vec<Target>, Target, Target, Vec<Target>, Target);

        fn build(c: &mut CircuitBuilder<F, D>) -> Self::Wires {
            let input = c.add_virtual_targets(LEN);
            let from = c.add_virtual_target();
            let end = c.add_virtual_target();
            let (out, len) = sub_array(c, &input, from, end, SUB_MAX);
            let exp = c.add_virtual_targets(SUB_MAX);
            out.iter().zip(&exp).for_each(|(a, e)| c.connect(*a, *e));
            let exp_len = c.add_virtual_target();
            c.connect(len, exp_len);
            (input, from, end, exp, exp_len)
        }

        fn prove(&self, pw: &mut PartialWitness<F>, wires: &Self::Wires) {
            pw.set_int_targets(&wires.0, &self.input);
            pw.set_target(wires.1, F::from_canonical_usize(self.from));
            pw.set_target(wires.2, F::from_canonical_usize(self.end));
            let mut rotated = self.input.clone();
            rotated.rotate_left(self.from % LEN);
            pw.set_int_targets(&wires.3, &rotated[..SUB_MAX]);
            pw.set_target(
                wires.4,
                F::from_canonical_usize(self.end.wrapping_sub(self.from) % LEN),
            );
        }
    }

    #[test]
    fn test_sub_array() {
        let input = random_nibbles(LEN);
        for (from, end) in [(0, 8), (5, 9), (20, LEN), (LEN, LEN)] {
            run_circuit::<F, D, C, _>(SubArrayCircuit {
                input: input.clone(),
                from,
                end,
            });
        }
    }

    #[rstest]
    #[case(6, 5)]
    #[case(2, LEN + 1)]
    #[case(0, SUB_MAX + 1)]
    fn test_sub_array_invalid_bounds(#[case] from: usize, #[case] end: usize) {
        let input = random_nibbles(LEN);
        let res = panic::catch_unwind(|| {
            run_circuit::<F, D, C, _>(SubArrayCircuit { input, from, end })
        });
        assert!(res.is_err());
    }
}
