//! Oblivious index selection.
//!
//! Every data dependent lookup of the parsers goes through [`multiplex`]: the
//! selector is decoded into a one-hot vector of equality flags and each lane is
//! read with a dot product. The flags are forced to sum to one, which is how an
//! out of range selector makes the witness unsatisfiable.
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::{BoolTarget, Target},
    plonk::circuit_builder::CircuitBuilder,
};

/// One-hot decoding of `selector` over `width` positions. Asserts that
/// `selector < width`.
pub fn decode<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    selector: Target,
    width: usize,
) -> Vec<BoolTarget> {
    assert!(width > 0, "can't decode over an empty range");
    let flags = (0..width)
        .map(|i| {
            let i_target = b.constant(F::from_canonical_usize(i));
            b.is_equal(i_target, selector)
        })
        .collect::<Vec<_>>();
    let sum = b.add_many(flags.iter().map(|f| f.target));
    let one = b.one();
    b.connect(sum, one);
    flags
}

/// SUM_i a[i] * flags[i]
pub fn dot_product<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    a: &[Target],
    flags: &[BoolTarget],
) -> Target {
    assert_eq!(a.len(), flags.len());
    a.iter()
        .zip(flags)
        .fold(b.zero(), |acc, (v, f)| b.mul_add(f.target, *v, acc))
}

/// Returns, for every lane, the element at position `selector`. All lanes must
/// have the same length N and the circuit is only satisfiable for
/// `selector < N`.
pub fn multiplex<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    selector: Target,
    lanes: &[Vec<Target>],
) -> Vec<Target> {
    assert!(!lanes.is_empty());
    let width = lanes[0].len();
    assert!(lanes.iter().all(|l| l.len() == width), "uneven lanes");
    let flags = decode(b, selector, width);
    lanes.iter().map(|l| dot_product(b, l, &flags)).collect()
}

/// Single lane version of [`multiplex`].
pub fn select_at<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    selector: Target,
    values: &[Target],
) -> Target {
    let flags = decode(b, selector, values.len());
    dot_product(b, values, &flags)
}

#[cfg(test)]
mod test {
    use super::{multiplex, select_at};
    use crate::{C, D, F};
    use mpt_test::circuit::{prove_circuit, run_circuit, setup_circuit, UserCircuit};
    use plonky2::{
        field::types::Field,
        iop::{
            target::Target,
            witness::{PartialWitness, WitnessWrite},
        },
        plonk::circuit_builder::CircuitBuilder,
    };
    use rand::{thread_rng, Rng};
    use std::panic;

    const N: usize = 16;
    const LANES: usize = 3;

    #[derive(Clone, Debug)]
    struct MuxCircuit {
        lanes: Vec<Vec<u64>>,
        selector: usize,
    }

    impl UserCircuit<F, D> for MuxCircuit {
        type Wires = (Vec<Vec<Target>>, Target, Vec<Target>);

        fn build(c: &mut CircuitBuilder<F, D>) -> Self::Wires {
            let lanes = (0..LANES)
                .map(|_| c.add_virtual_targets(N))
                .collect::<Vec<_>>();
            let selector = c.add_virtual_target();
            let out = multiplex(c, selector, &lanes);
            let expected = c.add_virtual_targets(LANES);
            out.iter()
                .zip(expected.iter())
                .for_each(|(o, e)| c.connect(*o, *e));
            // the single lane flavour must agree with the first lane
            let first = select_at(c, selector, &lanes[0]);
            c.connect(first, out[0]);
            (lanes, selector, expected)
        }

        fn prove(&self, pw: &mut PartialWitness<F>, wires: &Self::Wires) {
            for (lane_wires, lane) in wires.0.iter().zip(self.lanes.iter()) {
                for (w, v) in lane_wires.iter().zip(lane.iter()) {
                    pw.set_target(*w, F::from_canonical_u64(*v));
                }
            }
            pw.set_target(wires.1, F::from_canonical_usize(self.selector));
            for (w, lane) in wires.2.iter().zip(self.lanes.iter()) {
                // out of range selectors still need some expected value
                let v = lane.get(self.selector).copied().unwrap_or_default();
                pw.set_target(*w, F::from_canonical_u64(v));
            }
        }
    }

    fn random_lanes() -> Vec<Vec<u64>> {
        let mut rng = thread_rng();
        (0..LANES)
            .map(|_| (0..N).map(|_| rng.gen::<u32>() as u64).collect())
            .collect()
    }

    #[test]
    fn test_multiplex_every_index() {
        let lanes = random_lanes();
        let setup = setup_circuit::<F, D, C, MuxCircuit>();
        for selector in 0..N {
            prove_circuit(
                &setup,
                &MuxCircuit {
                    lanes: lanes.clone(),
                    selector,
                },
            );
        }
    }

    #[test]
    fn test_multiplex_out_of_range() {
        let lanes = random_lanes();
        let res = panic::catch_unwind(|| {
            run_circuit::<F, D, C, _>(MuxCircuit {
                lanes,
                selector: N,
            })
        });
        assert!(res.is_err(), "selector outside the lanes should fail");
    }
}
