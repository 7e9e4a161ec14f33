use anyhow::Result;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::Target,
    plonk::circuit_builder::CircuitBuilder,
};

use super::{
    CheckResult, BRANCH_NODE_ARRAY_PREFIX_HEX_LEN, BRANCH_NODE_FIELDS, BRANCH_NODE_MAX_HEX_LEN,
    NODE_REF_HEX_LEN,
};
use crate::{
    array::prefix_equal,
    mux::{multiplex, select_at},
    rlp::ParserSchema,
};

/// Number of children of a branch node.
const BRANCH_CHILDREN: usize = BRANCH_NODE_FIELDS - 1;

/// Checks that the child of a branch node at a given nibble is the expected
/// node reference. The output is 4 on a valid node, the same as the
/// extension check so that both can be blended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchCheck {
    schema: ParserSchema,
}

impl BranchCheck {
    pub fn new() -> Result<Self> {
        // the value slot is always empty in the tries we prove
        let mut field_max_hex_len = vec![NODE_REF_HEX_LEN; BRANCH_CHILDREN];
        field_max_hex_len.push(0);
        let schema = ParserSchema::new(
            BRANCH_NODE_MAX_HEX_LEN,
            BRANCH_NODE_FIELDS,
            BRANCH_NODE_ARRAY_PREFIX_HEX_LEN,
            vec![0; BRANCH_NODE_FIELDS],
            field_max_hex_len,
        )?;
        Ok(Self { schema })
    }

    pub fn rlp_hex_len(&self) -> usize {
        self.schema.max_hex_len
    }

    /// `nibble` is the key nibble consumed by the node, it must be lower
    /// than 16.
    pub fn check<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        nibble: Target,
        node_ref: &[Target],
        node_ref_len: Target,
        rlp: &[Target],
    ) -> CheckResult {
        assert_eq!(node_ref.len(), NODE_REF_HEX_LEN);
        let parsed = self.schema.check_array(b, &rlp[..self.rlp_hex_len()]);

        // lane j holds the j-th nibble of every child
        let lanes = (0..NODE_REF_HEX_LEN)
            .map(|j| {
                parsed.fields[..BRANCH_CHILDREN]
                    .iter()
                    .map(|f| f.nibbles[j])
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let child = multiplex(b, nibble, &lanes);
        let ref_ok = prefix_equal(b, node_ref, &child, NODE_REF_HEX_LEN, node_ref_len);

        let child_lens = parsed.fields[..BRANCH_CHILDREN]
            .iter()
            .map(|f| f.len)
            .collect::<Vec<_>>();
        let child_len = select_at(b, nibble, &child_lens);
        let len_ok = b.is_equal(child_len, node_ref_len);

        let one = b.one();
        let output = b.add_many([parsed.out.target, ref_ok.target, len_ok.target, one]);
        CheckResult {
            output,
            rlp_total_len: parsed.total_hex_len,
        }
    }
}

#[cfg(test)]
mod test {
    use super::BranchCheck;
    use crate::{
        array::new_nibble_vector,
        mpt::NODE_REF_HEX_LEN,
        utils::{bytes_to_nibbles, IntTargetWriter},
        C, D, F,
    };
    use mpt_test::circuit::{run_circuit, UserCircuit};
    use plonky2::{
        field::types::Field,
        iop::{
            target::Target,
            witness::{PartialWitness, WitnessWrite},
        },
        plonk::circuit_builder::CircuitBuilder,
    };
    use serial_test::serial;

    /// Second level of the storage trie of the tests, 17 items.
    const BRANCH: &str = "f8d18080808080a0f7b56be8dd71e675bf18c14afe0936d94d8883b9bbfcaee55e261a0b1dae1ea580a0c81a7ed63fb141b3f0302002ec0d5dcedeab671835adc6bc4d7f17e030717dd980a0d0a95e510d498a8b510ea71f8842528f438fc7e43e996c27e87774a52bee2c1aa0ff1f3593598f45c98daa085532e5051fe09da692b75e03a881cf29b1411fa92480a09d65e3575d4d5b52401675206aac2a225ae72d9ef0044e521fd13af454925d9ea0fa5a015c91c948b3b811f3960cba4a588fad127ca6c1026f5ee5171273074cc4808080";
    /// Child at nibble 9.
    const CHILD: &str = "d0a95e510d498a8b510ea71f8842528f438fc7e43e996c27e87774a52bee2c1a";

    #[derive(Clone, Debug)]
    struct BranchCircuit {
        nibble: usize,
        node_ref: Vec<u8>,
        rlp: Vec<u8>,
        expected_output: usize,
    }

    impl UserCircuit<F, D> for BranchCircuit {
        type Wires = (Target, Vec<Target>, Vec<Target>, Target, Target);

        fn build(c: &mut CircuitBuilder<F, D>) -> Self::Wires {
            let check = BranchCheck::new().unwrap();
            let nibble = c.add_virtual_target();
            let node_ref = new_nibble_vector(c, NODE_REF_HEX_LEN);
            let node_ref_len = c.constant(F::from_canonical_usize(NODE_REF_HEX_LEN));
            let rlp = new_nibble_vector(c, check.rlp_hex_len());
            let res = check.check(c, nibble, &node_ref, node_ref_len, &rlp);
            let output = c.add_virtual_target();
            c.connect(output, res.output);
            let total = c.add_virtual_target();
            c.connect(total, res.rlp_total_len);
            (nibble, node_ref, rlp, output, total)
        }

        fn prove(&self, pw: &mut PartialWitness<F>, wires: &Self::Wires) {
            pw.set_target(wires.0, F::from_canonical_usize(self.nibble));
            pw.set_int_targets(&wires.1, &self.node_ref);
            let mut rlp = self.rlp.clone();
            let total = rlp.len();
            rlp.resize(wires.2.len(), 0);
            pw.set_int_targets(&wires.2, &rlp);
            pw.set_target(wires.3, F::from_canonical_usize(self.expected_output));
            pw.set_target(wires.4, F::from_canonical_usize(total));
        }
    }

    fn branch_circuit(nibble: usize, expected_output: usize) -> BranchCircuit {
        BranchCircuit {
            nibble,
            node_ref: bytes_to_nibbles(&hex::decode(CHILD).unwrap()),
            rlp: bytes_to_nibbles(&hex::decode(BRANCH).unwrap()),
            expected_output,
        }
    }

    #[test]
    #[serial]
    fn test_branch_check() {
        run_circuit::<F, D, C, _>(branch_circuit(9, 4));
    }

    #[test]
    #[serial]
    fn test_branch_check_wrong_nibble() {
        // another child of the same length
        run_circuit::<F, D, C, _>(branch_circuit(10, 3));
        // an empty slot
        run_circuit::<F, D, C, _>(branch_circuit(8, 2));
    }
}
