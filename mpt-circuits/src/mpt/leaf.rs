use anyhow::Result;
use log::debug;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::Target,
    plonk::circuit_builder::CircuitBuilder,
};

use super::{path_check, path_prefix_check, CheckResult};
use crate::{
    array::prefix_equal,
    rlp::{length_prefix_max_hex_len, ParserSchema},
};

/// Checks a leaf node `[hp(path), value]` against the expected remaining key
/// and value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafCheck {
    pub max_key_len: usize,
    pub max_value_len: usize,
    schema: ParserSchema,
}

#[derive(Clone, Debug)]
pub struct LeafCheckResult {
    /// 4 on a valid leaf.
    pub result: CheckResult,
    pub value_len: Target,
}

impl LeafCheck {
    pub fn new(max_key_len: usize, max_value_len: usize) -> Result<Self> {
        let max_rlp_len = Self::max_rlp_hex_len(max_key_len, max_value_len);
        let schema = ParserSchema::new(
            max_rlp_len,
            2,
            length_prefix_max_hex_len(max_rlp_len),
            vec![0, 0],
            vec![max_key_len + 2, max_value_len],
        )?;
        Ok(Self {
            max_key_len,
            max_value_len,
            schema,
        })
    }

    /// List prefix, path with its prefix and hex flag, value with its prefix.
    pub const fn max_rlp_hex_len(max_key_len: usize, max_value_len: usize) -> usize {
        4 + (max_key_len + 2) + 4 + max_value_len
    }

    pub fn rlp_hex_len(&self) -> usize {
        self.schema.max_hex_len
    }

    /// `key` holds the remaining key nibbles left aligned, `key_len` of them
    /// being meaningful. Only the first [`Self::rlp_hex_len`] nibbles of
    /// `rlp` are parsed.
    pub fn check<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        key: &[Target],
        key_len: Target,
        value: &[Target],
        rlp: &[Target],
        path_prefix_len: Target,
    ) -> LeafCheckResult {
        assert_eq!(key.len(), self.max_key_len);
        assert_eq!(value.len(), self.max_value_len);
        debug!(
            "[+] Leaf check: key {} nibbles, value {} nibbles",
            self.max_key_len, self.max_value_len
        );

        let parsed = self.schema.check_array(b, &rlp[..self.rlp_hex_len()]);
        let path = &parsed.fields[0];
        let stored = &parsed.fields[1];

        let prefix_ok = path_prefix_check(b, path, path_prefix_len, 3, 2);
        let key_ok = path_check(b, path, path_prefix_len, key, key_len);
        let value_ok = prefix_equal(b, value, &stored.nibbles, self.max_value_len, stored.len);

        let output = b.add_many([parsed.out.target, prefix_ok, key_ok, value_ok.target]);
        LeafCheckResult {
            result: CheckResult {
                output,
                rlp_total_len: parsed.total_hex_len,
            },
            value_len: stored.len,
        }
    }
}

#[cfg(test)]
mod test {
    use super::LeafCheck;
    use crate::{
        array::new_nibble_vector,
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

    const KEY_LEN: usize = 64;
    const VALUE_LEN: usize = 66;

    const LEAF: &str = "f7a0200decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e5639594bc50cbd395314a43302e3bf56677755e5a543a8c";
    const KEY: &str = "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563";
    const VALUE: &str = "94bc50cbd395314a43302e3bf56677755e5a543a8c";

    #[derive(Clone, Debug)]
    struct LeafCircuit {
        /// remaining key nibbles
        key: Vec<u8>,
        value: Vec<u8>,
        rlp: Vec<u8>,
        path_prefix_len: usize,
        expected_output: usize,
        expected_value_len: usize,
    }

    type LeafWires = (
        Vec<Target>,
        Target,
        Vec<Target>,
        Vec<Target>,
        Target,
        Target,
        Target,
    );

    impl UserCircuit<F, D> for LeafCircuit {
        type Wires = LeafWires;

        fn build(c: &mut CircuitBuilder<F, D>) -> Self::Wires {
            let check = LeafCheck::new(KEY_LEN, VALUE_LEN).unwrap();
            let key = new_nibble_vector(c, KEY_LEN);
            let key_len = c.add_virtual_target();
            let value = new_nibble_vector(c, VALUE_LEN);
            let rlp = new_nibble_vector(c, check.rlp_hex_len());
            let ppl = c.add_virtual_target();
            let res = check.check(c, &key, key_len, &value, &rlp, ppl);
            let output = c.add_virtual_target();
            c.connect(output, res.result.output);
            let value_len = c.add_virtual_target();
            c.connect(value_len, res.value_len);
            (key, key_len, value, rlp, ppl, output, value_len)
        }

        fn prove(&self, pw: &mut PartialWitness<F>, wires: &Self::Wires) {
            let mut key = self.key.clone();
            let key_len = key.len();
            key.resize(KEY_LEN, 0);
            pw.set_int_targets(&wires.0, &key);
            pw.set_target(wires.1, F::from_canonical_usize(key_len));
            let mut value = self.value.clone();
            value.resize(VALUE_LEN, 0);
            pw.set_int_targets(&wires.2, &value);
            let mut rlp = self.rlp.clone();
            rlp.resize(wires.3.len(), 0);
            pw.set_int_targets(&wires.3, &rlp);
            pw.set_target(wires.4, F::from_canonical_usize(self.path_prefix_len));
            pw.set_target(wires.5, F::from_canonical_usize(self.expected_output));
            pw.set_target(wires.6, F::from_canonical_usize(self.expected_value_len));
        }
    }

    fn nibbles(s: &str) -> Vec<u8> {
        bytes_to_nibbles(&hex::decode(s).unwrap())
    }

    fn leaf_circuit(remaining: usize) -> LeafCircuit {
        let key = nibbles(KEY);
        LeafCircuit {
            key: key[key.len() - remaining..].to_vec(),
            value: nibbles(VALUE),
            rlp: nibbles(LEAF),
            path_prefix_len: 2,
            expected_output: 4,
            expected_value_len: 42,
        }
    }

    #[test]
    fn test_leaf_check() {
        // the leaf sits below two branches: the first two key nibbles are consumed
        run_circuit::<F, D, C, _>(leaf_circuit(62));
    }

    #[test]
    fn test_leaf_check_corrupted() {
        // wrong key nibble: the key check fails
        let mut circuit = leaf_circuit(62);
        circuit.key[10] ^= 1;
        circuit.expected_output = 3;
        run_circuit::<F, D, C, _>(circuit);

        // wrong value nibble: the value check fails
        let mut circuit = leaf_circuit(62);
        circuit.value[5] ^= 1;
        circuit.expected_output = 3;
        run_circuit::<F, D, C, _>(circuit);

        // wrong path flag: both the flag and the key checks fail
        let mut circuit = leaf_circuit(62);
        circuit.path_prefix_len = 1;
        circuit.expected_output = 2;
        run_circuit::<F, D, C, _>(circuit);
    }
}
