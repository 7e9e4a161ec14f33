use anyhow::Result;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::Target,
    plonk::circuit_builder::CircuitBuilder,
};

use super::{path_check, path_prefix_check, CheckResult, NODE_REF_HEX_LEN};
use crate::{
    array::prefix_equal,
    rlp::{length_prefix_max_hex_len, ParserSchema},
};

/// Checks an extension node `[hp(path), child hash]`: the path must be the
/// expected key fragment and the child the expected node reference. The
/// output is 4 on a valid node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionCheck {
    pub max_key_len: usize,
    schema: ParserSchema,
}

impl ExtensionCheck {
    pub fn new(max_key_len: usize) -> Result<Self> {
        let max_rlp_len = Self::max_rlp_hex_len(max_key_len);
        let schema = ParserSchema::new(
            max_rlp_len,
            2,
            length_prefix_max_hex_len(max_rlp_len),
            vec![0, 0],
            vec![max_key_len + 2, NODE_REF_HEX_LEN],
        )?;
        Ok(Self {
            max_key_len,
            schema,
        })
    }

    pub const fn max_rlp_hex_len(max_key_len: usize) -> usize {
        4 + (max_key_len + 2) + 2 + NODE_REF_HEX_LEN
    }

    pub fn rlp_hex_len(&self) -> usize {
        self.schema.max_hex_len
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        key_fragment: &[Target],
        key_fragment_len: Target,
        node_ref: &[Target],
        node_ref_len: Target,
        rlp: &[Target],
        path_prefix_len: Target,
    ) -> CheckResult {
        assert_eq!(key_fragment.len(), self.max_key_len);
        assert_eq!(node_ref.len(), NODE_REF_HEX_LEN);

        let parsed = self.schema.check_array(b, &rlp[..self.rlp_hex_len()]);
        let path = &parsed.fields[0];
        let child = &parsed.fields[1];

        let prefix_ok = path_prefix_check(b, path, path_prefix_len, 1, 0);
        let key_ok = path_check(b, path, path_prefix_len, key_fragment, key_fragment_len);

        let ref_ok = {
            let matched = prefix_equal(b, node_ref, &child.nibbles, NODE_REF_HEX_LEN, child.len);
            let same_len = b.is_equal(node_ref_len, child.len);
            b.and(matched, same_len)
        };

        let output = b.add_many([parsed.out.target, prefix_ok, key_ok, ref_ok.target]);
        CheckResult {
            output,
            rlp_total_len: parsed.total_hex_len,
        }
    }
}
