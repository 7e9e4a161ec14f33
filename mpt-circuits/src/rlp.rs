//! Oblivious RLP decoding over nibble buffers.
//!
//! A list is parsed field by field: the buffer is shifted so the field prefix
//! sits at the front, the prefix is classified, and the buffer is shifted again
//! so the payload sits at the front. The sizes of every buffer and every shift
//! range come from a [`ParserSchema`], never from the data.
use anyhow::{ensure, Result};
use log::debug;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::target::{BoolTarget, Target},
    plonk::circuit_builder::CircuitBuilder,
};

use crate::{
    mux::select_at,
    shift::shift_left,
    utils::{blend, equal_const, less_than, less_than_const, log_ceil},
};

/// Number of hex digits above which an RLP item can use the long form,
/// i.e. more than 55 bytes of payload.
const MAX_SHORT_HEX_LEN: usize = 110;

/// Classification of the first byte of an RLP list.
#[derive(Clone, Debug)]
pub struct ArrayPrefix {
    pub is_big: BoolTarget,
    /// Length of the payload in hex when the list is short, length of the
    /// length-of-length digits otherwise.
    pub prefix_or_total_hex_len: Target,
    pub is_valid: BoolTarget,
}

/// Classification of the first byte of an RLP item inside a list.
#[derive(Clone, Debug)]
pub struct FieldPrefix {
    pub is_big: BoolTarget,
    pub is_literal: BoolTarget,
    pub prefix_or_total_hex_len: Target,
    pub is_valid: BoolTarget,
    pub is_empty_list: BoolTarget,
}

fn prefix_value<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    in0: Target,
    in1: Target,
) -> Target {
    b.mul_const_add(F::from_canonical_u8(16), in0, in1)
}

/// Classifies the two nibbles of a list prefix.
pub fn array_prefix<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    in0: Target,
    in1: Target,
) -> ArrayPrefix {
    let below_list = less_than_const(b, in0, 12, 4);
    let is_valid = b.not(below_list);

    let in0_is_f = equal_const(b, in0, 15);
    let in1_small = less_than_const(b, in1, 8, 4);
    let in1_big = b.not(in1_small);
    let is_big = b.and(in0_is_f, in1_big);

    // 2 * (prefix - 0xc0) - 110 * is_big
    let prefix = prefix_value(b, in0, in1);
    let doubled = b.mul_const(F::TWO, prefix);
    let shifted = b.add_const(doubled, -F::from_canonical_usize(2 * 0xc0));
    let correction = b.mul_const(F::from_canonical_usize(MAX_SHORT_HEX_LEN), is_big.target);
    let hex_len = b.sub(shifted, correction);
    let prefix_or_total_hex_len = b.mul(is_valid.target, hex_len);

    ArrayPrefix {
        is_big,
        prefix_or_total_hex_len,
        is_valid,
    }
}

/// Classifies the two nibbles of an item prefix.
pub fn field_prefix<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    in0: Target,
    in1: Target,
) -> FieldPrefix {
    let is_literal = less_than_const(b, in0, 8, 4);

    let in0_is_b = equal_const(b, in0, 11);
    let in1_small = less_than_const(b, in1, 8, 4);
    let in1_big = b.not(in1_small);
    let is_big = b.and(in0_is_b, in1_big);

    let in0_is_c = equal_const(b, in0, 12);
    let in1_is_zero = equal_const(b, in1, 0);
    let is_empty_list = b.and(in0_is_c, in1_is_zero);

    // 2 * (prefix - 0x80) - 110 * is_big
    let prefix = prefix_value(b, in0, in1);
    let doubled = b.mul_const(F::TWO, prefix);
    let shifted = b.add_const(doubled, -F::from_canonical_usize(2 * 0x80));
    let correction = b.mul_const(F::from_canonical_usize(MAX_SHORT_HEX_LEN), is_big.target);
    let hex_len = b.sub(shifted, correction);
    let not_empty = b.not(is_empty_list);
    let not_literal = b.not(is_literal);
    let has_prefix = b.and(not_empty, not_literal);
    let prefix_or_total_hex_len = b.mul(has_prefix.target, hex_len);

    let below_list = less_than_const(b, in0, 12, 4);
    let is_valid = b.or(below_list, is_empty_list);

    FieldPrefix {
        is_big,
        is_literal,
        prefix_or_total_hex_len,
        is_valid,
        is_empty_list,
    }
}

/// Shape of the lists a parser accepts. Every dimension is in hex digits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParserSchema {
    pub max_hex_len: usize,
    pub max_fields: usize,
    pub array_prefix_max_hex_len: usize,
    pub field_min_hex_len: Vec<usize>,
    pub field_max_hex_len: Vec<usize>,
}

/// A decoded item: the payload left aligned in a buffer of the schema's
/// `max_hex_len`, and its length in hex.
#[derive(Clone, Debug)]
pub struct ParsedField {
    pub nibbles: Vec<Target>,
    pub len: Target,
}

/// Result of parsing a list.
#[derive(Clone, Debug)]
pub struct RlpCheck {
    /// True when every prefix is well formed and the field lengths add up to
    /// the list length.
    pub out: BoolTarget,
    /// Length of the whole encoding, list prefix included.
    pub total_hex_len: Target,
    pub fields: Vec<ParsedField>,
}

/// Number of length digits a field of at most `max_hex_len` digits can carry.
pub const fn length_prefix_max_hex_len(max_hex_len: usize) -> usize {
    (log_ceil(max_hex_len) / 8 + 1) * 2
}

/// Upper bound of the shift skipping a prefix of at most `2 + len_digits`
/// digits. Short items only ever skip the two prefix digits.
const fn prefix_shift_bound(max_hex_len: usize, len_digits: usize) -> usize {
    if max_hex_len > MAX_SHORT_HEX_LEN {
        len_digits + 2
    } else {
        len_digits
    }
}

impl ParserSchema {
    pub fn new(
        max_hex_len: usize,
        max_fields: usize,
        array_prefix_max_hex_len: usize,
        field_min_hex_len: Vec<usize>,
        field_max_hex_len: Vec<usize>,
    ) -> Result<Self> {
        ensure!(max_fields > 0, "a list needs at least one field");
        ensure!(
            field_min_hex_len.len() == max_fields && field_max_hex_len.len() == max_fields,
            "field bounds must have {} entries, got {} and {}",
            max_fields,
            field_min_hex_len.len(),
            field_max_hex_len.len()
        );
        ensure!(
            field_min_hex_len
                .iter()
                .zip(field_max_hex_len.iter())
                .all(|(min, max)| min <= max),
            "field minimum length above its maximum"
        );
        ensure!(
            array_prefix_max_hex_len > 0 && array_prefix_max_hex_len % 2 == 0,
            "array prefix length must be a positive number of bytes"
        );
        let widest_prefix = field_max_hex_len
            .iter()
            .map(|max| length_prefix_max_hex_len(*max))
            .chain(std::iter::once(array_prefix_max_hex_len))
            .max()
            .unwrap_or_default();
        ensure!(
            max_hex_len >= 2 + widest_prefix,
            "buffer of {} nibbles can't hold a prefix of {} nibbles",
            max_hex_len,
            widest_prefix + 2
        );
        Ok(Self {
            max_hex_len,
            max_fields,
            array_prefix_max_hex_len,
            field_min_hex_len,
            field_max_hex_len,
        })
    }

    /// Parses `input` as a list with exactly `max_fields` items.
    pub fn check_array<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        input: &[Target],
    ) -> RlpCheck {
        self.check(b, input, None)
    }

    /// Parses `input` as a list holding the first `fields_num <= max_fields`
    /// items of the schema. Absent items are reported with a zero length and
    /// don't take part in the length check.
    pub fn check_header<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        input: &[Target],
        fields_num: Target,
    ) -> RlpCheck {
        self.check(b, input, Some(fields_num))
    }

    fn check<F: RichField + Extendable<D>, const D: usize>(
        &self,
        b: &mut CircuitBuilder<F, D>,
        input: &[Target],
        fields_num: Option<Target>,
    ) -> RlpCheck {
        assert_eq!(input.len(), self.max_hex_len, "input doesn't fit the schema");
        debug!(
            "[+] RLP parser: {} nibbles, {} fields, max field lengths {:?}",
            self.max_hex_len, self.max_fields, self.field_max_hex_len
        );
        let zero = b.zero();
        let one = b.one();
        let two = b.two();

        let prefix = array_prefix(b, input[0], input[1]);
        let mut check = prefix.is_valid.target;

        let array_digits = length_digits(b, &input[2..2 + self.array_prefix_max_hex_len]);
        let array_prefix1_hex_len = b.mul(prefix.is_big.target, prefix.prefix_or_total_hex_len);
        let array_len_selector = {
            let tmp = b.sub(array_prefix1_hex_len, one);
            b.mul(prefix.is_big.target, tmp)
        };
        let array_len = select_at(b, array_len_selector, &array_digits);
        let total_array_hex_len = {
            let doubled = b.mul_const(F::TWO, array_len);
            blend(b, prefix.is_big.target, doubled, prefix.prefix_or_total_hex_len)
        };
        let total_hex_len = b.add_many([two, array_prefix1_hex_len, total_array_hex_len]);

        // fields_num < 2^bits when valid, the comparison fails otherwise
        let count_bits = log_ceil(self.max_fields);
        let mut len_sum = zero;
        let mut fields: Vec<ParsedField> = Vec::with_capacity(self.max_fields);
        for idx in 0..self.max_fields {
            let field_start = match fields.last() {
                None => {
                    let shift = b.add(two, array_prefix1_hex_len);
                    let bound = prefix_shift_bound(self.max_hex_len, self.array_prefix_max_hex_len);
                    shift_left(b, input, 0, bound, shift)
                }
                Some(prev) => shift_left(
                    b,
                    &prev.nibbles,
                    self.field_min_hex_len[idx - 1],
                    self.field_max_hex_len[idx - 1],
                    prev.len,
                ),
            };

            let fp = field_prefix(b, field_start[0], field_start[1]);
            let prefix1_hex_len = b.mul(fp.is_big.target, fp.prefix_or_total_hex_len);
            let len_digits = length_prefix_max_hex_len(self.field_max_hex_len[idx]);

            // literals carry their payload in the prefix byte itself
            let to_payload = {
                let full = b.add(two, prefix1_hex_len);
                blend(b, fp.is_literal.target, zero, full)
            };
            let bound = prefix_shift_bound(self.field_max_hex_len[idx], len_digits);
            let payload = shift_left(b, &field_start, 0, bound, to_payload);

            let digits = length_digits(b, &field_start[2..2 + len_digits]);
            let selector = {
                let tmp = b.sub(prefix1_hex_len, one);
                b.mul(fp.is_big.target, tmp)
            };
            let declared = select_at(b, selector, &digits);
            let field_temp = {
                let doubled = b.mul_const(F::TWO, declared);
                blend(b, fp.is_big.target, doubled, fp.prefix_or_total_hex_len)
            };
            let field_len = blend(b, fp.is_literal.target, two, field_temp);

            // 2 - 2 * is_literal + prefix1 + field_len
            let prefix_len = b.mul_const_add(-F::TWO, fp.is_literal.target, two);
            let encoded_len = b.add_many([prefix_len, prefix1_hex_len, field_len]);

            let (field_len, encoded_len, is_valid) = match fields_num {
                None => (field_len, encoded_len, fp.is_valid.target),
                Some(num) => {
                    let idx_target = b.constant(F::from_canonical_usize(idx));
                    let present = less_than(b, idx_target, num, count_bits + 1);
                    let absent = b.not(present);
                    let valid = b.or(fp.is_valid, absent);
                    (
                        b.mul(present.target, field_len),
                        b.mul(present.target, encoded_len),
                        valid.target,
                    )
                }
            };
            check = b.add(check, is_valid);
            len_sum = b.add(len_sum, encoded_len);
            fields.push(ParsedField {
                nibbles: payload,
                len: field_len,
            });
        }

        let len_check = b.is_equal(total_array_hex_len, len_sum);
        let sum = b.add(check, len_check.target);
        let expected = b.constant(F::from_canonical_usize(self.max_fields + 2));
        let out = b.is_equal(sum, expected);

        RlpCheck {
            out,
            total_hex_len,
            fields,
        }
    }
}

/// Running base 16 accumulation: entry j is the number formed by the first
/// j + 1 digits.
fn length_digits<F: RichField + Extendable<D>, const D: usize>(
    b: &mut CircuitBuilder<F, D>,
    digits: &[Target],
) -> Vec<Target> {
    let sixteen = F::from_canonical_u8(16);
    let mut acc = b.zero();
    digits
        .iter()
        .map(|d| {
            acc = b.mul_const_add(sixteen, acc, *d);
            acc
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::{array_prefix, field_prefix, ParserSchema};
    use crate::{
        array::new_nibble_vector,
        utils::{bytes_to_nibbles, IntTargetWriter},
        C, D, F,
    };
    use mpt_test::log::init_logging;
    use plonky2::{
        field::types::{Field, PrimeField64},
        iop::witness::{PartialWitness, WitnessWrite},
        plonk::{circuit_builder::CircuitBuilder, circuit_data::CircuitConfig},
    };
    use rand::{thread_rng, Rng};
    use rlp::RlpStream;

    #[test]
    fn test_prefix_classifiers() {
        let config = CircuitConfig::standard_recursion_config();
        let mut b = CircuitBuilder::<F, D>::new(config);
        let in0 = b.add_virtual_target();
        let in1 = b.add_virtual_target();
        let array = array_prefix(&mut b, in0, in1);
        let field = field_prefix(&mut b, in0, in1);
        b.register_public_inputs(&[
            array.is_big.target,
            array.prefix_or_total_hex_len,
            array.is_valid.target,
            field.is_big.target,
            field.is_literal.target,
            field.prefix_or_total_hex_len,
            field.is_valid.target,
        ]);
        let data = b.build::<C>();

        // (byte, array: big, len, valid, field: big, literal, len, valid)
        let cases: [(u8, [u64; 7]); 7] = [
            (0x05, [0, 0, 0, 0, 1, 0, 1]),
            (0x80, [0, 0, 0, 0, 0, 0, 1]),
            (0xa0, [0, 0, 0, 0, 0, 64, 1]),
            (0xb9, [0, 0, 0, 1, 0, 4, 1]),
            (0xc0, [0, 0, 1, 0, 0, 0, 1]),
            (0xf7, [0, 110, 1, 0, 0, 0, 0]),
            (0xf9, [1, 4, 1, 0, 0, 0, 0]),
        ];
        for (byte, expected) in cases {
            let mut pw = PartialWitness::new();
            pw.set_target(in0, F::from_canonical_u8(byte >> 4));
            pw.set_target(in1, F::from_canonical_u8(byte & 0x0f));
            let proof = data.prove(pw).unwrap();
            let got = proof
                .public_inputs
                .iter()
                .map(|x| x.to_canonical_u64())
                .collect::<Vec<_>>();
            // the field length is meaningless for list prefixes
            let relevant = if byte >= 0xc1 { 5 } else { 7 };
            assert_eq!(got[..relevant], expected[..relevant], "prefix {:#x}", byte);
        }
    }

    /// Parses `encoded` with `schema` and checks the decoded fields against
    /// `items`. Returns the parser output.
    fn parse(schema: &ParserSchema, encoded: &[u8], items: &[Vec<u8>], fields_num: Option<usize>) -> bool {
        let config = CircuitConfig::standard_recursion_config();
        let mut b = CircuitBuilder::<F, D>::new(config);
        let input = new_nibble_vector(&mut b, schema.max_hex_len);
        let num = b.add_virtual_target();
        let check = match fields_num {
            Some(_) => schema.check_header(&mut b, &input, num),
            None => schema.check_array(&mut b, &input),
        };
        b.register_public_input(check.out.target);
        b.register_public_input(check.total_hex_len);
        for field in check.fields.iter() {
            b.register_public_input(field.len);
            b.register_public_inputs(&field.nibbles[..8]);
        }
        let data = b.build::<C>();

        let mut nibbles = bytes_to_nibbles(encoded);
        nibbles.resize(schema.max_hex_len, 0);
        let mut pw = PartialWitness::new();
        pw.set_int_targets(&input, &nibbles);
        pw.set_target(num, F::from_canonical_usize(fields_num.unwrap_or_default()));
        let proof = data.prove(pw).unwrap();
        let pi = &proof.public_inputs;
        let out = pi[0] == F::ONE;
        if out {
            assert_eq!(pi[1], F::from_canonical_usize(encoded.len() * 2));
            for (i, item) in items.iter().enumerate() {
                let offset = 2 + i * 9;
                let item_nibbles = bytes_to_nibbles(item);
                assert_eq!(pi[offset], F::from_canonical_usize(item_nibbles.len()));
                for (got, exp) in pi[offset + 1..offset + 9].iter().zip(item_nibbles.iter()) {
                    assert_eq!(*got, F::from_canonical_u8(*exp));
                }
            }
        }
        data.verify(proof).unwrap();
        out
    }

    fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
        let mut stream = RlpStream::new_list(items.len());
        for item in items {
            stream.append(item);
        }
        stream.out().to_vec()
    }

    #[test]
    fn test_parse_mixed_list() {
        init_logging();
        let mut rng = thread_rng();
        // literal, empty string, long string
        let items = vec![
            vec![0x05],
            vec![],
            (0..60).map(|_| rng.gen::<u8>()).collect::<Vec<_>>(),
        ];
        let encoded = encode_list(&items);
        // 0xf8 0x40 prefix
        assert_eq!(encoded.len(), 66);
        let schema = ParserSchema::new(160, 3, 4, vec![0, 0, 0], vec![2, 0, 120]).unwrap();
        assert!(parse(&schema, &encoded, &items, None));

        // wrong list length
        let mut corrupted = encoded.clone();
        corrupted[1] += 1;
        assert!(!parse(&schema, &corrupted, &items, None));
    }

    #[test]
    fn test_parse_leaf_node() {
        let leaf = hex::decode(
            "f7a0200decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e5639594bc50cbd395314a43302e3bf56677755e5a543a8c",
        )
        .unwrap();
        let items = rlp::decode_list::<Vec<u8>>(&leaf);
        assert_eq!(items.len(), 2);
        let schema = ParserSchema::new(140, 2, 4, vec![0, 0], vec![66, 66]).unwrap();
        assert!(parse(&schema, &leaf, &items, None));
    }

    #[test]
    fn test_parse_with_absent_fields() {
        let items = vec![vec![0xaa, 0xbb, 0xcc], vec![0x01], vec![0xde, 0xad]];
        let encoded = encode_list(&items);
        let schema = ParserSchema::new(40, 4, 2, vec![0; 4], vec![8; 4]).unwrap();
        assert!(parse(&schema, &encoded, &items, Some(3)));
        // all fields required but only three encoded
        assert!(!parse(&schema, &encoded, &items, Some(4)));
    }

    #[test]
    fn test_schema_validation() {
        assert!(ParserSchema::new(40, 2, 2, vec![0], vec![8, 8]).is_err());
        assert!(ParserSchema::new(40, 2, 2, vec![9, 0], vec![8, 8]).is_err());
        assert!(ParserSchema::new(4, 1, 4, vec![0], vec![2]).is_err());
        assert!(ParserSchema::new(40, 2, 3, vec![0, 0], vec![8, 8]).is_err());
    }
}
