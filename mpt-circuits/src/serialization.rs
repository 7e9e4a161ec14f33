//! Serde helpers for fixed size arrays longer than the 32 elements serde
//! supports out of the box.

use serde::{
    de::{Error, SeqAccess, Visitor},
    ser::SerializeTuple,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{fmt, marker::PhantomData};

pub fn serialize_long_array<S, T, const N: usize>(
    arr: &[T; N],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    let mut tuple = serializer.serialize_tuple(N)?;
    for el in arr {
        tuple.serialize_element(el)?;
    }
    tuple.end()
}

struct LongArrayVisitor<T, const N: usize>(PhantomData<T>);

impl<'de, T: Deserialize<'de>, const N: usize> Visitor<'de> for LongArrayVisitor<T, N> {
    type Value = [T; N];

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "an array of length {}", N)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut elements = Vec::with_capacity(N);
        while let Some(el) = seq.next_element()? {
            elements.push(el);
        }
        let len = elements.len();
        elements
            .try_into()
            .map_err(|_| A::Error::invalid_length(len, &self))
    }
}

pub fn deserialize_long_array<'de, D, T, const N: usize>(deserializer: D) -> Result<[T; N], D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    deserializer.deserialize_tuple(N, LongArrayVisitor::<T, N>(PhantomData))
}
