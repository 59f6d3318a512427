use crate::array::LabeledArray;
use crate::engine::Engine;
use crate::error::RechunkError;
use crate::key::Key;

/// Trait for transforms over keyed chunk collections.
///
/// This forms the contract between pipelines and the engine executing them. Implementations
/// must be pure functions of their input records so that an engine may retry any part of them.
pub trait Transform<C: LabeledArray>: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Apply the transform.
    ///
    /// Returns the transformed collection of records.
    ///
    /// # Arguments
    ///
    /// * `engine`: Engine executing the transform
    /// * `records`: Collection of (Key, chunk) pairs to transform
    fn apply<E: Engine>(
        &self,
        engine: &E,
        records: Vec<(Key, C)>,
    ) -> Result<Vec<(Key, C)>, RechunkError>;
}

/// Composition of two transforms, applied in order.
pub struct Then<A, B> {
    first: A,
    second: B,
}

impl<A, B> Then<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<C, A, B> Transform<C> for Then<A, B>
where
    C: LabeledArray,
    A: Transform<C>,
    B: Transform<C>,
{
    fn name(&self) -> &'static str {
        "then"
    }

    fn apply<E: Engine>(
        &self,
        engine: &E,
        records: Vec<(Key, C)>,
    ) -> Result<Vec<(Key, C)>, RechunkError> {
        let records = self.first.apply(engine, records)?;
        self.second.apply(engine, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Dataset;
    use crate::engine::DirectEngine;
    use crate::key::JsonKeyCoder;
    use crate::test_utils;

    use std::sync::Arc;

    /// Adds a fixed amount to every x offset.
    struct ShiftX(usize);

    impl<C: LabeledArray> Transform<C> for ShiftX {
        fn name(&self) -> &'static str {
            "shift_x"
        }

        fn apply<E: Engine>(
            &self,
            engine: &E,
            records: Vec<(Key, C)>,
        ) -> Result<Vec<(Key, C)>, RechunkError> {
            let shift = self.0;
            engine.flat_map(records, move |(key, chunk)| {
                let offset = key.offset("x") + shift;
                Ok(vec![(key.with_offset("x", Some(offset)), chunk)])
            })
        }
    }

    #[test]
    fn then_applies_in_order() {
        let engine = DirectEngine::new(Arc::new(JsonKeyCoder));
        let ds = test_utils::arange_dataset(&[("x", 2)]);
        let records: Vec<(Key, Dataset<i32>)> = vec![(Key::new(), ds)];
        let result = Then::new(ShiftX(1), ShiftX(2)).apply(&engine, records).unwrap();
        assert_eq!(3, result[0].0.offset("x"));
    }
}
