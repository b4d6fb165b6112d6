use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::float::Float;

use super::Tape;

impl<F: Float + Serialize> Serialize for Tape<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Tape", 4)?;
        s.serialize_field("opcodes", &self.opcodes)?;
        s.serialize_field("locations", &self.locations)?;
        s.serialize_field("values", &self.values)?;
        s.serialize_field("num_locations", &self.stats.num_locations)?;
        s.end()
    }
}

/// Deserialization re-validates the streams, so a corrupted payload is
/// rejected here instead of aborting a later sweep.
impl<'de, F: Float + Deserialize<'de>> Deserialize<'de> for Tape<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct TapeData<F> {
            opcodes: Vec<u8>,
            locations: Vec<u32>,
            values: Vec<F>,
            num_locations: usize,
        }

        let data = TapeData::<F>::deserialize(deserializer)?;
        Tape::from_streams(data.opcodes, data.locations, data.values, data.num_locations)
            .map_err(serde::de::Error::custom)
    }
}
