//! Zarr V3 encoding of slice variables.
//!
//! A variable of one init time is an array of shape `[1, steps, spatial...]`
//! rooted at its slice prefix. Arrays are encoded into an in-memory store
//! and the resulting objects uploaded as-is, so the persisted layout is a
//! plain Zarr V3 hierarchy any Zarr reader can open.

use std::sync::Arc;

use bytes::Bytes;
use nwp_common::{CanonicalDataset, VariableKey, STEP_DIMENSION, TIME_DIMENSION};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::store::MemoryStore;
use zarrs::storage::{
    ListableStorageTraits, ReadableStorageTraits, StoreKey, WritableStorageTraits,
};

use crate::config::Compression;
use crate::error::{Result, StoreError};
use crate::schema::FrozenSchema;

/// Objects of one encoded array, keyed relative to the array root.
#[derive(Debug, Clone, Default)]
pub struct EncodedArray {
    pub objects: Vec<(String, Bytes)>,
}

impl EncodedArray {
    pub fn bytes(&self) -> u64 {
        self.objects.iter().map(|(_, b)| b.len() as u64).sum()
    }
}

/// Array shape of a slice variable.
pub fn slice_shape(steps: usize, spatial: &[usize]) -> Vec<u64> {
    std::iter::once(1)
        .chain(std::iter::once(steps))
        .chain(spatial.iter().copied())
        .map(|n| n as u64)
        .collect()
}

/// Encode one variable of a dataset with the schema's chunking and codec.
pub fn encode_variable(
    schema: &FrozenSchema,
    dataset: &CanonicalDataset,
    key: &VariableKey,
) -> Result<EncodedArray> {
    let variable = dataset
        .variable(key.as_str())
        .ok_or_else(|| StoreError::NotFound(format!("variable {} in dataset", key)))?;

    let spatial = dataset.grid().shape();
    let shape = slice_shape(dataset.steps().len(), &spatial);
    let extent: Vec<usize> = shape.iter().map(|n| *n as usize).collect();

    let mut dimensions = vec![TIME_DIMENSION, STEP_DIMENSION];
    dimensions.extend_from_slice(dataset.grid().dimension_names());

    let mut attrs = serde_json::Map::new();
    attrs.insert("_ARRAY_DIMENSIONS".to_string(), serde_json::json!(dimensions));
    attrs.insert("variable".to_string(), serde_json::json!(key.as_str()));
    attrs.insert("units".to_string(), serde_json::json!(variable.units));
    attrs.insert(
        "init_time".to_string(),
        serde_json::json!(dataset.init_time().datetime().to_rfc3339()),
    );
    attrs.insert(
        "step_minutes".to_string(),
        serde_json::json!(dataset
            .steps()
            .iter()
            .map(|s| s.minutes())
            .collect::<Vec<_>>()),
    );
    attrs.insert("crs".to_string(), serde_json::json!(dataset.grid().crs()));

    let chunk_grid: zarrs::array::ChunkGrid = schema
        .chunking
        .chunk_shape(&extent)
        .try_into()
        .map_err(|e| StoreError::config(format!("{:?}", e)))?;

    let store = Arc::new(MemoryStore::new());

    let mut binding = ArrayBuilder::new(
        shape.clone(),
        DataType::Float32,
        chunk_grid,
        FillValue::from(f32::NAN),
    );
    let mut builder = binding.attributes(attrs);
    if let Some(codec) = compression_codec(schema.compression, schema.compression_level)? {
        builder = builder.bytes_to_bytes_codecs(vec![codec]);
    }
    let array = builder.build(store.clone(), "/").map_err(StoreError::zarr)?;

    array.store_metadata().map_err(StoreError::zarr)?;

    let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)
        .map_err(StoreError::zarr)?;
    array
        .store_array_subset_elements(&subset, &variable.values)
        .map_err(StoreError::zarr)?;

    let mut objects = Vec::new();
    for store_key in store.list().map_err(StoreError::zarr)? {
        if let Some(data) = store.get(&store_key).map_err(StoreError::zarr)? {
            objects.push((store_key.as_str().to_string(), Bytes::copy_from_slice(&data)));
        }
    }
    objects.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(EncodedArray { objects })
}

/// Decode an array from its objects, checking its shape.
pub fn decode_variable(encoded: EncodedArray, expected_shape: &[u64]) -> Result<Vec<f32>> {
    let store = Arc::new(MemoryStore::new());
    for (key, data) in encoded.objects {
        let store_key = StoreKey::new(key).map_err(StoreError::zarr)?;
        store
            .set(&store_key, data.into())
            .map_err(StoreError::zarr)?;
    }

    let array = Array::open(store, "/").map_err(StoreError::zarr)?;
    if array.shape() != expected_shape {
        return Err(StoreError::zarr(format!(
            "array shape {:?} does not match expected {:?}",
            array.shape(),
            expected_shape
        )));
    }

    let subset =
        ArraySubset::new_with_start_shape(vec![0; expected_shape.len()], expected_shape.to_vec())
            .map_err(StoreError::zarr)?;
    array
        .retrieve_array_subset_elements::<f32>(&subset)
        .map_err(StoreError::zarr)
}

fn compression_codec(
    compression: Compression,
    level: u8,
) -> Result<Option<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>>> {
    let compressor = match compression {
        Compression::None => return Ok(None),
        Compression::BloscLz4 => BloscCompressor::LZ4,
        Compression::BloscZstd => BloscCompressor::Zstd,
    };

    let level = BloscCompressionLevel::try_from(level)
        .map_err(|_| StoreError::config("Invalid compression level"))?;

    // typesize is required when shuffle is enabled
    let codec = BloscCodec::new(compressor, level, None, BloscShuffleMode::Shuffle, Some(4))
        .map_err(|e| StoreError::config(e.to_string()))?;

    Ok(Some(Arc::new(codec)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use nwp_common::{is_missing, DataVariable};
    use std::collections::BTreeMap;
    use test_utils::{grids, hours, init_times, make_dataset};

    fn schema_for(dataset: &CanonicalDataset, compression: Compression) -> FrozenSchema {
        let mut config = StoreConfig::new("noaa-gfs");
        config.compression = compression;
        config.chunking.spatial = 2;
        FrozenSchema::from_dataset(&config, dataset)
    }

    #[test]
    fn test_encode_decode_preserves_values() {
        let grid = grids::small_latlon();
        let ds = make_dataset(init_times::t0(), &[0, 3], &["temperature_sl"], &grid);
        let key = VariableKey::new("temperature_sl").unwrap();

        for compression in [Compression::None, Compression::BloscLz4, Compression::BloscZstd] {
            let schema = schema_for(&ds, compression);
            let encoded = encode_variable(&schema, &ds, &key).unwrap();
            assert!(encoded.objects.iter().any(|(k, _)| k == "zarr.json"));

            let shape = slice_shape(2, &grid.shape());
            let values = decode_variable(encoded, &shape).unwrap();
            assert_eq!(values, ds.variable("temperature_sl").unwrap().values);
        }
    }

    #[test]
    fn test_missing_values_round_trip() {
        let grid = grids::small_latlon();
        let points = grid.points();
        let mut values = vec![f32::NAN; 2 * points];
        values[0] = 1.5;
        let mut variables = BTreeMap::new();
        variables.insert(
            VariableKey::new("relative_humidity_sl").unwrap(),
            DataVariable::new("%", values),
        );
        let ds = CanonicalDataset::try_new(init_times::t0(), hours(&[0, 1]), grid.clone(), variables)
            .unwrap();
        let key = VariableKey::new("relative_humidity_sl").unwrap();
        let schema = schema_for(&ds, Compression::BloscZstd);

        let encoded = encode_variable(&schema, &ds, &key).unwrap();
        let decoded = decode_variable(encoded, &slice_shape(2, &grid.shape())).unwrap();

        assert_eq!(decoded[0], 1.5);
        assert!(decoded[1..].iter().all(|v| is_missing(*v)));
    }

    #[test]
    fn test_metadata_carries_dimensions() {
        let grid = grids::small_projected();
        let ds = make_dataset(init_times::t0(), &[0], &["temperature_sl"], &grid);
        let key = VariableKey::new("temperature_sl").unwrap();
        let encoded = encode_variable(&schema_for(&ds, Compression::None), &ds, &key).unwrap();

        let metadata = &encoded
            .objects
            .iter()
            .find(|(k, _)| k == "zarr.json")
            .unwrap()
            .1;
        let json: serde_json::Value = serde_json::from_slice(metadata).unwrap();
        assert_eq!(
            json["attributes"]["_ARRAY_DIMENSIONS"],
            serde_json::json!(["init_time", "step", "y", "x"])
        );
        assert_eq!(json["shape"], serde_json::json!([1, 1, 5, 6]));
        assert_eq!(json["attributes"]["step_minutes"], serde_json::json!([0]));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let grid = grids::small_latlon();
        let ds = make_dataset(init_times::t0(), &[0], &["temperature_sl"], &grid);
        let key = VariableKey::new("temperature_sl").unwrap();
        let encoded = encode_variable(&schema_for(&ds, Compression::None), &ds, &key).unwrap();

        assert!(decode_variable(encoded, &slice_shape(3, &grid.shape())).is_err());
    }
}
