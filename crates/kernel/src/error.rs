/// A coordinate outside a structural range. Always a caller-contract
/// violation; never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoundsError {
    #[error("local coordinate ({x}, {y}, {z}) outside 0..16")]
    Local { x: i32, y: i32, z: i32 },
    #[error("column coordinate ({x}, {z}) outside 0..16")]
    Column { x: i32, z: i32 },
    #[error("height {y} outside 0..{limit}")]
    Height { y: i32, limit: i32 },
    #[error("section index {index} outside 0..{limit}")]
    Section { index: i32, limit: i32 },
}

/// Serialized chunk data that cannot be turned back into a column.
#[derive(Debug, thiserror::Error)]
pub enum ChunkDataError {
    #[error("CBOR encode error: {0}")]
    Encode(String),
    #[error("CBOR decode error: {0}")]
    Decode(String),
    #[error("section {index} holds {len} blocks, expected {expected}")]
    SectionLength {
        index: i32,
        len: usize,
        expected: usize,
    },
    #[error("{map} map holds {len} entries, expected {expected}")]
    MapLength {
        map: &'static str,
        len: usize,
        expected: usize,
    },
    #[error(transparent)]
    Bounds(#[from] BoundsError),
}

/// Terrain generation could not complete; the column was left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("chunk {x},{z} lies outside the addressable world")]
    OutOfWorld { x: i32, z: i32 },
    #[error("chunk {x},{z} is already generated")]
    AlreadyGenerated { x: i32, z: i32 },
    #[error(transparent)]
    Bounds(#[from] BoundsError),
}
