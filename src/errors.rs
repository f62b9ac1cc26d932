use snafu::prelude::*;

/// Error type for all engine operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("expression has no operands"))]
    EmptyOperands,

    #[snafu(display(
        "shapes {lhs:?} and {rhs:?} are not broadcast-compatible",
    ))]
    BroadcastMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[snafu(display(
        "operand buffer has {got} elements, shape {shape:?} needs {expected}",
    ))]
    ShapeLenMismatch { shape: Vec<usize>, expected: usize, got: usize },

    #[snafu(display("axis {axis} is out of range for a {ndim}-dimensional array"))]
    InvalidAxis { axis: usize, ndim: usize },

    #[snafu(display("cannot reduce zero elements with '{op}': no identity element"))]
    EmptyReduction { op: String },

    #[snafu(display("a one-branch filter mask cannot be combined with a reduction"))]
    FilterMaskWithReduction,

    #[snafu(display("mask branches are already attached to this expression"))]
    MaskAlreadySet,

    #[snafu(display("output target is already attached to this expression"))]
    OutputAlreadySet,

    #[snafu(display("{what} is not implemented"))]
    NotImplemented { what: String },

    #[snafu(display("operation '{op}' is not defined for dtype {dtype}"))]
    BadOperandDtype { op: String, dtype: String },

    #[snafu(display("chunk index {index} out of range ({count} chunks)"))]
    ChunkOutOfBounds { index: usize, count: usize },

    #[snafu(display("region {region:?} exceeds array shape {shape:?}"))]
    RegionOutOfBounds { region: Vec<(usize, usize)>, shape: Vec<usize> },

    #[snafu(display(
        "chunk layout is invalid: shape {shape:?}, chunks {chunks:?}, blocks {blocks:?}: {reason}",
    ))]
    BadChunkLayout {
        shape: Vec<usize>,
        chunks: Vec<usize>,
        blocks: Vec<usize>,
        reason: String,
    },

    #[snafu(display("corrupt chunk frame: {reason}"))]
    CorruptFrame { reason: String },

    #[snafu(display("formula parse error at byte {pos}: {reason}"))]
    FormulaParse { pos: usize, reason: String },

    #[snafu(display("formula references unknown identifier '{name}'"))]
    UnknownIdentifier { name: String },

    #[snafu(display("formula calls disallowed function '{name}'"))]
    UnknownFunction { name: String },

    #[snafu(display("expression slot '{slot}' resolves to no declared operand"))]
    UnboundSlot { slot: usize },

    #[snafu(display("operand '{name}' has no storage location and cannot be persisted"))]
    MissingLocation { name: String },

    #[snafu(display("user-defined functions cannot be persisted"))]
    UdfNotSerializable,

    #[snafu(display("array at '{path}' carries no expression artifact"))]
    NoArtifact { path: String },

    #[snafu(display("no resolver can open remote operand '{path}' (base '{base}')"))]
    UnresolvableRemote { path: String, base: String },

    #[snafu(display("prefetch pipeline failed: {reason}"))]
    PipelineFetch { reason: String },

    #[snafu(display("failed to build prefetch runtime: {source}"))]
    PipelineRuntime { source: std::io::Error },

    #[snafu(context(false))]
    Io { source: std::io::Error },

    #[snafu(context(false))]
    Json { source: serde_json::Error },
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

impl EngineError {
    pub fn not_implemented(what: impl Into<String>) -> Self {
        EngineError::NotImplemented { what: what.into() }
    }
}
