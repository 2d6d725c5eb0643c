//! ONNX face-detector engine and per-session execution contexts.
//!
//! The crate is split into focused submodules:
//! - `binding`: immutable snapshot of the engine's I/O tensor metadata.
//! - `buffer`: host/device staging buffers sized from that snapshot.
//! - `engine`: engine build (TensorRT/CUDA/CPU provider chain) and context minting.
//! - `context`: per-session preprocessing, execution, and output parsing.
//! - `detection`: score thresholding and greedy non-maximum suppression.

pub use binding::{BindingCatalog, BindingInfo, DType, Dims};
pub use buffer::{BufferError, BufferManager, ManagedBufferPair, TransferBuffer};
pub use context::InferenceContext;
pub use detection::{iou, nms, threshold_pass, Detection, IOU_THRESHOLD};
pub use engine::{EngineError, InferenceEngine, InferenceParams};

mod binding;
mod buffer;
mod context;
mod detection;
mod engine;
