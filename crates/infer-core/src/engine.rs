use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::tensor::TensorElementType;
use ort::value::ValueType;
use thiserror::Error;
use tracing::{debug, info};

use crate::binding::{BindingCatalog, BindingInfo, DType, Dims};
use crate::buffer::{read_f32, write_f32, BufferError, BufferManager};
use crate::context::InferenceContext;

/// TensorRT builder workspace cap.
const WORKSPACE_LIMIT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model file {name:?} not found under the configured data directories")]
    ModelNotFound { name: String },
    #[error("failed to build inference engine")]
    Build(#[source] anyhow::Error),
    #[error("unexpected engine I/O layout: {0}")]
    Layout(String),
    #[error("failed to create execution context")]
    ContextCreate(#[source] anyhow::Error),
    #[error(transparent)]
    Allocation(#[from] BufferError),
    #[error("inference execution failed")]
    Execute(#[source] anyhow::Error),
    #[error("invalid inference input: {0}")]
    Input(String),
}

/// Build-time and detection parameters for the UltraFace engine.
#[derive(Debug, Clone)]
pub struct InferenceParams {
    /// Directories searched for the model file, in order.
    pub data_dirs: Vec<PathBuf>,
    pub onnx_file_name: String,
    pub input_tensor_names: Vec<String>,
    /// Output tensor names; the first is the score tensor, the second the
    /// box tensor.
    pub output_tensor_names: Vec<String>,
    pub fp16: bool,
    pub int8: bool,
    pub dla_core: Option<i32>,
    /// Extra batch factor for buffer sizing; 0 means the batch dimension is
    /// already explicit in the binding dimensions.
    pub batch_size: usize,
    /// Per-channel preprocessing means in BGR order.
    pub preprocessing_means: [f32; 3],
    pub preprocessing_norm: f32,
    pub detection_threshold: f32,
    pub num_classes: usize,
    /// Class index scored against the detection threshold.
    pub detection_class: usize,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            data_dirs: vec![PathBuf::from("data/ultraface/")],
            onnx_file_name: "ultraFace-RFB-320.onnx".into(),
            input_tensor_names: vec!["input".into()],
            output_tensor_names: vec!["scores".into(), "boxes".into()],
            fp16: false,
            int8: false,
            dla_core: None,
            batch_size: 0,
            preprocessing_means: [127.0, 127.0, 127.0],
            preprocessing_norm: 128.0,
            detection_threshold: 0.9,
            num_classes: 2,
            detection_class: 1,
        }
    }
}

/// The shared GPU inference engine.
///
/// Built once at startup and immutable afterwards; sessions obtain cheap,
/// exclusively owned [`InferenceContext`]s through [`Self::inference_context`].
pub struct InferenceEngine {
    session: Mutex<Session>,
    catalog: Arc<BindingCatalog>,
    params: InferenceParams,
    input_dims: Dims,
    prior_count: usize,
    class_count: usize,
}

impl InferenceEngine {
    /// Parse the ONNX model and build the engine.
    ///
    /// The TensorRT provider carries the precision flags, the workspace cap,
    /// and the DLA core selection; CUDA and CPU providers are registered as
    /// fallbacks. Returns an error when the model is missing, the build
    /// fails, or the I/O layout is not the expected one input of rank 4 and
    /// four outputs.
    pub fn build(params: InferenceParams) -> Result<Self, EngineError> {
        let model_path = locate_model(&params.onnx_file_name, &params.data_dirs)?;
        info!(model = %model_path.display(), fp16 = params.fp16, int8 = params.int8, "building inference engine");

        let mut tensorrt = TensorRTExecutionProvider::default()
            .with_max_workspace_size(WORKSPACE_LIMIT_BYTES)
            .with_fp16(params.fp16)
            .with_int8(params.int8);
        if let Some(core) = params.dla_core {
            tensorrt = tensorrt.with_dla_core(core as u32);
        }

        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| {
                builder.with_execution_providers([
                    tensorrt.build(),
                    CUDAExecutionProvider::default().build(),
                    CPUExecutionProvider::default().build(),
                ])
            })
            .and_then(|builder| builder.commit_from_file(&model_path))
            .map_err(|err| EngineError::Build(anyhow!(err)))?;

        if session.inputs.len() != 1 {
            return Err(EngineError::Layout(format!(
                "expected exactly 1 input, engine reports {}",
                session.inputs.len()
            )));
        }
        if session.outputs.len() != 4 {
            return Err(EngineError::Layout(format!(
                "expected exactly 4 outputs, engine reports {}",
                session.outputs.len()
            )));
        }

        let mut bindings = Vec::with_capacity(session.inputs.len() + session.outputs.len());
        for input in &session.inputs {
            bindings.push(binding_info(&input.name, &input.input_type, true)?);
        }
        for output in &session.outputs {
            bindings.push(binding_info(&output.name, &output.output_type, false)?);
        }
        let catalog = Arc::new(BindingCatalog::new(bindings));

        let input_dims = catalog
            .get(0)
            .map(|info| info.dims.clone())
            .unwrap_or_default();
        if input_dims.len() != 4 {
            return Err(EngineError::Layout(format!(
                "expected input of rank 4, engine reports rank {}",
                input_dims.len()
            )));
        }

        let scores_name = params
            .output_tensor_names
            .first()
            .ok_or_else(|| EngineError::Layout("no score tensor configured".into()))?;
        let scores_index = catalog
            .index_of(scores_name)
            .ok_or_else(|| EngineError::Layout(format!("no binding named {scores_name:?}")))?;
        let scores_dims = catalog
            .get(scores_index)
            .map(|info| info.dims.clone())
            .unwrap_or_default();
        if scores_dims.len() != 3 {
            return Err(EngineError::Layout(format!(
                "score tensor {scores_name:?} has rank {}, expected [batch, priors, classes]",
                scores_dims.len()
            )));
        }
        let prior_count = scores_dims[1].max(0) as usize;
        let class_count = scores_dims[2].max(0) as usize;

        debug!(
            priors = prior_count,
            classes = class_count,
            bindings = catalog.len(),
            "engine I/O catalog captured"
        );

        Ok(Self {
            session: Mutex::new(session),
            catalog,
            params,
            input_dims,
            prior_count,
            class_count,
        })
    }

    pub fn catalog(&self) -> &Arc<BindingCatalog> {
        &self.catalog
    }

    pub fn params(&self) -> &InferenceParams {
        &self.params
    }

    /// Input dimensions as `(batch, channels, height, width)`.
    pub fn input_dims(&self) -> &Dims {
        &self.input_dims
    }

    pub fn input_width(&self) -> u32 {
        self.input_dims[3].max(0) as u32
    }

    pub fn input_height(&self) -> u32 {
        self.input_dims[2].max(0) as u32
    }

    /// Number of anchor priors the detector scores.
    pub fn prior_count(&self) -> usize {
        self.prior_count
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Mint a fresh execution context with its own buffer set.
    ///
    /// Creation is serialized on the engine because the underlying runtime
    /// does not guarantee reentrant context creation.
    pub fn inference_context(self: &Arc<Self>) -> Result<InferenceContext, EngineError> {
        let creation_guard = self
            .session
            .lock()
            .map_err(|_| EngineError::ContextCreate(anyhow!("engine lock poisoned")))?;
        let buffers = BufferManager::new(self.catalog.clone(), self.params.batch_size)?;
        drop(creation_guard);
        Ok(InferenceContext::new(self.clone(), buffers))
    }

    /// Run one synchronous inference over the ordered device bindings.
    ///
    /// Inputs are read from the device staging buffers and outputs written
    /// back to them; the caller owns the surrounding host↔device copies.
    pub(crate) fn execute(&self, buffers: &mut BufferManager) -> Result<(), EngineError> {
        let mut inputs: Vec<(String, SessionInputValue<'_>)> = Vec::new();
        for info in self.catalog.iter().filter(|info| info.is_input) {
            if info.dtype != DType::F32 {
                return Err(EngineError::Execute(anyhow!(
                    "unsupported input dtype for binding {:?}",
                    info.name
                )));
            }
            let bytes = buffers
                .device_buffer(&info.name)
                .ok_or_else(|| EngineError::Execute(anyhow!("missing buffer for {:?}", info.name)))?;
            let shape: Vec<usize> = info.dims.iter().map(|d| (*d).max(0) as usize).collect();
            let values = read_f32(bytes);
            let tensor = ort::value::Tensor::from_array((shape, values))
                .map_err(|err| EngineError::Execute(anyhow!(err)))?;
            inputs.push((info.name.clone(), SessionInputValue::from(tensor.into_dyn())));
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| EngineError::Execute(anyhow!("engine lock poisoned")))?;
        let outputs = session
            .run(inputs)
            .map_err(|err| EngineError::Execute(anyhow!(err)))?;

        for info in self.catalog.iter().filter(|info| !info.is_input) {
            let value = outputs
                .get(info.name.as_str())
                .ok_or_else(|| EngineError::Execute(anyhow!("output {:?} not produced", info.name)))?;
            let array = value
                .try_extract_array::<f32>()
                .map_err(|err| EngineError::Execute(anyhow!(err)))?;
            let produced = array
                .as_slice()
                .ok_or_else(|| EngineError::Execute(anyhow!("non-contiguous output {:?}", info.name)))?;

            let device = buffers.device_buffer_mut(&info.name).ok_or_else(|| {
                EngineError::Execute(anyhow!("missing buffer for {:?}", info.name))
            })?;
            if device.len() != produced.len() * 4 {
                return Err(EngineError::Execute(anyhow!(
                    "output {:?} produced {} elements, buffer holds {}",
                    info.name,
                    produced.len(),
                    device.len() / 4
                )));
            }
            write_f32(device, produced);
        }

        Ok(())
    }
}

fn binding_info(name: &str, value_type: &ValueType, is_input: bool) -> Result<BindingInfo, EngineError> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        return Err(EngineError::Layout(format!(
            "binding {name:?} is not a tensor"
        )));
    };

    let dtype = match ty {
        TensorElementType::Float32 => DType::F32,
        TensorElementType::Float16 => DType::F16,
        TensorElementType::Int32 => DType::I32,
        TensorElementType::Int8 => DType::I8,
        TensorElementType::Bool => DType::Bool,
        other => {
            return Err(EngineError::Layout(format!(
                "binding {name:?} has unsupported element type {other}"
            )))
        }
    };

    // Dynamic extents resolve to 1; the UltraFace export is fully static.
    let dims: Dims = shape.iter().map(|d| (*d).max(1)).collect();

    Ok(BindingInfo {
        name: name.to_string(),
        dtype,
        dims,
        // The runtime exposes no packed-vector layout; the catalog keeps the
        // fields so sizing stays correct if a backend ever reports one.
        vectorized_dim: -1,
        components_per_element: 1,
        is_input,
    })
}

fn locate_model(name: &str, data_dirs: &[PathBuf]) -> Result<PathBuf, EngineError> {
    for dir in data_dirs {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    // A bare path outside the data directories is accepted as-is.
    if Path::new(name).is_file() {
        return Ok(PathBuf::from(name));
    }
    Err(EngineError::ModelNotFound { name: name.into() })
}
