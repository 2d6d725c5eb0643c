//! Host/device buffer pairs sized from the binding catalog.
//!
//! The device half is the runtime-facing staging buffer handed to the
//! execute call; the execution providers own actual GPU residency behind
//! that seam. Host↔device transfers are explicit, synchronous copies so the
//! inference data path stays observable: preprocess fills the host input,
//! `copy_input_to_device` publishes it, execution writes the device outputs,
//! `copy_output_to_host` makes them readable for post-processing.

use std::collections::TryReserveError;
use std::sync::Arc;

use thiserror::Error;

use crate::binding::{BindingCatalog, DType};

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("failed to allocate {bytes} bytes for binding {name:?}")]
    Allocation { name: String, bytes: usize },
}

/// Byte-backed buffer for one side of a binding.
#[derive(Debug)]
pub struct TransferBuffer {
    data: Vec<u8>,
    elements: usize,
    dtype: DType,
}

impl TransferBuffer {
    fn new(elements: usize, dtype: DType) -> Result<Self, TryReserveError> {
        let bytes = elements * dtype.size();
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)?;
        data.resize(bytes, 0);
        Ok(Self {
            data,
            elements,
            dtype,
        })
    }

    /// Logical size in elements.
    pub fn len(&self) -> usize {
        self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    /// Logical size in bytes.
    pub fn nbytes(&self) -> usize {
        self.elements * self.dtype.size()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.nbytes()]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let bytes = self.nbytes();
        &mut self.data[..bytes]
    }

    /// Resize to `elements`, reallocating only when the new size exceeds the
    /// current capacity.
    pub fn resize(&mut self, elements: usize) -> Result<(), TryReserveError> {
        let bytes = elements * self.dtype.size();
        if bytes > self.data.len() {
            let mut data = Vec::new();
            data.try_reserve_exact(bytes)?;
            data.resize(bytes, 0);
            self.data = data;
        }
        self.elements = elements;
        Ok(())
    }
}

/// Paired host and device buffers for one binding.
///
/// The pair owns both allocations exclusively; dropping it releases both.
/// Invariant: both sides hold `element_count * dtype.size()` bytes.
#[derive(Debug)]
pub struct ManagedBufferPair {
    host: TransferBuffer,
    device: TransferBuffer,
}

impl ManagedBufferPair {
    fn new(elements: usize, dtype: DType) -> Result<Self, TryReserveError> {
        Ok(Self {
            host: TransferBuffer::new(elements, dtype)?,
            device: TransferBuffer::new(elements, dtype)?,
        })
    }

    pub fn host(&self) -> &TransferBuffer {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut TransferBuffer {
        &mut self.host
    }

    pub fn device(&self) -> &TransferBuffer {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut TransferBuffer {
        &mut self.device
    }

    fn copy_to_device(&mut self) {
        let bytes = self.host.nbytes().min(self.device.nbytes());
        self.device.as_bytes_mut()[..bytes].copy_from_slice(&self.host.as_bytes()[..bytes]);
    }

    fn copy_to_host(&mut self) {
        let bytes = self.host.nbytes().min(self.device.nbytes());
        self.host.as_bytes_mut()[..bytes].copy_from_slice(&self.device.as_bytes()[..bytes]);
    }
}

/// Owns one [`ManagedBufferPair`] per binding, in binding-index order, and
/// drives host↔device transfers around execution.
#[derive(Debug)]
pub struct BufferManager {
    catalog: Arc<BindingCatalog>,
    pairs: Vec<ManagedBufferPair>,
}

impl BufferManager {
    /// Allocate a pair per catalog binding. `batch_size` of 0 means the batch
    /// is already explicit in the binding dimensions.
    pub fn new(catalog: Arc<BindingCatalog>, batch_size: usize) -> Result<Self, BufferError> {
        let mut pairs = Vec::with_capacity(catalog.len());
        for info in catalog.iter() {
            let elements = info.element_count(batch_size);
            let pair =
                ManagedBufferPair::new(elements, info.dtype).map_err(|_| BufferError::Allocation {
                    name: info.name.clone(),
                    bytes: elements * info.dtype.size(),
                })?;
            pairs.push(pair);
        }
        Ok(Self { catalog, pairs })
    }

    pub fn catalog(&self) -> &BindingCatalog {
        &self.catalog
    }

    /// Ordered device-side views, suitable as the execute call's binding
    /// array.
    pub fn device_bindings(&self) -> Vec<&[u8]> {
        self.pairs.iter().map(|pair| pair.device.as_bytes()).collect()
    }

    /// Host buffer for `tensor_name`, `None` on an unknown name.
    pub fn host_buffer(&self, tensor_name: &str) -> Option<&[u8]> {
        let index = self.catalog.index_of(tensor_name)?;
        Some(self.pairs[index].host.as_bytes())
    }

    pub fn host_buffer_mut(&mut self, tensor_name: &str) -> Option<&mut [u8]> {
        let index = self.catalog.index_of(tensor_name)?;
        Some(self.pairs[index].host.as_bytes_mut())
    }

    /// Device buffer for `tensor_name`, `None` on an unknown name.
    pub fn device_buffer(&self, tensor_name: &str) -> Option<&[u8]> {
        let index = self.catalog.index_of(tensor_name)?;
        Some(self.pairs[index].device.as_bytes())
    }

    pub fn device_buffer_mut(&mut self, tensor_name: &str) -> Option<&mut [u8]> {
        let index = self.catalog.index_of(tensor_name)?;
        Some(self.pairs[index].device.as_bytes_mut())
    }

    /// Byte size of the buffers backing `tensor_name`, `None` on an unknown
    /// name.
    pub fn size(&self, tensor_name: &str) -> Option<usize> {
        let index = self.catalog.index_of(tensor_name)?;
        Some(self.pairs[index].host.nbytes())
    }

    /// Copy every input binding's host buffer to its device buffer.
    pub fn copy_input_to_device(&mut self) {
        for (info, pair) in self.catalog.iter().zip(self.pairs.iter_mut()) {
            if info.is_input {
                pair.copy_to_device();
            }
        }
    }

    /// Copy every output binding's device buffer back to its host buffer.
    pub fn copy_output_to_host(&mut self) {
        for (info, pair) in self.catalog.iter().zip(self.pairs.iter_mut()) {
            if !info.is_input {
                pair.copy_to_host();
            }
        }
    }
}

/// Decode little-endian staging bytes into f32 values.
pub(crate) fn read_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encode f32 values into little-endian staging bytes.
pub(crate) fn write_f32(dst: &mut [u8], values: &[f32]) {
    for (chunk, value) in dst.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
}
