use smallvec::SmallVec;

/// Element type of an engine binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F16,
    I32,
    I8,
    Bool,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I8 | DType::Bool => 1,
        }
    }
}

/// Binding dimensions. Rank is small and bounded by the runtime.
pub type Dims = SmallVec<[i64; 8]>;

/// Immutable metadata for one named input or output tensor of the built
/// engine.
#[derive(Debug, Clone)]
pub struct BindingInfo {
    pub name: String,
    pub dtype: DType,
    pub dims: Dims,
    /// Index of the vectorized dimension, -1 when the binding is not
    /// vectorized.
    pub vectorized_dim: i32,
    /// Scalars packed per vector slot along `vectorized_dim`.
    pub components_per_element: i32,
    pub is_input: bool,
}

impl BindingInfo {
    /// Number of elements the binding occupies.
    ///
    /// When the binding is vectorized the vectorized extent is rounded up to
    /// whole vector slots and the volume scaled back by the components per
    /// slot. `batch_size` of 0 means the batch is already explicit in `dims`
    /// and contributes a factor of 1.
    pub fn element_count(&self, batch_size: usize) -> usize {
        let mut dims = self.dims.clone();
        let mut volume = if batch_size == 0 { 1 } else { batch_size };
        if self.vectorized_dim >= 0 {
            let index = self.vectorized_dim as usize;
            let scalars = i64::from(self.components_per_element);
            dims[index] = (dims[index] + scalars - 1) / scalars;
            volume *= self.components_per_element as usize;
        }
        volume * dims.iter().product::<i64>().max(0) as usize
    }
}

/// Binding-index-ordered snapshot of the engine's I/O tensors, captured once
/// at build time.
#[derive(Debug, Clone, Default)]
pub struct BindingCatalog {
    bindings: Vec<BindingInfo>,
}

impl BindingCatalog {
    pub fn new(bindings: Vec<BindingInfo>) -> Self {
        Self { bindings }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BindingInfo> {
        self.bindings.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BindingInfo> {
        self.bindings.iter()
    }

    /// Binding index for `name`, `None` when the engine has no such tensor.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.bindings.iter().position(|binding| binding.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn element_count_multiplies_plain_dims() {
        let info = BindingInfo {
            name: "scores".into(),
            dtype: DType::F32,
            dims: smallvec![1, 4420, 2],
            vectorized_dim: -1,
            components_per_element: 1,
            is_input: false,
        };
        assert_eq!(info.element_count(0), 8840);
    }

    #[test]
    fn element_count_applies_batch_factor() {
        let info = BindingInfo {
            name: "input".into(),
            dtype: DType::F32,
            dims: smallvec![3, 240, 320],
            vectorized_dim: -1,
            components_per_element: 1,
            is_input: true,
        };
        assert_eq!(info.element_count(2), 2 * 3 * 240 * 320);
    }

    #[test]
    fn element_count_rounds_vectorized_dim_up() {
        let info = BindingInfo {
            name: "packed".into(),
            dtype: DType::F16,
            dims: smallvec![1, 4, 10],
            vectorized_dim: 1,
            components_per_element: 3,
            is_input: false,
        };
        // dim 1 becomes ceil(4/3) = 2 slots, volume 1*2*10 = 20, scaled by 3.
        assert_eq!(info.element_count(0), 60);
    }

    #[test]
    fn index_lookup_preserves_binding_order() {
        let catalog = BindingCatalog::new(vec![
            BindingInfo {
                name: "input".into(),
                dtype: DType::F32,
                dims: smallvec![1, 3, 240, 320],
                vectorized_dim: -1,
                components_per_element: 1,
                is_input: true,
            },
            BindingInfo {
                name: "scores".into(),
                dtype: DType::F32,
                dims: smallvec![1, 4420, 2],
                vectorized_dim: -1,
                components_per_element: 1,
                is_input: false,
            },
        ]);
        assert_eq!(catalog.index_of("input"), Some(0));
        assert_eq!(catalog.index_of("scores"), Some(1));
        assert_eq!(catalog.index_of("boxes"), None);
    }
}
