//! Paired host/device operands with controlled layout perturbations.

use std::fmt;
use std::sync::Arc;

use gpuarray::backend::spec::{BlasResult, DeviceBackend};
use gpuarray::tensor::{DType, DeviceArray, HostArray, MemoryOrder};
use rand::rngs::StdRng;
use rand::Rng;

use crate::oracle::{on_device, Interrupt, OracleError};

/// Description of one generated operand.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandSpec {
    pub dims: Vec<usize>,
    pub dtype: DType,
    pub order: MemoryOrder,
    /// Pad the last axis by one element and view past the padding.
    pub offseted_inner: bool,
    /// Pad the first axis by one element and view past the padding.
    pub offseted_outer: bool,
    /// Step along the first axis; negative steps walk it backwards.
    pub sliced: isize,
}

impl OperandSpec {
    pub fn new(dims: impl Into<Vec<usize>>, dtype: DType) -> Self {
        OperandSpec {
            dims: dims.into(),
            dtype,
            order: MemoryOrder::C,
            offseted_inner: false,
            offseted_outer: false,
            sliced: 1,
        }
    }

    pub fn order(mut self, order: MemoryOrder) -> Self {
        self.order = order;
        self
    }

    pub fn offseted_inner(mut self, offseted: bool) -> Self {
        self.offseted_inner = offseted;
        self
    }

    pub fn offseted_outer(mut self, offseted: bool) -> Self {
        self.offseted_outer = offseted;
        self
    }

    pub fn sliced(mut self, step: isize) -> Self {
        self.sliced = step;
        self
    }

    /// Shape of the backing allocation before any view is taken.
    pub fn alloc_dims(&self) -> Vec<usize> {
        let mut dims = self.dims.clone();
        let Some(last) = dims.len().checked_sub(1) else {
            return dims;
        };
        if self.sliced != 1 {
            dims[0] *= self.sliced.unsigned_abs();
        }
        if self.offseted_outer {
            dims[0] += 1;
        }
        if self.offseted_inner {
            dims[last] += 1;
        }
        dims
    }
}

impl fmt::Display for OperandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}/{}", self.dims, self.dtype, self.order)?;
        if self.offseted_inner {
            f.write_str("/inner")?;
        }
        if self.offseted_outer {
            f.write_str("/outer")?;
        }
        if self.sliced != 1 {
            write!(f, "/step{}", self.sliced)?;
        }
        Ok(())
    }
}

/// The same logical operand on the reference side and on the device.
#[derive(Debug, Clone)]
pub struct OperandPair<B: DeviceBackend + 'static> {
    pub host: HostArray,
    pub device: DeviceArray<B>,
}

trait StridedView: Sized {
    fn view_dims(&self) -> &[usize];
    fn step(&self, axis: usize, step: isize) -> BlasResult<Self>;
    fn window(&self, axis: usize, start: usize, len: usize) -> BlasResult<Self>;
}

impl StridedView for HostArray {
    fn view_dims(&self) -> &[usize] {
        self.dims()
    }

    fn step(&self, axis: usize, step: isize) -> BlasResult<Self> {
        self.slice_step(axis, step)
    }

    fn window(&self, axis: usize, start: usize, len: usize) -> BlasResult<Self> {
        self.narrow(axis, start, len)
    }
}

impl<B: DeviceBackend + 'static> StridedView for DeviceArray<B> {
    fn view_dims(&self) -> &[usize] {
        self.dims()
    }

    fn step(&self, axis: usize, step: isize) -> BlasResult<Self> {
        self.slice_step(axis, step)
    }

    fn window(&self, axis: usize, start: usize, len: usize) -> BlasResult<Self> {
        self.narrow(axis, start, len)
    }
}

fn drop_first<V: StridedView>(view: V, axis: usize) -> BlasResult<V> {
    let len = view.view_dims()[axis];
    view.window(axis, 1, len.saturating_sub(1))
}

/// Applies the perturbations of `spec` to a view of the full allocation.
fn perturb<V: StridedView>(base: V, spec: &OperandSpec) -> BlasResult<V> {
    let rank = base.view_dims().len();
    if rank == 0 {
        return Ok(base);
    }
    let mut view = base;
    if spec.sliced != 1 {
        view = view.step(0, spec.sliced)?;
    }
    if spec.offseted_outer {
        view = drop_first(view, 0)?;
    }
    if spec.offseted_inner {
        view = drop_first(view, rank - 1)?;
    }
    Ok(view)
}

/// Uniform values in `[0, 10)`.
pub fn random_values(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(0.0..10.0)).collect()
}

/// Builds an operand pair: fills an enlarged allocation, uploads it verbatim, then takes
/// the same perturbed view on both sides.
pub fn generate<B: DeviceBackend + 'static>(
    backend: &Arc<B>,
    spec: &OperandSpec,
    rng: &mut StdRng,
) -> Result<OperandPair<B>, Interrupt> {
    if spec.sliced == 0 {
        return Err(OracleError::generator(format!("{spec}: slice step must be non-zero")).into());
    }
    let alloc_dims = spec.alloc_dims();
    let len = alloc_dims.iter().product();
    let values = random_values(rng, len);
    let host = HostArray::from_values(alloc_dims, spec.dtype, spec.order, &values)
        .map_err(|err| OracleError::generator(format!("{spec}: {err}")))?;
    let device = on_device("upload", DeviceArray::from_host(Arc::clone(backend), &host))?;

    let host = perturb(host, spec).map_err(|err| OracleError::generator(format!("{spec}: {err}")))?;
    let device = on_device("upload", perturb(device, spec))?;
    if host.dims() != spec.dims.as_slice() || device.dims() != spec.dims.as_slice() {
        return Err(OracleError::generator(format!(
            "{spec}: views have shapes {} and {}",
            host.shape(),
            device.shape()
        ))
        .into());
    }
    let device_values = on_device("readback", device.to_vec_f64())?;
    if device_values != host.to_vec_f64() {
        return Err(OracleError::generator(format!("{spec}: device copy differs from host")).into());
    }
    Ok(OperandPair { host, device })
}

#[cfg(test)]
mod tests {
    use super::{perturb, OperandSpec};
    use gpuarray::tensor::{DType, HostArray, MemoryOrder};

    fn iota(spec: &OperandSpec) -> HostArray {
        let dims = spec.alloc_dims();
        let values: Vec<f64> = (0..dims.iter().product::<usize>()).map(|v| v as f64).collect();
        HostArray::from_values(dims, spec.dtype, spec.order, &values).unwrap()
    }

    #[test]
    fn allocation_grows_for_each_perturbation() {
        let spec = OperandSpec::new([4, 3], DType::F32)
            .sliced(-2)
            .offseted_outer(true)
            .offseted_inner(true);
        assert_eq!(spec.alloc_dims(), vec![9, 4]);
        let scalar = OperandSpec::new(Vec::<usize>::new(), DType::F32).sliced(2);
        assert_eq!(scalar.alloc_dims(), Vec::<usize>::new());
    }

    #[test]
    fn reversed_outer_offset_view() {
        let spec = OperandSpec::new([3], DType::F64).sliced(-2).offseted_outer(true);
        let view = perturb(iota(&spec), &spec).unwrap();
        // allocation 0..7, [::-2] = 6 4 2 0, [1:] = 4 2 0
        assert_eq!(view.to_vec_f64(), vec![4.0, 2.0, 0.0]);
    }

    #[test]
    fn inner_offset_skips_first_column_in_either_order() {
        for order in [MemoryOrder::C, MemoryOrder::F] {
            let spec = OperandSpec::new([2, 2], DType::F32).order(order).offseted_inner(true);
            let view = perturb(iota(&spec), &spec).unwrap();
            assert_eq!(view.to_vec_f64(), vec![1.0, 2.0, 4.0, 5.0]);
            assert_ne!(view.layout().offset(), 0);
        }
    }
}
