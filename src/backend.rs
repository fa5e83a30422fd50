//! Backend abstraction - NdArray (CPU) by default, CUDA behind a feature
//!
//! Inference for the comparison UI runs on the CPU unless the crate is built
//! with `--features cuda`.

// --------------------------------------------------------------------------------
// BACKEND SELECTION: NdArray (default) or CUDA (opt-in)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn_ndarray::NdArray<f32>;

/// Device type of the default backend
pub type DefaultDevice = <DefaultBackend as burn::tensor::backend::Backend>::Device;

/// Get the default device
pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}
