//! Reference CPU kernels: straightforward, allocation-light loops over host tensors, used as the
//! default backend and as the numeric oracle in tests.

pub mod cpu;

pub use cpu::{CpuBackend, CpuKernelInterceptor, GenericCpuBackend, NoopInterceptor};
