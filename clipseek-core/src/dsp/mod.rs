//! Signal-processing kernels shared by every correlation backend.

pub mod energy;
pub mod xcorr;
