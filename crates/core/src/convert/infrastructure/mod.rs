pub mod gpu_context;
pub mod wgpu_converter;
