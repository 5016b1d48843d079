pub mod cancel;
pub mod pixel_buffer;
pub mod recorder_config;
pub mod timestamp;
