pub mod completion;
pub mod frame_pump;
pub mod frame_source;
