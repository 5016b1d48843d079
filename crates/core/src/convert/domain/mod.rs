pub mod pixel_buffer_converter;
