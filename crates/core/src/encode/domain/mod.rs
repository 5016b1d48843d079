pub mod video_encoder;
