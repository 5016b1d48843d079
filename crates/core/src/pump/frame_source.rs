use crate::shared::timestamp::Timestamp;

/// The producer boundary: something that renders frames on the GPU and
/// hands them over one at a time.
///
/// Both methods are called only from the pump's thread. `next_frame`
/// lends the texture for the duration of one conversion; returning
/// `None` ends the stream and the session is closed at the last
/// delivered timestamp.
pub trait FrameSource: Send {
    type Texture;

    /// Begins frame production. Idempotent.
    fn start(&mut self);

    /// The next frame and its presentation time, or `None` at end of
    /// stream.
    fn next_frame(&mut self) -> Option<(Self::Texture, Timestamp)>;
}
