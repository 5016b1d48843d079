use std::cmp::Ordering;

/// Presentation time as a rational value: `value / timescale` seconds.
///
/// The default timescale of 600 divides evenly by the common frame rates
/// (24, 25, 30, 60), so per-frame times stay exact.
#[derive(Clone, Copy, Debug)]
pub struct Timestamp {
    value: i64,
    timescale: i32,
}

pub const DEFAULT_TIMESCALE: i32 = 600;

impl Timestamp {
    pub fn new(value: i64, timescale: i32) -> Self {
        debug_assert!(timescale > 0, "timescale must be positive");
        Self { value, timescale }
    }

    pub fn zero() -> Self {
        Self::new(0, DEFAULT_TIMESCALE)
    }

    pub fn from_seconds(seconds: f64) -> Self {
        Self::new(
            (seconds * DEFAULT_TIMESCALE as f64).round() as i64,
            DEFAULT_TIMESCALE,
        )
    }

    /// Time of frame `index` in a stream running at `fps` frames per second.
    pub fn from_frame_index(index: u64, fps: u32) -> Self {
        debug_assert!(fps > 0, "fps must be positive");
        Self::new(
            index as i64 * DEFAULT_TIMESCALE as i64 / fps as i64,
            DEFAULT_TIMESCALE,
        )
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn timescale(&self) -> i32 {
        self.timescale
    }

    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// The same instant expressed in another timescale, rounding toward zero.
    pub fn rescaled(&self, timescale: i32) -> Self {
        debug_assert!(timescale > 0, "timescale must be positive");
        let value = self.value as i128 * timescale as i128 / self.timescale as i128;
        Self::new(value as i64, timescale)
    }

    /// Elapsed time since `origin`, in this timestamp's timescale.
    pub fn since(&self, origin: Timestamp) -> Self {
        let origin = origin.rescaled(self.timescale);
        Self::new(self.value - origin.value, self.timescale)
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        // Cross-multiply in i128 so mixed timescales compare exactly.
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn test_zero() {
        let t = Timestamp::zero();
        assert_eq!(t.value(), 0);
        assert_eq!(t.seconds(), 0.0);
    }

    #[rstest]
    #[case(0, 30, 0.0)]
    #[case(1, 30, 1.0 / 30.0)]
    #[case(29, 30, 29.0 / 30.0)]
    #[case(60, 60, 1.0)]
    #[case(24, 24, 1.0)]
    fn test_from_frame_index(#[case] index: u64, #[case] fps: u32, #[case] expected: f64) {
        let t = Timestamp::from_frame_index(index, fps);
        assert_relative_eq!(t.seconds(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_times_are_exact_at_common_rates() {
        // 600 is divisible by 30, so consecutive frame times differ by
        // exactly 20 ticks with no drift.
        let a = Timestamp::from_frame_index(100, 30);
        let b = Timestamp::from_frame_index(101, 30);
        assert_eq!(b.value() - a.value(), 20);
    }

    #[test]
    fn test_from_seconds_round_trip() {
        let t = Timestamp::from_seconds(1.5);
        assert_eq!(t.value(), 900);
        assert_relative_eq!(t.seconds(), 1.5);
    }

    #[test]
    fn test_ordering_across_timescales() {
        let half_a = Timestamp::new(300, 600);
        let half_b = Timestamp::new(15, 30);
        let later = Timestamp::new(301, 600);
        assert_eq!(half_a, half_b);
        assert!(later > half_a);
        assert!(half_b < later);
    }

    #[test]
    fn test_rescaled() {
        let t = Timestamp::new(300, 600);
        let r = t.rescaled(30);
        assert_eq!(r.value(), 15);
        assert_eq!(r.timescale(), 30);
        assert_eq!(t, r);
    }

    #[test]
    fn test_since() {
        let origin = Timestamp::from_seconds(2.0);
        let t = Timestamp::from_seconds(3.5);
        let d = t.since(origin);
        assert_relative_eq!(d.seconds(), 1.5);
    }

    #[test]
    fn test_since_mixed_timescales() {
        let origin = Timestamp::new(30, 30); // 1s
        let t = Timestamp::new(1200, 600); // 2s
        assert_relative_eq!(t.since(origin).seconds(), 1.0);
    }
}
