//! `struct __kernel_timespec` view (16 bytes).

use std::time::Duration;

use super::{field, shape_view, RawField};
use crate::raw;

pub mod layout {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const SECONDS: RawField = RawField::new(0, 8);
    pub const NANOS: RawField = RawField::new(8, 8);
}

shape_view!(
    /// View over a kernel timespec.
    TimeSpec,
    layout::SIZE
);

impl TimeSpec {
    field!(seconds, set_seconds, layout::SECONDS, i64, raw::get_i64, raw::put_i64);
    field!(nanos, set_nanos, layout::NANOS, i64, raw::get_i64, raw::put_i64);

    pub fn set_duration(&self, d: Duration) {
        self.set_seconds(d.as_secs() as i64);
        self.set_nanos(d.subsec_nanos() as i64);
    }

    pub fn duration(&self) -> Duration {
        Duration::new(self.seconds().max(0) as u64, self.nanos().clamp(0, 999_999_999) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn test_split_into_seconds_and_nanos() {
        let mut backing = [0u8; 16];
        let ts = unsafe { TimeSpec::at(backing.as_mut_ptr() as usize) };
        ts.set_duration(Duration::from_millis(2_250));
        assert_eq!(ts.seconds(), 2);
        assert_eq!(ts.nanos(), 250_000_000);
        assert_eq!(ts.duration(), Duration::from_millis(2_250));
    }
}
