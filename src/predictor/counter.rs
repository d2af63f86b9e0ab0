//! Saturating counters.

use crate::error::{Error, Result};

/// A bounded confidence counter that clamps instead of wrapping.
///
/// A signed counter of width `w` covers `[-2^(w-1), 2^(w-1)-1]`, an unsigned
/// one covers `[0, 2^w-1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaturatingCounter {
    value: i32,
    min: i32,
    max: i32,
}

impl SaturatingCounter {
    pub fn new(width: u32, signed: bool, init: i32) -> Self {
        assert!(
            (1..=16).contains(&width),
            "counter width {width} not in 1..=16"
        );
        let (min, max) = if signed {
            (-(1 << (width - 1)), (1 << (width - 1)) - 1)
        } else {
            (0, (1 << width) - 1)
        };
        let mut ctr = Self { value: 0, min, max };
        ctr.set(init);
        ctr
    }

    pub fn signed(width: u32) -> Self {
        Self::new(width, true, 0)
    }

    pub fn unsigned(width: u32) -> Self {
        Self::new(width, false, 0)
    }

    #[inline]
    pub fn get(&self) -> i32 {
        self.value
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    /// Sets the counter; the value must lie inside the counter's range.
    pub fn set(&mut self, value: i32) {
        if let Err(e) = self.try_set(value) {
            panic!("{e}");
        }
    }

    pub fn try_set(&mut self, value: i32) -> Result<()> {
        if value < self.min || value > self.max {
            return Err(Error::CounterRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        self.value = value;
        Ok(())
    }

    #[inline]
    pub fn increment(&mut self) {
        if self.value < self.max {
            self.value += 1;
        }
    }

    #[inline]
    pub fn decrement(&mut self) {
        if self.value > self.min {
            self.value -= 1;
        }
    }

    /// Moves toward `max` when `cond` holds, toward `min` otherwise.
    #[inline]
    pub fn update(&mut self, cond: bool) {
        if cond {
            self.increment();
        } else {
            self.decrement();
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.value == self.min || self.value == self.max
    }
}
