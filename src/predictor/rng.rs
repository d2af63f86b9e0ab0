//! History-seeded pseudo-random generator.
//!
//! The draws mix an internal seed with the base predictor's path and global
//! history registers, so replaying the same branch stream reproduces the
//! same random sequence. The seed is the only engine-wide value that needs
//! explicit checkpoint and rewind around a flush.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistoryRng {
    seed: u32,
}

impl HistoryRng {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws the next value. Histories are passed in on every call.
    pub fn draw(&mut self, path_hist: u64, global_hist: u64) -> u32 {
        let mut s = self.seed.wrapping_add(1);
        s ^= path_hist as u32;
        s = s.rotate_left(11);
        s ^= global_hist as u32;
        s = s.rotate_left(22);
        self.seed = s;
        s
    }

    /// Checkpoint.
    #[inline]
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Restores a checkpoint taken with [`HistoryRng::seed`].
    #[inline]
    pub fn rewind(&mut self, seed: u32) {
        self.seed = seed;
    }
}

/// Borrowed RNG plus a by-value copy of the history registers it mixes in.
///
/// Strategies receive this during commit so they can draw without holding a
/// reference into the base predictor.
pub struct Entropy<'a> {
    rng: &'a mut HistoryRng,
    path_hist: u64,
    global_hist: u64,
}

impl<'a> Entropy<'a> {
    pub fn new(rng: &'a mut HistoryRng, (path_hist, global_hist): (u64, u64)) -> Self {
        Self {
            rng,
            path_hist,
            global_hist,
        }
    }

    pub fn draw(&mut self) -> u32 {
        self.rng.draw(self.path_hist, self.global_hist)
    }
}
