//! The four-cycle lookahead window.

use crate::cycle::Cycle;

/// `prev`, `curr`, `next` and `nbuf`, one cycle apart.
#[derive(Debug, Clone)]
pub struct Window {
    /// Cycle before `curr`.
    pub prev: Cycle,
    /// Cycle being output.
    pub curr: Cycle,
    /// Cycle after `curr`.
    pub next: Cycle,
    /// Cycle after `next`.
    pub nbuf: Cycle,
}

impl Window {
    /// An unanchored window.
    pub fn new(length: usize, cycle_r: usize, last_frame: usize, sdlim: i32) -> Self {
        let cycle = Cycle::new(length, cycle_r, last_frame as i64).with_sdlim(sdlim);
        Self {
            prev: cycle.clone(),
            curr: cycle.clone(),
            next: cycle.clone(),
            nbuf: cycle,
        }
    }

    /// Whether `curr` starts at `frame`.
    pub fn is_at(&self, frame: i64) -> bool {
        self.curr.is_anchored() && self.curr.frame == frame
    }

    /// Whether `frame` is where `curr` lands after one rotation.
    pub fn precedes(&self, frame: i64) -> bool {
        self.curr.is_anchored() && self.curr.frame + self.curr.length as i64 == frame
    }

    /// Anchor all four cycles around `frame` and forget everything.
    pub fn reset(&mut self, frame: i64) {
        let len = self.curr.length as i64;
        self.prev.set_frame(frame - len);
        self.curr.set_frame(frame);
        self.next.set_frame(frame + len);
        self.nbuf.set_frame(frame + 2 * len);
    }

    /// Shift by one cycle: `prev <- curr <- next <- nbuf`, with `nbuf`
    /// re-anchored one cycle past the new `next`.
    pub fn rotate(&mut self) {
        std::mem::swap(&mut self.prev, &mut self.curr);
        std::mem::swap(&mut self.curr, &mut self.next);
        std::mem::swap(&mut self.next, &mut self.nbuf);
        let frame = self.next.frame + self.next.length as i64;
        self.nbuf.set_frame(frame);
    }

    /// Mutable access to all three decision cycles at once.
    pub fn triple_mut(&mut self) -> (&mut Cycle, &mut Cycle, &mut Cycle) {
        (&mut self.prev, &mut self.curr, &mut self.next)
    }
}
