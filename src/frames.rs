use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameRejected {
    #[error("Frame {requested} is outside 0..{total}")]
    OutOfRange { requested: i64, total: usize },

    #[error("Scroll signal has no direction")]
    NoDirection,
}

/// Collapse a wheel signal to a single frame step.
///
/// Magnitude is ignored so one gesture always moves one frame.
pub fn wheel_delta(delta_y: f64) -> Option<i32> {
    if delta_y > 0.0 {
        Some(1)
    } else if delta_y < 0.0 {
        Some(-1)
    } else {
        None
    }
}

/// Apply `delta` to `current`, rejecting anything outside `0..total`.
pub fn request_frame(current: usize, delta: i32, total: usize) -> Result<usize, FrameRejected> {
    let requested = current as i64 + i64::from(delta);
    if requested < 0 || requested >= total as i64 {
        return Err(FrameRejected::OutOfRange { requested, total });
    }
    Ok(requested as usize)
}

/// Receipt for an issued frame load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTicket {
    pub generation: u64,
    pub frame: usize,
}

/// Frame navigation state of one viewport.
///
/// `current` is the frame the user navigated to, `displayed` the frame whose
/// pixels were last applied. Loads complete asynchronously and may finish out
/// of order; only a load newer than the last applied one is accepted.
#[derive(Debug, Clone)]
pub struct FrameStack {
    current: usize,
    displayed: Option<usize>,
    total: usize,
    issued: u64,
    applied: u64,
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FrameStack {
    pub fn new(total: usize) -> Self {
        Self {
            current: 0,
            displayed: None,
            total: total.max(1),
            issued: 0,
            applied: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn displayed(&self) -> Option<usize> {
        self.displayed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Start over with a new stack. Outstanding tickets stay stale.
    pub fn reset(&mut self, total: usize) {
        self.current = 0;
        self.displayed = None;
        self.total = total.max(1);
        self.applied = self.issued;
    }

    /// Move one step from the current frame.
    pub fn step(&mut self, delta: i32) -> Result<FrameTicket, FrameRejected> {
        let frame = request_frame(self.current, delta, self.total)?;
        Ok(self.issue(frame))
    }

    /// Jump straight to `frame`.
    pub fn jump(&mut self, frame: usize) -> Result<FrameTicket, FrameRejected> {
        if frame >= self.total {
            return Err(FrameRejected::OutOfRange {
                requested: frame as i64,
                total: self.total,
            });
        }
        Ok(self.issue(frame))
    }

    fn issue(&mut self, frame: usize) -> FrameTicket {
        self.issued += 1;
        self.current = frame;
        debug!(frame, generation = self.issued, "frame requested");
        FrameTicket {
            generation: self.issued,
            frame,
        }
    }

    /// Record a completed load. Returns `false` for a stale ticket, whose
    /// pixels must not be shown.
    pub fn complete(&mut self, ticket: FrameTicket) -> bool {
        if ticket.generation <= self.applied {
            warn!(
                frame = ticket.frame,
                generation = ticket.generation,
                applied = self.applied,
                "discarding stale frame load"
            );
            return false;
        }
        self.applied = ticket.generation;
        self.displayed = Some(ticket.frame);
        true
    }

    /// Record a failed load. The newest request falls back to the frame on
    /// screen.
    pub fn fail(&mut self, ticket: FrameTicket) {
        if ticket.generation == self.issued {
            if let Some(displayed) = self.displayed {
                self.current = displayed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_magnitude_is_ignored() {
        assert_eq!(wheel_delta(120.0), Some(1));
        assert_eq!(wheel_delta(0.01), Some(1));
        assert_eq!(wheel_delta(-300.0), Some(-1));
        assert_eq!(wheel_delta(0.0), None);
    }

    #[test]
    fn bounds_are_enforced() {
        assert_eq!(
            request_frame(4, 1, 5),
            Err(FrameRejected::OutOfRange { requested: 5, total: 5 })
        );
        assert_eq!(
            request_frame(0, -1, 5),
            Err(FrameRejected::OutOfRange { requested: -1, total: 5 })
        );
        assert_eq!(request_frame(3, 1, 5), Ok(4));
        assert_eq!(request_frame(1, -1, 5), Ok(0));
    }

    #[test]
    fn rejected_step_keeps_index() {
        let mut stack = FrameStack::new(5);
        stack.jump(4).unwrap();
        assert!(stack.step(1).is_err());
        assert_eq!(stack.current(), 4);

        let mut stack = FrameStack::new(5);
        assert!(stack.step(-1).is_err());
        assert_eq!(stack.current(), 0);
    }

    #[test]
    fn never_leaves_range() {
        let mut stack = FrameStack::new(3);
        for delta in [1, 1, 1, 1, -1, -1, -1, -1, 1] {
            let _ = stack.step(delta);
            assert!(stack.current() < stack.total());
        }
    }

    #[test]
    fn stale_completion_is_discarded() {
        let mut stack = FrameStack::new(10);
        let older = stack.step(1).unwrap();
        let newer = stack.step(1).unwrap();

        assert!(stack.complete(newer));
        assert!(!stack.complete(older));
        assert_eq!(stack.displayed(), Some(2));
    }

    #[test]
    fn in_order_completion_applies_both() {
        let mut stack = FrameStack::new(10);
        let first = stack.step(1).unwrap();
        let second = stack.step(1).unwrap();
        assert!(stack.complete(first));
        assert!(stack.complete(second));
        assert_eq!(stack.displayed(), Some(2));
    }

    #[test]
    fn failed_load_falls_back_to_displayed() {
        let mut stack = FrameStack::new(10);
        let first = stack.jump(0).unwrap();
        assert!(stack.complete(first));
        let next = stack.step(1).unwrap();
        stack.fail(next);
        assert_eq!(stack.current(), 0);
    }

    #[test]
    fn reset_invalidates_outstanding_tickets() {
        let mut stack = FrameStack::new(10);
        let pending = stack.step(1).unwrap();
        stack.reset(4);
        assert!(!stack.complete(pending));
        assert_eq!(stack.total(), 4);
        assert_eq!(stack.current(), 0);
    }
}
