//! Time-window boundaries and pagination for windowed reads.
//!
//! Every time-ranged query answers through a [`StreamBoundary`] with
//! independently toggleable inclusive endpoints, and reports a
//! [`PageBoundary`] so callers can request the adjacent page without
//! re-scanning from the start of the dataset.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// A time interval with per-endpoint inclusivity.
///
/// With both endpoints exclusive an interval of equal start and end is
/// empty; with both inclusive it contains exactly that instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamBoundary<T> {
    /// Window start.
    pub start: T,
    /// Window end.
    pub end: T,
    /// Whether an event exactly at `start` is in the window.
    pub include_start: bool,
    /// Whether an event exactly at `end` is in the window.
    pub include_end: bool,
}

impl<T: PartialOrd + Copy + fmt::Display> StreamBoundary<T> {
    /// Build a window, rejecting `start > end`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWindow`] when the bounds are reversed.
    pub fn new(start: T, end: T, include_start: bool, include_end: bool) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self {
            start,
            end,
            include_start,
            include_end,
        })
    }
}

impl<T: PartialOrd + Copy> StreamBoundary<T> {
    /// Whether an event at `t` falls inside the window.
    #[must_use]
    pub fn contains(&self, t: T) -> bool {
        let after_start = t > self.start || (self.include_start && t == self.start);
        let before_end = t < self.end || (self.include_end && t == self.end);
        after_start && before_end
    }

    /// Whether `t` lies on the early side of the window.
    fn precedes(&self, t: T) -> bool {
        t < self.start || (!self.include_start && t == self.start)
    }
}

impl<T: fmt::Display> fmt::Display for StreamBoundary<T> {
    /// Mathematical bracket notation, e.g. `(100, 200]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.include_start { '[' } else { '(' };
        let close = if self.include_end { ']' } else { ')' };
        write!(f, "{open}{}, {}{close}", self.start, self.end)
    }
}

/// A [`StreamBoundary`] plus pointers to the nearest events outside
/// it, as produced by [`paginate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageBoundary<T> {
    /// The window that was answered.
    pub window: StreamBoundary<T>,
    /// Timestamp of the first event after the window, if any.
    pub next_event_time: Option<T>,
    /// Timestamp of the last event before the window, if any.
    pub previous_event_time: Option<T>,
}

/// Answer a windowed query over `events`, which must be sorted by
/// ascending timestamp.
///
/// Returns the in-window items plus a [`PageBoundary`] computed from
/// the same sequence, so the pointers can never reference an event
/// that the current window would itself contain.
pub fn paginate<T, E>(events: &[(T, E)], window: &StreamBoundary<T>) -> (Vec<E>, PageBoundary<T>)
where
    T: PartialOrd + Copy,
    E: Clone,
{
    let mut selected = Vec::new();
    let mut previous = None;
    let mut next = None;

    for (t, event) in events {
        if window.contains(*t) {
            selected.push(event.clone());
        } else if window.precedes(*t) {
            previous = Some(*t);
        } else if next.is_none() {
            next = Some(*t);
        }
    }

    let boundary = PageBoundary {
        window: *window,
        next_event_time: next,
        previous_event_time: previous,
    };
    (selected, boundary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: u64, end: u64, incs: bool, ince: bool) -> StreamBoundary<u64> {
        StreamBoundary::new(start, end, incs, ince).unwrap()
    }

    #[test]
    fn membership_honors_endpoint_inclusivity() {
        let w = window(100, 200, false, true);
        assert!(!w.contains(100));
        assert!(w.contains(150));
        assert!(w.contains(200));
        assert!(!w.contains(99));
        assert!(!w.contains(201));
    }

    #[test]
    fn equal_bounds_need_both_endpoints_included() {
        assert!(window(100, 100, true, true).contains(100));
        assert!(!window(100, 100, true, false).contains(100));
        assert!(!window(100, 100, false, true).contains(100));
        assert!(!window(100, 100, false, false).contains(100));
    }

    #[test]
    fn reversed_bounds_are_rejected() {
        assert!(StreamBoundary::new(200u64, 100, true, true).is_err());
    }

    #[test]
    fn page_boundary_points_at_nearest_outside_events() {
        let events: Vec<(u64, u64)> = [50, 100, 150, 200, 250].iter().map(|t| (*t, *t)).collect();
        let (selected, page) = paginate(&events, &window(100, 200, false, true));
        assert_eq!(selected, vec![150, 200]);
        assert_eq!(page.previous_event_time, Some(100));
        assert_eq!(page.next_event_time, Some(250));
    }

    #[test]
    fn page_pointers_absent_at_dataset_edges() {
        let events: Vec<(u64, u64)> = [150, 180].iter().map(|t| (*t, *t)).collect();
        let (selected, page) = paginate(&events, &window(100, 200, true, true));
        assert_eq!(selected, vec![150, 180]);
        assert_eq!(page.previous_event_time, None);
        assert_eq!(page.next_event_time, None);
    }

    #[test]
    fn display_uses_bracket_notation() {
        assert_eq!(window(100, 200, false, true).to_string(), "(100, 200]");
        assert_eq!(window(1, 2, true, false).to_string(), "[1, 2)");
    }
}
