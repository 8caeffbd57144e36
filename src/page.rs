// src/page.rs
//
// The page-driving seam. The checkout flow only ever talks to a `PageDriver`,
// so tests can script page transitions without a browser and the production
// session (src/web.rs) stays swappable.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A control interaction that did not happen.
///
/// Absence and not-becoming-clickable-in-time are distinct signals from the
/// driver; the flow treats both as a missed control.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("control `{0}` not present")]
    Absent(String),
    #[error("control `{selector}` not clickable within {timeout:?}")]
    Timeout { selector: String, timeout: Duration },
    #[error("session error: {0}")]
    Session(String),
}

/// One bookable cell in the delivery slot grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub row: usize,
    pub col: usize,
    pub is_full: bool,
    pub is_unavailable: bool,
}

impl Slot {
    pub fn is_bookable(&self) -> bool {
        !self.is_full && !self.is_unavailable
    }
}

/// Read-only snapshot of the slot grid. Never cached across page loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotGrid {
    pub rows: Vec<Vec<Slot>>,
}

impl SlotGrid {
    /// First bookable slot in document order: top row first, left to right.
    pub fn first_bookable(&self) -> Option<Slot> {
        self.rows
            .iter()
            .flat_map(|row| row.iter())
            .copied()
            .find(Slot::is_bookable)
    }
}

/// An authenticated page-driving session.
#[async_trait]
pub trait PageDriver {
    /// Load the given URL in the session's single page.
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// The session's current location signal, re-read on every call.
    async fn current_location(&self) -> Result<String, DriverError>;

    /// Wait for the control to become clickable, then click it.
    async fn click_control(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Click the `index`-th control matching `selector`, in document order.
    async fn click_nth_control(
        &self,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Snapshot the delivery slot grid.
    async fn read_slot_grid(&self, timeout: Duration) -> Result<SlotGrid, DriverError>;

    /// Click the slot at the given grid position.
    async fn click_slot(&self, row: usize, col: usize) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(row: usize, col: usize, full: bool, unavailable: bool) -> Slot {
        Slot { row, col, is_full: full, is_unavailable: unavailable }
    }

    #[test]
    fn first_bookable_scans_row_major() {
        let grid = SlotGrid {
            rows: vec![
                vec![slot(0, 0, true, false), slot(0, 1, false, true)],
                vec![slot(1, 0, false, false), slot(1, 1, false, false)],
            ],
        };
        let picked = grid.first_bookable().unwrap();
        assert_eq!((picked.row, picked.col), (1, 0));
        // Repeated scans of the same snapshot pick the same slot.
        assert_eq!(grid.first_bookable(), Some(picked));
    }

    #[test]
    fn first_bookable_prefers_earlier_row_over_earlier_column() {
        let grid = SlotGrid {
            rows: vec![
                vec![slot(0, 0, true, false), slot(0, 1, false, false)],
                vec![slot(1, 0, false, false)],
            ],
        };
        let picked = grid.first_bookable().unwrap();
        assert_eq!((picked.row, picked.col), (0, 1));
    }

    #[test]
    fn no_bookable_slot_in_saturated_grid() {
        let grid = SlotGrid {
            rows: vec![
                vec![slot(0, 0, true, false), slot(0, 1, true, false)],
                vec![slot(1, 0, false, true)],
            ],
        };
        assert!(grid.first_bookable().is_none());
        assert!(SlotGrid::default().first_bookable().is_none());
    }
}
