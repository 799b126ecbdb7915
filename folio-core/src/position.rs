use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Reading direction along the page list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageDirection {
    Forward,
    Backward,
}

impl PageDirection {
    pub fn sign(self) -> isize {
        match self {
            PageDirection::Forward => 1,
            PageDirection::Backward => -1,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            PageDirection::Forward => PageDirection::Backward,
            PageDirection::Backward => PageDirection::Forward,
        }
    }

    /// Direction of a signed step. Zero counts as forward.
    pub fn from_delta(delta: isize) -> Self {
        if delta < 0 {
            PageDirection::Backward
        } else {
            PageDirection::Forward
        }
    }

    pub fn is_forward(self) -> bool {
        self == PageDirection::Forward
    }
}

impl fmt::Display for PageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.sign())
    }
}

/// Half-page granular address: a page index plus the half of that page.
///
/// Part `1` is the trailing half of a page that is split for divided display.
/// Arithmetic goes through the linear slot value `index * 2 + part`; the
/// `(index, part)` pair is the canonical form. Indexes may be negative so that
/// positions before the first page stay representable for bounds checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PagePosition {
    index: isize,
    part: u8,
}

impl PagePosition {
    pub const ZERO: PagePosition = PagePosition { index: 0, part: 0 };

    pub fn new(index: isize, part: u8) -> Self {
        debug_assert!(part < 2, "page part must be 0 or 1");
        Self {
            index,
            part: part.min(1),
        }
    }

    pub fn from_slot(slot: isize) -> Self {
        Self {
            index: slot.div_euclid(2),
            part: slot.rem_euclid(2) as u8,
        }
    }

    pub fn index(self) -> isize {
        self.index
    }

    pub fn part(self) -> u8 {
        self.part
    }

    pub fn slot(self) -> isize {
        self.index * 2 + self.part as isize
    }

    /// Same page, leading half.
    pub fn truncate(self) -> Self {
        Self {
            index: self.index,
            part: 0,
        }
    }

    /// Absolute distance in half-page slots.
    pub fn distance(self, other: PagePosition) -> usize {
        self.slot().abs_diff(other.slot())
    }

    pub fn clamp_to(self, min: PagePosition, max: PagePosition) -> Self {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }

    /// The index as an array offset, if it is non-negative.
    pub fn page_index(self) -> Option<usize> {
        usize::try_from(self.index).ok()
    }
}

impl PartialOrd for PagePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PagePosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.slot().cmp(&other.slot())
    }
}

impl Add<isize> for PagePosition {
    type Output = PagePosition;

    fn add(self, slots: isize) -> Self::Output {
        PagePosition::from_slot(self.slot() + slots)
    }
}

impl Sub<isize> for PagePosition {
    type Output = PagePosition;

    fn sub(self, slots: isize) -> Self::Output {
        PagePosition::from_slot(self.slot() - slots)
    }
}

impl fmt::Display for PagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trip_covers_negative_positions() {
        for slot in -7..7 {
            assert_eq!(PagePosition::from_slot(slot).slot(), slot);
        }
        assert_eq!(PagePosition::from_slot(-1), PagePosition::new(-1, 1));
        assert_eq!(PagePosition::from_slot(5), PagePosition::new(2, 1));
    }

    #[test]
    fn ordering_is_index_then_part() {
        let a = PagePosition::new(1, 1);
        let b = PagePosition::new(2, 0);
        assert!(a < b);
        assert!(PagePosition::new(2, 0) < PagePosition::new(2, 1));
        assert_eq!(a.distance(b), 1);
    }

    #[test]
    fn arithmetic_rederives_part() {
        let pos = PagePosition::new(3, 1);
        assert_eq!(pos + 1, PagePosition::new(4, 0));
        assert_eq!(pos - 3, PagePosition::new(2, 0));
        assert_eq!(pos.truncate(), PagePosition::new(3, 0));
        assert_eq!(PagePosition::ZERO - 1, PagePosition::new(-1, 1));
        assert_eq!((PagePosition::ZERO - 1).page_index(), None);
    }

    #[test]
    fn direction_helpers() {
        assert_eq!(PageDirection::from_delta(-3), PageDirection::Backward);
        assert_eq!(PageDirection::from_delta(0), PageDirection::Forward);
        assert_eq!(PageDirection::Forward.reverse().sign(), -1);
        assert_eq!(PageDirection::Backward.to_string(), "-1");
    }
}
