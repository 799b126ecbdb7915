use std::fmt;

use serde::{Deserialize, Serialize};

use crate::position::{PageDirection, PagePosition};

/// A directional interval of half-page slots.
///
/// `position` is where reading starts, `last` is `part_size - 1` slots further
/// along `direction`. `min`/`max` give the same interval in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    position: PagePosition,
    direction: PageDirection,
    part_size: usize,
}

impl PageRange {
    pub fn new(position: PagePosition, direction: PageDirection, part_size: usize) -> Self {
        Self {
            position,
            direction,
            part_size: part_size.max(1),
        }
    }

    /// Single slot range, used for navigation requests.
    pub fn at(position: PagePosition, direction: PageDirection) -> Self {
        Self::new(position, direction, 1)
    }

    /// Smallest range spanning `min..=max` that reads in `direction`.
    pub fn from_min_max(min: PagePosition, max: PagePosition, direction: PageDirection) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let part_size = min.distance(max) + 1;
        match direction {
            PageDirection::Forward => Self::new(min, direction, part_size),
            PageDirection::Backward => Self::new(max, direction, part_size),
        }
    }

    /// `page_count` whole pages starting at page `start`.
    pub fn whole_pages(start: isize, page_count: usize, direction: PageDirection) -> Self {
        let position = match direction {
            PageDirection::Forward => PagePosition::new(start, 0),
            PageDirection::Backward => PagePosition::new(start, 1),
        };
        Self::new(position, direction, page_count.max(1) * 2)
    }

    pub fn position(&self) -> PagePosition {
        self.position
    }

    pub fn direction(&self) -> PageDirection {
        self.direction
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    pub fn with_part_size(&self, part_size: usize) -> Self {
        Self::new(self.position, self.direction, part_size)
    }

    pub fn last(&self) -> PagePosition {
        self.position + self.direction.sign() * (self.part_size as isize - 1)
    }

    pub fn min(&self) -> PagePosition {
        match self.direction {
            PageDirection::Forward => self.position,
            PageDirection::Backward => self.last(),
        }
    }

    pub fn max(&self) -> PagePosition {
        match self.direction {
            PageDirection::Forward => self.last(),
            PageDirection::Backward => self.position,
        }
    }

    /// Number of distinct page indexes touched.
    pub fn page_size(&self) -> usize {
        self.position.index().abs_diff(self.last().index()) + 1
    }

    pub fn contains(&self, position: PagePosition) -> bool {
        self.min() <= position && position <= self.max()
    }

    pub fn contains_range(&self, other: &PageRange) -> bool {
        self.contains(other.min()) && self.contains(other.max())
    }

    pub fn merge_position(&self, position: PagePosition) -> Self {
        Self::from_min_max(
            self.min().min(position),
            self.max().max(position),
            self.direction,
        )
    }

    /// Smallest range enclosing both, keeping this range's direction.
    pub fn merge(&self, other: &PageRange) -> Self {
        Self::from_min_max(
            self.min().min(other.min()),
            self.max().max(other.max()),
            self.direction,
        )
    }

    /// Position adjoining `last`, continuing in this range's direction.
    pub fn next(&self) -> PagePosition {
        self.last() + self.direction.sign()
    }

    /// Position adjoining `position`, against this range's direction.
    pub fn previous(&self) -> PagePosition {
        self.position - self.direction.sign()
    }

    pub fn next_in(&self, direction: PageDirection) -> PagePosition {
        if direction == self.direction {
            self.next()
        } else {
            self.previous()
        }
    }

    /// One-slot range starting right after this one.
    pub fn next_range(&self) -> Self {
        Self::at(self.next(), self.direction)
    }

    /// Target position for a relative move of `delta` pages.
    ///
    /// A move of exactly one frame prefers the adjoining position when it is
    /// strictly closer than the arithmetic target, so half-pages and solo pages
    /// are never skipped.
    pub fn move_by(&self, delta: isize, frame_size: usize) -> PagePosition {
        if delta == 0 {
            return self.position;
        }
        let direction = PageDirection::from_delta(delta);
        let naive = self.position + delta * 2;
        if delta.unsigned_abs() == frame_size {
            let adjoining = self.next_in(direction);
            if self.position.distance(adjoining) < self.position.distance(naive) {
                return adjoining;
            }
        }
        naive
    }

    /// Range over whole pages, dropping part information.
    pub fn truncate(&self) -> Self {
        Self::from_min_max(
            self.min().truncate(),
            PagePosition::new(self.max().index(), 1),
            self.direction,
        )
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{} {}]", self.position, self.last(), self.direction)
    }
}
