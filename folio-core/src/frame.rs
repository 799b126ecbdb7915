use std::sync::Arc;

use crate::config::{BookConfig, ReadOrder};
use crate::page::Page;
use crate::position::{PageDirection, PagePosition};
use crate::range::PageRange;

/// A page or half page taking part in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePart {
    pub position: PagePosition,
    /// 1 for a divided half, 2 for the whole page.
    pub part_size: usize,
}

impl FramePart {
    pub fn index(&self) -> isize {
        self.position.index()
    }

    pub fn is_whole(&self) -> bool {
        self.part_size >= 2
    }

    fn max(&self) -> PagePosition {
        self.position + (self.part_size as isize - 1)
    }
}

#[derive(Debug, Clone)]
pub struct FrameContent {
    pub page: Arc<Page>,
    pub part: FramePart,
}

/// The one or two page parts shown together.
///
/// `contents` are listed from the right edge of the display to the left.
#[derive(Debug, Clone)]
pub struct Frame {
    range: PageRange,
    contents: Vec<FrameContent>,
}

impl Frame {
    pub fn empty(range: PageRange) -> Self {
        Self {
            range,
            contents: Vec::new(),
        }
    }

    pub fn range(&self) -> PageRange {
        self.range
    }

    pub fn contents(&self) -> &[FrameContent] {
        &self.contents
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// True once every page in the frame is decoded.
    pub fn is_valid(&self) -> bool {
        self.contents.iter().all(|content| content.page.is_loaded())
    }

    pub fn pages(&self) -> impl Iterator<Item = &Arc<Page>> {
        self.contents.iter().map(|content| &content.page)
    }

    /// Lowest page index shown.
    pub fn first_index(&self) -> Option<usize> {
        self.pages().map(|page| page.index()).min()
    }
}

/// Layout rules consumed by [`FrameComposer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameLayout {
    pub frame_size: usize,
    pub read_order: ReadOrder,
    pub divide_wide_page: bool,
    pub wide_ratio: f64,
    pub single_first_page: bool,
    pub single_last_page: bool,
    pub wide_page_counts_as_two: bool,
}

impl From<&BookConfig> for FrameLayout {
    fn from(config: &BookConfig) -> Self {
        Self {
            frame_size: config.frame_size(),
            read_order: config.read_order,
            divide_wide_page: config.divide_wide_page,
            wide_ratio: config.wide_ratio,
            single_first_page: config.single_first_page,
            single_last_page: config.single_last_page,
            wide_page_counts_as_two: config.wide_page_counts_as_two,
        }
    }
}

/// Builds frames over one page snapshot.
#[derive(Clone)]
pub struct FrameComposer {
    pages: Arc<[Arc<Page>]>,
    layout: FrameLayout,
}

impl FrameComposer {
    pub fn new(pages: Arc<[Arc<Page>]>, layout: FrameLayout) -> Self {
        Self { pages, layout }
    }

    pub fn pages(&self) -> &Arc<[Arc<Page>]> {
        &self.pages
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    fn page_at(&self, position: PagePosition) -> Option<&Arc<Page>> {
        position.page_index().and_then(|index| self.pages.get(index))
    }

    /// Frame starting at `range.position()`, or `None` when that position
    /// lies outside the book.
    pub fn compose(&self, range: PageRange) -> Option<Frame> {
        let direction = range.direction();
        let mut position = range.position();
        let mut parts = Vec::with_capacity(self.layout.frame_size);
        for _ in 0..self.layout.frame_size.max(1) {
            let Some(page) = self.page_at(position) else {
                break;
            };
            let part_size = if self.is_divided(page) {
                1
            } else {
                position = position.truncate();
                2
            };
            parts.push(FramePart {
                position,
                part_size,
            });
            position = match direction {
                PageDirection::Forward => position + part_size as isize,
                PageDirection::Backward => position - 1,
            };
        }
        if parts.is_empty() {
            return None;
        }

        if parts.len() == 2 && parts.iter().any(|part| self.is_solo_part(part)) {
            parts.truncate(1);
        }

        let min = parts.iter().map(|part| part.position).min()?;
        let max = parts.iter().map(FramePart::max).max()?;
        let frame_range = PageRange::from_min_max(min, max, direction);

        let mut parts = collapse_seam(parts);
        if direction == PageDirection::Backward {
            parts.reverse();
        }
        if self.layout.read_order == ReadOrder::LeftToRight {
            parts.reverse();
        }

        let contents = parts
            .into_iter()
            .filter_map(|part| {
                self.page_at(part.position).map(|page| FrameContent {
                    page: Arc::clone(page),
                    part,
                })
            })
            .collect();
        Some(Frame {
            range: frame_range,
            contents,
        })
    }

    fn is_divided(&self, page: &Page) -> bool {
        self.layout.frame_size == 1
            && self.layout.divide_wide_page
            && !page.kind().is_media()
            && page.is_wide(self.layout.wide_ratio)
    }

    fn is_solo_part(&self, part: &FramePart) -> bool {
        self.page_at(part.position)
            .map(|page| self.is_solo(page))
            .unwrap_or(false)
    }

    /// Pages that must be shown alone even in a two page layout.
    pub fn is_solo(&self, page: &Page) -> bool {
        let index = page.index();
        let last = self.pages.len().saturating_sub(1);
        (self.layout.single_first_page && index == 0)
            || (self.layout.single_last_page && index == last)
            || page.kind().is_container()
            || (self.layout.wide_page_counts_as_two && page.is_wide(self.layout.wide_ratio))
    }
}

/// Two halves of the same page collapse into the whole page.
fn collapse_seam(parts: Vec<FramePart>) -> Vec<FramePart> {
    match parts.as_slice() {
        [a, b] if a.index() == b.index() => vec![FramePart {
            position: a.position.truncate(),
            part_size: 2,
        }],
        _ => parts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{PageCollection, PageSortMode};
    use crate::config::PageMode;
    use crate::page::PageKind;

    fn pages_with(count: usize, wide: &[usize]) -> Arc<[Arc<Page>]> {
        PageCollection::new(
            (0..count)
                .map(|i| {
                    let width = if wide.contains(&i) { 300.0 } else { 100.0 };
                    Page::new(format!("{i:02}.png"), PageKind::Image, width, 150.0)
                })
                .collect(),
            PageSortMode::FileName,
            true,
        )
        .snapshot()
    }

    fn composer(pages: Arc<[Arc<Page>]>, config: &BookConfig) -> FrameComposer {
        FrameComposer::new(pages, FrameLayout::from(config))
    }

    fn wide_config() -> BookConfig {
        BookConfig {
            page_mode: PageMode::WidePage,
            ..BookConfig::default()
        }
    }

    fn indexes(frame: &Frame) -> Vec<usize> {
        frame.pages().map(|page| page.index()).collect()
    }

    fn forward(index: isize, part: u8) -> PageRange {
        PageRange::at(PagePosition::new(index, part), PageDirection::Forward)
    }

    #[test]
    fn two_page_frame_in_wide_mode() {
        let composer = composer(pages_with(10, &[]), &wide_config());
        let frame = composer.compose(forward(0, 0)).unwrap();
        assert_eq!(indexes(&frame), [0, 1]);
        assert_eq!(frame.range().min(), PagePosition::new(0, 0));
        assert_eq!(frame.range().max(), PagePosition::new(1, 1));
        assert_eq!(frame.range().next(), PagePosition::new(2, 0));
        assert_eq!(frame.first_index(), Some(0));
    }

    #[test]
    fn single_first_page_is_solo() {
        let config = BookConfig {
            single_first_page: true,
            wide_page_counts_as_two: false,
            ..wide_config()
        };
        let composer = composer(pages_with(10, &[0]), &config);
        let frame = composer.compose(forward(0, 0)).unwrap();
        assert_eq!(indexes(&frame), [0]);
        assert_eq!(frame.range().next(), PagePosition::new(1, 0));

        let frame = composer.compose(forward(1, 0)).unwrap();
        assert_eq!(indexes(&frame), [1, 2]);
    }

    #[test]
    fn wide_page_counts_as_two_truncates_spread() {
        let composer = composer(pages_with(10, &[5]), &wide_config());
        assert_eq!(indexes(&composer.compose(forward(4, 0)).unwrap()), [4]);
        assert_eq!(indexes(&composer.compose(forward(5, 0)).unwrap()), [5]);
        assert_eq!(indexes(&composer.compose(forward(6, 0)).unwrap()), [6, 7]);
    }

    #[test]
    fn last_page_and_containers_are_solo() {
        let config = BookConfig {
            single_last_page: true,
            ..wide_config()
        };
        let mut pages: Vec<Page> = (0..4)
            .map(|i| Page::new(format!("{i}.png"), PageKind::Image, 100.0, 150.0))
            .collect();
        pages.push(Page::new("zz", PageKind::Folder, 0.0, 0.0));
        let snapshot = PageCollection::new(pages, PageSortMode::FileName, false).snapshot();
        let composer = composer(snapshot, &config);
        // folder sorted last
        assert_eq!(indexes(&composer.compose(forward(3, 0)).unwrap()), [3]);
        assert_eq!(indexes(&composer.compose(forward(4, 0)).unwrap()), [4]);
        assert_eq!(indexes(&composer.compose(forward(2, 0)).unwrap()), [2, 3]);
    }

    #[test]
    fn divided_wide_page_yields_two_half_frames() {
        let config = BookConfig {
            divide_wide_page: true,
            ..BookConfig::default()
        };
        let composer = composer(pages_with(10, &[3]), &config);
        let first = composer.compose(forward(3, 0)).unwrap();
        assert_eq!(first.contents()[0].part.part_size, 1);
        assert_eq!(first.range().part_size(), 1);

        let second = composer.compose(first.range().next_range()).unwrap();
        assert_eq!(indexes(&second), [3]);
        assert_eq!(second.contents()[0].part.position, PagePosition::new(3, 1));
        assert_eq!(second.contents()[0].part.part_size, 1);

        let third = composer.compose(second.range().next_range()).unwrap();
        assert_eq!(indexes(&third), [4]);
        assert!(third.contents()[0].part.is_whole());
    }

    #[test]
    fn media_pages_are_never_divided() {
        let config = BookConfig {
            divide_wide_page: true,
            ..BookConfig::default()
        };
        let snapshot = PageCollection::new(
            vec![Page::new("clip.mp4", PageKind::Media, 1920.0, 1080.0)],
            PageSortMode::FileName,
            true,
        )
        .snapshot();
        let frame = composer(snapshot, &config).compose(forward(0, 0)).unwrap();
        assert!(frame.contents()[0].part.is_whole());
    }

    #[test]
    fn backward_frames_list_pages_for_display() {
        let composer = composer(pages_with(10, &[]), &wide_config());
        let range = PageRange::at(PagePosition::new(9, 1), PageDirection::Backward);
        let frame = composer.compose(range).unwrap();
        // right-to-left reading: lower index on the right edge
        assert_eq!(indexes(&frame), [8, 9]);
        assert_eq!(frame.range().position(), PagePosition::new(9, 1));
        assert_eq!(frame.range().next(), PagePosition::new(7, 1));

        let config = BookConfig {
            read_order: ReadOrder::LeftToRight,
            ..wide_config()
        };
        let ltr = FrameComposer::new(pages_with(10, &[]), FrameLayout::from(&config));
        assert_eq!(indexes(&ltr.compose(range).unwrap()), [9, 8]);
        assert_eq!(indexes(&ltr.compose(forward(0, 0)).unwrap()), [1, 0]);
    }

    #[test]
    fn stops_at_book_edges() {
        let composer = composer(pages_with(3, &[]), &wide_config());
        let frame = composer.compose(forward(2, 0)).unwrap();
        assert_eq!(indexes(&frame), [2]);
        assert!(composer.compose(forward(3, 0)).is_none());
        assert!(composer.compose(forward(-1, 1)).is_none());
    }

    #[test]
    fn validity_tracks_page_loads() {
        let pages = pages_with(4, &[]);
        let composer = composer(Arc::clone(&pages), &wide_config());
        let frame = composer.compose(forward(0, 0)).unwrap();
        assert!(!frame.is_valid());
        pages[0].mark_loaded();
        assert!(!frame.is_valid());
        pages[1].mark_loaded();
        assert!(frame.is_valid());
        assert!(Frame::empty(forward(0, 0)).is_valid());
    }

    #[test]
    fn seam_between_halves_collapses() {
        let parts = vec![
            FramePart {
                position: PagePosition::new(4, 1),
                part_size: 1,
            },
            FramePart {
                position: PagePosition::new(4, 0),
                part_size: 1,
            },
        ];
        let collapsed = collapse_seam(parts);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].position, PagePosition::new(4, 0));
        assert!(collapsed[0].is_whole());
    }
}
