use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::page::{contains_page, Page};
use crate::position::PagePosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageSortMode {
    FileName,
    FileNameDescending,
    TimeStamp,
    TimeStampDescending,
    Size,
    SizeDescending,
    Entry,
    EntryDescending,
    Random,
}

impl PageSortMode {
    pub const ALL: [PageSortMode; 9] = [
        PageSortMode::FileName,
        PageSortMode::FileNameDescending,
        PageSortMode::TimeStamp,
        PageSortMode::TimeStampDescending,
        PageSortMode::Size,
        PageSortMode::SizeDescending,
        PageSortMode::Entry,
        PageSortMode::EntryDescending,
        PageSortMode::Random,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PageSortMode::FileName => "file-name",
            PageSortMode::FileNameDescending => "file-name-descending",
            PageSortMode::TimeStamp => "time-stamp",
            PageSortMode::TimeStampDescending => "time-stamp-descending",
            PageSortMode::Size => "size",
            PageSortMode::SizeDescending => "size-descending",
            PageSortMode::Entry => "entry",
            PageSortMode::EntryDescending => "entry-descending",
            PageSortMode::Random => "random",
        }
    }
}

impl fmt::Display for PageSortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PageSortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageSortMode::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| format!("unknown sort mode `{s}`"))
    }
}

/// Ordered page list. Every mutation renumbers the pages so that
/// `pages[i].index() == i`, then publishes a fresh immutable snapshot.
pub struct PageCollection {
    pages: Arc<[Arc<Page>]>,
    sort_mode: PageSortMode,
    folders_first: bool,
}

impl PageCollection {
    pub fn new(pages: Vec<Page>, sort_mode: PageSortMode, folders_first: bool) -> Self {
        let pages = pages.into_iter().map(Arc::new).collect();
        let mut collection = Self {
            pages: Arc::from(Vec::new()),
            sort_mode,
            folders_first,
        };
        collection.replace(sorted(pages, sort_mode, folders_first));
        collection
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Page>> {
        self.pages.get(index)
    }

    pub fn snapshot(&self) -> Arc<[Arc<Page>]> {
        Arc::clone(&self.pages)
    }

    pub fn sort_mode(&self) -> PageSortMode {
        self.sort_mode
    }

    pub fn first_position(&self) -> PagePosition {
        PagePosition::ZERO
    }

    /// Trailing half of the last page. The origin for an empty book.
    pub fn last_position(&self) -> PagePosition {
        match self.pages.len() {
            0 => PagePosition::ZERO,
            len => PagePosition::new(len as isize - 1, 1),
        }
    }

    pub fn clamp_position(&self, position: PagePosition) -> PagePosition {
        position.clamp_to(self.first_position(), self.last_position())
    }

    pub fn sort(&mut self, mode: PageSortMode) {
        self.sort_mode = mode;
        let pages = self.pages.iter().cloned().collect();
        self.replace(sorted(pages, mode, self.folders_first));
        debug!(mode = %mode, pages = self.pages.len(), "pages sorted");
    }

    /// Removes `pages` and returns the ones that were actually present.
    pub fn remove(&mut self, pages: &[Arc<Page>]) -> Vec<Arc<Page>> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .pages
            .iter()
            .cloned()
            .partition(|page| contains_page(pages, page));
        if !removed.is_empty() {
            self.replace(kept);
            debug!(removed = removed.len(), remaining = self.pages.len(), "pages removed");
        }
        removed
    }

    fn replace(&mut self, pages: Vec<Arc<Page>>) {
        for (index, page) in pages.iter().enumerate() {
            page.set_index(index);
        }
        self.pages = Arc::from(pages);
    }
}

fn sorted(mut pages: Vec<Arc<Page>>, mode: PageSortMode, folders_first: bool) -> Vec<Arc<Page>> {
    if mode == PageSortMode::Random {
        pages.shuffle(&mut rand::thread_rng());
    } else {
        pages.sort_by(|a, b| compare_pages(a, b, mode));
    }
    // stable, so the mode order survives inside each group
    pages.sort_by_key(|page| group_rank(page, folders_first));
    pages
}

fn group_rank(page: &Page, folders_first: bool) -> u8 {
    match (page.kind().is_container(), folders_first) {
        (true, true) | (false, false) => 0,
        _ => 1,
    }
}

fn compare_pages(a: &Page, b: &Page, mode: PageSortMode) -> Ordering {
    let primary = match mode {
        PageSortMode::FileName => natural_cmp(a.entry_name(), b.entry_name()),
        PageSortMode::FileNameDescending => natural_cmp(b.entry_name(), a.entry_name()),
        PageSortMode::TimeStamp => a.last_modified().cmp(&b.last_modified()),
        PageSortMode::TimeStampDescending => b.last_modified().cmp(&a.last_modified()),
        PageSortMode::Size => a.length().cmp(&b.length()),
        PageSortMode::SizeDescending => b.length().cmp(&a.length()),
        PageSortMode::Entry => a.entry_order().cmp(&b.entry_order()),
        PageSortMode::EntryDescending => b.entry_order().cmp(&a.entry_order()),
        PageSortMode::Random => Ordering::Equal,
    };
    primary.then_with(|| natural_cmp(a.entry_name(), b.entry_name()))
}

/// Compares names so that embedded numbers order by value:
/// `page2` < `page10`. Letters compare case-insensitively.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.char_indices().peekable();
    let mut right = b.char_indices().peekable();
    loop {
        let (l, r) = match (left.peek(), right.peek()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&(_, l)), Some(&(_, r))) => (l, r),
        };
        let ordering = if l.is_ascii_digit() && r.is_ascii_digit() {
            compare_digit_runs(digit_run(a, &mut left), digit_run(b, &mut right))
        } else {
            left.next();
            right.next();
            l.to_lowercase().cmp(r.to_lowercase())
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.cmp(b)
}

/// Consumes the digits at the front of `chars` and returns them as a slice
/// of `source`.
fn digit_run<'a>(source: &'a str, chars: &mut Peekable<CharIndices<'a>>) -> &'a str {
    let start = chars.peek().map_or(source.len(), |&(offset, _)| offset);
    let mut end = start;
    while let Some((offset, digit)) = chars.next_if(|&(_, c)| c.is_ascii_digit()) {
        end = offset + digit.len_utf8();
    }
    &source[start..end]
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
