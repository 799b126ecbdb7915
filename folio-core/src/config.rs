use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::collection::PageSortMode;
use crate::error::BookResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageMode {
    SinglePage,
    WidePage,
}

impl PageMode {
    /// Pages per frame.
    pub fn size(self) -> usize {
        match self {
            PageMode::SinglePage => 1,
            PageMode::WidePage => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadOrder {
    RightToLeft,
    LeftToRight,
}

/// Everything the navigation pipeline reads from user settings.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub page_mode: PageMode,
    pub read_order: ReadOrder,
    pub divide_wide_page: bool,
    pub wide_ratio: f64,
    pub single_first_page: bool,
    pub single_last_page: bool,
    pub wide_page_counts_as_two: bool,
    /// Pages decoded ahead of the visible frame. Zero disables readahead.
    pub prefetch_size: usize,
    pub merge_move_commands: bool,
    pub prioritize_page_move: bool,
    pub folders_first: bool,
    pub sort_mode: PageSortMode,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub view_wait_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub prioritized_view_wait_timeout: Duration,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            page_mode: PageMode::SinglePage,
            read_order: ReadOrder::RightToLeft,
            divide_wide_page: false,
            wide_ratio: 1.0,
            single_first_page: false,
            single_last_page: false,
            wide_page_counts_as_two: true,
            prefetch_size: 4,
            merge_move_commands: true,
            prioritize_page_move: false,
            folders_first: true,
            sort_mode: PageSortMode::FileName,
            view_wait_timeout: Duration::from_millis(5000),
            prioritized_view_wait_timeout: Duration::from_millis(100),
        }
    }
}

impl BookConfig {
    pub fn from_toml_str(source: &str) -> BookResult<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> BookResult<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn frame_size(&self) -> usize {
        self.page_mode.size()
    }

    /// How long a navigation waits for its own pages before showing
    /// whatever is ready.
    pub fn wait_timeout(&self) -> Duration {
        if self.prioritize_page_move {
            self.prioritized_view_wait_timeout
        } else {
            self.view_wait_timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = BookConfig::from_toml_str("").unwrap();
        assert_eq!(config, BookConfig::default());
        assert_eq!(config.frame_size(), 1);
        assert_eq!(config.wait_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn parses_layout_and_timeouts() {
        let config = BookConfig::from_toml_str(
            r#"
            page_mode = "wide-page"
            read_order = "left-to-right"
            single_first_page = true
            prefetch_size = 0
            prioritize_page_move = true
            prioritized_view_wait_timeout = 250
            sort_mode = "time-stamp-descending"
            "#,
        )
        .unwrap();
        assert_eq!(config.frame_size(), 2);
        assert_eq!(config.read_order, ReadOrder::LeftToRight);
        assert!(config.single_first_page);
        assert_eq!(config.prefetch_size, 0);
        assert_eq!(config.wait_timeout(), Duration::from_millis(250));
        assert_eq!(config.sort_mode, PageSortMode::TimeStampDescending);
    }

    #[test]
    fn rejects_unknown_enum_values() {
        let err = BookConfig::from_toml_str("page_mode = \"triple\"").unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "divide_wide_page = true\nwide_ratio = 1.2\n").unwrap();
        let config = BookConfig::load(&path).unwrap();
        assert!(config.divide_wide_page);
        assert_eq!(config.wide_ratio, 1.2);
    }
}
