use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use folio_core::{natural_cmp, Page, PageKind};
use tracing::{debug, instrument, warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Lists the images of one directory as pages. Sub-directories become
/// folder pages; other files are ignored.
#[derive(Debug, Default, Clone)]
pub struct DirectoryPageSupplier;

impl DirectoryPageSupplier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl folio_core::PageSupplier for DirectoryPageSupplier {
    async fn load_pages(&self, path: &Path) -> Result<Vec<Page>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || list_pages(&path))
            .await
            .context("page listing task failed")?
    }
}

/// Root the entry names of pages listed from `path` are relative to.
pub fn book_root(path: &Path) -> PathBuf {
    if path.is_file() {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        path.to_path_buf()
    }
}

#[instrument]
fn list_pages(path: &Path) -> Result<Vec<Page>> {
    if path.is_file() {
        let name = path
            .file_name()
            .context("image path has no file name")?
            .to_string_lossy()
            .into_owned();
        return Ok(vec![image_page(path, name, 0)?]);
    }
    if !path.is_dir() {
        bail!("{} is neither a directory nor an image", path.display());
    }

    let mut entries: Vec<(String, PathBuf)> = fs::read_dir(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                entry.path(),
            )
        })
        .collect();
    entries.sort_by(|a, b| natural_cmp(&a.0, &b.0));

    let mut pages = Vec::with_capacity(entries.len());
    for (order, (name, entry_path)) in entries.into_iter().enumerate() {
        if entry_path.is_dir() {
            pages.push(folder_page(&entry_path, name, order));
            continue;
        }
        if !is_image(&entry_path) {
            continue;
        }
        match image_page(&entry_path, name, order) {
            Ok(page) => pages.push(page),
            Err(err) => warn!(path = %entry_path.display(), "skipping unreadable image: {err:#}"),
        }
    }
    debug!(pages = pages.len(), "listed pages");
    Ok(pages)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn image_page(path: &Path, name: String, order: usize) -> Result<Page> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("failed to probe {}", path.display()))?;
    let metadata =
        fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    let mut page = Page::new(name, PageKind::Image, f64::from(width), f64::from(height))
        .with_entry_order(order)
        .with_length(metadata.len());
    if let Ok(modified) = metadata.modified() {
        page = page.with_last_modified(modified);
    }
    Ok(page)
}

fn folder_page(path: &Path, name: String, order: usize) -> Page {
    let mut page = Page::new(name, PageKind::Folder, 0.0, 0.0).with_entry_order(order);
    if let Ok(modified) = fs::metadata(path).and_then(|metadata| metadata.modified()) {
        page = page.with_last_modified(modified);
    }
    page
}
