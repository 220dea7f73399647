use crate::config::{self, KEY_LIBRARY_FOLDERS, KeyValueStore};
use crate::model::{LibraryEntry, MediaReference};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

/// Known media folders and the playable files found under them.
#[derive(Debug, Default)]
pub struct Library {
    folders: Vec<PathBuf>,
    entries: Vec<LibraryEntry>,
}

impl Library {
    pub fn restore(store: &dyn KeyValueStore) -> Self {
        let folders = match store.get(KEY_LIBRARY_FOLDERS) {
            Ok(Some(Value::Array(values))) => values
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect(),
            Ok(_) => Vec::new(),
            Err(err) => {
                warn!("failed to read library folders: {err}");
                Vec::new()
            }
        };
        let mut library = Self {
            folders,
            entries: Vec::new(),
        };
        library.rescan();
        library
    }

    pub fn folders(&self) -> &[PathBuf] {
        &self.folders
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    /// Adds a folder (once) and rescans. Returns the number of entries found.
    pub fn add_folder(&mut self, store: &dyn KeyValueStore, folder: &Path) -> usize {
        let folder = config::normalize_path(folder);
        if !self.folders.contains(&folder) {
            self.folders.push(folder);
            self.persist(store);
        }
        self.rescan();
        self.entries.len()
    }

    pub fn rescan(&mut self) {
        self.entries = scan_many(&self.folders);
        info!(
            folders = self.folders.len(),
            entries = self.entries.len(),
            "scanned library"
        );
    }

    pub fn clear(&mut self, store: &dyn KeyValueStore) {
        self.folders.clear();
        self.entries.clear();
        if let Err(err) = store.remove(KEY_LIBRARY_FOLDERS) {
            warn!("failed to clear library folders: {err}");
        }
    }

    fn persist(&self, store: &dyn KeyValueStore) {
        let folders = self
            .folders
            .iter()
            .map(|folder| Value::String(folder.to_string_lossy().to_string()))
            .collect();
        if let Err(err) = store.set(KEY_LIBRARY_FOLDERS, Value::Array(folders)) {
            warn!("failed to persist library folders: {err}");
        }
    }
}

pub fn scan_folder(root: &Path) -> Vec<LibraryEntry> {
    let mut entries: Vec<LibraryEntry> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && config::is_supported_media(entry.path()))
        .map(|entry| {
            let reference = MediaReference::new(entry.path());
            LibraryEntry {
                title: reference.title(),
                reference,
            }
        })
        .collect();

    entries.sort_by(|a, b| a.reference.path().cmp(b.reference.path()));
    entries
}

pub fn scan_many(roots: &[PathBuf]) -> Vec<LibraryEntry> {
    let mut all = Vec::new();
    for root in roots {
        all.extend(scan_folder(root));
    }
    all.sort_by(|a, b| a.reference.path().cmp(b.reference.path()));
    all.dedup_by(|a, b| a.reference == b.reference);
    all
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}
