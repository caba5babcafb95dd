use std::collections::HashSet;
use std::path::{Path, PathBuf};

use url::Url;

pub fn get_filename_from_url(url: &Url) -> String {
    if let Some(filename) = url.path_segments().and_then(|mut segments| segments.next_back()) {
        if !filename.is_empty() {
            return sanitize_filename(filename);
        }
    }

    format!("download_{}", uuid::Uuid::new_v4())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// Maps URLs to `file_<name>` inside one directory, suffixing names already
/// handed out in this batch.
pub struct DestinationNamer {
    dir: PathBuf,
    taken: HashSet<PathBuf>,
}

impl DestinationNamer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            taken: HashSet::new(),
        }
    }

    pub fn destination_for(&mut self, url: &Url) -> PathBuf {
        let filename = format!("file_{}", get_filename_from_url(url));
        let path = unique_in_batch(&self.dir, &filename, &self.taken);
        self.taken.insert(path.clone());
        path
    }
}

fn unique_in_batch(dir: &Path, filename: &str, taken: &HashSet<PathBuf>) -> PathBuf {
    let mut path = dir.join(filename);
    let mut counter = 1;

    let original = Path::new(filename);
    let file_stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = original
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    while taken.contains(&path) {
        let new_filename = if extension.is_empty() {
            format!("{}_{}", file_stem, counter)
        } else {
            format!("{}_{}.{}", file_stem, counter, extension)
        };

        path = dir.join(new_filename);
        counter += 1;
    }
    path
}
