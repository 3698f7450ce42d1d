use std::path::{Path, PathBuf};

pub const DOCS_DIR_NAME: &str = "docs";
pub const SNAPSHOT_DIR_NAME: &str = "snapshot";
pub const SNAPSHOT_META_FILE_NAME: &str = "meta.json";
pub const SNAPSHOT_INDEX_FILE_NAME: &str = "index.usearch";

#[must_use]
pub fn docs_dir(data_path: &Path) -> PathBuf {
    data_path.join(DOCS_DIR_NAME)
}

#[must_use]
pub fn snapshot_dir(data_path: &Path) -> PathBuf {
    data_path.join(SNAPSHOT_DIR_NAME)
}

#[must_use]
pub fn snapshot_meta_path(data_path: &Path) -> PathBuf {
    snapshot_dir(data_path).join(SNAPSHOT_META_FILE_NAME)
}

#[must_use]
pub fn snapshot_index_path(data_path: &Path) -> PathBuf {
    snapshot_dir(data_path).join(SNAPSHOT_INDEX_FILE_NAME)
}

/// Walks up from `path` to the directory that owns a `docs/` store.
#[must_use]
pub fn find_data_path_from(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(dir) = current {
        if dir.file_name().and_then(|s| s.to_str()) == Some(DOCS_DIR_NAME) {
            return dir.parent().map(Path::to_path_buf);
        }
        if dir.join(DOCS_DIR_NAME).is_dir() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}
