//! Flat JSON file store.
//!
//! Every `set` is a read-modify-write of the whole file, so this backend is
//! single-writer only: two processes writing different keys can lose one of
//! the updates. Replacement goes through a temp file and a rename, so readers
//! never observe a torn file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::value::TagValue;

use super::{ensure_finite, Store, StoreKind};

type FileData = IndexMap<SmolStr, TagValue>;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes writers inside this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<FileData, RuntimeError> {
        let text = fs::read_to_string(&self.path).map_err(|err| {
            RuntimeError::store(format!("read {}: {err}", self.path.display()))
        })?;
        serde_json::from_str(&text).map_err(|err| {
            RuntimeError::store(format!("parse {}: {err}", self.path.display()))
        })
    }

    fn persist(&self, data: &FileData) -> Result<(), RuntimeError> {
        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|err| RuntimeError::store(format!("encode store file: {err}")))?;
        write_atomic(&self.path, &bytes)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RuntimeError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| RuntimeError::store(format!("create {}: {err}", parent.display())))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let tmp = path.with_file_name(tmp_name);
    let mut file = fs::File::create(&tmp)
        .map_err(|err| RuntimeError::store(format!("create {}: {err}", tmp.display())))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|err| RuntimeError::store(format!("write {}: {err}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|err| {
        RuntimeError::store(format!(
            "rename {} -> {}: {err}",
            tmp.display(),
            path.display()
        ))
    })
}

impl Store for FileStore {
    fn kind(&self) -> StoreKind {
        StoreKind::File
    }

    fn initialize(
        &self,
        initial: &[(SmolStr, TagValue)],
        clear_existing: bool,
    ) -> Result<(), RuntimeError> {
        let _guard = self.write_lock.lock();
        let mut data = if !clear_existing && self.path.is_file() {
            self.load()?
        } else {
            FileData::new()
        };
        for (key, value) in initial {
            ensure_finite(key, value)?;
            data.insert(key.clone(), value.clone());
        }
        self.persist(&data)
    }

    fn set(&self, key: &str, value: &TagValue) -> Result<TagValue, RuntimeError> {
        ensure_finite(key, value)?;
        let _guard = self.write_lock.lock();
        let mut data = self.load()?;
        let slot = data
            .get_mut(key)
            .ok_or_else(|| RuntimeError::UninitializedKey(SmolStr::new(key)))?;
        *slot = value.clone();
        self.persist(&data)?;
        Ok(value.clone())
    }

    fn get(&self, key: &str) -> Result<TagValue, RuntimeError> {
        let mut data = self.load()?;
        data.swap_remove(key)
            .ok_or_else(|| RuntimeError::UninitializedKey(SmolStr::new(key)))
    }
}
