//! Append-only key/value log backing a [`super::PersistentMemory`]
//! (spec.md §4.8, §6), adapted directly from the append-only log file plus
//! in-memory keydir this crate's storage engine used for raw byte
//! key/value pairs. The entry format on disk is unchanged; only the
//! payload's meaning changes (a persistent cursor's encoded state instead
//! of an arbitrary value) and the key is always a UUID string.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::{CResult, Error};

type KeyDir = BTreeMap<String, (u64, u32)>;

/// An append-only log file of length-prefixed `(key, value)` entries,
/// where a `-1` value length marks a tombstone (spec.md §6: "deleted keys
/// are physically removed from the store").
///
/// - Key length as big-endian u32, key bytes (the key is always UTF-8).
/// - Value length as big-endian i32, or `-1` for tombstones, value bytes.
pub struct Store {
    path: PathBuf,
    file: std::fs::File,
    keydir: KeyDir,
}

impl Store {
    pub fn open(path: impl Into<PathBuf>) -> CResult<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Internal(format!("store file {} is locked by another process", path.display()))
        })?;
        let keydir = Self::build_keydir(&file)?;
        Ok(Self { path, file, keydir })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn build_keydir(file: &std::fs::File) -> CResult<KeyDir> {
        let mut keydir = KeyDir::new();
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file.try_clone()?);
        let mut pos = reader.seek(SeekFrom::Start(0))?;
        let mut len_buf = [0u8; 4];

        while pos < file_len {
            let mut read_entry = || -> std::io::Result<(String, u64, Option<u32>)> {
                reader.read_exact(&mut len_buf)?;
                let key_len = u32::from_be_bytes(len_buf);
                reader.read_exact(&mut len_buf)?;
                let value_len = match i32::from_be_bytes(len_buf) {
                    l if l >= 0 => Some(l as u32),
                    _ => None,
                };
                let value_pos = pos + 4 + 4 + key_len as u64;
                let mut key_bytes = vec![0u8; key_len as usize];
                reader.read_exact(&mut key_bytes)?;
                let key = String::from_utf8(key_bytes)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                if let Some(value_len) = value_len {
                    if value_pos + value_len as u64 > file_len {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "value extends beyond end of file",
                        ));
                    }
                    reader.seek_relative(value_len as i64)?;
                }
                Ok((key, value_pos, value_len))
            };

            match read_entry() {
                Ok((key, value_pos, Some(value_len))) => {
                    keydir.insert(key, (value_pos, value_len));
                    pos = value_pos + value_len as u64;
                }
                Ok((key, value_pos, None)) => {
                    keydir.remove(&key);
                    pos = value_pos;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::warn!("store: incomplete entry at offset {pos}, ignoring trailing bytes");
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(keydir)
    }

    pub fn get(&mut self, key: &str) -> CResult<Option<Vec<u8>>> {
        let Some(&(value_pos, value_len)) = self.keydir.get(key) else {
            return Ok(None);
        };
        let mut value = vec![0u8; value_len as usize];
        self.file.seek(SeekFrom::Start(value_pos))?;
        self.file.read_exact(&mut value)?;
        Ok(Some(value))
    }

    pub fn set(&mut self, key: &str, value: &[u8]) -> CResult<()> {
        let (pos, len) = self.write_entry(key, Some(value))?;
        let value_len = value.len() as u32;
        self.keydir.insert(key.to_owned(), (pos + len as u64 - value_len as u64, value_len));
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> CResult<()> {
        self.write_entry(key, None)?;
        self.keydir.remove(key);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keydir.contains_key(key)
    }

    pub fn sync(&mut self) -> CResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn write_entry(&mut self, key: &str, value: Option<&[u8]>) -> CResult<(u64, u32)> {
        let key_bytes = key.as_bytes();
        let key_len = key_bytes.len() as u32;
        let value_len_or_tombstone = value.map_or(-1, |v| v.len() as i32);
        let len = 4 + 4 + key_len + value.map_or(0, |v| v.len() as u32);

        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::with_capacity(len as usize, &mut self.file);
        writer.write_all(&key_len.to_be_bytes())?;
        writer.write_all(&value_len_or_tombstone.to_be_bytes())?;
        writer.write_all(key_bytes)?;
        if let Some(value) = value {
            writer.write_all(value)?;
        }
        writer.flush()?;
        Ok((pos, len))
    }

    /// Rewrites the log file keeping only live entries, the way stale
    /// tombstones and superseded values are reclaimed (spec.md §6's
    /// "deleted keys are physically removed" extended to superseded
    /// values too, matching the source engine's `compact`).
    pub fn compact(&mut self) -> CResult<()> {
        let mut tmp_path = self.path.clone();
        tmp_path.set_extension("compact");
        {
            let mut new_store = Store::open_unlocked(&tmp_path)?;
            let keys: Vec<String> = self.keydir.keys().cloned().collect();
            for key in keys {
                if let Some(value) = self.get(&key)? {
                    new_store.set(&key, &value)?;
                }
            }
            new_store.sync()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        let file = std::fs::OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.try_lock_exclusive()
            .map_err(|_| Error::Internal("store file locked during compaction".into()))?;
        self.keydir = Self::build_keydir(&file)?;
        self.file = file;
        Ok(())
    }

    fn open_unlocked(path: &Path) -> CResult<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).open(path)?;
        Ok(Self { path: path.to_owned(), file, keydir: KeyDir::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path().join("store.log")).unwrap();
        store.set("a", b"hello").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn delete_removes_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path().join("store.log")).unwrap();
        store.set("a", b"hello").unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn reopening_rebuilds_the_keydir_from_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        {
            let mut store = Store::open(&path).unwrap();
            store.set("a", b"1").unwrap();
            store.set("b", b"2").unwrap();
            store.delete("a").unwrap();
        }
        let mut reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap(), None);
        assert_eq!(reopened.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn compact_preserves_live_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let mut store = Store::open(&path).unwrap();
        store.set("a", b"1").unwrap();
        store.set("a", b"2").unwrap();
        store.set("b", b"3").unwrap();
        store.delete("b").unwrap();
        store.compact().unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get("b").unwrap(), None);
    }
}
