//! Append-only key/value store for corpus programs.
//!
//! The file starts with `MAGIC`, followed by frames:
//!
//! ```text
//! kind u8 | key_len u32 | key | seq u64 | uncompressed_len u32 | compressed_len u32 | value | crc32 u32
//! ```
//!
//! All integers are little-endian, `value` is brotli compressed and the crc
//! covers everything before it in the frame. Later frames for the same key
//! replace earlier ones. A `Version` frame carries the database version as a
//! u64 value and an empty key.

use super::compression::{compress, decompress};
use crate::{
    log::LogLevel::{LogDebug, LogWarn},
    scoped_fd::ScopedFd,
    util::{read_le_u32, read_le_u64},
};
use crc32fast::Hasher;
use nix::{fcntl::OFlag, sys::stat::Mode};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

pub const MAGIC: &[u8; 8] = b"T2CORPv1";

const KIND_VERSION: u8 = 1;
const KIND_RECORD: u8 = 2;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub val: Vec<u8>,
    pub seq: u64,
}

pub struct CorpusDb {
    path: PathBuf,
    version: u64,
    records: BTreeMap<String, Record>,
    /// Encoded frames not yet on disk.
    pending: Vec<u8>,
    /// The file must be rewritten from scratch on the next flush.
    rewrite: bool,
}

impl CorpusDb {
    /// Opens the database at `path`, creating it on the first flush if missing.
    pub fn open(path: &Path) -> io::Result<CorpusDb> {
        let mut db = CorpusDb {
            path: path.to_owned(),
            version: 0,
            records: BTreeMap::new(),
            pending: Vec::new(),
            rewrite: false,
        };
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                db.rewrite = true;
                return Ok(db);
            }
            Err(e) => return Err(e),
        };
        if data.is_empty() {
            db.rewrite = true;
            return Ok(db);
        }
        if !data.starts_with(MAGIC) {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("{}: not a corpus database", path.display()),
            ));
        }

        let mut pos = MAGIC.len();
        while pos < data.len() {
            match decode_frame(&data[pos..]) {
                Some((frame, used)) => {
                    db.apply(frame);
                    pos += used;
                }
                None => {
                    log!(
                        LogWarn,
                        "{}: corrupt or truncated record at offset {}, ignoring the rest",
                        path.display(),
                        pos
                    );
                    db.rewrite = true;
                    break;
                }
            }
        }
        log!(
            LogDebug,
            "opened {} with {} records, version {}",
            path.display(),
            db.records.len(),
            db.version
        );
        Ok(db)
    }

    fn apply(&mut self, frame: Frame) {
        match frame {
            Frame::Version(v) => self.version = v,
            Frame::Record { key, val, seq } => {
                self.records.insert(key, Record { val, seq });
            }
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn records(&self) -> &BTreeMap<String, Record> {
        &self.records
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stores `val` under `key`. Nothing reaches disk before `flush`.
    pub fn save(&mut self, key: &str, val: &[u8], seq: u64) -> io::Result<()> {
        if !self.rewrite {
            encode_frame(&mut self.pending, KIND_RECORD, key.as_bytes(), seq, val)?;
        }
        self.records.insert(
            key.to_owned(),
            Record {
                val: val.to_vec(),
                seq,
            },
        );
        Ok(())
    }

    pub fn bump_version(&mut self, version: u64) {
        if self.version != version {
            self.version = version;
            self.rewrite = true;
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if self.rewrite {
            self.write_all_records()?;
        } else if !self.pending.is_empty() {
            let fd = ScopedFd::open_path_with_mode(
                self.path.as_path(),
                OFlag::O_CLOEXEC | OFlag::O_WRONLY | OFlag::O_APPEND,
                Mode::empty(),
            )?;
            fd.write_all(&self.pending)?;
            fd.fsync()?;
        }
        self.pending.clear();
        self.rewrite = false;
        Ok(())
    }

    /// Writes the whole database to `<path>.tmp` and renames it into place.
    fn write_all_records(&self) -> io::Result<()> {
        let mut buf = MAGIC.to_vec();
        encode_frame(&mut buf, KIND_VERSION, b"", 0, &self.version.to_le_bytes())?;
        for (key, rec) in &self.records {
            encode_frame(&mut buf, KIND_RECORD, key.as_bytes(), rec.seq, &rec.val)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let fd = ScopedFd::open_path_with_mode(
                tmp.as_path(),
                OFlag::O_CLOEXEC | OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
                Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH,
            )?;
            fd.write_all(&buf)?;
            fd.fsync()?;
        }
        fs::rename(&tmp, &self.path)
    }
}

enum Frame {
    Version(u64),
    Record { key: String, val: Vec<u8>, seq: u64 },
}

fn encode_frame(out: &mut Vec<u8>, kind: u8, key: &[u8], seq: u64, val: &[u8]) -> io::Result<()> {
    let compressed = compress(val)?;
    let start = out.len();
    out.push(kind);
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&(val.len() as u32).to_le_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    out.extend_from_slice(&compressed);
    let mut hasher = Hasher::new();
    hasher.update(&out[start..]);
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
    Ok(())
}

/// Decodes the frame at the start of `buf`, returning it and its length.
fn decode_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    let kind = *buf.first()?;
    let mut pos = 1;
    let key_len = read_le_u32(buf.get(pos..)?)? as usize;
    pos += 4;
    let key = buf.get(pos..pos + key_len)?;
    pos += key_len;
    let seq = read_le_u64(buf.get(pos..)?)?;
    pos += 8;
    let uncompressed_len = read_le_u32(buf.get(pos..)?)? as usize;
    pos += 4;
    let compressed_len = read_le_u32(buf.get(pos..)?)? as usize;
    pos += 4;
    let compressed = buf.get(pos..pos + compressed_len)?;
    pos += compressed_len;
    let crc = read_le_u32(buf.get(pos..)?)?;

    let mut hasher = Hasher::new();
    hasher.update(&buf[..pos]);
    if hasher.finalize() != crc {
        return None;
    }
    pos += 4;

    let val = decompress(compressed, uncompressed_len).ok()?;
    let frame = match kind {
        KIND_VERSION => Frame::Version(read_le_u64(&val)?),
        KIND_RECORD => Frame::Record {
            key: String::from_utf8(key.to_vec()).ok()?,
            val,
            seq,
        },
        _ => return None,
    };
    Some((frame, pos))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    #[test]
    fn persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");

        let mut db = CorpusDb::open(&path).unwrap();
        assert!(db.is_empty());
        db.save("a", b"getpid()\n", 0).unwrap();
        db.save("b", b"close(0x1)\n", 0).unwrap();
        db.bump_version(3);
        db.flush().unwrap();
        assert!(!dir.path().join("corpus.db.tmp").exists());

        let mut db = CorpusDb::open(&path).unwrap();
        assert_eq!(db.version(), 3);
        assert_eq!(db.len(), 2);
        assert_eq!(db.records()["a"].val, b"getpid()\n");

        // Appends and overwrites without a rewrite.
        db.save("c", b"sched_yield()\n", 1).unwrap();
        db.save("a", b"getuid()\n", 2).unwrap();
        db.flush().unwrap();

        let db = CorpusDb::open(&path).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(
            db.records()["a"],
            Record {
                val: b"getuid()\n".to_vec(),
                seq: 2
            }
        );
        assert!(db.contains_key("c"));
        assert_eq!(db.version(), 3);
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        let mut db = CorpusDb::open(&path).unwrap();
        db.save("keep", b"getpid()\n", 0).unwrap();
        db.flush().unwrap();
        db.save("lost", b"getppid()\n", 0).unwrap();
        db.flush().unwrap();

        let full = fs::read(&path).unwrap();
        fs::write(&path, &full[..full.len() - 3]).unwrap();

        let mut db = CorpusDb::open(&path).unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.contains_key("keep"));
        // The next flush rewrites a clean file.
        db.flush().unwrap();
        assert_eq!(CorpusDb::open(&path).unwrap().len(), 1);

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[KIND_RECORD, 0xff, 0xff]).unwrap();
        assert_eq!(CorpusDb::open(&path).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_crc_stops_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        let mut db = CorpusDb::open(&path).unwrap();
        db.save("x", b"getpid()\n", 0).unwrap();
        db.flush().unwrap();

        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&path, &data).unwrap();
        assert!(CorpusDb::open(&path).unwrap().is_empty());
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        fs::write(&path, b"not a database").unwrap();
        assert_eq!(
            CorpusDb::open(&path).err().map(|e| e.kind()),
            Some(ErrorKind::InvalidData)
        );
    }
}
