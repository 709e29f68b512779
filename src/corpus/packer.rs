use super::corpus_db::CorpusDb;
use crate::{log::LogLevel::LogDebug, prog::Program};
use std::io;

/// Version marking the corpus as already minimized.
pub const CURRENT_DB_VERSION: u64 = 3;

#[derive(Debug, Default, Eq, PartialEq)]
pub struct PackStats {
    pub saved: usize,
    /// Programs whose content hash was already taken.
    pub disambiguated: usize,
}

/// Hex blake3 digest of a serialized program.
pub fn content_key(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// A key not yet in `db`: the content hash, else the hash followed by the
/// program's index, else that followed by `-1`, `-2`...
fn unique_key(db: &CorpusDb, data: &[u8], index: usize) -> (String, bool) {
    let key = content_key(data);
    if !db.contains_key(&key) {
        return (key, false);
    }
    let base = format!("{}{}", key, index);
    let mut key = base.clone();
    let mut n = 1;
    while db.contains_key(&key) {
        key = format!("{}-{}", base, n);
        n += 1;
    }
    (key, true)
}

/// Saves every program under a unique key, marks the database minimized and
/// flushes it once.
pub fn pack(db: &mut CorpusDb, programs: &[Program]) -> io::Result<PackStats> {
    let mut stats = PackStats::default();
    db.bump_version(CURRENT_DB_VERSION);
    for (i, program) in programs.iter().enumerate() {
        let data = program.serialize();
        let (key, renamed) = unique_key(db, &data, i);
        if renamed {
            log!(LogDebug, "program {} duplicates an existing key, saving as {}", i, key);
            stats.disambiguated += 1;
        }
        db.save(&key, &data, 0)?;
        stats.saved += 1;
    }
    db.flush()?;
    Ok(stats)
}
