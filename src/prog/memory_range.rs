use core::cmp::Ordering;
use std::cmp::{max, min};
use std::fmt::{Display, Formatter, Result};
use std::ops::Deref;

/// A half-open range of addresses in the data area.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct MemoryRange {
    start_: u64,
    end_: u64,
}

/// Note: The end point (end_) is NOT included in the MemoryRange
impl MemoryRange {
    pub fn new_range(addr: u64, num_bytes: u64) -> MemoryRange {
        MemoryRange {
            start_: addr,
            end_: addr + num_bytes,
        }
    }

    pub fn from_range(addr: u64, end: u64) -> MemoryRange {
        let result = MemoryRange {
            start_: addr,
            end_: end,
        };
        debug_assert!(result.start_ <= result.end_);
        result
    }

    /// Return true iff `other` is an address range fully contained by self.
    pub fn contains(&self, other: &Self) -> bool {
        self.start_ <= other.start_ && other.end_ <= self.end_
    }

    pub fn intersects(&self, other: &MemoryRange) -> bool {
        let s = max(self.start_, other.start_);
        let e = min(self.end_, other.end_);
        s < e
    }

    pub fn end(&self) -> u64 {
        self.end_
    }

    pub fn size(&self) -> u64 {
        self.end_ - self.start_
    }
}

impl Display for MemoryRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{:#x}-{:#x}", self.start_, self.end_)
    }
}

/// Wrapper whose ordering treats intersecting ranges as equal, so a
/// `BTreeMap<MemoryRangeKey, _>` lookup finds any region overlapping the key.
#[derive(Copy, Clone, Debug)]
pub struct MemoryRangeKey(pub MemoryRange);

impl PartialOrd for MemoryRangeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemoryRangeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0.intersects(&other.0) {
            Ordering::Equal
        } else {
            self.0.start_.cmp(&other.0.start_)
        }
    }
}

impl PartialEq for MemoryRangeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MemoryRangeKey {}

impl Deref for MemoryRangeKey {
    type Target = MemoryRange;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<MemoryRange> for MemoryRangeKey {
    fn from(r: MemoryRange) -> Self {
        MemoryRangeKey(r)
    }
}

#[cfg(test)]
mod test {
    use super::{MemoryRange, MemoryRangeKey};
    use std::collections::{BTreeMap, BTreeSet};

    fn key(start: u64, end: u64) -> MemoryRangeKey {
        MemoryRangeKey(MemoryRange::from_range(start, end))
    }

    #[test]
    pub fn test_overlapping_insert() {
        let mut m: BTreeSet<MemoryRangeKey> = BTreeSet::new();
        assert!(m.insert(key(0, 10)));
        assert!(m.insert(key(10, 15)));
        // Overlaps the first range.
        assert!(!m.insert(key(1, 10)));
        assert_eq!(m.len(), 2);

        let hit = m.get(&key(3, 11)).unwrap();
        assert_eq!(**hit, MemoryRange::from_range(0, 10));
        assert!(m.remove(&key(3, 11)));
        assert!(m.remove(&key(3, 11)));
        assert!(!m.remove(&key(3, 11)));
        assert!(m.is_empty());
    }

    #[test]
    pub fn test_map_lookup() {
        let mut m: BTreeMap<MemoryRangeKey, usize> = BTreeMap::new();
        m.insert(key(0x100, 0x108), 1);
        m.insert(key(0x200, 0x210), 2);
        assert_eq!(m.get(&key(0x20f, 0x210)), Some(&2));
        assert_eq!(m.get(&key(0x108, 0x200)), None);
        assert!(key(0, 0x10).contains(&key(4, 8)));
        assert_eq!(key(4, 8).size(), 4);
        assert_eq!(format!("{}", *key(0x10, 0x20)), "0x10-0x20");
    }
}
