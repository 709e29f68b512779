use std::fmt::Write;

/// Lower-case hex, two digits per byte.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // Writing to a String can't fail.
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Inverse of `to_hex`. Accepts either case; `None` on odd length or a non-hex digit.
pub fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

pub fn read_le_u32(buf: &[u8]) -> Option<u32> {
    let bytes = buf.get(..4)?;
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    Some(u32::from_le_bytes(word))
}

pub fn read_le_u64(buf: &[u8]) -> Option<u64> {
    let bytes = buf.get(..8)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    Some(u64::from_le_bytes(word))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex() {
        assert_eq!(to_hex(b"\x00\x2f\xff"), "002fff");
        assert_eq!(from_hex("002FfF"), Some(vec![0, 0x2f, 0xff]));
        assert_eq!(from_hex(""), Some(vec![]));
        assert_eq!(from_hex("abc"), None);
        assert_eq!(from_hex("zz"), None);
    }

    #[test]
    fn le_words() {
        assert_eq!(read_le_u32(&[1, 0, 0, 0, 9]), Some(1));
        assert_eq!(read_le_u64(&[0xff; 8]), Some(u64::MAX));
        assert_eq!(read_le_u64(&[0; 7]), None);
    }
}
