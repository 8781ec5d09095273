#[allow(unused_imports)]
use std::ascii::AsciiExt;

// Header values arrive as raw byte sequences.  Comparison has to be
// case-insensitive and tolerant to surrounding whitespace, without
// allocating.
fn is_exactly(val: &[u8], token: &[u8]) -> bool {
    let mut iter = val.iter();
    let mut idx = 0;
    loop {
        match iter.next() {
            Some(&ch) if matches!(ch, b'\r' | b'\n' | b' ' | b'\t') => {
                idx += 1;
                continue;
            }
            Some(&ch) if ch.eq_ignore_ascii_case(&token[0]) => {
                if idx + token.len() > val.len() {
                    return false;
                }
                break;
            }
            _ => return false,
        }
    }
    for (idx, ch) in iter.by_ref().take(token.len() - 1).enumerate() {
        if token[idx + 1] != ch.to_ascii_lowercase() {
            return false;
        }
    }
    for &ch in iter {
        if !matches!(ch, b'\r' | b'\n' | b' ' | b'\t') {
            return false;
        }
    }
    return true;
}

pub fn is_close(val: &[u8]) -> bool {
    is_exactly(val, b"close")
}

pub fn is_chunked(val: &[u8]) -> bool {
    is_exactly(val, b"chunked")
}

#[cfg(test)]
mod test {
    use super::{is_chunked, is_close};

    #[test]
    fn test_chunked() {
        assert!(is_chunked(b"chunked"));
        assert!(is_chunked(b"Chunked"));
        assert!(is_chunked(b"chuNKED"));
        assert!(is_chunked(b"CHUNKED"));
        assert!(is_chunked(b"   CHUNKED"));
        assert!(is_chunked(b"   CHUNKED  "));
        assert!(is_chunked(b"chunked  "));
        assert!(!is_chunked(b"   CHUNKED 1 "));
        assert!(!is_chunked(b"chunke"));
    }

    #[test]
    fn test_close() {
        assert!(is_close(b"close"));
        assert!(is_close(b"Close"));
        assert!(is_close(b"clOSE"));
        assert!(is_close(b"CLOSE"));
        assert!(is_close(b" CLOSE"));
        assert!(is_close(b"   close   "));
        assert!(!is_close(b"Close  1 "));
        assert!(!is_close(b" xclose   "));
    }
}
