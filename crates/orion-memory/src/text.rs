//! 文本规范化与内容寻址

use sha1::{Digest, Sha1};

/// 去掉首尾空白并把连续空白压成单个空格
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// sha1(text) 十六进制的前 16 位
pub fn content_hash(text: &str) -> String {
    let digest = Sha1::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

/// 按字符截断，截断时追加省略号
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}…", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  hello \n\t world  "), "hello world");
        assert_eq!(normalize("   "), "");
        assert_eq!(word_count("one  two\nthree"), 3);
    }

    #[test]
    fn test_content_hash() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        assert_eq!(content_hash("abc"), "a9993e364706816a");
        assert_eq!(content_hash("abc").len(), 16);
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc…");
        assert_eq!(truncate_chars("ab cdef", 3), "ab…");
        assert_eq!(truncate_chars("日本語のテキスト", 3), "日本語…");
    }
}
