//! Content-Range 头解析：`bytes <start>-<end>/<total>`，闭区间。

/// 一个分片声明的字节区间。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// 严格解析 `bytes <start>-<end>/<total>`。
    ///
    /// 要求三个字段均为十进制数字，且 `start <= end < total`。
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix("bytes ")?;
        let (start, rest) = rest.split_once('-')?;
        let (end, total) = rest.split_once('/')?;
        let start = parse_decimal(start)?;
        let end = parse_decimal(end)?;
        let total = parse_decimal(total)?;
        if start > end || end >= total {
            return None;
        }
        Some(Self { start, end, total })
    }

    /// 区间覆盖的字节数（闭区间）。
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// 是否为最后一个分片。
    pub fn is_final(&self) -> bool {
        self.end + 1 == self.total
    }
}

fn parse_decimal(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::ContentRange;

    #[test]
    fn parses_well_formed_header() {
        let range = ContentRange::parse("bytes 0-4/10").expect("parse");
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 4);
        assert_eq!(range.total, 10);
        assert_eq!(range.len(), 5);
        assert!(!range.is_final());
    }

    #[test]
    fn detects_final_chunk() {
        let range = ContentRange::parse("bytes 5-9/10").expect("parse");
        assert!(range.is_final());
    }

    #[test]
    fn single_byte_chunk() {
        let range = ContentRange::parse("bytes 0-0/1").expect("parse");
        assert_eq!(range.len(), 1);
        assert!(range.is_final());
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in [
            "",
            "bytes",
            "bytes 0-4",
            "bytes 0-4/",
            "bytes a-4/10",
            "bytes 0-4/1x",
            "bytes 0-+4/10",
            "bytes -1-4/10",
            "0-4/10",
            "bytes 0_4/10",
        ] {
            assert!(ContentRange::parse(header).is_none(), "accepted {header:?}");
        }
    }

    #[test]
    fn rejects_inverted_or_overlong_range() {
        // start > end
        assert!(ContentRange::parse("bytes 5-4/10").is_none());
        // end 越过 total
        assert!(ContentRange::parse("bytes 0-10/10").is_none());
        assert!(ContentRange::parse("bytes 0-11/10").is_none());
    }
}
