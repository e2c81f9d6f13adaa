// Encoding / delimiter / header sniffing for loosely structured text files
//
// Encoding selection is "first decoder that does not fail": there is no
// plausibility scoring, so an encoding that decodes into garbage is still
// accepted. Callers that need a second opinion iterate `decode_candidates`.

use encoding_rs::{Encoding, GB18030, GBK, UTF_16BE, UTF_16LE, UTF_8};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Candidate field delimiters, in priority order.
pub const DELIMITER_CANDIDATES: [char; 5] = ['|', '\t', ',', ';', ' '];

/// Returned whenever nothing better can be inferred.
pub const DEFAULT_DELIMITER: char = ',';

/// How many non-blank lines the dialect sniffer looks at.
const SAMPLE_LINES: usize = 30;

/// Share of sampled lines that must agree on a delimiter count.
const CONSISTENCY_THRESHOLD: f64 = 0.9;

// ============================================================================
// ENCODING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextEncoding {
    Utf8Bom,
    Utf8,
    Gbk,
    Gb18030,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl TextEncoding {
    /// Priority order used for every text file.
    pub const PRIORITY: [TextEncoding; 6] = [
        TextEncoding::Utf8Bom,
        TextEncoding::Utf8,
        TextEncoding::Gbk,
        TextEncoding::Gb18030,
        TextEncoding::Utf16Le, // endianness is resolved from the BOM at decode time
        TextEncoding::Latin1,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8Bom => "UTF-8 (BOM)",
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Gbk => "GBK",
            TextEncoding::Gb18030 => "GB18030",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Latin1 => "Latin-1",
        }
    }

    /// Strict decode: `None` on any malformed sequence.
    fn decode(&self, bytes: &[u8]) -> Option<(TextEncoding, String)> {
        match self {
            TextEncoding::Utf8Bom => {
                let body = bytes.strip_prefix(b"\xEF\xBB\xBF")?;
                strict(UTF_8, body).map(|s| (TextEncoding::Utf8Bom, s))
            }
            TextEncoding::Utf8 => strict(UTF_8, bytes).map(|s| (TextEncoding::Utf8, s)),
            TextEncoding::Gbk => strict(GBK, bytes).map(|s| (TextEncoding::Gbk, s)),
            TextEncoding::Gb18030 => strict(GB18030, bytes).map(|s| (TextEncoding::Gb18030, s)),
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => decode_utf16(bytes),
            TextEncoding::Latin1 => Some((
                TextEncoding::Latin1,
                bytes.iter().map(|&b| b as char).collect(),
            )),
        }
    }
}

fn strict(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|cow| cow.into_owned())
}

/// UTF-16 with BOM detection; no BOM means little-endian.
fn decode_utf16(bytes: &[u8]) -> Option<(TextEncoding, String)> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    if let Some(body) = bytes.strip_prefix(b"\xFF\xFE") {
        return strict(UTF_16LE, body).map(|s| (TextEncoding::Utf16Le, s));
    }
    if let Some(body) = bytes.strip_prefix(b"\xFE\xFF") {
        return strict(UTF_16BE, body).map(|s| (TextEncoding::Utf16Be, s));
    }
    strict(UTF_16LE, bytes).map(|s| (TextEncoding::Utf16Le, s))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub encoding: TextEncoding,
    /// Line endings normalized to `\n`, BOM removed.
    pub text: String,
}

/// Every successful decoding, in priority order.
pub fn decode_candidates(bytes: &[u8]) -> Vec<Decoded> {
    TextEncoding::PRIORITY
        .iter()
        .filter_map(|enc| enc.decode(bytes))
        .map(|(encoding, text)| Decoded {
            encoding,
            text: normalize_text(&text),
        })
        .collect()
}

/// First encoding in priority order that decodes the bytes.
pub fn decode(bytes: &[u8]) -> Option<Decoded> {
    TextEncoding::PRIORITY.iter().find_map(|enc| {
        enc.decode(bytes).map(|(encoding, text)| Decoded {
            encoding,
            text: normalize_text(&text),
        })
    })
}

/// Normalize line endings and drop a leading byte-order mark.
pub fn normalize_text(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ============================================================================
// DELIMITER
// ============================================================================

/// Result of sniffing raw bytes end to end.
#[derive(Debug, Clone)]
pub struct Sniffed {
    pub encoding: TextEncoding,
    pub text: String,
    pub delimiter: char,
}

/// Decode with the first working encoding and infer the delimiter.
pub fn sniff(bytes: &[u8]) -> Option<Sniffed> {
    let decoded = decode(bytes)?;
    let delimiter = sniff_delimiter(&decoded.text);
    debug!(
        encoding = decoded.encoding.name(),
        delimiter = ?delimiter,
        "sniffed text file"
    );
    Some(Sniffed {
        encoding: decoded.encoding,
        text: decoded.text,
        delimiter,
    })
}

/// Infer the delimiter of decoded text.
///
/// First a consistency pass over the sample (the same non-zero count of the
/// candidate on nearly every line); when nothing is consistent, the
/// first-non-blank-line field count decides.
pub fn sniff_delimiter(text: &str) -> char {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim_start_matches('\u{feff}'))
        .filter(|l| !l.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect();

    let Some(first) = lines.first() else {
        return DEFAULT_DELIMITER;
    };

    if let Some(delimiter) = consistent_delimiter(&lines) {
        return delimiter;
    }

    first_line_delimiter(first)
}

fn consistent_delimiter(lines: &[&str]) -> Option<char> {
    DELIMITER_CANDIDATES.iter().copied().find(|&candidate| {
        let mut frequencies: HashMap<usize, usize> = HashMap::new();
        for line in lines {
            *frequencies
                .entry(count_outside_quotes(line, candidate))
                .or_default() += 1;
        }

        // Modal count; ties resolved towards the larger count.
        let Some((&modal, &hits)) = frequencies
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))
        else {
            return false;
        };

        modal > 0 && hits as f64 / lines.len() as f64 >= CONSISTENCY_THRESHOLD
    })
}

/// Pick the candidate that splits the line into the most fields. A candidate
/// must strictly beat the previous best, so priority order breaks ties.
pub fn first_line_delimiter(line: &str) -> char {
    let mut best = None;
    let mut best_fields = 1;

    for candidate in DELIMITER_CANDIDATES {
        let fields = line.split(candidate).count();
        if fields > best_fields {
            best = Some(candidate);
            best_fields = fields;
        }
    }

    best.unwrap_or(DEFAULT_DELIMITER)
}

fn count_outside_quotes(line: &str, delimiter: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Split on runs of whitespace (ASCII and full-width space).
pub fn split_whitespace_runs(line: &str) -> Vec<String> {
    line.split(|c: char| c.is_whitespace() || c == '\u{3000}')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// HEADER
// ============================================================================

/// Guess whether the first row is a header.
///
/// Each column votes: a mostly-numeric column votes "header" when its first
/// cell is not numeric, and a text column with a fixed cell length votes
/// "header" when the first cell has a different length.
pub fn sniff_header(rows: &[Vec<String>]) -> bool {
    let Some((first, body)) = rows.split_first() else {
        return false;
    };
    if body.is_empty() {
        return false;
    }

    let mut votes: i32 = 0;
    for (col, head) in first.iter().enumerate() {
        let head = head.trim();
        let cells: Vec<&str> = body
            .iter()
            .take(SAMPLE_LINES)
            .filter_map(|r| r.get(col))
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if cells.is_empty() || head.is_empty() {
            continue;
        }

        let numeric = cells.iter().filter(|c| looks_numeric(c)).count();
        if numeric * 2 > cells.len() {
            votes += if looks_numeric(head) { -1 } else { 1 };
            continue;
        }

        let lengths: HashSet<usize> = cells.iter().map(|c| c.chars().count()).collect();
        if lengths.len() == 1 {
            let body_len = cells[0].chars().count();
            votes += if head.chars().count() != body_len { 1 } else { -1 };
        }
    }

    votes > 0
}

fn looks_numeric(cell: &str) -> bool {
    let cleaned: String = cell.chars().filter(|c| *c != ',').collect();
    !cleaned.is_empty() && cleaned.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_gbk_pipe_file_is_sniffed() {
        let (bytes, _, had_errors) = GBK.encode("102100099996|中国人民银行清算总中心\n");
        assert!(!had_errors);
        assert!(std::str::from_utf8(&bytes).is_err(), "fixture must not be valid UTF-8");

        let sniffed = sniff(&bytes).unwrap();
        assert_eq!(sniffed.encoding, TextEncoding::Gbk);
        assert_eq!(sniffed.delimiter, '|');
        assert!(sniffed.text.contains("中国人民银行清算总中心"));
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("code,name\r\n1,a\r\n".as_bytes());

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.encoding, TextEncoding::Utf8Bom);
        assert_eq!(decoded.text, "code,name\n1,a\n");
    }

    #[test]
    fn test_utf16_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "a\tb\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        // The leading 0xFF makes this invalid UTF-8 and GBK.
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.encoding, TextEncoding::Utf16Le);
        assert_eq!(decoded.text, "a\tb\n");
    }

    #[test]
    fn test_latin1_is_last_resort() {
        // 0xFF is invalid in UTF-8 and GBK; odd length rules out UTF-16.
        let bytes = [b'a', 0xFF, b'b'];
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.encoding, TextEncoding::Latin1);
        assert_eq!(decoded.text.chars().count(), 3);
    }

    #[test]
    fn test_decode_candidates_preserve_priority() {
        let candidates = decode_candidates("abc".as_bytes());
        let order: Vec<TextEncoding> = candidates.iter().map(|d| d.encoding).collect();
        assert_eq!(order[0], TextEncoding::Utf8);
        assert_eq!(order.last(), Some(&TextEncoding::Latin1));
    }

    #[test]
    fn test_consistent_delimiter_wins_by_priority() {
        let text = "a;b c;d\ne;f g;h\ni;j k;l\n";
        // ';' and ' ' are both consistent; ';' comes first in priority.
        assert_eq!(sniff_delimiter(text), ';');
    }

    #[test]
    fn test_tab_delimited() {
        assert_eq!(sniff_delimiter("1\t2\t3\n4\t5\t6\n"), '\t');
    }

    #[test]
    fn test_quoted_commas_are_ignored() {
        let text = "\"a,b\"|c\n\"d,e,f\"|g\n";
        assert_eq!(sniff_delimiter(text), '|');
    }

    #[test]
    fn test_fallback_uses_first_line_field_count() {
        // Counts differ on every line, so nothing is consistent.
        let text = "a b c d,e\nf,g,h\ni j\nk\n";
        assert_eq!(sniff_delimiter(text), ' ');
    }

    #[test]
    fn test_empty_input_returns_default() {
        assert_eq!(sniff_delimiter(""), DEFAULT_DELIMITER);
        assert_eq!(sniff_delimiter("\u{feff}\r\n\r\n"), DEFAULT_DELIMITER);
        assert_eq!(first_line_delimiter("single"), DEFAULT_DELIMITER);
    }

    #[test]
    fn test_sniff_header_detects_code_column_header() {
        let data = rows(&[
            &["行号", "名称"],
            &["102100099996", "中国人民银行"],
            &["103100000026", "中国农业银行"],
        ]);
        assert!(sniff_header(&data));
    }

    #[test]
    fn test_sniff_header_rejects_data_first_row() {
        let data = rows(&[
            &["102100099996", "中国人民银行"],
            &["103100000026", "中国农业银行"],
            &["104100000004", "中国银行"],
        ]);
        assert!(!sniff_header(&data));
        assert!(!sniff_header(&data[..1]));
    }

    #[test]
    fn test_split_whitespace_runs_handles_fullwidth_space() {
        assert_eq!(
            split_whitespace_runs("102100099996  001\u{3000}Bank X"),
            vec!["102100099996", "001", "Bank", "X"]
        );
    }
}
