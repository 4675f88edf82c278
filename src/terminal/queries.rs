//! Terminal queries hosted programs send to their terminal.
//!
//! vt100 parses but never answers these, and agents such as Codex stall until
//! they receive a cursor position report. The output path strips them before
//! the emulator sees them and answers through the transport instead.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalQuery {
    /// DSR 6, cursor position report request.
    CursorPosition,
    /// Primary device attributes.
    PrimaryAttributes,
    /// Secondary device attributes.
    SecondaryAttributes,
}

// Longer patterns first so `ESC[>0c` is not read as `ESC[>c` + junk.
const PATTERNS: &[(&[u8], TerminalQuery)] = &[
    (b"\x1b[>0c", TerminalQuery::SecondaryAttributes),
    (b"\x1b[>c", TerminalQuery::SecondaryAttributes),
    (b"\x1b[0c", TerminalQuery::PrimaryAttributes),
    (b"\x1b[6n", TerminalQuery::CursorPosition),
    (b"\x1b[c", TerminalQuery::PrimaryAttributes),
];

// VT102 identification
const DA_RESPONSE: &[u8] = b"\x1b[?6c";
const DA2_RESPONSE: &[u8] = b"\x1b[>0;0;0c";

/// Split `data` into the output to render and the queries found in it.
pub fn extract_queries(data: &[u8]) -> (Vec<u8>, Vec<TerminalQuery>) {
    if !data.contains(&0x1b) {
        return (data.to_vec(), Vec::new());
    }

    let mut output = Vec::with_capacity(data.len());
    let mut queries = Vec::new();
    let mut i = 0;
    'outer: while i < data.len() {
        if data[i] == 0x1b {
            for (pattern, query) in PATTERNS {
                if data[i..].starts_with(pattern) {
                    queries.push(*query);
                    i += pattern.len();
                    continue 'outer;
                }
            }
        }
        output.push(data[i]);
        i += 1;
    }
    (output, queries)
}

/// Reply for `query`; `cursor` is the zero-based (row, col) of the cursor.
pub fn response(query: TerminalQuery, cursor: (u16, u16)) -> Vec<u8> {
    match query {
        TerminalQuery::CursorPosition => {
            format!("\x1b[{};{}R", cursor.0 + 1, cursor.1 + 1).into_bytes()
        }
        TerminalQuery::PrimaryAttributes => DA_RESPONSE.to_vec(),
        TerminalQuery::SecondaryAttributes => DA2_RESPONSE.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_output_passes_through() {
        let (out, queries) = extract_queries(b"hello \x1b[1mworld\x1b[0m");
        assert_eq!(out, b"hello \x1b[1mworld\x1b[0m");
        assert!(queries.is_empty());
    }

    #[test]
    fn test_strips_every_query_kind() {
        let (out, queries) = extract_queries(b"a\x1b[6nb\x1b[cc\x1b[0cd\x1b[>ce\x1b[>0cf");
        assert_eq!(out, b"abcdef");
        assert_eq!(
            queries,
            vec![
                TerminalQuery::CursorPosition,
                TerminalQuery::PrimaryAttributes,
                TerminalQuery::PrimaryAttributes,
                TerminalQuery::SecondaryAttributes,
                TerminalQuery::SecondaryAttributes,
            ]
        );
    }

    #[test]
    fn test_cursor_report_is_one_based() {
        assert_eq!(
            response(TerminalQuery::CursorPosition, (0, 4)),
            b"\x1b[1;5R".to_vec()
        );
    }

    #[test]
    fn test_device_attribute_responses() {
        assert_eq!(response(TerminalQuery::PrimaryAttributes, (0, 0)), b"\x1b[?6c");
        assert_eq!(
            response(TerminalQuery::SecondaryAttributes, (0, 0)),
            b"\x1b[>0;0;0c"
        );
    }
}
