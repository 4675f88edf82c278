pub const PASTE_START: &str = "\x1b[200~";
pub const PASTE_END: &str = "\x1b[201~";

/// Wrap `text` in bracketed-paste markers, splitting the body into pieces of
/// at most `chunk_size` bytes.
///
/// Cuts only fall on character boundaries. A character wider than
/// `chunk_size` gets a piece of its own.
pub fn build_bracketed_paste_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::with_capacity(text.len() / chunk_size.max(1) + 3);
    chunks.push(PASTE_START.to_string());
    chunks.extend(split_body(text, chunk_size));
    chunks.push(PASTE_END.to_string());
    chunks
}

/// Chunks for a paste into a program with or without bracketed paste mode.
/// Programs that never enabled mode 2004 get the bare text.
pub fn paste_chunks(text: &str, chunk_size: usize, bracketed: bool) -> Vec<String> {
    if bracketed {
        build_bracketed_paste_chunks(text, chunk_size)
    } else {
        split_body(text, chunk_size)
    }
}

fn split_body(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(text.len() / chunk_size + 1);
    let mut rest = text;
    while !rest.is_empty() {
        let mut cut = chunk_size.min(rest.len());
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_string());
        rest = tail;
    }
    chunks
}
