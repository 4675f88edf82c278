use crate::terminal::InputModes;

const ESC: u8 = 0x1b;

/// Remove mouse reports from outbound input unless the program asked for them.
pub fn filter_outbound(data: &[u8], modes: InputModes) -> Vec<u8> {
    if modes.mouse_tracking {
        return data.to_vec();
    }
    strip_mouse_reports(data)
}

/// Strip SGR (`ESC[<b;x;yM`), urxvt (`ESC[b;x;yM`) and X10 (`ESC[M` + 3) reports.
pub fn strip_mouse_reports(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == ESC && data.get(i + 1) == Some(&b'[') {
            if let Some(len) = mouse_report_len(&data[i..]) {
                i += len;
                continue;
            }
        }
        out.push(data[i]);
        i += 1;
    }
    out
}

fn mouse_report_len(seq: &[u8]) -> Option<usize> {
    match seq.get(2)? {
        b'<' => {
            let body = parameter_run(&seq[3..])?;
            let end = 3 + body;
            match seq.get(end)? {
                b'M' | b'm' => Some(end + 1),
                _ => None,
            }
        }
        b'M' => (seq.len() >= 6 && seq[3..6].iter().all(|b| *b >= 32)).then_some(6),
        b'0'..=b'9' => {
            let body = parameter_run(&seq[2..])?;
            let end = 2 + body;
            (seq.get(end)? == &b'M').then_some(end + 1)
        }
        _ => None,
    }
}

/// Length of a `n;n;n` parameter list, or None if it is not exactly three numbers.
fn parameter_run(data: &[u8]) -> Option<usize> {
    let mut fields = 1;
    let mut digits = 0;
    for (idx, byte) in data.iter().enumerate() {
        match byte {
            b'0'..=b'9' => digits += 1,
            b';' if digits > 0 => {
                fields += 1;
                digits = 0;
            }
            _ => return (fields == 3 && digits > 0).then_some(idx),
        }
    }
    None
}

/// Wheel report for a program with mouse tracking enabled. `col` and `row`
/// are zero-based cells inside the pane.
pub fn encode_wheel(up: bool, col: u16, row: u16, modes: InputModes) -> Vec<u8> {
    let button: u16 = if up { 64 } else { 65 };
    if modes.sgr_mouse {
        format!("\x1b[<{};{};{}M", button, col + 1, row + 1).into_bytes()
    } else {
        let encode = |v: u16| (v.saturating_add(33)).min(255) as u8;
        vec![ESC, b'[', b'M', (button + 32) as u8, encode(col), encode(row)]
    }
}
