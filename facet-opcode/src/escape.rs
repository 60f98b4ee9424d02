//! JSON string escaping.

/// Writes `s` as a quoted JSON string.
///
/// With `html_safe`, `<`, `>` and `&` are written as `\u003c`, `\u003e` and
/// `\u0026`, and the line/paragraph separators U+2028 and U+2029 are escaped
/// too, so the output can be embedded in HTML `<script>` blocks.
pub fn write_json_string(out: &mut Vec<u8>, s: &str, html_safe: bool) {
    // Two speeds. Windows of 16 bytes that are plain ASCII with nothing to
    // escape are copied as-is; a window that fails the test is walked
    // character by character through `write_json_escaped_char`, and the
    // short tail that does not fill a window always takes the slow path.
    const STEP_SIZE: usize = Window::BITS as usize / 8;
    type Window = u128;
    type Chunk = [u8; STEP_SIZE];

    out.push(b'"');

    let mut s = s;
    while let Some(Ok(chunk)) = s.as_bytes().get(..STEP_SIZE).map(Chunk::try_from) {
        let window = Window::from_ne_bytes(chunk);
        let completely_ascii = window & splat(0x80) == 0;
        let mut plain = completely_ascii
            && !contains_byte(window, b'"')
            && !contains_byte(window, b'\\')
            && top_three_bits_set(window);
        if plain && html_safe {
            plain = !contains_byte(window, b'<')
                && !contains_byte(window, b'>')
                && !contains_byte(window, b'&');
        }

        if plain {
            out.extend_from_slice(&chunk);
            s = &s[STEP_SIZE..];
        } else {
            let mut chars = s.chars();
            let mut count = STEP_SIZE;
            for c in &mut chars {
                write_json_escaped_char(out, c, html_safe);
                count = count.saturating_sub(c.len_utf8());
                if count == 0 {
                    break;
                }
            }
            s = chars.as_str();
        }
    }

    for c in s.chars() {
        write_json_escaped_char(out, c, html_safe);
    }

    out.push(b'"');
}

const HEX: &[u8; 16] = b"0123456789abcdef";

fn write_unicode_escape(out: &mut Vec<u8>, code_point: u32) {
    out.extend_from_slice(&[
        b'\\',
        b'u',
        HEX[((code_point >> 12) & 0xF) as usize],
        HEX[((code_point >> 8) & 0xF) as usize],
        HEX[((code_point >> 4) & 0xF) as usize],
        HEX[(code_point & 0xF) as usize],
    ]);
}

#[inline]
fn write_json_escaped_char(out: &mut Vec<u8>, c: char, html_safe: bool) {
    match c {
        '"' => out.extend_from_slice(b"\\\""),
        '\\' => out.extend_from_slice(b"\\\\"),
        '\n' => out.extend_from_slice(b"\\n"),
        '\r' => out.extend_from_slice(b"\\r"),
        '\t' => out.extend_from_slice(b"\\t"),
        '\u{08}' => out.extend_from_slice(b"\\b"),
        '\u{0C}' => out.extend_from_slice(b"\\f"),
        c if (c as u32) < 0x20 => write_unicode_escape(out, c as u32),
        '<' | '>' | '&' | '\u{2028}' | '\u{2029}' if html_safe => {
            write_unicode_escape(out, c as u32)
        }
        c if c.is_ascii() => out.push(c as u8),
        c => {
            let mut buf = [0; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
}

#[inline]
const fn splat(byte: u8) -> u128 {
    u128::from_ne_bytes([byte; 16])
}

/// Whether any of the 16 bytes of `window` equals `byte`.
#[inline]
fn contains_byte(window: u128, byte: u8) -> bool {
    let xor_result = window ^ splat(byte);
    let has_zero = (xor_result.wrapping_sub(splat(0x01))) & !xor_result & splat(0x80);
    has_zero != 0
}

/// For each of the 16 bytes of `value`, check that one of the top three bits is set.
#[inline]
fn top_three_bits_set(value: u128) -> bool {
    let xor_result = value & splat(0xe0);
    let has_zero = (xor_result.wrapping_sub(splat(0x01))) & !xor_result & splat(0x80);
    has_zero == 0
}
