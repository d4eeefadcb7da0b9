use std::borrow::Cow;

/// Removes control characters that must never reach stored names or the
/// terminal: ESC-introduced sequences (CSI and OSC), C0 controls other than
/// tab/newline/carriage return, DEL, and C1 controls.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
///
/// # Examples
///
/// ```
/// use silkfeed::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("plain"), "plain");
/// assert_eq!(strip_control_chars("\x1b[31mred\x1b[0m"), "red");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(needs_strip) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                // CSI: parameters and intermediates up to a final byte in 0x40..=0x7e
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: everything up to BEL or ST (ESC \)
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        if !needs_strip(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}

fn needs_strip(c: char) -> bool {
    match c {
        '\t' | '\n' | '\r' => false,
        c if (c as u32) < 0x20 => true,
        '\x7f' => true,
        c if ('\u{80}'..='\u{9f}').contains(&c) => true,
        _ => false,
    }
}

/// Collapses every run of whitespace into a single space and trims the ends.
///
/// Newlines are kept (one per run) so that `<br>` breaks survive while the
/// indentation of pretty-printed HTML does not.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending: Option<char> = None;

    for c in s.chars() {
        if c.is_whitespace() {
            pending = match pending {
                Some('\n') => Some('\n'),
                _ if c == '\n' => Some('\n'),
                _ => Some(' '),
            };
            continue;
        }
        if let Some(ws) = pending.take() {
            if !out.is_empty() {
                out.push(ws);
            }
        }
        out.push(c);
    }

    out
}
