//! Terminal control-sequence stripping.
//!
//! Daemon console output is raw PTY text. Colours, cursor movement,
//! window-title (OSC) sequences, charset selection and carriage returns
//! are removed so only printable text reaches the line buffer.

const ESC: char = '\x1b';
const BEL: char = '\x07';

/// Remove escape sequences and stray control characters from `input`.
///
/// Newlines and tabs are kept. Unterminated sequences at the end of the
/// input are dropped.
#[must_use]
pub fn strip_control_codes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ESC => match chars.next() {
                // CSI: ESC [ params intermediates final(0x40..=0x7E)
                Some('[') => {
                    for next in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&next) {
                            break;
                        }
                    }
                }
                // OSC: ESC ] ... (BEL | ESC \)
                Some(']') => {
                    while let Some(next) = chars.next() {
                        if next == BEL {
                            break;
                        }
                        if next == ESC && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                // Charset designation: ESC ( B, ESC ) 0, ...
                Some('(' | ')' | '*' | '+') => {
                    chars.next();
                }
                // Two-byte sequences (ESC 7, ESC =, ESC M, ...) or a lone ESC.
                Some(_) | None => {}
            },
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out
}
