//! `.properties` parameter files
//!
//! Executables that prefer a file over environment variables read their
//! parameters from a Java-style properties file whose path is passed in the
//! `*_PARAMETERS_PROPERTIES_FILE` protocol variable.

use std::fmt::Write as _;
use std::io::{self, Write};
use tempfile::NamedTempFile;

use ccube_sdk::types::Parameters;

/// Writes `parameters` to a fresh temporary properties file.
///
/// The file is removed when the returned handle is dropped.
pub fn write_properties(parameters: &Parameters) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("ccube-")
        .suffix(".properties")
        .tempfile()?;

    // every character left after escaping fits in one ISO-8859-1 byte
    let latin1: Vec<u8> = render_properties(parameters)
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    file.write_all(&latin1)?;
    file.flush()?;
    Ok(file)
}

/// Renders one `key=value` line per parameter, in key order
pub fn render_properties(parameters: &Parameters) -> String {
    let mut rendered = String::new();
    for (key, value) in parameters.iter() {
        let _ = writeln!(
            rendered,
            "{}={}",
            escape(key, true),
            escape(&value.to_string(), false)
        );
    }
    rendered
}

fn escape(text: &str, is_key: bool) -> String {
    let mut escaped = String::with_capacity(text.len());
    for (index, c) in text.chars().enumerate() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '=' | ':' if is_key => {
                escaped.push('\\');
                escaped.push(c);
            }
            // leading whitespace of a value would be swallowed by the reader
            ' ' if is_key || index == 0 => escaped.push_str("\\ "),
            // a leading comment marker would hide the whole line
            '#' | '!' if is_key && index == 0 => {
                escaped.push('\\');
                escaped.push(c);
            }
            // readers decode the file as ISO-8859-1
            c if u32::from(c) > 0xff => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(escaped, "\\u{:04x}", unit);
                }
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
