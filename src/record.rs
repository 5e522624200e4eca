use crate::error::RecordError;

/// Byte separating the key from the value on every input line.
pub const SEPARATOR: u8 = b';';

/// One parsed line. Borrows the key from the line it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record<'a> {
    pub key: &'a str,
    pub value: f64,
}

/// Parse one line (without its `\n` terminator) into a record.
///
/// A trailing `\r` is ignored. The line must contain exactly one separator with a non-empty
/// UTF-8 key on its left; the right side must parse as a finite number.
pub fn parse_record(line: &[u8]) -> Result<Record<'_>, RecordError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let mut fields = line.split(|&b| b == SEPARATOR);
    let (Some(key), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(RecordError::Malformed);
    };

    if key.is_empty() {
        return Err(RecordError::Malformed);
    }
    let key = std::str::from_utf8(key).map_err(|_| RecordError::Malformed)?;

    let invalid = || RecordError::InvalidValue(String::from_utf8_lossy(value).into_owned());
    let text = std::str::from_utf8(value).map_err(|_| invalid())?;
    let value: f64 = text.parse().map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(invalid());
    }

    Ok(Record { key, value })
}

/// Iterate the lines of a batch buffer. Every line in a batch is `\n` terminated.
pub fn batch_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    // An empty buffer holds no lines, not one empty line.
    let has_lines = !bytes.is_empty();
    body.split(|&b| b == b'\n').filter(move |_| has_lines)
}
