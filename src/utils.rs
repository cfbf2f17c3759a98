use chrono::{Datelike, NaiveDate};

use crate::error::{EdfError, Result};

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Fixed-width ASCII field as text, surrounding padding removed.
///
/// Bytes outside printable ASCII become U+FFFD and are logged, since the
/// text no longer matches the file.
pub fn field_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes).trim().to_string();
    if bytes.iter().any(|&b| !(0x20..0x7F).contains(&b)) {
        log::warn!("header field {:?} holds bytes outside printable ASCII", text);
    }
    text
}

/// Parses a decimal integer field, naming `field` on failure.
///
/// Unlike C `atoi` an empty or malformed field is an error, never zero.
pub fn parse_int_field(bytes: &[u8], field: &str) -> Result<i64> {
    let text = field_text(bytes);
    let digits = text.strip_prefix('+').unwrap_or(&text);
    digits
        .parse::<i64>()
        .map_err(|_| EdfError::format(field, format!("not an integer: '{}'", text)))
}

/// Parses a decimal number field, naming `field` on failure.
pub fn parse_float_field(bytes: &[u8], field: &str) -> Result<f64> {
    let text = field_text(bytes);
    let value = text
        .parse::<f64>()
        .map_err(|_| EdfError::format(field, format!("not a number: '{}'", text)))?;
    if !value.is_finite() {
        return Err(EdfError::format(field, format!("not a finite number: '{}'", text)));
    }
    Ok(value)
}

/// 工具函数：将字符串转换为 7-bit ASCII，非 ASCII 替换为 '_'
pub fn to_ascii(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect()
}

/// Copies `text` into `field`, left-justified and space-padded, truncating
/// at the field width.
pub fn write_field(field: &mut [u8], text: &str) {
    field.fill(b' ');
    let ascii = to_ascii(text);
    let bytes = ascii.as_bytes();
    let len = bytes.len().min(field.len());
    if len < bytes.len() {
        log::debug!("truncating '{}' to {} bytes", text, field.len());
    }
    field[..len].copy_from_slice(&bytes[..len]);
}

/// Formats `value` as the shortest decimal text that fits `width` bytes.
///
/// Fractional digits are dropped until the text fits; a value whose integer
/// part alone is too wide is an error.
pub fn format_number(value: f64, width: usize, field: &str) -> Result<String> {
    if !value.is_finite() {
        return Err(EdfError::format(field, format!("cannot store {}", value)));
    }

    // Display 输出最短可往返的十进制表示，且不使用指数形式
    let exact = format!("{}", value);
    if exact.len() <= width {
        return Ok(exact);
    }

    for decimals in (0..width).rev() {
        let mut text = format!("{:.*}", decimals, value);
        if text.contains('.') {
            let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
            text.truncate(trimmed);
        }
        if text == "-0" {
            text = "0".to_string();
        }
        if text.len() <= width {
            log::debug!("{}: {} stored as {}", field, value, text);
            return Ok(text);
        }
    }

    Err(EdfError::format(
        field,
        format!("{} does not fit in {} characters", value, width),
    ))
}

/// EDF+ subfield encoding: unknown becomes `X`, spaces become `_`.
///
/// A literal `_` or a non-ASCII character cannot be read back;
/// `header::check_identification` rejects such values before they are
/// written.
pub fn encode_subfield(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        "X".to_string()
    } else {
        to_ascii(value).replace(' ', "_")
    }
}

/// Inverse of [`encode_subfield`].
pub fn decode_subfield(value: &str) -> String {
    if value == "X" {
        String::new()
    } else {
        value.replace('_', " ")
    }
}

/// Formats a date as EDF+ `dd-MMM-yyyy`.
pub fn format_edfplus_date(date: NaiveDate) -> String {
    format!(
        "{:02}-{}-{:04}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

/// Parses an EDF+ `dd-MMM-yyyy` date (month name case-insensitive).
pub fn parse_edfplus_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split('-');
    let day = parts.next()?.parse::<u32>().ok()?;
    let month_name = parts.next()?.to_ascii_uppercase();
    let year_text = parts.next()?;
    if parts.next().is_some() || year_text.len() != 4 {
        return None;
    }
    let year = year_text.parse::<i32>().ok()?;
    let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, day)
}
