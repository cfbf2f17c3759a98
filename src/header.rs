//! Fixed-width ASCII header codec.
//!
//! The main header is 256 bytes; it is followed by one 256-byte block per
//! signal, stored column-major (all labels, then all transducers, ...).

use std::ops::Range;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

use crate::error::{EdfError, Result};
use crate::types::{EdfHeader, FileType, SignalParam, BDF_ANNOTATIONS_LABEL, EDF_ANNOTATIONS_LABEL};
use crate::utils::{
    decode_subfield, encode_subfield, field_text, format_edfplus_date, format_number,
    parse_edfplus_date, parse_float_field, parse_int_field, to_ascii, write_field,
};
use crate::EDFLIB_MAXSIGNALS;

pub const MAIN_HEADER_SIZE: usize = 256;
pub const SIGNAL_HEADER_SIZE: usize = 256;

pub const VERSION: Range<usize> = 0..8;
pub const PATIENT_ID: Range<usize> = 8..88;
pub const RECORDING_ID: Range<usize> = 88..168;
pub const START_DATE: Range<usize> = 168..176;
pub const START_TIME: Range<usize> = 176..184;
pub const HEADER_BYTES: Range<usize> = 184..192;
pub const RESERVED: Range<usize> = 192..236;
pub const NUM_RECORDS: Range<usize> = 236..244;
pub const RECORD_DURATION: Range<usize> = 244..252;
pub const NUM_SIGNALS: Range<usize> = 252..256;

/// Name and width of each per-signal field, in on-disk order.
pub const SIGNAL_FIELDS: [(&str, usize); 10] = [
    ("label", 16),
    ("transducer", 80),
    ("physical_dimension", 8),
    ("physical_min", 8),
    ("physical_max", 8),
    ("digital_min", 8),
    ("digital_max", 8),
    ("prefilter", 80),
    ("samples_per_record", 8),
    ("reserved", 32),
];

/// Options for header parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderOptions {
    /// Two-digit years below the pivot are 20yy, the rest 19yy.
    pub year_pivot: u32,
    /// Reject two-digit years that have no four-digit source instead of
    /// applying the pivot.
    pub strict_century: bool,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        HeaderOptions {
            year_pivot: 85,
            strict_century: false,
        }
    }
}

/// Total header size for `signal_count` signals.
pub fn header_size(signal_count: usize) -> usize {
    MAIN_HEADER_SIZE + signal_count * SIGNAL_HEADER_SIZE
}

/// Number of signals declared by a main header, without validating the rest.
pub fn declared_signal_count(main_header: &[u8]) -> Result<usize> {
    if main_header.len() < MAIN_HEADER_SIZE {
        return Err(EdfError::Truncated {
            expected: MAIN_HEADER_SIZE as u64,
            actual: main_header.len() as u64,
        });
    }
    let count = parse_int_field(&main_header[NUM_SIGNALS], "num_signals")?;
    if count < 1 || count > EDFLIB_MAXSIGNALS as i64 {
        return Err(EdfError::InvalidSignalCount(count));
    }
    Ok(count as usize)
}

/// Parses a complete header with default options.
pub fn parse_header(bytes: &[u8]) -> Result<(EdfHeader, Vec<SignalParam>)> {
    parse_header_with(bytes, &HeaderOptions::default())
}

/// Parses a complete header (main header plus every signal block).
///
/// The returned signal list includes annotation channels, in file order.
pub fn parse_header_with(bytes: &[u8], options: &HeaderOptions) -> Result<(EdfHeader, Vec<SignalParam>)> {
    let signal_count = declared_signal_count(bytes)?;
    let is_bdf = parse_version(&bytes[VERSION])?;

    let expected_size = header_size(signal_count);
    let declared_size = parse_int_field(&bytes[HEADER_BYTES], "header_bytes")?;
    if declared_size != expected_size as i64 {
        return Err(EdfError::format(
            "header_bytes",
            format!("expected {} for {} signals, found {}", expected_size, signal_count, declared_size),
        ));
    }
    if bytes.len() < expected_size {
        return Err(EdfError::Truncated {
            expected: expected_size as u64,
            actual: bytes.len() as u64,
        });
    }

    let file_type = parse_file_type(is_bdf, &bytes[RESERVED])?;

    let datarecords_in_file = parse_int_field(&bytes[NUM_RECORDS], "num_records")?;
    if datarecords_in_file < -1 {
        return Err(EdfError::format(
            "num_records",
            format!("negative record count {}", datarecords_in_file),
        ));
    }
    let datarecord_duration = parse_float_field(&bytes[RECORD_DURATION], "record_duration")?;
    if datarecord_duration <= 0.0 {
        return Err(EdfError::format(
            "record_duration",
            format!("must be positive, got {}", datarecord_duration),
        ));
    }

    let signals = parse_signals(&bytes[MAIN_HEADER_SIZE..expected_size], signal_count, file_type)?;
    if file_type.is_plus() && !signals.iter().any(|s| s.is_annotation()) {
        return Err(EdfError::format(
            "label",
            format!("{} file has no '{}' channel", file_type.reserved_marker(), file_type.annotation_label()),
        ));
    }

    let mut header = EdfHeader::new(file_type);
    header.datarecords_in_file = datarecords_in_file;
    header.datarecord_duration = datarecord_duration;

    let patient_field = field_text(&bytes[PATIENT_ID]);
    let recording_field = field_text(&bytes[RECORDING_ID]);
    let mut recording_year = None;

    if file_type.is_plus() {
        parse_edfplus_patient(&patient_field, &mut header);
        recording_year = parse_edfplus_recording(&recording_field, &mut header)?;
    } else {
        header.patient_additional = patient_field;
        header.recording_additional = recording_field;
    }

    header.start_date = parse_start_date(&bytes[START_DATE], recording_year, options)?;
    header.start_time = parse_start_time(&bytes[START_TIME])?;

    log::debug!(
        "parsed {:?} header: {} signals, {} records of {}s",
        file_type,
        signal_count,
        datarecords_in_file,
        datarecord_duration
    );

    Ok((header, signals))
}

fn parse_version(field: &[u8]) -> Result<bool> {
    if field[0] == 0xFF && &field[1..8] == b"BIOSEMI" {
        return Ok(true);
    }
    if field_text(field) == "0" {
        return Ok(false);
    }
    Err(EdfError::UnsupportedFileType(format!(
        "version field is '{}', expected '0' or 0xFF BIOSEMI",
        String::from_utf8_lossy(field)
    )))
}

fn parse_file_type(is_bdf: bool, reserved: &[u8]) -> Result<FileType> {
    let reserved = field_text(reserved);
    let file_type = match (is_bdf, reserved.get(..5).unwrap_or("")) {
        (false, "EDF+C") => FileType::EdfPlusC,
        (false, "EDF+D") => FileType::EdfPlusD,
        (true, "BDF+C") => FileType::BdfPlusC,
        (true, "BDF+D") => FileType::BdfPlusD,
        (false, marker) if marker.starts_with("BDF+") => {
            return Err(EdfError::format("reserved", "BDF+ marker in an EDF file"));
        }
        (true, marker) if marker.starts_with("EDF+") => {
            return Err(EdfError::format("reserved", "EDF+ marker in a BDF file"));
        }
        (false, _) => FileType::Edf,
        (true, _) => FileType::Bdf,
    };
    Ok(file_type)
}

/// 解析信号参数（按列存储）
fn parse_signals(block: &[u8], count: usize, file_type: FileType) -> Result<Vec<SignalParam>> {
    // 每个字段在块中的起始偏移
    let mut columns = Vec::with_capacity(SIGNAL_FIELDS.len());
    let mut start = 0;
    for (name, width) in SIGNAL_FIELDS {
        columns.push((name, width, start));
        start += width * count;
    }
    let field = |column: usize, i: usize| {
        let (_, width, offset) = columns[column];
        &block[offset + i * width..offset + (i + 1) * width]
    };
    let name = |column: usize, i: usize| format!("{}[{}]", columns[column].0, i);

    let mut signals = Vec::with_capacity(count);
    for i in 0..count {
        let label = field_text(field(0, i));
        let is_annotation = label == EDF_ANNOTATIONS_LABEL || label == BDF_ANNOTATIONS_LABEL;

        let samples_per_record = parse_int_field(field(8, i), &name(8, i))?;
        if samples_per_record < 1 {
            return Err(EdfError::format(
                name(8, i),
                format!("must be greater than zero, got {}", samples_per_record),
            ));
        }

        // 注释通道的数值字段不参与校验，解析失败时取默认值
        let (physical_min, physical_max, digital_min, digital_max) = if is_annotation {
            (
                parse_float_field(field(3, i), &name(3, i)).unwrap_or(-1.0),
                parse_float_field(field(4, i), &name(4, i)).unwrap_or(1.0),
                parse_int_field(field(5, i), &name(5, i)).unwrap_or(-32768) as i32,
                parse_int_field(field(6, i), &name(6, i)).unwrap_or(32767) as i32,
            )
        } else {
            (
                parse_float_field(field(3, i), &name(3, i))?,
                parse_float_field(field(4, i), &name(4, i))?,
                parse_digital(field(5, i), &name(5, i))?,
                parse_digital(field(6, i), &name(6, i))?,
            )
        };

        let signal = SignalParam {
            label,
            transducer: field_text(field(1, i)),
            physical_dimension: field_text(field(2, i)),
            physical_min,
            physical_max,
            digital_min,
            digital_max,
            prefilter: field_text(field(7, i)),
            samples_per_record: samples_per_record as usize,
            reserved: field_text(field(9, i)),
        };
        signal.validate(file_type).map_err(|e| match e {
            EdfError::InvalidRange { reason, .. } => EdfError::range(format!("signal {} ({})", i, signal.label), reason),
            other => other,
        })?;
        signals.push(signal);
    }

    Ok(signals)
}

fn parse_digital(bytes: &[u8], field: &str) -> Result<i32> {
    let value = parse_int_field(bytes, field)?;
    i32::try_from(value).map_err(|_| EdfError::format(field, format!("{} is out of range", value)))
}

/// EDF+ 患者字段格式: "code sex birthdate name additional"
fn parse_edfplus_patient(field: &str, header: &mut EdfHeader) {
    let (parts, rest) = split_subfields(field, 4);
    let part = |i: usize| parts.get(i).map(|s| decode_subfield(s)).unwrap_or_default();
    header.patient_code = part(0);
    header.sex = part(1);
    header.birthdate = part(2);
    header.patient_name = part(3);
    header.patient_additional = rest;
}

/// EDF+ 记录字段格式: "Startdate dd-MMM-yyyy admincode technician equipment additional"
///
/// Returns the four-digit year of the start date subfield, if present.
fn parse_edfplus_recording(field: &str, header: &mut EdfHeader) -> Result<Option<i32>> {
    let (parts, rest) = split_subfields(field, 5);
    if parts.first().map(String::as_str) != Some("Startdate") {
        return Err(EdfError::format(
            "recording_id",
            format!("EDF+ recording field must start with 'Startdate', got '{}'", field),
        ));
    }
    let part = |i: usize| parts.get(i).map(|s| decode_subfield(s)).unwrap_or_default();
    header.admin_code = part(2);
    header.technician = part(3);
    header.equipment = part(4);
    header.recording_additional = rest;

    Ok(parts
        .get(1)
        .and_then(|date| parse_edfplus_date(date))
        .map(|date| date.year()))
}

fn split_subfields(text: &str, count: usize) -> (Vec<String>, String) {
    let mut rest = text.trim_start();
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        if rest.is_empty() {
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        parts.push(rest[..end].to_string());
        rest = rest[end..].trim_start();
    }
    (parts, rest.trim_end().to_string())
}

/// 解析日期 "dd.mm.yy"
fn parse_start_date(field: &[u8], four_digit_year: Option<i32>, options: &HeaderOptions) -> Result<NaiveDate> {
    let text = field_text(field);
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 3 {
        return Err(EdfError::format("startdate", format!("expected dd.mm.yy, got '{}'", text)));
    }
    let number = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| EdfError::format("startdate", format!("expected dd.mm.yy, got '{}'", text)))
    };
    let day = number(parts[0])?;
    let month = number(parts[1])?;

    let year = match (parts[2], four_digit_year) {
        (_, Some(year)) => year,
        ("yy", None) => {
            return Err(EdfError::format(
                "startdate",
                "year 'yy' requires a four-digit year in the recording field",
            ));
        }
        (yy, None) => {
            let yy = number(yy)?;
            if yy > 99 {
                return Err(EdfError::format("startdate", format!("invalid year '{}'", yy)));
            }
            if options.strict_century {
                return Err(EdfError::format(
                    "startdate",
                    format!("two-digit year '{:02}' has ambiguous century", yy),
                ));
            }
            let year = if yy < options.year_pivot { 2000 + yy } else { 1900 + yy };
            log::warn!(
                "startdate year '{:02}' has no four-digit source, inferred as {} (pivot {})",
                yy,
                year,
                options.year_pivot
            );
            year as i32
        }
    };

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| EdfError::format("startdate", format!("'{}' is not a valid date", text)))
}

/// 解析时间 "hh.mm.ss"
fn parse_start_time(field: &[u8]) -> Result<NaiveTime> {
    let text = field_text(field);
    let parts: Vec<u32> = text
        .split(|c: char| c == '.' || c == ':')
        .map(|s| s.trim().parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| EdfError::format("starttime", format!("expected hh.mm.ss, got '{}'", text)))?;
    if parts.len() != 3 {
        return Err(EdfError::format("starttime", format!("expected hh.mm.ss, got '{}'", text)));
    }
    NaiveTime::from_hms_opt(parts[0], parts[1], parts[2])
        .ok_or_else(|| EdfError::format("starttime", format!("'{}' is not a valid time", text)))
}

/// Builds the 80-byte patient and recording identification fields.
pub fn serialize_identification(header: &EdfHeader) -> Result<([u8; 80], [u8; 80])> {
    let mut patient = [b' '; 80];
    let mut recording = [b' '; 80];

    if header.file_type.is_plus() {
        for (name, value) in [
            ("patient_code", &header.patient_code),
            ("sex", &header.sex),
            ("birthdate", &header.birthdate),
            ("patient_name", &header.patient_name),
            ("admin_code", &header.admin_code),
            ("technician", &header.technician),
            ("equipment", &header.equipment),
        ] {
            check_identification(name, value, true)?;
        }
        check_identification("patient_additional", &header.patient_additional, false)?;
        check_identification("recording_additional", &header.recording_additional, false)?;

        let mut patient_text = format!(
            "{} {} {} {}",
            encode_subfield(&header.patient_code),
            encode_subfield(&header.sex),
            encode_subfield(&header.birthdate),
            encode_subfield(&header.patient_name),
        );
        append_additional(&mut patient_text, &header.patient_additional);

        let mut recording_text = format!(
            "Startdate {} {} {} {}",
            format_edfplus_date(header.start_date),
            encode_subfield(&header.admin_code),
            encode_subfield(&header.technician),
            encode_subfield(&header.equipment),
        );
        append_additional(&mut recording_text, &header.recording_additional);

        warn_truncation("patient_id", &patient_text);
        warn_truncation("recording_id", &recording_text);
        write_field(&mut patient, &patient_text);
        write_field(&mut recording, &recording_text);
    } else {
        let subfields = [
            ("patient_code", &header.patient_code),
            ("sex", &header.sex),
            ("birthdate", &header.birthdate),
            ("patient_name", &header.patient_name),
            ("admin_code", &header.admin_code),
            ("technician", &header.technician),
            ("equipment", &header.equipment),
        ];
        if let Some((name, _)) = subfields.iter().find(|(_, value)| !value.is_empty()) {
            return Err(EdfError::format(
                *name,
                format!("{:?} files have no EDF+ subfields; use the additional fields", header.file_type),
            ));
        }
        check_identification("patient_additional", &header.patient_additional, false)?;
        check_identification("recording_additional", &header.recording_additional, false)?;
        write_field(&mut patient, &header.patient_additional);
        write_field(&mut recording, &header.recording_additional);
    }

    Ok((patient, recording))
}

/// Rejects identification text that would read back differently: non-ASCII
/// characters, control bytes, and `_` inside an EDF+ subfield (it decodes
/// as a space).
pub fn check_identification(name: &str, value: &str, subfield: bool) -> Result<()> {
    if let Some(c) = value.chars().find(|c| !c.is_ascii() || c.is_ascii_control()) {
        return Err(EdfError::InvalidArgument(format!(
            "{} {:?} contains {:?}; header fields are printable ASCII",
            name, value, c
        )));
    }
    if subfield && value.contains('_') {
        return Err(EdfError::InvalidArgument(format!(
            "{} {:?} contains '_', which EDF+ subfields use for spaces",
            name, value
        )));
    }
    Ok(())
}

/// Number of subfields before the free text in the EDF+ patient field.
pub const PATIENT_SUBFIELDS: usize = 4;
/// Same for the recording field, counting the leading `Startdate`.
pub const RECORDING_SUBFIELDS: usize = 5;

/// 找出前 `leading` 个子字段和其后附加文本的字节范围
fn subfield_spans(text: &[u8], leading: usize) -> (Vec<Range<usize>>, Range<usize>) {
    let mut spans = Vec::with_capacity(leading);
    let mut pos = 0;
    let skip_spaces = |mut pos: usize| {
        while pos < text.len() && text[pos] == b' ' {
            pos += 1;
        }
        pos
    };
    while spans.len() < leading {
        pos = skip_spaces(pos);
        if pos == text.len() {
            break;
        }
        let start = pos;
        while pos < text.len() && text[pos] != b' ' {
            pos += 1;
        }
        spans.push(start..pos);
    }
    let pos = skip_spaces(pos);
    (spans, pos..text.len())
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &field[..end]
}

/// Raw bytes of the first `leading` subfields of an identification field
/// followed by its free text; missing subfields are empty.
pub fn subfield_tokens(field: &[u8], leading: usize) -> Vec<&[u8]> {
    let text = trim_padding(field);
    let (spans, additional) = subfield_spans(text, leading);
    let mut tokens: Vec<&[u8]> = spans.into_iter().map(|span| &text[span]).collect();
    tokens.resize(leading, &[][..]);
    tokens.push(&text[additional]);
    tokens
}

/// Rewrites selected subfields of an 80-byte EDF+ identification field.
///
/// `edits` pairs a subfield index with its new value; index `leading` is the
/// free text. Every byte outside the edited subfields is kept as written,
/// including unusual spacing and tokens this crate cannot parse.
pub fn splice_subfields(field: &[u8], leading: usize, edits: &[(usize, &str)]) -> [u8; 80] {
    let text = trim_padding(field);
    let (spans, additional) = subfield_spans(text, leading);
    let replacement = |index: usize| edits.iter().rev().find(|(i, _)| *i == index).map(|(_, v)| *v);

    let mut out: Vec<u8> = Vec::with_capacity(80);
    let mut cursor = 0;
    for index in 0..leading {
        match spans.get(index) {
            Some(span) => {
                out.extend_from_slice(&text[cursor..span.start]);
                match replacement(index) {
                    Some(value) => out.extend_from_slice(encode_subfield(value).as_bytes()),
                    None => out.extend_from_slice(&text[span.clone()]),
                }
                cursor = span.end;
            }
            None => {
                // 字段中缺少的子字段补为 X
                if !out.is_empty() {
                    out.push(b' ');
                }
                let value = replacement(index).map_or_else(|| "X".to_string(), encode_subfield);
                out.extend_from_slice(value.as_bytes());
            }
        }
    }
    match replacement(leading) {
        Some(value) => {
            let value = value.trim();
            if !value.is_empty() {
                out.push(b' ');
                out.extend_from_slice(value.as_bytes());
            }
        }
        None if !additional.is_empty() => out.extend_from_slice(&text[cursor..additional.end]),
        None => {}
    }

    if out.len() > 80 {
        log::warn!("identification field is {} bytes, truncated to 80", out.len());
        out.truncate(80);
    }
    let mut result = [b' '; 80];
    result[..out.len()].copy_from_slice(&out);
    result
}

fn append_additional(text: &mut String, additional: &str) {
    let additional = additional.trim();
    if !additional.is_empty() {
        text.push(' ');
        text.push_str(&to_ascii(additional));
    }
}

fn warn_truncation(field: &str, text: &str) {
    if text.len() > 80 {
        log::warn!("{} is {} bytes, truncated to 80", field, text.len());
    }
}

/// Serializes a complete header. Everything is validated before any byte is
/// produced.
pub fn serialize_header(header: &EdfHeader, signals: &[SignalParam]) -> Result<Vec<u8>> {
    header.validate()?;
    if signals.is_empty() || signals.len() > EDFLIB_MAXSIGNALS {
        return Err(EdfError::InvalidSignalCount(signals.len() as i64));
    }
    for signal in signals {
        signal.validate(header.file_type)?;
    }
    if header.file_type.is_plus() && !signals.iter().any(|s| s.is_annotation()) {
        return Err(EdfError::format(
            "label",
            format!("{:?} header needs an annotation channel", header.file_type),
        ));
    }

    let year = header.start_date.year();
    let year_field = if header.file_type.is_plus() {
        if year > 2084 {
            "yy".to_string()
        } else {
            format!("{:02}", year.rem_euclid(100))
        }
    } else {
        if !(1985..=2084).contains(&year) {
            return Err(EdfError::format(
                "startdate",
                format!("year {} cannot be stored as two digits in a plain EDF/BDF header", year),
            ));
        }
        format!("{:02}", year % 100)
    };

    let (patient, recording) = serialize_identification(header)?;
    let total_size = header_size(signals.len());
    let mut bytes = vec![b' '; total_size];

    bytes[VERSION].copy_from_slice(&header.file_type.version_bytes());
    bytes[PATIENT_ID].copy_from_slice(&patient);
    bytes[RECORDING_ID].copy_from_slice(&recording);

    // 开始日期 "dd.mm.yy" 与开始时间 "hh.mm.ss"
    let date = header.start_date;
    write_field(
        &mut bytes[START_DATE],
        &format!("{:02}.{:02}.{}", date.day(), date.month(), year_field),
    );
    let time = header.start_time;
    write_field(
        &mut bytes[START_TIME],
        &format!("{:02}.{:02}.{:02}", time.hour(), time.minute(), time.second()),
    );

    write_field(&mut bytes[HEADER_BYTES], &total_size.to_string());
    write_field(&mut bytes[RESERVED], header.file_type.reserved_marker());
    write_field(
        &mut bytes[NUM_RECORDS],
        &fit_integer(header.datarecords_in_file, 8, "num_records")?,
    );
    write_field(
        &mut bytes[RECORD_DURATION],
        &format_number(header.datarecord_duration, 8, "record_duration")?,
    );
    write_field(&mut bytes[NUM_SIGNALS], &signals.len().to_string());

    // 按列写入信号头部：每个字段所有信号一起写
    let mut offset = MAIN_HEADER_SIZE;
    for (column, (name, width)) in SIGNAL_FIELDS.iter().enumerate() {
        for (i, signal) in signals.iter().enumerate() {
            let field_name = format!("{}[{}]", name, i);
            let text = match column {
                0 => signal.label.clone(),
                1 => signal.transducer.clone(),
                2 => signal.physical_dimension.clone(),
                3 => format_number(signal.physical_min, *width, &field_name)?,
                4 => format_number(signal.physical_max, *width, &field_name)?,
                5 => fit_integer(signal.digital_min as i64, *width, &field_name)?,
                6 => fit_integer(signal.digital_max as i64, *width, &field_name)?,
                7 => signal.prefilter.clone(),
                8 => fit_integer(signal.samples_per_record as i64, *width, &field_name)?,
                _ => signal.reserved.clone(),
            };
            write_field(&mut bytes[offset..offset + width], &text);
            offset += width;
        }
    }

    Ok(bytes)
}

fn fit_integer(value: i64, width: usize, field: &str) -> Result<String> {
    let text = value.to_string();
    if text.len() > width {
        return Err(EdfError::format(field, format!("{} does not fit in {} characters", value, width)));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eeg(label: &str, samples_per_record: usize) -> SignalParam {
        SignalParam {
            label: label.to_string(),
            transducer: "AgAgCl electrodes".to_string(),
            physical_dimension: "uV".to_string(),
            physical_min: -200.0,
            physical_max: 200.0,
            digital_min: -32768,
            digital_max: 32767,
            prefilter: "HP:0.1Hz LP:70Hz".to_string(),
            samples_per_record,
            reserved: String::new(),
        }
    }

    fn plus_header() -> EdfHeader {
        let mut header = EdfHeader::new(FileType::EdfPlusC);
        header.patient_code = "P001".to_string();
        header.sex = "F".to_string();
        header.birthdate = "15-MAR-1990".to_string();
        header.patient_name = "Jane Doe".to_string();
        header.patient_additional = "left handed".to_string();
        header.admin_code = "420".to_string();
        header.technician = "tech".to_string();
        header.equipment = "eeg".to_string();
        header.recording_additional = "radd".to_string();
        header.start_date = NaiveDate::from_ymd_opt(2021, 6, 3).unwrap();
        header.start_time = NaiveTime::from_hms_opt(13, 5, 59).unwrap();
        header.datarecords_in_file = 300;
        header.datarecord_duration = 1.0;
        header
    }

    #[test]
    fn test_edfplus_round_trip() {
        let header = plus_header();
        let signals = vec![
            eeg("EEG Fp1", 256),
            eeg("ECG", 200),
            SignalParam::new_annotation(FileType::EdfPlusC, 120),
        ];
        let bytes = serialize_header(&header, &signals).unwrap();
        assert_eq!(bytes.len(), 256 * 4);
        assert_eq!(&bytes[RESERVED][..5], b"EDF+C");
        assert_eq!(&bytes[START_DATE], b"03.06.21");
        assert_eq!(&bytes[START_TIME], b"13.05.59");

        let (parsed, parsed_signals) = parse_header(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed_signals, signals);
    }

    #[test]
    fn test_column_major_layout() {
        let header = EdfHeader::new(FileType::Edf);
        let signals = vec![eeg("A", 1), eeg("B", 2)];
        let bytes = serialize_header(&header, &signals).unwrap();
        // 两个标签相邻存放
        assert_eq!(&bytes[256..272], b"A               ");
        assert_eq!(&bytes[272..288], b"B               ");
        assert_eq!(&bytes[288..291], b"AgA");
        let samples_start = 256 + 216 * 2;
        assert_eq!(&bytes[samples_start..samples_start + 16], b"1       2       ");
    }

    #[test]
    fn test_discontinuous_and_bdf_markers_round_trip() {
        for file_type in [FileType::EdfPlusD, FileType::BdfPlusC, FileType::BdfPlusD] {
            let mut header = plus_header();
            header.file_type = file_type;
            let signals = vec![eeg("EEG", 64), SignalParam::new_annotation(file_type, 120)];
            let bytes = serialize_header(&header, &signals).unwrap();
            let (parsed, _) = parse_header(&bytes).unwrap();
            assert_eq!(parsed.file_type, file_type);
        }

        let mut bdf = EdfHeader::new(FileType::Bdf);
        bdf.patient_additional = "local patient".to_string();
        let mut signal = eeg("EEG", 64);
        signal.digital_min = -8388608;
        signal.digital_max = 8388607;
        let bytes = serialize_header(&bdf, &[signal.clone()]).unwrap();
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(&bytes[RESERVED][..5], b"24BIT");
        let (parsed, signals) = parse_header(&bytes).unwrap();
        assert_eq!(parsed, bdf);
        assert_eq!(signals[0], signal);
    }

    #[test]
    fn test_plain_edf_keeps_raw_identification() {
        let mut header = EdfHeader::new(FileType::Edf);
        header.patient_additional = "MCH-0234567 F 02-MAY-1951 Haagse_Harry".to_string();
        header.recording_additional = "Startdate 02-MAR-2002 EMG561 BK/JOP".to_string();
        header.start_date = NaiveDate::from_ymd_opt(2002, 3, 2).unwrap();
        let bytes = serialize_header(&header, &[eeg("EMG", 100)]).unwrap();
        let (parsed, _) = parse_header(&bytes).unwrap();
        assert_eq!(parsed, header);

        header.patient_name = "Harry".to_string();
        assert!(serialize_header(&header, &[eeg("EMG", 100)]).is_err());
    }

    #[test]
    fn test_version_must_be_zero() {
        let mut bytes = serialize_header(&EdfHeader::new(FileType::Edf), &[eeg("A", 1)]).unwrap();
        bytes[0] = b'1';
        let err = parse_header(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn test_parse_errors_name_the_field() {
        let good = serialize_header(&EdfHeader::new(FileType::Edf), &[eeg("A", 1)]).unwrap();

        let mut bytes = good.clone();
        bytes[RECORD_DURATION].copy_from_slice(b"abc     ");
        assert!(parse_header(&bytes).unwrap_err().to_string().contains("record_duration"));

        let mut bytes = good.clone();
        bytes[RECORD_DURATION].copy_from_slice(b"0       ");
        assert!(parse_header(&bytes).is_err());

        let mut bytes = good.clone();
        let digital_min = 256 + 120;
        bytes[digital_min..digital_min + 8].copy_from_slice(b"40000   ");
        let err = parse_header(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Range);

        let mut bytes = good.clone();
        bytes[HEADER_BYTES].copy_from_slice(b"256     ");
        assert!(parse_header(&bytes).unwrap_err().to_string().contains("header_bytes"));

        assert!(matches!(
            parse_header(&good[..300]).unwrap_err(),
            EdfError::Truncated { .. }
        ));
    }

    #[test]
    fn test_inverted_limits_rejected_before_serializing() {
        let mut signal = eeg("A", 1);
        signal.digital_min = 10;
        signal.digital_max = -10;
        let err = serialize_header(&EdfHeader::new(FileType::Edf), &[signal]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Range);
    }

    #[test]
    fn test_year_pivot() {
        let mut header = EdfHeader::new(FileType::Edf);
        header.start_date = NaiveDate::from_ymd_opt(1985, 1, 1).unwrap();
        let mut bytes = serialize_header(&header, &[eeg("A", 1)]).unwrap();

        bytes[START_DATE].copy_from_slice(b"01.01.84");
        assert_eq!(parse_header(&bytes).unwrap().0.start_date.year(), 2084);
        bytes[START_DATE].copy_from_slice(b"01.01.85");
        assert_eq!(parse_header(&bytes).unwrap().0.start_date.year(), 1985);

        let options = HeaderOptions { year_pivot: 70, strict_century: false };
        bytes[START_DATE].copy_from_slice(b"01.01.80");
        assert_eq!(parse_header_with(&bytes, &options).unwrap().0.start_date.year(), 1980);

        let strict = HeaderOptions { strict_century: true, ..HeaderOptions::default() };
        assert!(parse_header_with(&bytes, &strict).is_err());
    }

    #[test]
    fn test_four_digit_year_from_recording_field() {
        let mut header = plus_header();
        header.start_date = NaiveDate::from_ymd_opt(2090, 12, 31).unwrap();
        let signals = vec![eeg("A", 1), SignalParam::new_annotation(FileType::EdfPlusC, 120)];
        let bytes = serialize_header(&header, &signals).unwrap();
        assert_eq!(&bytes[START_DATE], b"31.12.yy");

        let strict = HeaderOptions { strict_century: true, ..HeaderOptions::default() };
        let (parsed, _) = parse_header_with(&bytes, &strict).unwrap();
        assert_eq!(parsed.start_date, header.start_date);

        header.start_date = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        let bytes = serialize_header(&header, &signals).unwrap();
        assert_eq!(parse_header(&bytes).unwrap().0.start_date, header.start_date);
    }

    #[test]
    fn test_colon_separated_time_is_accepted() {
        let mut bytes = serialize_header(&EdfHeader::new(FileType::Edf), &[eeg("A", 1)]).unwrap();
        bytes[START_TIME].copy_from_slice(b"10:20:30");
        let (header, _) = parse_header(&bytes).unwrap();
        assert_eq!(header.start_time, NaiveTime::from_hms_opt(10, 20, 30).unwrap());
    }

    #[test]
    fn test_edfplus_without_annotation_channel_is_rejected() {
        let err = serialize_header(&plus_header(), &[eeg("A", 1)]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn test_unknown_subfields_round_trip_as_empty() {
        let mut header = EdfHeader::new(FileType::EdfPlusC);
        header.patient_name = "x".to_string();
        let signals = vec![eeg("A", 1), SignalParam::new_annotation(FileType::EdfPlusC, 120)];
        let bytes = serialize_header(&header, &signals).unwrap();
        assert_eq!(&bytes[PATIENT_ID][..7], b"X X X x");
        let (parsed, _) = parse_header(&bytes).unwrap();
        assert_eq!(parsed.birthdate, "");
        assert_eq!(parsed.patient_name, "x");
    }

    #[test]
    fn test_splice_keeps_other_subfields() {
        let mut field = [b' '; 80];
        field[..19].copy_from_slice(b"Startdate X X X X r");
        let spliced = splice_subfields(&field, RECORDING_SUBFIELDS, &[(3, "anon")]);
        assert_eq!(field_text(&spliced), "Startdate X X anon X r");

        // 缺少的子字段补为 X
        let mut short = [b' '; 80];
        short[..3].copy_from_slice(b"P01");
        let spliced = splice_subfields(&short, PATIENT_SUBFIELDS, &[(3, "Jane Doe"), (4, "extra")]);
        assert_eq!(field_text(&spliced), "P01 X X Jane_Doe extra");

        let tokens = subfield_tokens(&spliced, PATIENT_SUBFIELDS);
        assert_eq!(tokens, vec![&b"P01"[..], &b"X"[..], &b"X"[..], &b"Jane_Doe"[..], &b"extra"[..]]);
    }

    #[test]
    fn test_identification_must_read_back() {
        let mut header = plus_header();
        header.patient_name = "a_b".to_string();
        let signals = vec![eeg("A", 1), SignalParam::new_annotation(FileType::EdfPlusC, 120)];
        let err = serialize_header(&header, &signals).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Argument);

        header.patient_name = "José".to_string();
        assert_eq!(serialize_header(&header, &signals).unwrap_err().kind(), crate::ErrorKind::Argument);

        assert!(check_identification("patient_additional", "a_b", false).is_ok());
        assert!(check_identification("patient_additional", "tab\there", false).is_err());
    }
}
