//! Whole-file operations: read and write complete recordings, and the
//! structural edits (anonymization, channel selection) built on the header
//! and record codecs.
//!
//! Every operation that produces a file validates all of its input first
//! and stages the output in a temporary file next to the target, so a
//! failing call never leaves a partial file behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tempfile::NamedTempFile;

use crate::annotations::{annotation_capacity, pack_annotations};
use crate::convert::round_to_storage;
use crate::error::{EdfError, Result};
use crate::header::{
    check_identification, declared_signal_count, header_size, parse_header, serialize_header,
    splice_subfields, subfield_tokens, MAIN_HEADER_SIZE, PATIENT_ID, PATIENT_SUBFIELDS, RECORDING_ID,
    RECORDING_SUBFIELDS,
};
use crate::reader::EdfReader;
use crate::record::write_records;
use crate::types::{Annotation, EdfHeader, FileType, SignalParam};
use crate::utils::{format_edfplus_date, format_number, write_field};
use crate::writer::WriteReport;
use crate::EDFLIB_TIME_DIMENSION;

pub use crate::convert::{dig2phys, phys2dig};

/// Sample buffers of a recording, one `Vec` per ordinary signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Signals {
    /// Calibrated values in each signal's physical dimension.
    Physical(Vec<Vec<f64>>),
    /// Stored integer values.
    Digital(Vec<Vec<i32>>),
}

impl Signals {
    pub fn channel_count(&self) -> usize {
        match self {
            Signals::Physical(channels) => channels.len(),
            Signals::Digital(channels) => channels.len(),
        }
    }

    /// Number of samples in each channel.
    pub fn lengths(&self) -> Vec<usize> {
        match self {
            Signals::Physical(channels) => channels.iter().map(Vec::len).collect(),
            Signals::Digital(channels) => channels.iter().map(Vec::len).collect(),
        }
    }

    pub fn is_digital(&self) -> bool {
        matches!(self, Signals::Digital(_))
    }

    pub fn as_physical(&self) -> Option<&[Vec<f64>]> {
        match self {
            Signals::Physical(channels) => Some(channels),
            Signals::Digital(_) => None,
        }
    }

    pub fn as_digital(&self) -> Option<&[Vec<i32>]> {
        match self {
            Signals::Digital(channels) => Some(channels),
            Signals::Physical(_) => None,
        }
    }
}

/// A fully materialized recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub signals: Signals,
    /// Headers of the ordinary signals, in file order.
    pub signal_headers: Vec<SignalParam>,
    pub header: EdfHeader,
    pub annotations: Vec<Annotation>,
}

/// Everything in a file except the samples.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderInfo {
    pub header: EdfHeader,
    pub signal_headers: Vec<SignalParam>,
    pub annotations: Vec<Annotation>,
    /// Recording length in seconds.
    pub duration: f64,
}

impl HeaderInfo {
    /// Labels of the ordinary signals.
    pub fn channels(&self) -> Vec<&str> {
        self.signal_headers.iter().map(|s| s.label.as_str()).collect()
    }
}

/// Identification fields for [`make_header`]. Empty strings mean unknown.
///
/// Text must be printable ASCII and, apart from the two additional fields,
/// free of `_`; [`write`] rejects anything that would read back differently.
#[derive(Debug, Clone, Default)]
pub struct HeaderFields {
    pub technician: String,
    pub recording_additional: String,
    pub patientname: String,
    pub patient_additional: String,
    pub patientcode: String,
    pub equipment: String,
    pub admincode: String,
    /// `"Male"`/`"Female"` are stored as `M`/`F`; anything else verbatim.
    pub gender: String,
    pub startdate: Option<NaiveDateTime>,
    pub birthdate: Option<NaiveDate>,
}

/// Builds an EDF+C header from identification fields.
///
/// Without a start date the header keeps the 1985-01-01 00:00:00 default.
///
/// ```rust
/// use edf_codec::highlevel::{make_header, HeaderFields};
///
/// let header = make_header(HeaderFields {
///     patientname: "Jane Doe".to_string(),
///     gender: "Female".to_string(),
///     technician: "tech".to_string(),
///     ..HeaderFields::default()
/// });
/// assert_eq!(header.sex, "F");
/// assert!(header.file_type.is_plus());
/// ```
pub fn make_header(fields: HeaderFields) -> EdfHeader {
    let mut header = EdfHeader::new(FileType::EdfPlusC);
    header.technician = fields.technician;
    header.recording_additional = fields.recording_additional;
    header.patient_name = fields.patientname;
    header.patient_additional = fields.patient_additional;
    header.patient_code = fields.patientcode;
    header.equipment = fields.equipment;
    header.admin_code = fields.admincode;
    header.sex = match fields.gender.to_ascii_lowercase().as_str() {
        "male" | "m" => "M".to_string(),
        "female" | "f" => "F".to_string(),
        _ => fields.gender,
    };
    if let Some(start) = fields.startdate {
        header.start_date = start.date();
        header.start_time = start.time().with_nanosecond(0).unwrap_or(start.time());
        header.starttime_subsecond = (start.nanosecond() % 1_000_000_000) as i64 / 100;
    }
    if let Some(birthdate) = fields.birthdate {
        header.birthdate = format_edfplus_date(birthdate);
    }
    header
}

/// Signal header with the common EEG defaults: µV (stored as `uV`),
/// ±200 physical, full 16-bit digital range. With one-second data records
/// `sample_rate` is the number of samples per record.
pub fn make_signal_header(label: &str, sample_rate: usize) -> SignalParam {
    SignalParam {
        label: label.to_string(),
        transducer: String::new(),
        physical_dimension: "uV".to_string(),
        physical_min: -200.0,
        physical_max: 200.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: String::new(),
        samples_per_record: sample_rate,
        reserved: String::new(),
    }
}

/// One default signal header per label, all at `sample_rate`.
pub fn make_signal_headers<S: AsRef<str>>(labels: &[S], sample_rate: usize) -> Vec<SignalParam> {
    labels
        .iter()
        .map(|label| make_signal_header(label.as_ref(), sample_rate))
        .collect()
}

/// Reads a whole file. `digital` selects stored integers instead of
/// physical values.
///
/// Records are streamed once; only the assembled per-channel buffers stay
/// in memory.
pub fn read<P: AsRef<Path>>(path: P, digital: bool) -> Result<Recording> {
    let mut reader = EdfReader::open(path)?;
    let signal_headers = reader.signals().to_vec();
    let header = reader.header().clone();
    let annotations = reader.annotations().to_vec();
    let indices = reader.data_signal_indices().to_vec();
    let records = header.datarecords_in_file.max(0) as usize;

    let mut channels: Vec<Vec<i32>> = signal_headers
        .iter()
        .map(|s| Vec::with_capacity(s.samples_per_record * records))
        .collect();
    for record in reader.records()? {
        let record = record?;
        for (channel, &index) in channels.iter_mut().zip(&indices) {
            channel.extend(record.digital_samples(index)?);
        }
    }

    let signals = if digital {
        Signals::Digital(channels)
    } else {
        let physical = channels
            .into_iter()
            .zip(&signal_headers)
            .map(|(values, signal)| {
                let scaling = signal.scaling()?;
                Ok(values.into_iter().map(|d| scaling.to_physical(d)).collect())
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;
        Signals::Physical(physical)
    };

    Ok(Recording {
        signals,
        signal_headers,
        header,
        annotations,
    })
}

/// Reads the header, signal headers and annotations without the samples.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<HeaderInfo> {
    let reader = EdfReader::open(path)?;
    let header = reader.header().clone();
    Ok(HeaderInfo {
        duration: header.file_duration().unwrap_or(0.0),
        signal_headers: reader.signals().to_vec(),
        annotations: reader.annotations().to_vec(),
        header,
    })
}

/// Writes a complete file.
///
/// Everything is validated before the output exists: channel count and
/// header invariants, annotation texts, and every sample. Digital samples
/// must lie within their signal's `digital_min..=digital_max`; physical
/// samples are converted with the header values as stored on disk and
/// must fit the sample width (they are not clamped to the physical range).
///
/// Channels shorter than the longest one, in records, are zero-padded; the
/// report carries the padded lengths.
///
/// ```rust
/// use edf_codec::highlevel::{self, make_header, make_signal_headers, HeaderFields, Signals};
/// use edf_codec::Annotation;
///
/// let dir = tempfile::tempdir()?;
/// let path = dir.path().join("write_doc.edf");
///
/// let headers = make_signal_headers(&["ch0", "ch1"], 128);
/// let signals = Signals::Digital(vec![vec![100; 128 * 4], vec![-100; 128 * 4]]);
/// let annotations = [Annotation::new(1.0, None, "start")];
/// let report = highlevel::write(&path, &signals, &headers, &make_header(HeaderFields::default()), &annotations)?;
/// assert_eq!(report.records, 4);
///
/// let recording = highlevel::read(&path, true)?;
/// assert_eq!(recording.signals, signals);
/// assert_eq!(recording.annotations, annotations);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn write<P: AsRef<Path>>(
    path: P,
    signals: &Signals,
    signal_headers: &[SignalParam],
    header: &EdfHeader,
    annotations: &[Annotation],
) -> Result<WriteReport> {
    let path = path.as_ref();
    if signal_headers.is_empty() {
        return Err(EdfError::InvalidArgument("no signals to write".to_string()));
    }
    if signals.channel_count() != signal_headers.len() {
        return Err(EdfError::InvalidArgument(format!(
            "{} sample buffers for {} signal headers",
            signals.channel_count(),
            signal_headers.len()
        )));
    }
    if let Some(signal) = signal_headers.iter().find(|s| s.is_annotation()) {
        return Err(EdfError::InvalidArgument(format!(
            "'{}' is reserved for the annotation channel",
            signal.label
        )));
    }
    let file_type = header.file_type;
    if !file_type.is_plus() && !annotations.is_empty() {
        return Err(EdfError::InvalidArgument(format!(
            "{:?} files cannot hold annotations",
            file_type
        )));
    }

    // 记录数取各通道所需记录数的最大值
    let lengths = signals.lengths();
    let records = lengths
        .iter()
        .zip(signal_headers)
        .map(|(&len, s)| match s.samples_per_record {
            0 => 0,
            spr => (len + spr - 1) / spr,
        })
        .max()
        .unwrap_or(0);

    let mut all_signals = signal_headers.to_vec();
    let mut chunks = Vec::new();
    if file_type.is_plus() {
        let subsecond = header.starttime_subsecond as f64 / EDFLIB_TIME_DIMENSION as f64;
        let onsets: Vec<f64> = (0..records)
            .map(|k| k as f64 * header.datarecord_duration + subsecond)
            .collect();
        let capacity = annotation_capacity(annotations, &onsets, file_type.sample_width())?;
        let (packed, placed) = pack_annotations(annotations, &onsets, capacity)?;
        if placed != annotations.len() {
            return Err(EdfError::range(
                "annotation capacity",
                format!("only {} of {} annotations fit", placed, annotations.len()),
            ));
        }
        chunks = packed;
        all_signals.push(SignalParam::new_annotation(file_type, capacity));
    }

    let mut file_header = header.clone();
    file_header.datarecords_in_file = records as i64;
    let header_bytes = serialize_header(&file_header, &all_signals)?;

    // 使用写入后的头部数值换算，保证读取方得到相同的数字值
    let (_, stored_signals) = parse_header(&header_bytes)?;
    let stored_signals: Vec<SignalParam> = stored_signals.into_iter().filter(|s| !s.is_annotation()).collect();
    let width = file_type.sample_width();
    validate_samples(signals, &stored_signals, width)?;

    persist_atomically(path, |file| {
        let mut out = BufWriter::new(file);
        out.write_all(&header_bytes)?;
        let count = match signals {
            Signals::Digital(channels) => {
                let sources = channels.iter().map(|c| c.iter().copied()).collect();
                write_records(&mut out, &all_signals, file_type, sources, &chunks)?
            }
            Signals::Physical(channels) => {
                let scalings = stored_signals
                    .iter()
                    .map(SignalParam::scaling)
                    .collect::<Result<Vec<_>>>()?;
                let sources = channels
                    .iter()
                    .zip(scalings)
                    .map(|(c, scaling)| {
                        // 已在 validate_samples 中检查过范围
                        c.iter().map(move |&p| scaling.to_digital(p).round() as i32)
                    })
                    .collect();
                write_records(&mut out, &all_signals, file_type, sources, &chunks)?
            }
        };
        out.flush()?;
        if count.records != records {
            return Err(EdfError::InvalidArgument(format!(
                "wrote {} records, header declares {}",
                count.records, records
            )));
        }
        Ok(())
    })?;

    let padded_lengths: Vec<usize> = signal_headers.iter().map(|s| s.samples_per_record * records).collect();
    let padding: Vec<usize> = padded_lengths.iter().zip(&lengths).map(|(p, l)| p - l).collect();
    if padding.iter().any(|&p| p > 0) {
        log::debug!("{}: zero-padded channels by {:?} samples", path.display(), padding);
    }

    Ok(WriteReport {
        records,
        padded_lengths,
        padding,
        annotations_written: annotations.len(),
        unwritten_annotations: 0,
    })
}

fn validate_samples(signals: &Signals, stored: &[SignalParam], width: usize) -> Result<()> {
    match signals {
        Signals::Digital(channels) => {
            for (values, signal) in channels.iter().zip(stored) {
                if let Some(&value) = values
                    .iter()
                    .find(|&&v| v < signal.digital_min || v > signal.digital_max)
                {
                    return Err(EdfError::SampleOverflow {
                        signal: signal.label.clone(),
                        value: value as f64,
                        min: signal.digital_min as i64,
                        max: signal.digital_max as i64,
                    });
                }
            }
        }
        Signals::Physical(channels) => {
            for (values, signal) in channels.iter().zip(stored) {
                let scaling = signal.scaling()?;
                for &value in values {
                    round_to_storage(scaling.to_digital(value), width).map_err(|e| match e {
                        EdfError::SampleOverflow { min, max, .. } => EdfError::SampleOverflow {
                            signal: signal.label.clone(),
                            value,
                            min,
                            max,
                        },
                        other => other,
                    })?;
                }
            }
        }
    }
    Ok(())
}

/// Writes `signals` with default headers: EDF+C, one-second records, every
/// channel at `sample_rate`, labels `ch0`, `ch1`, ...
///
/// Physical channels get their own min/max as physical range (widened so
/// the stored header text still covers them) and the full 16-bit digital
/// range. Digital channels get the full 16-bit range on both sides.
pub fn write_quick<P: AsRef<Path>>(path: P, signals: &Signals, sample_rate: usize) -> Result<WriteReport> {
    if sample_rate == 0 {
        return Err(EdfError::InvalidArgument("sample rate must be positive".to_string()));
    }
    let labels: Vec<String> = (0..signals.channel_count()).map(|i| format!("ch{}", i)).collect();
    let mut headers = make_signal_headers(&labels, sample_rate);

    match signals {
        Signals::Physical(channels) => {
            for (header, values) in headers.iter_mut().zip(channels) {
                let (mut min, mut max) = values
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                if !(min < max) {
                    // 常数或空通道
                    min = if min.is_finite() { min - 1.0 } else { -1.0 };
                    max = min + 2.0;
                }
                header.physical_min = widen(min, false, &header.label)?;
                header.physical_max = widen(max, true, &header.label)?;
            }
        }
        Signals::Digital(_) => {
            for header in &mut headers {
                header.physical_min = -32768.0;
                header.physical_max = 32767.0;
            }
        }
    }

    write(path, signals, &headers, &EdfHeader::new(FileType::EdfPlusC), &[])
}

/// The 8-character header value closest to `value` that still covers it.
fn widen(value: f64, up: bool, label: &str) -> Result<f64> {
    let text = format_number(value, 8, label)?;
    let stored: f64 = text
        .parse()
        .map_err(|_| EdfError::format(label, format!("cannot store physical limit {}", value)))?;
    if (up && stored >= value) || (!up && stored <= value) {
        return Ok(stored);
    }
    let decimals = text.split('.').nth(1).map_or(0, str::len);
    let step = 10f64.powi(-(decimals as i32));
    let widened = if up { stored + step } else { stored - step };
    // 去掉加减法引入的浮点误差
    let text = format_number(widened, 8, label)?;
    text.parse()
        .map_err(|_| EdfError::format(label, format!("cannot store physical limit {}", value)))
}

/// Which ordinary channels [`drop_channels`] keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelector {
    /// Keep exactly these labels.
    Keep(Vec<String>),
    /// Keep everything except these labels.
    Drop(Vec<String>),
}

impl ChannelSelector {
    /// Builds a selector from an optional keep list and an optional drop
    /// list; exactly one must be given.
    pub fn from_options(to_keep: Option<Vec<String>>, to_drop: Option<Vec<String>>) -> Result<Self> {
        match (to_keep, to_drop) {
            (Some(keep), None) => Ok(ChannelSelector::Keep(keep)),
            (None, Some(drop)) => Ok(ChannelSelector::Drop(drop)),
            (Some(_), Some(_)) => Err(EdfError::InvalidArgument(
                "give either channels to keep or channels to drop, not both".to_string(),
            )),
            (None, None) => Err(EdfError::InvalidArgument(
                "give channels to keep or channels to drop".to_string(),
            )),
        }
    }

    fn labels(&self) -> &[String] {
        match self {
            ChannelSelector::Keep(labels) | ChannelSelector::Drop(labels) => labels,
        }
    }

    fn keeps(&self, label: &str) -> bool {
        let listed = self.labels().iter().any(|l| l.trim() == label);
        match self {
            ChannelSelector::Keep(_) => listed,
            ChannelSelector::Drop(_) => !listed,
        }
    }
}

/// Writes a copy of `path` containing only the selected ordinary channels,
/// in their original order. Annotation channels are always kept and every
/// kept byte is copied unchanged.
///
/// The default output is `<stem>_dropped.<ext>` next to the source.
/// Returns the output path.
pub fn drop_channels<P: AsRef<Path>>(path: P, selector: &ChannelSelector, new_path: Option<&Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut reader = EdfReader::open(path)?;

    let data_labels: Vec<&str> = reader.signals().iter().map(|s| s.label.as_str()).collect();
    if let Some(unknown) = selector.labels().iter().find(|l| !data_labels.contains(&l.trim())) {
        return Err(EdfError::UnknownChannel(unknown.clone()));
    }

    let selected: Vec<usize> = reader
        .all_signals()
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_annotation() || selector.keeps(&s.label))
        .map(|(i, _)| i)
        .collect();
    let kept_signals: Vec<SignalParam> = selected.iter().map(|&i| reader.all_signals()[i].clone()).collect();
    if kept_signals.iter().all(|s| s.is_annotation()) {
        return Err(EdfError::InvalidArgument("selection leaves no signals".to_string()));
    }

    let mut header = reader.header().clone();
    // 亚秒级开始时间保存在注释通道中，不在头部字节里
    header.starttime_subsecond = 0;
    // 身份字段按原字节复制
    for field in [
        IdentField::PatientName,
        IdentField::PatientCode,
        IdentField::Sex,
        IdentField::Birthdate,
        IdentField::PatientAdditional,
        IdentField::AdminCode,
        IdentField::Technician,
        IdentField::Equipment,
        IdentField::RecordingAdditional,
    ] {
        field.slot(&mut header).clear();
    }
    let mut header_bytes = serialize_header(&header, &kept_signals)?;
    let source = read_header_block(path)?;
    header_bytes[PATIENT_ID.start..RECORDING_ID.end]
        .copy_from_slice(&source.bytes[PATIENT_ID.start..RECORDING_ID.end]);
    let spans: Vec<_> = selected
        .iter()
        .map(|&i| reader.layout().spans()[i].bytes.clone())
        .collect();

    let output = new_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| sibling_path(path, "_dropped"));

    persist_atomically(&output, |file| {
        let mut out = BufWriter::new(file);
        out.write_all(&header_bytes)?;
        for record in reader.records()? {
            let record = record?;
            for span in &spans {
                out.write_all(&record.as_bytes()[span.clone()])?;
            }
        }
        out.flush()?;
        Ok(())
    })?;

    log::debug!(
        "{}: kept {} of {} signals in {}",
        path.display(),
        kept_signals.len(),
        reader.all_signals().len(),
        output.display()
    );
    Ok(output)
}

/// Header identification field addressed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentField {
    PatientName,
    PatientCode,
    Sex,
    Birthdate,
    PatientAdditional,
    AdminCode,
    Technician,
    Equipment,
    RecordingAdditional,
}

impl IdentField {
    fn parse(name: &str) -> Result<Self> {
        let field = match name.to_ascii_lowercase().as_str() {
            "patientname" | "patient_name" => IdentField::PatientName,
            "patientcode" | "patient_code" => IdentField::PatientCode,
            "gender" | "sex" => IdentField::Sex,
            "birthdate" => IdentField::Birthdate,
            "patient_additional" => IdentField::PatientAdditional,
            "admincode" | "admin_code" => IdentField::AdminCode,
            "technician" => IdentField::Technician,
            "equipment" => IdentField::Equipment,
            "recording_additional" => IdentField::RecordingAdditional,
            _ => {
                return Err(EdfError::InvalidArgument(format!(
                    "unknown header field '{}'",
                    name
                )))
            }
        };
        Ok(field)
    }

    fn in_patient_field(self) -> bool {
        matches!(
            self,
            IdentField::PatientName
                | IdentField::PatientCode
                | IdentField::Sex
                | IdentField::Birthdate
                | IdentField::PatientAdditional
        )
    }

    /// Position within its identification field; the free text comes after
    /// the fixed subfields.
    fn subfield(self) -> usize {
        match self {
            IdentField::PatientCode => 0,
            IdentField::Sex => 1,
            IdentField::Birthdate => 2,
            IdentField::PatientName => 3,
            IdentField::PatientAdditional => PATIENT_SUBFIELDS,
            IdentField::AdminCode => 2,
            IdentField::Technician => 3,
            IdentField::Equipment => 4,
            IdentField::RecordingAdditional => RECORDING_SUBFIELDS,
        }
    }

    fn is_additional(self) -> bool {
        matches!(self, IdentField::PatientAdditional | IdentField::RecordingAdditional)
    }

    fn slot(self, header: &mut EdfHeader) -> &mut String {
        match self {
            IdentField::PatientName => &mut header.patient_name,
            IdentField::PatientCode => &mut header.patient_code,
            IdentField::Sex => &mut header.sex,
            IdentField::Birthdate => &mut header.birthdate,
            IdentField::PatientAdditional => &mut header.patient_additional,
            IdentField::AdminCode => &mut header.admin_code,
            IdentField::Technician => &mut header.technician,
            IdentField::Equipment => &mut header.equipment,
            IdentField::RecordingAdditional => &mut header.recording_additional,
        }
    }
}

struct HeaderBlock {
    bytes: Vec<u8>,
    header: EdfHeader,
    signals: Vec<SignalParam>,
    file_len: u64,
}

fn read_header_block(path: &Path) -> Result<HeaderBlock> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut file = BufReader::new(file);

    let mut bytes = vec![0u8; MAIN_HEADER_SIZE];
    file.read_exact(&mut bytes).map_err(|e| truncated(e, MAIN_HEADER_SIZE, file_len))?;
    let size = header_size(declared_signal_count(&bytes)?);
    bytes.resize(size, 0);
    file.read_exact(&mut bytes[MAIN_HEADER_SIZE..]).map_err(|e| truncated(e, size, file_len))?;

    let (header, signals) = parse_header(&bytes)?;
    Ok(HeaderBlock {
        bytes,
        header,
        signals,
        file_len,
    })
}

fn truncated(e: io::Error, expected: usize, actual: u64) -> EdfError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        EdfError::Truncated {
            expected: expected as u64,
            actual,
        }
    } else {
        EdfError::Io(e)
    }
}

/// Replaces identification fields of the header, leaving every other byte
/// of the file unchanged.
///
/// `fields` names the fields (`patientname`, `patientcode`, `gender`,
/// `birthdate`, `patient_additional`, `admincode`, `technician`,
/// `equipment`, `recording_additional`) and `values` their replacements;
/// an empty value marks the field unknown. Values must be printable ASCII,
/// and EDF+ subfield values may not contain `_`. Within the 80-byte patient
/// and recording fields only the targeted subfields change; the other
/// tokens keep their bytes, even ones that do not parse (`Startdate X`).
///
/// Without `new_path` the result goes to `<stem>_anonymized.<ext>` next to
/// the source; `new_path` equal to the source rewrites it in place. With
/// `verify` the output is parsed again, every field is compared with the
/// expected header and untargeted bytes are compared with the source.
///
/// ```rust
/// use edf_codec::highlevel::{self, anonymize};
///
/// let dir = tempfile::tempdir()?;
/// let path = dir.path().join("anonymize_doc.edf");
/// edf_codec::doctest_utils::create_simple_test_file(&path)?;
///
/// let output = anonymize(&path, &["patientname", "birthdate"], &["x", ""], None, true)?;
/// let info = highlevel::read_header(&output)?;
/// assert_eq!(info.header.patient_name, "x");
/// assert_eq!(info.header.birthdate, "");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn anonymize<P: AsRef<Path>>(
    path: P,
    fields: &[&str],
    values: &[&str],
    new_path: Option<&Path>,
    verify: bool,
) -> Result<PathBuf> {
    let path = path.as_ref();
    if fields.len() != values.len() {
        return Err(EdfError::InvalidArgument(format!(
            "{} fields but {} replacement values",
            fields.len(),
            values.len()
        )));
    }
    let targets = fields
        .iter()
        .map(|name| IdentField::parse(name))
        .collect::<Result<Vec<_>>>()?;

    let original = read_header_block(path)?;
    let plus = original.header.file_type.is_plus();
    let mut expected = original.header.clone();
    for ((&field, &value), name) in targets.iter().zip(values).zip(fields) {
        if !plus && !field.is_additional() {
            return Err(EdfError::InvalidArgument(format!(
                "{:?} files have no '{}' subfield",
                original.header.file_type, name
            )));
        }
        check_identification(name, value, plus && !field.is_additional())?;
        *field.slot(&mut expected) = value.trim().to_string();
    }

    // 只替换目标子字段，其余字节保持原样
    let rewrite = |patient: bool| -> Option<[u8; 80]> {
        let edits: Vec<(usize, &str)> = targets
            .iter()
            .zip(values)
            .filter(|(t, _)| t.in_patient_field() == patient)
            .map(|(t, &v)| (t.subfield(), v))
            .collect();
        let (range, leading) = if patient {
            (PATIENT_ID, PATIENT_SUBFIELDS)
        } else {
            (RECORDING_ID, RECORDING_SUBFIELDS)
        };
        let (_, value) = edits.last()?;
        if plus {
            Some(splice_subfields(&original.bytes[range], leading, &edits))
        } else {
            let mut field = [b' '; 80];
            write_field(&mut field, value.trim());
            Some(field)
        }
    };
    let patient = rewrite(true);
    let recording = rewrite(false);

    let patch = |file: &mut File| -> Result<()> {
        if let Some(patient) = &patient {
            file.seek(SeekFrom::Start(PATIENT_ID.start as u64))?;
            file.write_all(patient)?;
        }
        if let Some(recording) = &recording {
            file.seek(SeekFrom::Start(RECORDING_ID.start as u64))?;
            file.write_all(recording)?;
        }
        file.flush()?;
        Ok(())
    };

    let output = new_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| sibling_path(path, "_anonymized"));
    if same_file(path, &output) {
        let mut file = OpenOptions::new().write(true).open(&output)?;
        patch(&mut file)?;
    } else {
        persist_atomically(&output, |file| {
            io::copy(&mut File::open(path)?, file)?;
            patch(file)
        })?;
    }

    if verify {
        verify_anonymized(&output, &original, &expected, &targets)?;
    }

    log::debug!("{}: rewrote {} header fields into {}", path.display(), targets.len(), output.display());
    Ok(output)
}

/// Reads `output` back and checks that the targeted fields hold their new
/// values while every other header byte is unchanged.
fn verify_anonymized(output: &Path, original: &HeaderBlock, expected: &EdfHeader, targets: &[IdentField]) -> Result<()> {
    let written = read_header_block(output)?;
    let failed = |what: String| EdfError::VerificationFailed(format!("{}: {}", output.display(), what));

    if &written.header != expected {
        return Err(failed(format!(
            "header reads back as {:?}, expected {:?}",
            written.header, expected
        )));
    }
    if written.signals != original.signals || written.file_len != original.file_len {
        return Err(failed("signal headers or data changed".to_string()));
    }
    if written.bytes[..PATIENT_ID.start] != original.bytes[..PATIENT_ID.start]
        || written.bytes[RECORDING_ID.end..] != original.bytes[RECORDING_ID.end..]
    {
        return Err(failed("bytes outside the identification fields changed".to_string()));
    }

    if !expected.file_type.is_plus() {
        return Ok(());
    }
    for (range, leading, patient) in [
        (PATIENT_ID, PATIENT_SUBFIELDS, true),
        (RECORDING_ID, RECORDING_SUBFIELDS, false),
    ] {
        let before = subfield_tokens(&original.bytes[range.clone()], leading);
        let after = subfield_tokens(&written.bytes[range], leading);
        for (index, (old, new)) in before.iter().zip(&after).enumerate() {
            let targeted = targets
                .iter()
                .any(|t| t.in_patient_field() == patient && t.subfield() == index);
            // 原来缺失的子字段会补为 X
            if !targeted && !old.is_empty() && old != new {
                return Err(failed(format!(
                    "untargeted subfield {} changed from {:?} to {:?}",
                    index,
                    String::from_utf8_lossy(old),
                    String::from_utf8_lossy(new)
                )));
            }
        }
    }
    Ok(())
}

/// `<stem><suffix>.<ext>` next to `path`.
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Runs `fill` on a temporary file in the target's directory and moves it
/// into place only when `fill` succeeds.
fn persist_atomically<F>(target: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    fill(staged.as_file_mut())?;
    staged.as_file_mut().sync_all()?;
    staged.persist(target).map_err(|e| EdfError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path(Path::new("/data/night1.edf"), "_anonymized"),
            PathBuf::from("/data/night1_anonymized.edf")
        );
        assert_eq!(sibling_path(Path::new("rec"), "_dropped"), PathBuf::from("rec_dropped"));
    }

    #[test]
    fn test_selector_from_options() {
        let keep = ChannelSelector::from_options(Some(vec!["ch1".into()]), None).unwrap();
        assert!(keep.keeps("ch1"));
        assert!(!keep.keeps("ch2"));
        let drop = ChannelSelector::from_options(None, Some(vec!["ch1".into()])).unwrap();
        assert!(!drop.keeps("ch1"));
        assert!(drop.keeps("ch2"));

        let both = ChannelSelector::from_options(Some(vec![]), Some(vec![])).unwrap_err();
        assert_eq!(both.kind(), crate::ErrorKind::Argument);
        assert!(ChannelSelector::from_options(None, None).is_err());
    }

    #[test]
    fn test_widen_covers_value() {
        let value = 0.123456789;
        let hi = widen(value, true, "x").unwrap();
        let lo = widen(value, false, "x").unwrap();
        assert!(hi >= value && lo <= value);
        assert!(format_number(hi, 8, "x").unwrap().len() <= 8);
        assert_eq!(widen(200.0, true, "x").unwrap(), 200.0);
        assert_eq!(widen(-123.45678, false, "x").unwrap(), -123.457);
    }

    #[test]
    fn test_make_header_fields() {
        let start = NaiveDate::from_ymd_opt(2022, 5, 6)
            .unwrap()
            .and_hms_micro_opt(7, 8, 9, 500_000)
            .unwrap();
        let header = make_header(HeaderFields {
            gender: "Male".to_string(),
            startdate: Some(start),
            birthdate: NaiveDate::from_ymd_opt(1980, 9, 5),
            ..HeaderFields::default()
        });
        assert_eq!(header.sex, "M");
        assert_eq!(header.birthdate, "05-SEP-1980");
        assert_eq!(header.start_time.second(), 9);
        assert_eq!(header.starttime_subsecond, 5_000_000);
    }

    #[test]
    fn test_identification_field_names() {
        assert_eq!(IdentField::parse("PatientName").unwrap(), IdentField::PatientName);
        assert_eq!(IdentField::parse("gender").unwrap(), IdentField::Sex);
        assert!(IdentField::parse("startdate").is_err());
        assert!(IdentField::Birthdate.in_patient_field());
        assert!(!IdentField::Technician.in_patient_field());
    }
}
