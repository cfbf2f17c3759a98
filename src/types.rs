use chrono::{NaiveDate, NaiveTime};

use crate::convert::{self, Scaling, BDF_SAMPLE_WIDTH, EDF_SAMPLE_WIDTH};
use crate::error::{EdfError, Result};

/// Label of the EDF+ annotation channel.
pub const EDF_ANNOTATIONS_LABEL: &str = "EDF Annotations";
/// Label of the BDF+ annotation channel.
pub const BDF_ANNOTATIONS_LABEL: &str = "BDF Annotations";

/// File flavour, derived from the version and reserved header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Plain EDF, 16-bit samples, no annotation channel.
    Edf,
    /// EDF+ with contiguous data records.
    EdfPlusC,
    /// EDF+ with discontinuous data records.
    EdfPlusD,
    /// Plain BDF, 24-bit samples.
    Bdf,
    BdfPlusC,
    BdfPlusD,
}

impl FileType {
    pub fn is_bdf(&self) -> bool {
        matches!(self, FileType::Bdf | FileType::BdfPlusC | FileType::BdfPlusD)
    }

    pub fn is_plus(&self) -> bool {
        !matches!(self, FileType::Edf | FileType::Bdf)
    }

    pub fn is_discontinuous(&self) -> bool {
        matches!(self, FileType::EdfPlusD | FileType::BdfPlusD)
    }

    /// Bytes per stored sample.
    pub fn sample_width(&self) -> usize {
        if self.is_bdf() {
            BDF_SAMPLE_WIDTH
        } else {
            EDF_SAMPLE_WIDTH
        }
    }

    /// Inclusive digital range the storage width can hold.
    pub fn digital_limits(&self) -> (i64, i64) {
        convert::storage_limits(self.sample_width())
    }

    /// Text stored at the start of the 44-byte reserved field.
    pub fn reserved_marker(&self) -> &'static str {
        match self {
            FileType::Edf => "",
            FileType::EdfPlusC => "EDF+C",
            FileType::EdfPlusD => "EDF+D",
            FileType::Bdf => "24BIT",
            FileType::BdfPlusC => "BDF+C",
            FileType::BdfPlusD => "BDF+D",
        }
    }

    /// The 8-byte version field.
    pub fn version_bytes(&self) -> [u8; 8] {
        if self.is_bdf() {
            [0xFF, b'B', b'I', b'O', b'S', b'E', b'M', b'I']
        } else {
            *b"0       "
        }
    }

    pub fn annotation_label(&self) -> &'static str {
        if self.is_bdf() {
            BDF_ANNOTATIONS_LABEL
        } else {
            EDF_ANNOTATIONS_LABEL
        }
    }
}

/// Header of one signal (channel).
///
/// On disk the signal headers are stored column-major (all labels, then all
/// transducers, ...); in memory each signal is one record.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalParam {
    pub label: String,
    pub transducer: String,
    pub physical_dimension: String,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i32,
    pub digital_max: i32,
    pub prefilter: String,
    pub samples_per_record: usize,
    pub reserved: String,
}

impl SignalParam {
    /// Builds the reserved annotation channel holding `capacity_bytes` bytes
    /// per data record.
    pub fn new_annotation(file_type: FileType, capacity_bytes: usize) -> Self {
        let (digital_min, digital_max) = file_type.digital_limits();
        SignalParam {
            label: file_type.annotation_label().to_string(),
            transducer: String::new(),
            physical_dimension: String::new(),
            physical_min: -1.0,
            physical_max: 1.0,
            digital_min: digital_min as i32,
            digital_max: digital_max as i32,
            prefilter: String::new(),
            samples_per_record: capacity_bytes / file_type.sample_width(),
            reserved: String::new(),
        }
    }

    pub fn is_annotation(&self) -> bool {
        let label = self.label.trim();
        label == EDF_ANNOTATIONS_LABEL || label == BDF_ANNOTATIONS_LABEL
    }

    /// 校验信号参数；注释通道不参与物理/数字范围检查
    pub fn validate(&self, file_type: FileType) -> Result<()> {
        if self.samples_per_record == 0 {
            return Err(EdfError::format(
                format!("samples_per_record[{}]", self.label),
                "must be greater than zero",
            ));
        }

        if self.is_annotation() {
            return Ok(());
        }

        if self.digital_min >= self.digital_max {
            return Err(EdfError::range(
                format!("digital_min/digital_max[{}]", self.label),
                format!(
                    "digital_min ({}) must be below digital_max ({})",
                    self.digital_min, self.digital_max
                ),
            ));
        }
        if !(self.physical_min < self.physical_max) {
            return Err(EdfError::range(
                format!("physical_min/physical_max[{}]", self.label),
                format!(
                    "physical_min ({}) must be below physical_max ({})",
                    self.physical_min, self.physical_max
                ),
            ));
        }

        let (lo, hi) = file_type.digital_limits();
        if (self.digital_min as i64) < lo || (self.digital_max as i64) > hi {
            return Err(EdfError::range(
                format!("digital_min/digital_max[{}]", self.label),
                format!(
                    "{}..={} does not fit {}-bit samples",
                    self.digital_min,
                    self.digital_max,
                    file_type.sample_width() * 8
                ),
            ));
        }

        Ok(())
    }

    pub fn scaling(&self) -> Result<Scaling> {
        Scaling::new(self.digital_min, self.digital_max, self.physical_min, self.physical_max)
    }

    /// Physical units per digital step.
    pub fn bit_value(&self) -> f64 {
        (self.physical_max - self.physical_min) / (self.digital_max as f64 - self.digital_min as f64)
    }

    pub fn offset(&self) -> f64 {
        self.physical_max / self.bit_value() - self.digital_max as f64
    }

    /// Converts a digital value to its physical value.
    pub fn to_physical(&self, digital_value: i32) -> Result<f64> {
        Ok(self.scaling()?.to_physical(digital_value))
    }

    /// Converts a physical value to the nearest digital value (ties away from
    /// zero). No clamping to `digital_min..=digital_max` is performed.
    pub fn to_digital(&self, physical_value: f64) -> Result<i32> {
        let digital = self.scaling()?.to_digital(physical_value);
        convert::round_to_storage(digital, 4).map_err(|_| EdfError::SampleOverflow {
            signal: self.label.clone(),
            value: physical_value,
            min: i32::MIN as i64,
            max: i32::MAX as i64,
        })
    }
}

/// One EDF+ annotation.
///
/// `duration` is `None` when the event has no duration (the `-1` sentinel of
/// many EDF tools, see [`Annotation::duration_or_sentinel`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Seconds since the start of the recording.
    pub onset: f64,
    pub duration: Option<f64>,
    /// UTF-8 text, may be empty.
    pub description: String,
}

impl Annotation {
    pub fn new(onset: f64, duration: Option<f64>, description: impl Into<String>) -> Self {
        Annotation {
            onset,
            duration,
            description: description.into(),
        }
    }

    pub fn duration_or_sentinel(&self) -> f64 {
        self.duration.unwrap_or(-1.0)
    }
}

/// Recording-level header.
///
/// For EDF+/BDF+ the patient and recording identification fields are split
/// into their subfields; an unknown subfield (`X` on disk) is an empty
/// string. Plain EDF/BDF files keep the whole 80-byte identification text in
/// `patient_additional` / `recording_additional`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdfHeader {
    pub file_type: FileType,

    // 患者信息
    pub patient_code: String,
    pub sex: String,
    pub birthdate: String,
    pub patient_name: String,
    pub patient_additional: String,

    // 记录信息
    pub admin_code: String,
    pub technician: String,
    pub equipment: String,
    pub recording_additional: String,

    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    /// Sub-second start offset in 100 ns units (EDF+ only).
    pub starttime_subsecond: i64,
    /// Number of data records, `-1` while unknown.
    pub datarecords_in_file: i64,
    /// Duration of one data record in seconds.
    pub datarecord_duration: f64,
}

impl EdfHeader {
    /// An empty header of the given type: 1985-01-01 00:00:00, one-second
    /// records, every identification field unknown.
    pub fn new(file_type: FileType) -> Self {
        EdfHeader {
            file_type,
            patient_code: String::new(),
            sex: String::new(),
            birthdate: String::new(),
            patient_name: String::new(),
            patient_additional: String::new(),
            admin_code: String::new(),
            technician: String::new(),
            equipment: String::new(),
            recording_additional: String::new(),
            start_date: NaiveDate::from_ymd_opt(1985, 1, 1).unwrap_or_default(),
            start_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap_or_default(),
            starttime_subsecond: 0,
            datarecords_in_file: -1,
            datarecord_duration: 1.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.datarecord_duration > 0.0) || !self.datarecord_duration.is_finite() {
            return Err(EdfError::format(
                "datarecord_duration",
                format!("must be a positive number of seconds, got {}", self.datarecord_duration),
            ));
        }
        if self.datarecords_in_file < -1 {
            return Err(EdfError::format(
                "num_records",
                format!("must be -1 or a record count, got {}", self.datarecords_in_file),
            ));
        }
        if self.starttime_subsecond < 0 || self.starttime_subsecond >= crate::EDFLIB_TIME_DIMENSION {
            return Err(EdfError::format(
                "starttime_subsecond",
                format!("must be in 0..{}", crate::EDFLIB_TIME_DIMENSION),
            ));
        }
        if self.starttime_subsecond != 0 && !self.file_type.is_plus() {
            return Err(EdfError::format(
                "starttime_subsecond",
                "sub-second start time needs an EDF+/BDF+ annotation channel",
            ));
        }
        Ok(())
    }

    /// Total recording length in seconds, when the record count is known.
    pub fn file_duration(&self) -> Option<f64> {
        (self.datarecords_in_file >= 0)
            .then(|| self.datarecords_in_file as f64 * self.datarecord_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eeg() -> SignalParam {
        SignalParam {
            label: "EEG Fp1".to_string(),
            transducer: "AgAgCl".to_string(),
            physical_dimension: "uV".to_string(),
            physical_min: -100.0,
            physical_max: 100.0,
            digital_min: -32768,
            digital_max: 32767,
            prefilter: String::new(),
            samples_per_record: 256,
            reserved: String::new(),
        }
    }

    #[test]
    fn test_signal_conversion() {
        let signal = eeg();
        let physical = signal.to_physical(16384).unwrap();
        assert!((physical - 50.0).abs() < 0.1);
        assert!((signal.to_digital(25.0).unwrap() - 8192).abs() <= 1);
    }

    #[test]
    fn test_signal_validation() {
        assert!(eeg().validate(FileType::EdfPlusC).is_ok());

        let mut inverted = eeg();
        inverted.digital_min = 100;
        inverted.digital_max = -100;
        assert_eq!(inverted.validate(FileType::Edf).unwrap_err().kind(), crate::ErrorKind::Range);

        let mut flat = eeg();
        flat.physical_max = flat.physical_min;
        assert_eq!(flat.validate(FileType::Edf).unwrap_err().kind(), crate::ErrorKind::Range);

        let mut wide = eeg();
        wide.digital_max = 100_000;
        assert!(wide.validate(FileType::Edf).is_err());
        assert!(wide.validate(FileType::Bdf).is_ok());

        let mut empty = eeg();
        empty.samples_per_record = 0;
        assert_eq!(empty.validate(FileType::Edf).unwrap_err().kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn test_annotation_channel_skips_range_checks() {
        let mut annot = SignalParam::new_annotation(FileType::EdfPlusC, 120);
        assert!(annot.is_annotation());
        assert_eq!(annot.samples_per_record, 60);
        annot.physical_min = 5.0;
        annot.physical_max = 5.0;
        assert!(annot.validate(FileType::EdfPlusC).is_ok());

        let bdf = SignalParam::new_annotation(FileType::BdfPlusC, 120);
        assert_eq!(bdf.label, "BDF Annotations");
        assert_eq!(bdf.samples_per_record, 40);
    }

    #[test]
    fn test_file_type_markers() {
        assert_eq!(FileType::EdfPlusD.reserved_marker(), "EDF+D");
        assert_eq!(FileType::Bdf.sample_width(), 3);
        assert_eq!(FileType::Edf.digital_limits(), (-32768, 32767));
        assert_eq!(FileType::BdfPlusC.version_bytes()[0], 0xFF);
    }

    #[test]
    fn test_header_validation() {
        let mut header = EdfHeader::new(FileType::EdfPlusC);
        assert!(header.validate().is_ok());
        header.datarecord_duration = 0.0;
        assert!(header.validate().is_err());

        let mut plain = EdfHeader::new(FileType::Edf);
        plain.starttime_subsecond = 5;
        assert!(plain.validate().is_err());
    }
}
