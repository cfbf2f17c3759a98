use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDateTime, Timelike};

use crate::annotations::{pack_annotations, timekeeping_tal, validate_annotation, MIN_ANNOTATION_CAPACITY};
use crate::convert::round_to_storage;
use crate::error::{EdfError, Result};
use crate::header::{header_size, serialize_header, NUM_RECORDS};
use crate::record::{RecordLayout, RecordWriter};
use crate::types::{Annotation, EdfHeader, FileType, SignalParam};
use crate::EDFLIB_TIME_DIMENSION;

/// What a completed write produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteReport {
    /// Number of data records in the file.
    pub records: usize,
    /// Samples stored per ordinary signal, padding included.
    pub padded_lengths: Vec<usize>,
    /// Zero samples appended to each ordinary signal to complete the last
    /// data record.
    pub padding: Vec<usize>,
    pub annotations_written: usize,
    /// Annotations that did not fit into the annotation channel.
    pub unwritten_annotations: usize,
}

/// Record-by-record writer for EDF, EDF+, BDF and BDF+ files.
///
/// The header is written with the first data record, using an unknown
/// record count; [`EdfWriter::finalize`] patches the count and fills the
/// annotation channel of the written records.
///
/// # File Creation Workflow
///
/// 1. Create writer with `EdfWriter::create()`
/// 2. Set patient and recording information
/// 3. Add signal definitions with `add_signal()`
/// 4. Write one data record per `write_samples()` call
/// 5. Finalize the file with `finalize()`
///
/// # Examples
///
/// ```rust
/// use edf_codec::{EdfWriter, SignalParam};
///
/// let mut writer = EdfWriter::create("writer_doc.edf")?;
/// writer.set_patient_info("P001", "M", "01-JAN-1990", "Test Patient")?;
///
/// writer.add_signal(SignalParam {
///     label: "EEG Fp1".to_string(),
///     transducer: "AgAgCl cup electrodes".to_string(),
///     physical_dimension: "uV".to_string(),
///     physical_min: -200.0,
///     physical_max: 200.0,
///     digital_min: -32768,
///     digital_max: 32767,
///     prefilter: "HP:0.1Hz LP:70Hz".to_string(),
///     samples_per_record: 256, // 256 Hz with one-second records
///     reserved: String::new(),
/// })?;
///
/// for second in 0..3 {
///     let samples: Vec<f64> = (0..256)
///         .map(|i| {
///             let t = second as f64 + i as f64 / 256.0;
///             50.0 * (2.0 * std::f64::consts::PI * 10.0 * t).sin()
///         })
///         .collect();
///     writer.write_samples(&[samples])?;
/// }
/// writer.add_annotation(1.5, None, "Eyes closed")?;
///
/// let report = writer.finalize()?;
/// assert_eq!(report.records, 3);
/// assert_eq!(report.unwritten_annotations, 0);
/// # std::fs::remove_file("writer_doc.edf").ok();
/// # Ok::<(), edf_codec::EdfError>(())
/// ```
pub struct EdfWriter {
    file: BufWriter<File>,
    path: PathBuf,
    header: EdfHeader,
    /// 普通信号（注释通道由写入器自动追加）
    signals: Vec<SignalParam>,
    annotation_capacity: usize,
    annotations: Vec<Annotation>,
    layout: Option<Arc<RecordLayout>>,
    header_size: usize,
    records_written: usize,
}

impl EdfWriter {
    /// Creates (or truncates) `path` and returns an EDF+C writer with the
    /// defaults of [`EdfHeader::new`].
    ///
    /// # Errors
    ///
    /// * `EdfError::Io` - the file cannot be created
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(EdfWriter {
            file: BufWriter::new(file),
            path: path.as_ref().to_path_buf(),
            header: EdfHeader::new(FileType::EdfPlusC),
            signals: Vec::new(),
            annotation_capacity: MIN_ANNOTATION_CAPACITY,
            annotations: Vec::new(),
            layout: None,
            header_size: 0,
            records_written: 0,
        })
    }

    fn check_not_started(&self, what: &str) -> Result<()> {
        if self.layout.is_some() {
            return Err(EdfError::InvalidArgument(format!(
                "cannot change {} after the first data record",
                what
            )));
        }
        Ok(())
    }

    /// Selects the file flavour. Plain EDF/BDF files have no annotation
    /// channel, so pending annotations make that an error.
    pub fn set_file_type(&mut self, file_type: FileType) -> Result<()> {
        self.check_not_started("file type")?;
        if !file_type.is_plus() && !self.annotations.is_empty() {
            return Err(EdfError::InvalidArgument(format!(
                "{:?} files cannot hold the {} pending annotations",
                file_type,
                self.annotations.len()
            )));
        }
        if !file_type.is_plus() && self.header.starttime_subsecond != 0 {
            return Err(EdfError::InvalidArgument(
                "sub-second start time needs an EDF+/BDF+ file".to_string(),
            ));
        }
        self.header.file_type = file_type;
        Ok(())
    }

    /// Sets the EDF+ patient subfields. Empty strings are stored as `X`
    /// (unknown).
    ///
    /// ```rust
    /// use edf_codec::EdfWriter;
    ///
    /// let mut writer = EdfWriter::create("writer_patient_doc.edf")?;
    /// writer.set_patient_info("ANON-001", "", "", "")?;
    /// # std::fs::remove_file("writer_patient_doc.edf").ok();
    /// # Ok::<(), edf_codec::EdfError>(())
    /// ```
    pub fn set_patient_info(&mut self, code: &str, sex: &str, birthdate: &str, name: &str) -> Result<()> {
        self.check_not_started("patient info")?;
        self.header.patient_code = code.to_string();
        self.header.sex = sex.to_string();
        self.header.birthdate = birthdate.to_string();
        self.header.patient_name = name.to_string();
        Ok(())
    }

    /// Free text after the patient subfields; the whole patient field for
    /// plain EDF/BDF files.
    pub fn set_patient_additional(&mut self, text: &str) -> Result<()> {
        self.check_not_started("patient info")?;
        self.header.patient_additional = text.to_string();
        Ok(())
    }

    pub fn set_recording_info(&mut self, admin_code: &str, technician: &str, equipment: &str) -> Result<()> {
        self.check_not_started("recording info")?;
        self.header.admin_code = admin_code.to_string();
        self.header.technician = technician.to_string();
        self.header.equipment = equipment.to_string();
        Ok(())
    }

    pub fn set_recording_additional(&mut self, text: &str) -> Result<()> {
        self.check_not_started("recording info")?;
        self.header.recording_additional = text.to_string();
        Ok(())
    }

    /// Start of the recording. Fractions of a second are kept as the
    /// sub-second start time of EDF+/BDF+ files.
    pub fn set_start_datetime(&mut self, start: NaiveDateTime) -> Result<()> {
        self.check_not_started("start time")?;
        let nanos = start.nanosecond() % 1_000_000_000;
        self.header.start_date = start.date();
        self.header.start_time = start.time().with_nanosecond(0).unwrap_or(start.time());
        self.set_subsecond_starttime(nanos as i64 / 100)
    }

    /// Sub-second start offset in units of 100 ns.
    pub fn set_subsecond_starttime(&mut self, subsecond: i64) -> Result<()> {
        self.check_not_started("start time")?;
        if !(0..EDFLIB_TIME_DIMENSION).contains(&subsecond) {
            return Err(EdfError::InvalidArgument(format!(
                "sub-second start must be in 0..{}, got {}",
                EDFLIB_TIME_DIMENSION, subsecond
            )));
        }
        if subsecond != 0 && !self.header.file_type.is_plus() {
            return Err(EdfError::InvalidArgument(
                "sub-second start time needs an EDF+/BDF+ file".to_string(),
            ));
        }
        self.header.starttime_subsecond = subsecond;
        Ok(())
    }

    /// Duration of one data record in seconds.
    pub fn set_datarecord_duration(&mut self, duration_seconds: f64) -> Result<()> {
        self.check_not_started("data record duration")?;
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(EdfError::InvalidArgument(format!(
                "data record duration must be positive, got {}",
                duration_seconds
            )));
        }
        self.header.datarecord_duration = duration_seconds;
        Ok(())
    }

    /// Bytes reserved for annotations in every data record.
    pub fn set_annotation_capacity(&mut self, bytes: usize) -> Result<()> {
        self.check_not_started("annotation capacity")?;
        if bytes < MIN_ANNOTATION_CAPACITY {
            return Err(EdfError::InvalidArgument(format!(
                "annotation capacity must be at least {} bytes",
                MIN_ANNOTATION_CAPACITY
            )));
        }
        self.annotation_capacity = bytes;
        Ok(())
    }

    /// Adds an ordinary signal. Its parameters are validated immediately.
    pub fn add_signal(&mut self, signal: SignalParam) -> Result<()> {
        self.check_not_started("signals")?;
        if signal.is_annotation() {
            return Err(EdfError::InvalidArgument(
                "the annotation channel is added automatically".to_string(),
            ));
        }
        signal.validate(self.header.file_type)?;
        self.signals.push(signal);
        Ok(())
    }

    /// Queues an annotation. Annotations can be added at any time before
    /// [`EdfWriter::finalize`], which stores them in insertion order.
    pub fn add_annotation(&mut self, onset_seconds: f64, duration_seconds: Option<f64>, description: &str) -> Result<()> {
        if !self.header.file_type.is_plus() {
            return Err(EdfError::InvalidArgument(format!(
                "{:?} files have no annotation channel",
                self.header.file_type
            )));
        }
        let annotation = Annotation::new(onset_seconds, duration_seconds, description);
        validate_annotation(&annotation)?;
        self.annotations.push(annotation);
        Ok(())
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Annotation channel size, a whole number of samples.
    fn annotation_bytes(&self) -> usize {
        let width = self.header.file_type.sample_width();
        self.annotation_capacity / width * width
    }

    fn all_signals(&self) -> Vec<SignalParam> {
        let mut all = self.signals.clone();
        if self.header.file_type.is_plus() {
            all.push(SignalParam::new_annotation(self.header.file_type, self.annotation_bytes()));
        }
        all
    }

    /// 写入头部（记录数未知，finalize 时回填）
    fn write_header(&mut self) -> Result<Arc<RecordLayout>> {
        if let Some(layout) = &self.layout {
            return Ok(Arc::clone(layout));
        }
        if self.signals.is_empty() {
            return Err(EdfError::InvalidArgument("no signals added".to_string()));
        }

        let all = self.all_signals();
        let mut header = self.header.clone();
        header.datarecords_in_file = -1;
        let bytes = serialize_header(&header, &all)?;
        self.file.write_all(&bytes)?;

        let layout = Arc::new(RecordLayout::new(&all, self.header.file_type));
        self.header_size = header_size(all.len());
        self.layout = Some(Arc::clone(&layout));
        log::debug!(
            "{}: header written, {} signals, {}-byte records",
            self.path.display(),
            all.len(),
            layout.record_size()
        );
        Ok(layout)
    }

    fn record_onset(&self, record: usize) -> f64 {
        record as f64 * self.header.datarecord_duration
            + self.header.starttime_subsecond as f64 / EDFLIB_TIME_DIMENSION as f64
    }

    /// Writes one data record of physical values, one `Vec` per signal with
    /// exactly `samples_per_record` values each.
    ///
    /// Values are rounded half away from zero and are not clamped; a value
    /// whose digital form overflows the sample width is an error and nothing
    /// of the record is written.
    pub fn write_samples(&mut self, samples: &[Vec<f64>]) -> Result<()> {
        if samples.len() != self.signals.len() {
            return Err(EdfError::InvalidArgument(format!(
                "expected {} sample buffers, got {}",
                self.signals.len(),
                samples.len()
            )));
        }

        let width = self.header.file_type.sample_width();
        let mut digital = Vec::with_capacity(samples.len());
        for (signal, values) in self.signals.iter().zip(samples) {
            let scaling = signal.scaling()?;
            let converted = values
                .iter()
                .map(|&p| {
                    round_to_storage(scaling.to_digital(p), width).map_err(|e| match e {
                        EdfError::SampleOverflow { min, max, .. } => EdfError::SampleOverflow {
                            signal: signal.label.clone(),
                            value: p,
                            min,
                            max,
                        },
                        other => other,
                    })
                })
                .collect::<Result<Vec<i32>>>()?;
            digital.push(converted);
        }

        self.write_digital_samples(&digital)
    }

    /// Writes one data record of stored integer values.
    pub fn write_digital_samples(&mut self, samples: &[Vec<i32>]) -> Result<()> {
        if samples.len() != self.signals.len() {
            return Err(EdfError::InvalidArgument(format!(
                "expected {} sample buffers, got {}",
                self.signals.len(),
                samples.len()
            )));
        }

        let layout = self.write_header()?;
        let mut annotation_bytes = Vec::new();
        if self.header.file_type.is_plus() {
            annotation_bytes = timekeeping_tal(self.record_onset(self.records_written));
        }

        let sample_slices: Vec<&[i32]> = samples.iter().map(Vec::as_slice).collect();
        let annotation_slices: Vec<&[u8]> = layout.annotation_signals().map(|_| annotation_bytes.as_slice()).collect();
        let mut records = RecordWriter::new(&mut self.file, layout);
        records.write_record(&sample_slices, &annotation_slices)?;

        self.records_written += 1;
        Ok(())
    }

    /// Completes the file: patches the record count and stores the queued
    /// annotations in the annotation channel of the written records.
    ///
    /// Annotations that do not fit are counted in
    /// [`WriteReport::unwritten_annotations`]; a larger
    /// [`EdfWriter::set_annotation_capacity`] makes room for them.
    pub fn finalize(mut self) -> Result<WriteReport> {
        let layout = self.write_header()?;
        let onsets: Vec<f64> = (0..self.records_written).map(|k| self.record_onset(k)).collect();
        let capacity = self.annotation_bytes();
        self.file.flush()?;
        let mut file = self
            .file
            .into_inner()
            .map_err(|e| EdfError::Io(e.into_error()))?;

        // 回填数据记录数
        let mut count_field = [b' '; 8];
        let count_text = self.records_written.to_string();
        count_field[..count_text.len()].copy_from_slice(count_text.as_bytes());
        file.seek(SeekFrom::Start(NUM_RECORDS.start as u64))?;
        file.write_all(&count_field)?;

        let mut placed = 0;
        if !self.annotations.is_empty() {
            let (chunks, count) = pack_annotations(&self.annotations, &onsets, capacity)?;
            placed = count;

            if let Some(channel) = layout.annotation_signals().next() {
                let span_start = layout.spans()[channel].bytes.start as u64;
                for (k, chunk) in chunks.iter().enumerate() {
                    let offset = self.header_size as u64 + (k * layout.record_size()) as u64 + span_start;
                    file.seek(SeekFrom::Start(offset))?;
                    file.write_all(chunk)?;
                }
            }
        }
        file.flush()?;

        let unwritten = self.annotations.len() - placed;
        if unwritten > 0 {
            log::warn!(
                "{}: {} annotations did not fit {} records of {} annotation bytes",
                self.path.display(),
                unwritten,
                self.records_written,
                capacity
            );
        }

        Ok(WriteReport {
            records: self.records_written,
            padded_lengths: self
                .signals
                .iter()
                .map(|s| s.samples_per_record * self.records_written)
                .collect(),
            padding: vec![0; self.signals.len()],
            annotations_written: placed,
            unwritten_annotations: unwritten,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::EdfReader;
    use chrono::NaiveDate;

    fn create_test_signal() -> SignalParam {
        SignalParam {
            label: "Test Signal".to_string(),
            transducer: "Test".to_string(),
            physical_dimension: "uV".to_string(),
            physical_min: -100.0,
            physical_max: 100.0,
            digital_min: -32768,
            digital_max: 32767,
            prefilter: String::new(),
            samples_per_record: 10,
            reserved: String::new(),
        }
    }

    #[test]
    fn test_modification_after_header_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EdfWriter::create(dir.path().join("locked.edf")).unwrap();
        writer.add_signal(create_test_signal()).unwrap();
        writer.write_samples(&[vec![0.0; 10]]).unwrap();

        assert!(writer.add_signal(create_test_signal()).is_err());
        assert!(writer.set_patient_info("P", "M", "", "").is_err());
        assert!(writer.set_datarecord_duration(2.0).is_err());
        // 注释可以在写入数据后添加
        assert!(writer.add_annotation(0.5, None, "late").is_ok());
    }

    #[test]
    fn test_record_count_is_patched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count.edf");
        let mut writer = EdfWriter::create(&path).unwrap();
        writer.add_signal(create_test_signal()).unwrap();
        for _ in 0..12 {
            writer.write_samples(&[vec![1.0; 10]]).unwrap();
        }
        let report = writer.finalize().unwrap();
        assert_eq!(report.records, 12);
        assert_eq!(report.padded_lengths, vec![120]);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[236..244], b"12      ");
        assert_eq!(bytes.len(), 768 + 12 * (20 + 120));
    }

    #[test]
    fn test_annotations_and_subsecond_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotated.edf");
        let mut writer = EdfWriter::create(&path).unwrap();
        let start = NaiveDate::from_ymd_opt(2020, 2, 29)
            .unwrap()
            .and_hms_milli_opt(23, 59, 58, 250)
            .unwrap();
        writer.set_start_datetime(start).unwrap();
        writer.add_signal(create_test_signal()).unwrap();
        writer.add_annotation(0.0, None, "start").unwrap();
        for _ in 0..4 {
            writer.write_samples(&[vec![0.0; 10]]).unwrap();
        }
        writer.add_annotation(3.5, Some(0.5), "blink").unwrap();
        let report = writer.finalize().unwrap();
        assert_eq!(report.annotations_written, 2);

        let reader = EdfReader::open(&path).unwrap();
        assert_eq!(reader.header().starttime_subsecond, 2_500_000);
        assert_eq!(reader.header().start_time.second(), 58);
        assert_eq!(
            reader.annotations(),
            &[Annotation::new(0.0, None, "start"), Annotation::new(3.5, Some(0.5), "blink")]
        );
        assert_eq!(reader.datarecord_onsets(), &[0.25, 1.25, 2.25, 3.25]);
    }

    #[test]
    fn test_overflow_is_rejected_not_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EdfWriter::create(dir.path().join("overflow.edf")).unwrap();
        writer.add_signal(create_test_signal()).unwrap();
        let mut samples = vec![0.0; 10];
        samples[3] = 250.0;
        let err = writer.write_samples(&[samples]).unwrap_err();
        assert!(matches!(err, EdfError::SampleOverflow { ref signal, .. } if signal == "Test Signal"));
        assert_eq!(writer.records_written(), 0);
    }

    #[test]
    fn test_unwritten_annotations_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EdfWriter::create(dir.path().join("full.edf")).unwrap();
        writer.add_signal(create_test_signal()).unwrap();
        writer.write_samples(&[vec![0.0; 10]]).unwrap();
        for i in 0..30 {
            writer.add_annotation(i as f64 * 0.01, None, "crowded annotation").unwrap();
        }
        let report = writer.finalize().unwrap();
        assert!(report.unwritten_annotations > 0);
        assert_eq!(report.annotations_written + report.unwritten_annotations, 30);
    }

    #[test]
    fn test_plain_edf_has_no_annotation_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.edf");
        let mut writer = EdfWriter::create(&path).unwrap();
        writer.set_file_type(FileType::Edf).unwrap();
        assert!(writer.add_annotation(1.0, None, "x").is_err());
        writer.add_signal(create_test_signal()).unwrap();
        writer.write_digital_samples(&[vec![7; 10]]).unwrap();
        writer.finalize().unwrap();

        let mut reader = EdfReader::open(&path).unwrap();
        assert_eq!(reader.all_signals().len(), 1);
        assert_eq!(reader.read_digital_samples(0, 10).unwrap(), vec![7; 10]);
    }

    #[test]
    fn test_bdf_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.bdf");
        let mut writer = EdfWriter::create(&path).unwrap();
        writer.set_file_type(FileType::BdfPlusC).unwrap();
        let mut signal = create_test_signal();
        signal.digital_min = -8388608;
        signal.digital_max = 8388607;
        writer.add_signal(signal).unwrap();
        let values: Vec<i32> = (0..10).map(|i| i * 800_000 - 4_000_000).collect();
        writer.write_digital_samples(&[values.clone()]).unwrap();
        writer.finalize().unwrap();

        let mut reader = EdfReader::open(&path).unwrap();
        assert_eq!(reader.header().file_type, FileType::BdfPlusC);
        assert_eq!(reader.all_signals()[1].label, "BDF Annotations");
        assert_eq!(reader.read_digital_samples(0, 10).unwrap(), values);
    }
}
