use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::annotations::{decode_annotations, decode_record};
use crate::convert::decode_sample;
use crate::error::{EdfError, Result};
use crate::header::{declared_signal_count, header_size, parse_header_with, HeaderOptions, MAIN_HEADER_SIZE};
use crate::record::{RecordLayout, RecordReader};
use crate::types::{Annotation, EdfHeader, SignalParam};
use crate::EDFLIB_TIME_DIMENSION;

/// Streaming reader for EDF, EDF+, BDF and BDF+ files.
///
/// Opening a file parses and validates the header, checks the file length
/// against the declared record count and scans the annotation channel once.
/// Samples are then read on demand, one signal at a time, without loading
/// the whole recording.
///
/// Signal indices passed to the sample methods refer to ordinary signals
/// only, i.e. positions in [`EdfReader::signals`]; annotation channels are
/// exposed through [`EdfReader::annotations`].
///
/// # Examples
///
/// ```rust
/// use edf_codec::EdfReader;
///
/// # edf_codec::doctest_utils::create_simple_test_file("reader_doc.edf")?;
/// let mut reader = EdfReader::open("reader_doc.edf")?;
///
/// println!("Start: {} {}", reader.header().start_date, reader.header().start_time);
/// println!("Records: {}", reader.header().datarecords_in_file);
///
/// for (i, signal) in reader.signals().iter().enumerate() {
///     println!("Signal {}: {} ({})", i, signal.label, signal.physical_dimension);
/// }
///
/// // One data record of the first signal
/// let spr = reader.signals()[0].samples_per_record;
/// let samples = reader.read_physical_samples(0, spr)?;
/// assert_eq!(samples.len(), spr);
/// # drop(reader);
/// # std::fs::remove_file("reader_doc.edf").ok();
/// # Ok::<(), edf_codec::EdfError>(())
/// ```
pub struct EdfReader {
    file: BufReader<File>,
    header: EdfHeader,
    /// 所有信号（含注释通道），按文件顺序
    all_signals: Vec<SignalParam>,
    /// 普通信号的参数
    signals: Vec<SignalParam>,
    /// 普通信号在 all_signals 中的下标
    data_signals: Vec<usize>,
    layout: Arc<RecordLayout>,
    header_size: usize,
    /// 每个普通信号当前的样本位置
    sample_positions: Vec<i64>,
    annotations: Vec<Annotation>,
    record_onsets: Vec<f64>,
}

impl EdfReader {
    /// Opens a file with default [`HeaderOptions`].
    ///
    /// # Errors
    ///
    /// * `EdfError::Io` - the file cannot be opened or read
    /// * `EdfError::InvalidFormat` / `EdfError::UnsupportedFileType` - a header
    ///   field is malformed; the error names the field
    /// * `EdfError::Truncated` - the file is shorter than its header declares
    /// * `EdfError::InvalidRange` - inverted digital or physical limits
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &HeaderOptions::default())
    }

    /// Opens a file with explicit header parsing options.
    ///
    /// ```rust
    /// use edf_codec::{EdfReader, HeaderOptions};
    ///
    /// # edf_codec::doctest_utils::create_simple_test_file("reader_strict_doc.edf")?;
    /// // The test file carries a four-digit year in its EDF+ recording field,
    /// // so strict century handling accepts it.
    /// let options = HeaderOptions { strict_century: true, ..HeaderOptions::default() };
    /// let reader = EdfReader::open_with("reader_strict_doc.edf", &options)?;
    /// assert!(reader.header().file_type.is_plus());
    /// # drop(reader);
    /// # std::fs::remove_file("reader_strict_doc.edf").ok();
    /// # Ok::<(), edf_codec::EdfError>(())
    /// ```
    pub fn open_with<P: AsRef<Path>>(path: P, options: &HeaderOptions) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len();
        let mut file = BufReader::new(file);

        // 先读主头部得到信号数，再读完整头部
        let mut bytes = vec![0u8; MAIN_HEADER_SIZE];
        read_header_bytes(&mut file, &mut bytes, MAIN_HEADER_SIZE, file_len)?;
        let signal_count = declared_signal_count(&bytes)?;
        let header_size = header_size(signal_count);
        bytes.resize(header_size, 0);
        read_header_bytes(&mut file, &mut bytes[MAIN_HEADER_SIZE..], header_size, file_len)?;

        let (mut header, all_signals) = parse_header_with(&bytes, options)?;
        let layout = Arc::new(RecordLayout::new(&all_signals, header.file_type));
        let record_size = layout.record_size() as u64;

        let data_bytes = file_len - header_size as u64;
        if header.datarecords_in_file < 0 {
            let records = data_bytes / record_size;
            log::warn!(
                "{}: record count unknown, {} complete records in file",
                path.as_ref().display(),
                records
            );
            header.datarecords_in_file = records as i64;
        } else {
            let expected = header_size as u64 + header.datarecords_in_file as u64 * record_size;
            if file_len < expected {
                return Err(EdfError::Truncated {
                    expected,
                    actual: file_len,
                });
            }
            if file_len > expected {
                log::warn!(
                    "{}: {} bytes after the last data record ignored",
                    path.as_ref().display(),
                    file_len - expected
                );
            }
        }

        let data_signals: Vec<usize> = layout.data_signals().collect();
        let signals = data_signals.iter().map(|&i| all_signals[i].clone()).collect();

        let mut reader = EdfReader {
            file,
            header,
            all_signals,
            signals,
            sample_positions: vec![0; data_signals.len()],
            data_signals,
            layout,
            header_size,
            annotations: Vec::new(),
            record_onsets: Vec::new(),
        };
        reader.scan_annotations()?;

        log::debug!(
            "opened {}: {:?}, {} signals, {} records",
            path.as_ref().display(),
            reader.header.file_type,
            reader.signals.len(),
            reader.header.datarecords_in_file
        );
        Ok(reader)
    }

    /// 读取注释通道：注释、每个数据记录的起始时间和亚秒级开始时间
    fn scan_annotations(&mut self) -> Result<()> {
        let records = self.header.datarecords_in_file as usize;
        let duration = self.header.datarecord_duration;
        let channels: Vec<usize> = self.layout.annotation_signals().collect();

        if !self.header.file_type.is_plus() || channels.is_empty() {
            self.record_onsets = (0..records).map(|k| k as f64 * duration).collect();
            return Ok(());
        }

        let record_size = self.layout.record_size() as u64;
        let mut onsets = Vec::with_capacity(records);
        for k in 0..records {
            let record_start = self.header_size as u64 + k as u64 * record_size;
            for (n, &channel) in channels.iter().enumerate() {
                let span = self.layout.spans()[channel].bytes.clone();
                let mut raw = vec![0u8; span.len()];
                self.file.seek(SeekFrom::Start(record_start + span.start as u64))?;
                self.file.read_exact(&mut raw)?;

                if n == 0 {
                    let (onset, annotations) = decode_record(&raw)?;
                    let onset = onset.ok_or_else(|| {
                        EdfError::format("annotation", format!("data record {} has no time-keeping TAL", k))
                    })?;
                    onsets.push(onset);
                    self.annotations.extend(annotations);
                } else {
                    self.annotations.extend(decode_annotations(&raw)?);
                }
            }
        }

        if let Some(&first) = onsets.first() {
            let fraction = first - first.floor();
            let subsecond = (fraction * EDFLIB_TIME_DIMENSION as f64).round() as i64;
            self.header.starttime_subsecond = subsecond.min(EDFLIB_TIME_DIMENSION - 1);
        }
        if !self.header.file_type.is_discontinuous() {
            check_contiguous(&onsets, duration);
        }
        self.record_onsets = onsets;
        Ok(())
    }

    /// Recording-level header. For EDF+ files `datarecords_in_file` is the
    /// verified record count and `starttime_subsecond` comes from the first
    /// time-keeping TAL.
    pub fn header(&self) -> &EdfHeader {
        &self.header
    }

    /// Ordinary signals, annotation channels excluded.
    pub fn signals(&self) -> &[SignalParam] {
        &self.signals
    }

    /// Every signal header in file order, annotation channels included.
    pub fn all_signals(&self) -> &[SignalParam] {
        &self.all_signals
    }

    /// Annotations of the whole file, in file order. Onsets are seconds
    /// relative to the header's start time.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Start of each data record in seconds. For EDF+D files these come from
    /// the time-keeping TALs and may contain gaps.
    pub fn datarecord_onsets(&self) -> &[f64] {
        &self.record_onsets
    }

    fn data_signal(&self, signal: usize) -> Result<usize> {
        self.data_signals
            .get(signal)
            .copied()
            .ok_or(EdfError::InvalidSignalIndex(signal))
    }

    fn samples_in_file(&self, signal: usize) -> i64 {
        self.signals[signal].samples_per_record as i64 * self.header.datarecords_in_file
    }

    /// Reads up to `count` physical values from `signal`, starting at its
    /// current position.
    ///
    /// Values outside `physical_min..=physical_max` are returned as stored;
    /// nothing is clamped.
    ///
    /// ```rust
    /// use edf_codec::EdfReader;
    ///
    /// # edf_codec::doctest_utils::create_multi_channel_test_file("reader_physical_doc.edf")?;
    /// let mut reader = EdfReader::open("reader_physical_doc.edf")?;
    /// for i in 0..reader.signals().len() {
    ///     let rate = reader.signals()[i].samples_per_record;
    ///     let values = reader.read_physical_samples(i, rate)?;
    ///     let peak = values.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
    ///     println!("{}: peak {:.2} {}", reader.signals()[i].label, peak, reader.signals()[i].physical_dimension);
    /// }
    /// # drop(reader);
    /// # std::fs::remove_file("reader_physical_doc.edf").ok();
    /// # Ok::<(), edf_codec::EdfError>(())
    /// ```
    pub fn read_physical_samples(&mut self, signal: usize, count: usize) -> Result<Vec<f64>> {
        let digital = self.read_digital_samples(signal, count)?;
        let scaling = self.signals[signal].scaling()?;
        Ok(digital.into_iter().map(|d| scaling.to_physical(d)).collect())
    }

    /// Reads up to `count` stored integer values from `signal`, starting at
    /// its current position. Fewer values are returned at the end of the
    /// file.
    pub fn read_digital_samples(&mut self, signal: usize, count: usize) -> Result<Vec<i32>> {
        let index = self.data_signal(signal)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let span = self.layout.spans()[index].clone();
        let width = self.layout.sample_width();
        let samples_per_record = span.samples as i64;

        // 计算可读取的最大样本数
        let available = (self.samples_in_file(signal) - self.sample_positions[signal]).max(0) as usize;
        let actual_count = count.min(available);

        let mut samples = Vec::with_capacity(actual_count);
        let mut buffer = Vec::new();
        while samples.len() < actual_count {
            let position = self.sample_positions[signal];
            let record = position / samples_per_record;
            let in_record = position % samples_per_record;

            let offset = self.header_size as u64
                + record as u64 * self.layout.record_size() as u64
                + span.bytes.start as u64
                + in_record as u64 * width as u64;
            self.file.seek(SeekFrom::Start(offset))?;

            // 一次读取当前记录内剩余的样本
            let to_read = ((samples_per_record - in_record) as usize).min(actual_count - samples.len());
            buffer.resize(to_read * width, 0);
            self.file.read_exact(&mut buffer)?;
            samples.extend(buffer.chunks_exact(width).map(decode_sample));

            self.sample_positions[signal] = position + to_read as i64;
        }

        Ok(samples)
    }

    /// Moves the sample position of `signal`, clamped to the signal's
    /// length. Returns the new position.
    pub fn seek(&mut self, signal: usize, position: i64) -> Result<i64> {
        self.data_signal(signal)?;
        let new_position = position.clamp(0, self.samples_in_file(signal));
        self.sample_positions[signal] = new_position;
        Ok(new_position)
    }

    /// 获取指定信号的当前样本位置
    pub fn tell(&self, signal: usize) -> Result<i64> {
        self.data_signal(signal)?;
        Ok(self.sample_positions[signal])
    }

    /// 将指定信号的位置重置到开头
    pub fn rewind(&mut self, signal: usize) -> Result<()> {
        self.seek(signal, 0)?;
        Ok(())
    }

    /// Iterates over every data record from the start of the file.
    ///
    /// Each record is read lazily; only one record buffer is alive per
    /// iteration step.
    pub fn records(&mut self) -> Result<RecordReader<&mut BufReader<File>>> {
        self.file.seek(SeekFrom::Start(self.header_size as u64))?;
        let count = self.header.datarecords_in_file as usize;
        Ok(RecordReader::new(&mut self.file, Arc::clone(&self.layout), 0, Some(count)))
    }

    /// Byte layout of one data record.
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Index of each ordinary signal within [`EdfReader::all_signals`].
    pub fn data_signal_indices(&self) -> &[usize] {
        &self.data_signals
    }
}

fn read_header_bytes(file: &mut BufReader<File>, buf: &mut [u8], expected: usize, file_len: u64) -> Result<()> {
    file.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => EdfError::Truncated {
            expected: expected as u64,
            actual: file_len,
        },
        _ => EdfError::Io(e),
    })
}

fn check_contiguous(onsets: &[f64], duration: f64) {
    let Some(&first) = onsets.first() else {
        return;
    };
    for (k, &onset) in onsets.iter().enumerate() {
        let expected = first + k as f64 * duration;
        if (onset - expected).abs() > 1e-6 * duration.max(1.0) {
            log::warn!(
                "contiguous file has record {} at {}s, expected {}s",
                k,
                onset,
                expected
            );
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::serialize_header;
    use crate::types::FileType;
    use std::io::Write;

    fn eeg(samples_per_record: usize) -> SignalParam {
        SignalParam {
            label: "EEG".to_string(),
            transducer: String::new(),
            physical_dimension: "uV".to_string(),
            physical_min: -100.0,
            physical_max: 100.0,
            digital_min: -100,
            digital_max: 100,
            prefilter: String::new(),
            samples_per_record,
            reserved: String::new(),
        }
    }

    fn write_file(path: &Path, header: &EdfHeader, signals: &[SignalParam], data: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(&serialize_header(header, signals).unwrap()).unwrap();
        file.write_all(data).unwrap();
    }

    #[test]
    fn test_reads_without_clamping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.edf");
        let mut header = EdfHeader::new(FileType::Edf);
        header.datarecords_in_file = 2;

        let mut data = Vec::new();
        for value in [1i16, -1, 500, -500] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        write_file(&path, &header, &[eeg(2)], &data);

        let mut reader = EdfReader::open(&path).unwrap();
        assert_eq!(reader.read_digital_samples(0, 10).unwrap(), vec![1, -1, 500, -500]);
        assert_eq!(reader.tell(0).unwrap(), 4);
        assert!(reader.read_digital_samples(0, 1).unwrap().is_empty());

        reader.rewind(0).unwrap();
        let physical = reader.read_physical_samples(0, 4).unwrap();
        assert!((physical[2] - 500.0).abs() < 1e-9);

        assert_eq!(reader.seek(0, 99).unwrap(), 4);
        assert_eq!(reader.seek(0, -5).unwrap(), 0);
        assert!(matches!(reader.seek(1, 0), Err(EdfError::InvalidSignalIndex(1))));
    }

    #[test]
    fn test_truncated_data_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.edf");
        let mut header = EdfHeader::new(FileType::Edf);
        header.datarecords_in_file = 3;
        write_file(&path, &header, &[eeg(2)], &[0u8; 8]);

        let err = EdfReader::open(&path).err().unwrap();
        assert!(matches!(err, EdfError::Truncated { expected: 524, actual: 520 }));
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn test_truncated_header_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stub.edf");
        std::fs::write(&path, b"0       patient").unwrap();
        assert!(matches!(EdfReader::open(&path), Err(EdfError::Truncated { .. })));
    }

    #[test]
    fn test_unknown_record_count_is_derived() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unknown.edf");
        let header = EdfHeader::new(FileType::Edf);
        write_file(&path, &header, &[eeg(1)], &[1, 0, 2, 0, 3]);

        let mut reader = EdfReader::open(&path).unwrap();
        assert_eq!(reader.header().datarecords_in_file, 2);
        assert_eq!(reader.read_digital_samples(0, 5).unwrap(), vec![1, 2]);
        assert_eq!(reader.datarecord_onsets(), &[0.0, 1.0]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EdfReader::open(dir.path().join("missing.edf")).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }
}
