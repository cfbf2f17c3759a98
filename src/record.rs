//! Interleaved data records.
//!
//! Every record holds, for each signal in header order, exactly
//! `samples_per_record` samples of the file's sample width. Annotation
//! channels occupy their span like any other signal but carry TAL bytes.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::sync::Arc;

use crate::convert::{decode_sample, encode_sample, storage_limits};
use crate::error::{EdfError, Result};
use crate::header::header_size;
use crate::types::{FileType, SignalParam};

/// Where one signal lives inside a data record.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpan {
    pub label: String,
    pub bytes: Range<usize>,
    pub samples: usize,
    pub annotation: bool,
}

/// Byte layout of one data record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    spans: Vec<SignalSpan>,
    record_size: usize,
    sample_width: usize,
}

impl RecordLayout {
    pub fn new(signals: &[SignalParam], file_type: FileType) -> Self {
        let sample_width = file_type.sample_width();
        let mut offset = 0;
        let spans = signals
            .iter()
            .map(|signal| {
                let len = signal.samples_per_record * sample_width;
                let span = SignalSpan {
                    label: signal.label.clone(),
                    bytes: offset..offset + len,
                    samples: signal.samples_per_record,
                    annotation: signal.is_annotation(),
                };
                offset += len;
                span
            })
            .collect();

        RecordLayout {
            spans,
            record_size: offset,
            sample_width,
        }
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn sample_width(&self) -> usize {
        self.sample_width
    }

    pub fn spans(&self) -> &[SignalSpan] {
        &self.spans
    }

    pub fn span(&self, signal: usize) -> Result<&SignalSpan> {
        self.spans.get(signal).ok_or(EdfError::InvalidSignalIndex(signal))
    }

    /// Indices of the ordinary (non-annotation) signals.
    pub fn data_signals(&self) -> impl Iterator<Item = usize> + '_ {
        self.spans.iter().enumerate().filter(|(_, s)| !s.annotation).map(|(i, _)| i)
    }

    /// Indices of the annotation channels.
    pub fn annotation_signals(&self) -> impl Iterator<Item = usize> + '_ {
        self.spans.iter().enumerate().filter(|(_, s)| s.annotation).map(|(i, _)| i)
    }
}

/// One data record read from a file.
#[derive(Debug, Clone)]
pub struct DataRecord {
    index: usize,
    bytes: Vec<u8>,
    layout: Arc<RecordLayout>,
}

impl DataRecord {
    /// Position of this record in the file.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw bytes of one signal's span.
    pub fn signal_bytes(&self, signal: usize) -> Result<&[u8]> {
        let span = self.layout.span(signal)?;
        Ok(&self.bytes[span.bytes.clone()])
    }

    pub fn digital_samples(&self, signal: usize) -> Result<Vec<i32>> {
        let width = self.layout.sample_width;
        Ok(self
            .signal_bytes(signal)?
            .chunks_exact(width)
            .map(decode_sample)
            .collect())
    }

    /// Annotation bytes of this record, all annotation channels concatenated.
    pub fn annotation_bytes(&self) -> Vec<u8> {
        self.layout
            .annotation_signals()
            .flat_map(|i| self.bytes[self.layout.spans[i].bytes.clone()].iter().copied())
            .collect()
    }
}

/// Lazily reads consecutive data records.
pub struct RecordReader<R> {
    inner: R,
    layout: Arc<RecordLayout>,
    next_index: usize,
    remaining: Option<usize>,
}

impl<R: Read> RecordReader<R> {
    /// `inner` must be positioned at the start of record `first_index`.
    /// With `count == None` records are read until a clean end of file.
    pub fn new(inner: R, layout: Arc<RecordLayout>, first_index: usize, count: Option<usize>) -> Self {
        RecordReader {
            inner,
            layout,
            next_index: first_index,
            remaining: count,
        }
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_record(&mut self) -> Result<Option<DataRecord>> {
        if self.remaining == Some(0) || self.layout.record_size == 0 {
            return Ok(None);
        }

        let mut bytes = vec![0u8; self.layout.record_size];
        let mut filled = 0;
        while filled < bytes.len() {
            match self.inner.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 && self.remaining.is_none() {
            return Ok(None);
        }
        if filled < bytes.len() {
            return Err(EdfError::Truncated {
                expected: bytes.len() as u64,
                actual: filled as u64,
            });
        }

        let record = DataRecord {
            index: self.next_index,
            bytes,
            layout: Arc::clone(&self.layout),
        };
        self.next_index += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<DataRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.remaining = Some(0);
                Some(Err(e))
            }
        }
    }
}

/// Writes data records one at a time through a single staging buffer.
pub struct RecordWriter<W> {
    inner: W,
    layout: Arc<RecordLayout>,
    buffer: Vec<u8>,
    records_written: usize,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W, layout: Arc<RecordLayout>) -> Self {
        let buffer = Vec::with_capacity(layout.record_size);
        RecordWriter {
            inner,
            layout,
            buffer,
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes one record.
    ///
    /// `samples` holds one slice per ordinary signal, `annotations` one byte
    /// slice per annotation channel, both in header order. Annotation bytes
    /// shorter than the channel are zero-padded.
    pub fn write_record(&mut self, samples: &[&[i32]], annotations: &[&[u8]]) -> Result<()> {
        let layout = Arc::clone(&self.layout);
        let data_count = layout.data_signals().count();
        if samples.len() != data_count || annotations.len() != layout.spans.len() - data_count {
            return Err(EdfError::InvalidArgument(format!(
                "record needs {} sample buffers and {} annotation buffers, got {} and {}",
                data_count,
                layout.spans.len() - data_count,
                samples.len(),
                annotations.len()
            )));
        }

        let (min, max) = storage_limits(layout.sample_width);
        let mut samples = samples.iter();
        let mut annotations = annotations.iter();
        self.buffer.clear();

        for span in &layout.spans {
            if span.annotation {
                let bytes = annotations.next().copied().unwrap_or_default();
                let capacity = span.bytes.len();
                if bytes.len() > capacity {
                    return Err(EdfError::range(
                        span.label.clone(),
                        format!("{} annotation bytes exceed the {}-byte channel", bytes.len(), capacity),
                    ));
                }
                self.buffer.extend_from_slice(bytes);
                self.buffer.resize(self.buffer.len() + capacity - bytes.len(), 0);
                continue;
            }

            let values = samples.next().copied().unwrap_or_default();
            if values.len() != span.samples {
                return Err(EdfError::InvalidArgument(format!(
                    "signal '{}' needs {} samples per record, got {}",
                    span.label,
                    span.samples,
                    values.len()
                )));
            }
            for &value in values {
                if (value as i64) < min || (value as i64) > max {
                    return Err(EdfError::SampleOverflow {
                        signal: span.label.clone(),
                        value: value as f64,
                        min,
                        max,
                    });
                }
                encode_sample(value, layout.sample_width, &mut self.buffer);
            }
        }

        self.inner.write_all(&self.buffer)?;
        self.records_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Result of [`write_records`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCount {
    pub records: usize,
    /// Zero samples appended to each ordinary signal to fill the last record.
    pub padding: Vec<usize>,
}

/// Samples read by [`read_records`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordData {
    /// One buffer per ordinary signal, in header order.
    pub samples: Vec<Vec<i32>>,
    /// Annotation bytes of every record read, in record order.
    pub annotations: Vec<Vec<u8>>,
}

/// Reads the records in `records` from a file whose header describes
/// `signals`.
pub fn read_records<R: Read + Seek>(
    mut reader: R,
    signals: &[SignalParam],
    file_type: FileType,
    records: Range<usize>,
) -> Result<RecordData> {
    let layout = Arc::new(RecordLayout::new(signals, file_type));
    let start = header_size(signals.len()) as u64 + (records.start * layout.record_size) as u64;
    reader.seek(SeekFrom::Start(start))?;

    let data_signals: Vec<usize> = layout.data_signals().collect();
    let count = records.end.saturating_sub(records.start);
    let mut data = RecordData {
        samples: data_signals
            .iter()
            .map(|&i| Vec::with_capacity(layout.spans[i].samples * count))
            .collect(),
        annotations: Vec::with_capacity(count),
    };

    for record in RecordReader::new(reader, Arc::clone(&layout), records.start, Some(count)) {
        let record = record?;
        for (buffer, &signal) in data.samples.iter_mut().zip(&data_signals) {
            buffer.extend(record.digital_samples(signal)?);
        }
        data.annotations.push(record.annotation_bytes());
    }

    Ok(data)
}

/// Writes data records until every source and annotation chunk is consumed.
///
/// `sources` yields the digital samples of each ordinary signal;
/// `annotation_chunks[k]` fills the annotation channel of record `k` (records
/// without a chunk get zero bytes). The last record is zero-padded.
pub fn write_records<W, I>(
    writer: W,
    signals: &[SignalParam],
    file_type: FileType,
    sources: Vec<I>,
    annotation_chunks: &[Vec<u8>],
) -> Result<RecordCount>
where
    W: Write,
    I: Iterator<Item = i32>,
{
    let layout = Arc::new(RecordLayout::new(signals, file_type));
    let data_signals: Vec<usize> = layout.data_signals().collect();
    if sources.len() != data_signals.len() {
        return Err(EdfError::InvalidArgument(format!(
            "expected {} sample sources, got {}",
            data_signals.len(),
            sources.len()
        )));
    }
    let annotation_channels = layout.annotation_signals().count();

    let mut sources = sources;
    let mut buffers: Vec<Vec<i32>> = data_signals
        .iter()
        .map(|&i| Vec::with_capacity(layout.spans[i].samples))
        .collect();
    let mut padding = vec![0; data_signals.len()];
    let mut writer = RecordWriter::new(writer, Arc::clone(&layout));

    loop {
        let mut real_samples = 0;
        for ((buffer, source), &signal) in buffers.iter_mut().zip(sources.iter_mut()).zip(&data_signals) {
            buffer.clear();
            buffer.extend(source.by_ref().take(layout.spans[signal].samples));
            real_samples += buffer.len();
        }

        let index = writer.records_written();
        if real_samples == 0 && index >= annotation_chunks.len() {
            break;
        }

        for ((buffer, &signal), pad) in buffers.iter_mut().zip(&data_signals).zip(padding.iter_mut()) {
            let missing = layout.spans[signal].samples - buffer.len();
            *pad += missing;
            buffer.resize(layout.spans[signal].samples, 0);
        }

        let chunk = annotation_chunks.get(index).map(Vec::as_slice).unwrap_or_default();
        let empty: &[u8] = &[];
        let mut annotation_slices = vec![empty; annotation_channels];
        if let Some(first) = annotation_slices.first_mut() {
            *first = chunk;
        }
        let sample_slices: Vec<&[i32]> = buffers.iter().map(Vec::as_slice).collect();
        writer.write_record(&sample_slices, &annotation_slices)?;
    }

    writer.flush()?;
    let count = RecordCount {
        records: writer.records_written(),
        padding,
    };
    if count.padding.iter().any(|&p| p > 0) {
        log::debug!("zero-padded last record: {:?} samples per signal", count.padding);
    }
    Ok(count)
}
