//! EDF+ annotation channel sub-format.
//!
//! An annotation channel holds a sequence of time-stamped annotation lists
//! (TALs), each terminated by a zero byte:
//!
//! ```text
//! +onset [0x15 duration] 0x14 text 0x14 [text 0x14 ...] 0x00
//! ```
//!
//! The first TAL of every data record is a time-keeping TAL
//! (`+onset 0x14 0x14 0x00`) whose onset is the start of that record.
//! Unused space in the channel is filled with zero bytes.

use crate::error::{EdfError, Result};
use crate::types::Annotation;

/// Separates onset and duration.
pub const TAL_DURATION_SEPARATOR: u8 = 0x15;
/// Terminates the onset/duration part and every text.
pub const TAL_TEXT_TERMINATOR: u8 = 0x14;
/// Terminates a TAL.
pub const TAL_TERMINATOR: u8 = 0x00;

/// Smallest annotation channel, in bytes per data record.
pub const MIN_ANNOTATION_CAPACITY: usize = 120;

/// One parsed TAL.
#[derive(Debug, Clone, PartialEq)]
pub struct Tal {
    pub onset: f64,
    pub duration: Option<f64>,
    pub texts: Vec<String>,
}

impl Tal {
    /// Shape of a time-keeping TAL: no duration and an empty first text.
    /// Only the first TAL of a record's first annotation channel is one.
    pub fn is_timekeeping(&self) -> bool {
        self.duration.is_none() && self.texts.first().map_or(false, |t| t.is_empty())
    }
}

/// Onset text: always signed, shortest decimal that reads back exactly.
fn format_onset(onset: f64) -> String {
    if onset < 0.0 {
        format!("-{}", -onset)
    } else {
        format!("+{}", onset.abs())
    }
}

/// Checks that an annotation can be stored without changing its meaning.
pub fn validate_annotation(annotation: &Annotation) -> Result<()> {
    if !annotation.onset.is_finite() || annotation.onset < 0.0 {
        return Err(EdfError::InvalidArgument(format!(
            "annotation onset must be a finite number >= 0, got {}",
            annotation.onset
        )));
    }
    if let Some(duration) = annotation.duration {
        if !duration.is_finite() || duration < 0.0 {
            return Err(EdfError::InvalidArgument(format!(
                "annotation duration must be a finite number >= 0, got {}",
                duration
            )));
        }
    }
    let reserved = [TAL_TERMINATOR, TAL_TEXT_TERMINATOR, TAL_DURATION_SEPARATOR];
    if annotation.description.bytes().any(|b| reserved.contains(&b)) {
        return Err(EdfError::InvalidArgument(format!(
            "annotation text {:?} contains a reserved control byte",
            annotation.description
        )));
    }
    Ok(())
}

/// Encodes one annotation as a complete TAL.
pub fn encode_tal(annotation: &Annotation) -> Result<Vec<u8>> {
    validate_annotation(annotation)?;

    let mut tal = format_onset(annotation.onset).into_bytes();
    if let Some(duration) = annotation.duration {
        tal.push(TAL_DURATION_SEPARATOR);
        tal.extend_from_slice(duration.to_string().as_bytes());
    }
    tal.push(TAL_TEXT_TERMINATOR);
    tal.extend_from_slice(annotation.description.as_bytes());
    tal.push(TAL_TEXT_TERMINATOR);
    tal.push(TAL_TERMINATOR);
    Ok(tal)
}

/// The time-keeping TAL opening a data record that starts at `onset`.
pub fn timekeeping_tal(onset: f64) -> Vec<u8> {
    let mut tal = format_onset(onset).into_bytes();
    tal.extend_from_slice(&[TAL_TEXT_TERMINATOR, TAL_TEXT_TERMINATOR, TAL_TERMINATOR]);
    tal
}

/// Splits raw channel bytes into TALs. Zero padding is skipped.
pub fn parse_tals(raw: &[u8]) -> Result<Vec<Tal>> {
    raw.split(|&b| b == TAL_TERMINATOR)
        .filter(|tal| !tal.is_empty())
        .map(parse_tal)
        .collect()
}

fn parse_tal(tal: &[u8]) -> Result<Tal> {
    let head_end = tal
        .iter()
        .position(|&b| b == TAL_TEXT_TERMINATOR)
        .ok_or_else(|| EdfError::format("annotation", "TAL has no text terminator"))?;
    let (head, body) = (&tal[..head_end], &tal[head_end + 1..]);

    let mut head_parts = head.splitn(2, |&b| b == TAL_DURATION_SEPARATOR);
    let onset_text = head_parts.next().unwrap_or_default();
    let onset = parse_onset(onset_text)?;
    let duration = match head_parts.next() {
        Some(text) if !text.is_empty() => Some(parse_duration(text)?),
        _ => None,
    };

    // 最后一个 0x14 之后应为空
    let mut pieces: Vec<&[u8]> = body.split(|&b| b == TAL_TEXT_TERMINATOR).collect();
    if pieces.last().map_or(false, |last| last.is_empty()) {
        pieces.pop();
    }
    let texts = pieces
        .into_iter()
        .map(|piece| {
            String::from_utf8(piece.to_vec())
                .map_err(|_| EdfError::format("annotation", "text is not valid UTF-8"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Tal { onset, duration, texts })
}

fn parse_onset(text: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(text)
        .map_err(|_| EdfError::format("annotation", "onset is not ASCII"))?;
    if !text.starts_with('+') && !text.starts_with('-') {
        return Err(EdfError::format(
            "annotation",
            format!("onset '{}' must start with '+' or '-'", text),
        ));
    }
    let value = text[1..]
        .parse::<f64>()
        .map_err(|_| EdfError::format("annotation", format!("invalid onset '{}'", text)))?;
    if !value.is_finite() || text[1..].starts_with(|c: char| c == '+' || c == '-') {
        return Err(EdfError::format("annotation", format!("invalid onset '{}'", text)));
    }
    Ok(if text.starts_with('-') { -value } else { value })
}

fn parse_duration(text: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(text)
        .map_err(|_| EdfError::format("annotation", "duration is not ASCII"))?;
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 && !text.starts_with(|c: char| c == '+' || c == '-') => Ok(value),
        _ => Err(EdfError::format("annotation", format!("invalid duration '{}'", text))),
    }
}

/// Decodes every TAL in `raw` as annotations, in file order.
///
/// For channel bytes without time-keeping TALs, such as the second and
/// later annotation channels of a record. Use [`decode_record`] or
/// [`decode_records`] for the first channel.
pub fn decode_annotations(raw: &[u8]) -> Result<Vec<Annotation>> {
    let mut annotations = Vec::new();
    for tal in parse_tals(raw)? {
        push_texts(&mut annotations, &tal, 0);
    }
    Ok(annotations)
}

/// Decodes the annotation bytes of one data record.
///
/// Returns the record onset from its time-keeping TAL together with the
/// annotations that follow it. Texts sharing the time-keeping TAL are kept,
/// and later TALs are annotations even when their text is empty.
pub fn decode_record(raw: &[u8]) -> Result<(Option<f64>, Vec<Annotation>)> {
    let tals = parse_tals(raw)?;
    let mut annotations = Vec::new();
    let mut onset = None;

    for (i, tal) in tals.iter().enumerate() {
        if i == 0 && tal.is_timekeeping() {
            onset = Some(tal.onset);
            push_texts(&mut annotations, tal, 1);
        } else {
            push_texts(&mut annotations, tal, 0);
        }
    }

    Ok((onset, annotations))
}

/// Decodes consecutive `record_len`-byte chunks of the first annotation
/// channel, each opening with its record's time-keeping TAL.
pub fn decode_records(raw: &[u8], record_len: usize) -> Result<Vec<Annotation>> {
    if record_len == 0 {
        return Err(EdfError::InvalidArgument("record length must be greater than zero".to_string()));
    }
    let mut annotations = Vec::new();
    for chunk in raw.chunks(record_len) {
        annotations.extend(decode_record(chunk)?.1);
    }
    Ok(annotations)
}

/// Onset of the record whose annotation bytes are `raw`, if it opens with a
/// time-keeping TAL.
pub fn record_onset(raw: &[u8]) -> Result<Option<f64>> {
    Ok(decode_record(raw)?.0)
}

fn push_texts(out: &mut Vec<Annotation>, tal: &Tal, skip: usize) {
    for text in tal.texts.iter().skip(skip) {
        out.push(Annotation {
            onset: tal.onset,
            duration: tal.duration,
            description: text.clone(),
        });
    }
}

/// Packs `annotations` greedily, in order, behind the time-keeping TAL of
/// each record. Returns one `capacity`-byte chunk per entry of
/// `record_onsets` and the number of annotations that were placed.
pub fn pack_annotations(annotations: &[Annotation], record_onsets: &[f64], capacity: usize) -> Result<(Vec<Vec<u8>>, usize)> {
    let mut chunks: Vec<Vec<u8>> = record_onsets.iter().map(|&t| timekeeping_tal(t)).collect();
    if let Some(chunk) = chunks.iter().find(|c| c.len() > capacity) {
        return Err(EdfError::range(
            "annotation capacity",
            format!("{} bytes cannot hold a {}-byte time-keeping TAL", capacity, chunk.len()),
        ));
    }

    let timekeeping = chunks.iter().map(Vec::len).max().unwrap_or(0);
    let mut current = 0;
    let mut placed = 0;
    for annotation in annotations {
        let tal = encode_tal(annotation)?;
        if tal.len() + timekeeping > capacity {
            return Err(EdfError::range(
                "annotation capacity",
                format!(
                    "{}-byte annotation at {}s does not fit a {}-byte channel",
                    tal.len(),
                    annotation.onset,
                    capacity
                ),
            ));
        }
        while current < chunks.len() && chunks[current].len() + tal.len() > capacity {
            current += 1;
        }
        if current == chunks.len() {
            break;
        }
        chunks[current].extend_from_slice(&tal);
        placed += 1;
    }

    for chunk in &mut chunks {
        chunk.resize(capacity, TAL_TERMINATOR);
    }

    if placed < annotations.len() {
        log::debug!(
            "{} of {} annotations did not fit {} records",
            annotations.len() - placed,
            annotations.len(),
            record_onsets.len()
        );
    }
    Ok((chunks, placed))
}

/// Per-record channel size that lets [`pack_annotations`] place every
/// annotation into the records starting at `record_onsets`.
///
/// At least [`MIN_ANNOTATION_CAPACITY`] bytes, rounded up to a multiple of
/// `sample_width`.
pub fn annotation_capacity(annotations: &[Annotation], record_onsets: &[f64], sample_width: usize) -> Result<usize> {
    if record_onsets.is_empty() {
        if annotations.is_empty() {
            return Ok(MIN_ANNOTATION_CAPACITY);
        }
        return Err(EdfError::InvalidArgument(
            "annotations need at least one data record".to_string(),
        ));
    }

    let mut total = 0;
    let mut largest = 0;
    for annotation in annotations {
        let len = encode_tal(annotation)?.len();
        total += len;
        largest = largest.max(len);
    }
    let timekeeping = record_onsets
        .iter()
        .map(|&t| timekeeping_tal(t).len())
        .max()
        .unwrap_or(0);

    // 贪心装填时每个已满记录至少装入 ceil(total/n) 字节
    let per_record = (total + record_onsets.len() - 1) / record_onsets.len();
    let capacity = (timekeeping + per_record + largest).max(MIN_ANNOTATION_CAPACITY);
    Ok((capacity + sample_width - 1) / sample_width * sample_width)
}

/// Encodes `annotations` into as many `capacity`-byte chunks as needed.
///
/// Chunk `k` opens with a time-keeping TAL at `k` seconds, matching
/// one-second data records; writers with other record durations use
/// [`pack_annotations`] directly.
pub fn encode_annotations(annotations: &[Annotation], capacity: usize) -> Result<Vec<u8>> {
    let mut onsets = vec![0.0];
    loop {
        let (chunks, placed) = pack_annotations(annotations, &onsets, capacity)?;
        if placed == annotations.len() {
            return Ok(chunks.concat());
        }
        // 按剩余注释所需的字节数估算追加的块数
        let remaining: usize = annotations[placed..]
            .iter()
            .map(|a| encode_tal(a).map(|tal| tal.len()))
            .sum::<Result<usize>>()?;
        let extra = (remaining / (capacity / 2).max(1)).max(1);
        let next = onsets.len();
        onsets.extend((next..next + extra).map(|k| k as f64));
    }
}
