//! # EDF/BDF codec for Rust
//!
//! A pure Rust library for reading and writing EDF, EDF+, BDF and BDF+
//! biosignal files: header parsing and serialization, digital/physical
//! sample conversion, the EDF+ annotation channel (TALs), streaming record
//! access and whole-file structural operations.
//!
//! ## Quick Start
//!
//! ### Writing and reading a whole recording
//!
//! ```rust
//! use edf_codec::highlevel::{self, make_header, make_signal_headers, HeaderFields, Signals};
//! use edf_codec::Annotation;
//!
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("quick.edf");
//!
//! let headers = make_signal_headers(&["EEG Fp1", "EEG Fp2"], 256);
//! let signals = Signals::Physical(vec![vec![12.5; 256 * 10], vec![-7.25; 256 * 10]]);
//! let header = make_header(HeaderFields {
//!     patientname: "Test Patient".to_string(),
//!     gender: "Male".to_string(),
//!     ..HeaderFields::default()
//! });
//! let annotations = [Annotation::new(2.5, Some(1.0), "Eyes closed")];
//!
//! let report = highlevel::write(&path, &signals, &headers, &header, &annotations)?;
//! assert_eq!(report.records, 10);
//!
//! let recording = highlevel::read(&path, false)?;
//! assert_eq!(recording.header.patient_name, "Test Patient");
//! assert_eq!(recording.annotations, annotations);
//! let fp1 = &recording.signals.as_physical().unwrap()[0];
//! assert!(fp1.iter().all(|v| (v - 12.5).abs() < 0.01));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Streaming
//!
//! [`EdfWriter`] writes one data record per call and patches the header at
//! [`EdfWriter::finalize`]; [`EdfReader`] parses the header and annotations
//! on open and reads samples on demand.
//!
//! ```rust
//! use edf_codec::{EdfReader, EdfWriter, FileType, SignalParam};
//!
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("stream.bdf");
//!
//! let mut writer = EdfWriter::create(&path)?;
//! writer.set_file_type(FileType::BdfPlusC)?;
//! writer.add_signal(SignalParam {
//!     label: "ECG".to_string(),
//!     transducer: String::new(),
//!     physical_dimension: "mV".to_string(),
//!     physical_min: -5.0,
//!     physical_max: 5.0,
//!     digital_min: -8388608,
//!     digital_max: 8388607,
//!     prefilter: String::new(),
//!     samples_per_record: 100,
//!     reserved: String::new(),
//! })?;
//! for _ in 0..5 {
//!     writer.write_samples(&[vec![1.0; 100]])?;
//! }
//! writer.add_annotation(0.5, None, "R peak")?;
//! writer.finalize()?;
//!
//! let mut reader = EdfReader::open(&path)?;
//! assert_eq!(reader.header().file_type, FileType::BdfPlusC);
//! assert_eq!(reader.header().datarecords_in_file, 5);
//! let samples = reader.read_physical_samples(0, 500)?;
//! assert!(samples.iter().all(|v| (v - 1.0).abs() < 1e-5));
//! assert_eq!(reader.annotations()[0].description, "R peak");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Physical vs Digital Values
//!
//! Samples are stored as 16-bit (EDF) or 24-bit (BDF) integers. Each signal
//! maps its digital range linearly onto its physical range:
//!
//! ```rust
//! use edf_codec::SignalParam;
//!
//! let signal = SignalParam {
//!     label: "Test Signal".to_string(),
//!     transducer: String::new(),
//!     physical_dimension: "uV".to_string(),
//!     physical_min: -100.0,
//!     physical_max: 100.0,
//!     digital_min: -32768,
//!     digital_max: 32767,
//!     prefilter: String::new(),
//!     samples_per_record: 256,
//!     reserved: String::new(),
//! };
//!
//! let physical = signal.to_physical(16384)?;
//! assert!((physical - 50.0).abs() < 0.1);
//! let digital = signal.to_digital(25.0)?;
//! assert!((digital - 8192).abs() <= 1);
//! # Ok::<(), edf_codec::EdfError>(())
//! ```
//!
//! ## Structural operations
//!
//! [`highlevel::anonymize`] rewrites identification fields in place or into
//! a copy, and [`highlevel::drop_channels`] copies a file with a subset of
//! its signals. Both leave every other byte unchanged.

pub mod annotations;
pub mod convert;
pub mod error;
pub mod header;
pub mod highlevel;
pub mod reader;
pub mod record;
pub mod types;
pub mod utils;
pub mod writer;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use error::{EdfError, ErrorKind, Result};
pub use header::HeaderOptions;
pub use highlevel::{ChannelSelector, HeaderInfo, Recording, Signals};
pub use reader::EdfReader;
pub use types::{Annotation, EdfHeader, FileType, SignalParam};
pub use writer::{EdfWriter, WriteReport};

// Important constants
pub const EDFLIB_TIME_DIMENSION: i64 = 10_000_000; // 100 nanoseconds unit
pub const EDFLIB_MAXSIGNALS: usize = 4096;

/// Library version
///
/// # Examples
///
/// ```rust
/// let version = edf_codec::version();
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
