// Internal utilities for documentation tests
// Generates small files the doctests open

use crate::{EdfWriter, Result, SignalParam};
use std::path::Path;

fn eeg(label: &str, transducer: &str) -> SignalParam {
    SignalParam {
        label: label.to_string(),
        transducer: transducer.to_string(),
        physical_dimension: "uV".to_string(),
        physical_min: -200.0,
        physical_max: 200.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: "HP:0.1Hz LP:70Hz".to_string(),
        samples_per_record: 256,
        reserved: String::new(),
    }
}

/// Creates a simple EDF+ file: one 256 Hz EEG channel, two seconds of a
/// 10 Hz sine and one annotation.
pub fn create_simple_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut writer = EdfWriter::create(&path)?;
    writer.set_patient_info("DOC001", "M", "01-JAN-1990", "Test Patient")?;
    writer.set_recording_info("ADM1", "Tech", "Amp")?;
    writer.add_signal(eeg("EEG Fp1", "AgAgCl cup electrodes"))?;

    for second in 0..2 {
        let samples: Vec<f64> = (0..256)
            .map(|i| {
                let t = second as f64 + i as f64 / 256.0;
                50.0 * (2.0 * std::f64::consts::PI * 10.0 * t).sin()
            })
            .collect();
        writer.write_samples(&[samples])?;
    }
    writer.add_annotation(0.5, None, "Start")?;
    writer.finalize()?;
    Ok(())
}

/// Creates an EDF+ file with one EEG and one ECG channel, one second long.
pub fn create_multi_channel_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut writer = EdfWriter::create(&path)?;
    writer.set_patient_info("DOC002", "F", "15-MAR-1985", "Multi Channel Test")?;
    writer.add_signal(eeg("EEG C3", "AgAgCl electrodes"))?;
    writer.add_signal(SignalParam {
        label: "ECG Lead II".to_string(),
        transducer: "Chest electrodes".to_string(),
        physical_dimension: "mV".to_string(),
        physical_min: -5.0,
        physical_max: 5.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: "HP:0.1Hz LP:100Hz".to_string(),
        samples_per_record: 256,
        reserved: String::new(),
    })?;

    let mut eeg_samples = Vec::with_capacity(256);
    let mut ecg_samples = Vec::with_capacity(256);
    for i in 0..256 {
        let t = i as f64 / 256.0;
        // EEG: 10 Hz alpha plus 50 Hz mains
        eeg_samples.push(
            30.0 * (2.0 * std::f64::consts::PI * 10.0 * t).sin()
                + 5.0 * (2.0 * std::f64::consts::PI * 50.0 * t).sin(),
        );
        ecg_samples.push(2.0 * (2.0 * std::f64::consts::PI * t).sin());
    }

    writer.write_samples(&[eeg_samples, ecg_samples])?;
    writer.finalize()?;
    Ok(())
}
