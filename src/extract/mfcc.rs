use ndarray::Array2;
use rustfft::{FftPlanner, num_complex::Complex};

use crate::config::AudioConfig;

/// Mel bands feeding the cepstral transform.
const N_MELS: usize = 26;

/// Dynamic-range floor below the per-frame peak, in dB.
const TOP_DB: f32 = 80.0;

/// Frame width of one cepstral vector under `audio`, including derivative
/// blocks when enabled.
pub fn frame_dim(audio: &AudioConfig) -> usize {
    if audio.use_temp_derivatives { audio.num_cepstral * 3 } else { audio.num_cepstral }
}

/// Number of analysis frames a signal of `len` samples yields.
pub fn num_frames(len: usize, frame_len: usize, frame_step: usize) -> usize {
    if len < frame_len { 0 } else { 1 + (len - frame_len) / frame_step }
}

/// Compute cepstral-coefficient frames for a mono signal.
///
/// Returns an `(n_frames, dim)` matrix: `num_cepstral` coefficients per frame,
/// with first and second temporal derivatives appended when configured.
pub fn compute_frames(samples: &[f32], sample_rate: u32, audio: &AudioConfig) -> Array2<f32> {
    let frame_len = ((audio.frame_length * sample_rate as f32).round() as usize).max(1);
    let frame_step = ((audio.frame_stride * sample_rate as f32).round() as usize).max(1);
    let n_frames = num_frames(samples.len(), frame_len, frame_step);
    let n_mfcc = audio.num_cepstral;

    if n_frames == 0 {
        return Array2::zeros((0, frame_dim(audio)));
    }

    let n_fft = frame_len.next_power_of_two();
    let n_bins = n_fft / 2 + 1;
    let window = hamming(frame_len);
    let filterbank = mel_filterbank(N_MELS, n_fft, sample_rate);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut coeffs = Array2::<f32>::zeros((n_frames, n_mfcc));
    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
    let mut power = vec![0.0f32; n_bins];
    let mut mel_energy = vec![0.0f32; N_MELS];

    for t in 0..n_frames {
        let start = t * frame_step;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let sample = if i < frame_len { samples[start + i] * window[i] } else { 0.0 };
            *slot = Complex::new(sample, 0.0);
        }
        fft.process(&mut buffer);
        for (bin, p) in power.iter_mut().enumerate() {
            *p = buffer[bin].norm_sqr() / n_fft as f32;
        }

        for (m, energy) in mel_energy.iter_mut().enumerate() {
            *energy = filterbank[m].iter().map(|&(bin, w)| w * power[bin]).sum();
        }

        // log-compress with a floor relative to the frame peak
        let mut log_mel = vec![0.0f32; N_MELS];
        let mut max_db = f32::NEG_INFINITY;
        for (m, &e) in mel_energy.iter().enumerate() {
            let db = power_to_db(e);
            log_mel[m] = db;
            if db > max_db {
                max_db = db;
            }
        }
        let floor = max_db - TOP_DB;
        for v in &mut log_mel {
            if *v < floor {
                *v = floor;
            }
        }

        let frame_coeffs = dct_type_ii(&log_mel, n_mfcc);
        for (k, &c) in frame_coeffs.iter().enumerate() {
            coeffs[(t, k)] = c;
        }
    }

    if !audio.use_temp_derivatives {
        return coeffs;
    }

    let delta = temporal_delta(&coeffs);
    let delta2 = temporal_delta(&delta);
    let mut out = Array2::<f32>::zeros((n_frames, n_mfcc * 3));
    for t in 0..n_frames {
        for k in 0..n_mfcc {
            out[(t, k)] = coeffs[(t, k)];
            out[(t, n_mfcc + k)] = delta[(t, k)];
            out[(t, 2 * n_mfcc + k)] = delta2[(t, k)];
        }
    }
    out
}

/// Central-difference temporal derivative, edges clamped.
fn temporal_delta(frames: &Array2<f32>) -> Array2<f32> {
    let (n_frames, dim) = frames.dim();
    let mut out = Array2::<f32>::zeros((n_frames, dim));
    for t in 0..n_frames {
        let prev = t.saturating_sub(1);
        let next = (t + 1).min(n_frames - 1);
        for k in 0..dim {
            out[(t, k)] = (frames[(next, k)] - frames[(prev, k)]) / 2.0;
        }
    }
    out
}

fn hamming(len: usize) -> Vec<f32> {
    let denom = (len.max(2) - 1) as f32;
    (0..len)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}

fn power_to_db(x: f32) -> f32 {
    let amin = 1e-10f32;
    10.0 * x.max(amin).log10()
}

/// Convert frequency in Hz to the mel scale (Slaney formulation).
fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if hz < min_log_hz { hz / f_sp } else { min_log_mel + (hz / min_log_hz).ln() / logstep }
}

fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if mel < min_log_mel { mel * f_sp } else { min_log_hz * (logstep * (mel - min_log_mel)).exp() }
}

/// Triangular mel filterbank as sparse (bin, weight) rows, one per band.
fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<Vec<(usize, f32)>> {
    let fmax = sample_rate as f32 / 2.0;
    let mel_max = hz_to_mel(fmax);
    let n_bins = n_fft / 2 + 1;

    // n_mels + 2 edge frequencies, evenly spaced on the mel scale
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_hz = sample_rate as f32 / n_fft as f32;

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            let mut row = Vec::new();
            for bin in 0..n_bins {
                let f = bin as f32 * bin_hz;
                let weight = if f > lo && f < center {
                    (f - lo) / (center - lo)
                } else if f >= center && f < hi {
                    (hi - f) / (hi - center)
                } else {
                    0.0
                };
                if weight > 0.0 {
                    row.push((bin, weight));
                }
            }
            row
        })
        .collect()
}

/// Discrete Cosine Transform Type-II with orthonormal scaling.
pub fn dct_type_ii(x: &[f32], n_out: usize) -> Vec<f32> {
    let n = x.len() as f32;
    if n == 0.0 || n_out == 0 {
        return Vec::new();
    }
    let mut out = vec![0.0f32; n_out];
    for (k, out_val) in out.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for (i, v) in x.iter().enumerate() {
            let angle = std::f32::consts::PI / n * (i as f32 + 0.5) * k as f32;
            sum += v * angle.cos();
        }
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        *out_val = sum * scale;
    }
    out
}
