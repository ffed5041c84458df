//! FFT cross-correlation of a long window against a fixed template.
//!
//! `valid` mode: for every alignment `k in 0..=L−M`, the inner product of
//! `signal[k..k+M]` with `template`. Computed as
//! `IFFT(FFT(signal) · conj(FFT(template)))` at a transform length
//! `n ≥ L`; since the template occupies only the first `M` bins, the first
//! `L − M + 1` outputs never wrap.
//!
//! Transforms run in f64; the residue over digital silence stays many orders
//! of magnitude below the silence floor applied by the normalizer.
//!
//! A `TemplateCorrelator` is built once per sample and shared by reference
//! across worker threads. The conjugated template spectrum is cached per
//! transform length, so equal-length chunks pay for it once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex64, Fft, FftPlanner};

/// Smallest `2^a·3^b·5^c` that is `>= n`; rustfft is fastest on these.
pub fn fast_len(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    let mut candidate = n;
    loop {
        let mut m = candidate;
        for p in [2, 3, 5] {
            while m % p == 0 {
                m /= p;
            }
        }
        if m == 1 {
            return candidate;
        }
        candidate += 1;
    }
}

pub struct TemplateCorrelator {
    template: Vec<f64>,
    planner: Mutex<FftPlanner<f64>>,
    /// transform length → conj(FFT(template zero-padded to that length))
    spectra: Mutex<HashMap<usize, Arc<[Complex64]>>>,
}

impl TemplateCorrelator {
    pub fn new(template: &[f32]) -> Self {
        Self {
            template: template.iter().map(|&s| f64::from(s)).collect(),
            planner: Mutex::new(FftPlanner::new()),
            spectra: Mutex::new(HashMap::new()),
        }
    }

    pub fn template_len(&self) -> usize {
        self.template.len()
    }

    fn plans(&self, n: usize) -> (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>) {
        let mut planner = self.planner.lock();
        (planner.plan_fft_forward(n), planner.plan_fft_inverse(n))
    }

    fn spectrum(&self, n: usize, forward: &Arc<dyn Fft<f64>>) -> Arc<[Complex64]> {
        let mut spectra = self.spectra.lock();
        if let Some(s) = spectra.get(&n) {
            return Arc::clone(s);
        }
        let mut buf = vec![Complex64::new(0.0, 0.0); n];
        for (dst, &src) in buf.iter_mut().zip(&self.template) {
            dst.re = src;
        }
        forward.process(&mut buf);
        let conj: Arc<[Complex64]> = buf.iter().map(|c| c.conj()).collect();
        spectra.insert(n, Arc::clone(&conj));
        conj
    }

    /// Valid-mode correlation of `signal` against the template.
    ///
    /// Empty when the template is empty or longer than `signal`.
    pub fn correlate_valid(&self, signal: &[f32]) -> Vec<f64> {
        let l = signal.len();
        let m = self.template.len();
        if m == 0 || m > l {
            return Vec::new();
        }

        let n = fast_len(l);
        let (forward, inverse) = self.plans(n);
        let template_spectrum = self.spectrum(n, &forward);

        let mut buf = vec![Complex64::new(0.0, 0.0); n];
        for (dst, &src) in buf.iter_mut().zip(signal) {
            dst.re = f64::from(src);
        }
        forward.process(&mut buf);
        for (x, t) in buf.iter_mut().zip(template_spectrum.iter()) {
            *x *= *t;
        }
        inverse.process(&mut buf);

        let scale = 1.0 / n as f64;
        buf[..l - m + 1].iter().map(|c| c.re * scale).collect()
    }
}

impl std::fmt::Debug for TemplateCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCorrelator")
            .field("template_len", &self.template.len())
            .finish_non_exhaustive()
    }
}
