//! Palette selection.
//!
//! Frames that already fit in 256 colors get an exact palette. Everything else
//! goes through NeuQuant, a Kohonen self-organizing map over RGB space run in
//! fixed-point arithmetic, so the result depends only on the pixels and the
//! sample interval.

use std::collections::BTreeSet;

use rgb::RGB8;

use super::palette::{Palette, MAX_COLORS};

pub const MIN_SAMPLE_INTERVAL: u8 = 1;
pub const MAX_SAMPLE_INTERVAL: u8 = 100;

const NETSIZE: usize = 256;
const MAX_NETPOS: usize = NETSIZE - 1;

// Strides for walking the image, picked so that a stride is not a divisor of
// the image length.
const PRIME1: usize = 499;
const PRIME2: usize = 491;
const PRIME3: usize = 487;
const PRIME4: usize = 503;
const MIN_PICTURE_BYTES: usize = 3 * PRIME4;

const LEARNING_CYCLES: usize = 100;

const NET_BIAS_SHIFT: i32 = 4;
const INT_BIAS_SHIFT: i32 = 16;
const INT_BIAS: i32 = 1 << INT_BIAS_SHIFT;
const GAMMA_SHIFT: i32 = 10;
const BETA_SHIFT: i32 = 10;
const BETA: i32 = INT_BIAS >> BETA_SHIFT;
const BETA_GAMMA: i32 = INT_BIAS << (GAMMA_SHIFT - BETA_SHIFT);

const INIT_RAD: usize = NETSIZE >> 3;
const RADIUS_BIAS_SHIFT: i32 = 6;
const RADIUS_BIAS: i32 = 1 << RADIUS_BIAS_SHIFT;
const INIT_RADIUS: i32 = INIT_RAD as i32 * RADIUS_BIAS;
const RADIUS_DEC: i32 = 30;

const ALPHA_BIAS_SHIFT: i32 = 10;
const INIT_ALPHA: i32 = 1 << ALPHA_BIAS_SHIFT;
const RAD_BIAS_SHIFT: i32 = 8;
const RAD_BIAS: i32 = 1 << RAD_BIAS_SHIFT;
const ALPHA_RAD_BIAS: i32 = 1 << (ALPHA_BIAS_SHIFT + RAD_BIAS_SHIFT);

/// Reduces `pixels` (packed RGB24) to at most 256 colors.
///
/// Returns the palette and one index per pixel. `sample_interval` is clamped to
/// `1..=100`; 1 presents every pixel to the network, larger values sample
/// more sparsely.
pub fn quantize(pixels: &[u8], sample_interval: u8) -> (Palette, Vec<u8>) {
    if let Some(colors) = distinct_colors(pixels) {
        return exact_palette(pixels, colors);
    }

    let nq = NeuQuant::new(sample_interval, pixels);
    let mut palette = Palette::new(nq.color_map());
    let indices = pixels
        .chunks_exact(3)
        .map(|px| {
            let index = nq.index_of(px[0], px[1], px[2]);
            palette.mark_used(index);
            index
        })
        .collect();
    (palette, indices)
}

fn distinct_colors(pixels: &[u8]) -> Option<Vec<[u8; 3]>> {
    let mut seen = BTreeSet::new();
    let mut last = None;
    for px in pixels.chunks_exact(3) {
        let color = [px[0], px[1], px[2]];
        if last == Some(color) {
            continue;
        }
        last = Some(color);
        seen.insert(color);
        if seen.len() > MAX_COLORS {
            return None;
        }
    }
    Some(seen.into_iter().collect())
}

fn exact_palette(pixels: &[u8], colors: Vec<[u8; 3]>) -> (Palette, Vec<u8>) {
    let mut palette = Palette::new(colors.iter().map(|c| RGB8::new(c[0], c[1], c[2])).collect());
    let indices = pixels
        .chunks_exact(3)
        .map(|px| {
            let color = [px[0], px[1], px[2]];
            let index = colors.binary_search(&color).unwrap_or_else(|i| i) as u8;
            palette.mark_used(index);
            index
        })
        .collect();
    (palette, indices)
}

/// Neural-net color quantizer.
pub struct NeuQuant {
    /// Per neuron: r, g, b and, after learning, the neuron's palette slot.
    network: [[i32; 4]; NETSIZE],
    /// First neuron (sorted by green) to look at for each green value.
    netindex: [usize; 256],
    bias: [i32; NETSIZE],
    freq: [i32; NETSIZE],
    radpower: [i32; INIT_RAD],
    sample_interval: usize,
}

impl NeuQuant {
    pub fn new(sample_interval: u8, pixels: &[u8]) -> Self {
        let sample_interval =
            sample_interval.clamp(MIN_SAMPLE_INTERVAL, MAX_SAMPLE_INTERVAL) as usize;
        let mut nq = Self {
            network: [[0; 4]; NETSIZE],
            netindex: [0; 256],
            bias: [0; NETSIZE],
            freq: [0; NETSIZE],
            radpower: [0; INIT_RAD],
            sample_interval,
        };
        nq.init();
        nq.learn(pixels);
        nq.unbias();
        nq.build_index();
        nq
    }

    fn init(&mut self) {
        for (i, neuron) in self.network.iter_mut().enumerate() {
            let v = ((i as i32) << (NET_BIAS_SHIFT + 8)) / NETSIZE as i32;
            *neuron = [v, v, v, 0];
        }
        self.freq = [INT_BIAS / NETSIZE as i32; NETSIZE];
        self.bias = [0; NETSIZE];
    }

    fn learn(&mut self, pixels: &[u8]) {
        let length = pixels.len() - pixels.len() % 3;
        if length == 0 {
            return;
        }

        let sample_interval = if length < MIN_PICTURE_BYTES {
            1
        } else {
            self.sample_interval
        };
        let alphadec = 30 + ((sample_interval as i32 - 1) / 3);
        let sample_pixels = length / (3 * sample_interval);
        let delta = (sample_pixels / LEARNING_CYCLES).max(1);

        let mut alpha = INIT_ALPHA;
        let mut radius = INIT_RADIUS;
        let mut rad = radius >> RADIUS_BIAS_SHIFT;
        if rad <= 1 {
            rad = 0;
        }
        self.update_radpower(rad, alpha);

        let step = if length < MIN_PICTURE_BYTES {
            3
        } else if length % PRIME1 != 0 {
            3 * PRIME1
        } else if length % PRIME2 != 0 {
            3 * PRIME2
        } else if length % PRIME3 != 0 {
            3 * PRIME3
        } else {
            3 * PRIME4
        };

        let mut pix = 0;
        for i in 1..=sample_pixels {
            let r = (pixels[pix] as i32) << NET_BIAS_SHIFT;
            let g = (pixels[pix + 1] as i32) << NET_BIAS_SHIFT;
            let b = (pixels[pix + 2] as i32) << NET_BIAS_SHIFT;

            let j = self.contest(r, g, b);
            self.alter_single(alpha, j, r, g, b);
            if rad != 0 {
                self.alter_neighbours(rad, j, r, g, b);
            }

            pix += step;
            if pix >= length {
                pix -= length;
            }

            if i % delta == 0 {
                alpha -= alpha / alphadec;
                radius -= radius / RADIUS_DEC;
                rad = radius >> RADIUS_BIAS_SHIFT;
                if rad <= 1 {
                    rad = 0;
                }
                self.update_radpower(rad, alpha);
            }
        }
    }

    fn update_radpower(&mut self, rad: i32, alpha: i32) {
        let rad2 = rad * rad;
        for i in 0..rad {
            self.radpower[i as usize] = alpha * (((rad2 - i * i) * RAD_BIAS) / rad2);
        }
    }

    /// Finds the closest neuron, updating frequency and bias so that rarely
    /// chosen neurons get pulled in. Returns the best neuron after bias.
    fn contest(&mut self, r: i32, g: i32, b: i32) -> usize {
        let mut best_dist = i32::MAX;
        let mut best_bias_dist = i32::MAX;
        let mut best_pos = 0;
        let mut best_bias_pos = 0;

        for i in 0..NETSIZE {
            let n = &self.network[i];
            let dist = (n[0] - r).abs() + (n[1] - g).abs() + (n[2] - b).abs();
            if dist < best_dist {
                best_dist = dist;
                best_pos = i;
            }
            let bias_dist = dist - (self.bias[i] >> (INT_BIAS_SHIFT - NET_BIAS_SHIFT));
            if bias_dist < best_bias_dist {
                best_bias_dist = bias_dist;
                best_bias_pos = i;
            }
            let beta_freq = self.freq[i] >> BETA_SHIFT;
            self.freq[i] -= beta_freq;
            self.bias[i] += beta_freq << GAMMA_SHIFT;
        }
        self.freq[best_pos] += BETA;
        self.bias[best_pos] -= BETA_GAMMA;
        best_bias_pos
    }

    fn alter_single(&mut self, alpha: i32, i: usize, r: i32, g: i32, b: i32) {
        let n = &mut self.network[i];
        n[0] -= (alpha * (n[0] - r)) / INIT_ALPHA;
        n[1] -= (alpha * (n[1] - g)) / INIT_ALPHA;
        n[2] -= (alpha * (n[2] - b)) / INIT_ALPHA;
    }

    fn alter_neighbours(&mut self, rad: i32, i: usize, r: i32, g: i32, b: i32) {
        let i = i as i32;
        let lo = (i - rad).max(-1);
        let hi = (i + rad).min(NETSIZE as i32);

        let mut j = i + 1;
        let mut k = i - 1;
        let mut m = 1;
        while j < hi || k > lo {
            let a = self.radpower[m];
            m += 1;
            if j < hi {
                let n = &mut self.network[j as usize];
                n[0] -= (a * (n[0] - r)) / ALPHA_RAD_BIAS;
                n[1] -= (a * (n[1] - g)) / ALPHA_RAD_BIAS;
                n[2] -= (a * (n[2] - b)) / ALPHA_RAD_BIAS;
                j += 1;
            }
            if k > lo {
                let n = &mut self.network[k as usize];
                n[0] -= (a * (n[0] - r)) / ALPHA_RAD_BIAS;
                n[1] -= (a * (n[1] - g)) / ALPHA_RAD_BIAS;
                n[2] -= (a * (n[2] - b)) / ALPHA_RAD_BIAS;
                k -= 1;
            }
        }
    }

    fn unbias(&mut self) {
        for (i, n) in self.network.iter_mut().enumerate() {
            for c in n.iter_mut().take(3) {
                *c = (*c >> NET_BIAS_SHIFT).clamp(0, 255);
            }
            n[3] = i as i32;
        }
    }

    /// Sorts the network by green and fills `netindex`.
    fn build_index(&mut self) {
        let mut previous = 0usize;
        let mut start = 0usize;

        for i in 0..NETSIZE {
            let mut smallest_pos = i;
            let mut smallest_val = self.network[i][1];
            for j in (i + 1)..NETSIZE {
                if self.network[j][1] < smallest_val {
                    smallest_pos = j;
                    smallest_val = self.network[j][1];
                }
            }
            if smallest_pos != i {
                self.network.swap(i, smallest_pos);
            }

            let smallest_val = smallest_val as usize;
            if smallest_val != previous {
                self.netindex[previous] = (start + i) >> 1;
                for slot in &mut self.netindex[(previous + 1)..smallest_val] {
                    *slot = i;
                }
                previous = smallest_val;
                start = i;
            }
        }

        self.netindex[previous] = (start + MAX_NETPOS) >> 1;
        for slot in &mut self.netindex[(previous + 1)..] {
            *slot = MAX_NETPOS;
        }
    }

    /// Palette in slot order.
    pub fn color_map(&self) -> Vec<RGB8> {
        let mut map = vec![RGB8::default(); NETSIZE];
        for n in &self.network {
            map[n[3] as usize] = RGB8::new(n[0] as u8, n[1] as u8, n[2] as u8);
        }
        map
    }

    /// Palette slot of the color nearest to `(r, g, b)`.
    pub fn index_of(&self, r: u8, g: u8, b: u8) -> u8 {
        let (r, g, b) = (r as i32, g as i32, b as i32);
        // Larger than any L1 distance in RGB space.
        let mut best_dist = 1000;
        let mut best = 0;

        let mut i = self.netindex[g as usize] as i32;
        let mut j = i - 1;

        while i < NETSIZE as i32 || j >= 0 {
            if i < NETSIZE as i32 {
                let n = &self.network[i as usize];
                let mut dist = n[1] - g;
                if dist >= best_dist {
                    i = NETSIZE as i32;
                } else {
                    i += 1;
                    dist = dist.abs() + (n[0] - r).abs();
                    if dist < best_dist {
                        dist += (n[2] - b).abs();
                        if dist < best_dist {
                            best_dist = dist;
                            best = n[3];
                        }
                    }
                }
            }
            if j >= 0 {
                let n = &self.network[j as usize];
                let mut dist = g - n[1];
                if dist >= best_dist {
                    j = -1;
                } else {
                    j -= 1;
                    dist = dist.abs() + (n[0] - r).abs();
                    if dist < best_dist {
                        dist += (n[2] - b).abs();
                        if dist < best_dist {
                            best_dist = dist;
                            best = n[3];
                        }
                    }
                }
            }
        }
        best as u8
    }
}
