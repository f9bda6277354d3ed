//! Procedural height noise layered onto deformed vertices.
//!
//! Layers are plain data ([`NoiseLayer`]) so they can be stored on a spline,
//! compared by monitors and serialized by the host. Sampling goes through a
//! [`NoiseStack`], which owns the seeded generators built from those layers.
//! A stack is cheap enough to build once per worker thread.

use noise::{NoiseFn, Perlin, Worley};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoiseKind {
    Perlin,
    Billow,
    Ridged,
    Fbm,
    HybridMulti,
    Voronoi,
    Terrace,
    DomainWarp,
}

/// One noise function plus its sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseLayer {
    pub kind: NoiseKind,
    /// World-space size of one noise feature; larger is smoother.
    pub scale: f64,
    pub octaves: u32,
    pub frequency: f64,
    pub amplitude: f64,
    pub seed: u32,
    pub lacunarity: f64,
    pub persistence: f64,
    pub enabled: bool,
}

impl Default for NoiseLayer {
    fn default() -> Self {
        Self {
            kind: NoiseKind::Perlin,
            scale: 10.0,
            octaves: 4,
            frequency: 1.0,
            amplitude: 1.0,
            seed: 0,
            lacunarity: 2.0,
            persistence: 0.5,
            enabled: true,
        }
    }
}

impl NoiseLayer {
    #[must_use]
    pub fn new(kind: NoiseKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    #[must_use]
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    #[must_use]
    pub fn with_octaves(mut self, octaves: u32) -> Self {
        self.octaves = octaves;
        self
    }

    #[must_use]
    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Aggregate of every parameter, used for change detection.
    #[must_use]
    pub fn fingerprint(&self) -> f64 {
        self.kind as u8 as f64
            + self.scale
            + f64::from(self.octaves)
            + self.frequency
            + self.amplitude
            + f64::from(self.seed)
            + self.lacunarity
            + self.persistence
            + if self.enabled { 1.0 } else { 0.0 }
    }
}

struct LayerSampler {
    layer: NoiseLayer,
    perlin: Perlin,
    worley: Option<Worley>,
}

impl LayerSampler {
    fn new(layer: &NoiseLayer) -> Self {
        Self {
            perlin: Perlin::new(layer.seed),
            worley: (layer.kind == NoiseKind::Voronoi).then(|| Worley::new(layer.seed)),
            layer: layer.clone(),
        }
    }

    fn sample(&self, x: f64, z: f64) -> f64 {
        let layer = &self.layer;
        let scale = if layer.scale.abs() > f64::EPSILON {
            layer.scale
        } else {
            1.0
        };
        let (px, pz) = (x / scale * layer.frequency, z / scale * layer.frequency);

        let value = match layer.kind {
            NoiseKind::Perlin => self.perlin.get([px, pz]),
            NoiseKind::Fbm => self.octaves(px, pz, |n| n),
            NoiseKind::Billow => self.octaves(px, pz, |n| 2.0 * n.abs() - 1.0),
            NoiseKind::Ridged => self.ridged(px, pz),
            NoiseKind::HybridMulti => self.hybrid_multi(px, pz),
            NoiseKind::Voronoi => self
                .worley
                .as_ref()
                .map_or(0.0, |worley| worley.get([px, pz])),
            NoiseKind::Terrace => {
                let steps = f64::from(layer.octaves.max(2));
                let v = (self.octaves(px, pz, |n| n) + 1.0) * 0.5;
                let lower = (v * steps).floor();
                let t = v * steps - lower;
                // Smoothstep inside each step keeps the terraces continuous.
                let eased = t * t * (3.0 - 2.0 * t);
                ((lower + eased * eased) / steps) * 2.0 - 1.0
            }
            NoiseKind::DomainWarp => {
                let wx = self.perlin.get([px + 5.2, pz + 1.3]);
                let wz = self.perlin.get([px + 1.7, pz + 9.2]);
                self.octaves(px + 4.0 * wx, pz + 4.0 * wz, |n| n)
            }
        };

        value * layer.amplitude
    }

    /// Normalized fractal sum with a per-octave shaping function.
    fn octaves(&self, x: f64, z: f64, shape: impl Fn(f64) -> f64) -> f64 {
        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut max_value = 0.0;

        for _ in 0..self.layer.octaves.max(1) {
            total += shape(self.perlin.get([x * frequency, z * frequency])) * amplitude;
            max_value += amplitude;
            amplitude *= self.layer.persistence;
            frequency *= self.layer.lacunarity;
        }

        total / max_value
    }

    fn ridged(&self, x: f64, z: f64) -> f64 {
        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut weight = 1.0;
        let mut max_value = 0.0;

        for _ in 0..self.layer.octaves.max(1) {
            let signal = 1.0 - self.perlin.get([x * frequency, z * frequency]).abs();
            let signal = signal * signal * weight;
            weight = (signal * 2.0).clamp(0.0, 1.0);
            total += signal * amplitude;
            max_value += amplitude;
            amplitude *= self.layer.persistence;
            frequency *= self.layer.lacunarity;
        }

        (total / max_value) * 2.0 - 1.0
    }

    fn hybrid_multi(&self, x: f64, z: f64) -> f64 {
        let mut amplitude = self.layer.persistence;
        let mut frequency = self.layer.lacunarity;
        let mut total = self.perlin.get([x, z]);
        let mut weight = total;
        let mut max_value = 1.0;

        for _ in 1..self.layer.octaves.max(1) {
            weight = weight.clamp(0.0, 1.0);
            let signal = self.perlin.get([x * frequency, z * frequency]) * amplitude;
            total += weight * signal;
            weight *= signal;
            max_value += amplitude;
            amplitude *= self.layer.persistence;
            frequency *= self.layer.lacunarity;
        }

        total / max_value
    }
}

/// Seeded generators for a set of layers. Disabled layers are dropped at build time.
pub struct NoiseStack {
    samplers: Vec<LayerSampler>,
}

impl NoiseStack {
    #[must_use]
    pub fn build(layers: &[NoiseLayer]) -> Self {
        Self {
            samplers: layers
                .iter()
                .filter(|layer| layer.enabled)
                .map(LayerSampler::new)
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }

    /// Sum of all enabled layers at world `(x, z)`.
    #[must_use]
    pub fn sample(&self, x: f64, z: f64) -> f64 {
        self.samplers.iter().map(|s| s.sample(x, z)).sum()
    }
}

impl std::fmt::Debug for NoiseStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseStack")
            .field("layers", &self.samplers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [NoiseKind; 8] = [
        NoiseKind::Perlin,
        NoiseKind::Billow,
        NoiseKind::Ridged,
        NoiseKind::Fbm,
        NoiseKind::HybridMulti,
        NoiseKind::Voronoi,
        NoiseKind::Terrace,
        NoiseKind::DomainWarp,
    ];

    #[test]
    fn every_kind_is_deterministic_and_finite() {
        for kind in ALL_KINDS {
            let stack = NoiseStack::build(&[NoiseLayer::new(kind).with_seed(7)]);
            let a = stack.sample(3.3, -12.7);
            let b = stack.sample(3.3, -12.7);
            assert!(a.is_finite(), "{kind:?} produced {a}");
            assert_eq!(a, b, "{kind:?} not deterministic");
        }
    }

    #[test]
    fn disabled_layers_contribute_nothing() {
        let stack = NoiseStack::build(&[NoiseLayer::new(NoiseKind::Fbm).enabled(false)]);
        assert!(stack.is_empty());
        assert_eq!(stack.sample(1.5, 2.5), 0.0);
    }

    #[test]
    fn amplitude_scales_output() {
        let base = NoiseLayer::new(NoiseKind::Perlin).with_seed(3);
        let one = NoiseStack::build(&[base.clone()]).sample(4.1, 7.9);
        let three = NoiseStack::build(&[base.with_amplitude(3.0)]).sample(4.1, 7.9);
        assert!((three - one * 3.0).abs() < 1e-12);
    }

    #[test]
    fn fingerprint_tracks_parameter_edits() {
        let layer = NoiseLayer::new(NoiseKind::Ridged);
        let edited = layer.clone().with_octaves(6);
        assert_ne!(layer.fingerprint(), edited.fingerprint());
    }
}
