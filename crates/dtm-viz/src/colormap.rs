/// The number of entries of a colormap lookup table.
pub const LUT_SIZE: usize = 256;

// (x, value) control points of each channel, linearly interpolated
const JET_RED: [(f32, f32); 5] = [(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: [(f32, f32); 6] = [
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const JET_BLUE: [(f32, f32); 5] = [(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

fn interpolate_segments(segments: &[(f32, f32)], x: f32) -> f32 {
    for pair in segments.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            let lambda = if x1 > x0 { (x - x0) / (x1 - x0) } else { 0.0 };
            return y0 + lambda.clamp(0.0, 1.0) * (y1 - y0);
        }
    }
    segments.last().map_or(0.0, |(_, y)| *y)
}

/// A colormap sampled into a lookup table of [`LUT_SIZE`] RGB entries.
#[derive(Clone, Debug, PartialEq)]
pub struct Colormap {
    lut: Vec<[u8; 3]>,
}

impl Colormap {
    /// The `jet` colormap: dark blue, blue, cyan, yellow, red, dark red.
    pub fn jet() -> Self {
        let lut = (0..LUT_SIZE)
            .map(|i| {
                let x = i as f32 / (LUT_SIZE - 1) as f32;
                [
                    to_u8(interpolate_segments(&JET_RED, x)),
                    to_u8(interpolate_segments(&JET_GREEN, x)),
                    to_u8(interpolate_segments(&JET_BLUE, x)),
                ]
            })
            .collect();
        Self { lut }
    }

    /// Map a normalized value to a colour.
    ///
    /// Values are clamped to `[0, 1]`, non finite values map to the lowest colour.
    pub fn map(&self, t: f32) -> [u8; 3] {
        let index = if t.is_finite() {
            ((t.clamp(0.0, 1.0) * LUT_SIZE as f32) as usize).min(LUT_SIZE - 1)
        } else {
            0
        };
        self.lut[index]
    }
}

impl Default for Colormap {
    fn default() -> Self {
        Self::jet()
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Linear mapping of `[vmin, vmax]` onto `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalize {
    /// The value mapped to 0.
    pub vmin: f32,
    /// The value mapped to 1.
    pub vmax: f32,
}

impl Normalize {
    /// Create a new normalization.
    pub fn new(vmin: f32, vmax: f32) -> Self {
        Self { vmin, vmax }
    }

    /// The width of the range, one when the range is empty.
    pub fn range(&self) -> f32 {
        let range = self.vmax - self.vmin;
        if range.is_finite() && range > 0.0 {
            range
        } else {
            1.0
        }
    }

    /// Map a value to `[0, 1]`, clamping values outside the range.
    pub fn apply(&self, v: f32) -> f32 {
        ((v - self.vmin) / self.range()).clamp(0.0, 1.0)
    }
}
