use colorous::{Color, Gradient};
use palette::{IntoColor, Srgb};
use serde::Serialize;

pub fn pack_rgba8(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | ((a as u32) << 24)
}

pub fn gradient_map(values: &[f32], vmin: f32, vmax: f32, grad: &Gradient) -> Vec<u32> {
    let den = (vmax - vmin).max(1e-12);
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return pack_rgba8(128, 128, 128, 0);
            }
            let t = ((v - vmin) / den).clamp(0.0, 1.0);
            let c: Color = grad.eval_continuous(t as f64);
            pack_rgba8(c.r, c.g, c.b, 255)
        })
        .collect()
}

/// Colour as the chart layer expects it: hue in degrees, saturation and
/// lightness in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Hsl {
    pub hue: f32,
    pub saturation: f32,
    pub lightness: f32,
}

impl Hsl {
    pub fn to_css(&self) -> String {
        format!("hsl({}, {}%, {}%)", self.hue, self.saturation, self.lightness)
    }

    pub fn to_rgba8(&self) -> u32 {
        let hsl: palette::Hsl = palette::Hsl::new(
            self.hue,
            (self.saturation / 100.0).clamp(0.0, 1.0),
            (self.lightness / 100.0).clamp(0.0, 1.0),
        );
        let rgb: Srgb = hsl.into_color();
        let rgb: Srgb<u8> = rgb.into_format();
        pack_rgba8(rgb.red, rgb.green, rgb.blue, 255)
    }
}

/// Evenly spaced hues, `i * 360 / n`, one per cluster in sorted order.
pub fn cluster_hues(n: usize, saturation: f32, lightness: f32) -> Vec<Hsl> {
    let step = if n == 0 { 0.0 } else { 360.0 / n as f32 };
    (0..n)
        .map(|i| Hsl {
            hue: i as f32 * step,
            saturation,
            lightness,
        })
        .collect()
}

/// Expression colours on Viridis from 0 to the largest value.
pub fn expression_colors(values: &[f32]) -> (Vec<u32>, f32) {
    let vmax = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max)
        .max(1e-6);
    (gradient_map(values, 0.0, vmax, &colorous::VIRIDIS), vmax)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_hues_spacing() {
        let hues = cluster_hues(4, 70.0, 50.0);
        let h: Vec<f32> = hues.iter().map(|c| c.hue).collect();
        assert_eq!(h, vec![0.0, 90.0, 180.0, 270.0]);
        assert_eq!(hues[1].to_css(), "hsl(90, 70%, 50%)");
        assert!(cluster_hues(0, 70.0, 50.0).is_empty());
    }

    #[test]
    fn test_hsl_primaries() {
        let red = Hsl {
            hue: 0.0,
            saturation: 100.0,
            lightness: 50.0,
        };
        assert_eq!(red.to_rgba8(), pack_rgba8(255, 0, 0, 255));
        let blue = Hsl {
            hue: 240.0,
            ..red
        };
        assert_eq!(blue.to_rgba8(), pack_rgba8(0, 0, 255, 255));
        let grey = Hsl {
            hue: 120.0,
            saturation: 0.0,
            lightness: 50.0,
        };
        assert_eq!(grey.to_rgba8(), pack_rgba8(128, 128, 128, 255));
        let green = Hsl {
            hue: 120.0,
            ..red
        };
        assert_eq!(green.to_rgba8(), pack_rgba8(0, 255, 0, 255));
    }

    #[test]
    fn test_expression_colors_span_gradient() {
        let (colors, vmax) = expression_colors(&[0.0, 2.0, f32::NAN]);
        assert_eq!(vmax, 2.0);
        let lo = colorous::VIRIDIS.eval_continuous(0.0);
        let hi = colorous::VIRIDIS.eval_continuous(1.0);
        assert_eq!(colors[0], pack_rgba8(lo.r, lo.g, lo.b, 255));
        assert_eq!(colors[1], pack_rgba8(hi.r, hi.g, hi.b, 255));
        assert_eq!(colors[2] >> 24, 0);
    }
}
