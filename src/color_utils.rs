//! Color helpers for category display.

/// Convert an HSV color to 8-bit RGB.
///
/// `h` is hue in degrees (0-360), `s` and `v` in 0.0-1.0. Used to derive
/// deterministic display colors for category indices beyond the fixed
/// palette, so the output goes straight to the byte channels a renderer
/// wants.
pub fn hsv_to_rgb8(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    [channel(r + m), channel(g + m), channel(b + m)]
}

fn channel(value: f32) -> u8 {
    (value * 255.0).round() as u8
}
