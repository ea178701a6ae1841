//! Region data model: one bounding-box annotation with normalized geometry.
//!
//! Regions are persisted one per line as five whitespace-separated fields:
//! `<category> <center_x> <center_y> <width> <height>`, with all geometry
//! normalized to the image dimensions.

use std::fmt;

use thiserror::Error;

use crate::color_utils::hsv_to_rgb8;
use crate::constants::{GEOMETRY_EPSILON, MIN_REGION_EXTENT};

/// Fixed display palette for category indices 0-6.
const PALETTE: [[u8; 3]; 7] = [
    [255, 128, 64], // orange
    [255, 0, 0],    // red
    [0, 255, 0],    // green
    [0, 0, 255],    // blue
    [255, 255, 0],  // yellow
    [255, 0, 255],  // magenta
    [0, 255, 255],  // cyan
];

/// Hue step between consecutive procedural colors (golden angle, degrees).
const PROCEDURAL_HUE_STEP: f32 = 137.508;

/// Errors produced when parsing a single label-file line.
///
/// These never abort a surrounding parse; the list loader logs the offending
/// line and moves on.
#[derive(Error, Debug, PartialEq)]
pub enum RegionParseError {
    /// Wrong number of whitespace-separated fields
    #[error("expected 5 fields, found {found}")]
    FieldCount {
        /// Number of fields actually present
        found: usize,
    },

    /// A field failed numeric conversion
    #[error("invalid {field}: '{value}'")]
    InvalidField {
        /// Which field failed
        field: &'static str,
        /// The offending text
        value: String,
    },

    /// Fields parsed but the geometry fails validation
    #[error("region geometry outside the unit square or degenerate")]
    InvalidGeometry,
}

/// One bounding-box annotation.
///
/// `category` indexes an externally supplied ordered label-name list; unknown
/// indices are tolerated and rendered with a deterministic fallback color and
/// the name `"unknown"`. Geometry is normalized to `[0, 1]` relative to the
/// image dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Category index into the label-name list
    pub category: u32,
    /// Box center, fraction of image width
    pub center_x: f64,
    /// Box center, fraction of image height
    pub center_y: f64,
    /// Box width, fraction of image width
    pub width: f64,
    /// Box height, fraction of image height
    pub height: f64,
}

impl Region {
    /// Create a region from a pixel rectangle normalized against the image
    /// dimensions. The caller still has to check `is_valid` before storing it.
    pub fn from_pixel_rect(
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        image_width: f64,
        image_height: f64,
        category: u32,
    ) -> Self {
        Self {
            category,
            center_x: (x + w / 2.0) / image_width,
            center_y: (y + h / 2.0) / image_height,
            width: w / image_width,
            height: h / image_height,
        }
    }

    /// Parse one label-file line.
    ///
    /// Requires exactly five whitespace-separated fields and a valid geometry;
    /// the distinct error variants let callers log what was wrong.
    pub fn parse_line(line: &str) -> Result<Self, RegionParseError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(RegionParseError::FieldCount {
                found: fields.len(),
            });
        }

        let field = |name: &'static str, value: &str| RegionParseError::InvalidField {
            field: name,
            value: value.to_string(),
        };

        let region = Region {
            category: fields[0]
                .parse()
                .map_err(|_| field("category", fields[0]))?,
            center_x: fields[1]
                .parse()
                .map_err(|_| field("center_x", fields[1]))?,
            center_y: fields[2]
                .parse()
                .map_err(|_| field("center_y", fields[2]))?,
            width: fields[3].parse().map_err(|_| field("width", fields[3]))?,
            height: fields[4].parse().map_err(|_| field("height", fields[4]))?,
        };

        if !region.is_valid() {
            return Err(RegionParseError::InvalidGeometry);
        }
        Ok(region)
    }

    /// Check the geometry invariant.
    ///
    /// Sizes must lie in `(0, 1]` and exceed [`MIN_REGION_EXTENT`], centers
    /// must lie in `[0, 1]`, and the box must stay inside the unit square
    /// within [`GEOMETRY_EPSILON`] on each edge.
    pub fn is_valid(&self) -> bool {
        if self.width <= 0.0 || self.height <= 0.0 || self.width > 1.0 || self.height > 1.0 {
            return false;
        }
        if self.center_x < 0.0 || self.center_x > 1.0 || self.center_y < 0.0 || self.center_y > 1.0
        {
            return false;
        }
        if self.center_x - self.width / 2.0 < -GEOMETRY_EPSILON
            || self.center_x + self.width / 2.0 > 1.0 + GEOMETRY_EPSILON
            || self.center_y - self.height / 2.0 < -GEOMETRY_EPSILON
            || self.center_y + self.height / 2.0 > 1.0 + GEOMETRY_EPSILON
        {
            return false;
        }
        // Too small to be a deliberate annotation
        if self.width < MIN_REGION_EXTENT || self.height < MIN_REGION_EXTENT {
            return false;
        }
        true
    }

    /// Display color for a category index.
    ///
    /// Indices 0-6 use a fixed palette; higher indices get a deterministic
    /// golden-angle hue at reduced saturation so arbitrarily many categories
    /// stay distinguishable without colliding with the palette.
    pub fn color_for(category: u32) -> [u8; 3] {
        match PALETTE.get(category as usize) {
            Some(&rgb) => rgb,
            None => {
                let hue = (category as f32 * PROCEDURAL_HUE_STEP) % 360.0;
                hsv_to_rgb8(hue, 0.6, 0.9)
            }
        }
    }

    /// Display color for this region's category.
    pub fn color(&self) -> [u8; 3] {
        Self::color_for(self.category)
    }
}

impl fmt::Display for Region {
    /// Format as one label-file line (no trailing newline). Floats use the
    /// default shortest-round-trip precision, so a saved region parses back
    /// to exactly the same values.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.category, self.center_x, self.center_y, self.width, self.height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(cx: f64, cy: f64, w: f64, h: f64) -> Region {
        Region {
            category: 0,
            center_x: cx,
            center_y: cy,
            width: w,
            height: h,
        }
    }

    #[test]
    fn test_parse_valid_line() {
        let r = Region::parse_line("1 0.5 0.5 0.2 0.3").unwrap();
        assert_eq!(r.category, 1);
        assert!((r.center_x - 0.5).abs() < 1e-9);
        assert!((r.height - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_parse_field_count() {
        assert_eq!(
            Region::parse_line("1 0.5 0.5 0.2"),
            Err(RegionParseError::FieldCount { found: 4 })
        );
        assert_eq!(
            Region::parse_line(""),
            Err(RegionParseError::FieldCount { found: 0 })
        );
        assert_eq!(
            Region::parse_line("bad line"),
            Err(RegionParseError::FieldCount { found: 2 })
        );
    }

    #[test]
    fn test_parse_non_numeric_field() {
        let err = Region::parse_line("x 0.5 0.5 0.2 0.3").unwrap_err();
        assert_eq!(
            err,
            RegionParseError::InvalidField {
                field: "category",
                value: "x".to_string()
            }
        );
        // Negative categories are not representable
        assert!(matches!(
            Region::parse_line("-1 0.5 0.5 0.2 0.3"),
            Err(RegionParseError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_parse_out_of_range_center() {
        assert_eq!(
            Region::parse_line("2 1.5 0.5 0.1 0.1"),
            Err(RegionParseError::InvalidGeometry)
        );
    }

    #[test]
    fn test_validity_size_bounds() {
        assert!(!region(0.5, 0.5, 0.0, 0.5).is_valid());
        assert!(!region(0.5, 0.5, -0.1, 0.5).is_valid());
        assert!(!region(0.5, 0.5, 1.1, 0.5).is_valid());
        assert!(!region(0.5, 0.5, 0.5, 1.1).is_valid());
        assert!(region(0.5, 0.5, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_validity_minimum_extent() {
        // Width below the noise threshold is rejected
        assert!(!region(0.5, 0.5, 0.0001, 0.5).is_valid());
        assert!(!region(0.5, 0.5, 0.5, 0.0001).is_valid());
        assert!(region(0.5, 0.5, 0.001, 0.001).is_valid());
    }

    #[test]
    fn test_validity_edge_tolerance() {
        // Exactly at the edge
        assert!(region(0.1, 0.1, 0.2, 0.2).is_valid());
        // Left edge a hair outside the unit square, inside the tolerance
        assert!(region(0.09996, 0.5, 0.2, 0.2).is_valid());
        // Bottom edge likewise
        assert!(region(0.5, 0.90004, 0.2, 0.2).is_valid());
        // Just past the tolerance
        assert!(!region(0.0998, 0.5, 0.2, 0.2).is_valid());
        // Well past the edge
        assert!(!region(0.05, 0.5, 0.2, 0.2).is_valid());
        assert!(!region(0.5, 0.95, 0.2, 0.2).is_valid());
    }

    #[test]
    fn test_display_parse_round_trip() {
        let r = Region {
            category: 3,
            center_x: 0.123456789,
            center_y: 0.5,
            width: 0.2,
            height: 1.0 / 3.0,
        };
        let parsed = Region::parse_line(&r.to_string()).unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn test_palette_colors() {
        assert_eq!(Region::color_for(0), [255, 128, 64]);
        assert_eq!(Region::color_for(1), [255, 0, 0]);
        assert_eq!(Region::color_for(6), [0, 255, 255]);
    }

    #[test]
    fn test_procedural_colors_deterministic() {
        let a = Region::color_for(17);
        let b = Region::color_for(17);
        assert_eq!(a, b);
        assert_ne!(Region::color_for(7), Region::color_for(8));
    }

    #[test]
    fn test_from_pixel_rect() {
        let r = Region::from_pixel_rect(100.0, 120.0, 80.0, 200.0, 640.0, 480.0, 2);
        assert_eq!(r.category, 2);
        assert!((r.center_x - 0.21875).abs() < 1e-9);
        assert!((r.width - 0.125).abs() < 1e-9);
        assert!(r.is_valid());
    }
}
