/// Coordinates accepted up to 10% past the model edge still map onto the
/// screen; anything further is rejected as hallucinated.
const BOUNDS_SLACK: f64 = 1.1;

/// Affine bridge between the model's advertised display and the physical
/// screen. Copy type; one per executor, fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenGeometry {
    pub screen_width: u32,
    pub screen_height: u32,
    pub model_width: u32,
    pub model_height: u32,
}

impl ScreenGeometry {
    /// Model space -> physical pixels, rounded to the nearest pixel.
    pub fn to_screen(&self, x: f64, y: f64) -> (i32, i32) {
        let sx = x * self.screen_width as f64 / self.model_width as f64;
        let sy = y * self.screen_height as f64 / self.model_height as f64;
        (sx.round() as i32, sy.round() as i32)
    }

    /// Physical pixels -> model space.
    pub fn to_model(&self, x: i32, y: i32) -> (f64, f64) {
        let mx = x as f64 * self.model_width as f64 / self.screen_width as f64;
        let my = y as f64 * self.model_height as f64 / self.screen_height as f64;
        (mx, my)
    }

    pub fn in_model_bounds(&self, x: f64, y: f64) -> bool {
        x >= 0.0
            && y >= 0.0
            && x <= self.model_width as f64 * BOUNDS_SLACK
            && y <= self.model_height as f64 * BOUNDS_SLACK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> ScreenGeometry {
        ScreenGeometry {
            screen_width: 1920,
            screen_height: 1080,
            model_width: 1024,
            model_height: 640,
        }
    }

    #[test]
    fn model_to_screen_scales_both_axes() {
        let g = geometry();
        assert_eq!(g.to_screen(0.0, 0.0), (0, 0));
        assert_eq!(g.to_screen(1024.0, 640.0), (1920, 1080));
        assert_eq!(g.to_screen(512.0, 320.0), (960, 540));
    }

    #[test]
    fn round_trip_is_lossless_within_a_pixel() {
        let g = geometry();
        for &(x, y) in &[(100.0, 200.0), (512.0, 320.0), (1000.0, 600.0)] {
            let (sx, sy) = g.to_screen(x, y);
            let (mx, my) = g.to_model(sx, sy);
            assert!((mx - x).abs() <= 1.0, "x drifted: {x} -> {mx}");
            assert!((my - y).abs() <= 1.0, "y drifted: {y} -> {my}");
        }
    }

    #[test]
    fn bounds_allow_ten_percent_slack() {
        let g = geometry();
        assert!(g.in_model_bounds(1024.0, 640.0));
        assert!(g.in_model_bounds(1126.0, 704.0));
        assert!(!g.in_model_bounds(1127.0, 100.0));
        assert!(!g.in_model_bounds(100.0, 705.0));
        assert!(!g.in_model_bounds(-1.0, 100.0));
    }
}
