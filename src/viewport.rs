use crate::core::LogicalSize;

/// Lower bound on the usable host width, so tiny containers still get a canvas.
pub const MIN_AVAILABLE_WIDTH: f64 = 240.0;
/// Horizontal margin assumed when only the window width is measurable.
pub const AMBIENT_WINDOW_MARGIN: f64 = 64.0;
pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 1.0;

/// Derived display box for a scene. Never persisted: the backing resolution is
/// always the logical size, only the display box scales with the host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    /// Display pixels per logical pixel, clamped to `(MIN_SCALE, MAX_SCALE]`.
    pub scale: f64,
    pub display_width: u32,
    pub display_height: u32,
}

impl Viewport {
    /// Pure mapping from logical size + available host width to a display box.
    /// Recomputing with unchanged inputs yields identical output.
    pub fn compute(logical: LogicalSize, available_width: f64) -> Self {
        let base_width = f64::from(logical.width);
        let base_height = f64::from(logical.height);
        let scale = (available_width / base_width).clamp(MIN_SCALE, MAX_SCALE);
        Self {
            scale,
            display_width: (base_width * scale).round() as u32,
            display_height: (base_height * scale).round() as u32,
        }
    }
}

/// Host-side measurements from which the available width is derived.
///
/// A measurable container wins (its width minus its own horizontal padding);
/// otherwise an ambient window width with a fixed margin; otherwise the logical
/// width itself (scale 1.0).
#[derive(Clone, Copy, Debug, Default)]
pub struct HostBox {
    pub container_width: Option<f64>,
    pub container_h_padding: f64,
    pub window_width: Option<f64>,
}

impl HostBox {
    pub fn available_width(&self, logical: LogicalSize) -> f64 {
        if let Some(w) = self.container_width {
            return (w - self.container_h_padding).max(MIN_AVAILABLE_WIDTH);
        }
        if let Some(w) = self.window_width {
            return (w - AMBIENT_WINDOW_MARGIN).max(MIN_AVAILABLE_WIDTH);
        }
        f64::from(logical.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logical() -> LogicalSize {
        LogicalSize {
            width: 1200,
            height: 1800,
        }
    }

    #[test]
    fn scale_is_clamped_to_unit() {
        let vp = Viewport::compute(logical(), 2400.0);
        assert_eq!(vp.scale, 1.0);
        assert_eq!(vp.display_width, 1200);
        assert_eq!(vp.display_height, 1800);
    }

    #[test]
    fn scale_is_clamped_to_lower_bound() {
        let vp = Viewport::compute(logical(), 10.0);
        assert_eq!(vp.scale, MIN_SCALE);
        assert_eq!(vp.display_width, 120);
        assert_eq!(vp.display_height, 180);
    }

    #[test]
    fn display_box_rounds_scaled_dimensions() {
        let vp = Viewport::compute(logical(), 600.0);
        assert_eq!(vp.scale, 0.5);
        assert_eq!(vp.display_width, 600);
        assert_eq!(vp.display_height, 900);

        let vp = Viewport::compute(logical(), 500.0);
        assert_eq!(vp.display_width, (1200.0 * (500.0 / 1200.0)).round() as u32);
    }

    #[test]
    fn recompute_is_idempotent() {
        let a = Viewport::compute(logical(), 731.0);
        let b = Viewport::compute(logical(), 731.0);
        assert_eq!(a, b);
    }

    #[test]
    fn host_box_prefers_container_minus_padding() {
        let host = HostBox {
            container_width: Some(1000.0),
            container_h_padding: 40.0,
            window_width: Some(500.0),
        };
        assert_eq!(host.available_width(logical()), 960.0);
    }

    #[test]
    fn host_box_falls_back_to_window_then_logical() {
        let windowed = HostBox {
            window_width: Some(800.0),
            ..HostBox::default()
        };
        assert_eq!(windowed.available_width(logical()), 736.0);

        let bare = HostBox::default();
        assert_eq!(bare.available_width(logical()), 1200.0);
    }

    #[test]
    fn tiny_hosts_are_floored() {
        let host = HostBox {
            container_width: Some(100.0),
            ..HostBox::default()
        };
        assert_eq!(host.available_width(logical()), MIN_AVAILABLE_WIDTH);
    }
}
