//! Grid geometry: container pixels → column width and row height.
//!
//! Row height is chosen so a 1×1 cell keeps the configured aspect ratio,
//! then capped so `max_rows` rows still fit inside the container height.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::LayoutConfig;
use crate::debounce::Debounce;
use crate::model::LayoutCell;

/// Pixel rectangle of a placed cell, relative to the container origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridMetrics {
    /// Container width after the minimum-width floor.
    pub width: u32,
    pub height: u32,
    pub columns: u32,
    pub column_width: f64,
    pub row_height: u32,
    pub margin: u32,
    pub max_rows: u32,
}

impl GridMetrics {
    pub fn compute(container_width: f64, container_height: f64, cfg: &LayoutConfig) -> Self {
        let columns = cfg.columns.max(1);
        let max_rows = cfg.max_rows.max(1);
        let width = sanitize_px(container_width).max(cfg.min_width_px);
        let height = sanitize_px(container_height);

        let horizontal_margins = (columns - 1) * cfg.margin_px;
        let vertical_margins = (max_rows - 1) * cfg.vertical_margin_px;
        let available_width = width.saturating_sub(horizontal_margins) as f64;
        let available_height = height.saturating_sub(vertical_margins) as f64;

        let column_width = available_width / columns as f64;
        let ratio = if cfg.aspect_ratio.is_finite() && cfg.aspect_ratio > 0.0 {
            cfg.aspect_ratio
        } else {
            16.0 / 9.0
        };
        let by_width = (column_width / ratio).floor();
        let by_height = (available_height / max_rows as f64).floor();
        let row_height = by_width.min(by_height).max(1.0) as u32;

        Self {
            width,
            height,
            columns,
            column_width,
            row_height,
            margin: cfg.margin_px,
            max_rows,
        }
    }

    /// Width/height ratio of a 1×1 cell.
    pub fn cell_aspect(&self) -> f64 {
        self.column_width / self.row_height as f64
    }

    fn col_pitch(&self) -> f64 {
        self.column_width + self.margin as f64
    }

    fn row_pitch(&self) -> f64 {
        (self.row_height + self.margin) as f64
    }

    /// Pixel rectangle occupied by `cell`.
    pub fn cell_rect(&self, cell: &LayoutCell) -> PixelRect {
        let margin = self.margin as f64;
        let w = cell.w.max(1) as f64;
        let h = cell.h.max(1) as f64;
        PixelRect {
            left: margin + cell.x.max(0) as f64 * self.col_pitch(),
            top: margin + cell.y.max(0) as f64 * self.row_pitch(),
            width: w * self.column_width + (w - 1.0) * margin,
            height: h * self.row_height as f64 + (h - 1.0) * margin,
        }
    }

    /// Grid position for an item of width `w` dragged to pixel (`left`, `top`).
    /// The result is clamped so the item stays inside the columns and rows.
    pub fn cell_at(&self, left: f64, top: f64, w: i32, h: i32) -> (i32, i32) {
        let margin = self.margin as f64;
        let x = ((left - margin) / self.col_pitch()).round();
        let y = ((top - margin) / self.row_pitch()).round();
        let max_x = (self.columns as i32 - w.max(1)).max(0);
        let max_y = (self.max_rows as i32 - h.max(1)).max(0);
        (clamp_cell(x, max_x), clamp_cell(y, max_y))
    }

    /// Cell span for an item resized to `width` × `height` pixels at column `x`.
    pub fn span_for_size(&self, x: i32, width: f64, height: f64) -> (i32, i32) {
        let margin = self.margin as f64;
        let w = ((width + margin) / self.col_pitch()).round();
        let h = ((height + margin) / self.row_pitch()).round();
        let max_w = (self.columns as i32 - x.max(0)).max(1);
        let w = clamp_cell(w, max_w).max(1);
        let h = clamp_cell(h, self.max_rows as i32).max(1);
        (w, h)
    }
}

fn sanitize_px(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.floor().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

fn clamp_cell(value: f64, max: i32) -> i32 {
    if value.is_finite() {
        (value as i32).clamp(0, max)
    } else {
        0
    }
}

/// Debounced resize handling: bursts of resize events collapse into one
/// recomputation after the quiet period.
#[derive(Debug, Clone)]
pub struct GeometryTracker {
    config: LayoutConfig,
    metrics: GridMetrics,
    pending: Option<(f64, f64)>,
    debounce: Debounce,
}

impl GeometryTracker {
    pub fn new(config: LayoutConfig, width: f64, height: f64) -> Self {
        let metrics = GridMetrics::compute(width, height, &config);
        let debounce = Debounce::new(config.resize_debounce());
        Self {
            config,
            metrics,
            pending: None,
            debounce,
        }
    }

    pub fn metrics(&self) -> GridMetrics {
        self.metrics
    }

    pub fn on_resize(&mut self, width: f64, height: f64, now: Instant) {
        self.pending = Some((width, height));
        self.debounce.schedule(now);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Recompute when the debounce has fired. Returns the new metrics when
    /// they differ from the previous ones.
    pub fn poll(&mut self, now: Instant) -> Option<GridMetrics> {
        if !self.debounce.fire(now) {
            return None;
        }
        self.apply_pending()
    }

    /// Apply a pending resize immediately.
    pub fn flush(&mut self) -> Option<GridMetrics> {
        self.debounce.cancel();
        self.apply_pending()
    }

    fn apply_pending(&mut self) -> Option<GridMetrics> {
        let (w, h) = self.pending.take()?;
        let next = GridMetrics::compute(w, h, &self.config);
        if next == self.metrics {
            return None;
        }
        self.metrics = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg() -> LayoutConfig {
        LayoutConfig::default()
    }

    #[test]
    fn test_row_height_keeps_aspect_ratio() {
        let m = GridMetrics::compute(1200.0, 800.0, &cfg());
        assert_eq!(m.columns, 12);
        let expected = (m.column_width / (16.0 / 9.0)).floor() as u32;
        assert_eq!(m.row_height, expected);
        // floor() loses at most one pixel of row height
        let max_err = m.column_width / (m.row_height as f64 * m.row_height as f64);
        assert!((m.cell_aspect() - 16.0 / 9.0).abs() <= max_err + 1e-9);
    }

    #[test]
    fn test_width_floor_and_proportional_shrink() {
        let wide = GridMetrics::compute(1200.0, 800.0, &cfg());
        let floor = GridMetrics::compute(480.0, 800.0, &cfg());
        let tiny = GridMetrics::compute(200.0, 800.0, &cfg());
        assert!(floor.row_height < wide.row_height);
        assert_eq!(tiny, floor);
        assert_eq!(floor.width, 480);
        assert!((floor.cell_aspect() - 16.0 / 9.0).abs() < 0.1);
    }

    #[test]
    fn test_height_caps_row_height() {
        let m = GridMetrics::compute(3840.0, 400.0, &cfg());
        // (400 - 11*4) / 12 = 29.67
        assert_eq!(m.row_height, 29);
    }

    #[test]
    fn test_degenerate_input_clamps() {
        let m = GridMetrics::compute(f64::NAN, -5.0, &cfg());
        assert_eq!(m.width, 480);
        assert_eq!(m.row_height, 1);
    }

    #[test]
    fn test_pixel_cell_round_trip() {
        let m = GridMetrics::compute(1200.0, 800.0, &cfg());
        let cell = LayoutCell::new("a", 4, 2, 3, 3);
        let rect = m.cell_rect(&cell);
        assert_eq!(m.cell_at(rect.left, rect.top, 3, 3), (4, 2));
        assert_eq!(m.span_for_size(4, rect.width, rect.height), (3, 3));
        // dragged past the right edge
        assert_eq!(m.cell_at(10_000.0, rect.top, 3, 3).0, 9);
    }

    #[test]
    fn test_tracker_debounces_resize() {
        let t0 = Instant::now();
        let mut tracker = GeometryTracker::new(cfg(), 1200.0, 800.0);
        let before = tracker.metrics();
        tracker.on_resize(900.0, 800.0, t0);
        tracker.on_resize(700.0, 800.0, t0 + Duration::from_millis(50));
        assert!(tracker.poll(t0 + Duration::from_millis(100)).is_none());
        let after = tracker
            .poll(t0 + Duration::from_millis(160))
            .expect("resize applied");
        assert_eq!(after.width, 700);
        assert!(after.row_height < before.row_height);
        assert!(tracker.deadline().is_none());
    }
}
