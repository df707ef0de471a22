//! User-painted exclusion mask.
//!
//! The mask is a boolean raster aligned 1:1 with native video pixels, the same
//! space detection boxes are reported in. Cells only ever go from "not excluded"
//! to "excluded"; there is no undo for the lifetime of a session.
//!
//! Painting arrives from a pointer surface that may be displayed at a different
//! size than the video. `DisplayMapping` converts pointer coordinates before they
//! reach the raster, and `StrokeTracker` turns press/drag/release into segments.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::detect::BBox;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Point {
    fn from(v: [f32; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

/// Boolean exclusion raster.
#[derive(Clone, Debug)]
pub struct ExclusionMask {
    width: u32,
    height: u32,
    cells: Vec<bool>,
    stroke_width: f32,
}

impl ExclusionMask {
    /// Uninitialized mask. Painting is ignored until `ensure_size` is called.
    pub fn new(stroke_width: f32) -> Self {
        Self {
            width: 0,
            height: 0,
            cells: Vec::new(),
            stroke_width,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stroke_width(&self) -> f32 {
        self.stroke_width
    }

    pub fn is_initialized(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Grow the raster to cover `width x height`. Never shrinks; existing cells keep their state.
    ///
    /// Returns true when the raster changed size.
    pub fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        let new_w = self.width.max(width);
        let new_h = self.height.max(height);
        if new_w == self.width && new_h == self.height {
            return false;
        }

        let mut cells = vec![false; new_w as usize * new_h as usize];
        for y in 0..self.height as usize {
            let src = y * self.width as usize;
            let dst = y * new_w as usize;
            cells[dst..dst + self.width as usize]
                .copy_from_slice(&self.cells[src..src + self.width as usize]);
        }
        log::debug!(
            "exclusion mask resized {}x{} -> {}x{}",
            self.width,
            self.height,
            new_w,
            new_h
        );
        self.width = new_w;
        self.height = new_h;
        self.cells = cells;
        true
    }

    /// Mark every cell within `stroke_width / 2` of the segment `start..end`.
    ///
    /// Cells are tested at their centers; the ends are round. Returns the number
    /// of newly excluded cells. Ignored (returns 0) before initialization.
    pub fn paint(&mut self, start: Point, end: Point) -> usize {
        if !self.is_initialized() {
            log::debug!("exclusion mask not initialized; ignoring paint");
            return 0;
        }
        if !(start.x.is_finite() && start.y.is_finite() && end.x.is_finite() && end.y.is_finite())
        {
            return 0;
        }

        let radius = self.stroke_width / 2.0;
        let min_x = (start.x.min(end.x) - radius).floor().max(0.0);
        let min_y = (start.y.min(end.y) - radius).floor().max(0.0);
        let max_x = (start.x.max(end.x) + radius).ceil().min(self.width as f32);
        let max_y = (start.y.max(end.y) + radius).ceil().min(self.height as f32);
        if min_x >= max_x || min_y >= max_y {
            return 0;
        }

        let radius_sq = radius * radius;
        let mut painted = 0;
        for y in min_y as u32..max_y as u32 {
            for x in min_x as u32..max_x as u32 {
                let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                if distance_sq_to_segment(center, start, end) <= radius_sq {
                    let idx = self.index(x, y);
                    if !self.cells[idx] {
                        self.cells[idx] = true;
                        painted += 1;
                    }
                }
            }
        }
        painted
    }

    /// Paint a polyline as consecutive segments. A single point paints a dot.
    pub fn paint_polyline(&mut self, points: &[Point]) -> usize {
        match points {
            [] => 0,
            [only] => self.paint(*only, *only),
            _ => points.windows(2).map(|w| self.paint(w[0], w[1])).sum(),
        }
    }

    /// True when ANY in-bounds cell covered by `bbox` is excluded.
    ///
    /// Out-of-bounds parts of the box are not tested; a box entirely outside the
    /// raster (or an uninitialized mask) is never excluded.
    pub fn is_excluded(&self, bbox: &BBox) -> bool {
        if !self.is_initialized() {
            return false;
        }
        let values = [bbox.x, bbox.y, bbox.width, bbox.height];
        if values.iter().any(|v| !v.is_finite()) || bbox.width <= 0.0 || bbox.height <= 0.0 {
            return false;
        }

        let x0 = bbox.x.floor().max(0.0);
        let y0 = bbox.y.floor().max(0.0);
        let x1 = bbox.right().ceil().min(self.width as f32);
        let y1 = bbox.bottom().ceil().min(self.height as f32);
        if x0 >= x1 || y0 >= y1 {
            return false;
        }

        let (x0, x1) = (x0 as usize, x1 as usize);
        (y0 as u32..y1 as u32).any(|y| {
            let row = y as usize * self.width as usize;
            self.cells[row + x0..row + x1].iter().any(|&c| c)
        })
    }

    pub fn is_cell_excluded(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.cells[self.index(x, y)]
    }

    pub fn excluded_cells(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

fn distance_sq_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    (p.x - cx) * (p.x - cx) + (p.y - cy) * (p.y - cy)
}

/// Mask shared between the frame loop (reads) and pointer input (paints).
#[derive(Clone, Debug)]
pub struct MaskHandle {
    inner: Arc<RwLock<ExclusionMask>>,
}

impl MaskHandle {
    pub fn new(mask: ExclusionMask) -> Self {
        Self {
            inner: Arc::new(RwLock::new(mask)),
        }
    }

    // A poisoned lock still holds a consistent raster: every write is a plain
    // cell flip or a complete resize.
    pub fn read(&self) -> RwLockReadGuard<'_, ExclusionMask> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ExclusionMask> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn paint(&self, start: Point, end: Point) -> usize {
        self.write().paint(start, end)
    }
}

/// Scales pointer coordinates from the display surface to native video pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayMapping {
    pub display_width: f32,
    pub display_height: f32,
    pub video_width: f32,
    pub video_height: f32,
}

impl DisplayMapping {
    pub fn new(display: (u32, u32), video: (u32, u32)) -> Self {
        Self {
            display_width: display.0 as f32,
            display_height: display.1 as f32,
            video_width: video.0 as f32,
            video_height: video.1 as f32,
        }
    }

    /// Display and video share a size.
    pub fn identity(width: u32, height: u32) -> Self {
        Self::new((width, height), (width, height))
    }

    pub fn to_video(&self, p: Point) -> Point {
        let sx = if self.display_width > 0.0 {
            self.video_width / self.display_width
        } else {
            1.0
        };
        let sy = if self.display_height > 0.0 {
            self.video_height / self.display_height
        } else {
            1.0
        };
        Point::new(p.x * sx, p.y * sy)
    }
}

/// Press / drag / release state for painting strokes.
///
/// The display size is fixed; the video side of the mapping is read from the
/// mask on every event, so strokes stay aligned after the stream grows.
#[derive(Debug)]
pub struct StrokeTracker {
    mask: MaskHandle,
    display: (u32, u32),
    last: Option<Point>,
}

impl StrokeTracker {
    pub fn new(mask: MaskHandle, display: (u32, u32)) -> Self {
        Self {
            mask,
            display,
            last: None,
        }
    }

    pub fn mask(&self) -> &MaskHandle {
        &self.mask
    }

    /// Current display-to-video mapping.
    pub fn mapping(&self) -> DisplayMapping {
        let mask = self.mask.read();
        DisplayMapping::new(self.display, (mask.width(), mask.height()))
    }

    pub fn is_drawing(&self) -> bool {
        self.last.is_some()
    }

    /// Start a stroke at a display point. Nothing is painted until the pointer moves.
    pub fn press(&mut self, display: Point) {
        self.last = Some(self.mapping().to_video(display));
    }

    /// Paint from the previous point to this one. Ignored when not drawing.
    pub fn drag(&mut self, display: Point) -> usize {
        let Some(last) = self.last else {
            return 0;
        };
        let next = self.mapping().to_video(display);
        self.last = Some(next);
        self.mask.paint(last, next)
    }

    /// End the stroke (pointer released or left the surface).
    pub fn release(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(w: u32, h: u32) -> ExclusionMask {
        let mut m = ExclusionMask::new(50.0);
        m.ensure_size(w, h);
        m
    }

    #[test]
    fn paint_before_init_is_ignored() {
        let mut m = ExclusionMask::new(50.0);
        assert_eq!(m.paint(Point::new(0.0, 0.0), Point::new(10.0, 10.0)), 0);
        assert!(!m.is_excluded(&BBox::new(0.0, 0.0, 10.0, 10.0)));
        assert!(!m.is_initialized());
    }

    #[test]
    fn paint_marks_band_of_stroke_width() {
        let mut m = mask(200, 200);
        let painted = m.paint(Point::new(50.0, 100.0), Point::new(150.0, 100.0));
        assert!(painted > 0);
        assert!(m.is_cell_excluded(100, 100));
        assert!(m.is_cell_excluded(100, 80));
        assert!(m.is_cell_excluded(100, 120));
        assert!(!m.is_cell_excluded(100, 130));
        assert!(!m.is_cell_excluded(100, 70));
        // round caps
        assert!(m.is_cell_excluded(30, 100));
        assert!(!m.is_cell_excluded(20, 100));
    }

    #[test]
    fn repainting_does_not_count_twice_and_never_clears() {
        let mut m = mask(100, 100);
        let first = m.paint(Point::new(10.0, 10.0), Point::new(40.0, 10.0));
        let second = m.paint(Point::new(10.0, 10.0), Point::new(40.0, 10.0));
        assert!(first > 0);
        assert_eq!(second, 0);
        assert_eq!(m.excluded_cells(), first);
    }

    #[test]
    fn any_overlap_excludes_box() {
        let mut m = mask(300, 300);
        m.paint(Point::new(100.0, 100.0), Point::new(100.0, 100.0));
        // box touching only the edge of the dot
        assert!(m.is_excluded(&BBox::new(124.0, 90.0, 40.0, 20.0)));
        assert!(!m.is_excluded(&BBox::new(130.0, 90.0, 40.0, 20.0)));
    }

    #[test]
    fn box_outside_bounds_is_not_excluded() {
        let mut m = mask(100, 100);
        m.paint(Point::new(0.0, 0.0), Point::new(100.0, 100.0));
        assert!(!m.is_excluded(&BBox::new(150.0, 150.0, 20.0, 20.0)));
        assert!(!m.is_excluded(&BBox::new(-50.0, -50.0, 20.0, 20.0)));
        // partially in bounds: only the in-bounds part is tested
        assert!(m.is_excluded(&BBox::new(90.0, 90.0, 50.0, 50.0)));
    }

    #[test]
    fn degenerate_boxes_are_not_excluded() {
        let mut m = mask(50, 50);
        m.paint(Point::new(0.0, 25.0), Point::new(50.0, 25.0));
        assert!(!m.is_excluded(&BBox::new(10.0, 10.0, 0.0, 20.0)));
        assert!(!m.is_excluded(&BBox::new(f32::NAN, 10.0, 5.0, 5.0)));
    }

    #[test]
    fn grows_but_never_shrinks() {
        let mut m = mask(40, 40);
        m.paint(Point::new(10.0, 10.0), Point::new(10.0, 10.0));
        let before = m.excluded_cells();

        assert!(!m.ensure_size(20, 20));
        assert_eq!((m.width(), m.height()), (40, 40));

        assert!(m.ensure_size(80, 60));
        assert_eq!((m.width(), m.height()), (80, 60));
        assert_eq!(m.excluded_cells(), before);
        assert!(m.is_cell_excluded(10, 10));
        assert!(!m.is_cell_excluded(70, 50));
    }

    #[test]
    fn polyline_paints_every_segment() {
        let mut m = mask(200, 200);
        m.paint_polyline(&[
            Point::new(20.0, 20.0),
            Point::new(180.0, 20.0),
            Point::new(180.0, 180.0),
        ]);
        assert!(m.is_cell_excluded(100, 20));
        assert!(m.is_cell_excluded(180, 100));
        assert!(!m.is_cell_excluded(100, 100));
    }

    #[test]
    fn tracker_maps_display_to_video_space() {
        let handle = MaskHandle::new(mask(1280, 720));
        let mut tracker = StrokeTracker::new(handle.clone(), (640, 360));

        assert_eq!(tracker.drag(Point::new(10.0, 10.0)), 0);
        tracker.press(Point::new(100.0, 100.0));
        assert!(tracker.is_drawing());
        assert!(tracker.drag(Point::new(200.0, 100.0)) > 0);
        tracker.release();
        assert!(!tracker.is_drawing());
        assert_eq!(tracker.drag(Point::new(300.0, 300.0)), 0);

        let m = handle.read();
        assert!(m.is_cell_excluded(300, 200));
        assert!(!m.is_cell_excluded(150, 100));
    }

    #[test]
    fn tracker_follows_mask_growth() {
        let handle = MaskHandle::new(mask(320, 240));
        let mut tracker = StrokeTracker::new(handle.clone(), (320, 240));
        assert_eq!(tracker.mapping(), DisplayMapping::identity(320, 240));

        handle.write().ensure_size(640, 480);
        tracker.press(Point::new(300.0, 220.0));
        assert!(tracker.drag(Point::new(310.0, 230.0)) > 0);
        tracker.release();

        let m = handle.read();
        assert!(m.is_cell_excluded(610, 450));
        assert!(!m.is_cell_excluded(305, 225));
        assert!(m.is_excluded(&BBox::new(590.0, 430.0, 40.0, 40.0)));
    }
}
