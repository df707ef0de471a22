//! On-screen highlight bookkeeping.
//!
//! `OverlayRenderer` keeps the elements on an `OverlaySurface` in step with the
//! most recently processed frame: every `render` call removes all elements it
//! created for the previous frame before adding the new ones, so the element set
//! never grows across frames.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::detect::BBox;
use crate::filter::{Screened, Verdict};

/// Horizontal padding subtracted from the box width for the label.
const LABEL_PADDING: f32 = 10.0;

pub type ElementId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayStyle {
    /// Regular highlight.
    Highlight,
    /// Vehicle suppressed by the exclusion mask.
    Excluded,
}

/// One highlight rectangle plus its label, tied to a single detection of a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayElement {
    pub bbox: BBox,
    pub label: String,
    pub label_width: f32,
    pub style: OverlayStyle,
}

impl OverlayElement {
    pub fn for_detection(screened: &Screened) -> Self {
        let det = &screened.detection;
        Self {
            bbox: det.bbox,
            label: format!("{} - with {}% confidence.", det.class, det.percent()),
            label_width: (det.bbox.width - LABEL_PADDING).max(0.0),
            style: match screened.verdict {
                Verdict::Excluded => OverlayStyle::Excluded,
                Verdict::Actionable | Verdict::Ignored => OverlayStyle::Highlight,
            },
        }
    }
}

/// Rendering capability the overlay is drawn onto.
pub trait OverlaySurface: Send {
    fn add(&mut self, element: &OverlayElement) -> Result<ElementId>;
    fn remove(&mut self, id: ElementId) -> Result<()>;
}

pub struct OverlayRenderer {
    surface: Box<dyn OverlaySurface>,
    live: Vec<ElementId>,
}

impl OverlayRenderer {
    pub fn new(surface: Box<dyn OverlaySurface>) -> Self {
        Self {
            surface,
            live: Vec::new(),
        }
    }

    /// Replace the previous frame's elements with one element per entry.
    ///
    /// Returns the number of elements now on the surface.
    pub fn render(&mut self, high_confidence: &[Screened]) -> usize {
        self.clear();
        for screened in high_confidence {
            let element = OverlayElement::for_detection(screened);
            match self.surface.add(&element) {
                Ok(id) => self.live.push(id),
                Err(e) => log::warn!("overlay add failed for '{}': {}", element.label, e),
            }
        }
        self.live.len()
    }

    /// Remove every element this renderer created.
    pub fn clear(&mut self) {
        for id in self.live.drain(..) {
            if let Err(e) = self.surface.remove(id) {
                log::warn!("overlay remove failed for element {}: {}", id, e);
            }
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl Drop for OverlayRenderer {
    fn drop(&mut self) {
        self.clear();
    }
}

/// In-memory surface. Clones share the same element set.
#[derive(Clone, Debug, Default)]
pub struct MemorySurface {
    inner: Arc<Mutex<MemoryScene>>,
}

#[derive(Debug, Default)]
struct MemoryScene {
    next_id: ElementId,
    elements: BTreeMap<ElementId, OverlayElement>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scene().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements currently on the surface, in creation order.
    pub fn elements(&self) -> Vec<OverlayElement> {
        self.scene().elements.values().cloned().collect()
    }

    fn scene(&self) -> std::sync::MutexGuard<'_, MemoryScene> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OverlaySurface for MemorySurface {
    fn add(&mut self, element: &OverlayElement) -> Result<ElementId> {
        let mut scene = self.scene();
        scene.next_id += 1;
        let id = scene.next_id;
        scene.elements.insert(id, element.clone());
        Ok(id)
    }

    fn remove(&mut self, id: ElementId) -> Result<()> {
        self.scene()
            .elements
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("unknown overlay element {}", id))
    }
}

/// Surface for headless runs: elements are written to the debug log.
#[derive(Debug, Default)]
pub struct LogSurface {
    next_id: ElementId,
}

impl OverlaySurface for LogSurface {
    fn add(&mut self, element: &OverlayElement) -> Result<ElementId> {
        self.next_id += 1;
        log::debug!(
            "overlay #{} {:?} '{}' at ({:.0},{:.0}) {:.0}x{:.0}",
            self.next_id,
            element.style,
            element.label,
            element.bbox.x,
            element.bbox.y,
            element.bbox.width,
            element.bbox.height
        );
        Ok(self.next_id)
    }

    fn remove(&mut self, _id: ElementId) -> Result<()> {
        Ok(())
    }
}
