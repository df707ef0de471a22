//! Line-oriented painting console.
//!
//! ```text
//! down X Y            press at display point
//! move X Y            drag to display point
//! up                  release
//! line X1 Y1 X2 Y2    press, drag, release
//! status              log mask coverage
//! ```

use std::io::BufRead;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::mask::{Point, StrokeTracker};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerCommand {
    Down(Point),
    Move(Point),
    Up,
    Line(Point, Point),
    Status,
}

impl FromStr for PointerCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| anyhow!("empty command"))?;
        let args = parts
            .map(|p| {
                p.parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| anyhow!("invalid coordinate '{}'", p))
            })
            .collect::<Result<Vec<f32>>>()?;

        let command = match (verb.to_lowercase().as_str(), args.as_slice()) {
            ("down", [x, y]) => PointerCommand::Down(Point::new(*x, *y)),
            ("move", [x, y]) => PointerCommand::Move(Point::new(*x, *y)),
            ("up", []) => PointerCommand::Up,
            ("line", [x1, y1, x2, y2]) => {
                PointerCommand::Line(Point::new(*x1, *y1), Point::new(*x2, *y2))
            }
            ("status", []) => PointerCommand::Status,
            (verb, args) => {
                return Err(anyhow!(
                    "unrecognized command '{}' with {} arguments",
                    verb,
                    args.len()
                ))
            }
        };
        Ok(command)
    }
}

impl PointerCommand {
    /// Apply to the tracker. Returns the number of newly excluded cells.
    pub fn apply(&self, tracker: &mut StrokeTracker) -> usize {
        match *self {
            PointerCommand::Down(p) => {
                tracker.press(p);
                0
            }
            PointerCommand::Move(p) => tracker.drag(p),
            PointerCommand::Up => {
                tracker.release();
                0
            }
            PointerCommand::Line(a, b) => {
                tracker.press(a);
                let painted = tracker.drag(b);
                tracker.release();
                painted
            }
            PointerCommand::Status => {
                let mask = tracker.mask().read();
                log::info!(
                    "mask {}x{}: {} cells excluded (stroke width {})",
                    mask.width(),
                    mask.height(),
                    mask.excluded_cells(),
                    mask.stroke_width()
                );
                0
            }
        }
    }
}

/// Read commands until EOF. Bad lines are logged and skipped.
pub fn run_console<R: BufRead>(reader: R, tracker: &mut StrokeTracker) -> Result<()> {
    for line in reader.lines() {
        let line = line.context("read console input")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<PointerCommand>() {
            Ok(command) => {
                let painted = command.apply(tracker);
                if painted > 0 {
                    log::debug!("{:?}: {} cells excluded", command, painted);
                }
            }
            Err(e) => log::warn!("console: {}", e),
        }
    }
    tracker.release();
    Ok(())
}
