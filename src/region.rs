//! Monitored regions and the registry that hands them out.
//!
//! A region is a screen rectangle bound to a physical location label. Raw
//! selections may be dragged in any direction, so rectangles are normalized
//! (top-left origin, non-negative extent) before any capture call.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Location assigned when a region is registered without one.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Screen rectangle. `width`/`height` may be negative before normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Move the origin to the top-left corner and make the extent non-negative.
    ///
    /// Idempotent: `r.normalize().normalize() == r.normalize()`.
    pub fn normalize(self) -> Self {
        let x = self.x.min(self.x.saturating_add(self.width));
        let y = self.y.min(self.y.saturating_add(self.height));
        Self {
            x,
            y,
            width: self.width.saturating_abs(),
            height: self.height.saturating_abs(),
        }
    }

    pub fn area(&self) -> u64 {
        self.width.unsigned_abs() as u64 * self.height.unsigned_abs() as u64
    }

    /// Intersect the normalized rectangle with a `bound_w` x `bound_h` surface.
    ///
    /// Returns `(x, y, width, height)` in surface coordinates, or `None` when the
    /// rectangle lies entirely outside the surface.
    pub fn clip_to(&self, bound_w: u32, bound_h: u32) -> Option<(u32, u32, u32, u32)> {
        let r = self.normalize();
        let x0 = (r.x as i64).max(0);
        let y0 = (r.y as i64).max(0);
        let x1 = (r.x as i64 + r.width as i64).min(bound_w as i64);
        let y1 = (r.y as i64 + r.height as i64).min(bound_h as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Rect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        if parts.len() != 4 {
            return Err(anyhow!("rect must be 'x,y,width,height', got '{}'", s));
        }
        let mut values = [0i32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| anyhow!("rect component '{}' is not an integer", part))?;
        }
        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}

/// A monitored region. Only `location` may change after registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: u32,
    pub rect: Rect,
    pub location: String,
}

impl Region {
    /// Rectangle handed to the frame source.
    pub fn capture_rect(&self) -> Rect {
        self.rect.normalize()
    }
}

/// A `(rect, location)` pair from the region input surface, written as
/// `"x,y,w,h@Location"`. The location part is optional.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionSpec {
    pub rect: Rect,
    pub location: Option<String>,
}

impl FromStr for RegionSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (rect_part, location) = match s.split_once('@') {
            Some((rect, location)) => {
                let location = location.trim();
                let location = (!location.is_empty()).then(|| location.to_string());
                (rect, location)
            }
            None => (s, None),
        };
        Ok(Self {
            rect: rect_part.parse()?,
            location,
        })
    }
}

/// Ordered set of monitored regions.
#[derive(Clone, Debug)]
pub struct RegionRegistry {
    regions: Vec<Region>,
    next_id: u32,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            next_id: 1,
        }
    }

    /// Register a selection. A rectangle with zero area after normalization is
    /// treated as a failed selection: no region is created and no id is used.
    pub fn add(&mut self, rect: Rect, location: impl Into<String>) -> Option<Region> {
        if rect.normalize().area() == 0 {
            log::warn!("region selection {} has zero area; ignored", rect);
            return None;
        }
        let region = Region {
            id: self.next_id,
            rect,
            location: location.into(),
        };
        self.next_id += 1;
        log::info!(
            "region {} added: {} location={}",
            region.id,
            region.rect,
            region.location
        );
        self.regions.push(region.clone());
        Some(region)
    }

    /// Register a parsed input-surface spec, defaulting the location.
    pub fn add_spec(&mut self, spec: &RegionSpec) -> Option<Region> {
        let location = spec
            .location
            .clone()
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
        self.add(spec.rect, location)
    }

    pub fn list(&self) -> &[Region] {
        &self.regions
    }

    pub fn get(&self, id: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn set_location(&mut self, id: u32, location: impl Into<String>) -> Result<()> {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("region {} is not registered", id))?;
        region.location = location.into();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Forget every region and restart id assignment at 1.
    pub fn reset(&mut self) {
        self.regions.clear();
        self.next_id = 1;
    }
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
