use rand::RngExt;
use serde::{Deserialize, Serialize};

/// Standard window sizes a session can be created with. One is chosen per
/// session and never changes for that session's lifetime.
pub const RESOLUTIONS: [Resolution; 4] = [
    Resolution {
        width: 1920,
        height: 1080,
    },
    Resolution {
        width: 1536,
        height: 864,
    },
    Resolution {
        width: 1366,
        height: 768,
    },
    Resolution {
        width: 1280,
        height: 720,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Pick a resolution from the standard set using the caller's RNG, so a
    /// seeded run is fully deterministic.
    pub fn choose<R: RngExt>(rng: &mut R) -> Resolution {
        RESOLUTIONS[rng.random_range(0..RESOLUTIONS.len())]
    }
}

/// Element rectangle in document pixel coordinates (y includes the page's
/// scroll extent, matching what the browser reports for an element's rect).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// The sole visibility predicate: the box must sit entirely inside the
    /// vertical window `[offset, offset + viewport_height]`. A box straddling
    /// either edge counts as not visible.
    pub fn fully_visible(&self, offset: f64, viewport_height: f64) -> bool {
        self.y >= offset && self.y + self.height <= offset + viewport_height
    }
}
