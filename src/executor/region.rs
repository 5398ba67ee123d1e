use crate::codec::{ElementType, Region};

/// Capture rectangle for a UI element class, centered on the cursor. The
/// browser address bar is anchored to the top edge instead: its vertical
/// position is fixed by the window chrome, not by where the cursor sits.
pub fn element_region(
    element: ElementType,
    cursor: (i32, i32),
    screen_width: u32,
    screen_height: u32,
) -> Region {
    let (width, height) = match element {
        ElementType::TextField => (500, 200),
        ElementType::Button => (200, 100),
        ElementType::Menu => (300, 500),
        ElementType::Dialog => (600, 400),
        ElementType::BrowserAddress => (screen_width, 150),
    };

    let (cx, cy) = match element {
        ElementType::BrowserAddress => (cursor.0, 50),
        _ => cursor,
    };

    let region = Region {
        x: (cx - width as i32 / 2).max(0) as u32,
        y: (cy - height as i32 / 2).max(0) as u32,
        width,
        height,
    };
    clamp_region(region, screen_width, screen_height)
}

/// Shrink and shift a rectangle so it lies fully inside the screen. A region
/// that starts past the edge collapses to a 1x1 sliver rather than failing.
pub fn clamp_region(region: Region, screen_width: u32, screen_height: u32) -> Region {
    let x = region.x.min(screen_width.saturating_sub(1));
    let y = region.y.min(screen_height.saturating_sub(1));
    Region {
        x,
        y,
        width: region.width.clamp(1, screen_width - x),
        height: region.height.clamp(1, screen_height - y),
    }
}
