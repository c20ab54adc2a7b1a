//! Viewport tracking: camera → visible chunk rectangle → subscription.
//!
//! The render layer owns a camera (world position + zoom) and a surface
//! size in device pixels. This module derives the half-open rectangle of
//! chunks that surface can see, keeps the server subscription in step,
//! and schedules reads for chunks scrolling into view. Everything else
//! about rendering lives outside the engine.

use std::sync::Arc;

use oekaki_types::ChunkRect;

use crate::cache::ChunkCache;
use crate::error::ClientError;
use crate::transport::ChunkTransport;

/// World-space camera: `(x, y)` is the world pixel at the surface center,
/// `zoom` the screen-pixels-per-world-pixel factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

/// The chunk rectangle visible from `camera` on a `width × height` surface.
pub fn visible_rect(camera: Camera, width: u32, height: u32, tile_size: u32) -> ChunkRect {
    let tile = tile_size as f64;
    let half_w = width as f64 / 2.0;
    let half_h = height as f64 / 2.0;
    let x1 = ((camera.x * camera.zoom - half_w) / camera.zoom / tile).floor() as i64;
    let y1 = ((camera.y * camera.zoom - half_h) / camera.zoom / tile).floor() as i64;
    let x2 = ((camera.x * camera.zoom + half_w) / camera.zoom / tile).ceil() as i64;
    let y2 = ((camera.y * camera.zoom + half_h) / camera.zoom / tile).ceil() as i64;
    ChunkRect::new(x1, y1, x2, y2)
}

/// The chunks a stroke segment touches: bounding box of the segment,
/// inflated by half the line width, in chunk units.
///
/// This is how a paint gesture finds the coordinates it must merge into.
pub fn stroke_rect(
    (x1, y1): (f64, f64),
    (x2, y2): (f64, f64),
    line_width: f64,
    tile_size: u32,
) -> ChunkRect {
    let tile = tile_size as f64;
    let half = line_width / 2.0;
    ChunkRect::new(
        ((x1.min(x2) - half) / tile).floor() as i64,
        ((y1.min(y2) - half) / tile).floor() as i64,
        ((x1.max(x2) + half) / tile).ceil() as i64,
        ((y1.max(y2) + half) / tile).ceil() as i64,
    )
}

/// Keeps the server subscription and chunk cache in step with the camera.
pub struct ViewportTracker {
    transport: Arc<dyn ChunkTransport>,
    cache: Arc<ChunkCache>,
    camera: Camera,
    width: u32,
    height: u32,
    range: Option<ChunkRect>,
}

impl ViewportTracker {
    pub fn new(transport: Arc<dyn ChunkTransport>, cache: Arc<ChunkCache>) -> Self {
        Self {
            transport,
            cache,
            camera: Camera::default(),
            width: 0,
            height: 0,
            range: None,
        }
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    /// Last known surface size in device pixels.
    pub fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The rectangle currently subscribed, if any.
    pub fn visible_range(&self) -> Option<ChunkRect> {
        self.range
    }

    /// Move the camera and/or resize the surface.
    ///
    /// When the visible rectangle changes, the server subscription is
    /// replaced and every chunk newly in view is read in the background;
    /// arrivals surface as repaint events from the cache.
    pub fn set_view(&mut self, camera: Camera, width: u32, height: u32) -> Result<(), ClientError> {
        self.camera = camera;
        self.width = width;
        self.height = height;

        let rect = visible_rect(camera, width, height, self.cache.geometry().tile_size());
        if self.range == Some(rect) {
            return Ok(());
        }
        let previous = self.range.replace(rect);
        self.transport.set_range(rect)?;

        for coord in rect.iter() {
            if previous.is_some_and(|p| p.contains(coord)) {
                continue;
            }
            let cache = self.cache.clone();
            tokio::spawn(async move {
                cache.read_chunk(coord).await;
            });
        }
        Ok(())
    }

    /// Re-issue the current subscription and reload the visible region,
    /// e.g. after the connection came back and the cache was blanked.
    pub fn refresh(&self) -> Result<(), ClientError> {
        let Some(rect) = self.range else { return Ok(()) };
        self.transport.set_range(rect)?;
        for coord in rect.iter() {
            let cache = self.cache.clone();
            tokio::spawn(async move {
                cache.read_chunk(coord).await;
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_camera_sees_a_symmetric_rect() {
        let rect = visible_rect(Camera::default(), 128, 128, 64);
        assert_eq!(rect, ChunkRect::new(-1, -1, 1, 1));
    }

    #[test]
    fn zoom_does_not_change_world_coverage_at_origin() {
        let camera = Camera { x: 0.0, y: 0.0, zoom: 2.0 };
        // 128 screen pixels at 2× show 64 world pixels: half a tile each way.
        assert_eq!(visible_rect(camera, 128, 128, 64), ChunkRect::new(-1, -1, 1, 1));
    }

    #[test]
    fn panning_shifts_the_rect() {
        let camera = Camera { x: 100.0, y: 0.0, zoom: 1.0 };
        let rect = visible_rect(camera, 128, 128, 64);
        // x spans world pixels [36, 164): chunks 0..3.
        assert_eq!(rect, ChunkRect::new(0, -1, 3, 1));
    }

    #[test]
    fn high_zoom_narrows_to_one_tile() {
        let camera = Camera { x: 32.0, y: 32.0, zoom: 64.0 };
        let rect = visible_rect(camera, 128, 128, 64);
        assert_eq!(rect, ChunkRect::new(0, 0, 1, 1));
    }

    #[test]
    fn stroke_rect_covers_the_inflated_bounding_box() {
        // Segment within one tile, width 2: still one tile.
        assert_eq!(
            stroke_rect((10.0, 10.0), (50.0, 50.0), 2.0, 64),
            ChunkRect::new(0, 0, 1, 1)
        );
        // Crossing a tile boundary.
        assert_eq!(
            stroke_rect((10.0, 10.0), (70.0, 70.0), 2.0, 64),
            ChunkRect::new(0, 0, 2, 2)
        );
        // A wide brush near the boundary bleeds into the neighbor tile.
        assert_eq!(
            stroke_rect((60.0, 10.0), (60.0, 20.0), 16.0, 64),
            ChunkRect::new(0, 0, 2, 1)
        );
    }

    #[test]
    fn negative_world_space_floors_toward_negative_infinity() {
        assert_eq!(
            stroke_rect((-10.0, -10.0), (-5.0, -5.0), 2.0, 64),
            ChunkRect::new(-1, -1, 0, 0)
        );
    }
}
