//! Affine raster georeferencing and geometry helpers.
//!
//! `GeoTransform` follows the GDAL coefficient order:
//! `x = gt[0] + col * gt[1] + row * gt[2]`,
//! `y = gt[3] + col * gt[4] + row * gt[5]`.

use geo::{BooleanOps, BoundingRect, Coord, LineString, MapCoords, MultiPolygon, Polygon};

/// Pixel window inside a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }
}

/// Six-coefficient affine transform between pixel and map coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        Self([origin_x, pixel_size, 0.0, origin_y, 0.0, -pixel_size])
    }

    /// Map coordinates of a (possibly fractional) pixel position
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let gt = &self.0;
        (
            gt[0] + col * gt[1] + row * gt[2],
            gt[3] + col * gt[4] + row * gt[5],
        )
    }

    /// Map coordinates of the upper-left corner of a pixel
    pub fn xy(&self, row: usize, col: usize) -> (f64, f64) {
        self.apply(col as f64, row as f64)
    }

    /// Fractional (col, row) of a map coordinate, or `None` for a degenerate transform
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let gt = &self.0;
        let det = gt[1] * gt[5] - gt[2] * gt[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - gt[0];
        let dy = y - gt[3];
        let col = (dx * gt[5] - dy * gt[2]) / det;
        let row = (dy * gt[1] - dx * gt[4]) / det;
        Some((col, row))
    }

    /// (row, col) of the pixel containing a map coordinate
    pub fn index(&self, x: f64, y: f64) -> Option<(i64, i64)> {
        self.invert(x, y)
            .map(|(col, row)| (row.floor() as i64, col.floor() as i64))
    }

    /// Transform of a window whose upper-left pixel is the window origin
    pub fn window_transform(&self, window: &Window) -> GeoTransform {
        let (x, y) = self.xy(window.row_off, window.col_off);
        let gt = &self.0;
        GeoTransform([x, gt[1], gt[2], y, gt[4], gt[5]])
    }

    /// Footprint polygon of a `width` x `height` raster under this transform
    pub fn footprint(&self, width: usize, height: usize) -> Polygon<f64> {
        let (w, h) = (width as f64, height as f64);
        let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h), (0.0, 0.0)];
        let ring: Vec<Coord<f64>> = corners
            .iter()
            .map(|&(col, row)| {
                let (x, y) = self.apply(col, row);
                Coord { x, y }
            })
            .collect();
        Polygon::new(LineString::new(ring), vec![])
    }
}

/// Bounding box of a polygon as `minx miny maxx maxy`
pub fn bbox_string(polygon: &Polygon<f64>) -> String {
    match polygon.bounding_rect() {
        Some(rect) => format!(
            "{} {} {} {}",
            rect.min().x,
            rect.min().y,
            rect.max().x,
            rect.max().y
        ),
        None => String::new(),
    }
}

/// Union of all polygons; overlapping parts are merged
pub fn union_all<'a, I>(geometries: I) -> MultiPolygon<f64>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    geometries
        .into_iter()
        .filter(|geometry| !geometry.0.is_empty())
        .fold(MultiPolygon::new(vec![]), |acc, geometry| {
            if acc.0.is_empty() {
                geometry.clone()
            } else {
                acc.union(geometry)
            }
        })
}

/// Part of `geometry` inside the footprint
pub fn clip_to(geometry: &MultiPolygon<f64>, footprint: &Polygon<f64>) -> MultiPolygon<f64> {
    geometry.intersection(&MultiPolygon::new(vec![footprint.clone()]))
}

/// Convert map geometry into pixel space of a raster, clamped to its extent
pub fn geometry_to_pixels(
    geometry: &MultiPolygon<f64>,
    transform: &GeoTransform,
    width: usize,
    height: usize,
) -> Option<MultiPolygon<f64>> {
    // a degenerate transform has no pixel space
    transform.invert(0.0, 0.0)?;
    let (w, h) = (width as f64, height as f64);
    Some(geometry.map_coords(|coord| {
        let (col, row) = transform
            .invert(coord.x, coord.y)
            .unwrap_or((f64::NAN, f64::NAN));
        Coord {
            x: col.clamp(0.0, w),
            y: row.clamp(0.0, h),
        }
    }))
}

/// Exterior ring points of each polygon, without the closing point
pub fn exterior_points(polygon: &Polygon<f64>) -> Vec<(f64, f64)> {
    let coords: Vec<(f64, f64)> = polygon.exterior().coords().map(|c| (c.x, c.y)).collect();
    match (coords.first(), coords.last()) {
        (Some(first), Some(last)) if coords.len() > 1 && first == last => {
            coords[..coords.len() - 1].to_vec()
        }
        _ => coords,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area};

    fn transform() -> GeoTransform {
        GeoTransform::north_up(500_000.0, 4_000_000.0, 10.0)
    }

    #[test]
    fn test_xy_and_index_are_inverse() {
        let gt = transform();
        let (x, y) = gt.xy(7, 3);
        assert_eq!((x, y), (500_030.0, 3_999_930.0));
        assert_eq!(gt.index(x + 5.0, y - 5.0), Some((7, 3)));
    }

    #[test]
    fn test_degenerate_transform() {
        let gt = GeoTransform([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(gt.invert(1.0, 1.0), None);
        let square = MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)]]);
        assert!(geometry_to_pixels(&square, &gt, 10, 10).is_none());
    }

    #[test]
    fn test_window_transform_moves_origin() {
        let gt = transform();
        let chip = gt.window_transform(&Window::new(100, 50, 32, 32));
        assert_eq!(chip.xy(0, 0), gt.xy(50, 100));
        assert_eq!(chip.0[1], 10.0);
        assert_eq!(chip.0[5], -10.0);
    }

    #[test]
    fn test_footprint_area() {
        let footprint = transform().footprint(4, 3);
        assert_eq!(footprint.unsigned_area(), 40.0 * 30.0);
    }

    #[test]
    fn test_geometry_to_pixels_clamps() {
        let gt = transform();
        let (x0, y0) = gt.xy(0, 0);
        // spans pixels 2..6 horizontally and reaches beyond the top edge
        let geometry = MultiPolygon::new(vec![polygon![
            (x: x0 + 20.0, y: y0 + 50.0),
            (x: x0 + 60.0, y: y0 + 50.0),
            (x: x0 + 60.0, y: y0 - 40.0),
            (x: x0 + 20.0, y: y0 - 40.0),
        ]]);
        let pixels = geometry_to_pixels(&geometry, &gt, 5, 5).unwrap();
        let points = exterior_points(&pixels.0[0]);
        assert_eq!(points[0], (2.0, 0.0));
        assert_eq!(points[1], (5.0, 0.0));
        assert_eq!(points[2], (5.0, 4.0));
    }

    #[test]
    fn test_union_and_clip() {
        let a = MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)]]);
        let b = MultiPolygon::new(vec![polygon![(x: 1.0, y: 0.0), (x: 3.0, y: 0.0), (x: 3.0, y: 2.0), (x: 1.0, y: 2.0)]]);
        let c = MultiPolygon::new(vec![polygon![(x: 10.0, y: 10.0), (x: 11.0, y: 10.0), (x: 11.0, y: 11.0), (x: 10.0, y: 11.0)]]);

        let merged = union_all([&a, &b, &c]);
        assert_eq!(merged.0.len(), 2);
        assert!((merged.unsigned_area() - 7.0).abs() < 1e-9);

        let window = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let clipped = clip_to(&merged, &window);
        assert!((clipped.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bbox_string() {
        let square = polygon![(x: 1.0, y: 2.0), (x: 3.0, y: 2.0), (x: 3.0, y: 5.0), (x: 1.0, y: 5.0)];
        assert_eq!(bbox_string(&square), "1 2 3 5");
    }
}
