//! Layer and outline collaborators
//!
//! Slicing and contour extraction happen elsewhere. The motion compiler
//! only asks a [`LayerSource`] which material sits at a point of a layer
//! and an [`OutlineSource`] for the polylines to trace on it.

use crate::arc::EMPTY_MATERIAL;

/// Material grid per print layer
pub trait LayerSource: Send {
    /// Layers to print
    fn layer_count(&self) -> usize;

    /// Material at `(x_mm, y_mm)` of `layer`, measured from the platform
    /// centre; 0 for empty
    fn material_at(&self, layer: usize, x_mm: f64, y_mm: f64) -> u8;
}

/// A point in platform polar coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarPoint {
    /// Distance from the platform centre
    pub radius_mm: f64,
    /// Angle in radians, clockwise from the platform zero
    pub angle: f64,
}

impl PolarPoint {
    pub fn new(radius_mm: f64, angle: f64) -> Self {
        Self { radius_mm, angle }
    }

    /// Straight-line distance to `other`
    pub fn distance_to(&self, other: &PolarPoint) -> f64 {
        let (ax, ay) = (self.radius_mm * self.angle.cos(), self.radius_mm * self.angle.sin());
        let (bx, by) = (
            other.radius_mm * other.angle.cos(),
            other.radius_mm * other.angle.sin(),
        );
        (ax - bx).hypot(ay - by)
    }
}

/// An ordered run of points traced in one material
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub material: u8,
    pub points: Vec<PolarPoint>,
}

/// Polylines per layer
pub trait OutlineSource: Send {
    /// Outlines to trace on `layer`, in trace order
    fn outlines(&self, layer: usize) -> Vec<Polyline>;
}

/// One layer of material on a square voxel grid centred on the platform
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialGrid {
    width: usize,
    height: usize,
    pitch_mm: f64,
    cells: Vec<u8>,
}

impl MaterialGrid {
    /// Empty grid of `width` x `height` voxels
    pub fn new(width: usize, height: usize, pitch_mm: f64) -> Self {
        Self {
            width,
            height,
            pitch_mm,
            cells: vec![EMPTY_MATERIAL; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Material of voxel `(col, row)`; empty outside the grid
    pub fn get(&self, col: usize, row: usize) -> u8 {
        if col < self.width && row < self.height {
            self.cells[row * self.width + col]
        } else {
            EMPTY_MATERIAL
        }
    }

    /// Set voxel `(col, row)`; ignored outside the grid
    pub fn set(&mut self, col: usize, row: usize, material: u8) {
        if col < self.width && row < self.height {
            self.cells[row * self.width + col] = material;
        }
    }

    /// Material at a point measured from the grid centre
    pub fn material_at(&self, x_mm: f64, y_mm: f64) -> u8 {
        let col = x_mm / self.pitch_mm + self.width as f64 / 2.0;
        let row = y_mm / self.pitch_mm + self.height as f64 / 2.0;
        if col < 0.0 || row < 0.0 {
            return EMPTY_MATERIAL;
        }
        self.get(col as usize, row as usize)
    }
}

/// A stack of grids, one per layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridStack {
    layers: Vec<MaterialGrid>,
}

impl GridStack {
    pub fn new(layers: Vec<MaterialGrid>) -> Self {
        Self { layers }
    }

    pub fn push(&mut self, layer: MaterialGrid) {
        self.layers.push(layer);
    }
}

impl LayerSource for GridStack {
    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn material_at(&self, layer: usize, x_mm: f64, y_mm: f64) -> u8 {
        self.layers
            .get(layer)
            .map_or(EMPTY_MATERIAL, |grid| grid.material_at(x_mm, y_mm))
    }
}

/// A material band between two radii
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingBand {
    pub inner_mm: f64,
    pub outer_mm: f64,
    pub material: u8,
}

/// Synthetic part made of concentric bands, identical on every layer
///
/// Used for dry runs of the pipeline without a slicer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcentricRings {
    pub layers: usize,
    pub bands: Vec<RingBand>,
}

impl ConcentricRings {
    /// Two bands, one per material, for a two-extruder machine
    pub fn two_materials(layers: usize) -> Self {
        Self {
            layers,
            bands: vec![
                RingBand {
                    inner_mm: 5.0,
                    outer_mm: 8.0,
                    material: 1,
                },
                RingBand {
                    inner_mm: 10.0,
                    outer_mm: 12.0,
                    material: 2,
                },
            ],
        }
    }
}

impl LayerSource for ConcentricRings {
    fn layer_count(&self) -> usize {
        self.layers
    }

    fn material_at(&self, layer: usize, x_mm: f64, y_mm: f64) -> u8 {
        if layer >= self.layers {
            return EMPTY_MATERIAL;
        }
        let radius = x_mm.hypot(y_mm);
        self.bands
            .iter()
            .find(|band| radius >= band.inner_mm && radius < band.outer_mm)
            .map_or(EMPTY_MATERIAL, |band| band.material)
    }
}

/// Outline source with a fixed set of polylines on every layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixedOutlines {
    pub polylines: Vec<Polyline>,
}

impl OutlineSource for FixedOutlines {
    fn outlines(&self, _layer: usize) -> Vec<Polyline> {
        self.polylines.clone()
    }
}
