//! Map-drawing interaction as an explicit state machine.
//!
//! A session is either idle, collecting vertices for one layer, or waiting for a
//! single tap that sets the record's location pin. Finishing a drawing turns the
//! collected vertices into a [`Polygon`] with its area already computed.

use crate::geo::Coordinate;
use crate::models::{Classification, CropType, Polygon};

#[derive(Debug, Clone, PartialEq)]
pub enum DrawingState {
    Idle,
    Drawing {
        layer: Classification,
        points: Vec<Coordinate>,
    },
    PinDropping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TapOutcome {
    /// Vertex appended; carries the new vertex count.
    PointAdded(usize),
    PinDropped(Coordinate),
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    Completed(Polygon),
    /// Fewer than three vertices were collected; carries how many.
    Discarded(usize),
}

#[derive(Debug, Clone)]
pub struct DrawingSession {
    crop: CropType,
    state: DrawingState,
}

impl DrawingSession {
    /// The crop sets the colour theme for burn polygons.
    pub fn new(crop: CropType) -> Self {
        Self {
            crop,
            state: DrawingState::Idle,
        }
    }

    pub fn state(&self) -> &DrawingState {
        &self.state
    }

    pub fn crop(&self) -> CropType {
        self.crop
    }

    pub fn is_idle(&self) -> bool {
        self.state == DrawingState::Idle
    }

    /// Vertices collected so far in the active drawing.
    pub fn points(&self) -> &[Coordinate] {
        match &self.state {
            DrawingState::Drawing { points, .. } => points,
            _ => &[],
        }
    }

    /// Begins a fresh drawing on `layer`, dropping any in-progress vertices and pin mode.
    pub fn start_drawing(&mut self, layer: Classification) {
        self.state = DrawingState::Drawing {
            layer,
            points: Vec::new(),
        };
    }

    /// Switches to pin mode. An unfinished drawing is abandoned.
    pub fn start_pin_drop(&mut self) {
        if let DrawingState::Drawing { points, .. } = &self.state {
            tracing::debug!("Abandoning drawing with {} points for pin drop", points.len());
        }
        self.state = DrawingState::PinDropping;
    }

    pub fn handle_tap(&mut self, coordinate: Coordinate) -> TapOutcome {
        match &mut self.state {
            DrawingState::Drawing { points, .. } => {
                points.push(coordinate);
                TapOutcome::PointAdded(points.len())
            }
            DrawingState::PinDropping => {
                self.state = DrawingState::Idle;
                TapOutcome::PinDropped(coordinate)
            }
            DrawingState::Idle => TapOutcome::Ignored,
        }
    }

    /// Closes the active drawing. Always leaves the session idle.
    pub fn finish(&mut self) -> FinishOutcome {
        match std::mem::replace(&mut self.state, DrawingState::Idle) {
            DrawingState::Drawing { layer, points } => {
                let count = points.len();
                match Polygon::from_points(points, layer, layer.display_color(self.crop)) {
                    Some(polygon) => FinishOutcome::Completed(polygon),
                    None => FinishOutcome::Discarded(count),
                }
            }
            _ => FinishOutcome::Discarded(0),
        }
    }

    pub fn cancel(&mut self) {
        self.state = DrawingState::Idle;
    }
}
