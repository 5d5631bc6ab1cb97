//! Remembered star positions.

use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Positions within this many pixels on both axes are the same bookmark.
pub const BOOKMARK_TOLERANCE: f64 = 6.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmarks {
    positions: Vec<Position>,
    pub visible: bool,
}

impl Bookmarks {
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            visible: true,
        }
    }

    fn find(&self, pos: Position) -> Option<usize> {
        self.positions.iter().position(|b| {
            (b.x - pos.x).abs() <= BOOKMARK_TOLERANCE && (b.y - pos.y).abs() <= BOOKMARK_TOLERANCE
        })
    }

    /// Remove the bookmark near `pos`, or add one if there is none.
    pub fn toggle(&mut self, pos: Position) {
        match self.find(pos) {
            Some(idx) => {
                self.positions.remove(idx);
            }
            None => self.positions.push(pos),
        }
    }

    /// Bookmark `pos`, replacing a nearby bookmark.
    pub fn add(&mut self, pos: Position) {
        if let Some(idx) = self.find(pos) {
            self.positions.remove(idx);
        }
        self.positions.push(pos);
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl Default for Bookmarks {
    fn default() -> Self {
        Self::new()
    }
}
