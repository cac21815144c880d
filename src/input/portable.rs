//! Cross-platform pointer injection using enigo.

use anyhow::{Context, Result};
use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};

use super::Pointer;
use crate::error::ActionError;

pub struct EnigoPointer {
    enigo: Enigo,
}

impl EnigoPointer {
    pub fn new() -> Result<Self> {
        let enigo = Enigo::new(&Settings::default()).context("failed to connect to input backend")?;
        Ok(Self { enigo })
    }
}

impl Pointer for EnigoPointer {
    fn position(&mut self) -> Result<(i32, i32), ActionError> {
        self.enigo
            .location()
            .context("reading pointer position")
            .map_err(ActionError::from_backend)
    }

    fn move_to(&mut self, x: i32, y: i32) -> Result<(), ActionError> {
        self.enigo
            .move_mouse(x, y, Coordinate::Abs)
            .with_context(|| format!("moving to ({}, {})", x, y))
            .map_err(ActionError::from_backend)
    }

    fn click(&mut self, x: i32, y: i32) -> Result<(), ActionError> {
        self.move_to(x, y)?;
        self.enigo
            .button(Button::Left, Direction::Click)
            .with_context(|| format!("clicking at ({}, {})", x, y))
            .map_err(ActionError::from_backend)
    }
}
