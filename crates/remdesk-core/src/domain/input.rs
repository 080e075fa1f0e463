//! Input events a user pushes into an active session.
//!
//! Input is best-effort: a driver that is not connected drops it silently.
//! How each variant is encoded on the wire is entirely up to the driver.

use serde::{Deserialize, Serialize};

/// Mouse button involved in a pointer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerButton {
    Left,
    Right,
    Middle,
}

/// One unit of user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    /// Text typed on the keyboard.
    KeyboardText(String),
    /// Pointer moved to `(x, y)` in remote-screen coordinates; `click` is set
    /// when the move ends in a press of `button`.
    Pointer {
        x: i32,
        y: i32,
        button: Option<PointerButton>,
        click: bool,
    },
    /// Raw bytes written to a terminal channel (SSH).
    TerminalBytes(Vec<u8>),
}

impl InputEvent {
    /// Pointer move with no button activity.
    pub fn pointer_move(x: i32, y: i32) -> Self {
        InputEvent::Pointer {
            x,
            y,
            button: None,
            click: false,
        }
    }

    /// Left click at `(x, y)`.
    pub fn click(x: i32, y: i32) -> Self {
        InputEvent::Pointer {
            x,
            y,
            button: Some(PointerButton::Left),
            click: true,
        }
    }

    /// Short description used in log lines; never includes typed text.
    pub fn kind(&self) -> &'static str {
        match self {
            InputEvent::KeyboardText(_) => "keyboard",
            InputEvent::Pointer { click: true, .. } => "click",
            InputEvent::Pointer { .. } => "pointer",
            InputEvent::TerminalBytes(_) => "terminal",
        }
    }
}
