// SPDX-License-Identifier: CEPL-1.0
use winit::event::{ElementState, MouseButton};
use winit::keyboard::KeyCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Press,
    Release,
    Repeat,
}

impl Action {
    pub fn from_winit(state: ElementState, repeat: bool) -> Self {
        match (state, repeat) {
            (ElementState::Pressed, false) => Action::Press,
            (ElementState::Pressed, true) => Action::Repeat,
            (ElementState::Released, _) => Action::Release,
        }
    }
}

/// Keys and mouse buttons share one parsing path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonCode {
    Key(KeyCode),
    Mouse(MouseButton),
}

/// What the loop should do after a button event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputCommand {
    None,
    Stop,
}

#[derive(Debug, Default)]
pub struct InputState {
    cursor: Option<(f64, f64)>,
    last_button: Option<(ButtonCode, Action)>,
}

impl InputState {
    /// Escape stops the loop regardless of action; everything else is only recorded.
    pub fn parse_button(&mut self, code: ButtonCode, action: Action) -> InputCommand {
        self.last_button = Some((code, action));
        match code {
            ButtonCode::Key(KeyCode::Escape) => InputCommand::Stop,
            _ => InputCommand::None,
        }
    }

    pub fn parse_cursor(&mut self, x: f64, y: f64) {
        self.cursor = Some((x, y));
    }

    pub fn cursor(&self) -> Option<(f64, f64)> {
        self.cursor
    }

    pub fn last_button(&self) -> Option<(ButtonCode, Action)> {
        self.last_button
    }
}
