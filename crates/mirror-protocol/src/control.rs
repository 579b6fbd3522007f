//! Control-channel messages sent to the mirrored device
//!
//! Every message has a fixed big-endian layout starting with a one-byte
//! message type.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, ProtocolResult};

/// Control message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ControlMessageType {
    InjectTouchEvent = 2,
    Scroll = 3,
    BackOrScreenOn = 4,
    ExpandNotificationPanel = 5,
    ExpandSettingsPanel = 6,
    SetScreenPowerMode = 10,
}

/// Motion event action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MotionAction {
    Down = 0,
    Up = 1,
    Move = 2,
}

/// Key event action used by back-or-screen-on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyAction {
    Down = 0,
    Up = 1,
}

/// Screen power mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScreenPowerMode {
    Off = 0,
    Normal = 2,
}

/// Motion event button state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionButtons {
    pub primary: bool,
    pub secondary: bool,
    pub tertiary: bool,
}

impl MotionButtons {
    pub const PRIMARY: u32 = 1;
    pub const SECONDARY: u32 = 2;
    pub const TERTIARY: u32 = 4;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn with_secondary(mut self) -> Self {
        self.secondary = true;
        self
    }

    pub fn with_tertiary(mut self) -> Self {
        self.tertiary = true;
        self
    }

    /// Button mask as sent on the wire
    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.primary {
            bits |= Self::PRIMARY;
        }
        if self.secondary {
            bits |= Self::SECONDARY;
        }
        if self.tertiary {
            bits |= Self::TERTIARY;
        }
        bits
    }
}

/// Pointer identity for touch injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerId {
    /// Synthesized mouse pointer
    Mouse,
    /// Real touch pointer (finger index)
    Touch(u32),
}

impl PointerId {
    /// Wire value of the synthesized mouse pointer
    pub const MOUSE_SENTINEL: i64 = -1;

    pub fn wire_value(self) -> i64 {
        match self {
            Self::Mouse => Self::MOUSE_SENTINEL,
            Self::Touch(id) => i64::from(id),
        }
    }
}

/// Point on the device screen, with the screen size it was computed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub screen_width: u16,
    pub screen_height: u16,
}

impl Position {
    pub fn new(x: i32, y: i32, screen_width: u16, screen_height: u16) -> Self {
        Self {
            x,
            y,
            screen_width,
            screen_height,
        }
    }

    fn put(&self, dst: &mut BytesMut) {
        dst.put_i32(self.x);
        dst.put_i32(self.y);
        dst.put_u16(self.screen_width);
        dst.put_u16(self.screen_height);
    }
}

/// Control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    InjectTouchEvent {
        action: MotionAction,
        pointer_id: PointerId,
        position: Position,
        /// 0.0-1.0
        pressure: f32,
        action_button: MotionButtons,
        buttons: MotionButtons,
    },
    Scroll {
        position: Position,
        /// -1.0-1.0
        hscroll: f32,
        /// -1.0-1.0
        vscroll: f32,
        buttons: MotionButtons,
    },
    BackOrScreenOn {
        action: KeyAction,
    },
    ExpandNotificationPanel,
    ExpandSettingsPanel,
    SetScreenPowerMode(ScreenPowerMode),
}

impl ControlMessage {
    pub fn message_type(&self) -> ControlMessageType {
        match self {
            Self::InjectTouchEvent { .. } => ControlMessageType::InjectTouchEvent,
            Self::Scroll { .. } => ControlMessageType::Scroll,
            Self::BackOrScreenOn { .. } => ControlMessageType::BackOrScreenOn,
            Self::ExpandNotificationPanel => ControlMessageType::ExpandNotificationPanel,
            Self::ExpandSettingsPanel => ControlMessageType::ExpandSettingsPanel,
            Self::SetScreenPowerMode(_) => ControlMessageType::SetScreenPowerMode,
        }
    }

    /// Size of the message on the wire
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::InjectTouchEvent { .. } => 32,
            Self::Scroll { .. } => 21,
            Self::BackOrScreenOn { .. } | Self::SetScreenPowerMode(_) => 2,
            Self::ExpandNotificationPanel | Self::ExpandSettingsPanel => 1,
        }
    }

    /// Append the message to `dst`; nothing is written if a value is out of range
    pub fn encode(&self, dst: &mut BytesMut) -> ProtocolResult<()> {
        let (pressure, (hscroll, vscroll)) = match self {
            Self::InjectTouchEvent { pressure, .. } => {
                (to_u16_fixed_point("pressure", *pressure)?, (0, 0))
            }
            Self::Scroll { hscroll, vscroll, .. } => (
                0,
                (
                    to_i16_fixed_point("hscroll", *hscroll)?,
                    to_i16_fixed_point("vscroll", *vscroll)?,
                ),
            ),
            _ => (0, (0, 0)),
        };

        dst.reserve(self.encoded_len());
        dst.put_u8(self.message_type() as u8);

        match self {
            Self::InjectTouchEvent {
                action,
                pointer_id,
                position,
                action_button,
                buttons,
                ..
            } => {
                dst.put_u8(*action as u8);
                dst.put_i64(pointer_id.wire_value());
                position.put(dst);
                dst.put_u16(pressure);
                dst.put_u32(action_button.bits());
                dst.put_u32(buttons.bits());
            }
            Self::Scroll { position, buttons, .. } => {
                position.put(dst);
                dst.put_i16(hscroll);
                dst.put_i16(vscroll);
                dst.put_u32(buttons.bits());
            }
            Self::BackOrScreenOn { action } => dst.put_u8(*action as u8),
            Self::SetScreenPowerMode(mode) => dst.put_u8(*mode as u8),
            Self::ExpandNotificationPanel | Self::ExpandSettingsPanel => {}
        }

        Ok(())
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> ProtocolResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Map [0, 1] onto an unsigned 16-bit fixed point value
fn to_u16_fixed_point(field: &'static str, value: f32) -> ProtocolResult<u16> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ProtocolError::ValueOutOfRange {
            field,
            value: value as f64,
        });
    }
    let scaled = (value * 65536.0) as u32;
    Ok(scaled.min(0xFFFF) as u16)
}

/// Map [-1, 1] onto a signed 16-bit fixed point value
fn to_i16_fixed_point(field: &'static str, value: f32) -> ProtocolResult<i16> {
    if !(-1.0..=1.0).contains(&value) {
        return Err(ProtocolError::ValueOutOfRange {
            field,
            value: value as f64,
        });
    }
    let scaled = (value * 32768.0) as i32;
    Ok(scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
}
