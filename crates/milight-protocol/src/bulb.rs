//! Bulb command catalogue.
//!
//! The data bytes of a command frame depend on the bulb family addressed.
//! [`BulbCommand::data`] produces those bytes for a [`BulbType`]; the caller
//! stamps them into a frame with the session builders.
//!
//! Every command also belongs to a [`CommandKind`]. Two commands of the same
//! kind for the same zone are redundant: only the newest one needs to reach
//! the bridge, which is what [`category`] is used for.

use crate::error::{ProtocolError, ProtocolResult};

/// Largest brightness, saturation and colour temperature value.
pub const MAX_PERCENT: u8 = 100;

/// Bulb families addressed by the V6 bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulbType {
    /// The LED built into the iBox bridge.
    BridgeLamp,
    /// Legacy RGBW bulbs.
    Rgbw,
    /// RGB + cold/warm white bulbs.
    RgbCw,
}

impl BulbType {
    /// Type byte (`wb`) of command frames for this bulb family.
    pub fn type_byte(self) -> u8 {
        match self {
            BulbType::BridgeLamp => 0x00,
            BulbType::Rgbw => 0x07,
            BulbType::RgbCw => 0x08,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            BulbType::BridgeLamp => "bridge lamp",
            BulbType::Rgbw => "RGBW",
            BulbType::RgbCw => "RGBCW",
        }
    }
}

/// Commands understood by the bulbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulbCommand {
    /// Switch on.
    On,
    /// Switch off.
    Off,
    /// Night light mode.
    NightMode,
    /// Switch to white light.
    White,
    /// Absolute brightness 0..=100.
    Brightness(u8),
    /// Hue on the vendor colour wheel 0..=255.
    Hue(u8),
    /// Saturation 0..=100.
    Saturation(u8),
    /// Colour temperature 0 (warm) ..= 100 (cold).
    ColorTemperature(u8),
}

/// Groups commands that overwrite each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    /// On, off, night mode.
    Power = 1,
    /// Brightness.
    Brightness = 2,
    /// Hue and white mode.
    Color = 3,
    /// Saturation.
    Saturation = 4,
    /// Colour temperature.
    Temperature = 5,
}

/// Queue category of a command kind on a zone. Never zero.
pub fn category(bulb: BulbType, zone: u8, kind: CommandKind) -> u32 {
    (u32::from(bulb.type_byte()) << 16) | ((u32::from(zone) + 1) << 8) | kind as u32
}

fn percent(value: u8) -> ProtocolResult<u8> {
    if value > MAX_PERCENT {
        return Err(ProtocolError::ValueOutOfRange {
            value,
            max: MAX_PERCENT,
        });
    }
    Ok(value)
}

impl BulbCommand {
    /// Kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            BulbCommand::On | BulbCommand::Off | BulbCommand::NightMode => CommandKind::Power,
            BulbCommand::Brightness(_) => CommandKind::Brightness,
            BulbCommand::White | BulbCommand::Hue(_) => CommandKind::Color,
            BulbCommand::Saturation(_) => CommandKind::Saturation,
            BulbCommand::ColorTemperature(_) => CommandKind::Temperature,
        }
    }

    /// Name used in errors and log output.
    pub fn name(&self) -> &'static str {
        match self {
            BulbCommand::On => "on",
            BulbCommand::Off => "off",
            BulbCommand::NightMode => "night mode",
            BulbCommand::White => "white",
            BulbCommand::Brightness(_) => "brightness",
            BulbCommand::Hue(_) => "hue",
            BulbCommand::Saturation(_) => "saturation",
            BulbCommand::ColorTemperature(_) => "color temperature",
        }
    }

    /// Data bytes of this command for the given bulb family.
    pub fn data(&self, bulb: BulbType) -> ProtocolResult<Vec<u8>> {
        let unsupported = || ProtocolError::Unsupported {
            command: self.name(),
            bulb: bulb.name(),
        };

        let data = match (bulb, *self) {
            (BulbType::RgbCw, BulbCommand::On) => vec![0x04, 0x01],
            (BulbType::RgbCw, BulbCommand::Off) => vec![0x04, 0x02],
            (BulbType::RgbCw, BulbCommand::NightMode) => vec![0x04, 0x05],
            (BulbType::RgbCw, BulbCommand::White) => vec![0x05, 0x64],
            (BulbType::RgbCw, BulbCommand::Brightness(v)) => vec![0x03, percent(v)?],
            (BulbType::RgbCw, BulbCommand::Saturation(v)) => vec![0x02, percent(v)?],
            (BulbType::RgbCw, BulbCommand::ColorTemperature(v)) => vec![0x05, percent(v)?],

            (BulbType::Rgbw, BulbCommand::On) => vec![0x03, 0x01],
            (BulbType::Rgbw, BulbCommand::Off) => vec![0x03, 0x02],
            (BulbType::Rgbw, BulbCommand::NightMode) => vec![0x03, 0x06],
            (BulbType::Rgbw, BulbCommand::White) => vec![0x03, 0x05],
            (BulbType::Rgbw, BulbCommand::Brightness(v)) => vec![0x02, percent(v)?],

            (BulbType::BridgeLamp, BulbCommand::On) => vec![0x03, 0x03],
            (BulbType::BridgeLamp, BulbCommand::Off) => vec![0x03, 0x04],
            (BulbType::BridgeLamp, BulbCommand::White) => vec![0x03, 0x05],
            (BulbType::BridgeLamp, BulbCommand::Brightness(v)) => vec![0x02, percent(v)?],

            // The hue is repeated in all four argument bytes
            (_, BulbCommand::Hue(h)) => vec![0x01, h, h, h, h],

            _ => return Err(unsupported()),
        };
        Ok(data)
    }
}
