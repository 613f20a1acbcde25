use std::sync::Arc;

use serde::Serialize;
use swf::CharacterId;
use swf_derive::Definition;

use crate::movie::Timeline;

/// Anything defined in a movie's dictionary under a character id.
pub trait Definition {
    fn id(&self) -> CharacterId;
}

/// Shared handle to a defined character. Handles may outlive the dictionary
/// that produced them.
pub type Resource = Arc<Character>;

#[derive(Debug)]
pub enum Character {
    Shape(ShapeDefinition),
    Sprite(SpriteDefinition),
    Font(FontDefinition),
    Sound(SoundDefinition),
    Bitmap(BitmapDefinition),
    BinaryData(BinaryDataDefinition),
    Button(ButtonDefinition),
    /// A definition the interpreter recognises but does not decode.
    Opaque(OpaqueDefinition),
}

impl Character {
    pub fn id(&self) -> CharacterId {
        match self {
            Character::Shape(shape) => shape.id(),
            Character::Sprite(sprite) => sprite.id(),
            Character::Font(font) => font.id(),
            Character::Sound(sound) => sound.id(),
            Character::Bitmap(bitmap) => bitmap.id(),
            Character::BinaryData(binary_data) => binary_data.id(),
            Character::Button(button) => button.id(),
            Character::Opaque(opaque) => opaque.id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Character::Shape(_) => "shape",
            Character::Sprite(_) => "sprite",
            Character::Font(_) => "font",
            Character::Sound(_) => "sound",
            Character::Bitmap(_) => "bitmap",
            Character::BinaryData(_) => "binary_data",
            Character::Button(_) => "button",
            Character::Opaque(_) => "opaque",
        }
    }

    pub fn as_sprite(&self) -> Option<&SpriteDefinition> {
        match self {
            Character::Sprite(sprite) => Some(sprite),
            _ => None,
        }
    }
}

/// 图形边界，单位像素
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bounds {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl From<&swf::Rectangle<swf::Twips>> for Bounds {
    fn from(rect: &swf::Rectangle<swf::Twips>) -> Self {
        Self {
            x_min: rect.x_min.to_pixels() as f32,
            y_min: rect.y_min.to_pixels() as f32,
            x_max: rect.x_max.to_pixels() as f32,
            y_max: rect.y_max.to_pixels() as f32,
        }
    }
}

#[derive(Debug, Definition)]
pub struct ShapeDefinition {
    pub id: CharacterId,
    pub version: u8,
    pub bounds: Bounds,
    pub records: usize,
}

/// An embedded sub-timeline, fully parsed with its own frames.
#[derive(Debug, Definition)]
pub struct SpriteDefinition {
    pub id: CharacterId,
    /// Frame count the sprite header advertises.
    pub num_frames: u16,
    pub timeline: Arc<Timeline>,
}

#[derive(Debug, Definition)]
pub struct FontDefinition {
    pub id: CharacterId,
    pub name: String,
    pub glyphs: usize,
}

#[derive(Debug, Definition)]
pub struct SoundDefinition {
    pub id: CharacterId,
    pub sample_rate: u16,
    pub is_stereo: bool,
    pub num_samples: u32,
}

#[derive(Debug, Definition)]
pub struct BitmapDefinition {
    pub id: CharacterId,
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Definition)]
pub struct BinaryDataDefinition {
    pub id: CharacterId,
    pub data: Vec<u8>,
}

#[derive(Debug, Definition)]
pub struct ButtonDefinition {
    pub id: CharacterId,
    pub records: usize,
}

#[derive(Debug, Definition)]
pub struct OpaqueDefinition {
    pub id: CharacterId,
    pub tag_code: u16,
}
