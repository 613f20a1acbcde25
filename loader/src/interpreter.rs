pub mod decode;

use std::sync::{Arc, Weak};

use swf::{CharacterId, Depth, PlaceObjectAction, Tag, TagCode};
use tracing::{error, info, trace, warn};

use crate::{
    character::{
        BinaryDataDefinition, BitmapDefinition, ButtonDefinition, Character, FontDefinition,
        OpaqueDefinition, Resource, ShapeDefinition, SoundDefinition, SpriteDefinition,
    },
    config::ResolvePolicy,
    error::InterpretError,
    import,
    library::Library,
    movie::{MovieContents, MovieDefinition, ProgressSnapshot, Timeline, TimelineBuilder},
    tag_utils::TagRecord,
};

/// Turns one tag into dictionary, export and timeline updates.
///
/// Called on the loader thread for every tag except ShowFrame and End, in
/// stream order. An error skips the tag; it never stops the stream.
pub trait TagInterpreter: Send {
    fn interpret(
        &mut self,
        code: TagCode,
        record: &TagRecord<'_>,
        context: &mut TagContext<'_>,
    ) -> Result<(), InterpretError>;
}

/// What a [`TagInterpreter`] may touch while handling a tag.
pub struct TagContext<'a> {
    contents: &'a MovieContents,
    timeline: &'a mut TimelineBuilder,
}

impl<'a> TagContext<'a> {
    pub(crate) fn new(contents: &'a MovieContents, timeline: &'a mut TimelineBuilder) -> Self {
        Self { contents, timeline }
    }

    pub fn url(&self) -> &str {
        self.contents.movie().url()
    }

    pub fn version(&self) -> u8 {
        self.contents.movie().version()
    }

    pub fn encoding(&self) -> &'static swf::Encoding {
        self.contents.movie().encoding()
    }

    /// False if `id` was already defined; the earlier definition stays.
    pub fn define(&mut self, id: CharacterId, resource: Resource) -> bool {
        self.contents.dictionary().define(id, resource)
    }

    pub fn lookup(&self, id: CharacterId) -> Option<Resource> {
        self.contents.dictionary().lookup(id)
    }

    /// Exports the character currently defined as `id` under `name`.
    pub fn export(&mut self, name: &str, id: CharacterId) -> bool {
        match self.lookup(id) {
            Some(resource) => {
                self.export_resource(name, id, resource);
                true
            }
            None => {
                warn!(
                    "{}: export `{}` refers to undefined character {}",
                    self.url(),
                    name,
                    id
                );
                false
            }
        }
    }

    pub fn export_resource(&mut self, name: &str, id: CharacterId, resource: Resource) {
        self.contents.exports().export(name, id, resource);
    }

    pub fn add_slot(&mut self, depth: Depth) {
        self.timeline.add_slot(depth);
    }

    pub fn remove_slot(&mut self, depth: Depth) {
        self.timeline.remove_slot(depth);
    }

    pub fn add_frame_label(&mut self, label: &str) {
        self.timeline.add_frame_label(label);
    }

    /// 1-based number of the frame the current tag belongs to.
    pub fn frame_in_progress(&self) -> usize {
        self.timeline.frame_in_progress()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.contents.progress().snapshot()
    }

    pub fn add_import_source(&mut self, source: &Arc<MovieDefinition>) {
        self.contents.add_import_source(source);
    }
}

/// Places and removals, shared by the root timeline and sprite timelines.
trait DisplayList {
    fn add_slot(&mut self, depth: Depth);
    fn remove_slot(&mut self, depth: Depth);
    fn add_frame_label(&mut self, label: &str);
}

impl DisplayList for TimelineBuilder {
    fn add_slot(&mut self, depth: Depth) {
        TimelineBuilder::add_slot(self, depth)
    }
    fn remove_slot(&mut self, depth: Depth) {
        TimelineBuilder::remove_slot(self, depth)
    }
    fn add_frame_label(&mut self, label: &str) {
        TimelineBuilder::add_frame_label(self, label)
    }
}

impl DisplayList for TagContext<'_> {
    fn add_slot(&mut self, depth: Depth) {
        TagContext::add_slot(self, depth)
    }
    fn remove_slot(&mut self, depth: Depth) {
        TagContext::remove_slot(self, depth)
    }
    fn add_frame_label(&mut self, label: &str) {
        TagContext::add_frame_label(self, label)
    }
}

/// Applies a display list tag. Returns false for any other tag.
fn apply_display_tag(list: &mut impl DisplayList, tag: &Tag<'_>, encoding: &'static swf::Encoding) -> bool {
    match tag {
        Tag::PlaceObject(place_object) => {
            match place_object.action {
                PlaceObjectAction::Place(_) | PlaceObjectAction::Replace(_) => {
                    list.add_slot(place_object.depth)
                }
                // 仅修改已有对象的属性，深度不变
                PlaceObjectAction::Modify => {}
            }
            true
        }
        Tag::RemoveObject(remove_object) => {
            list.remove_slot(remove_object.depth);
            true
        }
        Tag::FrameLabel(frame_label) => {
            list.add_frame_label(&frame_label.label.to_string_lossy(encoding));
            true
        }
        _ => false,
    }
}

/// The standard interpreter: definitions, the display list, labels, exports
/// and imports.
///
/// Imports are only followed when the interpreter was given a [`Library`]
/// to load other movies from.
pub struct SwfTagInterpreter {
    policy: ResolvePolicy,
    library: Option<Weak<Library>>,
    jpeg_tables: Option<Vec<u8>>,
}

impl SwfTagInterpreter {
    pub fn new(policy: ResolvePolicy) -> Self {
        Self {
            policy,
            library: None,
            jpeg_tables: None,
        }
    }

    pub fn with_library(library: Weak<Library>, policy: ResolvePolicy) -> Self {
        Self {
            policy,
            library: Some(library),
            jpeg_tables: None,
        }
    }

    fn define(context: &mut TagContext<'_>, character: Character) {
        let id = character.id();
        trace!("{}: defining {} {}", context.url(), character.kind(), id);
        context.define(id, Arc::new(character));
    }

    fn define_bitmap(
        context: &mut TagContext<'_>,
        id: CharacterId,
        dimensions: Result<(u16, u16), decode::Error>,
    ) -> Result<(), InterpretError> {
        let (width, height) = dimensions.map_err(|source| InterpretError::Bitmap { id, source })?;
        Self::define(context, Character::Bitmap(BitmapDefinition { id, width, height }));
        Ok(())
    }

    fn define_sprite(context: &mut TagContext<'_>, sprite: swf::Sprite<'_>) {
        let encoding = context.encoding();
        let timeline = Arc::new(Timeline::new());
        let mut builder = TimelineBuilder::new(timeline.clone());

        for tag in &sprite.tags {
            match tag {
                Tag::ShowFrame => {
                    builder.close_frame();
                }
                tag => {
                    apply_display_tag(&mut builder, tag, encoding);
                }
            }
        }

        if builder.has_pending_changes() {
            warn!(
                "{}: sprite {} has control tags NOT followed by a SHOWFRAME tag",
                context.url(),
                sprite.id
            );
        }
        if timeline.frame_count() < sprite.num_frames as usize {
            warn!(
                "{}: sprite {} advertises {} frames but has {}",
                context.url(),
                sprite.id,
                sprite.num_frames,
                timeline.frame_count()
            );
        }

        Self::define(
            context,
            Character::Sprite(SpriteDefinition {
                id: sprite.id,
                num_frames: sprite.num_frames,
                timeline,
            }),
        );
    }

    fn import_assets(
        &self,
        context: &mut TagContext<'_>,
        url: &str,
        imports: &[swf::ExportedAsset<'_>],
    ) -> Result<(), InterpretError> {
        let Some(library) = self.library.as_ref().and_then(Weak::upgrade) else {
            warn!(
                "{}: ignoring import of {} symbols from {}, no library to load it from",
                context.url(),
                imports.len(),
                url
            );
            return Ok(());
        };

        let source = match library.load(url) {
            Ok(source) => source,
            Err(err) => {
                error!("{}: can't import symbols from {}: {}", context.url(), url, err);
                return Ok(());
            }
        };

        let encoding = context.encoding();
        let imports: Vec<_> = imports
            .iter()
            .map(|asset| (asset.id, asset.name.to_string_lossy(encoding)))
            .collect();
        let imported = import::import_resources(context, &source, &imports, &self.policy);
        info!(
            "{}: imported {}/{} symbols from {}",
            context.url(),
            imported,
            imports.len(),
            url
        );
        Ok(())
    }
}

impl TagInterpreter for SwfTagInterpreter {
    fn interpret(
        &mut self,
        code: TagCode,
        record: &TagRecord<'_>,
        context: &mut TagContext<'_>,
    ) -> Result<(), InterpretError> {
        // 文本、视频流等只记录 id，不解码
        if is_opaque_definition(code) {
            let id = record
                .body
                .get(..2)
                .map(|id| CharacterId::from_le_bytes([id[0], id[1]]))
                .ok_or(InterpretError::MissingId(record.code))?;
            Self::define(context, Character::Opaque(OpaqueDefinition { id, tag_code: record.code }));
            return Ok(());
        }

        let tag = record.decode(context.version())?;
        let encoding = context.encoding();

        if apply_display_tag(context, &tag, encoding) {
            return Ok(());
        }

        match tag {
            Tag::DefineShape(shape) => Self::define(
                context,
                Character::Shape(ShapeDefinition {
                    id: shape.id,
                    version: shape.version,
                    bounds: (&shape.shape_bounds).into(),
                    records: shape.shape.len(),
                }),
            ),
            Tag::DefineSprite(sprite) => Self::define_sprite(context, sprite),
            Tag::DefineFont(font) => Self::define(
                context,
                Character::Font(FontDefinition {
                    id: font.id,
                    name: String::new(),
                    glyphs: font.glyphs.len(),
                }),
            ),
            Tag::DefineFont2(font) => Self::define(
                context,
                Character::Font(FontDefinition {
                    id: font.id,
                    name: font.name.to_string_lossy(encoding),
                    glyphs: font.glyphs.len(),
                }),
            ),
            Tag::DefineSound(sound) => Self::define(
                context,
                Character::Sound(SoundDefinition {
                    id: sound.id,
                    sample_rate: sound.format.sample_rate,
                    is_stereo: sound.format.is_stereo,
                    num_samples: sound.num_samples,
                }),
            ),
            Tag::DefineBinaryData(binary_data) => Self::define(
                context,
                Character::BinaryData(BinaryDataDefinition {
                    id: binary_data.id,
                    data: binary_data.data.to_vec(),
                }),
            ),
            Tag::DefineButton(button) | Tag::DefineButton2(button) => Self::define(
                context,
                Character::Button(ButtonDefinition {
                    id: button.id,
                    records: button.records.len(),
                }),
            ),
            Tag::DefineMorphShape(morph_shape) => Self::define(
                context,
                Character::Opaque(OpaqueDefinition {
                    id: morph_shape.id,
                    tag_code: record.code,
                }),
            ),
            Tag::JpegTables(jpeg_tables) => {
                // 每个影片只允许一个 JPEGTables
                if self.jpeg_tables.is_some() {
                    warn!("{}: ignoring duplicate JPEGTables tag", context.url());
                } else {
                    self.jpeg_tables = Some(jpeg_tables.to_vec());
                }
            }
            Tag::DefineBits { id, jpeg_data } => {
                let dimensions = decode::define_bits_dimensions(self.jpeg_tables.as_deref(), jpeg_data);
                Self::define_bitmap(context, id, dimensions)?;
            }
            Tag::DefineBitsJpeg2 { id, jpeg_data } => {
                Self::define_bitmap(context, id, decode::bitmap_dimensions(jpeg_data))?;
            }
            Tag::DefineBitsJpeg3(jpeg) => {
                Self::define_bitmap(context, jpeg.id, decode::bitmap_dimensions(jpeg.data))?;
            }
            Tag::DefineBitsLossless(lossless) => Self::define(
                context,
                Character::Bitmap(BitmapDefinition {
                    id: lossless.id,
                    width: lossless.width,
                    height: lossless.height,
                }),
            ),
            Tag::ExportAssets(exports) => {
                for asset in &exports {
                    context.export(&asset.name.to_string_lossy(encoding), asset.id);
                }
            }
            Tag::ImportAssets { url, imports } => {
                self.import_assets(context, &url.to_string_lossy(encoding), &imports)?;
            }
            _ => trace!("{}: no handler for {:?}", context.url(), code),
        }
        Ok(())
    }
}

/// Definition tags bound by id only.
fn is_opaque_definition(code: TagCode) -> bool {
    matches!(
        code,
        TagCode::DefineText
            | TagCode::DefineText2
            | TagCode::DefineEditText
            | TagCode::DefineVideoStream
            | TagCode::DefineFont4
    )
}
