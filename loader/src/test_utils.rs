//! Hand-assembled uncompressed movies for tests.

use swf::{CharacterId, Depth};

/// A tag with its record header: the short form below 63 bytes of body,
/// the long form otherwise.
pub fn tag_bytes(code: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 6);
    if body.len() < 0x3f {
        out.extend(((code << 6) | body.len() as u16).to_le_bytes());
    } else {
        out.extend(((code << 6) | 0x3f).to_le_bytes());
        out.extend((body.len() as u32).to_le_bytes());
    }
    out.extend_from_slice(body);
    out
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn asset_list(out: &mut Vec<u8>, assets: &[(CharacterId, &str)]) {
    out.extend((assets.len() as u16).to_le_bytes());
    for (id, name) in assets {
        out.extend(id.to_le_bytes());
        push_str(out, name);
    }
}

#[derive(Debug, Clone)]
pub struct SwfBuilder {
    version: u8,
    num_frames: u16,
    tags: Vec<u8>,
}

impl SwfBuilder {
    pub fn new(version: u8, num_frames: u16) -> Self {
        Self {
            version,
            num_frames,
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, code: u16, body: &[u8]) -> Self {
        self.tags.extend(tag_bytes(code, body));
        self
    }

    /// Bytes appended as-is, without a tag header.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.tags.extend_from_slice(bytes);
        self
    }

    pub fn show_frame(self) -> Self {
        self.tag(1, &[])
    }

    pub fn end(self) -> Self {
        self.tag(0, &[])
    }

    pub fn define_binary_data(self, id: CharacterId, data: &[u8]) -> Self {
        let mut body = id.to_le_bytes().to_vec();
        body.extend([0; 4]);
        body.extend_from_slice(data);
        self.tag(87, &body)
    }

    /// PlaceObject2 with only a character id.
    pub fn place_object(self, depth: Depth, id: CharacterId) -> Self {
        let mut body = vec![0x02];
        body.extend(depth.to_le_bytes());
        body.extend(id.to_le_bytes());
        self.tag(26, &body)
    }

    /// RemoveObject2.
    pub fn remove_object(self, depth: Depth) -> Self {
        self.tag(28, &depth.to_le_bytes())
    }

    pub fn frame_label(self, label: &str) -> Self {
        let mut body = Vec::new();
        push_str(&mut body, label);
        self.tag(43, &body)
    }

    pub fn export_assets(self, assets: &[(CharacterId, &str)]) -> Self {
        let mut body = Vec::new();
        asset_list(&mut body, assets);
        self.tag(56, &body)
    }

    pub fn import_assets(self, url: &str, assets: &[(CharacterId, &str)]) -> Self {
        let mut body = Vec::new();
        push_str(&mut body, url);
        asset_list(&mut body, assets);
        self.tag(57, &body)
    }

    /// DefineSprite around the tags of `inner`, which should end with End.
    pub fn define_sprite(self, id: CharacterId, inner: SwfBuilder) -> Self {
        let mut body = id.to_le_bytes().to_vec();
        body.extend(inner.num_frames.to_le_bytes());
        body.extend(inner.tags);
        self.tag(39, &body)
    }

    /// The complete `FWS` file.
    pub fn build(self) -> Vec<u8> {
        // 舞台矩形 nbits=0 只占一个字节，帧率 24.0
        let body_len = 1 + 2 + 2 + self.tags.len();
        let mut out = Vec::with_capacity(8 + body_len);
        out.extend_from_slice(b"FWS");
        out.push(self.version);
        out.extend(((8 + body_len) as u32).to_le_bytes());
        out.push(0x00);
        out.extend([0x00, 24]);
        out.extend(self.num_frames.to_le_bytes());
        out.extend(self.tags);
        out
    }
}
