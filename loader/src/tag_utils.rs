use swf::{Fixed8, HeaderExt, Rectangle, Twips};
use tracing::{debug, warn};

use crate::error::LoadError;

pub type SwfStream<'a> = swf::read::Reader<'a>;

/// A movie whose header has been read and whose body has been decompressed,
/// ready for tag-by-tag loading.
#[derive(Debug)]
pub struct SwfMovie {
    url: String,

    /// The SWF header parsed from the data stream.
    header: HeaderExt,

    /// Uncompressed tag data following the header.
    data: Vec<u8>,

    /// The suggest encoding for this SWF.
    encoding: &'static swf::Encoding,

    /// The compressed length of the entire datastream
    compressed_len: usize,

    /// Frame count to load against. The header's count, but at least one.
    num_frames: u16,
}

impl SwfMovie {
    /// Reads the header, attaching decompression as needed. Fails if the data
    /// does not start with a valid SWF header.
    pub fn from_data(url: &str, swf_data: &[u8]) -> Result<Self, LoadError> {
        let compressed_len = swf_data.len();
        let swf_buf = swf::decompress_swf(swf_data)?;
        let encoding = swf::SwfStr::encoding_for_version(swf_buf.header.version());

        let mut num_frames = swf_buf.header.num_frames();
        if num_frames == 0 {
            warn!("{} advertises no frames, treating it as one frame", url);
            num_frames = 1;
        }

        debug!(
            "{}: version {}, frame rate {}, {} frames, {} bytes of tags",
            url,
            swf_buf.header.version(),
            swf_buf.header.frame_rate().to_f32(),
            num_frames,
            swf_buf.data.len()
        );

        Ok(Self {
            url: if url.is_empty() {
                String::from("<anonymous>")
            } else {
                url.to_owned()
            },
            header: swf_buf.header,
            data: swf_buf.data,
            encoding,
            compressed_len,
            num_frames,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn encoding(&self) -> &'static swf::Encoding {
        self.encoding
    }
    pub fn compressed_len(&self) -> usize {
        self.compressed_len
    }
    pub fn stage_size(&self) -> &Rectangle<Twips> {
        self.header.stage_size()
    }
    pub fn num_frames(&self) -> u16 {
        self.num_frames
    }
    pub fn frame_rate(&self) -> Fixed8 {
        self.header.frame_rate()
    }
    pub fn version(&self) -> u8 {
        self.header.version()
    }
    pub fn header(&self) -> &HeaderExt {
        &self.header
    }
}

/// One self-length-delimited tag.
#[derive(Debug, Clone, Copy)]
pub struct TagRecord<'a> {
    pub code: u16,
    /// Byte offset of the tag header within the tag data.
    pub offset: usize,
    /// Header and body.
    pub raw: &'a [u8],
    pub body: &'a [u8],
}

impl<'a> TagRecord<'a> {
    /// Fully decodes the tag with the `swf` crate.
    pub fn decode(&self, version: u8) -> swf::error::Result<swf::Tag<'a>> {
        SwfStream::new(self.raw, version).read_tag()
    }
}

/// Splits tag data into tags using the length stored in each tag header,
/// so a tag that fails to decode never desynchronizes the rest.
pub struct TagStream<'a> {
    reader: SwfStream<'a>,
    len: usize,
}

impl<'a> TagStream<'a> {
    pub fn new(data: &'a [u8], version: u8) -> Self {
        Self {
            reader: SwfStream::new(data, version),
            len: data.len(),
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.len - self.reader.get_ref().len()
    }

    pub fn remaining(&self) -> usize {
        self.reader.get_ref().len()
    }

    /// The next tag, or `None` once the data is exhausted.
    ///
    /// A header cut short or a length reaching past the end of the data is
    /// an error; nothing after it can be trusted.
    pub fn next_tag(&mut self) -> Result<Option<TagRecord<'a>>, LoadError> {
        let remaining = self.reader.get_ref();
        if remaining.is_empty() {
            return Ok(None);
        }
        let offset = self.position();

        let (code, length) = self
            .reader
            .read_tag_code_and_length()
            .map_err(|_| LoadError::TruncatedTag { offset })?;

        let body_start = self.reader.get_ref();
        if length > body_start.len() {
            return Err(LoadError::TagOutOfBounds {
                code,
                offset,
                length,
                available: body_start.len(),
            });
        }

        let header_len = remaining.len() - body_start.len();
        let record = TagRecord {
            code,
            offset,
            raw: &remaining[..header_len + length],
            body: &body_start[..length],
        };
        *self.reader.get_mut() = &body_start[length..];
        Ok(Some(record))
    }
}

#[cfg(test)]
mod test {
    use anyhow::Result;

    use super::*;
    use crate::test_utils::{SwfBuilder, tag_bytes};

    #[test]
    fn reads_header() -> Result<()> {
        let bytes = SwfBuilder::new(8, 3).show_frame().end().build();
        let movie = SwfMovie::from_data("movie.swf", &bytes)?;

        assert_eq!(movie.version(), 8);
        assert_eq!(movie.num_frames(), 3);
        assert_eq!(movie.url(), "movie.swf");
        assert_eq!(movie.compressed_len(), bytes.len());
        Ok(())
    }

    #[test]
    fn rejects_garbage_header() {
        let result = SwfMovie::from_data("junk.swf", b"not a movie at all");
        assert!(matches!(result, Err(LoadError::InvalidHeader(_))));
    }

    #[test]
    fn zero_frames_means_one() -> Result<()> {
        let bytes = SwfBuilder::new(6, 0).end().build();
        assert_eq!(SwfMovie::from_data("", &bytes)?.num_frames(), 1);
        Ok(())
    }

    #[test]
    fn frames_short_and_long_tags() -> Result<()> {
        let mut data = tag_bytes(1, &[]);
        data.extend(tag_bytes(87, &[0xAB; 100]));
        data.extend(tag_bytes(0, &[]));

        let mut stream = TagStream::new(&data, 10);
        let show_frame = stream.next_tag()?.expect("show frame");
        assert_eq!((show_frame.code, show_frame.body.len()), (1, 0));

        let long = stream.next_tag()?.expect("long tag");
        assert_eq!(long.code, 87);
        assert_eq!(long.offset, 2);
        // 长度超过62字节时使用6字节的标签头
        assert_eq!(long.raw.len(), 106);
        assert_eq!(long.body, &[0xAB; 100][..]);

        let end = stream.next_tag()?.expect("end");
        assert_eq!(end.code, 0);
        assert!(stream.next_tag()?.is_none());
        assert_eq!(stream.position(), data.len());
        Ok(())
    }

    #[test]
    fn length_past_the_end_is_fatal() {
        let mut data = tag_bytes(87, &[0; 10]);
        data.truncate(8);

        let mut stream = TagStream::new(&data, 10);
        match stream.next_tag() {
            Err(LoadError::TagOutOfBounds {
                code: 87,
                offset: 0,
                length: 10,
                available: 6,
            }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_header_is_fatal() {
        let mut stream = TagStream::new(&[0x40], 10);
        assert!(matches!(
            stream.next_tag(),
            Err(LoadError::TruncatedTag { offset: 0 })
        ));
    }
}
