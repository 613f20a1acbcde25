mod error;

use std::borrow::Cow;

pub use error::Error;

/// The format of image data in a DefineBitsJpeg2/3 tag.
/// Generally this will be JPEG, but according to SWF19, these tags can also contain PNG and GIF data.
/// SWF19 pp.138-139
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JpegTagFormat {
    Jpeg,
    Png,
    Gif,
    Unknown,
}

// JPEG markers
const SOF0: u8 = 0xC0; // Start of frame
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;
const SOI: u8 = 0xD8; // Start of image
const EOI: u8 = 0xD9; // End of image

/// Some SWFs report unreasonable bitmap dimensions.
const INVALID_SIZE: usize = 0x8000000; // 128MB

pub fn determine_jpeg_tag_format(data: &[u8]) -> JpegTagFormat {
    match data {
        [0xff, 0xd8, ..] => JpegTagFormat::Jpeg,
        [0xff, 0xd9, 0xff, 0xd8, ..] => JpegTagFormat::Jpeg, // erroneous header in SWF
        [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, ..] => JpegTagFormat::Png,
        [0x47, 0x49, 0x46, 0x38, 0x39, 0x61, ..] => JpegTagFormat::Gif,
        _ => JpegTagFormat::Unknown,
    }
}

/// Reads only the width and height of the image in a DefineBitsJpeg2/3 tag.
pub fn bitmap_dimensions(data: &[u8]) -> Result<(u16, u16), Error> {
    let (width, height) = match determine_jpeg_tag_format(data) {
        JpegTagFormat::Jpeg => jpeg_dimensions(data)?,
        JpegTagFormat::Png => png_dimensions(data)?,
        JpegTagFormat::Gif => gif_dimensions(data)?,
        JpegTagFormat::Unknown => return Err(Error::UnknownType),
    };
    validate_size(width, height)?;
    Ok((width, height))
}

/// Dimensions of a DefineBits image, whose encoding tables live in the
/// movie's single JPEGTables tag.
pub fn define_bits_dimensions(jpeg_tables: Option<&[u8]>, data: &[u8]) -> Result<(u16, u16), Error> {
    let jpeg_tables = match jpeg_tables {
        Some(tables) if tables.len() > 4 => tables,
        // 表为空时数据本身可能是完整的JPEG
        _ if determine_jpeg_tag_format(data) == JpegTagFormat::Jpeg => return bitmap_dimensions(data),
        _ => return Err(Error::MissingJpegTables),
    };
    let full_jpeg = glue_tables_to_jpeg(jpeg_tables, data);
    bitmap_dimensions(&full_jpeg)
}

/// Joins JPEGTables and DefineBits data into one decodable JPEG by dropping
/// the inner EOI+SOI pair.
fn glue_tables_to_jpeg(jpeg_tables: &[u8], data: &[u8]) -> Vec<u8> {
    let tables = jpeg_tables
        .strip_suffix(&[0xFF, EOI])
        .unwrap_or(jpeg_tables);
    let data = data.strip_prefix(&[0xFF, SOI]).unwrap_or(data);

    let mut full_jpeg = Vec::with_capacity(tables.len() + data.len());
    full_jpeg.extend_from_slice(tables);
    full_jpeg.extend_from_slice(data);
    full_jpeg
}

/// Removes potential invalid JPEG data from SWF DefineBitsJPEG tags.
///
/// Before SWF 8 an erroneous 0xFFD9FFD8 (EOI+SOI) pair may appear anywhere
/// before the SOF0 marker; standard decoders stop at it, Flash skips it.
/// Also glues on a missing trailing EOI.
pub fn remove_invalid_jpeg_data(data: &[u8]) -> Cow<'_, [u8]> {
    let mut data: Cow<[u8]> = if let Some(stripped) = data.strip_prefix(&[0xFF, EOI, 0xFF, SOI]) {
        stripped.into()
    } else {
        let mut jpeg_data = data;
        let mut pos = 0;
        loop {
            if jpeg_data.len() < 4 {
                break data.into();
            }
            let payload_len: usize = match &jpeg_data[..4] {
                [0xFF, EOI, 0xFF, SOI] => {
                    let mut out_data = Vec::with_capacity(data.len() - 4);
                    out_data.extend_from_slice(&data[..pos]);
                    out_data.extend_from_slice(&data[pos + 4..]);
                    break out_data.into();
                }
                // EOI, SOI, RST markers do not include a size.
                [0xFF, EOI | SOI | RST0..=RST7, _, _] => 0,
                [0xFF, SOF0, _, _] => break data.into(),
                [0xFF, _, a, b] => u16::from_be_bytes([*a, *b]).into(),
                // Not a marker: either not a JPEG or we lost track. Bail out.
                _ => break data.into(),
            };
            jpeg_data = jpeg_data.get(payload_len + 2..).unwrap_or_default();
            pos += payload_len + 2;
        }
    };

    if !data.ends_with(&[0xFF, EOI]) {
        tracing::warn!("JPEG is missing EOI marker and may not decode properly");
        data.to_mut().extend_from_slice(&[0xFF, EOI]);
    }
    data
}

fn validate_size(width: u16, height: u16) -> Result<(), Error> {
    let size = (width as usize).saturating_mul(height as usize);
    if size >= INVALID_SIZE {
        return Err(Error::TooLarge);
    }
    Ok(())
}

fn jpeg_dimensions(jpeg_data: &[u8]) -> Result<(u16, u16), Error> {
    let jpeg_data = remove_invalid_jpeg_data(jpeg_data);

    let mut decoder = jpeg_decoder::Decoder::new(&jpeg_data[..]);
    decoder.read_info()?;
    let metadata = decoder.info().ok_or(Error::UnknownType)?;
    Ok((metadata.width, metadata.height))
}

fn png_dimensions(data: &[u8]) -> Result<(u16, u16), Error> {
    let decoder = png::Decoder::new(data);
    let reader = decoder.read_info()?;
    let info = reader.info();
    let width = u16::try_from(info.width).map_err(|_| Error::TooLarge)?;
    let height = u16::try_from(info.height).map_err(|_| Error::TooLarge)?;
    Ok((width, height))
}

fn gif_dimensions(data: &[u8]) -> Result<(u16, u16), Error> {
    let decode_options = gif::DecodeOptions::new();
    let reader = decode_options.read_info(data)?;
    Ok((reader.width(), reader.height()))
}
