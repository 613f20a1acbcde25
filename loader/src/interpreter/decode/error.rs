use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bitmap is larger than any movie can reasonably use")]
    TooLarge,

    #[error("Unknown bitmap format")]
    UnknownType,

    #[error("JPEG data without a JPEGTables tag to complete it")]
    MissingJpegTables,

    #[error("Invalid JPEG")]
    InvalidJpeg(#[from] jpeg_decoder::Error),

    #[error("Invalid PNG")]
    InvalidPng(#[from] png::DecodingError),

    #[error("Invalid GIF")]
    InvalidGif(#[from] gif::DecodingError),
}
