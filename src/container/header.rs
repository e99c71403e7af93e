use crate::{
    error::{FormatError, FormatErrorKind, ReadResult},
    reader::Reader,
};

#[doc = r#"
The container header: a fixed 40-byte region followed by option data
whose size selects one of five shapes.

All five shapes share the common fields; the variants differ only in
the sub-chunk lengths and legacy loader CRCs the option data carries.
The CRCs are retained for completeness but never re-validated.
"#]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    magic: [u8; 4],
    total_length: i32,
    version: String,
    karaoke_id: i32,
    adpcm_offset: i32,
    encryption_mode: i32,
    variant: HeaderVariant,
}

/// The five header shapes, selected by option-data size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderVariant {
    /// Unrecognized option-data size; the blob is kept opaque.
    Generic(Vec<u8>),
    /// 12 bytes of option data.
    Mmt {
        /// YKS sub-chunk region length
        yks_chunks_length: i32,
        /// MMT sub-chunk region length
        mmt_chunks_length: i32,
        /// legacy loader CRC
        crc_yks_loader: i16,
        /// legacy loader CRC
        crc_loader: i16,
    },
    /// 20 bytes of option data.
    Mmk {
        /// YKS sub-chunk region length
        yks_chunks_length: i32,
        /// MMT sub-chunk region length
        mmt_chunks_length: i32,
        /// MMK sub-chunk region length
        mmk_chunks_length: i32,
        /// legacy loader CRC
        crc_yks_loader: i16,
        /// legacy loader CRC
        crc_yks_mmk_okd: i16,
        /// legacy loader CRC
        crc_loader: i16,
    },
    /// 24 bytes of option data.
    Spr {
        /// YKS sub-chunk region length
        yks_chunks_length: i32,
        /// MMT sub-chunk region length
        mmt_chunks_length: i32,
        /// MMK sub-chunk region length
        mmk_chunks_length: i32,
        /// SPR sub-chunk region length
        spr_chunks_length: i32,
        /// legacy loader CRC
        crc_yks_loader: i16,
        /// legacy loader CRC
        crc_yks_mmt_okd: i16,
        /// legacy loader CRC
        crc_yks_mmt_mmk_okd: i16,
        /// legacy loader CRC
        crc_loader: i16,
    },
    /// 32 bytes of option data.
    Dio {
        /// YKS sub-chunk region length
        yks_chunks_length: i32,
        /// MMT sub-chunk region length
        mmt_chunks_length: i32,
        /// MMK sub-chunk region length
        mmk_chunks_length: i32,
        /// SPR sub-chunk region length
        spr_chunks_length: i32,
        /// DIO sub-chunk region length
        dio_chunks_length: i32,
        /// legacy loader CRC
        crc_yks_loader: i16,
        /// legacy loader CRC
        crc_yks_mmt_okd: i16,
        /// legacy loader CRC
        crc_yks_mmt_mmk_okd: i16,
        /// legacy loader CRC
        crc_yks_mmt_mmk_spr_okd: i16,
        /// legacy loader CRC
        crc_loader: i16,
    },
}

/// How the chunk scan treats the ADPCM boundary inside the data region.
///
/// Two format revisions fixed the same problem differently; both paths
/// are preserved and selected from the header shape, with an explicit
/// caller override available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdpcmBoundary {
    /// Jump to `adpcm_offset + 52` and resume chunk reading (older
    /// revisions).
    FixedJump,
    /// Fast-forward to the next `"YADD"` tag and resume (later
    /// revisions).
    ScanForTag,
}

impl Header {
    /// Length of the fixed header region.
    pub const FIXED_LEN: usize = 40;

    /// Read the option-data size from a descrambled fixed header
    /// without committing to a variant yet.
    pub(crate) fn peek_option_size(reader: &mut Reader<'_>) -> ReadResult<usize> {
        reader.seek(36);
        let size = reader.read_i32_be()?;
        Ok(size.max(0) as usize)
    }

    /// Parse the header from the first `40 + option_data_size` bytes of
    /// a descrambled buffer.
    pub fn parse(buffer: &[u8]) -> ReadResult<Self> {
        let mut reader = Reader::from_bytes(buffer);
        let magic: [u8; 4] = reader.read_array()?;
        if magic != super::OKD_MAGIC {
            return Err(FormatError::new(0, FormatErrorKind::InvalidMagic(magic)));
        }
        let total_length = reader.read_i32_be()?;
        let version_bytes = reader.read_bytes(16)?;
        let version = String::from_utf8_lossy(version_bytes).into_owned();
        let karaoke_id = reader.read_i32_be()?;
        let adpcm_offset = reader.read_i32_be()?;
        let encryption_mode = reader.read_i32_be()?;
        let option_data_size = reader.read_i32_be()?.max(0) as usize;

        let mut opt = Reader::from_bytes(reader.read_bytes(option_data_size)?);
        let variant = match option_data_size {
            12 => HeaderVariant::Mmt {
                yks_chunks_length: opt.read_i32_be()?,
                mmt_chunks_length: opt.read_i32_be()?,
                crc_yks_loader: opt.read_i16_be()?,
                crc_loader: opt.read_i16_be()?,
            },
            20 => HeaderVariant::Mmk {
                yks_chunks_length: opt.read_i32_be()?,
                mmt_chunks_length: opt.read_i32_be()?,
                mmk_chunks_length: opt.read_i32_be()?,
                crc_yks_loader: opt.read_i16_be()?,
                crc_yks_mmk_okd: opt.read_i16_be()?,
                crc_loader: opt.read_i16_be()?,
            },
            24 => HeaderVariant::Spr {
                yks_chunks_length: opt.read_i32_be()?,
                mmt_chunks_length: opt.read_i32_be()?,
                mmk_chunks_length: opt.read_i32_be()?,
                spr_chunks_length: opt.read_i32_be()?,
                crc_yks_loader: opt.read_i16_be()?,
                crc_yks_mmt_okd: opt.read_i16_be()?,
                crc_yks_mmt_mmk_okd: opt.read_i16_be()?,
                crc_loader: opt.read_i16_be()?,
            },
            32 => HeaderVariant::Dio {
                yks_chunks_length: opt.read_i32_be()?,
                mmt_chunks_length: opt.read_i32_be()?,
                mmk_chunks_length: opt.read_i32_be()?,
                spr_chunks_length: opt.read_i32_be()?,
                dio_chunks_length: opt.read_i32_be()?,
                crc_yks_loader: opt.read_i16_be()?,
                crc_yks_mmt_okd: opt.read_i16_be()?,
                crc_yks_mmt_mmk_okd: opt.read_i16_be()?,
                crc_yks_mmt_mmk_spr_okd: opt.read_i16_be()?,
                crc_loader: opt.read_i16_be()?,
            },
            _ => HeaderVariant::Generic(opt.read_bytes(opt.remaining())?.to_vec()),
        };

        Ok(Self {
            magic,
            total_length,
            version,
            karaoke_id,
            adpcm_offset,
            encryption_mode,
            variant,
        })
    }

    /// Total container length as declared by the header (counted from
    /// byte 8 of the stream).
    pub const fn total_length(&self) -> i32 {
        self.total_length
    }

    /// The 16-byte ASCII version marker.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The karaoke song id.
    pub const fn karaoke_id(&self) -> i32 {
        self.karaoke_id
    }

    /// Offset of the unscrambled trailing audio block, 0 when absent.
    pub const fn adpcm_offset(&self) -> i32 {
        self.adpcm_offset
    }

    /// The declared encryption mode field.
    pub const fn encryption_mode(&self) -> i32 {
        self.encryption_mode
    }

    /// The shape-specific fields.
    pub const fn variant(&self) -> &HeaderVariant {
        &self.variant
    }

    /// Where chunk scanning resumes after the header.
    pub fn header_size(&self) -> usize {
        Self::FIXED_LEN + self.option_data_size()
    }

    fn option_data_size(&self) -> usize {
        match &self.variant {
            HeaderVariant::Generic(blob) => blob.len(),
            HeaderVariant::Mmt { .. } => 12,
            HeaderVariant::Mmk { .. } => 20,
            HeaderVariant::Spr { .. } => 24,
            HeaderVariant::Dio { .. } => 32,
        }
    }

    /// The boundary-skip behavior implied by this header's revision.
    ///
    /// The option-data shape is the revision marker: the short shapes
    /// predate the `"YADD"` sub-container and use the fixed jump.
    pub const fn adpcm_boundary(&self) -> AdpcmBoundary {
        match self.variant {
            HeaderVariant::Generic(_) | HeaderVariant::Mmt { .. } => AdpcmBoundary::FixedJump,
            HeaderVariant::Mmk { .. } | HeaderVariant::Spr { .. } | HeaderVariant::Dio { .. } => {
                AdpcmBoundary::ScanForTag
            }
        }
    }
}
