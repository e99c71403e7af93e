use thiserror::Error;

#[doc = r#"
A structural error raised while decoding a container, track, or audio
stream, tagged with the byte position where the read stopped.
"#]
#[derive(Debug, Error)]
#[error("decoding at position {position}, {kind}")]
pub struct FormatError {
    position: usize,
    pub(crate) kind: FormatErrorKind,
}

impl FormatError {
    /// Create a format error from a position and kind
    pub const fn new(position: usize, kind: FormatErrorKind) -> Self {
        Self { position, kind }
    }

    /// Create a new out of bounds error
    pub const fn oob(position: usize) -> Self {
        Self {
            position,
            kind: FormatErrorKind::OutOfBounds,
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> &FormatErrorKind {
        &self.kind
    }

    /// Returns the position where the decode error occurred.
    pub fn position(&self) -> usize {
        self.position
    }

    /// True if the reader ran past the end of the buffer
    pub const fn is_out_of_bounds(&self) -> bool {
        matches!(self.kind, FormatErrorKind::OutOfBounds)
    }
}

/// A kind of structural violation in the byte stream
#[derive(Debug, Error)]
pub enum FormatErrorKind {
    /// Reading out of bounds.
    #[error("read out of bounds")]
    OutOfBounds,
    /// The 4-byte magic did not match any known container magic.
    #[error("invalid magic bytes {0:02X?}")]
    InvalidMagic([u8; 4]),
    /// A byte with bit 7 set appeared where a data byte was required.
    #[error("invalid data byte {0:#04X}")]
    InvalidDataByte(u8),
    /// A byte with bit 7 clear appeared where a status byte was required.
    #[error("invalid status byte {0:#04X}")]
    InvalidStatusByte(u8),
    /// A variable-length number ran past its 3-byte limit.
    #[error("unterminated variable-length number")]
    UnterminatedVarNum,
    /// A SysEx message ended with the wrong terminator.
    #[error("unterminated SysEx message, stop byte {0:#04X}")]
    UnterminatedSysEx(u8),
    /// An unknown status byte in a meta track.
    #[error("unknown M-track status byte {0:#04X}")]
    UnknownMetaStatus(u8),
    /// The escape status 0xFE was followed by an unexpected nibble pattern.
    #[error("unknown status {0:#04X} after 0xFE escape")]
    UnknownEscapedStatus(u8),
    /// An ADPCM frame parameter was out of its legal range.
    #[error("ADPCM parameter `{name}` out of range: {value}")]
    AdpcmParameter {
        /// `shift` or `index`
        name: &'static str,
        /// the offending value
        value: u8,
    },
    /// A chunk length field pointed past the end of the buffer.
    #[error("truncated chunk: {tag:02X?} claims {claimed} bytes")]
    TruncatedChunk {
        /// the chunk tag
        tag: [u8; 4],
        /// the claimed payload length
        claimed: u32,
    },
}

/// Problems with the scramble key table.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The keyfile was not the expected 512 bytes.
    #[error("invalid key data length {0}, expected 512 bytes")]
    InvalidLength(usize),
    /// The container is scrambled but no key table was supplied.
    #[error("container is scrambled but no key table is loaded")]
    KeyNotLoaded,
    /// No key table rotation reproduced the expected magic.
    #[error("failed to detect scramble pattern index")]
    IndexNotDetected,
}

/// Failure surfaced by an output sink during playback.
///
/// Never retried internally; retry policy belongs to the sink.
#[derive(Debug, Error)]
#[error("MIDI device: {0}")]
pub struct DeviceError(pub String);

/// Any error the crate can produce while loading a container.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A structural error in the byte stream
    #[error(transparent)]
    Format(#[from] FormatError),
    /// A scramble key problem
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// The decode result type (see [`FormatError`])
pub type ReadResult<T> = Result<T, FormatError>;
