use crate::{
    container::Header,
    error::{FormatError, FormatErrorKind, KeyError, LoadError},
    reader::Reader,
};

/// Expected magic for event containers.
pub const OKD_MAGIC: [u8; 4] = *b"YKS1";
/// Expected magic for audio-only containers.
pub const OKA_MAGIC: [u8; 4] = *b"YOKA";

/// Reserved low word substituted for the wrapped table entry at the
/// final rotation during key detection.
const RESERVED_LOW_WORD: u32 = 0x87D2;

/// The outer wrapper tag; when present the first 16 bytes are skipped.
const WRAPPER_TAG: [u8; 4] = *b"SPRC";
const WRAPPER_LEN: usize = 16;

#[doc = r#"
A 256-entry scramble key table.

Built from a 512-byte keyfile holding 256 little-endian 16-bit words
(the current keyfile revision). Passed by value into the descrambling
call so multiple containers can be decoded concurrently with different
keys; there is no global key state.
"#]
#[derive(Clone)]
pub struct ScrambleKey {
    words: [u16; 256],
}

impl ScrambleKey {
    /// Parse a keyfile. The input must be exactly 512 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, KeyError> {
        if data.len() != 512 {
            return Err(KeyError::InvalidLength(data.len()));
        }
        let mut words = [0u16; 256];
        for (i, pair) in data.chunks_exact(2).enumerate() {
            words[i] = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(Self { words })
    }

    /// Build a key directly from 256 words. Mostly useful in tests.
    pub const fn from_words(words: [u16; 256]) -> Self {
        Self { words }
    }

    fn word(&self, index: usize) -> u16 {
        self.words[index % 256]
    }

    /// Detect the starting table index for a scrambled stream whose
    /// expected magic is `magic`.
    ///
    /// Returns `None` when the stream already begins with the magic
    /// (passthrough). Brute-forces all 256 rotations; the final
    /// rotation wraps onto a reserved hard-coded low word.
    pub fn detect_index(&self, first4: [u8; 4], magic: [u8; 4]) -> Result<Option<usize>, KeyError> {
        if first4 == magic {
            return Ok(None);
        }
        let expected = u32::from_be_bytes(first4) ^ u32::from_be_bytes(magic);
        for index in 0..256usize {
            let low = if index == 0xFF {
                RESERVED_LOW_WORD
            } else {
                u32::from(self.words[index + 1])
            };
            let candidate = (u32::from(self.words[index]) << 16) | low;
            if candidate == expected {
                return Ok(Some(index));
            }
        }
        Err(KeyError::IndexNotDetected)
    }

    /// Scramble a buffer in place starting at table `index`.
    ///
    /// The cipher is a symmetric XOR, so this is also the descramble
    /// operation; it exists as a public operation for round-trip tests
    /// and for tooling that re-wraps containers.
    pub fn apply(&self, buf: &mut [u8], mut index: usize) {
        for word in buf.chunks_exact_mut(2) {
            let scrambled = u16::from_be_bytes([word[0], word[1]]);
            let clear = scrambled ^ self.word(index);
            word.copy_from_slice(&clear.to_be_bytes());
            index += 1;
        }
    }
}

impl std::fmt::Debug for ScrambleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrambleKey").finish_non_exhaustive()
    }
}

/// Strip the optional 16-byte `"SPRC"` outer wrapper.
pub(crate) fn strip_wrapper(input: &[u8]) -> &[u8] {
    if input.len() >= WRAPPER_LEN && input[..4] == WRAPPER_TAG {
        &input[WRAPPER_LEN..]
    } else {
        input
    }
}

/// Word-cipher cursor threading the running table index through the
/// header, option-data, and data-region passes.
enum Descrambler<'k> {
    /// The stream was never scrambled.
    Passthrough,
    Cipher { key: &'k ScrambleKey, index: usize },
}

impl Descrambler<'_> {
    fn pull(&mut self, reader: &mut Reader<'_>, out: &mut Vec<u8>, length: usize) -> Result<(), FormatError> {
        match self {
            Self::Passthrough => {
                out.extend_from_slice(reader.read_bytes(length)?);
            }
            Self::Cipher { key, index } => {
                // length is even in every header revision; a trailing odd
                // byte would be a truncated word.
                let start = out.len();
                out.extend_from_slice(reader.read_bytes(length)?);
                for word in out[start..].chunks_exact_mut(2) {
                    let scrambled = u16::from_be_bytes([word[0], word[1]]);
                    let clear = scrambled ^ key.word(*index);
                    word.copy_from_slice(&clear.to_be_bytes());
                    *index += 1;
                }
            }
        }
        Ok(())
    }
}

/// Result of the container-level descrambling pass.
pub struct DecryptedContainer {
    /// The parsed header.
    pub header: Header,
    /// The flat decrypted buffer: fixed header, option data, event
    /// data, then the verbatim trailing audio region.
    pub buffer: Vec<u8>,
}

/// Descramble a whole container and parse its header.
///
/// `key` may be `None` for unscrambled files; a scrambled file without
/// a key fails with [`KeyError::KeyNotLoaded`].
pub fn decrypt(input: &[u8], key: Option<&ScrambleKey>) -> Result<DecryptedContainer, LoadError> {
    let input = strip_wrapper(input);
    let mut reader = Reader::from_bytes(input);

    let first4: [u8; 4] = input
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(FormatError::oob(0))?;

    let mut cipher = if first4 == OKD_MAGIC {
        Descrambler::Passthrough
    } else {
        let key = key.ok_or(KeyError::KeyNotLoaded)?;
        match key.detect_index(first4, OKD_MAGIC)? {
            Some(index) => Descrambler::Cipher { key, index },
            None => Descrambler::Passthrough,
        }
    };

    let mut buffer = Vec::with_capacity(input.len());

    // Fixed 40-byte header region.
    cipher.pull(&mut reader, &mut buffer, Header::FIXED_LEN)?;
    let option_data_size = {
        let mut hdr = Reader::from_bytes(&buffer);
        Header::peek_option_size(&mut hdr)?
    };

    // Variant-specific option data.
    cipher.pull(&mut reader, &mut buffer, option_data_size)?;
    let header = Header::parse(&buffer)?;

    // Everything after the header up to the trailing audio region is
    // scrambled; the audio region is copied verbatim, never decrypted.
    let data_offset = reader.position() as i64;
    let data_length = i64::from(header.total_length()) - (data_offset - 8);
    let adpcm_offset = i64::from(header.adpcm_offset());

    let (ext_offset, ext_length) = if adpcm_offset == 0 {
        (0, 0)
    } else {
        let ext_offset = adpcm_offset - 40;
        (ext_offset, data_length - ext_offset)
    };
    let scrambled_length = data_length - ext_length;

    if scrambled_length < 0 || ext_offset < 0 {
        return Err(FormatError::new(
            reader.position(),
            FormatErrorKind::TruncatedChunk {
                tag: first4,
                claimed: header.total_length() as u32,
            },
        )
        .into());
    }

    let scrambled_length = (scrambled_length as usize).min(reader.remaining());
    cipher.pull(&mut reader, &mut buffer, scrambled_length)?;

    if ext_length > 0 {
        reader.seek(ext_offset as usize);
        let ext_length = (ext_length as usize).min(reader.remaining());
        buffer.extend_from_slice(reader.read_bytes(ext_length)?);
    }

    Ok(DecryptedContainer { header, buffer })
}
