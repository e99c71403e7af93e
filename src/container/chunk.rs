use crate::{
    container::{AdpcmBoundary, Header},
    error::{FormatError, FormatErrorKind, ReadResult},
    reader::Reader,
};

/// Tag of the ADPCM sub-container.
pub const ADPCM_CONTAINER_TAG: [u8; 4] = *b"YADD";
/// Tag of an ADPCM waveform sub-block.
pub const ADPCM_WAVE_TAG: [u8; 4] = *b"YAWV";

/// Distance past `adpcm_offset` where chunk framing resumes under
/// [`AdpcmBoundary::FixedJump`].
const FIXED_JUMP_SKIP: usize = 52;

#[doc = r#"
One framed chunk: a 4-byte tag and its payload.

Chunks are laid out as `{tag, length:u32be, payload}` back to back in
the decrypted container.
"#]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The 4-byte tag.
    pub tag: [u8; 4],
    /// The payload bytes.
    pub payload: Vec<u8>,
}

/// What a chunk's tag says it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// `YPTI`: the legacy channel-routing table.
    TrackInfo,
    /// `YPXI`: the extended channel-routing table.
    ExtendedTrackInfo,
    /// `0xFF 'P' 'R' id`: one port's event track.
    PTrack(u8),
    /// `0xFF 'M' 'R' id`: a meta/timing track.
    MTrack(u8),
    /// `YADD`: the ADPCM audio sub-container.
    Adpcm,
    /// Anything else; preserved but not interpreted.
    Other,
}

impl Chunk {
    /// Classify this chunk by its tag.
    pub fn kind(&self) -> ChunkKind {
        match self.tag {
            t if t == *b"YPTI" => ChunkKind::TrackInfo,
            t if t == *b"YPXI" => ChunkKind::ExtendedTrackInfo,
            [0xFF, b'P', b'R', id] => ChunkKind::PTrack(id),
            [0xFF, b'M', b'R', id] => ChunkKind::MTrack(id),
            t if t == ADPCM_CONTAINER_TAG => ChunkKind::Adpcm,
            _ => ChunkKind::Other,
        }
    }

    /// Serialize as `{tag, length, payload}` framing.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
    }
}

/// Scan the decrypted container for chunks, honoring the ADPCM boundary
/// rule for `header`'s revision (or `boundary_override` when given).
pub fn scan_chunks(
    buffer: &[u8],
    header: &Header,
    boundary_override: Option<AdpcmBoundary>,
) -> ReadResult<Vec<Chunk>> {
    let boundary = boundary_override.unwrap_or_else(|| header.adpcm_boundary());
    let adpcm_offset = header.adpcm_offset().max(0) as usize;

    let mut reader = Reader::from_bytes(buffer);
    reader.seek(header.header_size());

    let mut chunks = Vec::new();
    let mut crossed_boundary = false;
    while !reader.is_empty() {
        if adpcm_offset > 0 && !crossed_boundary && reader.position() >= adpcm_offset {
            crossed_boundary = true;
            match boundary {
                AdpcmBoundary::FixedJump => reader.seek(adpcm_offset + FIXED_JUMP_SKIP),
                AdpcmBoundary::ScanForTag => {
                    match find_tag(buffer, reader.position(), &ADPCM_CONTAINER_TAG) {
                        Some(at) => reader.seek(at),
                        None => break,
                    }
                }
            }
            if reader.is_empty() {
                break;
            }
        }

        let tag: [u8; 4] = reader.read_array()?;
        if reader.is_empty() {
            break;
        }
        let length = reader.read_u32_be()?;
        if length as usize > reader.remaining() {
            return Err(FormatError::new(
                reader.position(),
                FormatErrorKind::TruncatedChunk {
                    tag,
                    claimed: length,
                },
            ));
        }
        let payload = reader.read_bytes(length as usize)?.to_vec();
        chunks.push(Chunk { tag, payload });
    }
    Ok(chunks)
}

/// Split a `YADD` payload into its `YAWV` waveform sub-blocks.
pub fn adpcm_wave_blocks(payload: &[u8]) -> ReadResult<Vec<Vec<u8>>> {
    let mut reader = Reader::from_bytes(payload);
    let mut blocks = Vec::new();
    while !reader.is_empty() {
        let tag: [u8; 4] = reader.read_array()?;
        let length = reader.read_u32_be()?;
        if length as usize > reader.remaining() {
            return Err(FormatError::new(
                reader.position(),
                FormatErrorKind::TruncatedChunk {
                    tag,
                    claimed: length,
                },
            ));
        }
        let data = reader.read_bytes(length as usize)?;
        if tag == ADPCM_WAVE_TAG {
            blocks.push(data.to_vec());
        }
    }
    Ok(blocks)
}

fn find_tag(buffer: &[u8], from: usize, tag: &[u8; 4]) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(4)
        .position(|w| w == tag)
        .map(|p| from + p)
}
