#![doc = r#"
The top-level container: load, decode, and hand off to playback.

[`Okd::load`] runs the whole pipeline: wrapper skip, descramble, header
parse, chunk scan, then per-chunk decoding. P-tracks are resolved to
absolute time against their routing entry, M-tracks are interpreted,
and the ADPCM payload is retained raw. A startup pass then run-
compresses the leading SysEx burst every track opens with, so device
setup takes milliseconds of virtual time instead of seconds.
"#]

use std::collections::BTreeMap;

use crate::{
    adpcm,
    container::{self, AdpcmBoundary, Chunk, ChunkKind, ScrambleKey},
    error::{DeviceError, LoadError, ReadResult},
    mtrack::{Interpretation, MTrack},
    playback::Playback,
    ptrack::{self, AbsoluteEvent, PTrack},
    sysex::{CompressOutcome, SysExCompressor},
    track_info::{TrackInfo, CHANNELS_PER_PORT},
};

/// Device model ids keyed by routing-table layout.
const EXTENDED_MODEL_ID: u8 = 0x51;
const LEGACY_MODEL_ID: u8 = 0x31;

/// One event track resolved to absolute time and physical addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTrack {
    /// The track id from the chunk tag; doubles as the output device
    /// index.
    pub id: u8,
    /// Sorted absolute-time events.
    pub events: Vec<AbsoluteEvent>,
}

/// Which tone generators a song addresses, derived from the routing
/// table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSetup {
    /// SysEx model id of the generators.
    pub model_id: u8,
    /// Reset operating mode.
    pub mode: u8,
    /// Output device indices the generators sit on.
    pub device_indices: [usize; 2],
}

#[doc = r#"
A fully decoded container, ready for playback or export.
"#]
pub struct Okd {
    header: container::Header,
    track_info: Option<TrackInfo>,
    tracks: Vec<DecodedTrack>,
    mtracks: Vec<MTrack>,
    adpcm_payload: Option<Vec<u8>>,
}

impl Okd {
    /// Load a container from raw file bytes.
    ///
    /// `key` may be `None` for unscrambled files. `boundary_override`
    /// forces an ADPCM boundary-skip mode instead of the one the header
    /// revision implies.
    pub fn load(
        bytes: &[u8],
        key: Option<&ScrambleKey>,
        boundary_override: Option<AdpcmBoundary>,
    ) -> Result<Self, LoadError> {
        let decrypted = container::decrypt(bytes, key)?;
        let chunks = container::scan_chunks(&decrypted.buffer, &decrypted.header, boundary_override)?;

        let mut track_info = None;
        let mut ptrack_chunks: Vec<(u8, Chunk)> = Vec::new();
        let mut mtracks = Vec::new();
        let mut adpcm_payload = None;

        for chunk in chunks {
            match chunk.kind() {
                ChunkKind::TrackInfo => {
                    track_info = Some(TrackInfo::parse(&chunk.payload)?);
                }
                ChunkKind::ExtendedTrackInfo => {
                    track_info = Some(TrackInfo::parse_extended(&chunk.payload)?);
                }
                ChunkKind::PTrack(id) => ptrack_chunks.push((id, chunk)),
                ChunkKind::MTrack(id) => {
                    mtracks.push(MTrack::parse(id, &chunk.payload)?);
                }
                ChunkKind::Adpcm => adpcm_payload = Some(chunk.payload),
                ChunkKind::Other => {}
            }
        }

        let mut tracks = Vec::with_capacity(ptrack_chunks.len());
        for (id, chunk) in ptrack_chunks {
            let entry = track_info.as_ref().and_then(|info| info.entry_for(id));
            let Some(entry) = entry else {
                // A P-track without a routing entry cannot be addressed.
                #[cfg(feature = "tracing")]
                tracing::warn!("P-track {id} has no routing entry, skipping");
                continue;
            };
            let parsed = PTrack::parse(id, &chunk.payload)?;
            tracks.push(DecodedTrack {
                id,
                events: parsed.to_absolute(entry),
            });
        }

        compress_startup_sysex(&mut tracks);

        Ok(Self {
            header: decrypted.header,
            track_info,
            tracks,
            mtracks,
            adpcm_payload,
        })
    }

    pub fn header(&self) -> &container::Header {
        &self.header
    }

    pub fn track_info(&self) -> Option<&TrackInfo> {
        self.track_info.as_ref()
    }

    /// The decoded event tracks, one per output device.
    pub fn tracks(&self) -> &[DecodedTrack] {
        &self.tracks
    }

    pub fn mtracks(&self) -> &[MTrack] {
        &self.mtracks
    }

    /// Timing and section data from the first meta track; defaults when
    /// the container has none.
    pub fn interpretation(&self) -> Interpretation {
        self.mtracks
            .first()
            .map(|m| m.interpretation.clone())
            .unwrap_or_default()
    }

    /// Earliest audible Note-On across all tracks, in milliseconds.
    pub fn first_note_on_time(&self) -> Option<u32> {
        self.tracks
            .iter()
            .filter_map(|t| ptrack::first_note_on_time(&t.events))
            .min()
    }

    /// Last event time across all tracks, in milliseconds.
    pub fn total_play_time(&self) -> u32 {
        self.tracks
            .iter()
            .filter_map(|t| t.events.last().map(|ev| ev.time))
            .max()
            .unwrap_or(0)
    }

    /// Build one scheduler per decoded track. The track id is the
    /// output device index to open each sink on.
    pub fn playbacks(&self) -> Vec<(u8, Playback)> {
        self.tracks
            .iter()
            .map(|t| (t.id, Playback::new(t.events.clone())))
            .collect()
    }

    /// Decode the ADPCM waveform sub-blocks to PCM, one `Vec<i16>` per
    /// `YAWV` block.
    pub fn adpcm_pcm(&self) -> ReadResult<Vec<Vec<i16>>> {
        let Some(payload) = &self.adpcm_payload else {
            return Ok(Vec::new());
        };
        container::adpcm_wave_blocks(payload)?
            .iter()
            .map(|block| adpcm::decode_to_pcm(block))
            .collect()
    }

    /// Which generators to address, derived from the routing table:
    /// the extended layout drives the newer generator pair on devices
    /// 0 and 2, the legacy layout the older pair on devices 0 and 1.
    pub fn device_setup(&self) -> DeviceSetup {
        match self.track_info.as_ref().and_then(|info| info.tg_mode) {
            Some(tg_mode) => DeviceSetup {
                model_id: EXTENDED_MODEL_ID,
                mode: tg_mode.min(1) as u8,
                device_indices: [0, 2],
            },
            None => DeviceSetup {
                model_id: LEGACY_MODEL_ID,
                mode: 0,
                device_indices: [0, 1],
            },
        }
    }

    /// Tone-generator reset messages, one per addressed device.
    pub fn reset_messages(&self) -> Result<Vec<(usize, [u8; 10])>, DeviceError> {
        let setup = self.device_setup();
        let message = crate::device::reset_tg(setup.model_id, setup.mode)?;
        Ok(setup
            .device_indices
            .iter()
            .map(|&index| (index, message))
            .collect())
    }

    /// Universal master-volume messages, one per addressed device.
    /// `volume` is 14-bit and saturates.
    pub fn master_volume_messages(&self, volume: u16) -> Vec<(usize, [u8; 8])> {
        let setup = self.device_setup();
        let message = crate::device::master_volume(volume);
        setup
            .device_indices
            .iter()
            .map(|&index| (index, message))
            .collect()
    }

    /// Transpose messages for a key shift in semitones, one per
    /// addressed device.
    pub fn transpose_messages(&self, key: i32) -> Vec<(usize, [u8; 10])> {
        let setup = self.device_setup();
        let message = crate::device::transpose(setup.model_id, key);
        setup
            .device_indices
            .iter()
            .map(|&index| (index, message))
            .collect()
    }
}

/// Virtual milliseconds one re-timestamped SysEx byte takes to send.
fn transmission_millis(message_len: usize) -> u32 {
    (message_len as f64 * 0.5).round() as u32
}

/// Per-port state of the startup compression pass.
#[derive(Default)]
struct PortRun {
    compressor: SysExCompressor,
    at: u32,
    out: Vec<AbsoluteEvent>,
}

impl PortRun {
    fn emit(&mut self, port: u8, run: Vec<u8>) {
        let channel = port * CHANNELS_PER_PORT;
        self.out.push(AbsoluteEvent::new(
            port,
            channel,
            self.at,
            run[0],
            run[1..].to_vec(),
        ));
        self.at += transmission_millis(run.len());
    }
}

/// Run-compress the leading SysEx burst of every track that opens with
/// one, re-timestamping the output at 0.5 ms per byte, and pull all
/// tracks earlier by the largest time saved.
fn compress_startup_sysex(tracks: &mut [DecodedTrack]) {
    let mut shift = 0u32;
    let mut spliced: Vec<Vec<AbsoluteEvent>> = Vec::with_capacity(tracks.len());

    for track in tracks.iter_mut() {
        let opens_with_sysex = track.events.first().is_some_and(|ev| ev.status == 0xF0);
        if !opens_with_sysex {
            spliced.push(Vec::new());
            continue;
        }

        // The burst ends at the event preceding the first non-SysEx
        // event with a nonzero timestamp.
        let mut burst_end = track.events.last().map_or(0, |ev| ev.time);
        let mut prev_time = 0;
        for ev in &track.events {
            if ev.status != 0xF0 && ev.time > 0 {
                burst_end = prev_time;
                break;
            }
            prev_time = ev.time;
        }

        let mut runs: BTreeMap<u8, PortRun> = BTreeMap::new();
        let mut consumed = 0;
        for ev in &track.events {
            if ev.status != 0xF0 || ev.time >= burst_end {
                break;
            }
            let run = runs.entry(ev.port).or_default();
            let message = ev.to_bytes();
            match run.compressor.push(&message) {
                CompressOutcome::Absorbed => {}
                CompressOutcome::Flushed(out) => run.emit(ev.port, out),
                CompressOutcome::Rejected(flushed) => {
                    if let Some(out) = flushed {
                        run.emit(ev.port, out);
                    }
                    // Not our dialect; keep the message, re-timestamped.
                    run.out.push(AbsoluteEvent::new(
                        ev.port,
                        ev.channel,
                        run.at,
                        ev.status,
                        ev.data.clone(),
                    ));
                    run.at += transmission_millis(message.len());
                }
            }
            consumed += 1;
        }

        if consumed == 0 {
            spliced.push(Vec::new());
            continue;
        }
        track.events.drain(..consumed);

        let mut compressed = Vec::new();
        let mut burst_len = 0;
        for (port, mut run) in runs {
            if let Some(out) = run.compressor.flush() {
                run.emit(port, out);
            }
            burst_len = burst_len.max(run.at);
            compressed.extend(run.out);
        }
        shift = shift.max(burst_end.saturating_sub(burst_len));
        spliced.push(compressed);
    }

    for (track, mut compressed) in tracks.iter_mut().zip(spliced) {
        for ev in &mut track.events {
            ev.time = ev.time.saturating_sub(shift);
        }
        compressed.append(&mut track.events);
        compressed.sort_by_key(|ev| ev.time);
        track.events = compressed;
    }
}
