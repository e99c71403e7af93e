#![doc = r#"
M-track decoding: the meta and timing stream.

M-tracks carry beat markers, section markers, and meta events rather
than sounding events. Tempo is not stored; it is derived from the gap
between consecutive beat markers. [`MTrack::parse`] decodes the stream
and interprets it in one pass, leaving the result in
[`MTrack::interpretation`].
"#]

use crate::{
    error::{FormatError, FormatErrorKind, ReadResult},
    reader::Reader,
};

/// The end-of-track mark: four zero bytes.
const EOT_MARK: [u8; 4] = [0, 0, 0, 0];

/// Meta events terminate with `0xFE`, not the SysEx `0xF7`.
const META_STOP: u8 = 0xFE;

/// Tempo assumed until the first beat-marker pair resolves one.
const DEFAULT_BPM: u32 = 125;

/// One raw M-track event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MTrackEvent {
    /// Milliseconds since the previous event.
    pub delta: u32,
    /// The status byte.
    pub status: u8,
    /// Data bytes; for meta events, through the `0xFE` terminator.
    pub data: Vec<u8>,
}

/// A derived tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    /// Milliseconds from track start.
    pub time: u32,
    /// Beats per minute.
    pub bpm: u32,
}

/// A time-signature change from a `0x58` meta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    /// Milliseconds from track start.
    pub time: u32,
    pub numerator: u32,
    pub denominator: u32,
}

/// A paired start/end region in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub start: u32,
    pub end: u32,
}

#[doc = r#"
Everything the meta stream says about the song's shape and timing.
"#]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Interpretation {
    /// Derived tempo map; never empty after interpretation.
    pub tempos: Vec<TempoChange>,
    /// Time signatures; never empty after interpretation.
    pub time_signatures: Vec<TimeSignature>,
    /// Hook (chorus highlight) regions.
    pub hooks: Vec<Section>,
    /// Guide-melody visibility delimiters: `(time, value)`.
    pub guide_melody_delimiters: Vec<(u32, u8)>,
    /// Where a two-chorus cut fades out, when the song has one.
    pub two_chorus_fadeout_time: Option<u32>,
    /// Song section regions.
    pub song_sections: Vec<Section>,
    /// Regions during which the ADPCM channel is audible.
    pub adpcm_sections: Vec<Section>,
}

#[doc = r#"
One decoded meta/timing track.
"#]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MTrack {
    /// The track id from the chunk tag.
    pub id: u8,
    /// Raw events in stream order.
    pub events: Vec<MTrackEvent>,
    /// The derived timing and section data.
    pub interpretation: Interpretation,
}

impl MTrack {
    /// Decode an M-track chunk payload and interpret it.
    pub fn parse(id: u8, data: &[u8]) -> ReadResult<Self> {
        let mut reader = Reader::from_bytes(data);
        let mut events = Vec::new();
        while !reader.is_empty() {
            match parse_event(&mut reader)? {
                Some(ev) => events.push(ev),
                None => break,
            }
        }
        let interpretation = interpret(&events);
        Ok(Self {
            id,
            events,
            interpretation,
        })
    }
}

fn parse_event(reader: &mut Reader<'_>) -> ReadResult<Option<MTrackEvent>> {
    let delta = reader.read_delta()?;

    if reader.remaining() < 4 {
        return Ok(None);
    }
    let at = reader.position();
    if reader.read_array::<4>()? == EOT_MARK {
        return Ok(None);
    }
    reader.seek(at);

    let status = reader.read_status_byte()?;
    let data = match status {
        0xFF => reader.read_sysex_payload(META_STOP)?,
        0xF1 | 0xF2 | 0xF5 => Vec::new(),
        0xF3 | 0xF4 | 0xF6 | 0xF8 => vec![reader.read_data_byte()?],
        other => {
            return Err(FormatError::new(
                reader.position(),
                FormatErrorKind::UnknownMetaStatus(other),
            ));
        }
    };

    Ok(Some(MTrackEvent {
        delta,
        status,
        data,
    }))
}

fn interpret(events: &[MTrackEvent]) -> Interpretation {
    let mut out = Interpretation::default();

    // Walk once to locate the first beat marker, so the tempo derived
    // from the first gap is anchored there.
    let mut time = 0u32;
    let mut beat_start = None;
    for ev in events {
        time += ev.delta;
        if ev.status == 0xF1 || ev.status == 0xF2 {
            beat_start = Some(time);
            break;
        }
    }

    let mut current_bpm = DEFAULT_BPM;
    let mut hook_start = None;
    let mut song_section_start = None;
    let mut adpcm_section_start = None;

    let mut time = 0u32;
    for ev in events {
        time += ev.delta;
        match ev.status {
            0xF1 | 0xF2 => {
                if let Some(start) = beat_start {
                    let gap = time.saturating_sub(start);
                    if gap > 0 {
                        let bpm = ((60000.0 / f64::from(gap)).round() as u32).max(1);
                        if out.tempos.is_empty() || bpm != current_bpm {
                            out.tempos.push(TempoChange { time: start, bpm });
                        }
                        current_bpm = bpm;
                    }
                }
                beat_start = Some(time);
            }
            0xF3 => match ev.data.first() {
                Some(0x00 | 0x02) => hook_start = Some(time),
                Some(0x01 | 0x03) => {
                    // An end without an open start is dropped.
                    if let Some(start) = hook_start.take().filter(|s| *s <= time) {
                        out.hooks.push(Section { start, end: time });
                    }
                }
                _ => {}
            },
            0xF4 => {
                if let Some(&value) = ev.data.first() {
                    out.guide_melody_delimiters.push((time, value));
                }
            }
            0xF5 => out.two_chorus_fadeout_time = Some(time),
            0xF6 => match ev.data.first() {
                Some(0x00) => song_section_start = Some(time),
                Some(0x01) => {
                    if let Some(start) = song_section_start.take() {
                        out.song_sections.push(Section { start, end: time });
                    }
                }
                _ => {}
            },
            0xF8 => match ev.data.first() {
                Some(0x00) => adpcm_section_start = Some(time),
                Some(0x01) => {
                    if let Some(start) = adpcm_section_start.take() {
                        out.adpcm_sections.push(Section { start, end: time });
                    }
                }
                _ => {}
            },
            0xFF => {
                if let [0x58, numerator, exponent, ..] = ev.data.as_slice() {
                    let denominator = if *exponent < 32 { 1u32 << exponent } else { 1 };
                    out.time_signatures.push(TimeSignature {
                        time,
                        numerator: u32::from(*numerator),
                        denominator,
                    });
                }
            }
            _ => {}
        }
    }

    if out.tempos.is_empty() {
        out.tempos.push(TempoChange {
            time: beat_start.unwrap_or(0),
            bpm: current_bpm,
        });
    }
    if out.time_signatures.is_empty() {
        out.time_signatures.push(TimeSignature {
            time: 0,
            numerator: 4,
            denominator: 4,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ev(delta: u32, status: u8, data: &[u8]) -> MTrackEvent {
        MTrackEvent {
            delta,
            status,
            data: data.to_vec(),
        }
    }

    #[test]
    fn parses_beats_and_meta() {
        // Beat, 480 ms gap, beat, time signature meta, EOT.
        // 480 = 0x60 + 0x06 * 64 in the 6-bit encoding (the
        // continuation bit counts toward the value).
        let data = [
            0xF1, 0x60, 0x06, 0xF2, 0xFF, 0x58, 0x03, 0x02, 0xFE, 0, 0, 0, 0,
        ];
        let track = MTrack::parse(0, &data).unwrap();
        assert_eq!(
            track.events,
            vec![
                ev(0, 0xF1, &[]),
                ev(480, 0xF2, &[]),
                ev(0, 0xFF, &[0x58, 0x03, 0x02, 0xFE]),
            ]
        );
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(MTrack::parse(0, &[0xF7, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn derives_tempo_from_beat_gaps() {
        // 480 ms gaps -> 125 bpm, then 500 ms gaps -> 120 bpm.
        let events = vec![
            ev(0, 0xF1, &[]),
            ev(480, 0xF1, &[]),
            ev(480, 0xF1, &[]),
            ev(500, 0xF1, &[]),
            ev(500, 0xF1, &[]),
        ];
        let interp = interpret(&events);
        assert_eq!(
            interp.tempos,
            vec![
                TempoChange { time: 0, bpm: 125 },
                TempoChange { time: 960, bpm: 120 },
            ]
        );
    }

    #[test]
    fn defaults_when_stream_is_empty() {
        let interp = interpret(&[]);
        assert_eq!(interp.tempos, vec![TempoChange { time: 0, bpm: 125 }]);
        assert_eq!(
            interp.time_signatures,
            vec![TimeSignature {
                time: 0,
                numerator: 4,
                denominator: 4,
            }]
        );
    }

    #[test]
    fn time_signature_uses_power_of_two_denominator() {
        let events = vec![ev(10, 0xFF, &[0x58, 0x06, 0x03, 0xFE])];
        let interp = interpret(&events);
        assert_eq!(
            interp.time_signatures,
            vec![TimeSignature {
                time: 10,
                numerator: 6,
                denominator: 8,
            }]
        );
    }

    #[test]
    fn hooks_pair_start_and_end() {
        let events = vec![
            // End with no open start: dropped.
            ev(5, 0xF3, &[0x01]),
            ev(5, 0xF3, &[0x00]),
            ev(100, 0xF3, &[0x01]),
            ev(50, 0xF3, &[0x02]),
            ev(200, 0xF3, &[0x03]),
        ];
        let interp = interpret(&events);
        assert_eq!(
            interp.hooks,
            vec![
                Section { start: 10, end: 110 },
                Section {
                    start: 160,
                    end: 360,
                },
            ]
        );
    }

    #[test]
    fn sections_and_fadeout() {
        let events = vec![
            ev(0, 0xF6, &[0x00]),
            ev(1000, 0xF6, &[0x01]),
            ev(0, 0xF8, &[0x00]),
            ev(250, 0xF8, &[0x01]),
            ev(0, 0xF5, &[]),
            ev(0, 0xF4, &[0x02]),
        ];
        let interp = interpret(&events);
        assert_eq!(interp.song_sections, vec![Section { start: 0, end: 1000 }]);
        assert_eq!(
            interp.adpcm_sections,
            vec![Section {
                start: 1000,
                end: 1250,
            }]
        );
        assert_eq!(interp.two_chorus_fadeout_time, Some(1250));
        assert_eq!(interp.guide_melody_delimiters, vec![(1250, 0x02)]);
    }
}
