#![doc = r#"
Offline export to a Standard MIDI File.

Decoded tracks are millisecond-based; SMF tracks are tick-based under
a tempo map. [`MidiTimeConverter`] integrates the derived tempo map
piecewise to turn absolute milliseconds into absolute ticks, and
[`to_standard_midi_file`] writes a format 1 file: one conductor track
carrying tempo and time-signature metas, then one track per physical
`(port, channel)` pair that has events.

Note the delta times here are the 7-bit SMF encoding, not the 6-bit
encoding the source streams use.
"#]

use std::collections::BTreeMap;

use crate::{
    mtrack::Interpretation,
    ptrack::AbsoluteEvent,
};

/// Tick resolution of exported files.
pub const TICKS_PER_QUARTER_NOTE: u16 = 480;

#[doc = r#"
Piecewise milliseconds-to-ticks conversion over a tempo map.
"#]
pub struct MidiTimeConverter {
    ticks_per_quarter_note: u16,
    /// `(time_ms, bpm)`, sorted by time.
    changes: Vec<(u32, f64)>,
}

impl MidiTimeConverter {
    pub const fn new(ticks_per_quarter_note: u16) -> Self {
        Self {
            ticks_per_quarter_note,
            changes: Vec::new(),
        }
    }

    /// Add a tempo change; a later change at the same time replaces the
    /// earlier one.
    pub fn add_tempo_change(&mut self, time_ms: u32, bpm: f64) {
        if bpm <= 0.0 {
            return;
        }
        self.changes.retain(|(t, _)| *t != time_ms);
        let at = self
            .changes
            .partition_point(|(t, _)| *t <= time_ms);
        self.changes.insert(at, (time_ms, bpm));
    }

    /// Convert an absolute millisecond time to absolute ticks.
    ///
    /// Before the first change the first change's tempo applies, so a
    /// map anchored after zero does not distort the opening span.
    pub fn millis_to_ticks(&self, time_ms: u32) -> u32 {
        let Some(&(_, first_bpm)) = self.changes.first() else {
            return 0;
        };
        let mut ticks = 0.0f64;
        let mut prev_time = 0u32;
        let mut bpm = first_bpm;

        for &(change_time, change_bpm) in &self.changes {
            if change_time > time_ms {
                break;
            }
            ticks += self.span_ticks(change_time - prev_time, bpm);
            prev_time = change_time;
            bpm = change_bpm;
        }
        ticks += self.span_ticks(time_ms.saturating_sub(prev_time), bpm);
        ticks.round() as u32
    }

    fn span_ticks(&self, duration_ms: u32, bpm: f64) -> f64 {
        let micros_per_beat = 60_000_000.0 / bpm;
        let micros = f64::from(duration_ms) * 1000.0;
        micros / micros_per_beat * f64::from(self.ticks_per_quarter_note)
    }
}

/// Append an SMF 7-bit variable-length quantity.
fn push_var_len(out: &mut Vec<u8>, mut value: u32) {
    let mut stack = [0u8; 5];
    let mut n = 0;
    loop {
        stack[n] = (value & 0x7F) as u8;
        value >>= 7;
        n += 1;
        if value == 0 {
            break;
        }
    }
    while n > 1 {
        n -= 1;
        out.push(stack[n] | 0x80);
    }
    out.push(stack[0]);
}

/// One tick-timed SMF event payload (status and data, no delta).
struct TickEvent {
    ticks: u32,
    bytes: Vec<u8>,
}

fn finish_track(events: Vec<TickEvent>) -> Vec<u8> {
    let mut body = Vec::new();
    let mut prev = 0u32;
    for ev in events {
        push_var_len(&mut body, ev.ticks.saturating_sub(prev));
        body.extend_from_slice(&ev.bytes);
        prev = ev.ticks;
    }
    // End of track meta.
    push_var_len(&mut body, 0);
    body.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    let mut chunk = Vec::with_capacity(body.len() + 8);
    chunk.extend_from_slice(b"MTrk");
    chunk.extend_from_slice(&(body.len() as u32).to_be_bytes());
    chunk.extend_from_slice(&body);
    chunk
}

/// Render decoded tracks and timing data as a format 1 SMF byte
/// stream.
pub fn to_standard_midi_file(
    tracks: &[Vec<AbsoluteEvent>],
    interpretation: &Interpretation,
) -> Vec<u8> {
    let mut converter = MidiTimeConverter::new(TICKS_PER_QUARTER_NOTE);
    for tempo in &interpretation.tempos {
        converter.add_tempo_change(tempo.time, f64::from(tempo.bpm));
    }

    // Conductor track: tempo and time-signature metas.
    let mut conductor = Vec::new();
    for tempo in &interpretation.tempos {
        let micros_per_beat = (60_000_000.0 / f64::from(tempo.bpm)).round() as u32;
        let [_, a, b, c] = micros_per_beat.to_be_bytes();
        conductor.push(TickEvent {
            ticks: converter.millis_to_ticks(tempo.time),
            bytes: vec![0xFF, 0x51, 0x03, a, b, c],
        });
    }
    for sig in &interpretation.time_signatures {
        let exponent = sig.denominator.trailing_zeros() as u8;
        conductor.push(TickEvent {
            ticks: converter.millis_to_ticks(sig.time),
            bytes: vec![0xFF, 0x58, 0x04, sig.numerator as u8, exponent, 24, 8],
        });
    }
    conductor.sort_by_key(|ev| ev.ticks);

    // One track per (port, channel slot) that has events. A BTreeMap
    // keeps the track order deterministic.
    let mut channel_tracks: BTreeMap<(u8, u8), Vec<TickEvent>> = BTreeMap::new();
    for track in tracks {
        for ev in track {
            let bytes = match ev.status {
                0xF0 => {
                    let mut bytes = vec![0xF0];
                    push_var_len(&mut bytes, ev.data.len() as u32);
                    bytes.extend_from_slice(&ev.data);
                    bytes
                }
                // Stream-internal statuses have no SMF form.
                0xF8 | 0xF9 | 0xFA | 0xFD => continue,
                status => {
                    let mut bytes = vec![status];
                    bytes.extend_from_slice(&ev.data);
                    bytes
                }
            };
            channel_tracks
                .entry((ev.port, ev.channel))
                .or_default()
                .push(TickEvent {
                    ticks: converter.millis_to_ticks(ev.time),
                    bytes,
                });
        }
    }

    let track_count = 1 + channel_tracks.len() as u16;
    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // format 1
    out.extend_from_slice(&track_count.to_be_bytes());
    out.extend_from_slice(&TICKS_PER_QUARTER_NOTE.to_be_bytes());

    out.extend_from_slice(&finish_track(conductor));
    for (_, events) in channel_tracks {
        out.extend_from_slice(&finish_track(events));
    }
    out
}
