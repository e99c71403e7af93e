#![doc = r#"
P-track decoding: the per-port event streams.

A P-track is a delta-timed stream of channel events (notes, controls,
pitch bend), system events (SysEx, ADPCM triggers), and a channel
grouping latch, terminated by four zero bytes. Decoding happens in two
passes: [`PTrack::parse`] turns the bytes into [`TrackEvent`]s, and
[`PTrack::to_absolute`] resolves them against a routing entry into
sorted, physically addressed [`AbsoluteEvent`]s.
"#]

use crate::{
    error::{FormatError, FormatErrorKind, ReadResult},
    reader::Reader,
    track_info::{TrackInfoEntry, CHANNELS_PER_PORT, PORTS},
};

mod event;

pub use event::{AbsoluteEvent, TrackEvent};

/// The end-of-track mark: four zero bytes.
const EOT_MARK: [u8; 4] = [0, 0, 0, 0];

#[doc = r#"
One port's decoded event track.
"#]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PTrack {
    /// The track id from the chunk tag.
    pub id: u8,
    /// Decoded events in stream order.
    pub events: Vec<TrackEvent>,
}

impl PTrack {
    /// Decode a P-track chunk payload.
    pub fn parse(id: u8, data: &[u8]) -> ReadResult<Self> {
        let mut reader = Reader::from_bytes(data);
        let mut events = Vec::new();
        while !reader.is_empty() {
            match parse_event(&mut reader)? {
                Some(ev) => events.push(ev),
                None => break,
            }
        }
        Ok(Self { id, events })
    }

    /// Resolve the stream into absolute-time events addressed to
    /// physical channels, per the track's routing entry.
    ///
    /// Durations are stored at quarter resolution unless the entry's
    /// lossless bit is set. Note-ons with velocity 0 or 1 are dropped
    /// together with their paired note-off; the originating hardware
    /// used such notes as markers, not sound.
    pub fn to_absolute(&self, entry: &TrackInfoEntry) -> Vec<AbsoluteEvent> {
        let mut out = Vec::new();
        let mut time = 0u32;
        let lossless = entry.is_lossless();
        // One-way latch: a 0xFD event enables channel grouping for the
        // rest of the track.
        let mut grouping = false;

        for ev in &self.events {
            time += ev.delta;
            let mut duration = ev.duration;
            if !lossless {
                duration <<= 2;
            }

            match (ev.status_type(), ev.data.as_slice()) {
                // Stored note-off form: carries both velocities.
                (0x80, &[note, on_velocity, off_velocity]) => {
                    if on_velocity > 1 {
                        relocate(
                            entry,
                            0x90 | ev.channel(),
                            &[note, on_velocity],
                            time,
                            grouping,
                            &mut out,
                        );
                        relocate(
                            entry,
                            0x80 | ev.channel(),
                            &[note, off_velocity],
                            time + duration,
                            grouping,
                            &mut out,
                        );
                    } else {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("suppressing marker note {note}, velocity {on_velocity}");
                    }
                }
                (0x90, &[note, velocity]) => {
                    if velocity > 1 {
                        relocate(entry, ev.status, &ev.data, time, grouping, &mut out);
                        relocate(
                            entry,
                            0x80 | ev.channel(),
                            &[note, 0x40],
                            time + duration,
                            grouping,
                            &mut out,
                        );
                    } else {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("suppressing marker note {note}, velocity {velocity}");
                    }
                }
                // Compact controller forms; the routing entry names the
                // controller they stand for.
                (0xA0, &[value]) => {
                    let cc = entry.channel_info[usize::from(ev.channel())].cc_ax;
                    relocate(
                        entry,
                        0xB0 | ev.channel(),
                        &[cc, value],
                        time,
                        grouping,
                        &mut out,
                    );
                }
                (0xC0, &[value]) => {
                    let cc = entry.channel_info[usize::from(ev.channel())].cc_cx;
                    relocate(
                        entry,
                        0xB0 | ev.channel(),
                        &[cc, value],
                        time,
                        grouping,
                        &mut out,
                    );
                }
                _ => {
                    relocate(entry, ev.status, &ev.data, time, grouping, &mut out);
                }
            }

            if ev.status == 0xFD {
                grouping = true;
            }
        }

        // Stable sort; control changes first at equal times so volume
        // moves land before the notes they shape.
        out.sort_by_key(|ev| (ev.time, u8::from(ev.status_type() != 0xB0)));
        out
    }
}

/// Time of the first audible note-on in a resolved event list, if any.
pub fn first_note_on_time(events: &[AbsoluteEvent]) -> Option<u32> {
    events
        .iter()
        .find(|ev| ev.status_type() == 0x90 && ev.data.len() >= 2 && ev.data[1] > 0)
        .map(|ev| ev.time)
}

/// Expand one logical event into physical `(port, channel)` events.
fn relocate(
    entry: &TrackInfoEntry,
    status: u8,
    data: &[u8],
    time: u32,
    grouping: bool,
    out: &mut Vec<AbsoluteEvent>,
) {
    // Escaped events carry their real status as the first data byte.
    let (status, data) = if status == 0xFE {
        match data.split_first() {
            Some((embedded, rest)) => (*embedded, rest),
            None => return,
        }
    } else {
        (status, data)
    };
    let status_type = status & 0xF0;

    // System events (SysEx, ADPCM triggers, the grouping latch) follow
    // the track's SysEx port mask at the port's base channel.
    if status_type == 0xF0 {
        for port in 0..PORTS {
            if (entry.sysex_ports >> port) & 1 != 1 {
                continue;
            }
            let channel = port * CHANNELS_PER_PORT;
            out.push(AbsoluteEvent::new(port, channel, time, status, data.to_vec()));
        }
        return;
    }

    let channel = status & 0x0F;
    let info = &entry.channel_info[usize::from(channel)];
    let mut single_group = entry.single_channel_groups[usize::from(channel)];
    if single_group == 0 {
        single_group = 1 << channel;
    }
    let group = if grouping {
        entry.channel_groups[usize::from(channel)]
    } else {
        single_group
    };

    for port in 0..PORTS {
        if (info.ports >> port) & 1 != 1 {
            continue;
        }
        for grouped in 0..CHANNELS_PER_PORT {
            if (group >> grouped) & 1 != 1 {
                continue;
            }
            let slot = port * CHANNELS_PER_PORT + grouped;
            out.push(AbsoluteEvent::new(
                port,
                slot,
                time,
                status_type | grouped,
                data.to_vec(),
            ));
        }
    }
}

/// Decode one event, or `None` at the end-of-track mark.
fn parse_event(reader: &mut Reader<'_>) -> ReadResult<Option<TrackEvent>> {
    let delta = reader.read_delta()?;

    if reader.remaining() >= 4 {
        let at = reader.position();
        if reader.read_array::<4>()? == EOT_MARK {
            return Ok(None);
        }
        reader.seek(at);
    }

    let status = reader.read_status_byte()?;
    let status_type = status & 0xF0;

    if status == 0xF0 {
        let data = reader.read_sysex_payload(0xF7)?;
        return Ok(Some(TrackEvent {
            delta,
            status,
            data,
            duration: 0,
        }));
    }

    let data_len: usize = match status_type {
        0x80 => 3,
        0x90 => 2,
        0xA0 | 0xC0 | 0xD0 => 1,
        0xB0 | 0xE0 => 2,
        _ => match status {
            0xF8 => 3,
            0xF9 | 0xFA => 1,
            0xFE => match reader.peek_u8()? & 0xF0 {
                // Escaped polyphonic key pressure.
                0xA0 => 3,
                // Escaped program change.
                0xC0 => 2,
                other => {
                    return Err(FormatError::new(
                        reader.position(),
                        FormatErrorKind::UnknownEscapedStatus(other),
                    ));
                }
            },
            // 0xFD and the remaining system statuses carry no data.
            _ => 0,
        },
    };

    let data_at = reader.position();
    let data = reader.read_bytes(data_len)?.to_vec();
    // The escape's embedded status byte is the one exception to the
    // clear-bit-7 rule.
    let validate = if status == 0xFE { &data[1..] } else { &data[..] };
    if let Some(&bad) = validate.iter().find(|b| **b & 0x80 == 0x80) {
        return Err(FormatError::new(
            data_at,
            FormatErrorKind::InvalidDataByte(bad),
        ));
    }

    let duration = if status_type == 0x80 || status_type == 0x90 {
        reader.read_var_num()?
    } else {
        0
    };

    Ok(Some(TrackEvent {
        delta,
        status,
        data,
        duration,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_info::ChannelInfo;
    use pretty_assertions::assert_eq;

    fn basic_entry() -> TrackInfoEntry {
        TrackInfoEntry {
            track_num: 0,
            track_status: 0,
            use_channel_group_flags: 0,
            single_channel_groups: [0; 16],
            channel_groups: [0; 16],
            channel_info: [ChannelInfo {
                attribute: 0,
                ports: 0b0001,
                cc_ax: 0x10,
                cc_cx: 0x20,
            }; 16],
            sysex_ports: 0b0001,
        }
    }

    fn note_on(delta: u32, channel: u8, note: u8, velocity: u8, duration: u32) -> TrackEvent {
        TrackEvent {
            delta,
            status: 0x90 | channel,
            data: vec![note, velocity],
            duration,
        }
    }

    #[test]
    fn parses_note_on_with_duration() {
        let track = PTrack::parse(0, &[0x0A, 0x90, 0x3C, 0x64, 0x30, 0, 0, 0, 0]).unwrap();
        assert_eq!(track.events, vec![note_on(0x0A, 0, 0x3C, 0x64, 0x30)]);
    }

    #[test]
    fn parses_stored_note_off_form() {
        let track = PTrack::parse(0, &[0x85, 0x3C, 0x64, 0x20, 0x08, 0, 0, 0, 0]).unwrap();
        assert_eq!(
            track.events,
            vec![TrackEvent {
                delta: 0,
                status: 0x85,
                data: vec![0x3C, 0x64, 0x20],
                duration: 8,
            }]
        );
    }

    #[test]
    fn parses_sysex() {
        let track = PTrack::parse(0, &[0xF0, 0x43, 0x10, 0xF7, 0, 0, 0, 0]).unwrap();
        assert_eq!(
            track.events,
            vec![TrackEvent {
                delta: 0,
                status: 0xF0,
                data: vec![0x43, 0x10, 0xF7],
                duration: 0,
            }]
        );
    }

    #[test]
    fn parses_escaped_statuses() {
        // Polyphonic pressure shape: three data bytes.
        let track = PTrack::parse(0, &[0xFE, 0xA5, 0x3C, 0x40, 0, 0, 0, 0]).unwrap();
        assert_eq!(track.events[0].data, vec![0xA5, 0x3C, 0x40]);

        // Program change shape: two data bytes.
        let track = PTrack::parse(0, &[0xFE, 0xC2, 0x07, 0, 0, 0, 0]).unwrap();
        assert_eq!(track.events[0].data, vec![0xC2, 0x07]);

        // Anything else under the escape is malformed.
        assert!(PTrack::parse(0, &[0xFE, 0x95, 0x00, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn rejects_high_bit_data() {
        assert!(PTrack::parse(0, &[0x90, 0x3C, 0x90, 0x00, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn stops_at_eot_mark() {
        let track = PTrack::parse(0, &[0xFD, 0, 0, 0, 0, 0x90, 0x3C, 0x64, 0x00]).unwrap();
        assert_eq!(track.events.len(), 1);
        assert_eq!(track.events[0].status, 0xFD);
    }

    #[test]
    fn note_on_expands_to_on_off_pair() {
        let entry = basic_entry();
        let track = PTrack {
            id: 0,
            events: vec![note_on(0, 0, 0x3C, 0x64, 10)],
        };
        let events = track.to_absolute(&entry);
        assert_eq!(
            events,
            vec![
                AbsoluteEvent::new(0, 0, 0, 0x90, vec![0x3C, 0x64]),
                // Standard-quality track: duration unit is 4 ms.
                AbsoluteEvent::new(0, 0, 40, 0x80, vec![0x3C, 0x40]),
            ]
        );
    }

    #[test]
    fn lossless_track_keeps_duration_unit() {
        let mut entry = basic_entry();
        entry.track_status = 0x80;
        let track = PTrack {
            id: 0,
            events: vec![note_on(0, 0, 0x3C, 0x64, 10)],
        };
        let events = track.to_absolute(&entry);
        assert_eq!(events[1].time, 10);
    }

    #[test]
    fn quiet_note_on_is_suppressed_entirely() {
        let entry = basic_entry();
        for velocity in [0, 1] {
            let track = PTrack {
                id: 0,
                events: vec![note_on(0, 0, 0x3C, velocity, 10)],
            };
            assert_eq!(track.to_absolute(&entry), vec![]);
        }

        // The stored note-off form is suppressed the same way.
        let track = PTrack {
            id: 0,
            events: vec![TrackEvent {
                delta: 0,
                status: 0x80,
                data: vec![0x3C, 0x01, 0x20],
                duration: 10,
            }],
        };
        assert_eq!(track.to_absolute(&entry), vec![]);
    }

    #[test]
    fn stored_note_off_form_keeps_its_velocities() {
        let entry = basic_entry();
        let track = PTrack {
            id: 0,
            events: vec![TrackEvent {
                delta: 5,
                status: 0x80,
                data: vec![0x3C, 0x64, 0x22],
                duration: 1,
            }],
        };
        let events = track.to_absolute(&entry);
        assert_eq!(
            events,
            vec![
                AbsoluteEvent::new(0, 0, 5, 0x90, vec![0x3C, 0x64]),
                AbsoluteEvent::new(0, 0, 9, 0x80, vec![0x3C, 0x22]),
            ]
        );
    }

    #[test]
    fn compact_controller_forms_are_rewritten() {
        let entry = basic_entry();
        let track = PTrack {
            id: 0,
            events: vec![
                TrackEvent {
                    delta: 0,
                    status: 0xA3,
                    data: vec![0x55],
                    duration: 0,
                },
                TrackEvent {
                    delta: 2,
                    status: 0xC3,
                    data: vec![0x44],
                    duration: 0,
                },
            ],
        };
        let events = track.to_absolute(&entry);
        assert_eq!(
            events,
            vec![
                AbsoluteEvent::new(0, 3, 0, 0xB3, vec![0x10, 0x55]),
                AbsoluteEvent::new(0, 3, 2, 0xB3, vec![0x20, 0x44]),
            ]
        );
    }

    #[test]
    fn relocation_fans_out_ports_and_groups() {
        let mut entry = basic_entry();
        entry.channel_info[0].ports = 0b0101; // ports 0 and 2
        entry.single_channel_groups[0] = 0b1010; // channels 1 and 3

        let track = PTrack {
            id: 0,
            events: vec![note_on(0, 0, 0x3C, 0x64, 0)],
        };
        let events: Vec<_> = track
            .to_absolute(&entry)
            .into_iter()
            .filter(|ev| ev.status_type() == 0x90)
            .collect();

        assert_eq!(
            events,
            vec![
                AbsoluteEvent::new(0, 1, 0, 0x91, vec![0x3C, 0x64]),
                AbsoluteEvent::new(0, 3, 0, 0x93, vec![0x3C, 0x64]),
                AbsoluteEvent::new(2, 33, 0, 0x91, vec![0x3C, 0x64]),
                AbsoluteEvent::new(2, 35, 0, 0x93, vec![0x3C, 0x64]),
            ]
        );
    }

    #[test]
    fn grouping_latch_is_one_way() {
        let mut entry = basic_entry();
        entry.channel_groups[0] = 0b0011; // channels 0 and 1

        let track = PTrack {
            id: 0,
            events: vec![
                TrackEvent {
                    delta: 0,
                    status: 0xFD,
                    data: vec![],
                    duration: 0,
                },
                note_on(10, 0, 0x3C, 0x64, 0),
                note_on(10, 0, 0x3E, 0x64, 0),
            ],
        };
        let note_ons: Vec<_> = track
            .to_absolute(&entry)
            .into_iter()
            .filter(|ev| ev.status_type() == 0x90)
            .collect();

        // Both notes fan out to the grouped pair; nothing un-latches.
        assert_eq!(note_ons.len(), 4);
        assert_eq!(
            note_ons.iter().map(|ev| ev.channel).collect::<Vec<_>>(),
            vec![0, 1, 0, 1]
        );
    }

    #[test]
    fn sysex_follows_sysex_port_mask() {
        let mut entry = basic_entry();
        entry.sysex_ports = 0b0110; // ports 1 and 2

        let track = PTrack {
            id: 0,
            events: vec![TrackEvent {
                delta: 0,
                status: 0xF0,
                data: vec![0x43, 0xF7],
                duration: 0,
            }],
        };
        let events = track.to_absolute(&entry);
        assert_eq!(
            events,
            vec![
                AbsoluteEvent::new(1, 16, 0, 0xF0, vec![0x43, 0xF7]),
                AbsoluteEvent::new(2, 32, 0, 0xF0, vec![0x43, 0xF7]),
            ]
        );
    }

    #[test]
    fn controls_sort_before_notes_at_equal_times() {
        let entry = basic_entry();
        let track = PTrack {
            id: 0,
            events: vec![
                note_on(0, 0, 0x3C, 0x64, 100),
                TrackEvent {
                    delta: 0,
                    status: 0xB0,
                    data: vec![0x07, 0x7F],
                    duration: 0,
                },
            ],
        };
        let events = track.to_absolute(&entry);
        assert_eq!(events[0].status, 0xB0);
        assert_eq!(events[1].status, 0x90);
    }

    #[test]
    fn finds_first_audible_note_on() {
        let events = vec![
            AbsoluteEvent::new(0, 0, 5, 0xB0, vec![0x07, 0x7F]),
            AbsoluteEvent::new(0, 0, 12, 0x90, vec![0x3C, 0x64]),
        ];
        assert_eq!(first_note_on_time(&events), Some(12));
        assert_eq!(first_note_on_time(&events[..1]), None);
    }
}
