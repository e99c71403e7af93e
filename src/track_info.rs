#![doc = r#"
Per-track channel-routing tables.

Each logical event track carries one entry describing which physical
ports its channels fan out to, how channels group together, and which
controller numbers the compact `0xA0`/`0xC0` status forms stand for.
Two layouts exist: the legacy `YPTI` table and the extended `YPXI`
table, which adds reserved fields and a global tone-generator mode.
"#]

use crate::{error::ReadResult, reader::Reader};

/// Channels carried per physical port.
pub const CHANNELS_PER_PORT: u8 = 16;
/// Physical output ports addressable by the routing tables.
pub const PORTS: u8 = 4;

/// Routing data for one of a track's 16 channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Channel attribute flags (kept verbatim).
    pub attribute: u16,
    /// Bitmask of ports this channel is emitted to.
    pub ports: u16,
    /// Controller number substituted for the `0xA0` status form.
    pub cc_ax: u8,
    /// Controller number substituted for the `0xC0` status form.
    pub cc_cx: u8,
}

#[doc = r#"
One track's routing entry, keyed by `track_num`.
"#]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfoEntry {
    /// The logical track id this entry routes.
    pub track_num: u8,
    /// Status flags; bit 7 marks a lossless track.
    pub track_status: u8,
    /// Which channels carry an explicit single-channel group mask.
    pub use_channel_group_flags: u16,
    /// Fan-out masks used while channel grouping is disabled.
    pub single_channel_groups: [u16; 16],
    /// Fan-out masks used once the `0xFD` grouping latch is set.
    pub channel_groups: [u16; 16],
    /// Per-channel routing and controller remaps.
    pub channel_info: [ChannelInfo; 16],
    /// Bitmask of ports that receive the track's SysEx traffic.
    pub sysex_ports: u16,
}

impl TrackInfoEntry {
    /// Duration values in this track are stored at full resolution.
    pub const fn is_lossless(&self) -> bool {
        self.track_status & 0x80 == 0x80
    }
}

/// A parsed routing table, legacy or extended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// Global tone-generator mode; only present in the extended layout,
    /// where it changes device-reset semantics downstream.
    pub tg_mode: Option<u16>,
    /// Entries, one per logical track.
    pub entries: Vec<TrackInfoEntry>,
}

impl TrackInfo {
    /// Parse the legacy `YPTI` layout.
    pub fn parse(data: &[u8]) -> ReadResult<Self> {
        let mut reader = Reader::from_bytes(data);
        let count = reader.read_u16_be()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let track_num = reader.read_u8()?;
            let track_status = reader.read_u8()?;
            let use_channel_group_flags = reader.read_u16_be()?;

            let mut single_channel_groups = [0u16; 16];
            for (ch, group) in single_channel_groups.iter_mut().enumerate() {
                // Only channels flagged in the header word carry a mask.
                if (use_channel_group_flags >> ch) & 1 == 1 {
                    *group = reader.read_u16_be()?;
                }
            }

            let mut channel_groups = [0u16; 16];
            for group in channel_groups.iter_mut() {
                *group = reader.read_u16_be()?;
            }

            let mut channel_info = [ChannelInfo::default(); 16];
            for info in channel_info.iter_mut() {
                *info = ChannelInfo {
                    attribute: u16::from(reader.read_u8()?),
                    ports: u16::from(reader.read_u8()?),
                    cc_ax: reader.read_u8()?,
                    cc_cx: reader.read_u8()?,
                };
            }

            // Legacy quirk: this one field is little-endian.
            let sysex_ports = reader.read_u16_le()?;

            entries.push(TrackInfoEntry {
                track_num,
                track_status,
                use_channel_group_flags,
                single_channel_groups,
                channel_groups,
                channel_info,
                sysex_ports,
            });
        }
        Ok(Self {
            tg_mode: None,
            entries,
        })
    }

    /// Parse the extended `YPXI` layout.
    pub fn parse_extended(data: &[u8]) -> ReadResult<Self> {
        let mut reader = Reader::from_bytes(data);
        let _reserved = reader.read_u64_be()?;
        let tg_mode = reader.read_u16_be()?;
        let count = reader.read_u16_be()?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let track_num = reader.read_u8()?;
            let track_status = reader.read_u8()?;
            let _reserved = reader.read_u16_be()?;

            let mut single_channel_groups = [0u16; 16];
            for group in single_channel_groups.iter_mut() {
                *group = reader.read_u16_be()?;
            }

            let mut channel_groups = [0u16; 16];
            for group in channel_groups.iter_mut() {
                *group = reader.read_u16_be()?;
            }

            let mut channel_info = [ChannelInfo::default(); 16];
            for info in channel_info.iter_mut() {
                *info = ChannelInfo {
                    attribute: reader.read_u16_le()?,
                    ports: reader.read_u16_be()?,
                    cc_ax: {
                        let _reserved = reader.read_u16_be()?;
                        reader.read_u8()?
                    },
                    cc_cx: reader.read_u8()?,
                };
            }

            let sysex_ports = reader.read_u16_be()?;
            let _reserved2 = reader.read_u16_be()?;

            entries.push(TrackInfoEntry {
                track_num,
                track_status,
                use_channel_group_flags: 0,
                single_channel_groups,
                channel_groups,
                channel_info,
                sysex_ports,
            });
        }
        Ok(Self {
            tg_mode: Some(tg_mode),
            entries,
        })
    }

    /// True when this table uses the extended layout.
    pub const fn is_extended(&self) -> bool {
        self.tg_mode.is_some()
    }

    /// Find the entry routing a given logical track. Tables are small,
    /// a linear scan is fine.
    pub fn entry_for(&self, track_num: u8) -> Option<&TrackInfoEntry> {
        self.entries.iter().find(|e| e.track_num == track_num)
    }
}
