#[doc = r#"
One event as stored in a P-track stream: a delta time, a status byte,
its data bytes, and (for note statuses) a duration.

Delta times and durations are in the 6-bit continuation encoding and
still relative; [`PTrack::to_absolute`](super::PTrack::to_absolute)
turns these into [`AbsoluteEvent`]s addressed to physical channels.
"#]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    /// Milliseconds since the previous event.
    pub delta: u32,
    /// The raw status byte, channel nibble included.
    pub status: u8,
    /// Data bytes; for SysEx this is the payload through the `0xF7`.
    pub data: Vec<u8>,
    /// Note duration in stream units; 0 for non-note statuses.
    pub duration: u32,
}

impl TrackEvent {
    /// The status with the channel nibble masked off.
    pub const fn status_type(&self) -> u8 {
        self.status & 0xF0
    }

    /// The channel nibble.
    pub const fn channel(&self) -> u8 {
        self.status & 0x0F
    }
}

#[doc = r#"
A fully resolved event: absolute milliseconds, a physical port, and a
channel slot (`port * 16 + channel`) on that port.

This is the unit the scheduler dispatches and the SMF exporter writes.
"#]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsoluteEvent {
    /// Physical output port.
    pub port: u8,
    /// Channel slot, `port * 16 + channel` (0..=63).
    pub channel: u8,
    /// Absolute time in milliseconds from track start.
    pub time: u32,
    /// The status byte to emit.
    pub status: u8,
    /// Data bytes to emit after the status.
    pub data: Vec<u8>,
}

impl AbsoluteEvent {
    pub const fn new(port: u8, channel: u8, time: u32, status: u8, data: Vec<u8>) -> Self {
        Self {
            port,
            channel,
            time,
            status,
            data,
        }
    }

    /// The status with the channel nibble masked off.
    pub const fn status_type(&self) -> u8 {
        self.status & 0xF0
    }

    /// The channel nibble of the emitted status.
    pub const fn channel_nibble(&self) -> u8 {
        self.status & 0x0F
    }

    /// The complete wire bytes: status followed by data. For SysEx the
    /// data already carries the `0xF7` terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.data.len());
        bytes.push(self.status);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}
