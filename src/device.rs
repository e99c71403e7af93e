#![doc = r#"
The output sink boundary and tone-generator control messages.

The core never talks to a transport directly; it requires only the
four [`MidiSink`] operations with bounded latency. Builders for the
device-control SysEx messages live here too, as plain byte-vector
constructors, so they can be tested without a device.
"#]

use crate::error::DeviceError;

/// Channels addressable on one device.
const CHANNELS: u8 = 16;

#[doc = r#"
An output MIDI sink.

Implementations are expected to be non-blocking or bounded-latency;
send failures are surfaced per call and never retried here.
"#]
pub trait MidiSink: Send {
    /// Open the sink on a transport-specific device index.
    fn open(&mut self, device_index: usize) -> Result<(), DeviceError>;

    /// Close the sink. Safe to call when not open.
    fn close(&mut self);

    /// Send a short channel message: a status byte plus data bytes.
    fn send_short_message(&mut self, status: u8, data: &[u8]) -> Result<(), DeviceError>;

    /// Send a complete SysEx message, terminator included.
    fn send_sysex(&mut self, message: &[u8]) -> Result<(), DeviceError>;

    /// Release every sounding note: All Notes Off on all 16 channels.
    fn stop_all_sound(&mut self) -> Result<(), DeviceError> {
        for channel in 0..CHANNELS {
            self.send_short_message(0xB0 | channel, &[123, 0])?;
        }
        Ok(())
    }
}

/// Build the tone-generator reset message for a model `id`.
///
/// `mode` selects the generator's operating mode and must be 0 or 1.
pub fn reset_tg(id: u8, mode: u8) -> Result<[u8; 10], DeviceError> {
    if mode > 1 {
        return Err(DeviceError(format!("invalid TG mode {mode}")));
    }
    Ok([0xF0, 0x43, 0x10, id, 0x00, 0x00, 0x7F, mode, 0x00, 0xF7])
}

/// Build a transpose message; `key` is clamped to plus/minus 24
/// semitones around the 0x40 center.
pub fn transpose(id: u8, key: i32) -> [u8; 10] {
    let value = (0x40 + key.clamp(-24, 24)) as u8;
    [0xF0, 0x43, 0x10, id, 0x00, 0x00, 0x05, value, 0x00, 0xF7]
}

/// Build a universal master-volume message; `volume` is 14-bit and
/// saturates at 16383.
pub fn master_volume(volume: u16) -> [u8; 8] {
    let volume = volume.min(16383);
    let lsb = (volume & 0x7F) as u8;
    let msb = ((volume >> 7) & 0x7F) as u8;
    [0xF0, 0x7F, 0x7F, 0x04, 0x01, lsb, msb, 0xF7]
}

/// Build a song-volume write for the extended generator.
pub fn mms_write(address: u8, value: u8) -> [u8; 9] {
    [0xF0, 0x43, 0x75, 0x72, 0x75, address, value, 0x00, 0xF7]
}

/// Build an effects-block write for the legacy generator. The data
/// LSB is followed by a zero pad byte on the wire.
pub fn meg_write(addr1: u8, addr2: u8, data_m: u8, data_l: u8) -> [u8; 12] {
    [
        0xF0, 0x43, 0x75, 0x72, 0x20, 0x30, addr1, addr2, data_m, data_l, 0x00, 0xF7,
    ]
}

#[cfg(feature = "midir")]
pub use self::midir_sink::MidirSink;

#[cfg(feature = "midir")]
mod midir_sink {
    use super::MidiSink;
    use crate::error::DeviceError;
    use midir::{MidiOutput, MidiOutputConnection};

    /// A [`MidiSink`] backed by a real output port via `midir`.
    pub struct MidirSink {
        client_name: String,
        connection: Option<MidiOutputConnection>,
    }

    impl MidirSink {
        pub fn new(client_name: impl Into<String>) -> Self {
            Self {
                client_name: client_name.into(),
                connection: None,
            }
        }

        fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
            let Some(connection) = self.connection.as_mut() else {
                return Err(DeviceError("sink is not open".into()));
            };
            connection
                .send(bytes)
                .map_err(|e| DeviceError(e.to_string()))
        }
    }

    impl MidiSink for MidirSink {
        fn open(&mut self, device_index: usize) -> Result<(), DeviceError> {
            let output =
                MidiOutput::new(&self.client_name).map_err(|e| DeviceError(e.to_string()))?;
            let ports = output.ports();
            let port = ports
                .get(device_index)
                .ok_or_else(|| DeviceError(format!("no output port {device_index}")))?;
            let connection = output
                .connect(port, &self.client_name)
                .map_err(|e| DeviceError(e.to_string()))?;
            self.connection = Some(connection);
            Ok(())
        }

        fn close(&mut self) {
            if let Some(connection) = self.connection.take() {
                connection.close();
            }
        }

        fn send_short_message(&mut self, status: u8, data: &[u8]) -> Result<(), DeviceError> {
            let mut bytes = Vec::with_capacity(1 + data.len());
            bytes.push(status);
            bytes.extend_from_slice(data);
            self.send(&bytes)
        }

        fn send_sysex(&mut self, message: &[u8]) -> Result<(), DeviceError> {
            self.send(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reset_message_layout() {
        assert_eq!(
            reset_tg(0x51, 1).unwrap(),
            [0xF0, 0x43, 0x10, 0x51, 0x00, 0x00, 0x7F, 0x01, 0x00, 0xF7]
        );
        assert!(reset_tg(0x51, 2).is_err());
    }

    #[test]
    fn transpose_is_clamped_around_center() {
        assert_eq!(transpose(0x31, 0)[7], 0x40);
        assert_eq!(transpose(0x31, 12)[7], 0x4C);
        assert_eq!(transpose(0x31, -100)[7], 0x40 - 24);
        assert_eq!(transpose(0x31, 100)[7], 0x40 + 24);
    }

    #[test]
    fn effects_write_pads_before_terminator() {
        assert_eq!(
            meg_write(0x06, 0x04, 0x12, 0x7F),
            [0xF0, 0x43, 0x75, 0x72, 0x20, 0x30, 0x06, 0x04, 0x12, 0x7F, 0x00, 0xF7]
        );
    }

    #[test]
    fn song_volume_write_layout() {
        assert_eq!(
            mms_write(0x21, 0x40),
            [0xF0, 0x43, 0x75, 0x72, 0x75, 0x21, 0x40, 0x00, 0xF7]
        );
    }

    #[test]
    fn master_volume_splits_14_bits() {
        assert_eq!(master_volume(16383), [0xF0, 0x7F, 0x7F, 0x04, 0x01, 0x7F, 0x7F, 0xF7]);
        assert_eq!(master_volume(0x2000)[5..7], [0x00, 0x40]);
        // Saturates rather than wrapping.
        assert_eq!(master_volume(u16::MAX)[5..7], [0x7F, 0x7F]);
    }
}
