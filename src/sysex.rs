#![doc = r#"
Run compression for device-control SysEx traffic.

Setup dumps address the tone generator with long trains of one-byte
parameter writes, each wrapped in a full SysEx message. Consecutive
writes to the same `(device, model, address-high, address-mid)` block
can share a single 4-byte preamble, with each write reduced to an
`(address-low, value)` pair. This is a dialect-specific encoder, not a
general SysEx transform; three model dialects are recognized.
"#]

use num_enum::TryFromPrimitive;

/// Work buffers are fixed at the device's block size.
const WORK_BUFFER_LEN: usize = 256;

/// The recognized tone-generator dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum ModelId {
    /// Legacy tone generator.
    Type31 = 0x31,
    /// Extended tone generator.
    Type51 = 0x51,
    /// Effects processor, signalled indirectly via a `0x72` byte.
    Type71 = 0x71,
}

impl ModelId {
    /// The command code folded into the preamble's second byte.
    const fn command(self) -> u8 {
        match self {
            Self::Type31 => 0x01,
            Self::Type51 => 0x02,
            Self::Type71 => 0x03,
        }
    }
}

/// What one message did to the compressor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressOutcome {
    /// The message joined the current run; nothing to emit yet.
    Absorbed,
    /// The message started a new run, flushing the previous one.
    Flushed(Vec<u8>),
    /// The message was not compressible. Any pending run is flushed so
    /// later messages still compress; the stream is not aborted.
    Rejected(Option<Vec<u8>>),
}

/// The block a run accumulates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunKey {
    device: u8,
    model: ModelId,
    addr_h: u8,
    addr_m: u8,
}

#[doc = r#"
The stateful message-at-a-time encoder.

Two fixed-size work buffers alternate on flush so a caller can hold the
flushed run while the next one accumulates.
"#]
pub struct SysExCompressor {
    buffers: [[u8; WORK_BUFFER_LEN]; 2],
    selector: usize,
    count: usize,
    run: Option<RunKey>,
}

impl Default for SysExCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl SysExCompressor {
    pub const fn new() -> Self {
        Self {
            buffers: [[0; WORK_BUFFER_LEN]; 2],
            selector: 0,
            count: 0,
            run: None,
        }
    }

    /// Feed one complete SysEx message (status byte through `0xF7`).
    pub fn push(&mut self, message: &[u8]) -> CompressOutcome {
        let Some(model) = classify(message) else {
            let flushed = self.flush();
            self.run = None;
            self.selector = 0;
            return CompressOutcome::Rejected(flushed);
        };

        // Field layout differs between the direct and indirect dialects.
        let (device, addr_h, addr_m, addr_l, payload_at) = match model {
            ModelId::Type31 | ModelId::Type51 => {
                (message[2] & 0x0F, message[4], message[5], message[6], 7)
            }
            ModelId::Type71 => (message[4] & 0x0F, message[5], message[6], message[7], 8),
        };
        // The final two bytes are the checksum and terminator; bytes
        // with bit 7 set are never parameter values.
        let payload: Vec<u8> = message[payload_at..message.len() - 2]
            .iter()
            .copied()
            .filter(|b| b & 0x80 == 0)
            .collect();

        // A write into the reserved top of the zero page is control
        // traffic, not a parameter; pass it through.
        if addr_h == 0x00 && addr_m == 0x00 && addr_l > 0x6F {
            let flushed = self.flush_keeping_run();
            return CompressOutcome::Rejected(flushed);
        }

        let key = RunKey {
            device,
            model,
            addr_h,
            addr_m,
        };
        let mut outcome = CompressOutcome::Absorbed;

        if self.run != Some(key) {
            if self.count > 0 {
                let out = self.take_buffer();
                self.selector = 1 - self.selector;
                outcome = CompressOutcome::Flushed(out);
            }
            self.write_preamble(message[0], key);
        }

        for (i, value) in payload.into_iter().enumerate() {
            // A very long run would overrun the fixed block; split it,
            // repeating the preamble.
            if self.count + 2 >= WORK_BUFFER_LEN {
                let out = self.take_buffer();
                self.selector = 1 - self.selector;
                self.write_preamble(message[0], key);
                outcome = CompressOutcome::Flushed(out);
            }
            self.buffers[self.selector][self.count] = addr_l.wrapping_add(i as u8);
            self.buffers[self.selector][self.count + 1] = value;
            self.count += 2;
        }

        self.run = Some(key);
        outcome
    }

    /// Flush any pending run and reset run state.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        let out = self.flush_keeping_run();
        self.run = None;
        out
    }

    fn flush_keeping_run(&mut self) -> Option<Vec<u8>> {
        if self.count == 0 {
            return None;
        }
        Some(self.take_buffer())
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        let mut out = self.buffers[self.selector][..self.count].to_vec();
        out.push(0xF7);
        self.count = 0;
        out
    }

    fn write_preamble(&mut self, status: u8, key: RunKey) {
        let buffer = &mut self.buffers[self.selector];
        buffer[self.count] = status;
        buffer[self.count + 1] = key.device + key.model.command() * 0x10;
        buffer[self.count + 2] = key.addr_h;
        buffer[self.count + 3] = key.addr_m;
        self.count += 4;
    }
}

/// Classify a message's dialect from its fixed header bytes.
fn classify(message: &[u8]) -> Option<ModelId> {
    if message.len() < 10 || message[1] != 0x43 {
        return None;
    }
    match message[3] {
        0x72 if message[2] == 0x75 => Some(ModelId::Type71),
        // 0x71 only ever arrives via the 0x72 marker above.
        0x71 => None,
        b => ModelId::try_from_primitive(b).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write31(device: u8, addr: [u8; 3], values: &[u8]) -> Vec<u8> {
        let mut msg = vec![0xF0, 0x43, 0x10 | device, 0x31, addr[0], addr[1], addr[2]];
        msg.extend_from_slice(values);
        msg.push(0x00); // checksum, ignored
        msg.push(0xF7);
        msg
    }

    /// Replay a compressed run into its individual `(address, value)`
    /// writes.
    fn replay(run: &[u8]) -> Vec<(u8, u8, u8, u8)> {
        let (addr_h, addr_m) = (run[2], run[3]);
        run[4..run.len() - 1]
            .chunks_exact(2)
            .map(|pair| (addr_h, addr_m, pair[0], pair[1]))
            .collect()
    }

    #[test]
    fn same_block_messages_share_a_preamble() {
        let mut compressor = SysExCompressor::new();
        assert_eq!(
            compressor.push(&write31(0, [0x02, 0x03, 0x00], &[0x11, 0x22])),
            CompressOutcome::Absorbed
        );
        assert_eq!(
            compressor.push(&write31(0, [0x02, 0x03, 0x05], &[0x33])),
            CompressOutcome::Absorbed
        );
        assert_eq!(
            compressor.flush(),
            Some(vec![
                0xF0, 0x10, 0x02, 0x03, 0x00, 0x11, 0x01, 0x22, 0x05, 0x33, 0xF7
            ])
        );
        assert_eq!(compressor.flush(), None);
    }

    #[test]
    fn block_change_flushes_previous_run() {
        let mut compressor = SysExCompressor::new();
        compressor.push(&write31(0, [0x02, 0x03, 0x00], &[0x11]));
        let outcome = compressor.push(&write31(0, [0x02, 0x04, 0x00], &[0x22]));
        assert_eq!(
            outcome,
            CompressOutcome::Flushed(vec![0xF0, 0x10, 0x02, 0x03, 0x00, 0x11, 0xF7])
        );
        assert_eq!(
            compressor.flush(),
            Some(vec![0xF0, 0x10, 0x02, 0x04, 0x00, 0x22, 0xF7])
        );
    }

    #[test]
    fn replay_is_independent_of_message_boundaries() {
        // The same writes split two ways must replay identically.
        let split_a = [
            write31(1, [0x02, 0x03, 0x00], &[0x11, 0x22, 0x33]),
            write31(1, [0x02, 0x03, 0x03], &[0x44]),
        ];
        let split_b = [
            write31(1, [0x02, 0x03, 0x00], &[0x11]),
            write31(1, [0x02, 0x03, 0x01], &[0x22, 0x33, 0x44]),
        ];

        let writes = |messages: &[Vec<u8>]| {
            let mut compressor = SysExCompressor::new();
            let mut runs = Vec::new();
            for msg in messages {
                if let CompressOutcome::Flushed(run) = compressor.push(msg) {
                    runs.push(run);
                }
            }
            runs.extend(compressor.flush());
            runs.iter().flat_map(|run| replay(run)).collect::<Vec<_>>()
        };

        assert_eq!(writes(&split_a), writes(&split_b));
    }

    #[test]
    fn unrecognized_message_flushes_and_rejects() {
        let mut compressor = SysExCompressor::new();
        compressor.push(&write31(0, [0x02, 0x03, 0x00], &[0x11]));

        // Not a device-control message at all.
        let outcome = compressor.push(&[0x90, 0x3C, 0x64]);
        assert_eq!(
            outcome,
            CompressOutcome::Rejected(Some(vec![0xF0, 0x10, 0x02, 0x03, 0x00, 0x11, 0xF7]))
        );

        // The stream keeps compressing afterwards.
        assert_eq!(
            compressor.push(&write31(0, [0x02, 0x03, 0x00], &[0x55])),
            CompressOutcome::Absorbed
        );
        assert!(compressor.flush().is_some());
    }

    #[test]
    fn reserved_zero_page_address_is_rejected() {
        let mut compressor = SysExCompressor::new();
        let outcome = compressor.push(&write31(0, [0x00, 0x00, 0x70], &[0x01]));
        assert_eq!(outcome, CompressOutcome::Rejected(None));
    }

    #[test]
    fn short_messages_are_rejected() {
        let mut compressor = SysExCompressor::new();
        assert_eq!(
            compressor.push(&[0xF0, 0x43, 0x10, 0x31, 0x00, 0xF7]),
            CompressOutcome::Rejected(None)
        );
    }

    #[test]
    fn indirect_dialect_uses_shifted_field_layout() {
        let mut compressor = SysExCompressor::new();
        let msg = vec![
            0xF0, 0x43, 0x75, 0x72, 0x12, 0x05, 0x06, 0x00, 0x41, 0x00, 0xF7,
        ];
        assert_eq!(compressor.push(&msg), CompressOutcome::Absorbed);
        assert_eq!(
            compressor.flush(),
            // device 2, command 3 -> second preamble byte 0x32
            Some(vec![0xF0, 0x32, 0x05, 0x06, 0x00, 0x41, 0xF7])
        );
    }
}
