#![doc = r#"
Real-time dispatch of resolved event tracks.

One [`Playback`] per output port runs a polling loop on its own OS
thread, reading the shared [`MasterClock`](crate::clock::MasterClock)
once per ~1 ms tick and pushing due events into its sink. A time jump
beyond the normal-playback threshold is treated as a seek: the cursor
is moved silently past the skipped events instead of replaying them.
"#]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, Sender};

use crate::{
    clock::MasterClock,
    device::MidiSink,
    ptrack::AbsoluteEvent,
};

/// A clock jump at or above this is a seek, not a playback tick.
const NORMAL_PLAYBACK_THRESHOLD_MS: i64 = 100;

/// Poll granularity of the dispatch loop.
const TICK: Duration = Duration::from_millis(1);

/// The master-volume SysEx prefix the default filter drops.
///
/// The originating hardware pair has a perceived volume imbalance when
/// these pass through; dropping them is tuning, not format semantics,
/// so the filter is a policy the caller can replace.
pub const MASTER_VOLUME_PREFIX: [u8; 8] = [0xF0, 0x43, 0x75, 0x72, 0x20, 0x30, 0x06, 0x04];

/// Policy deciding which SysEx messages are withheld from the sink.
#[derive(Debug, Clone)]
pub struct SysExFilter {
    prefixes: Vec<Vec<u8>>,
}

impl SysExFilter {
    /// A filter that blocks nothing.
    pub const fn allow_all() -> Self {
        Self {
            prefixes: Vec::new(),
        }
    }

    /// Block messages starting with any of the given prefixes.
    pub fn blocking(prefixes: Vec<Vec<u8>>) -> Self {
        Self { prefixes }
    }

    /// True when `message` must not reach the sink.
    pub fn blocks(&self, message: &[u8]) -> bool {
        self.prefixes.iter().any(|p| message.starts_with(p))
    }
}

impl Default for SysExFilter {
    fn default() -> Self {
        Self::blocking(vec![MASTER_VOLUME_PREFIX.to_vec()])
    }
}

/// Shared mute flags, checked only when dispatching notes.
#[derive(Debug, Default)]
pub struct MuteFlags {
    all: AtomicBool,
    channels: [AtomicBool; 16],
}

impl MuteFlags {
    pub fn set_all(&self, muted: bool) {
        self.all.store(muted, Ordering::Relaxed);
    }

    pub fn set_channel(&self, channel: u8, muted: bool) {
        if let Some(flag) = self.channels.get(usize::from(channel)) {
            flag.store(muted, Ordering::Relaxed);
        }
    }

    fn is_muted(&self, channel: u8) -> bool {
        self.all.load(Ordering::Relaxed)
            || self
                .channels
                .get(usize::from(channel))
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[doc = r#"
One port's scheduled playback over a sink.
"#]
pub struct Playback {
    events: Arc<Vec<AbsoluteEvent>>,
    total_play_time: i64,
    filter: SysExFilter,
    mutes: Arc<MuteFlags>,
}

/// Handle to a running playback thread.
pub struct PlaybackHandle {
    stop: Sender<()>,
    playing: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PlaybackHandle {
    /// True until the track finishes or is stopped.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Request a cooperative stop; the loop exits at its next poll.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }

    /// Stop and wait for the dispatch thread to exit.
    pub fn join(mut self) {
        let _ = self.stop.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Playback {
    pub fn new(events: Vec<AbsoluteEvent>) -> Self {
        let total_play_time = events.last().map_or(0, |ev| i64::from(ev.time));
        Self {
            events: Arc::new(events),
            total_play_time,
            filter: SysExFilter::default(),
            mutes: Arc::new(MuteFlags::default()),
        }
    }

    /// Replace the SysEx filter policy.
    pub fn with_filter(mut self, filter: SysExFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The shared mute flags; usable while playing.
    pub fn mutes(&self) -> Arc<MuteFlags> {
        Arc::clone(&self.mutes)
    }

    /// Last event time in milliseconds, zero for an empty track.
    pub fn total_play_time(&self) -> i64 {
        self.total_play_time
    }

    /// Start dispatching against `clock` on a new thread.
    ///
    /// The loop exits when the clock passes the last event or the
    /// handle is stopped; on a requested stop, every channel gets All
    /// Notes Off so nothing is left sounding. A track whose last event
    /// sits at time zero (or an empty one) has no natural end and only
    /// exits through [`PlaybackHandle::stop`] or
    /// [`PlaybackHandle::join`].
    pub fn play(&self, clock: Arc<MasterClock>, sink: Box<dyn MidiSink>) -> PlaybackHandle {
        let (stop, cancelled) = bounded::<()>(0);
        let playing = Arc::new(AtomicBool::new(true));

        let worker = {
            let events = Arc::clone(&self.events);
            let mutes = Arc::clone(&self.mutes);
            let filter = self.filter.clone();
            let playing = Arc::clone(&playing);
            let total = self.total_play_time;
            let mut sink = sink;

            thread::spawn(move || {
                let mut loop_state = DispatchState {
                    cursor: 0,
                    last_time: clock.now_millis(),
                    chorus_volume: None,
                };
                loop {
                    match cancelled.recv_timeout(TICK) {
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        _ => {
                            // Cooperative stop: silence everything.
                            let _ = sink.stop_all_sound();
                            break;
                        }
                    }
                    let now = clock.now_millis();
                    loop_state.tick(&events, now, &mutes, &filter, sink.as_mut());
                    if total > 0 && now >= total {
                        break;
                    }
                }
                playing.store(false, Ordering::Release);
            })
        };

        PlaybackHandle {
            stop,
            playing,
            worker: Some(worker),
        }
    }
}

struct DispatchState {
    cursor: usize,
    last_time: i64,
    /// Volume the next ADPCM trigger would sound at, from 0xFA events.
    // TODO: feed this into an ADPCM mixer once triggers drive audio.
    #[allow(dead_code)]
    chorus_volume: Option<u8>,
}

impl DispatchState {
    fn tick(
        &mut self,
        events: &[AbsoluteEvent],
        now: i64,
        mutes: &MuteFlags,
        filter: &SysExFilter,
        sink: &mut dyn MidiSink,
    ) {
        let delta = now - self.last_time;
        self.last_time = now;

        if delta < 0 || delta >= NORMAL_PLAYBACK_THRESHOLD_MS {
            // Seek: skip silently. A backwards jump re-scans from the
            // top since the cursor only ever advances.
            if delta < 0 {
                self.cursor = 0;
            }
            while events
                .get(self.cursor)
                .is_some_and(|ev| i64::from(ev.time) < now)
            {
                self.cursor += 1;
            }
            return;
        }

        while let Some(ev) = events.get(self.cursor) {
            if i64::from(ev.time) > now {
                break;
            }
            self.dispatch(ev, mutes, filter, sink);
            self.cursor += 1;
        }
    }

    fn dispatch(
        &mut self,
        ev: &AbsoluteEvent,
        mutes: &MuteFlags,
        filter: &SysExFilter,
        sink: &mut dyn MidiSink,
    ) {
        match ev.status {
            0xF0 => {
                let message = ev.to_bytes();
                if filter.blocks(&message) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("SysEx message withheld by filter");
                    return;
                }
                if let Err(_e) = sink.send_sysex(&message) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("SysEx send failed: {_e}");
                }
            }
            // ADPCM trigger volume; consumed locally, never sent.
            0xFA => self.chorus_volume = ev.data.first().copied(),
            // ADPCM triggers and the grouping latch have no MIDI form.
            0xF8 | 0xF9 | 0xFD => {}
            status => {
                let status_type = status & 0xF0;
                if (status_type == 0x80 || status_type == 0x90)
                    && mutes.is_muted(ev.channel_nibble())
                {
                    return;
                }
                if let Err(_e) = sink.send_short_message(status, &ev.data) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("short message send failed: {_e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MidiSink for RecordingSink {
        fn open(&mut self, _device_index: usize) -> Result<(), DeviceError> {
            Ok(())
        }
        fn close(&mut self) {}
        fn send_short_message(&mut self, status: u8, data: &[u8]) -> Result<(), DeviceError> {
            let mut bytes = vec![status];
            bytes.extend_from_slice(data);
            self.sent.lock().unwrap().push(bytes);
            Ok(())
        }
        fn send_sysex(&mut self, message: &[u8]) -> Result<(), DeviceError> {
            self.sent.lock().unwrap().push(message.to_vec());
            Ok(())
        }
    }

    fn note(time: u32, status: u8, data: &[u8]) -> AbsoluteEvent {
        AbsoluteEvent::new(0, status & 0x0F, time, status, data.to_vec())
    }

    fn run_to_completion(playback: &Playback) -> Vec<Vec<u8>> {
        let sink = RecordingSink::default();
        let sent = Arc::clone(&sink.sent);
        let clock = Arc::new(MasterClock::start());
        let handle = playback.play(Arc::clone(&clock), Box::new(sink));
        // The loop exits on its own once the clock passes the last
        // event; poll rather than sleeping a fixed worst case.
        for _ in 0..200 {
            if !handle.is_playing() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        handle.join();
        let out = sent.lock().unwrap().clone();
        out
    }

    #[test]
    fn dispatches_events_in_order() {
        let playback = Playback::new(vec![
            note(0, 0xB0, &[0x07, 0x64]),
            note(10, 0x90, &[0x3C, 0x50]),
            note(30, 0x80, &[0x3C, 0x40]),
        ]);
        let sent = run_to_completion(&playback);
        assert_eq!(
            sent,
            vec![
                vec![0xB0, 0x07, 0x64],
                vec![0x90, 0x3C, 0x50],
                vec![0x80, 0x3C, 0x40],
            ]
        );
    }

    #[test]
    fn muted_channels_skip_notes_only() {
        let playback = Playback::new(vec![
            note(0, 0xB2, &[0x07, 0x64]),
            note(5, 0x92, &[0x3C, 0x50]),
            note(10, 0x82, &[0x3C, 0x40]),
        ]);
        playback.mutes().set_channel(2, true);
        let sent = run_to_completion(&playback);
        // The control change still goes through.
        assert_eq!(sent, vec![vec![0xB2, 0x07, 0x64]]);
    }

    #[test]
    fn default_filter_drops_master_volume_sysex() {
        let mut blocked = MASTER_VOLUME_PREFIX.to_vec();
        blocked.extend_from_slice(&[0x10, 0xF7]);
        let playback = Playback::new(vec![
            AbsoluteEvent::new(0, 0, 0, 0xF0, blocked[1..].to_vec()),
            AbsoluteEvent::new(0, 0, 5, 0xF0, vec![0x43, 0x10, 0xF7]),
            note(10, 0x90, &[0x3C, 0x50]),
        ]);
        let sent = run_to_completion(&playback);
        assert_eq!(
            sent,
            vec![vec![0xF0, 0x43, 0x10, 0xF7], vec![0x90, 0x3C, 0x50]]
        );
    }

    #[test]
    fn seek_skips_events_silently() {
        let playback = Playback::new(vec![
            note(5_000, 0x90, &[0x3C, 0x50]),
            note(20_000, 0x90, &[0x3E, 0x50]),
        ]);
        let sink = RecordingSink::default();
        let sent = Arc::clone(&sink.sent);
        let clock = Arc::new(MasterClock::start());
        let handle = playback.play(Arc::clone(&clock), Box::new(sink));

        thread::sleep(Duration::from_millis(20));
        clock.seek(10_000);
        thread::sleep(Duration::from_millis(50));

        // The 5 s event fell inside the jump and must not have played.
        assert_eq!(sent.lock().unwrap().len(), 0);
        handle.join();
    }

    #[test]
    fn stop_drains_all_notes_off() {
        let playback = Playback::new(vec![note(60_000, 0x90, &[0x3C, 0x50])]);
        let sink = RecordingSink::default();
        let sent = Arc::clone(&sink.sent);
        let clock = Arc::new(MasterClock::start());
        let handle = playback.play(Arc::clone(&clock), Box::new(sink));
        thread::sleep(Duration::from_millis(20));
        handle.join();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 16);
        assert_eq!(sent[0], vec![0xB0, 123, 0]);
        assert_eq!(sent[15], vec![0xBF, 123, 0]);
    }
}
