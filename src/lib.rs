#![doc = r#"
Decoder and real-time player for the OKD karaoke container format.

An OKD file is a scrambled chunk stream holding per-port MIDI event
tracks (P-tracks), a meta/timing track (M-track), channel-routing
tables, and an optional trailing ADPCM backing-chorus block. This crate
descrambles and decodes the container, resolves every track into
absolute-time events addressed to physical `(port, channel)` pairs, and
schedules them in real time against a shared master clock over
caller-supplied MIDI sinks.

The usual flow:

1. [`Okd::load`](okd::Okd::load) with the file bytes and, for scrambled
   files, a [`ScrambleKey`](container::ScrambleKey).
2. [`Okd::playbacks`](okd::Okd::playbacks) for one
   [`Playback`](playback::Playback) per output device.
3. [`MasterClock::start`](clock::MasterClock::start), then
   [`Playback::play`](playback::Playback::play) each against a
   [`MidiSink`](device::MidiSink) (the `midir` feature provides one
   over a real OS output).

Offline, [`export`] renders the decoded tracks as a Standard MIDI File
and [`adpcm`] decodes the backing chorus to PCM.
"#]

pub mod adpcm;
pub mod clock;
pub mod container;
pub mod device;
pub mod error;
pub mod export;
pub mod mtrack;
pub mod okd;
pub mod playback;
pub mod ptrack;
pub mod reader;
pub mod sysex;
pub mod track_info;

#[doc = r#"
Common imports for working with OKD containers.
"#]
pub mod prelude {
    pub use crate::{
        clock::MasterClock,
        container::{AdpcmBoundary, ScrambleKey},
        device::MidiSink,
        error::{DeviceError, FormatError, KeyError, LoadError},
        mtrack::{Interpretation, MTrack},
        okd::{DecodedTrack, Okd},
        playback::{Playback, PlaybackHandle, SysExFilter},
        ptrack::{AbsoluteEvent, PTrack},
        track_info::TrackInfo,
    };

    #[cfg(feature = "midir")]
    pub use crate::device::MidirSink;
}
