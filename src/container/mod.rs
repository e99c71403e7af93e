#![doc = r#"
Container-level decoding: the XOR descrambling pass, the five header
shapes, and framed chunk extraction.

An OKD file is a possibly-scrambled chunk stream. The scramble is a
16-bit-word XOR stream cipher keyed by a 256-entry table; it covers the
40-byte fixed header, the variant-specific option data, and the event
data region, but never the trailing ADPCM audio block.
"#]

mod descramble;
pub use descramble::*;

mod header;
pub use header::*;

mod chunk;
pub use chunk::*;
