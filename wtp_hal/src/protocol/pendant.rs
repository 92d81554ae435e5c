//! Pendant indicator framing.
//!
//! ```text
//! ┌─────┬─────┬─────┬───────────┬─────┬─────┐
//! │ STX │ LEN │ CMD │ PARAM ... │ XOR │ ETX │
//! │ 02  │  n  │     │           │     │ 03  │
//! └─────┴─────┴─────┴───────────┴─────┴─────┘
//!         n = number of payload bytes (CMD + PARAM)
//!         XOR over payload bytes only
//! ```
//!
//! Frames are small and fixed in size, so they are built into a
//! `heapless::Vec` on the stack.

use heapless::Vec;
use thiserror::Error;

/// Start of frame.
pub const STX: u8 = 0x02;
/// End of frame.
pub const ETX: u8 = 0x03;
/// Positive acknowledge.
pub const ACK: u8 = 0x06;

/// Identify command.
pub const CMD_IDENTIFY: u8 = 0xFF;
/// Buzzer command.
pub const CMD_BUZZER: u8 = 0xB0;

/// Largest frame we ever build or accept.
pub const MAX_FRAME_LEN: usize = 16;
/// Largest payload that fits into a frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - 4;

/// Encoded frame.
pub type Frame = Vec<u8, MAX_FRAME_LEN>;
/// Decoded payload.
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload does not fit into a frame.
    #[error("Payload of {0} bytes exceeds frame capacity")]
    PayloadTooLong(usize),

    /// Payload is empty.
    #[error("Empty payload")]
    EmptyPayload,

    /// Fewer bytes than the smallest valid frame.
    #[error("Truncated frame ({0} bytes)")]
    Truncated(usize),

    /// First byte is not STX.
    #[error("Missing STX")]
    MissingStx,

    /// Last byte is not ETX.
    #[error("Missing ETX")]
    MissingEtx,

    /// LEN field disagrees with the frame size.
    #[error("Length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        /// LEN byte
        declared: usize,
        /// Payload bytes present
        actual: usize,
    },

    /// XOR checksum mismatch.
    #[error("Checksum mismatch: expected {expected:#04X}, got {actual:#04X}")]
    Checksum {
        /// Computed over the payload
        expected: u8,
        /// Carried in the frame
        actual: u8,
    },
}

/// LED slot on the pendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedPosition {
    /// Left column, top
    Left1,
    /// Left column, middle
    Left2,
    /// Left column, bottom
    Left3,
    /// Right column, top
    Right1,
    /// Right column, middle
    Right2,
    /// Right column, bottom
    Right3,
}

impl LedPosition {
    /// All slots.
    pub const ALL: [LedPosition; 6] = [
        LedPosition::Left1,
        LedPosition::Left2,
        LedPosition::Left3,
        LedPosition::Right1,
        LedPosition::Right2,
        LedPosition::Right3,
    ];

    /// Address byte.
    pub const fn code(self) -> u8 {
        match self {
            LedPosition::Left1 => 0xC1,
            LedPosition::Left2 => 0xC2,
            LedPosition::Left3 => 0xC3,
            LedPosition::Right1 => 0xD1,
            LedPosition::Right2 => 0xD2,
            LedPosition::Right3 => 0xD3,
        }
    }

    /// Slot addressed by `code`.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
}

/// LED colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedColor {
    /// Off
    Off,
    /// Blue
    Blue,
    /// Green
    Green,
    /// Red
    Red,
    /// Yellow
    Yellow,
}

impl LedColor {
    /// Colour byte.
    pub const fn code(self) -> u8 {
        match self {
            LedColor::Off => 0x30,
            LedColor::Blue => 0x31,
            LedColor::Green => 0x32,
            LedColor::Red => 0x33,
            LedColor::Yellow => 0x34,
        }
    }

    /// Colour for `code`.
    pub fn from_code(code: u8) -> Option<Self> {
        [
            LedColor::Off,
            LedColor::Blue,
            LedColor::Green,
            LedColor::Red,
            LedColor::Yellow,
        ]
        .into_iter()
        .find(|c| c.code() == code)
    }
}

/// XOR of all bytes.
#[inline]
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Wrap a payload into a frame.
pub fn encode(payload: &[u8]) -> Result<Frame, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLong(payload.len()));
    }

    let mut frame = Frame::new();
    // Capacity was checked above; pushes cannot fail.
    let _ = frame.push(STX);
    let _ = frame.push(payload.len() as u8);
    let _ = frame.extend_from_slice(payload);
    let _ = frame.push(checksum(payload));
    let _ = frame.push(ETX);
    Ok(frame)
}

/// Validate a complete frame and return its payload.
pub fn decode(frame: &[u8]) -> Result<Payload, ProtocolError> {
    if frame.len() < 5 {
        return Err(ProtocolError::Truncated(frame.len()));
    }
    if frame[0] != STX {
        return Err(ProtocolError::MissingStx);
    }
    if frame[frame.len() - 1] != ETX {
        return Err(ProtocolError::MissingEtx);
    }

    let declared = usize::from(frame[1]);
    let payload = &frame[2..frame.len() - 2];
    if declared != payload.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    let expected = checksum(payload);
    let actual = frame[frame.len() - 2];
    if expected != actual {
        return Err(ProtocolError::Checksum { expected, actual });
    }

    Payload::from_slice(payload).map_err(|_| ProtocolError::PayloadTooLong(payload.len()))
}

/// `02 01 FF FF 03`
pub fn identify_frame() -> Frame {
    single(&[CMD_IDENTIFY])
}

/// Set one LED.
pub fn led_frame(position: LedPosition, color: LedColor) -> Frame {
    single(&[position.code(), color.code()])
}

/// Switch the buzzer.
pub fn buzzer_frame(on: bool) -> Frame {
    single(&[CMD_BUZZER, u8::from(on)])
}

/// LED test pattern used as the fallback probe: left LED 1 blue.
pub fn led_test_frame() -> Frame {
    led_frame(LedPosition::Left1, LedColor::Blue)
}

fn single(payload: &[u8]) -> Frame {
    // Fixed payloads of at most two bytes always fit.
    encode(payload).unwrap_or_default()
}

/// Locate the first `STX ... ETX` span in `bytes`.
pub fn find_frame(bytes: &[u8]) -> Option<&[u8]> {
    let start = bytes.iter().position(|&b| b == STX)?;
    let end = bytes[start + 1..].iter().position(|&b| b == ETX)?;
    Some(&bytes[start..start + 1 + end + 1])
}

/// True if `bytes` is an acceptable answer from a pendant.
///
/// Accepts a leading ACK or STX, or any complete STX...ETX span.
pub fn is_pendant_response(bytes: &[u8]) -> bool {
    match bytes.first() {
        None => false,
        Some(&ACK) | Some(&STX) => true,
        Some(_) => find_frame(bytes).is_some(),
    }
}
