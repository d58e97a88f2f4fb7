//! Encoding and decoding of the framing used on the wire between the host and
//! the test bench. The format is the one used by the MIN protocol:
//!
//! ```text
//! AA AA AA | id/control | [seq] | len | payload | crc32 | 55
//! ```
//!
//! - Three `0xAA` bytes open a frame and a single `0x55` closes it.
//! - The lower six bits of `id/control` are the frame id. If the top bit is
//!   set the frame came from the transport layer and a sequence byte follows;
//!   we read it but do not track it.
//! - `crc32` is the standard CRC-32 of everything between the header and the
//!   checksum itself, stored big-endian.
//! - Everything between the header and the EOF byte is stuffed: after two
//!   consecutive `0xAA` bytes the sender inserts a `0x55`, so three `0xAA`
//!   in a row can only ever mean "a new frame starts here".
//!
//! Payloads are fixed layouts of big-endian numbers, see [`pack_fields`] and
//! [`decode_fields`].

use log::debug;
use nom::{
    combinator::{cond, map},
    multi::length_data,
    number::complete::{
        be_f32, be_f64, be_i16, be_i32, be_i64, be_i8, be_u16, be_u32, be_u64, be_u8,
    },
    IResult,
};
use std::{borrow::Cow, fmt};

/// The byte that, three times in a row, marks the start of a frame.
pub const HEADER_BYTE: u8 = 0xAA;
/// Inserted by the sender after every two consecutive [`HEADER_BYTE`]s.
pub const STUFF_BYTE: u8 = 0x55;
/// Terminates every frame.
pub const EOF_BYTE: u8 = 0x55;
/// The length field is a single byte.
pub const MAX_PAYLOAD: usize = 255;
/// Ids are six bits wide.
pub const MAX_ID: u8 = 0x3F;

const TRANSPORT_FLAG: u8 = 0x80;
const HEADER: [u8; 3] = [HEADER_BYTE; 3];
const CRC_LEN: usize = 4;

/// One message extracted from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    id: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame. `id` must fit in the six bits the wire can carry.
    pub fn new(id: u8, payload: Vec<u8>) -> Result<Self, EncodeError> {
        if id > MAX_ID {
            return Err(EncodeError::IdOutOfRange(id));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(EncodeError::PayloadTooLong(payload.len()));
        }
        Ok(Frame { id, payload })
    }

    /// The canonical (min) id of the frame.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame and hands back its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Returned by [`decode`] when the bytes at the front of the buffer cannot be
/// a frame. The caller should drop a single byte and decode again, which is
/// what [`FrameDecoder`] does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The length byte announces more payload than we accept.
    LengthExceeded {
        /// Length found in the frame.
        announced: usize,
        /// Largest length the decoder accepts.
        max: usize,
    },
    /// Two header bytes were followed by something other than a stuff byte.
    BadStuffing(u8),
    /// A fresh header showed up before the current frame was complete.
    UnexpectedHeader,
    /// The checksum in the frame does not match its contents.
    Checksum {
        /// Checksum carried by the frame.
        expected: u32,
        /// Checksum computed over the received bytes.
        found: u32,
    },
    /// The byte after the checksum was not [`EOF_BYTE`].
    MissingEof(u8),
    /// The unstuffed body could not be split into its fields.
    Truncated,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ProtocolError as PE;
        let msg = match self {
            PE::LengthExceeded { announced, max } => Cow::from(format!(
                "announced payload of {} bytes exceeds the maximum of {}",
                announced, max
            )),
            PE::BadStuffing(byte) => {
                Cow::from(format!("expected a stuff byte, found {:#04x}", byte))
            }
            PE::UnexpectedHeader => Cow::from("frame header inside a frame body"),
            PE::Checksum { expected, found } => Cow::from(format!(
                "checksum mismatch: frame says {:#010x}, computed {:#010x}",
                expected, found
            )),
            PE::MissingEof(byte) => {
                Cow::from(format!("expected end of frame, found {:#04x}", byte))
            }
            PE::Truncated => Cow::from("truncated frame body"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ProtocolError {}

/// The only way building a frame can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The payload does not fit in the one-byte length field.
    PayloadTooLong(usize),
    /// The id does not fit in the six id bits.
    IdOutOfRange(u8),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EncodeError::PayloadTooLong(len) => write!(
                f,
                "payload of {} bytes does not fit in a frame (max {})",
                len, MAX_PAYLOAD
            ),
            EncodeError::IdOutOfRange(id) => {
                write!(f, "frame id {} is above the maximum of {}", id, MAX_ID)
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// A payload that does not match the layout it is decoded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Fewer bytes than the layout needs.
    Short {
        /// Bytes the layout needs.
        needed: usize,
        /// Bytes actually present.
        found: usize,
    },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PayloadError::Short { needed, found } => write!(
                f,
                "payload too short: layout needs {} bytes, got {}",
                needed, found
            ),
        }
    }
}

impl std::error::Error for PayloadError {}

/// Width and representation of one payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum FieldKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl FieldKind {
    /// Number of bytes the field occupies on the wire.
    pub fn width(self) -> usize {
        use FieldKind::*;
        match self {
            U8 | I8 => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
        }
    }
}

/// A numeric field value, before packing or after unpacking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    /// Any integer kind.
    Int(i64),
    /// Either float kind.
    Float(f64),
}

impl FieldValue {
    /// The value as a float, converting integers.
    pub fn as_f64(self) -> f64 {
        match self {
            FieldValue::Int(v) => v as f64,
            FieldValue::Float(v) => v,
        }
    }

    /// The value as an integer, truncating floats toward zero.
    pub fn as_i64(self) -> i64 {
        match self {
            FieldValue::Int(v) => v,
            FieldValue::Float(v) => v as i64,
        }
    }
}

/// Packs `fields` big-endian, one after another. Integers that do not fit
/// their field wrap modulo 2^width; range checks are up to the caller.
pub fn pack_fields(fields: &[(FieldKind, FieldValue)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(fields.iter().map(|(k, _)| k.width()).sum());
    for &(kind, value) in fields {
        let int = value.as_i64();
        match kind {
            FieldKind::U8 => out.push(int as u8),
            FieldKind::I8 => out.extend_from_slice(&(int as i8).to_be_bytes()),
            FieldKind::U16 => out.extend_from_slice(&(int as u16).to_be_bytes()),
            FieldKind::I16 => out.extend_from_slice(&(int as i16).to_be_bytes()),
            FieldKind::U32 => out.extend_from_slice(&(int as u32).to_be_bytes()),
            FieldKind::I32 => out.extend_from_slice(&(int as i32).to_be_bytes()),
            FieldKind::U64 => out.extend_from_slice(&(int as u64).to_be_bytes()),
            FieldKind::I64 => out.extend_from_slice(&int.to_be_bytes()),
            FieldKind::F32 => out.extend_from_slice(&(value.as_f64() as f32).to_be_bytes()),
            FieldKind::F64 => out.extend_from_slice(&value.as_f64().to_be_bytes()),
        }
    }
    out
}

fn parse_field(kind: FieldKind, input: &[u8]) -> IResult<&[u8], FieldValue> {
    use FieldValue::{Float, Int};
    match kind {
        FieldKind::U8 => map(be_u8, |v| Int(v.into()))(input),
        FieldKind::I8 => map(be_i8, |v| Int(v.into()))(input),
        FieldKind::U16 => map(be_u16, |v| Int(v.into()))(input),
        FieldKind::I16 => map(be_i16, |v| Int(v.into()))(input),
        FieldKind::U32 => map(be_u32, |v| Int(v.into()))(input),
        FieldKind::I32 => map(be_i32, |v| Int(v.into()))(input),
        FieldKind::U64 => map(be_u64, |v| Int(v as i64))(input),
        FieldKind::I64 => map(be_i64, Int)(input),
        FieldKind::F32 => map(be_f32, |v| Float(v.into()))(input),
        FieldKind::F64 => map(be_f64, Float)(input),
    }
}

/// Unpacks a payload according to `layout`. Bytes past the end of the layout
/// are ignored.
pub fn decode_fields(layout: &[FieldKind], payload: &[u8]) -> Result<Vec<FieldValue>, PayloadError> {
    let needed = layout.iter().map(|k| k.width()).sum();
    let short = PayloadError::Short {
        needed,
        found: payload.len(),
    };
    if payload.len() < needed {
        return Err(short);
    }

    let mut rest = payload;
    let mut values = Vec::with_capacity(layout.len());
    for &kind in layout {
        let (remaining, value) = parse_field(kind, rest).map_err(|_| short.clone())?;
        values.push(value);
        rest = remaining;
    }
    Ok(values)
}

/// Writes bytes while inserting a stuff byte after every second header byte.
struct Stuffer {
    out: Vec<u8>,
    run: u8,
}

impl Stuffer {
    fn push(&mut self, byte: u8) {
        self.out.push(byte);
        if byte == HEADER_BYTE {
            self.run += 1;
            if self.run == 2 {
                self.out.push(STUFF_BYTE);
                self.run = 0;
            }
        } else {
            self.run = 0;
        }
    }
}

/// Serializes a frame into its wire representation.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut body = Vec::with_capacity(frame.payload.len() + 6);
    body.push(frame.id);
    body.push(frame.payload.len() as u8);
    body.extend_from_slice(&frame.payload);
    let crc = crc32fast::hash(&body);
    body.extend_from_slice(&crc.to_be_bytes());

    let mut stuffer = Stuffer {
        out: Vec::with_capacity(body.len() + body.len() / 2 + 4),
        run: 0,
    };
    stuffer.out.extend_from_slice(&HEADER);
    for &byte in &body {
        stuffer.push(byte);
    }
    stuffer.out.push(EOF_BYTE);
    stuffer.out
}

/// Packs `fields` into a frame with the given id and serializes it.
pub fn encode(id: u8, fields: &[(FieldKind, FieldValue)]) -> Result<Vec<u8>, EncodeError> {
    Frame::new(id, pack_fields(fields)).map(|frame| encode_frame(&frame))
}

/// Total unstuffed body length, once enough of the body is known.
fn body_len(body: &[u8], max_payload: usize) -> Result<Option<usize>, ProtocolError> {
    let Some(&id_control) = body.first() else {
        return Ok(None);
    };
    let len_at = if id_control & TRANSPORT_FLAG != 0 { 2 } else { 1 };
    match body.get(len_at) {
        None => Ok(None),
        Some(&len) if len as usize > max_payload => Err(ProtocolError::LengthExceeded {
            announced: len as usize,
            max: max_payload,
        }),
        Some(&len) => Ok(Some(len_at + 1 + len as usize + CRC_LEN)),
    }
}

fn frame_body(input: &[u8]) -> IResult<&[u8], (u8, Option<u8>, &[u8], u32)> {
    let (input, id_control) = be_u8(input)?;
    let (input, seq) = cond(id_control & TRANSPORT_FLAG != 0, be_u8)(input)?;
    let (input, payload) = length_data(be_u8)(input)?;
    let (input, crc) = be_u32(input)?;
    Ok((input, (id_control, seq, payload, crc)))
}

fn parse_body(body: &[u8]) -> Result<Frame, ProtocolError> {
    let (_, (id_control, _seq, payload, crc)) =
        frame_body(body).map_err(|_| ProtocolError::Truncated)?;
    let found = crc32fast::hash(&body[..body.len() - CRC_LEN]);
    if found != crc {
        return Err(ProtocolError::Checksum {
            expected: crc,
            found,
        });
    }
    Ok(Frame {
        id: id_control & MAX_ID,
        payload: payload.to_vec(),
    })
}

/// Tries to pull one frame off the front of `buf`.
///
/// - `Ok((Some(frame), n))`: a frame was decoded from the first `n` bytes.
/// - `Ok((None, n))` with `n > 0`: the first `n` bytes cannot start a frame
///   and can be thrown away.
/// - `Ok((None, 0))`: a frame may be in progress, come back with more bytes.
/// - `Err(_)`: the frame at the front is broken. Drop one byte and retry.
///
/// Nothing is ever consumed from an incomplete frame, so callers can keep
/// appending to the same buffer.
pub fn decode(buf: &[u8], max_payload: usize) -> Result<(Option<Frame>, usize), ProtocolError> {
    match buf.windows(HEADER.len()).position(|w| w == HEADER) {
        Some(0) => {}
        Some(start) => return Ok((None, start)),
        None => {
            // A trailing `AA` or `AA AA` may still become a header.
            let keep = buf
                .iter()
                .rev()
                .take(HEADER.len() - 1)
                .take_while(|&&b| b == HEADER_BYTE)
                .count();
            return Ok((None, buf.len() - keep));
        }
    }

    let max_payload = max_payload.min(MAX_PAYLOAD);
    let mut body = Vec::new();
    let mut expected = None;
    let mut run = 0;

    for (pos, &byte) in buf.iter().enumerate().skip(HEADER.len()) {
        if run == 2 {
            run = 0;
            match byte {
                STUFF_BYTE => continue,
                HEADER_BYTE => return Err(ProtocolError::UnexpectedHeader),
                other => return Err(ProtocolError::BadStuffing(other)),
            }
        }

        if expected == Some(body.len()) {
            if byte != EOF_BYTE {
                return Err(ProtocolError::MissingEof(byte));
            }
            return parse_body(&body).map(|frame| (Some(frame), pos + 1));
        }

        body.push(byte);
        run = if byte == HEADER_BYTE { run + 1 } else { 0 };
        if expected.is_none() {
            expected = body_len(&body, max_payload)?;
        }
    }

    Ok((None, 0))
}

/// Accumulates bytes as they arrive and hands out whole frames, applying the
/// drop-one-byte resynchronization after every [`ProtocolError`].
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_payload: usize,
    discarded: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD)
    }
}

impl FrameDecoder {
    /// A decoder that rejects frames announcing more than `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        FrameDecoder {
            buf: Vec::new(),
            max_payload,
            discarded: 0,
        }
    }

    /// Appends freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, `Ok(None)` once more bytes are needed.
    /// After an `Err` the offending byte has already been dropped, so just
    /// call again.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            match decode(&self.buf, self.max_payload) {
                Ok((Some(frame), used)) => {
                    self.buf.drain(..used);
                    return Ok(Some(frame));
                }
                Ok((None, 0)) => return Ok(None),
                Ok((None, skipped)) => {
                    debug!("discarding {} bytes ahead of a frame header", skipped);
                    self.discarded += skipped;
                    self.buf.drain(..skipped);
                }
                Err(error) => {
                    self.discarded += 1;
                    self.buf.drain(..1);
                    return Err(error);
                }
            }
        }
    }

    /// Forgets any partially received frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes thrown away while looking for frames.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FieldKind::*;
    use FieldValue::{Float, Int};

    fn drain(decoder: &mut FrameDecoder) -> (Vec<Frame>, usize) {
        let mut frames = Vec::new();
        let mut errors = 0;
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, errors),
                Err(_) => errors += 1,
            }
        }
    }

    #[test]
    fn fields_survive_the_wire() {
        let fields = [
            (U32, Int(15869)),
            (F64, Float(-1.25)),
            (F32, Float(2.5)),
            (I16, Int(-42)),
            (U8, Int(7)),
            (I64, Int(i64::MIN)),
        ];
        let bytes = encode(10, &fields).unwrap();

        let (frame, used) = decode(&bytes, MAX_PAYLOAD).unwrap();
        let frame = frame.unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(frame.id(), 10);

        let layout: Vec<_> = fields.iter().map(|(k, _)| *k).collect();
        let values = decode_fields(&layout, frame.payload()).unwrap();
        let originals: Vec<_> = fields.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, originals);
    }

    #[test]
    fn known_wire_bytes() {
        let frame = Frame::new(1, vec![1]).unwrap();
        let bytes = encode_frame(&frame);
        assert_eq!(&bytes[..6], &[0xAA, 0xAA, 0xAA, 0x01, 0x01, 0x01]);
        assert_eq!(bytes.last(), Some(&EOF_BYTE));

        // with stuff bytes removed, the tail is the big-endian checksum
        let mut crc = Vec::new();
        let mut run = 0;
        for &b in &bytes[6..bytes.len() - 1] {
            if run == 2 {
                assert_eq!(b, STUFF_BYTE);
                run = 0;
                continue;
            }
            crc.push(b);
            run = if b == HEADER_BYTE { run + 1 } else { 0 };
        }
        assert_eq!(crc, crc32fast::hash(&[0x01, 0x01, 0x01]).to_be_bytes());
    }

    #[test]
    fn integers_wrap_to_their_width() {
        let packed = pack_fields(&[(I16, Int(70000)), (U8, Int(260)), (I8, Int(-1))]);
        assert_eq!(packed, vec![0x11, 0x70, 0x04, 0xFF]);
    }

    #[test]
    fn ids_above_six_bits_are_rejected() {
        assert_eq!(Frame::new(0x4C, vec![]), Err(EncodeError::IdOutOfRange(0x4C)));
        assert_eq!(
            encode(MAX_ID + 1, &[(FieldKind::U8, FieldValue::Int(1))]),
            Err(EncodeError::IdOutOfRange(MAX_ID + 1))
        );
        assert_eq!(Frame::new(MAX_ID, vec![]).unwrap().id(), MAX_ID);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        assert_eq!(
            Frame::new(3, vec![0; 256]),
            Err(EncodeError::PayloadTooLong(256))
        );
    }

    #[test]
    fn header_bytes_in_payload_are_stuffed() {
        let payload = vec![0xAA; 7];
        let bytes = encode_frame(&Frame::new(5, payload.clone()).unwrap());

        // never three header bytes in a row past the real header
        assert!(!bytes[3..].windows(3).any(|w| w == HEADER));

        let (frame, used) = decode(&bytes, MAX_PAYLOAD).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(frame.unwrap().payload(), &payload[..]);
    }

    #[test]
    fn one_byte_at_a_time() {
        let bytes = encode(12, &[(F64, Float(1.5)), (F32, Float(2.25))]).unwrap();
        let mut buf = Vec::new();
        let mut consumed = 0;
        let mut frames = Vec::new();

        for &byte in &bytes {
            buf.push(byte);
            let (frame, used) = decode(&buf, MAX_PAYLOAD).unwrap();
            consumed += used;
            buf.drain(..used);
            frames.extend(frame);
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), 12);
        assert_eq!(consumed, bytes.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_input_consumes_nothing() {
        let bytes = encode(2, &[(U32, Int(99))]).unwrap();
        for cut in 1..bytes.len() {
            assert_eq!(decode(&bytes[..cut], MAX_PAYLOAD), Ok((None, 0)));
        }
    }

    #[test]
    fn garbage_before_header_is_skipped() {
        let mut bytes = vec![0x01, 0x55, 0xAA, 0x13];
        bytes.extend(encode(4, &[(U16, Int(513))]).unwrap());

        let mut decoder = FrameDecoder::default();
        decoder.extend(&bytes);
        let (frames, errors) = drain(&mut decoder);
        assert_eq!(errors, 0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[0x02, 0x01]);
        assert_eq!(decoder.discarded(), 4);
    }

    #[test]
    fn announced_length_over_maximum() {
        let bytes = encode_frame(&Frame::new(9, vec![0; 40]).unwrap());
        assert_eq!(
            decode(&bytes, 32),
            Err(ProtocolError::LengthExceeded {
                announced: 40,
                max: 32
            })
        );
    }

    #[test]
    fn corrupted_checksum_is_reported() {
        let mut bytes = encode(6, &[(U8, Int(1))]).unwrap();
        bytes[5] ^= 0x01;
        assert!(matches!(
            decode(&bytes, MAX_PAYLOAD),
            Err(ProtocolError::Checksum { .. })
        ));
    }

    #[test]
    fn missing_eof_is_reported() {
        let mut bytes = encode(6, &[(U8, Int(1))]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert_eq!(
            decode(&bytes, MAX_PAYLOAD),
            Err(ProtocolError::MissingEof(0x00))
        );
    }

    #[test]
    fn resynchronizes_after_corruption() {
        let first = encode(10, &[(U32, Int(1)), (F64, Float(0.5))]).unwrap();
        let second = encode(10, &[(U32, Int(2)), (F64, Float(1.5))]).unwrap();
        let third = encode(11, &[(U32, Int(3))]).unwrap();

        let expected = vec![
            decode(&second, MAX_PAYLOAD).unwrap().0.unwrap(),
            decode(&third, MAX_PAYLOAD).unwrap().0.unwrap(),
        ];

        for corrupt_at in 3..first.len() {
            let mut stream = first.clone();
            stream[corrupt_at] = stream[corrupt_at].wrapping_add(0x3B);
            stream.extend_from_slice(&second);
            stream.extend_from_slice(&third);

            let mut decoder = FrameDecoder::default();
            decoder.extend(&stream);
            let (frames, errors) = drain(&mut decoder);

            assert_eq!(frames, expected, "corruption at byte {}", corrupt_at);
            assert!(errors > 0);
            assert_eq!(decoder.pending(), 0);
        }
    }

    #[test]
    fn transport_frames_drop_the_sequence_byte() {
        let payload = [0x10, 0x20];
        let mut body = vec![TRANSPORT_FLAG | 0x07, 0x03, payload.len() as u8];
        body.extend_from_slice(&payload);
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_be_bytes());

        let mut stuffer = Stuffer {
            out: HEADER.to_vec(),
            run: 0,
        };
        for &b in &body {
            stuffer.push(b);
        }
        stuffer.out.push(EOF_BYTE);

        let (frame, used) = decode(&stuffer.out, MAX_PAYLOAD).unwrap();
        assert_eq!(used, stuffer.out.len());
        let frame = frame.unwrap();
        assert_eq!(frame.id(), 0x07);
        assert_eq!(frame.payload(), &payload);
    }

    #[test]
    fn short_payload_layout() {
        assert_eq!(
            decode_fields(&[U32, F64], &[0; 6]),
            Err(PayloadError::Short {
                needed: 12,
                found: 6
            })
        );
    }

    #[test]
    fn clear_drops_partial_frame() {
        let bytes = encode(8, &[(U32, Int(5))]).unwrap();
        let mut decoder = FrameDecoder::default();
        decoder.extend(&bytes[..bytes.len() - 2]);
        assert_eq!(decoder.next_frame(), Ok(None));
        assert!(decoder.pending() > 0);
        decoder.clear();
        assert_eq!(decoder.pending(), 0);
    }
}
