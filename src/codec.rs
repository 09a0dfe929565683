//! Byte-exact OSC 1.0 message codec (spec component C).
//!
//! This does not delegate to `rosc`'s own encoder/decoder: the wire rules
//! here are deliberately more forgiving on decode (truncated packets return
//! the successfully-decoded prefix rather than failing outright, array
//! brackets are recognized but produce no argument) which `rosc` does not
//! do. `rosc::OscType` and its payload structs (`OscColor`, `OscMidiMessage`,
//! `OscTime`) are kept as the argument value representation, matching how
//! the rest of the crate already uses them.

use rosc::{OscColor, OscMidiMessage, OscTime, OscType};

/// A decoded OSC message: address plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub path: String,
    pub args: Vec<OscType>,
}

fn next_multiple_of_4(n: usize) -> usize {
    (n + 3) & !3
}

fn take_bytes<'a>(buf: &'a [u8], cursor: &mut usize, n: usize) -> Option<&'a [u8]> {
    let start = *cursor;
    let end = start.checked_add(n)?;
    if end > buf.len() {
        return None;
    }
    *cursor = end;
    Some(&buf[start..end])
}

fn take_i32(buf: &[u8], cursor: &mut usize) -> Option<i32> {
    take_bytes(buf, cursor, 4).map(|b| i32::from_be_bytes(b.try_into().unwrap()))
}

fn take_u32(buf: &[u8], cursor: &mut usize) -> Option<u32> {
    take_bytes(buf, cursor, 4).map(|b| u32::from_be_bytes(b.try_into().unwrap()))
}

fn take_f32(buf: &[u8], cursor: &mut usize) -> Option<f32> {
    take_bytes(buf, cursor, 4).map(|b| f32::from_be_bytes(b.try_into().unwrap()))
}

fn take_i64(buf: &[u8], cursor: &mut usize) -> Option<i64> {
    take_bytes(buf, cursor, 8).map(|b| i64::from_be_bytes(b.try_into().unwrap()))
}

fn take_f64(buf: &[u8], cursor: &mut usize) -> Option<f64> {
    take_bytes(buf, cursor, 8).map(|b| f64::from_be_bytes(b.try_into().unwrap()))
}

fn take_char(buf: &[u8], cursor: &mut usize) -> Option<char> {
    let v = take_u32(buf, cursor)?;
    Some(char::from_u32(v).unwrap_or(char::REPLACEMENT_CHARACTER))
}

fn take_color(buf: &[u8], cursor: &mut usize) -> Option<OscColor> {
    let b = take_bytes(buf, cursor, 4)?;
    Some(OscColor {
        red: b[0],
        green: b[1],
        blue: b[2],
        alpha: b[3],
    })
}

fn take_midi(buf: &[u8], cursor: &mut usize) -> Option<OscMidiMessage> {
    let b = take_bytes(buf, cursor, 4)?;
    Some(OscMidiMessage {
        port: b[0],
        status: b[1],
        data1: b[2],
        data2: b[3],
    })
}

fn take_time(buf: &[u8], cursor: &mut usize) -> Option<OscTime> {
    let seconds = take_u32(buf, cursor)?;
    let fractional = take_u32(buf, cursor)?;
    Some(OscTime::from((seconds, fractional)))
}

/// NUL-terminated, 4-byte-padded UTF-8 string. Truncation (no NUL found, or
/// the padded boundary runs past the buffer) fails without advancing the
/// cursor.
fn take_padded_string(buf: &[u8], cursor: &mut usize) -> Option<String> {
    let start = *cursor;
    let rel_nul = buf.get(start..)?.iter().position(|&b| b == 0)?;
    let nul = start + rel_nul;
    let s = String::from_utf8_lossy(&buf[start..nul]).into_owned();
    let end = next_multiple_of_4(nul + 1);
    if end > buf.len() {
        return None;
    }
    *cursor = end;
    Some(s)
}

fn take_blob(buf: &[u8], cursor: &mut usize) -> Option<Vec<u8>> {
    let size = take_i32(buf, cursor)?;
    if size < 0 {
        return None;
    }
    let size = size as usize;
    let data = take_bytes(buf, cursor, size)?.to_vec();
    let pad = next_multiple_of_4(size) - size;
    if pad > 0 {
        take_bytes(buf, cursor, pad)?;
    }
    Some(data)
}

enum ArgOutcome {
    Value(OscType),
    Skip,
    Truncated,
}

fn decode_one(tag: char, buf: &[u8], cursor: &mut usize) -> ArgOutcome {
    match tag {
        'i' => take_i32(buf, cursor).map(OscType::Int).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        'f' => take_f32(buf, cursor).map(OscType::Float).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        's' | 'S' => take_padded_string(buf, cursor)
            .map(OscType::String)
            .map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        'b' => take_blob(buf, cursor).map(OscType::Blob).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        'h' => take_i64(buf, cursor).map(OscType::Long).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        't' => take_time(buf, cursor).map(OscType::Time).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        'd' => take_f64(buf, cursor).map(OscType::Double).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        'c' => take_char(buf, cursor).map(OscType::Char).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        'r' => take_color(buf, cursor).map(OscType::Color).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        'm' => take_midi(buf, cursor).map(OscType::Midi).map_or(ArgOutcome::Truncated, ArgOutcome::Value),
        'T' => ArgOutcome::Value(OscType::Bool(true)),
        'F' => ArgOutcome::Value(OscType::Bool(false)),
        'N' => ArgOutcome::Value(OscType::Nil),
        'I' => ArgOutcome::Value(OscType::Inf),
        // array brackets are recognized but carry no payload in this revision
        '[' | ']' => ArgOutcome::Skip,
        _ => ArgOutcome::Skip,
    }
}

/// Decode a single OSC message from `buf`.
///
/// Returns `None` only when even the address cannot be framed (buffer
/// shorter than 4 bytes, or no NUL terminator for the address). A truncated
/// argument list stops parsing and returns the arguments successfully
/// decoded so far rather than failing the whole packet.
pub fn decode_message(buf: &[u8]) -> Option<DecodedMessage> {
    if buf.len() < 4 {
        return None;
    }
    let mut cursor = 0usize;
    let path = take_padded_string(buf, &mut cursor)?;

    if cursor >= buf.len() || buf[cursor] != b',' {
        return Some(DecodedMessage { path, args: Vec::new() });
    }

    let tag_str = take_padded_string(buf, &mut cursor).unwrap_or_else(|| {
        let rest = String::from_utf8_lossy(&buf[cursor..]).into_owned();
        cursor = buf.len();
        rest
    });

    let mut args = Vec::new();
    for tag in tag_str.chars().skip(1) {
        match decode_one(tag, buf, &mut cursor) {
            ArgOutcome::Value(v) => args.push(v),
            ArgOutcome::Skip => (),
            ArgOutcome::Truncated => break,
        }
    }
    Some(DecodedMessage { path, args })
}

fn write_padded_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    pad_to_4(buf, s.len() + 1);
}

fn pad_to_4(buf: &mut Vec<u8>, content_len: usize) {
    let rem = content_len % 4;
    if rem != 0 {
        buf.resize(buf.len() + (4 - rem), 0);
    }
}

/// Encode a single OSC message. Never fails; arguments of unsupported types
/// (OSC arrays — see spec §9) are skipped with a logged warning.
pub fn encode_message(path: &str, args: &[OscType]) -> Vec<u8> {
    let mut tag_str = String::from(",");
    let mut payload = Vec::new();

    for arg in args {
        match arg {
            OscType::Int(v) => {
                tag_str.push('i');
                payload.extend_from_slice(&v.to_be_bytes());
            }
            OscType::Float(v) => {
                tag_str.push('f');
                payload.extend_from_slice(&v.to_be_bytes());
            }
            OscType::String(s) => {
                tag_str.push('s');
                write_padded_string(&mut payload, s);
            }
            OscType::Blob(b) => {
                tag_str.push('b');
                payload.extend_from_slice(&(b.len() as i32).to_be_bytes());
                payload.extend_from_slice(b);
                pad_to_4(&mut payload, b.len());
            }
            OscType::Long(v) => {
                tag_str.push('h');
                payload.extend_from_slice(&v.to_be_bytes());
            }
            OscType::Time(t) => {
                tag_str.push('t');
                payload.extend_from_slice(&t.seconds.to_be_bytes());
                payload.extend_from_slice(&t.fractional.to_be_bytes());
            }
            OscType::Double(v) => {
                tag_str.push('d');
                payload.extend_from_slice(&v.to_be_bytes());
            }
            OscType::Char(c) => {
                tag_str.push('c');
                payload.extend_from_slice(&(*c as u32).to_be_bytes());
            }
            OscType::Color(c) => {
                tag_str.push('r');
                payload.extend_from_slice(&[c.red, c.green, c.blue, c.alpha]);
            }
            OscType::Midi(m) => {
                tag_str.push('m');
                payload.extend_from_slice(&[m.port, m.status, m.data1, m.data2]);
            }
            OscType::Bool(true) => tag_str.push('T'),
            OscType::Bool(false) => tag_str.push('F'),
            OscType::Nil => tag_str.push('N'),
            OscType::Inf => tag_str.push('I'),
            OscType::Array(_) => {
                log::warn!("skipping OSC array argument: arrays are not supported by the binary codec");
            }
        }
    }

    let mut buf = Vec::new();
    write_padded_string(&mut buf, path);
    write_padded_string(&mut buf, &tag_str);
    buf.extend(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_basic_types() {
        let args = vec![
            OscType::Int(4),
            OscType::Float(3.5),
            OscType::String("x".into()),
            OscType::Bool(true),
            OscType::Nil,
        ];
        let buf = encode_message("/bar", &args);
        assert_eq!(buf.len() % 4, 0);
        let decoded = decode_message(&buf).unwrap();
        assert_eq!(decoded.path, "/bar");
        assert_eq!(decoded.args, args);
    }

    #[test]
    fn round_trip_blob_and_wide_types() {
        let args = vec![
            OscType::Blob(vec![1, 2, 3]),
            OscType::Long(9_000_000_000),
            OscType::Double(1.25),
            OscType::Char('Q'),
        ];
        let buf = encode_message("/w", &args);
        assert_eq!(buf.len() % 4, 0);
        let decoded = decode_message(&buf).unwrap();
        assert_eq!(decoded.args, args);
    }

    #[test]
    fn short_buffer_is_malformed() {
        assert!(decode_message(&[0, 0]).is_none());
    }

    #[test]
    fn truncated_args_return_prefix() {
        let full = encode_message("/t", &[OscType::Int(1), OscType::Int(2)]);
        // cut off mid-way through the second argument
        let truncated = &full[..full.len() - 2];
        let decoded = decode_message(truncated).unwrap();
        assert_eq!(decoded.path, "/t");
        assert_eq!(decoded.args, vec![OscType::Int(1)]);
    }

    #[test]
    fn no_comma_means_zero_args() {
        let mut buf = Vec::new();
        write_padded_string(&mut buf, "/ping");
        let decoded = decode_message(&buf).unwrap();
        assert_eq!(decoded.path, "/ping");
        assert!(decoded.args.is_empty());
    }

    #[test]
    fn array_argument_is_skipped_on_encode() {
        let buf = encode_message("/arr", &[OscType::Int(1), OscType::Array(rosc::OscArray { content: vec![] })]);
        let decoded = decode_message(&buf).unwrap();
        assert_eq!(decoded.args, vec![OscType::Int(1)]);
    }
}
