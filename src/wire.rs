//! Bus framing: envelope, generic sub-header, and typed attributes.
//!
//! A frame on the bus is a 16-byte envelope, a 4-byte sub-header carrying the
//! command, and a run of type-tagged attributes padded to four bytes. The
//! envelope's sequence number duplicates the xid so the demultiplexer can
//! match a reply without touching the XDR body. Envelope and attribute
//! fields are little-endian; the body attribute is opaque XDR.

use thiserror::Error;

/// Protocol family id carried in every envelope.
pub const FAMILY_RPC: u16 = 0x5250;

/// Envelope length: len, family, flags, seq, port.
pub const ENVELOPE_LEN: usize = 16;

/// Sub-header length: cmd, version, reserved.
pub const SUBHDR_LEN: usize = 4;

/// Attribute header length: len, type.
pub const ATTR_HDR_LEN: usize = 4;

/// Largest body attribute payload a frame can carry; the attribute length
/// field is 16 bits and covers its own header.
pub const MAX_BODY_LEN: usize = u16::MAX as usize - ATTR_HDR_LEN;

/// Sub-header command for a request frame.
pub const CMD_REQUEST: u8 = 1;
/// Sub-header command for a reply frame.
pub const CMD_REPLY: u8 = 2;

/// Request attribute: u32 destination group.
pub const REQUEST_GROUP: u16 = 1;
/// Request attribute: opaque call body.
pub const REQUEST_BODY: u16 = 2;
/// Reply attribute: u32 origin group.
pub const REPLY_GROUP: u16 = 1;
/// Reply attribute: opaque reply body.
pub const REPLY_BODY: u16 = 2;

/// Framing failure for an inbound message. The demultiplexer reports all of
/// these as a single malformed-frame outcome; the variants exist for the
/// diagnostic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated ({0} bytes)")]
    Truncated(usize),
    #[error("unexpected protocol family {0:#x}")]
    WrongFamily(u16),
    #[error("unexpected command {0}")]
    WrongCommand(u8),
    #[error("attribute {0} missing")]
    MissingAttr(u16),
    #[error("attribute {0} malformed")]
    BadAttr(u16),
    #[error("body attribute too large ({0} bytes)")]
    BodyTooLarge(usize),
}

fn build_frame(
    cmd: u8,
    group_attr: u16,
    body_attr: u16,
    group: u32,
    seq: u32,
    body: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if body.len() > MAX_BODY_LEN {
        return Err(FrameError::BodyTooLarge(body.len()));
    }
    let group_len = ATTR_HDR_LEN + 4;
    let body_len = ATTR_HDR_LEN + body.len();
    let body_pad = (4 - body.len() % 4) % 4;
    let total = ENVELOPE_LEN + SUBHDR_LEN + group_len + body_len + body_pad;

    let mut frame = Vec::with_capacity(total);
    // Envelope.
    frame.extend_from_slice(&(total as u32).to_le_bytes());
    frame.extend_from_slice(&FAMILY_RPC.to_le_bytes());
    frame.extend_from_slice(&0u16.to_le_bytes()); // flags
    frame.extend_from_slice(&seq.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes()); // port
    // Sub-header.
    frame.push(cmd);
    frame.push(1); // version
    frame.extend_from_slice(&0u16.to_le_bytes());
    // Group attribute.
    frame.extend_from_slice(&(group_len as u16).to_le_bytes());
    frame.extend_from_slice(&group_attr.to_le_bytes());
    frame.extend_from_slice(&group.to_le_bytes());
    // Body attribute.
    frame.extend_from_slice(&(body_len as u16).to_le_bytes());
    frame.extend_from_slice(&body_attr.to_le_bytes());
    frame.extend_from_slice(body);
    frame.extend_from_slice(&[0u8; 3][..body_pad]);

    debug_assert_eq!(frame.len(), total);
    Ok(frame)
}

/// Build a request frame addressed to `group`, tagged with `seq`.
/// Fails when `body` exceeds [`MAX_BODY_LEN`].
pub fn build_request(group: u32, seq: u32, body: &[u8]) -> Result<Vec<u8>, FrameError> {
    build_frame(CMD_REQUEST, REQUEST_GROUP, REQUEST_BODY, group, seq, body)
}

/// Build a reply frame carrying the origin `group`, tagged with `seq`.
/// Fails when `body` exceeds [`MAX_BODY_LEN`].
pub fn build_reply(group: u32, seq: u32, body: &[u8]) -> Result<Vec<u8>, FrameError> {
    build_frame(CMD_REPLY, REPLY_GROUP, REPLY_BODY, group, seq, body)
}

/// A parsed frame with its group and body attributes resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    /// Envelope sequence number (the sender's xid).
    pub seq: u32,
    /// Group attribute value.
    pub group: u32,
    /// Body attribute payload, padding stripped.
    pub body: &'a [u8],
}

fn read_u16(frame: &[u8], at: usize) -> Result<u16, FrameError> {
    let bytes = frame
        .get(at..at + 2)
        .ok_or(FrameError::Truncated(frame.len()))?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(frame: &[u8], at: usize) -> Result<u32, FrameError> {
    let bytes = frame
        .get(at..at + 4)
        .ok_or(FrameError::Truncated(frame.len()))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn parse_frame(frame: &[u8], cmd: u8, group_attr: u16, body_attr: u16) -> Result<ParsedFrame<'_>, FrameError> {
    if frame.len() < ENVELOPE_LEN + SUBHDR_LEN {
        return Err(FrameError::Truncated(frame.len()));
    }
    let total = read_u32(frame, 0)? as usize;
    if total > frame.len() || total < ENVELOPE_LEN + SUBHDR_LEN {
        return Err(FrameError::Truncated(frame.len()));
    }
    let family = read_u16(frame, 4)?;
    if family != FAMILY_RPC {
        return Err(FrameError::WrongFamily(family));
    }
    let seq = read_u32(frame, 8)?;
    let got_cmd = frame[ENVELOPE_LEN];
    if got_cmd != cmd {
        return Err(FrameError::WrongCommand(got_cmd));
    }

    let mut group = None;
    let mut body = None;
    let mut pos = ENVELOPE_LEN + SUBHDR_LEN;
    while pos + ATTR_HDR_LEN <= total {
        let alen = read_u16(frame, pos)? as usize;
        let aty = read_u16(frame, pos + 2)?;
        if alen < ATTR_HDR_LEN || pos + alen > total {
            return Err(FrameError::BadAttr(aty));
        }
        let payload = &frame[pos + ATTR_HDR_LEN..pos + alen];
        if aty == group_attr {
            if payload.len() != 4 {
                return Err(FrameError::BadAttr(aty));
            }
            group = Some(u32::from_le_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ]));
        } else if aty == body_attr {
            body = Some(payload);
        }
        // Unknown attributes are skipped, not rejected.
        pos += alen + (4 - alen % 4) % 4;
    }

    let group = group.ok_or(FrameError::MissingAttr(group_attr))?;
    let body = body.ok_or(FrameError::MissingAttr(body_attr))?;
    Ok(ParsedFrame { seq, group, body })
}

/// Parse a request frame. Used by peers and the loopback harness.
pub fn parse_request(frame: &[u8]) -> Result<ParsedFrame<'_>, FrameError> {
    parse_frame(frame, CMD_REQUEST, REQUEST_GROUP, REQUEST_BODY)
}

/// Parse a reply frame. Used by the reply demultiplexer.
pub fn parse_reply(frame: &[u8]) -> Result<ParsedFrame<'_>, FrameError> {
    parse_frame(frame, CMD_REPLY, REPLY_GROUP, REPLY_BODY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let frame = build_request(42, 0x0102_0304, b"call body").unwrap();
        let parsed = parse_request(&frame).unwrap();
        assert_eq!(parsed.seq, 0x0102_0304);
        assert_eq!(parsed.group, 42);
        assert_eq!(parsed.body, b"call body");
    }

    #[test]
    fn test_reply_round_trip() {
        let frame = build_reply(7, 99, b"reply").unwrap();
        let parsed = parse_reply(&frame).unwrap();
        assert_eq!(parsed.seq, 99);
        assert_eq!(parsed.group, 7);
        assert_eq!(parsed.body, b"reply");
    }

    #[test]
    fn test_body_padding() {
        // 5-byte body pads to 8; total length stays 4-aligned.
        let frame = build_reply(1, 1, b"abcde").unwrap();
        assert_eq!(frame.len() % 4, 0);
        assert_eq!(parse_reply(&frame).unwrap().body, b"abcde");
    }

    #[test]
    fn test_body_length_bound() {
        // The largest representable body still round-trips.
        let frame = build_reply(1, 1, &vec![0u8; MAX_BODY_LEN]).unwrap();
        assert_eq!(parse_reply(&frame).unwrap().body.len(), MAX_BODY_LEN);

        // One byte past the attribute length field's range is refused
        // instead of truncated.
        assert_eq!(
            build_reply(1, 1, &vec![0u8; MAX_BODY_LEN + 1]).unwrap_err(),
            FrameError::BodyTooLarge(MAX_BODY_LEN + 1)
        );
        assert_eq!(
            build_request(1, 1, &vec![0u8; MAX_BODY_LEN + 1]).unwrap_err(),
            FrameError::BodyTooLarge(MAX_BODY_LEN + 1)
        );
    }

    #[test]
    fn test_command_mismatch() {
        let frame = build_request(1, 1, b"x").unwrap();
        assert_eq!(
            parse_reply(&frame).unwrap_err(),
            FrameError::WrongCommand(CMD_REQUEST)
        );
    }

    #[test]
    fn test_wrong_family() {
        let mut frame = build_reply(1, 1, b"x").unwrap();
        frame[4] = 0xFF;
        frame[5] = 0xFF;
        assert!(matches!(
            parse_reply(&frame),
            Err(FrameError::WrongFamily(_))
        ));
    }

    #[test]
    fn test_truncated_frames() {
        let frame = build_reply(1, 1, b"body").unwrap();
        for cut in 0..ENVELOPE_LEN + SUBHDR_LEN {
            assert!(parse_reply(&frame[..cut]).is_err());
        }
    }

    #[test]
    fn test_missing_body_attr() {
        // Hand-build a reply with only the group attribute.
        let total = ENVELOPE_LEN + SUBHDR_LEN + ATTR_HDR_LEN + 4;
        let mut frame = Vec::new();
        frame.extend_from_slice(&(total as u32).to_le_bytes());
        frame.extend_from_slice(&FAMILY_RPC.to_le_bytes());
        frame.extend_from_slice(&0u16.to_le_bytes());
        frame.extend_from_slice(&5u32.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.push(CMD_REPLY);
        frame.push(1);
        frame.extend_from_slice(&0u16.to_le_bytes());
        frame.extend_from_slice(&8u16.to_le_bytes());
        frame.extend_from_slice(&REPLY_GROUP.to_le_bytes());
        frame.extend_from_slice(&3u32.to_le_bytes());

        assert_eq!(
            parse_reply(&frame).unwrap_err(),
            FrameError::MissingAttr(REPLY_BODY)
        );
    }

    #[test]
    fn test_unknown_attr_skipped() {
        let mut frame = build_reply(2, 3, b"ok").unwrap();
        // Append an unknown attribute and fix up the envelope length.
        frame.extend_from_slice(&8u16.to_le_bytes());
        frame.extend_from_slice(&0x7Fu16.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        let total = frame.len() as u32;
        frame[..4].copy_from_slice(&total.to_le_bytes());

        let parsed = parse_reply(&frame).unwrap();
        assert_eq!(parsed.body, b"ok");
    }
}
