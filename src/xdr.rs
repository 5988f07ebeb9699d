//! XDR primitives and the RPC call/reply headers.
//!
//! Everything on the wire body is big-endian, four-byte aligned XDR. The call
//! header is serialized once per client with a zero xid placeholder and the
//! per-call xid is patched in through [`patch_xid`]; raw byte offsets never
//! appear at call sites.

use crate::error::{Error, RejectCause, Result};

/// RPC protocol version spoken by this client.
pub const RPC_VERSION: u32 = 2;

/// Message type tag for a call.
pub const MSG_CALL: u32 = 0;
/// Message type tag for a reply.
pub const MSG_REPLY: u32 = 1;

/// Serialized length of the fixed call header (xid through version).
pub const CALL_HEADER_LEN: usize = 20;

/// `AUTH_NONE` flavor number.
pub const AUTH_NONE: u32 = 0;

/// Upper bound on an opaque-auth body, per the protocol.
pub const MAX_AUTH_BYTES: usize = 400;

/// Reply disposition tags.
const REPLY_MSG_ACCEPTED: u32 = 0;
const REPLY_MSG_DENIED: u32 = 1;

/// Accepted-reply status codes.
const ACCEPT_SUCCESS: u32 = 0;
const ACCEPT_PROG_UNAVAIL: u32 = 1;
const ACCEPT_PROG_MISMATCH: u32 = 2;
const ACCEPT_PROC_UNAVAIL: u32 = 3;
const ACCEPT_GARBAGE_ARGS: u32 = 4;
const ACCEPT_SYSTEM_ERR: u32 = 5;

/// Denied-reply status codes.
const REJECT_RPC_MISMATCH: u32 = 0;
const REJECT_AUTH_ERROR: u32 = 1;

/// Append-only XDR encoder.
#[derive(Debug, Default)]
pub struct XdrEncoder {
    buf: Vec<u8>,
}

impl XdrEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create an encoder with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Append a big-endian u32.
    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Append raw bytes without length prefix or padding.
    ///
    /// Used for pre-serialized fragments (the precomputed call header, the
    /// caller's already-encoded argument bytes).
    #[inline]
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a length-prefixed opaque, padded to a four-byte boundary.
    pub fn put_opaque(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        let pad = (4 - bytes.len() % 4) % 4;
        self.buf.extend_from_slice(&[0u8; 3][..pad]);
    }

    /// Number of bytes encoded so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been encoded yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the encoder and return the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-style XDR decoder over a borrowed byte slice.
///
/// Truncated input surfaces as [`Error::CannotDecodeResult`]; the caller
/// decides whether that means a bad reply or a malformed inbound frame.
#[derive(Debug)]
pub struct XdrDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> XdrDecoder<'a> {
    /// Create a decoder over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode a big-endian u32.
    pub fn get_u32(&mut self) -> Result<u32> {
        let end = self.pos.checked_add(4).ok_or(Error::CannotDecodeResult)?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(Error::CannotDecodeResult)?;
        self.pos = end;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Decode a length-prefixed opaque, consuming its padding.
    pub fn get_opaque(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u32()? as usize;
        let end = self.pos.checked_add(len).ok_or(Error::CannotDecodeResult)?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(Error::CannotDecodeResult)?;
        let pad = (4 - len % 4) % 4;
        let padded_end = end.checked_add(pad).ok_or(Error::CannotDecodeResult)?;
        if padded_end > self.data.len() {
            return Err(Error::CannotDecodeResult);
        }
        self.pos = padded_end;
        Ok(bytes)
    }

    /// Everything not yet consumed.
    #[inline]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// Flavor-tagged opaque credentials or verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueAuth {
    pub flavor: u32,
    pub body: Vec<u8>,
}

impl OpaqueAuth {
    /// The empty `AUTH_NONE` value.
    pub fn none() -> Self {
        Self {
            flavor: AUTH_NONE,
            body: Vec::new(),
        }
    }

    /// Serialize as flavor followed by an opaque body.
    pub fn encode(&self, enc: &mut XdrEncoder) {
        enc.put_u32(self.flavor);
        enc.put_opaque(&self.body);
    }

    /// Deserialize, enforcing the protocol bound on the body length.
    pub fn decode(dec: &mut XdrDecoder<'_>) -> Result<Self> {
        let flavor = dec.get_u32()?;
        let body = dec.get_opaque()?;
        if body.len() > MAX_AUTH_BYTES {
            return Err(Error::CannotDecodeResult);
        }
        Ok(Self {
            flavor,
            body: body.to_vec(),
        })
    }
}

/// The immutable prefix of every call issued by one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallHeader {
    /// Transaction id, or a placeholder when pre-serializing.
    pub xid: u32,
    /// RPC program number.
    pub prog: u32,
    /// RPC program version.
    pub vers: u32,
}

impl CallHeader {
    /// Serialize the fixed header: xid, CALL, RPC version, program, version.
    /// The procedure id and credentials follow, appended by the call engine.
    pub fn encode(&self, enc: &mut XdrEncoder) {
        enc.put_u32(self.xid);
        enc.put_u32(MSG_CALL);
        enc.put_u32(RPC_VERSION);
        enc.put_u32(self.prog);
        enc.put_u32(self.vers);
    }
}

/// Overwrite the xid field of a serialized call or reply body.
///
/// The header is precomputed with a placeholder; this is the one sanctioned
/// mutation of those bytes.
#[inline]
pub fn patch_xid(body: &mut [u8], xid: u32) {
    debug_assert!(body.len() >= 4);
    body[..4].copy_from_slice(&xid.to_be_bytes());
}

/// Read the xid field of a serialized call or reply body.
#[inline]
pub fn read_xid(body: &[u8]) -> Result<u32> {
    let bytes = body.get(..4).ok_or(Error::CannotDecodeResult)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// A decoded call body, as a peer (or the loopback harness) sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCall<'a> {
    pub xid: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc_id: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
    pub args: &'a [u8],
}

/// Decode a serialized call body.
pub fn decode_call(body: &[u8]) -> Result<DecodedCall<'_>> {
    let mut dec = XdrDecoder::new(body);
    let xid = dec.get_u32()?;
    if dec.get_u32()? != MSG_CALL {
        return Err(Error::CannotDecodeResult);
    }
    if dec.get_u32()? != RPC_VERSION {
        return Err(Error::CannotDecodeResult);
    }
    let prog = dec.get_u32()?;
    let vers = dec.get_u32()?;
    let proc_id = dec.get_u32()?;
    let cred = OpaqueAuth::decode(&mut dec)?;
    let verf = OpaqueAuth::decode(&mut dec)?;
    Ok(DecodedCall {
        xid,
        prog,
        vers,
        proc_id,
        cred,
        verf,
        args: dec.remaining(),
    })
}

/// The accepted arm of a decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptedStat<'a> {
    /// The call executed; `results` holds the procedure results.
    Success { results: &'a [u8] },
    ProgUnavail,
    ProgMismatch { low: u32, high: u32 },
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}

/// A decoded reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody<'a> {
    /// The peer accepted the call; the verifier still awaits validation.
    Accepted {
        verf: OpaqueAuth,
        stat: AcceptedStat<'a>,
    },
    /// The peer refused to execute the call.
    Denied(RejectCause),
}

/// A decoded reply header plus its body arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReply<'a> {
    pub xid: u32,
    pub body: ReplyBody<'a>,
}

/// Decode a serialized reply body.
pub fn decode_reply(body: &[u8]) -> Result<DecodedReply<'_>> {
    let mut dec = XdrDecoder::new(body);
    let xid = dec.get_u32()?;
    if dec.get_u32()? != MSG_REPLY {
        return Err(Error::CannotDecodeResult);
    }
    let body = match dec.get_u32()? {
        REPLY_MSG_ACCEPTED => {
            let verf = OpaqueAuth::decode(&mut dec)?;
            let stat = match dec.get_u32()? {
                ACCEPT_SUCCESS => AcceptedStat::Success {
                    results: dec.remaining(),
                },
                ACCEPT_PROG_UNAVAIL => AcceptedStat::ProgUnavail,
                ACCEPT_PROG_MISMATCH => AcceptedStat::ProgMismatch {
                    low: dec.get_u32()?,
                    high: dec.get_u32()?,
                },
                ACCEPT_PROC_UNAVAIL => AcceptedStat::ProcUnavail,
                ACCEPT_GARBAGE_ARGS => AcceptedStat::GarbageArgs,
                ACCEPT_SYSTEM_ERR => AcceptedStat::SystemErr,
                _ => return Err(Error::CannotDecodeResult),
            };
            ReplyBody::Accepted { verf, stat }
        }
        REPLY_MSG_DENIED => {
            let cause = match dec.get_u32()? {
                REJECT_RPC_MISMATCH => RejectCause::RpcMismatch {
                    low: dec.get_u32()?,
                    high: dec.get_u32()?,
                },
                REJECT_AUTH_ERROR => RejectCause::AuthError(dec.get_u32()?),
                _ => return Err(Error::CannotDecodeResult),
            };
            ReplyBody::Denied(cause)
        }
        _ => return Err(Error::CannotDecodeResult),
    };
    Ok(DecodedReply { xid, body })
}

/// Serialize an accepted success reply. Used by peers and by the loopback
/// harness to answer calls.
pub fn encode_accepted_reply(xid: u32, verf: &OpaqueAuth, results: &[u8]) -> Vec<u8> {
    let mut enc = XdrEncoder::with_capacity(24 + verf.body.len() + results.len());
    enc.put_u32(xid);
    enc.put_u32(MSG_REPLY);
    enc.put_u32(REPLY_MSG_ACCEPTED);
    verf.encode(&mut enc);
    enc.put_u32(ACCEPT_SUCCESS);
    enc.put_raw(results);
    enc.into_bytes()
}

/// Serialize an accepted reply carrying a non-success status.
pub fn encode_accept_error_reply(xid: u32, verf: &OpaqueAuth, stat: &AcceptedStat<'_>) -> Vec<u8> {
    let mut enc = XdrEncoder::new();
    enc.put_u32(xid);
    enc.put_u32(MSG_REPLY);
    enc.put_u32(REPLY_MSG_ACCEPTED);
    verf.encode(&mut enc);
    match stat {
        AcceptedStat::Success { results } => {
            enc.put_u32(ACCEPT_SUCCESS);
            enc.put_raw(results);
        }
        AcceptedStat::ProgUnavail => enc.put_u32(ACCEPT_PROG_UNAVAIL),
        AcceptedStat::ProgMismatch { low, high } => {
            enc.put_u32(ACCEPT_PROG_MISMATCH);
            enc.put_u32(*low);
            enc.put_u32(*high);
        }
        AcceptedStat::ProcUnavail => enc.put_u32(ACCEPT_PROC_UNAVAIL),
        AcceptedStat::GarbageArgs => enc.put_u32(ACCEPT_GARBAGE_ARGS),
        AcceptedStat::SystemErr => enc.put_u32(ACCEPT_SYSTEM_ERR),
    }
    enc.into_bytes()
}

/// Serialize a denied reply.
///
/// Only [`RejectCause::RpcMismatch`] and [`RejectCause::AuthError`] exist in
/// the denied arm; the remaining causes travel in the accepted arm and are
/// rejected here.
pub fn encode_denied_reply(xid: u32, cause: &RejectCause) -> Result<Vec<u8>> {
    let mut enc = XdrEncoder::new();
    enc.put_u32(xid);
    enc.put_u32(MSG_REPLY);
    enc.put_u32(REPLY_MSG_DENIED);
    match cause {
        RejectCause::RpcMismatch { low, high } => {
            enc.put_u32(REJECT_RPC_MISMATCH);
            enc.put_u32(*low);
            enc.put_u32(*high);
        }
        RejectCause::AuthError(stat) => {
            enc.put_u32(REJECT_AUTH_ERROR);
            enc.put_u32(*stat);
        }
        _ => return Err(Error::CannotEncodeArgs),
    }
    Ok(enc.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_header_len() {
        let mut enc = XdrEncoder::new();
        CallHeader {
            xid: 0,
            prog: 100003,
            vers: 4,
        }
        .encode(&mut enc);
        assert_eq!(enc.len(), CALL_HEADER_LEN);
    }

    #[test]
    fn test_patch_xid_round_trip() {
        let mut enc = XdrEncoder::new();
        CallHeader {
            xid: 0,
            prog: 7,
            vers: 1,
        }
        .encode(&mut enc);
        let mut body = enc.into_bytes();

        patch_xid(&mut body, 0xDEAD_BEEF);
        assert_eq!(read_xid(&body).unwrap(), 0xDEAD_BEEF);
        // Only the xid field moved.
        assert_eq!(&body[4..8], &MSG_CALL.to_be_bytes());
    }

    #[test]
    fn test_opaque_padding() {
        let mut enc = XdrEncoder::new();
        enc.put_opaque(b"abcde");
        // 4 (length) + 5 (payload) + 3 (padding)
        assert_eq!(enc.len(), 12);

        let bytes = enc.into_bytes();
        let mut dec = XdrDecoder::new(&bytes);
        assert_eq!(dec.get_opaque().unwrap(), b"abcde");
        assert!(dec.remaining().is_empty());
    }

    #[test]
    fn test_decode_call_round_trip() {
        let mut enc = XdrEncoder::new();
        CallHeader {
            xid: 42,
            prog: 300019,
            vers: 2,
        }
        .encode(&mut enc);
        enc.put_u32(9); // proc
        OpaqueAuth::none().encode(&mut enc);
        OpaqueAuth::none().encode(&mut enc);
        enc.put_raw(b"args");
        let body = enc.into_bytes();

        let call = decode_call(&body).unwrap();
        assert_eq!(call.xid, 42);
        assert_eq!(call.prog, 300019);
        assert_eq!(call.vers, 2);
        assert_eq!(call.proc_id, 9);
        assert_eq!(call.cred, OpaqueAuth::none());
        assert_eq!(call.args, b"args");
    }

    #[test]
    fn test_decode_reply_success() {
        let body = encode_accepted_reply(7, &OpaqueAuth::none(), b"result bytes");
        let reply = decode_reply(&body).unwrap();
        assert_eq!(reply.xid, 7);
        match reply.body {
            ReplyBody::Accepted { verf, stat } => {
                assert_eq!(verf, OpaqueAuth::none());
                assert_eq!(
                    stat,
                    AcceptedStat::Success {
                        results: b"result bytes"
                    }
                );
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_decode_reply_prog_mismatch() {
        let body = encode_accept_error_reply(
            3,
            &OpaqueAuth::none(),
            &AcceptedStat::ProgMismatch { low: 2, high: 4 },
        );
        let reply = decode_reply(&body).unwrap();
        match reply.body {
            ReplyBody::Accepted { stat, .. } => {
                assert_eq!(stat, AcceptedStat::ProgMismatch { low: 2, high: 4 });
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_decode_reply_denied() {
        let body = encode_denied_reply(11, &RejectCause::RpcMismatch { low: 2, high: 2 }).unwrap();
        let reply = decode_reply(&body).unwrap();
        assert_eq!(
            reply.body,
            ReplyBody::Denied(RejectCause::RpcMismatch { low: 2, high: 2 })
        );

        let body = encode_denied_reply(12, &RejectCause::AuthError(5)).unwrap();
        let reply = decode_reply(&body).unwrap();
        assert_eq!(reply.body, ReplyBody::Denied(RejectCause::AuthError(5)));

        assert!(encode_denied_reply(13, &RejectCause::ProcUnavail).is_err());
    }

    #[test]
    fn test_decode_reply_truncated() {
        let body = encode_accepted_reply(7, &OpaqueAuth::none(), b"xyz");
        for cut in 1..12 {
            assert!(
                decode_reply(&body[..cut]).is_err(),
                "truncation at {} must not decode",
                cut
            );
        }
    }

    #[test]
    fn test_decode_reply_bad_tags() {
        // Not a reply.
        let mut enc = XdrEncoder::new();
        enc.put_u32(1);
        enc.put_u32(MSG_CALL);
        assert!(decode_reply(&enc.into_bytes()).is_err());

        // Unknown disposition.
        let mut enc = XdrEncoder::new();
        enc.put_u32(1);
        enc.put_u32(MSG_REPLY);
        enc.put_u32(99);
        assert!(decode_reply(&enc.into_bytes()).is_err());
    }

    #[test]
    fn test_oversized_auth_rejected() {
        let mut enc = XdrEncoder::new();
        enc.put_u32(AUTH_NONE);
        enc.put_opaque(&vec![0u8; MAX_AUTH_BYTES + 4]);
        let bytes = enc.into_bytes();
        let mut dec = XdrDecoder::new(&bytes);
        assert!(OpaqueAuth::decode(&mut dec).is_err());
    }
}
