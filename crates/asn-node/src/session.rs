//! Session login: version exchange and box renegotiation.
//!
//! The first PDU each side sends is a handshake. The initiator's login
//! carries its identity key and a fresh ephemeral key; the responder's ack
//! carries its own ephemeral key and is queued *under the pre-login box*
//! before the responder swaps to the ephemeral pairing. The initiator swaps
//! on receiving the ack. Version bytes in both PDUs feed down-negotiation.
//!
//! ```text
//! initiator                              responder
//!   [v][LOGIN][identity pub][eph pub] →
//!                                        queue ack under old box
//!                                      ← [v][ACK][eph pub]
//!                                        swap to ephemeral box
//!   swap to ephemeral box
//! ```

use asn_crypto::gen_encr_keypair;
use asn_proto::{Pdu, PubEncr, SecEncr, Version};
use rand::rngs::OsRng;

use crate::{
    error::{NodeError, TransportError},
    transport::Transport,
};

/// Type-id byte of a login PDU.
pub const LOGIN_ID: u8 = 0x02;

/// Type-id byte of a login ack PDU.
pub const ACK_ID: u8 = 0x03;

/// A parsed login request.
#[derive(Debug, Clone)]
pub struct LoginReq {
    /// Peer's announced protocol version
    pub version: Version,
    /// Peer's long-term identity key
    pub identity: PubEncr,
    /// Peer's ephemeral key for the post-login box
    pub ephemeral: PubEncr,
}

/// Encode a login request PDU.
#[must_use]
pub fn login_pdu(v: Version, identity: &PubEncr, ephemeral: &PubEncr) -> Pdu {
    let mut body = Vec::with_capacity(2 + 64);
    body.push(v.0);
    body.push(LOGIN_ID);
    body.extend_from_slice(identity.as_bytes());
    body.extend_from_slice(ephemeral.as_bytes());
    Pdu::from_bytes(body)
}

/// Decode the body of a login request (after the two id bytes).
pub fn parse_login(v: Version, body: &[u8]) -> Result<LoginReq, NodeError> {
    if body.len() != 64 {
        return Err(NodeError::Handshake("login body must be 64 bytes"));
    }
    let mut identity = [0u8; 32];
    identity.copy_from_slice(&body[..32]);
    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(&body[32..]);
    Ok(LoginReq { version: v, identity: PubEncr(identity), ephemeral: PubEncr(ephemeral) })
}

/// Encode a login ack PDU.
#[must_use]
pub fn ack_pdu(v: Version, ephemeral: &PubEncr) -> Pdu {
    let mut body = Vec::with_capacity(2 + 32);
    body.push(v.0);
    body.push(ACK_ID);
    body.extend_from_slice(ephemeral.as_bytes());
    Pdu::from_bytes(body)
}

/// Decode the body of a login ack (after the two id bytes).
pub fn parse_ack(v: Version, body: &[u8]) -> Result<(Version, PubEncr), NodeError> {
    if body.len() != 32 {
        return Err(NodeError::Handshake("ack body must be 32 bytes"));
    }
    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(body);
    Ok((v, PubEncr(ephemeral)))
}

/// Run the initiator side of the login exchange.
///
/// Sends the login, waits for the ack, folds the peer's version in, and
/// swaps to the ephemeral box. The transport ends `Established`.
pub async fn client_login(t: &Transport, identity: &PubEncr) -> Result<(), NodeError> {
    let (eph_pub, eph_sec) = gen_encr_keypair(&mut OsRng);

    t.send(login_pdu(t.version(), identity, &eph_pub)).await?;
    t.set_provisional();

    let mut ack = t.recv().await.ok_or(TransportError::Closed)?;
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut ack, &mut bytes).map_err(TransportError::Io)?;
    if bytes.len() < 2 || bytes[1] != ACK_ID {
        return Err(NodeError::Handshake("expected login ack"));
    }
    let (peer_version, server_eph) = parse_ack(Version(bytes[0]), &bytes[2..])?;

    t.set_version(peer_version);
    t.rekey_login(&eph_sec, &server_eph);
    t.set_established();
    tracing::debug!(version = %t.version(), "login established");
    Ok(())
}

/// Run the responder side for an already-parsed login request.
///
/// The ack is enqueued under the pre-login box; only then is the box
/// swapped, so the in-flight ack is never re-encrypted. Returns the peer's
/// identity key.
pub async fn respond_login(t: &Transport, req: &LoginReq) -> Result<PubEncr, NodeError> {
    t.set_version(req.version);
    let (eph_pub, eph_sec): (PubEncr, SecEncr) = gen_encr_keypair(&mut OsRng);

    t.send(ack_pdu(t.version(), &eph_pub)).await?;
    t.rekey_login(&eph_sec, &req.ephemeral);
    t.set_provisional();
    t.set_established();
    tracing::debug!(peer = ?req.identity, version = %t.version(), "login accepted");
    Ok(req.identity)
}
