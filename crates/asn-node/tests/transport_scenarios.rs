//! Transport scenarios: reassembly, wire segmentation, version
//! down-negotiation, login rekey, and close semantics.

use std::{io::Read, sync::Arc, time::Duration};

use asn_crypto::{BOX_OVERHEAD, CryptoBox, Role, gen_encr_keypair};
use asn_node::{Transport, session};
use asn_proto::{MAX_SEG_SZ, MORE_FLAG, Nonce, Pdu, PubEncr, Version};
use asn_repo::TmpStore;
use tokio::io::AsyncReadExt;

fn box_pair() -> (CryptoBox, CryptoBox) {
    let mut rng = rand::thread_rng();
    let (pub_a, sec_a) = gen_encr_keypair(&mut rng);
    let (pub_b, sec_b) = gen_encr_keypair(&mut rng);
    let base = Nonce([0x17; 24]);
    (
        CryptoBox::new(&sec_a, &pub_b, &base, Role::Initiator),
        CryptoBox::new(&sec_b, &pub_a, &base, Role::Responder),
    )
}

fn transport_pair() -> (Transport, Transport) {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let (box_a, box_b) = box_pair();
    let ta = Transport::builder().with_box(box_a).with_peer_name("b").attach(a).unwrap();
    let tb = Transport::builder().with_box(box_b).with_peer_name("a").attach(b).unwrap();
    (ta, tb)
}

fn drain(pdu: &mut Pdu) -> Vec<u8> {
    let mut bytes = Vec::new();
    pdu.read_to_end(&mut bytes).unwrap();
    bytes
}

#[tokio::test]
async fn single_segment_echo() {
    let (ta, tb) = transport_pair();

    ta.send(Pdu::from_bytes(vec![0x41u8; 100])).await.unwrap();

    let mut pdu = tb.recv().await.unwrap();
    assert_eq!(pdu.len(), 100);
    assert_eq!(drain(&mut pdu), vec![0x41u8; 100]);
}

#[tokio::test]
async fn two_segment_wire_layout() {
    // Drive one transport against a raw stream half so the segments are
    // observable on the wire.
    let (a, mut raw) = tokio::io::duplex(256 * 1024);
    let (box_a, mut box_b) = box_pair();
    let ta = Transport::builder().with_box(box_a).attach(a).unwrap();

    ta.send(Pdu::from_bytes(vec![7u8; 5000])).await.unwrap();

    // First segment: MORE set, a full frame of ciphertext.
    let mut hdr = [0u8; 2];
    raw.read_exact(&mut hdr).await.unwrap();
    let l = u16::from_be_bytes(hdr);
    assert_ne!(l & MORE_FLAG, 0, "first segment must carry MORE");
    let n1 = (l & !MORE_FLAG) as usize;
    assert_eq!(n1, MAX_SEG_SZ);

    let mut red = vec![0u8; n1];
    raw.read_exact(&mut red).await.unwrap();
    let mut black = Vec::new();
    box_b.open(&red, &mut black).unwrap();
    assert_eq!(black.len(), MAX_SEG_SZ - BOX_OVERHEAD); // 4080

    // Second segment: MORE clear, the 920-byte remainder.
    raw.read_exact(&mut hdr).await.unwrap();
    let l = u16::from_be_bytes(hdr);
    assert_eq!(l & MORE_FLAG, 0, "last segment must clear MORE");
    let n2 = (l & !MORE_FLAG) as usize;
    assert_eq!(n2, 920 + BOX_OVERHEAD);

    let mut red = vec![0u8; n2];
    raw.read_exact(&mut red).await.unwrap();
    let mut rest = Vec::new();
    box_b.open(&red, &mut rest).unwrap();

    black.extend_from_slice(&rest);
    assert_eq!(black.len(), 5000);
    assert!(black.iter().all(|b| *b == 7));
}

#[tokio::test]
async fn oversize_pdu_spills_on_reassembly() {
    let dir = tempfile::tempdir().unwrap();
    let tmp = TmpStore::open(dir.path()).unwrap();

    let (a, b) = tokio::io::duplex(256 * 1024);
    let (box_a, box_b) = box_pair();
    let ta = Transport::builder().with_box(box_a).attach(a).unwrap();
    let tb = Transport::builder().with_box(box_b).with_tmp(tmp).attach(b).unwrap();

    ta.send(Pdu::from_bytes(vec![9u8; 10_000])).await.unwrap();

    let mut pdu = tb.recv().await.unwrap();
    assert!(pdu.is_spilled(), "multi-segment PDU must promote to disk");
    assert_eq!(pdu.len(), 10_000);
    assert_eq!(drain(&mut pdu), vec![9u8; 10_000]);
}

#[tokio::test]
async fn pdus_arrive_in_enqueue_order() {
    let (ta, tb) = transport_pair();

    for i in 0u8..3 {
        ta.send(Pdu::from_bytes(vec![i; 16])).await.unwrap();
    }
    for i in 0u8..3 {
        let mut pdu = tb.recv().await.unwrap();
        assert_eq!(drain(&mut pdu), vec![i; 16]);
    }
}

#[tokio::test]
async fn version_steps_down_and_stays_down() {
    let (a, _b) = tokio::io::duplex(1024);
    let (box_a, _) = box_pair();
    let t = Transport::builder()
        .with_box(box_a)
        .with_max_version(Version(3))
        .attach(a)
        .unwrap();

    assert_eq!(t.version(), Version(3));
    t.set_version(Version(2));
    assert_eq!(t.version(), Version(2));
    t.set_version(Version(5));
    assert_eq!(t.version(), Version(2), "a newer announcement never raises it");
}

#[tokio::test]
async fn login_rekeys_both_directions() {
    let (ta, tb) = transport_pair();
    let ta = Arc::new(ta);
    let tb = Arc::new(tb);

    let identity = PubEncr([0xaa; 32]);

    let server = {
        let tb = Arc::clone(&tb);
        tokio::spawn(async move {
            let mut pdu = tb.recv().await.unwrap();
            let bytes = drain(&mut pdu);
            assert_eq!(bytes[1], session::LOGIN_ID);
            let req = session::parse_login(Version(bytes[0]), &bytes[2..]).unwrap();
            let key = session::respond_login(&tb, &req).await.unwrap();
            assert_eq!(key, identity);

            // The client speaks first after login, so both sides have
            // swapped before any post-login segment is opened.
            let mut ping = tb.recv().await.unwrap();
            assert_eq!(drain(&mut ping), b"post-login ping");
            tb.send(Pdu::from_bytes(b"post-login hello".to_vec())).await.unwrap();
        })
    };

    session::client_login(&ta, &identity).await.unwrap();
    assert_eq!(ta.state(), asn_node::State::Established);

    ta.send(Pdu::from_bytes(b"post-login ping".to_vec())).await.unwrap();
    let mut pdu = ta.recv().await.unwrap();
    assert_eq!(drain(&mut pdu), b"post-login hello");

    server.await.unwrap();
}

#[tokio::test]
async fn peer_close_drains_then_ends_inbound() {
    let (ta, tb) = transport_pair();

    ta.send(Pdu::from_bytes(b"last words".to_vec())).await.unwrap();
    // Give the tx pump a moment to flush before the reset tears it down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ta.reset();

    let mut pdu = tb.recv().await.unwrap();
    assert_eq!(drain(&mut pdu), b"last words");
    assert!(tb.recv().await.is_none(), "inbound queue closes after EOF");
    assert!(tb.is_closed());
}

#[tokio::test]
async fn send_on_closed_transport_is_refused() {
    let (ta, _tb) = transport_pair();
    ta.reset();
    assert!(ta.is_closed());
    assert!(ta.send(Pdu::from_bytes(vec![1])).await.is_err());

    // A second reset is a no-op.
    ta.reset();
    assert!(ta.is_closed());
}
