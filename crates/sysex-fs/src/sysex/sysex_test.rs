//! Exchange tests against a scripted virtual port.

use super::*;
use crate::config::TransportConfig;
use crate::transport::virtual_port::{VirtualHandle, VirtualPort};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const IDENTITY_REPLY: [u8; 15] = [0xf0, 0x7e, 0x00, 0x06, 0x02, 0x1c, 0x00, 0x06, 0x11, 0x00, 5, 1, 0, 7, 0xf7];

fn test_config() -> TransportConfig {
    TransportConfig {
        poll_interval: Duration::from_millis(2),
        batch_idle_timeout: Duration::from_millis(30),
        rest_time: Duration::from_millis(5),
        ..TransportConfig::defaults()
    }
}

fn transport_with(responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> (Transport, VirtualHandle) {
    crate::init_test_logging();
    let (port, handle) = VirtualPort::new("virtual", responder);
    (Transport::new("virtual:0", Box::new(port), test_config()), handle)
}

fn identity_responder(msg: &[u8]) -> Vec<Vec<u8>> {
    if msg == IDENTITY_REQUEST {
        vec![IDENTITY_REPLY.to_vec()]
    } else {
        Vec::new()
    }
}

#[test]
fn test_transact_returns_reply() {
    let (transport, handle) = transport_with(identity_responder);

    let reply = transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    assert_eq!(reply, IDENTITY_REPLY.to_vec());
    assert_eq!(handle.sent_messages(), vec![IDENTITY_REQUEST.to_vec()]);
}

#[test]
fn test_transact_times_out_within_bounds() {
    let (transport, _handle) = transport_with(|_| Vec::new());
    let timeout = Duration::from_millis(50);

    let start = Instant::now();
    let result = transport.transact(&IDENTITY_REQUEST, timeout);
    let elapsed = start.elapsed();

    assert_eq!(result, Err(BackendError::TimedOut { timeout_ms: 50 }));
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_millis(500), "took {elapsed:?}");
}

#[test]
fn test_cancel_from_another_thread_interrupts_wait() {
    let (transport, _handle) = transport_with(|_| Vec::new());
    let transport = Arc::new(transport);
    let token = CancelToken::new();

    let canceller = {
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            token.cancel();
        })
    };

    let start = Instant::now();
    let result = transport.transact_cancellable(&IDENTITY_REQUEST, Duration::from_secs(5), &token);
    canceller.join().unwrap();

    assert_eq!(result, Err(BackendError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_cancellation_wins_over_expired_deadline() {
    let (transport, _handle) = transport_with(|_| Vec::new());
    let token = CancelToken::new();
    token.cancel();

    let mut transfer = SysexTransfer::receive(Duration::ZERO).with_token(token);
    assert_eq!(transport.rx_sysex(&mut transfer), Err(BackendError::Cancelled));
    assert_eq!(transfer.status(), SysexStatus::Finished);
}

#[test]
fn test_cancelled_transfer_sends_nothing() {
    let (transport, handle) = transport_with(identity_responder);
    let token = CancelToken::new();
    token.cancel();

    let mut transfer = SysexTransfer::new(IDENTITY_REQUEST, Duration::from_millis(100)).with_token(token);
    assert_eq!(transport.tx_and_rx(&mut transfer), Err(BackendError::Cancelled));
    assert!(handle.written().is_empty());
}

#[test]
fn test_batch_collects_until_idle() {
    let (transport, _handle) = transport_with(|_| {
        vec![
            vec![0xf0, 0x01, 0xf7],
            vec![0xf0, 0x02, 0xf7],
            vec![0xf0, 0x03, 0xf7],
        ]
    });

    let mut transfer = SysexTransfer::new([0xf0, 0x10, 0xf7], Duration::from_millis(200)).batch();
    transport.tx_and_rx(&mut transfer).unwrap();

    assert!(transfer.is_batch());
    assert_eq!(transfer.status(), SysexStatus::Finished);
    assert_eq!(
        transfer.raw(),
        &[0xf0, 0x01, 0xf7, 0xf0, 0x02, 0xf7, 0xf0, 0x03, 0xf7]
    );
}

#[test]
fn test_extra_messages_stay_queued_for_next_receive() {
    let (transport, _handle) = transport_with(|_| vec![vec![0xf0, 0x01, 0xf7], vec![0xf0, 0x02, 0xf7]]);

    let first = transport.transact(&[0xf0, 0x10, 0xf7], Duration::from_millis(200)).unwrap();
    assert_eq!(first, vec![0xf0, 0x01, 0xf7]);

    let mut next = SysexTransfer::receive(Duration::from_millis(200));
    transport.rx_sysex(&mut next).unwrap();
    assert_eq!(next.into_raw(), vec![0xf0, 0x02, 0xf7]);
}

#[test]
fn test_cache_answers_repeated_request() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let (transport, handle) = transport_with(move |msg| {
        seen.fetch_add(1, Ordering::SeqCst);
        identity_responder(msg)
    });

    transport.enable_cache();
    let first = transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    let second = transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.sent_messages().len(), 1);

    transport.disable_cache();
    transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cleared_cache_goes_back_to_device() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let (transport, _handle) = transport_with(move |msg| {
        seen.fetch_add(1, Ordering::SeqCst);
        identity_responder(msg)
    });

    transport.enable_cache();
    transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    transport.clear_cache();
    transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_uncached_transfer_always_reaches_device() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let (transport, _handle) = transport_with(move |msg| {
        seen.fetch_add(1, Ordering::SeqCst);
        identity_responder(msg)
    });
    transport.enable_cache();

    for _ in 0..2 {
        let mut transfer = SysexTransfer::new(IDENTITY_REQUEST, Duration::from_millis(200)).uncached();
        transport.tx_and_rx(&mut transfer).unwrap();
        assert_eq!(transfer.raw(), IDENTITY_REPLY.as_slice());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Nothing was stored for later cached requests either
    transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_tx_drops_cached_responses() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let (transport, _handle) = transport_with(move |msg| {
        seen.fetch_add(1, Ordering::SeqCst);
        identity_responder(msg)
    });
    transport.enable_cache();

    transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    transport.tx(&[0xf0, 0x43, 0x10, 0xf7]).unwrap();
    transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    // identity, the write, identity again
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_drain_drops_stale_reply() {
    let (transport, handle) = transport_with(identity_responder);
    handle.inject(&[0xf0, 0x43, 0x10, 0xf7]);

    transport.drain();
    let reply = transport.transact(&IDENTITY_REQUEST, Duration::from_millis(200)).unwrap();
    assert_eq!(reply, IDENTITY_REPLY.to_vec());
}

#[test]
fn test_large_message_is_sent_whole() {
    let (transport, handle) = transport_with(|_| Vec::new());
    let mut msg = vec![0xf0];
    msg.extend(std::iter::repeat_n(0x55, TX_CHUNK_LEN * 3));
    msg.push(0xf7);

    transport.tx(&msg).unwrap();
    assert_eq!(handle.written(), msg);
}

#[test]
fn test_concurrent_exchanges_get_their_own_reply() {
    // Echo device: each request is answered with itself
    let (transport, _handle) = transport_with(|msg| vec![msg.to_vec()]);
    let transport = Arc::new(transport);

    let workers: Vec<_> = (0u8..4)
        .map(|i| {
            let transport = Arc::clone(&transport);
            std::thread::spawn(move || {
                for _ in 0..5 {
                    let request = [0xf0, 0x20, i, 0xf7];
                    let reply = transport.transact(&request, Duration::from_millis(500)).unwrap();
                    assert_eq!(reply, request.to_vec());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}
