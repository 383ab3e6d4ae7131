//! Integration test: timeline syncs, waits and submissions
//!
//! Run with: cargo test -p vtest-transport --test sync_test -- --nocapture

mod common;

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::thread;

use vtest_protocol::command::{
    CommandId, Request, SyncPoint, SyncWaitFlags, PROTOCOL_VERSION,
};
use vtest_protocol::submit::{decode_submit_cmd2, BatchTarget, SubmitBatch};
use vtest_protocol::wire::encode_words;
use vtest_transport::wait::{
    classify_poll, poll_timeout_to_wire, timeout_to_poll_ms, INFINITE_TIMEOUT,
};
use vtest_transport::{Renderer, RendererError, VtestRenderer};

fn connect() -> (VtestRenderer, common::FakeHost) {
    let (client, mut host) = common::pair();
    let handshake = thread::spawn(move || {
        host.accept_handshake(4, &[1, 2, 3, 4]);
        host
    });
    let renderer =
        VtestRenderer::from_stream(client, "sync-test", PROTOCOL_VERSION).expect("handshake");
    (renderer, handshake.join().unwrap())
}

#[test]
fn test_sync_write_read_release() {
    let (renderer, mut host) = connect();

    let server = thread::spawn(move || {
        let mut counter = 0u64;
        let mut unrefs = 0;
        while let Some(request) = host.next_request() {
            match request {
                Request::SyncCreate { initial_value } => {
                    counter = initial_value;
                    host.reply(CommandId::SyncCreate, &[5]);
                }
                Request::SyncRead { sync_id } => {
                    assert_eq!(sync_id, 5);
                    host.reply(CommandId::SyncRead, &[counter as u32, (counter >> 32) as u32]);
                }
                Request::SyncWrite { sync_id, value } => {
                    assert_eq!(sync_id, 5);
                    counter = value;
                }
                Request::SyncUnref { sync_id } => {
                    assert_eq!(sync_id, 5);
                    unrefs += 1;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        unrefs
    });

    let sync = renderer.sync_create(7).expect("create");
    assert_eq!(sync.sync_id(), 5);
    assert_eq!(sync.read().unwrap(), 7);
    sync.write(12).unwrap();
    assert_eq!(sync.read().unwrap(), 12);
    sync.reset(0).unwrap();
    assert_eq!(sync.read().unwrap(), 0);
    assert_eq!(sync.point(3), SyncPoint::new(5, 3));

    sync.release();
    assert_eq!(sync.sync_id(), 0);
    sync.release();
    drop(sync);

    drop(renderer);
    assert_eq!(server.join().unwrap(), 1);
}

#[test]
fn test_fence_sync_initial_values() {
    let (renderer, mut host) = connect();

    let server = thread::spawn(move || {
        let mut created = Vec::new();
        while let Some(request) = host.next_request() {
            match request {
                Request::SyncCreate { initial_value } => {
                    created.push(initial_value);
                    host.reply(CommandId::SyncCreate, &[created.len() as u32]);
                }
                Request::SyncUnref { .. } => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        created
    });

    let signaled = renderer.create_fence_sync(true).unwrap();
    let unsignaled = renderer.create_fence_sync(false).unwrap();
    assert_ne!(signaled.sync_id(), unsignaled.sync_id());
    drop((signaled, unsignaled));
    drop(renderer);
    assert_eq!(server.join().unwrap(), vec![1, 0]);
}

#[test]
fn test_submit_two_batches() {
    let (renderer, mut host) = connect();

    let server = thread::spawn(move || {
        let (header, payload) = host.next_frame().expect("submit frame");
        host.expect_eof();
        (header, payload)
    });

    let cs_a: Vec<u8> = (0u8..16).collect();
    let cs_b = [0xEEu8; 8];
    let signals = [SyncPoint::new(3, 10)];
    renderer
        .submit(&[
            SubmitBatch {
                cs_data: &cs_a,
                signals: &signals,
                target: BatchTarget::Queue {
                    index: 0,
                    queue_id: 0x1234,
                },
            },
            SubmitBatch {
                cs_data: &cs_b,
                signals: &[],
                target: BatchTarget::Cpu,
            },
        ])
        .expect("submit");
    // nothing reaches the wire for an empty submission
    renderer.submit(&[]).expect("empty submit");
    drop(renderer);

    let (header, payload) = server.join().unwrap();
    println!("submit_cmd2: {} words", header.length);
    assert!(header.is(CommandId::SubmitCmd2));
    assert_eq!(header.length, 1 + 2 * 8 + (16 + 8) / 4 + 3);

    let decoded = decode_submit_cmd2(&payload).unwrap();
    assert_eq!(decoded.batches[0].cs_data, cs_a);
    assert_eq!(decoded.batches[1].cs_data, cs_b);
    let first_cs = decoded.headers[0].cmd_offset as usize * 4;
    assert_eq!(&payload[first_cs..first_cs + 24], [cs_a.as_slice(), &cs_b].concat());

    let triple: Vec<u8> = [3u32, 10, 0].iter().flat_map(|w| w.to_le_bytes()).collect();
    let hits = payload.windows(12).filter(|w| *w == triple.as_slice()).count();
    assert_eq!(hits, 1);
}

#[test]
fn test_submit_simple_is_one_cpu_batch() {
    let (renderer, mut host) = connect();
    let server = thread::spawn(move || host.next_frame().expect("submit frame"));

    renderer.submit_simple(&[1, 0, 0, 0, 2, 0, 0, 0]).unwrap();
    let (header, payload) = server.join().unwrap();
    let decoded = decode_submit_cmd2(&payload).unwrap();
    assert_eq!(header.length, 1 + 8 + 2);
    assert_eq!(decoded.batches.len(), 1);
    assert_eq!(decoded.batches[0].target, BatchTarget::Cpu);
    assert!(decoded.batches[0].signals.is_empty());
    drop(renderer);
}

#[test]
fn test_submit_unaligned_stream_is_rejected() {
    let (renderer, mut host) = connect();
    let server = thread::spawn(move || host.expect_eof());

    let err = renderer.submit_simple(&[0u8; 3]).unwrap_err();
    assert!(matches!(err, RendererError::Protocol(_)));
    drop(renderer);
    server.join().unwrap();
}

#[test]
fn test_wait_timeout() {
    let (renderer, mut host) = connect();

    let server = thread::spawn(move || {
        assert_eq!(
            host.request(),
            Request::SyncWait {
                flags: SyncWaitFlags::ANY,
                timeout_ms: 5,
                points: vec![SyncPoint::new(9, 100)],
            }
        );
        let (read_end, write_end) = nix::unistd::pipe().expect("pipe");
        host.reply_header(CommandId::SyncWait, 0);
        host.send_fd(&read_end);
        drop(read_end);
        host.expect_eof();
        write_end
    });

    let result = renderer.wait(&[SyncPoint::new(9, 100)], true, 5_000_000);
    assert_eq!(result, Err(RendererError::Timeout));
    drop(renderer);

    // the client closed its copy of the read end, so the pipe has no reader
    let mut writer = File::from(server.join().unwrap());
    let err = writer.write(&[1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);
}

#[test]
fn test_wait_ready() {
    let (renderer, mut host) = connect();

    let server = thread::spawn(move || {
        match host.request() {
            Request::SyncWait {
                flags, timeout_ms, ..
            } => {
                assert_eq!(flags, SyncWaitFlags::empty());
                assert_eq!(timeout_ms, u32::MAX);
            }
            other => panic!("expected SyncWait, got {:?}", other),
        }
        let (read_end, write_end) = nix::unistd::pipe().expect("pipe");
        File::from(write_end).write_all(&[1]).unwrap();
        host.reply_header(CommandId::SyncWait, 0);
        host.send_fd(&read_end);
        host.expect_eof();
    });

    let sync_point = SyncPoint::new(2, 1);
    // sub-millisecond timeouts block until ready
    renderer.wait(&[sync_point], false, 500).expect("wait");
    drop(renderer);
    server.join().unwrap();
}

#[test]
fn test_timeout_mapping() {
    assert_eq!(timeout_to_poll_ms(0), 0);
    assert_eq!(timeout_to_poll_ms(1), INFINITE_TIMEOUT);
    assert_eq!(timeout_to_poll_ms(999_999), INFINITE_TIMEOUT);
    assert_eq!(timeout_to_poll_ms(1_000_000), 1);
    assert_eq!(timeout_to_poll_ms(1_000_001), 2);
    assert_eq!(timeout_to_poll_ms(5_000_000), 5);
    assert_eq!(timeout_to_poll_ms(u64::MAX), i32::MAX);
    assert_eq!(
        timeout_to_poll_ms(i32::MAX as u64 * 1_000_000),
        i32::MAX
    );

    assert_eq!(poll_timeout_to_wire(0), 0);
    assert_eq!(poll_timeout_to_wire(5), 5);
    assert_eq!(poll_timeout_to_wire(INFINITE_TIMEOUT), u32::MAX);
    assert_eq!(poll_timeout_to_wire(i32::MAX), i32::MAX as u32);
}

#[test]
fn test_poll_classification() {
    assert_eq!(classify_poll(1, 0, libc::POLLIN), Some(Ok(())));
    assert_eq!(
        classify_poll(1, 0, libc::POLLHUP),
        Some(Err(RendererError::DeviceLost))
    );
    assert_eq!(classify_poll(0, 0, 0), Some(Err(RendererError::Timeout)));
    assert_eq!(
        classify_poll(-1, libc::ENOMEM, 0),
        Some(Err(RendererError::OutOfHostMemory))
    );
    assert_eq!(
        classify_poll(-1, libc::EBADF, 0),
        Some(Err(RendererError::DeviceLost))
    );
    assert_eq!(classify_poll(-1, libc::EINTR, 0), None);
    assert_eq!(classify_poll(-1, libc::EAGAIN, 0), None);
}

#[test]
fn test_concurrent_round_trips_stay_paired() {
    let (renderer, mut host) = connect();

    let server = thread::spawn(move || {
        let mut next_id = 100u32;
        let mut frames = 0;
        while let Some((header, payload)) = host.next_frame() {
            frames += 1;
            let request = Request::decode(header, &payload).unwrap();
            match request {
                Request::SyncCreate { .. } => {
                    next_id += 1;
                    host.reply(CommandId::SyncCreate, &[next_id]);
                }
                // each counter reads back as its own id
                Request::SyncRead { sync_id } => {
                    host.reply(CommandId::SyncRead, &[sync_id, 0]);
                }
                Request::SyncUnref { .. } => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        frames
    });

    const THREADS: usize = 4;
    const READS: usize = 50;
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let sync = renderer.sync_create(0).unwrap();
                for _ in 0..READS {
                    assert_eq!(sync.read().unwrap(), sync.sync_id() as u64);
                }
            });
        }
    });
    drop(renderer);

    let frames = server.join().unwrap();
    assert_eq!(frames, THREADS * (READS + 2));
}

#[test]
fn test_wire_words_helper_matches_client_encoding() {
    let frame = Request::SyncRead { sync_id: 4 }.encode().unwrap();
    assert_eq!(frame, encode_words(CommandId::SyncRead, &[4]));
}
