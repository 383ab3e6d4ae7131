//! A scripted stand-in for the rendering server.

#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;

use vtest_protocol::command::*;
use vtest_protocol::wire::{encode_words, FrameHeader, HEADER_SIZE};
use vtest_transport::fd_channel;

pub struct FakeHost {
    stream: UnixStream,
}

/// A connected (client, host) pair.
pub fn pair() -> (UnixStream, FakeHost) {
    let (client, host) = UnixStream::pair().expect("socketpair");
    (client, FakeHost { stream: host })
}

impl FakeHost {
    /// Next raw frame from the client, `None` once the client hung up.
    pub fn next_frame(&mut self) -> Option<(FrameHeader, Vec<u8>)> {
        let mut buf = [0u8; HEADER_SIZE];
        match self.stream.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return None,
            Err(e) => panic!("host read failed: {}", e),
        }
        let header = FrameHeader::decode(&buf);
        let mut payload = vec![0u8; header.payload_len()];
        self.stream.read_exact(&mut payload).expect("payload");
        Some((header, payload))
    }

    pub fn next_request(&mut self) -> Option<Request> {
        let (header, payload) = self.next_frame()?;
        Some(Request::decode(header, &payload).expect("client sent a malformed frame"))
    }

    pub fn request(&mut self) -> Request {
        self.next_request().expect("client hung up")
    }

    /// Assert the client closed the socket without sending anything else.
    pub fn expect_eof(&mut self) {
        if let Some(request) = self.next_request() {
            panic!("unexpected trailing request {:?}", request);
        }
    }

    pub fn reply(&mut self, command: CommandId, words: &[u32]) {
        self.stream
            .write_all(&encode_words(command, words))
            .expect("host write");
    }

    pub fn reply_header(&mut self, command: CommandId, length: u32) {
        self.stream
            .write_all(&FrameHeader::new(command, length).encode())
            .expect("host write");
    }

    /// Write bytes with no framing and no descriptor attached.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("host write");
    }

    pub fn send_fd(&self, fd: impl AsFd) {
        fd_channel::send_fd(&self.stream, fd).expect("send_fd");
    }

    /// Play the server side of a successful bring-up.
    pub fn accept_handshake(&mut self, max_sync_queue_count: u32, capset: &[u32]) {
        match self.request() {
            Request::CreateRenderer { name } => println!("client announced '{}'", name),
            other => panic!("expected CreateRenderer, got {:?}", other),
        }
        self.answer_ping(true);

        match self.request() {
            Request::ProtocolVersion { version } => assert_eq!(version, PROTOCOL_VERSION),
            other => panic!("expected ProtocolVersion, got {:?}", other),
        }
        self.reply(CommandId::ProtocolVersion, &[3]);

        self.answer_get_param(1, max_sync_queue_count);
        self.answer_get_capset(1, capset);

        assert_eq!(self.request(), Request::ContextInit { capset_id: 4 });
    }

    pub fn answer_ping(&mut self, supported: bool) {
        assert_eq!(self.request(), Request::PingProtocolVersion);
        assert_eq!(
            self.request(),
            Request::ResourceBusyWait { handle: 0, flags: 0 }
        );
        if supported {
            self.reply_header(CommandId::PingProtocolVersion, 0);
        }
        self.reply(CommandId::ResourceBusyWait, &[0]);
    }

    pub fn answer_get_param(&mut self, valid: u32, value: u32) {
        assert_eq!(
            self.request(),
            Request::GetParam {
                param: Param::MaxSyncQueueCount as u32
            }
        );
        self.reply(CommandId::GetParam, &[valid, value]);
    }

    pub fn answer_get_capset(&mut self, valid: u32, payload: &[u32]) {
        assert_eq!(self.request(), Request::GetCapset { id: 4, version: 0 });
        let mut words = vec![valid];
        words.extend_from_slice(payload);
        self.reply(CommandId::GetCapset, &words);
    }
}
