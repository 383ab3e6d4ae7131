//! Session bring-up: renderer creation, version negotiation, parameter and
//! capset queries, context binding.

use tracing::{debug, info, warn};

use vtest_protocol::capset::{Capset, CapsetId, VenusCapset};
use vtest_protocol::command::{
    CommandId, Param, Request, BUSY_WAIT_RESPONSE_SIZE, GET_PARAM_RESPONSE_SIZE,
    MIN_PROTOCOL_VERSION, PROTOCOL_VERSION_SIZE,
};
use vtest_protocol::wire::WORD_SIZE;

use crate::connection::{terminate, Connection};
use crate::error::RendererError;

/// Capset version requested from the host.
pub const VENUS_CAPSET_VERSION: u32 = 0;

/// What the host agreed to during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub protocol_version: u32,
    pub max_sync_queue_count: u32,
    pub capset: Capset,
}

fn encode(request: &Request) -> Result<Vec<u8>, RendererError> {
    Ok(request.encode()?)
}

/// Announce the client under `name`. No response.
pub fn create_renderer(conn: &Connection, name: &str) -> Result<(), RendererError> {
    let frame = encode(&Request::CreateRenderer {
        name: name.to_string(),
    })?;
    conn.lock().write_frame(&frame);
    Ok(())
}

/// Ask whether the host understands version negotiation.
///
/// A ping is sent followed by a zero busy-wait. A host that knows the ping
/// answers it first; an old host ignores it and only answers the busy-wait.
pub fn ping_protocol_version(conn: &Connection) -> Result<bool, RendererError> {
    let mut frame = encode(&Request::PingProtocolVersion)?;
    frame.extend(encode(&Request::ResourceBusyWait {
        handle: 0,
        flags: 0,
    })?);

    let mut chan = conn.lock();
    chan.write_frame(&frame);

    let header = chan.read_header();
    let supported = header.is(CommandId::PingProtocolVersion);
    if supported {
        chan.expect_header(CommandId::ResourceBusyWait, Some(BUSY_WAIT_RESPONSE_SIZE));
    } else if !header.is(CommandId::ResourceBusyWait)
        || header.length as usize != BUSY_WAIT_RESPONSE_SIZE
    {
        terminate(format_args!(
            "unexpected ping response cmd={} len={}",
            header.command, header.length
        ));
    }
    // busy-wait result, meaningless for handle 0
    chan.read_u32();
    Ok(supported)
}

/// Propose `desired` and return the version the host settled on.
pub fn protocol_version(conn: &Connection, desired: u32) -> Result<u32, RendererError> {
    let frame = encode(&Request::ProtocolVersion { version: desired })?;
    let mut chan = conn.lock();
    chan.write_frame(&frame);
    chan.expect_header(CommandId::ProtocolVersion, Some(PROTOCOL_VERSION_SIZE));
    Ok(chan.read_u32())
}

/// Query a scalar parameter. An invalid parameter reads as 0.
pub fn get_param(conn: &Connection, param: Param) -> Result<u32, RendererError> {
    let frame = encode(&Request::GetParam {
        param: param as u32,
    })?;
    let mut chan = conn.lock();
    chan.write_frame(&frame);
    chan.expect_header(CommandId::GetParam, Some(GET_PARAM_RESPONSE_SIZE));
    let valid = chan.read_u32();
    let value = chan.read_u32();
    Ok(if valid != 0 { value } else { 0 })
}

/// Fetch the venus capset. `None` when the host reports it invalid.
pub fn get_capset(
    conn: &Connection,
    id: CapsetId,
    version: u32,
) -> Result<Option<VenusCapset>, RendererError> {
    let frame = encode(&Request::GetCapset {
        id: id as u32,
        version,
    })?;
    let mut chan = conn.lock();
    chan.write_frame(&frame);

    let header = chan.expect_header(CommandId::GetCapset, None);
    if header.length == 0 {
        terminate(format_args!("empty capset response"));
    }
    let valid = chan.read_u32();
    let data_len = (header.length as usize - 1) * WORD_SIZE;
    if valid == 0 {
        chan.skip(data_len);
        return Ok(None);
    }

    let kept = data_len.min(VenusCapset::SIZE);
    let mut data = [0u8; VenusCapset::SIZE];
    chan.read_exact(&mut data[..kept]);
    if data_len > kept {
        debug!("dropping {} trailing capset bytes", data_len - kept);
        chan.skip(data_len - kept);
    }
    Ok(Some(VenusCapset::from_wire(&data[..kept])))
}

/// Bind the rendering context to a capset. No response.
pub fn context_init(conn: &Connection, capset_id: CapsetId) -> Result<(), RendererError> {
    let frame = encode(&Request::ContextInit {
        capset_id: capset_id as u32,
    })?;
    conn.lock().write_frame(&frame);
    Ok(())
}

/// Run the whole bring-up sequence on a fresh connection.
pub fn handshake(
    conn: &Connection,
    name: &str,
    desired_version: u32,
) -> Result<Negotiated, RendererError> {
    create_renderer(conn, name)?;

    let version = if ping_protocol_version(conn)? {
        protocol_version(conn, desired_version)?
    } else {
        0
    };
    if version < MIN_PROTOCOL_VERSION {
        warn!(
            "host protocol version {} is below {}",
            version, MIN_PROTOCOL_VERSION
        );
        return Err(RendererError::InitializationFailed(format!(
            "protocol version {} unsupported",
            version
        )));
    }

    let max_sync_queue_count = get_param(conn, Param::MaxSyncQueueCount)?;
    if max_sync_queue_count == 0 {
        warn!("host exposes no sync queues");
        return Err(RendererError::InitializationFailed(
            "host exposes no sync queues".to_string(),
        ));
    }

    let data = match get_capset(conn, CapsetId::Venus, VENUS_CAPSET_VERSION)? {
        Some(data) => data,
        None => {
            warn!("host has no venus capset");
            return Err(RendererError::InitializationFailed(
                "venus capset unavailable".to_string(),
            ));
        }
    };

    context_init(conn, CapsetId::Venus)?;

    info!(
        "renderer '{}' ready: protocol v{}, {} sync queues, wire format {}",
        name, version, max_sync_queue_count, data.wire_format_version
    );
    Ok(Negotiated {
        protocol_version: version,
        max_sync_queue_count,
        capset: Capset {
            id: CapsetId::Venus,
            version: VENUS_CAPSET_VERSION,
            data,
        },
    })
}
