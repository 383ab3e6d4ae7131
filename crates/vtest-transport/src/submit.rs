//! Forwarding of encoded command streams.

use tracing::trace;

use vtest_protocol::submit::{encode_submit_cmd2, SubmitBatch};

use crate::connection::Connection;
use crate::error::RendererError;

/// Send `batches` as one `SubmitCmd2` frame.
///
/// Returns once the frame is written; completion is only observable through
/// the signalled timelines. An empty submission sends nothing.
pub fn submit(conn: &Connection, batches: &[SubmitBatch<'_>]) -> Result<(), RendererError> {
    let Some(frame) = encode_submit_cmd2(batches)? else {
        trace!("empty submission skipped");
        return Ok(());
    };
    conn.lock().write_frame(&frame);
    trace!("submitted {} batches ({} bytes)", batches.len(), frame.len());
    Ok(())
}
