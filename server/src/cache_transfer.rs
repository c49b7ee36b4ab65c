//! Cache transfer sub-protocol.
//!
//! Requests are answered by an independent task per request: the lookup may
//! be slow, and replies are written straight to the socket as soon as the
//! lookup completes, bypassing the tick queue.

use log::{debug, trace};
use shared::{Frame, Js5Prot, Packet, JS5_FRAME_PAYLOAD, JS5_PREFETCH_BIT};

use crate::cache::{CacheStore, Priority};
use crate::connection::ConnectionWriter;
use crate::error::Result;

/// What the frontend should do with one cache-transfer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Js5Request {
    Fetch {
        archive: u8,
        group: u32,
        priority: Priority,
    },
    Ignore,
    Disconnect,
}

/// Interprets one framed request.
pub fn decode_request(mut frame: Frame) -> Result<Js5Request> {
    let request = match Js5Prot::from_opcode(frame.opcode) {
        Some(prot @ (Js5Prot::RequestPrefetch | Js5Prot::RequestUrgent)) => {
            let archive = frame.body.g1()?;
            let group = frame.body.g4()?;
            let priority = if prot == Js5Prot::RequestUrgent {
                Priority::Urgent
            } else {
                Priority::Prefetch
            };
            Js5Request::Fetch {
                archive,
                group,
                priority,
            }
        }
        Some(Js5Prot::Disconnect) => Js5Request::Disconnect,
        Some(_) => Js5Request::Ignore,
        None => {
            debug!("Ignoring cache request opcode {}", frame.opcode);
            Js5Request::Ignore
        }
    };
    Ok(request)
}

/// Splits a group into transfer frames of at most [`JS5_FRAME_PAYLOAD`] bytes.
///
/// Every frame repeats the `archive, group` header; prefetch replies carry the
/// top bit on the group id.
pub fn encode_frames(archive: u8, group: u32, priority: Priority, data: &[u8]) -> Vec<Vec<u8>> {
    let header_group = match priority {
        Priority::Urgent => group,
        Priority::Prefetch => group | JS5_PREFETCH_BIT,
    };

    data.chunks(JS5_FRAME_PAYLOAD)
        .map(|chunk| {
            let mut frame = Packet::alloc(5 + chunk.len());
            frame.p1(archive);
            frame.p4(header_group);
            frame.pdata(chunk);
            frame.into_inner()
        })
        .collect()
}

/// Resolves one fetch and writes its frames in ascending offset order.
///
/// A miss sends nothing. Either way the fetch slot is handed back through
/// [`ConnectionWriter::fetch_done`] once the frames are queued.
pub async fn serve<S: CacheStore>(
    store: &S,
    writer: &ConnectionWriter,
    archive: u8,
    group: u32,
    priority: Priority,
) {
    match store.get_group(archive, group, priority).await {
        Some(data) => {
            trace!("Serving {}/{} ({} bytes)", archive, group, data.len());
            for frame in encode_frames(archive, group, priority, &data) {
                writer.write(frame);
            }
        }
        None => debug!("No data for {}/{}, dropping request", archive, group),
    }
    writer.fetch_done();
}
