//! TCP listener.
//!
//! One tokio task per accepted connection. A connection carries any number
//! of request/response pairs, answered in order, until the client hangs up
//! or the peer shuts down.

use std::sync::Arc;

use meshfs_client::{CodecError, MessageStream};
use meshfs_types::{RemoteError, Request, Response};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::node::PeerService;

/// Accept connections until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    service: Arc<PeerService>,
    mut shutdown: watch::Receiver<bool>,
) {
    let me = service.me().clone();
    match listener.local_addr() {
        Ok(addr) => info!(peer = %me, %addr, "listening"),
        Err(e) => warn!(peer = %me, error = %e, "listening on unknown address"),
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    debug!(peer = %me, %remote, "connection accepted");
                    let service = Arc::clone(&service);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service, shutdown).await {
                            debug!(%remote, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => error!(peer = %me, error = %e, "accept failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(peer = %me, "listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    service: Arc<PeerService>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), CodecError> {
    stream.set_nodelay(true)?;
    let mut messages = MessageStream::new(stream);
    // A request that arrived while the previous one was still running.
    let mut queued: Option<Result<Option<Request>, CodecError>> = None;

    loop {
        let received = match queued.take() {
            Some(received) => received,
            None => tokio::select! {
                received = messages.recv::<Request>() => received,
                _ = shutdown.changed() => return Ok(()),
            },
        };
        let request = match received {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(CodecError::Wire(e)) => {
                // The frame was intact, so the stream is still in sync.
                let reply = Response::Error(RemoteError::transport(format!("bad request: {e}")));
                messages.send(&reply).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        // A caller that hangs up mid-request (a forwarder whose timer fired)
        // takes the request down with it, sub-flood included.
        let dispatch = service.dispatch(request);
        tokio::pin!(dispatch);
        let response = tokio::select! {
            response = &mut dispatch => response,
            next = messages.recv::<Request>() => match next {
                Ok(None) => {
                    debug!(peer = %service.me(), "caller hung up, request abandoned");
                    return Ok(());
                }
                Err(CodecError::Io(e)) => return Err(CodecError::Io(e)),
                next => {
                    queued = Some(next);
                    dispatch.await
                }
            },
        };
        messages.send(&response).await?;
    }
}
