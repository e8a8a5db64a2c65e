//! Framed TCP server for the RPC surface.
//!
//! One task per connection; frames are handled in order on each
//! connection. Dropping the connection (or shutting the server down)
//! cancels in-flight back-off waits through the per-request token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use silo_engine::RequestContext;
use silo_proto::code;
use silo_proto::codec::{frame_codec, RpcRequest, RpcResponse, REQUEST_ID_METADATA};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::service::DataService;

pub async fn serve(
    listener: TcpListener,
    service: Arc<DataService>,
    request_timeout: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("rpc server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let service = service.clone();
                let conn_cancel = shutdown.child_token();
                tokio::spawn(async move {
                    if let Err(err) = handle_conn(socket, service, request_timeout, conn_cancel).await {
                        tracing::debug!(peer = %peer, error = %err, "rpc connection closed");
                    }
                });
            }
        }
    }
}

async fn handle_conn(
    socket: TcpStream,
    service: Arc<DataService>,
    request_timeout: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut framed = Framed::new(socket, frame_codec());

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = framed.next() => frame,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        let frame = frame?;

        let response = match silo_proto::codec::decode_request(&frame) {
            Ok(request) => handle_request(&service, request, request_timeout, &cancel).await,
            Err(err) => RpcResponse::error(
                0,
                code::INVALID_ARGUMENT,
                format!("malformed request frame: {err}"),
            ),
        };

        let encoded = silo_proto::codec::encode_response(&response)?;
        framed.send(encoded).await?;
    }
}

async fn handle_request(
    service: &DataService,
    request: RpcRequest,
    request_timeout: Duration,
    cancel: &CancellationToken,
) -> RpcResponse {
    let trace_id = request
        .metadata
        .get(REQUEST_ID_METADATA)
        .cloned()
        .unwrap_or_default();
    let ctx = RequestContext::with_cancel(trace_id.clone(), cancel.child_token());
    let started = Instant::now();

    let outcome = tokio::time::timeout(
        request_timeout,
        service.dispatch(&ctx, &request.method, request.body),
    )
    .await;

    match outcome {
        Ok(Ok(body)) => {
            tracing::debug!(
                trace_id = %trace_id,
                method = %request.method,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request handled"
            );
            RpcResponse::ok(request.id, body)
        }
        Ok(Err(err)) => {
            tracing::warn!(
                trace_id = %trace_id,
                method = %request.method,
                kind = err.kind.code(),
                error = %err.message,
                "request failed"
            );
            RpcResponse::error(request.id, err.kind.code(), err.message)
        }
        Err(_) => {
            // Abort any back-off the engine is still sleeping in.
            ctx.cancel.cancel();
            tracing::warn!(
                trace_id = %trace_id,
                method = %request.method,
                timeout_ms = request_timeout.as_millis() as u64,
                "request deadline exceeded"
            );
            RpcResponse::error(
                request.id,
                code::DEADLINE_EXCEEDED,
                format!("request exceeded the {request_timeout:?} deadline"),
            )
        }
    }
}
