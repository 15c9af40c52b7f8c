//! One client session, from admission to close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use super::App;
use crate::error::ClientError;
use crate::net::{ConnectionContext, NetworkClass};
use crate::observability::metrics;
use crate::protocol::{
    parse_request, read_request_line, BoxedWriter, ClientWriter, Protocol, ProtocolError,
    ResponseWriter, MAX_REQUEST_LINE,
};

/// Serve one connection. Never returns an error; every failure is rendered
/// to the client where possible and logged.
pub async fn run<S>(
    app: Arc<App>,
    stream: S,
    remote: Option<SocketAddr>,
    protocol: Protocol,
    network: NetworkClass,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let start = Instant::now();
    let guard = app.services.tracker.track();
    let ctx = ConnectionContext::new(guard.id(), remote, network, protocol);
    let timeouts = &app.services.config.timeouts;

    let (read_half, write_half) = tokio::io::split(stream);
    let boxed: BoxedWriter = Box::new(write_half);
    let mut writer = ResponseWriter::new(protocol, boxed, &app.services.config.server)
        .with_write_timeout(Duration::from_secs(timeouts.write_secs.max(1)));

    let outcome = serve(&app, &ctx, read_half, &mut writer).await;

    let closed = match outcome {
        "idle_timeout" | "incomplete" => writer.close().await,
        _ => writer.finish().await,
    };
    if let Err(e) = closed {
        tracing::debug!(connection_id = %ctx.id, error = %e, "Failed to finish response");
    }

    metrics::record_request(protocol.as_str(), outcome, start);
    tracing::debug!(
        connection_id = %ctx.id,
        peer = %ctx.peer_label(),
        protocol = %protocol,
        outcome,
        elapsed_ms = ctx.elapsed().as_millis() as u64,
        "Session closed"
    );
    drop(guard);
}

/// Run the pipeline and return the outcome label.
async fn serve<R>(
    app: &App,
    ctx: &ConnectionContext,
    read_half: R,
    writer: &mut ClientWriter,
) -> &'static str
where
    R: AsyncRead + Unpin,
{
    if let Err(err) = app.services.gate.admit(ctx) {
        render(ctx, writer, &err).await;
        return err.label();
    }

    let idle = Duration::from_secs(app.services.config.timeouts.idle_secs.max(1));
    let mut reader = BufReader::new(read_half);
    let line = match tokio::time::timeout(idle, read_request_line(&mut reader, MAX_REQUEST_LINE)).await {
        Err(_) => {
            tracing::debug!(connection_id = %ctx.id, "Idle timeout waiting for request");
            return "idle_timeout";
        }
        Ok(Err(ProtocolError::Incomplete)) | Ok(Err(ProtocolError::Io(_))) => {
            return "incomplete";
        }
        Ok(Err(e)) => {
            let err = ClientError::from(&e);
            tracing::info!(connection_id = %ctx.id, peer = %ctx.peer_label(), error = %e, "Unreadable request");
            render(ctx, writer, &err).await;
            return err.label();
        }
        Ok(Ok(line)) => line,
    };

    let request = match parse_request(ctx.protocol, &line) {
        Ok(request) => request,
        Err(e) => {
            let err = ClientError::from(&e);
            tracing::info!(connection_id = %ctx.id, peer = %ctx.peer_label(), error = %e, "Malformed request");
            render(ctx, writer, &err).await;
            return err.label();
        }
    };

    tracing::debug!(
        connection_id = %ctx.id,
        protocol = %ctx.protocol,
        selector = %request.selector,
        has_query = request.query.is_some(),
        "Request received"
    );

    match app.dispatcher.dispatch(&request, ctx, writer).await {
        Ok(handler) => {
            tracing::info!(
                connection_id = %ctx.id,
                peer = %ctx.peer_label(),
                protocol = %ctx.protocol,
                handler,
                selector = %request.selector,
                "Request served"
            );
            "ok"
        }
        Err(err) => {
            render(ctx, writer, &err).await;
            err.label()
        }
    }
}

async fn render(ctx: &ConnectionContext, writer: &mut ClientWriter, err: &ClientError) {
    if let Err(e) = writer.error(err).await {
        tracing::debug!(connection_id = %ctx.id, error = %e, "Could not deliver error response");
    }
}
