//! One forwarding session: ingress TLS handshake, destination dial, and
//! the two half-duplex copies.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mtlsproxy_transport::{ProxyStream, SocketInfo};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Completion record for one copy direction.
struct Conclusion {
    ident: String,
    err: Option<io::Error>,
    xfer: u64,
}

/// Drive one accepted connection: complete the ingress handshake, dial
/// the bound destination, and shuttle bytes until one side finishes or
/// the destination is revoked.
///
/// A handshake or dial failure ends only this session. Both sockets are
/// released on every exit path: the copy tasks own the split halves and
/// always report a conclusion, so the drain below is deterministic and
/// the halves drop when the tasks finish.
pub(crate) async fn connection(
    ident: String,
    socket: TcpStream,
    tls: Option<TlsAcceptor>,
    dest: SocketInfo,
    revoked: CancellationToken,
) {
    let inbound = match tls {
        Some(acceptor) => match acceptor.accept(socket).await {
            Ok(stream) => ProxyStream::ServerTls(stream),
            Err(e) => {
                warn!(id = %ident, error = %e, "TLS handshake failed");
                return;
            }
        },
        None => ProxyStream::Tcp(socket),
    };

    let outbound = match dest.connect().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(id = %ident, error = %e, "error connecting to destination");
            return;
        }
    };

    let (in_read, in_write) = tokio::io::split(inbound);
    let (out_read, out_write) = tokio::io::split(outbound);

    let close = CancellationToken::new();
    let (done_tx, mut done_rx) = mpsc::channel(2);
    tokio::spawn(transfer(
        format!("{ident}:ltd"),
        in_read,
        out_write,
        close.clone(),
        done_tx.clone(),
    ));
    tokio::spawn(transfer(
        format!("{ident}:dtl"),
        out_read,
        in_write,
        close.clone(),
        done_tx,
    ));

    let mut open = 2;
    tokio::select! {
        conclusion = done_rx.recv() => {
            if let Some(conclusion) = conclusion {
                open -= 1;
                log_conclusion(&conclusion);
            }
        }
        _ = revoked.cancelled() => {
            debug!(id = %ident, "destination revoked");
            // TODO: grace period before force-closing
        }
    }

    // Tear down both copies; their halves drop as the tasks finish,
    // closing both sockets.
    close.cancel();

    while open > 0 {
        match done_rx.recv().await {
            Some(conclusion) => {
                log_conclusion(&conclusion);
                open -= 1;
            }
            None => break,
        }
    }
}

fn log_conclusion(conclusion: &Conclusion) {
    match &conclusion.err {
        Some(e) => {
            warn!(id = %conclusion.ident, xfer = conclusion.xfer, error = %e, "socket error")
        }
        None => debug!(id = %conclusion.ident, xfer = conclusion.xfer, "closed"),
    }
}

/// Copy one direction until EOF, error, or teardown, then report a
/// conclusion. The conclusion is always sent, even on error.
async fn transfer<R, W>(
    ident: String,
    mut reader: R,
    mut writer: W,
    close: CancellationToken,
    done: mpsc::Sender<Conclusion>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut xfer = 0u64;

    let result = tokio::select! {
        result = copy_half(&mut reader, &mut writer, &mut buf, &mut xfer) => result,
        _ = close.cancelled() => Ok(()),
    };

    let _ = done
        .send(Conclusion {
            ident,
            err: result.err(),
            xfer,
        })
        .await;
}

/// One copy direction. EOF shuts down the write side so the peer sees a
/// half-close after the last byte flushes.
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    xfer: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let n = reader.read(buf).await?;
        if n == 0 {
            return writer.shutdown().await;
        }
        writer.write_all(&buf[..n]).await?;
        *xfer += n as u64;
    }
}
