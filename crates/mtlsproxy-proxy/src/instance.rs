//! The per-profile proxy instance: an event-loop actor owning one
//! listener, one destination descriptor, and the in-flight forwarding
//! sessions.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mtlsproxy_config::Profile;
use mtlsproxy_transport::{SocketInfo, TlsSettings, tls};

use crate::error::ProxyError;
use crate::session;

/// An accepted inbound connection on its way to the event loop. The TLS
/// acceptor, when present, is applied by the forwarding session so a
/// slow handshake never stalls the accept path.
pub(crate) struct NewConn {
    pub socket: TcpStream,
    pub tls: Option<TlsAcceptor>,
}

/// Runtime realization of one profile.
///
/// Internal state lives in the event-loop task and is reached only from
/// there; `adapt_to` and `stop` talk to it over command channels and are
/// serialized by the change lock. New connections always observe the
/// latest destination, and a listener-only change never touches live
/// forwarding sessions.
pub struct Instance {
    change: Mutex<ChangeState>,
    new_dest: mpsc::Sender<Option<SocketInfo>>,
    new_list: mpsc::Sender<Option<SocketInfo>>,
    fin: CancellationToken,
}

struct ChangeState {
    profile: Profile,
    closed: bool,
}

impl Instance {
    /// Spawn the event loop and apply the profile's initial
    /// configuration: destination first, then listener.
    ///
    /// On a TLS build error the freshly spawned loop is shut down again
    /// before the error is returned; nothing is left listening.
    pub async fn new(profile: Profile) -> Result<Self, ProxyError> {
        let (con_tx, con_rx) = mpsc::channel(1);
        let (dest_tx, dest_rx) = mpsc::channel(1);
        let (list_tx, list_rx) = mpsc::channel(1);
        let fin = CancellationToken::new();

        tokio::spawn(run(
            profile.name.clone(),
            con_tx,
            con_rx,
            dest_rx,
            list_rx,
            fin.clone(),
        ));

        let inst = Self {
            change: Mutex::new(ChangeState {
                profile: profile.clone(),
                closed: false,
            }),
            new_dest: dest_tx,
            new_list: list_tx,
            fin,
        };

        if let Err(e) = inst.change_everything(&profile).await {
            inst.fin.cancel();
            return Err(e);
        }
        Ok(inst)
    }

    /// Reshape the instance to a new revision of its profile.
    ///
    /// Only the sides that actually changed are updated, so a
    /// listener-only change leaves active sessions running. When both
    /// sides changed the destination update is delivered first, so every
    /// connection accepted afterwards observes the new destination. On a
    /// build error the current profile reference is left untouched.
    /// After [`Instance::stop`] this is a no-op returning success.
    pub async fn adapt_to(&self, profile: Profile) -> Result<(), ProxyError> {
        let mut state = self.change.lock().await;
        if state.closed {
            return Ok(());
        }

        let lc = state.profile.listen_changed(&profile);
        let dc = state.profile.destination_changed(&profile);

        if lc && dc {
            self.change_everything(&profile).await?;
        } else if lc {
            self.change_listener(&profile).await?;
        } else if dc {
            self.change_destination(&profile).await?;
        }

        state.profile = profile;
        Ok(())
    }

    /// Stop the instance: revoke active sessions, close the listener, and
    /// exit the event loop. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.change.lock().await;
        if state.closed {
            return;
        }
        let _ = self.new_dest.send(None).await;
        let _ = self.new_list.send(None).await;
        state.closed = true;
        self.fin.cancel();
    }

    async fn change_destination(&self, profile: &Profile) -> Result<(), ProxyError> {
        let config = tls::client_config(
            &profile.send_authority_raw,
            &profile.send_cert_raw,
            &profile.send_private_raw,
        )?;
        let info = SocketInfo {
            tls: config.map(|c| TlsSettings::Client(TlsConnector::from(Arc::new(c)))),
            protocol: profile.effective_protocol().to_string(),
            addr: profile.proxy.clone(),
        };
        self.new_dest
            .send(Some(info))
            .await
            .map_err(|_| ProxyError::Stopped)
    }

    async fn change_listener(&self, profile: &Profile) -> Result<(), ProxyError> {
        let config = tls::server_config(
            &profile.listen_authority_raw,
            &profile.listen_cert_raw,
            &profile.listen_private_raw,
        )?;
        let info = SocketInfo {
            tls: config.map(|c| TlsSettings::Server(TlsAcceptor::from(Arc::new(c)))),
            protocol: profile.effective_protocol().to_string(),
            addr: profile.listen.clone(),
        };
        self.new_list
            .send(Some(info))
            .await
            .map_err(|_| ProxyError::Stopped)
    }

    async fn change_everything(&self, profile: &Profile) -> Result<(), ProxyError> {
        self.change_destination(profile).await?;
        self.change_listener(profile).await
    }
}

/// The instance event loop. Observable state is the tuple
/// `(listener, dest, revocation, rev, count)`; it is reached only from
/// this task.
///
/// The command arms are polled before the termination token so the null
/// commands sent by `stop` are always processed first. Closure of a
/// command channel means the `Instance` handle itself is gone and exits
/// the loop the same way.
async fn run(
    ident: String,
    con_tx: mpsc::Sender<NewConn>,
    mut con_rx: mpsc::Receiver<NewConn>,
    mut dest_rx: mpsc::Receiver<Option<SocketInfo>>,
    mut list_rx: mpsc::Receiver<Option<SocketInfo>>,
    fin: CancellationToken,
) {
    let mut listener_stop: Option<CancellationToken> = None;
    let mut dest: Option<SocketInfo> = None;
    let mut revoke: Option<CancellationToken> = None;
    let mut rev: u64 = 0;
    let mut count: u64 = 0;

    loop {
        tokio::select! {
            biased;

            cmd = dest_rx.recv() => {
                let Some(cmd) = cmd else { break };
                rev += 1;
                // Install the new destination before tripping the old
                // revocation: a connection accepted from here on is bound
                // to the new destination, and no session started under
                // the old one outlives this command.
                let old = revoke.take();
                dest = cmd;
                if dest.is_some() {
                    revoke = Some(CancellationToken::new());
                }
                if let Some(token) = old {
                    token.cancel();
                }
            }

            cmd = list_rx.recv() => {
                let Some(cmd) = cmd else { break };
                if let Some(stop) = listener_stop.take() {
                    stop.cancel();
                }
                let accept_ident = format!("{ident}${rev}");
                rev += 1;
                let Some(info) = cmd else { continue };
                // TODO: when the address is unchanged, open the new
                // listener before closing the old one to avoid an accept
                // gap.
                match info.bind().await {
                    Ok(listener) => {
                        info!(id = %accept_ident, addr = %info.addr, "listening");
                        let stop = CancellationToken::new();
                        listener_stop = Some(stop.clone());
                        tokio::spawn(acceptance(
                            accept_ident,
                            listener,
                            info.acceptor(),
                            con_tx.clone(),
                            stop,
                        ));
                    }
                    Err(e) => {
                        warn!(id = %accept_ident, addr = %info.addr, error = %e, "error opening new listener");
                    }
                }
            }

            Some(conn) = con_rx.recv() => {
                match (&dest, &revoke) {
                    (Some(d), Some(r)) => {
                        let session_ident = format!("{ident}${rev}#{count}");
                        count += 1;
                        tokio::spawn(session::connection(
                            session_ident,
                            conn.socket,
                            conn.tls,
                            d.clone(),
                            r.clone(),
                        ));
                    }
                    // No destination: close the inbound socket immediately.
                    _ => drop(conn),
                }
            }

            _ = fin.cancelled() => break,
        }
    }

    if let Some(stop) = listener_stop.take() {
        stop.cancel();
    }
    if let Some(token) = revoke.take() {
        token.cancel();
    }
}

/// Accept connections and feed them to the event loop. The bounded
/// channel backpressures accepts while the loop is busy. Returns when
/// superseded by a listener update, when the loop is gone, or on an
/// accept error (the listener is assumed broken).
async fn acceptance(
    ident: String,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    con_tx: mpsc::Sender<NewConn>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => return,

            result = listener.accept() => {
                match result {
                    Ok((socket, peer)) => {
                        debug!(id = %ident, peer = %peer, "accepted connection");
                        let conn = NewConn { socket, tls: tls.clone() };
                        if con_tx.send(conn).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(id = %ident, error = %e, "error accepting new connections");
                        return;
                    }
                }
            }
        }
    }
}
