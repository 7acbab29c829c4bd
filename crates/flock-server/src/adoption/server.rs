//! Adoption Endpoint
//!
//! One accept loop per node and one task per connection. Heartbeats are
//! answered in place; claims are forwarded to the node actor, which alone
//! decides whether they change the mode. A connection is closed when its
//! peer stays silent for the idle timeout, and on shutdown.

use super::auth::Authenticator;
use super::codec::{decode_frame, encode_frame, frame_codec};
use crate::node::{AdoptNode, FlockNode};
use crate::observability::{events, metrics};
use flock_core::{AdoptResponse, HeartbeatResponse, RpcRequest, RpcResponse};
use futures::{SinkExt, StreamExt};
use kameo::actor::ActorRef;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

/// How long a connection may sit without a request before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct AdoptionServer {
    listener: TcpListener,
    node: ActorRef<FlockNode>,
    authenticator: Arc<dyn Authenticator>,
    idle_timeout: Duration,
}

impl AdoptionServer {
    pub fn new(
        listener: TcpListener,
        node: ActorRef<FlockNode>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            listener,
            node,
            authenticator,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` flips to true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "Adoption endpoint listening");
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!(peer = %peer, "Accepted adoption connection");
                        let connection = Connection {
                            peer,
                            node: self.node.clone(),
                            authenticator: self.authenticator.clone(),
                            idle_timeout: self.idle_timeout,
                            shutdown: shutdown.clone(),
                        };
                        tokio::spawn(async move {
                            if let Err(e) = connection.serve(stream).await {
                                debug!(peer = %peer, error = %e, "Adoption connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept adoption connection"),
                }
            }
        }

        info!("Adoption endpoint stopped");
    }
}

struct Connection {
    peer: SocketAddr,
    node: ActorRef<FlockNode>,
    authenticator: Arc<dyn Authenticator>,
    idle_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Connection {
    async fn serve(mut self, stream: TcpStream) -> io::Result<()> {
        let peer = self.peer;
        let mut framed = Framed::new(stream, frame_codec());

        loop {
            let frame = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        debug!(peer = %peer, "Closing adoption connection on shutdown");
                        break;
                    }
                    continue;
                }
                next = tokio::time::timeout(self.idle_timeout, framed.next()) => match next {
                    Ok(Some(frame)) => frame?,
                    Ok(None) => break,
                    Err(_) => {
                        debug!(
                            peer = %peer,
                            idle_ms = self.idle_timeout.as_millis() as u64,
                            "Closing idle adoption connection"
                        );
                        break;
                    }
                },
            };

            let response = match decode_frame::<RpcRequest>(&frame) {
                Ok(request) => {
                    trace!(peer = %peer, method = request.method(), "Adoption request");
                    dispatch(request, peer, &self.node, self.authenticator.as_ref()).await
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Undecodable adoption request");
                    RpcResponse::Error {
                        message: format!("malformed request: {e}"),
                    }
                }
            };

            let bytes = encode_frame(&response).map_err(io::Error::other)?;
            framed.send(bytes).await?;
        }

        Ok(())
    }
}

/// Answer one request on behalf of `node`.
pub async fn dispatch(
    request: RpcRequest,
    peer: SocketAddr,
    node: &ActorRef<FlockNode>,
    authenticator: &dyn Authenticator,
) -> RpcResponse {
    match request {
        RpcRequest::Heartbeat(_) => RpcResponse::Heartbeat(HeartbeatResponse { reconfigure: false }),
        RpcRequest::Adopt(request) => {
            if let Err(reason) = authenticator.authorize(peer, &request) {
                events::adoption_rejected(&peer.to_string(), &reason);
                metrics::record_adoption_request("unauthorized");
                return RpcResponse::Adopt(AdoptResponse::rejected(reason));
            }

            match node.ask(AdoptNode { request, peer }).send().await {
                Ok(outcome) => RpcResponse::Adopt(outcome.response),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Node actor unavailable");
                    RpcResponse::Adopt(AdoptResponse::rejected("node is shutting down"))
                }
            }
        }
    }
}
