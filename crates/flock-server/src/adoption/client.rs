//! Adoption Client
//!
//! Controller-side connection to a node's adoption endpoint. Every step is
//! bounded: the connect by the connect timeout, each exchange by the request
//! timeout.

use super::codec::{decode_frame, encode_frame, frame_codec};
use super::error::AdoptionError;
use flock_core::{
    AdoptRequest, AdoptResponse, HeartbeatRequest, HeartbeatResponse, RpcRequest, RpcResponse,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub struct AdoptionClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    peer: SocketAddr,
    request_timeout: Duration,
}

impl AdoptionClient {
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, AdoptionError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| AdoptionError::Timeout("connecting"))?
            .map_err(|source| AdoptionError::Connect { addr, source })?;
        stream.set_nodelay(true)?;

        Ok(Self {
            framed: Framed::new(stream, frame_codec()),
            peer: addr,
            request_timeout,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn adopt(&mut self, request: AdoptRequest) -> Result<AdoptResponse, AdoptionError> {
        match self.call(RpcRequest::Adopt(request)).await? {
            RpcResponse::Adopt(response) => Ok(response),
            other => Err(unexpected("adopt", other)),
        }
    }

    pub async fn heartbeat(&mut self) -> Result<HeartbeatResponse, AdoptionError> {
        match self.call(RpcRequest::Heartbeat(HeartbeatRequest {})).await? {
            RpcResponse::Heartbeat(response) => Ok(response),
            other => Err(unexpected("heartbeat", other)),
        }
    }

    async fn call(&mut self, request: RpcRequest) -> Result<RpcResponse, AdoptionError> {
        let bytes = encode_frame(&request)?;

        tokio::time::timeout(self.request_timeout, self.framed.send(bytes))
            .await
            .map_err(|_| AdoptionError::Timeout("sending request"))??;

        let frame = tokio::time::timeout(self.request_timeout, self.framed.next())
            .await
            .map_err(|_| AdoptionError::Timeout("awaiting response"))?
            .ok_or(AdoptionError::Closed)??;

        match decode_frame::<RpcResponse>(&frame)? {
            RpcResponse::Error { message } => Err(AdoptionError::Remote(message)),
            response => Ok(response),
        }
    }
}

fn unexpected(expected: &'static str, got: RpcResponse) -> AdoptionError {
    let got = match got {
        RpcResponse::Adopt(_) => "adopt",
        RpcResponse::Heartbeat(_) => "heartbeat",
        RpcResponse::Error { .. } => "error",
    };
    AdoptionError::UnexpectedResponse {
        expected,
        got: got.to_string(),
    }
}
