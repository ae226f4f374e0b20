//! Request/response and streaming calls over pooled connections.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::framing::{read_frame, write_frame};
use crate::link::{BoxReader, BoxWriter, Link};
use crate::message::RpcMessage;
use crate::pool::ConnPool;

/// Issues RPCs to hosts through a [`ConnPool`].
///
/// There is no retry: a failed call evicts the connection when the error
/// leaves it unusable, and the next call to the same host redials.
#[derive(Clone)]
pub struct RpcClient {
    pool: Arc<ConnPool>,
}

/// An open bidirectional stream to a host, tied to the pooled link that
/// carries it.
pub(crate) struct RpcStream {
    pub(crate) host: String,
    pub(crate) link: Arc<dyn Link>,
    pub(crate) writer: BoxWriter,
    pub(crate) reader: BoxReader,
}

impl RpcStream {
    pub(crate) async fn send(&mut self, message: &RpcMessage) -> Result<(), NetError> {
        write_frame(&mut self.writer, message).await
    }

    /// Signal that no more frames will be sent.
    pub(crate) async fn finish(&mut self) -> Result<(), NetError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Next frame; a clean end of stream is an error here because every
    /// exchange ends with an explicit terminator.
    pub(crate) async fn recv(&mut self) -> Result<RpcMessage, NetError> {
        read_frame(&mut self.reader)
            .await?
            .ok_or(NetError::StreamClosed)
    }
}

impl RpcClient {
    /// Client over `pool`.
    pub fn new(pool: Arc<ConnPool>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Arc<ConnPool> {
        &self.pool
    }

    /// Open a stream to `host` on a pooled connection.
    pub(crate) async fn open(&self, host: &str) -> Result<RpcStream, NetError> {
        let link = self.pool.get(host).await?;
        match link.open_bi().await {
            Ok((writer, reader)) => Ok(RpcStream {
                host: host.to_string(),
                link,
                writer,
                reader,
            }),
            Err(e) => {
                warn!(host, %e, "failed to open stream, reaping connection");
                self.pool.reap(host, &link).await;
                Err(e)
            }
        }
    }

    /// Evict the stream's connection if `result` says it is unusable.
    pub(crate) async fn settle<T>(&self, stream: &mut RpcStream, result: &Result<T, NetError>) {
        if let Err(e) = result {
            if e.is_connection() {
                warn!(host = %stream.host, %e, "rpc failed, reaping connection");
                self.pool.reap(&stream.host, &stream.link).await;
            }
        }
    }

    /// Send one request and wait for one response.
    ///
    /// A [`RpcMessage::Error`] response is returned as [`NetError::Remote`].
    pub async fn call(&self, host: &str, request: RpcMessage) -> Result<RpcMessage, NetError> {
        let name = request.name();
        let mut stream = self.open(host).await?;
        let result = async {
            stream.send(&request).await?;
            stream.finish().await?;
            stream.recv().await
        }
        .await;
        self.settle(&mut stream, &result).await;

        match result? {
            RpcMessage::Error(e) => {
                debug!(host, rpc = name, %e, "remote reported failure");
                Err(NetError::Remote(e))
            }
            response => Ok(response),
        }
    }
}
