use std::io;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;
use tracing::trace;

use super::protocol::Message;
use super::protocol::Welcome;
use crate::Endpoint;
use crate::NetworkError;
use crate::Result;

pub(crate) type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// An established, handshaken connection to a peer.
pub struct Session {
    peer: Endpoint,
    welcome: Option<Welcome>,
    framed: FramedStream,
    response_timeout: Duration,
}

impl Session {
    pub(crate) fn outbound(
        framed: FramedStream,
        peer: Endpoint,
        welcome: Welcome,
        response_timeout: Duration,
    ) -> Self {
        Self {
            peer,
            welcome: Some(welcome),
            framed,
            response_timeout,
        }
    }

    pub(crate) fn inbound(
        framed: FramedStream,
        peer: Endpoint,
        response_timeout: Duration,
    ) -> Self {
        Self {
            peer,
            welcome: None,
            framed,
            response_timeout,
        }
    }

    pub fn peer(&self) -> Endpoint {
        self.peer
    }

    /// What the remote node sent when accepting us; `None` on the accepting
    /// side.
    pub fn welcome(&self) -> Option<&Welcome> {
        self.welcome.as_ref()
    }

    pub async fn send(
        &mut self,
        message: &Message,
    ) -> Result<()> {
        trace!(peer = %self.peer, kind = message.kind(), "send");
        let frame = message.encode()?;
        self.framed.send(frame).await.map_err(NetworkError::Io)?;
        Ok(())
    }

    /// Next message from the peer, `None` once the peer closed the stream.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Ok(frame)) => {
                let message = Message::decode(&frame)?;
                trace!(peer = %self.peer, kind = message.kind(), "recv");
                Ok(Some(message))
            }
            Some(Err(e)) => Err(NetworkError::Io(e).into()),
        }
    }

    /// Sends `message` and waits for the reply, bounded by the response
    /// timeout.
    pub async fn request(
        &mut self,
        message: &Message,
    ) -> Result<Message> {
        let peer = self.peer;
        let response_timeout = self.response_timeout;
        let exchange = async {
            self.send(message).await?;
            self.recv().await
        };

        let reply = timeout(response_timeout, exchange).await.map_err(|_| {
            NetworkError::ResponseTimeout {
                peer,
                timeout: response_timeout,
            }
        })??;

        match reply {
            Some(Message::Reject { reason }) => Err(NetworkError::Rejected { peer, reason }.into()),
            Some(reply) => Ok(reply),
            None => Err(NetworkError::ConnectionClosed(peer).into()),
        }
    }

    /// Flushes pending frames and shuts the write half down.
    pub async fn close(mut self) -> Result<()> {
        match timeout(self.response_timeout, SinkExt::<bytes::Bytes>::close(&mut self.framed)).await {
            Ok(Ok(())) => Ok(()),
            // peer already gone; the socket is released on drop either way
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Ok(Err(e)) => Err(NetworkError::Io(e).into()),
            Err(_) => Err(NetworkError::ResponseTimeout {
                peer: self.peer,
                timeout: self.response_timeout,
            }
            .into()),
        }
    }
}
