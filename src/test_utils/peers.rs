use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::frame_codec;
use crate::Endpoint;
use crate::Message;

/// Listener that is bound but never accepts.
///
/// The kernel still completes TCP connects against its backlog, so a client
/// gets a socket whose handshake never finishes. Keep the listener alive for
/// as long as the stall should last.
pub(crate) async fn stalled_peer() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    (listener, endpoint)
}

/// Loopback endpoint nobody listens on.
pub(crate) async fn refused_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    drop(listener);
    endpoint
}

/// Raw socket to `endpoint` that never sends a byte.
pub(crate) async fn silent_socket(endpoint: Endpoint) -> TcpStream {
    TcpStream::connect(endpoint.socket_addr()).await.unwrap()
}

/// Peer that answers the first frame of one connection with `reply`, then
/// holds the connection open until the client hangs up.
pub(crate) async fn scripted_peer(reply: Vec<u8>) -> (Endpoint, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, frame_codec(64 * 1024));
        if framed.next().await.is_none() {
            return;
        }
        let _ = framed.send(Bytes::from(reply)).await;
        while framed.next().await.is_some() {}
    });
    (endpoint, handle)
}

/// [`scripted_peer`] replying with an encoded `message`.
pub(crate) async fn replying_peer(message: Message) -> (Endpoint, JoinHandle<()>) {
    scripted_peer(message.encode().unwrap().to_vec()).await
}
