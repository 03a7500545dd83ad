use super::UsbIpServer;
use crate::*;
use tokio::{
    io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::mpsc::UnboundedReceiver,
};

const READ_BUFFER_SIZE: usize = 64 * 1024;

impl UsbIpServer {
    /// Accept connections on `addr` until the task is dropped
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        trace!("Trying to listen on {:?}", addr);
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        self.serve_listener(listener).await
    }

    pub async fn serve_listener(self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    info!("Got connection from {}", peer);
                    if let Err(err) = socket.set_nodelay(true) {
                        debug!("Could not disable Nagle for {}: {}", peer, err);
                    }
                    let server = self.clone();
                    tokio::spawn(async move {
                        let res = server.handle_connection(socket, peer).await;
                        info!("Handler for {} ended with {:?}", peer, res);
                    });
                }
                Err(err) => {
                    warn!("Got error {:?}", err);
                }
            }
        }
    }

    /// Run one session over `socket` until either side ends it.
    ///
    /// Responses already queued are written out before the socket is
    /// dropped, also when the peer sent garbage.
    pub async fn handle_connection<S>(&self, socket: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (connection, outbound) = ClientConnection::new(peer);
        let handle = self.register_client(connection);
        let (mut reader, mut writer) = split(socket);

        let read = self.read_loop(handle, &mut reader);
        let write = write_loop(handle, &mut writer, outbound);
        tokio::pin!(read, write);

        tokio::select! {
            res = &mut read => {
                // dropping the session drops the queue sender, so the writer
                // stops once it is drained
                self.close_session(handle);
                let flushed = write.await;
                res.and(flushed)
            }
            res = &mut write => {
                self.close_session(handle);
                res
            }
        }
    }

    async fn read_loop<R>(&self, handle: SessionHandle, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0; READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                info!("[{}] Remote closed the connection", handle);
                return Ok(());
            }
            self.on_bytes_received(handle, &buf[..n])?;
        }
    }
}

async fn write_loop<W>(
    handle: SessionHandle,
    writer: &mut W,
    mut outbound: UnboundedReceiver<SessionMessage>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        match message {
            SessionMessage::Response(bytes) => writer.write_all(&bytes).await?,
            SessionMessage::Close => {
                debug!("[{}] Closing connection", handle);
                break;
            }
        }
    }
    writer.flush().await?;
    Ok(())
}
