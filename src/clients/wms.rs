//! Line-delimited TCP client for the Warehouse Management System.
//!
//! Every call opens a fresh connection, writes one `|`-delimited command
//! line, reads one reply line, and closes. No pooling: the WMS protocol
//! is one-shot by design.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{ClientError, Result};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WmsClient {
    host: String,
    port: u16,
}

impl WmsClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Adds a package to the warehouse queue, returning its `wms_reference`.
    pub async fn add_package(&self, order_id: &str, package_details: &str) -> Result<String> {
        let reply = self
            .roundtrip(&format!("ADD_PACKAGE|{order_id}|{package_details}\n"))
            .await?;
        let fields: Vec<&str> = reply.trim().split('|').collect();
        match fields.as_slice() {
            ["ACK", "ADD_PACKAGE", _, wms_reference, "RECEIVED"] => Ok(wms_reference.to_string()),
            ["ERR", .., reason] => Err(ClientError::Upstream(reason.to_string())),
            _ => Err(ClientError::Parse(format!("unrecognised WMS reply: {reply}"))),
        }
    }

    /// Cancels a previously added package.
    pub async fn cancel_package(&self, order_id: &str) -> Result<()> {
        let reply = self.roundtrip(&format!("CANCEL_PACKAGE|{order_id}\n")).await?;
        let fields: Vec<&str> = reply.trim().split('|').collect();
        match fields.as_slice() {
            ["ACK", "CANCEL_PACKAGE", _, "CANCELLED"] => Ok(()),
            ["ERR", .., reason] => Err(ClientError::Upstream(reason.to_string())),
            _ => Err(ClientError::Parse(format!("unrecognised WMS reply: {reply}"))),
        }
    }

    /// Queries the current warehouse-side state of a package.
    pub async fn status(&self, order_id: &str) -> Result<String> {
        let reply = self.roundtrip(&format!("STATUS|{order_id}\n")).await?;
        let fields: Vec<&str> = reply.trim().split('|').collect();
        match fields.as_slice() {
            ["ACK", "STATUS", _, _, state] => Ok(state.to_string()),
            ["ERR", .., reason] => Err(ClientError::Upstream(reason.to_string())),
            _ => Err(ClientError::Parse(format!("unrecognised WMS reply: {reply}"))),
        }
    }

    async fn roundtrip(&self, command: &str) -> Result<String> {
        timeout(RESPONSE_TIMEOUT, self.roundtrip_inner(command))
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    async fn roundtrip_inner(&self, command: &str) -> Result<String> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(command.as_bytes()).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn spawn_echo_server(reply: &'static str) -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(reply.as_bytes()).await;
        });
        (addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_add_package_parses_ack() {
        let (host, port) = spawn_echo_server("ACK|ADD_PACKAGE|order-1|WMS-99|RECEIVED\n").await;
        let client = WmsClient::new(host, port);
        let reference = client.add_package("order-1", "{}").await.unwrap();
        assert_eq!(reference, "WMS-99");
    }

    #[tokio::test]
    async fn test_add_package_parses_error() {
        let (host, port) = spawn_echo_server("ERR|ADD_PACKAGE|order-1|WAREHOUSE_FULL\n").await;
        let client = WmsClient::new(host, port);
        let err = client.add_package("order-1", "{}").await.unwrap_err();
        assert!(matches!(err, ClientError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_cancel_package_parses_ack() {
        let (host, port) = spawn_echo_server("ACK|CANCEL_PACKAGE|order-1|CANCELLED\n").await;
        let client = WmsClient::new(host, port);
        client.cancel_package("order-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_status_parses_ack() {
        let (host, port) = spawn_echo_server("ACK|STATUS|order-1|WMS-99|IN_WAREHOUSE\n").await;
        let client = WmsClient::new(host, port);
        let state = client.status("order-1").await.unwrap();
        assert_eq!(state, "IN_WAREHOUSE");
    }

    #[tokio::test]
    async fn test_garbled_reply_is_parse_error() {
        let (host, port) = spawn_echo_server("nonsense\n").await;
        let client = WmsClient::new(host, port);
        let err = client.add_package("order-1", "{}").await.unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }
}
