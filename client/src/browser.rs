//! Server browser: asks the master for the list of advertised rooms.

use crate::error::ClientError;
use shared::framing::{read_message, write_message};
use shared::{ListFilter, MasterRequest, MasterResponse, ServerListing};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

pub const BROWSE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn browse(master: &str, filter: ListFilter) -> Result<Vec<ServerListing>, ClientError> {
    let exchange = async {
        let mut stream = TcpStream::connect(master).await?;
        write_message(&mut stream, &MasterRequest::List { filter }).await?;
        read_message::<MasterResponse, _>(&mut stream)
            .await?
            .ok_or(ClientError::Closed)
    };
    let response = timeout(BROWSE_TIMEOUT, exchange)
        .await
        .map_err(|_| ClientError::Timeout("server list"))??;

    match response {
        MasterResponse::Servers { servers } => Ok(servers),
        MasterResponse::Error { reason } => Err(ClientError::Master(reason)),
        other => Err(ClientError::Master(format!("unexpected reply {:?}", other))),
    }
}

/// First listed room with a free participant slot.
pub fn pick_open(servers: &[ServerListing]) -> Option<&ServerListing> {
    servers
        .iter()
        .find(|s| s.player_count < s.capacity && s.metadata.phase != "ended")
}
