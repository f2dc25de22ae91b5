//! Clients for the three external systems the saga coordinates: the SOAP
//! Client Management System, the TCP Warehouse Management System, and the
//! REST Route Optimisation System.

pub mod cms;
pub mod ros;
pub mod wms;

pub use cms::CmsClient;
pub use ros::RosClient;
pub use wms::WmsClient;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tcp connection failed: {0}")]
    Tcp(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("upstream returned an error response: {0}")]
    Upstream(String),

    #[error("could not parse upstream response: {0}")]
    Parse(String),
}
