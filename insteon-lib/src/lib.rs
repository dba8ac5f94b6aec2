pub mod address;
pub mod command;
pub mod connection;
pub mod device;
pub mod engine;
pub mod error;
pub mod link;
pub mod message;
pub mod network;
pub mod plm;

pub use address::{Address, DevCat, ProductData, ProductKey};
pub use command::Command;
pub use connection::ConnectionHandle;
pub use engine::EngineVersion;
pub use error::InsteonError;
pub use link::{Group, LinkRecord, RecordControlFlags};
pub use message::{Flags, Message, MessageType};
pub use network::Network;
pub use plm::{Plm, PlmConfig};
