pub mod kairo;
pub mod context;
pub mod pattern;
pub mod trie;
pub mod dispatch;
pub mod client;
pub mod adapter;
pub mod utils;
pub mod error;

pub use crate::kairo::{Kairo, RouteOptions};
pub use crate::client::{KairoClient, ClientConfig, RequestOptions};
pub use crate::adapter::{Adapter, LocalAdapter};
pub use crate::utils::method::Method;
pub use tokio::main as tokio_main;
