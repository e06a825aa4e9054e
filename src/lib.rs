//! An async Bolt protocol driver: handshake, packstream encoding,
//! connection pooling, and cluster routing for graph database servers
//! speaking the Bolt wire protocol.

pub mod address;
pub mod auth;
pub mod balancer;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod result_stream;
pub mod routing;

pub use address::{parse_url, ConnectionUrl, Scheme, ServerAddress};
pub use auth::AuthToken;
pub use balancer::{LeastConnected, LoadBalancingStrategy, LoadCounter, RoundRobin};
pub use config::{DriverConfig, PoolConfig};
pub use connection::{Connection, ConnectionState, NullHandler, ResponseHandler};
pub use error::{BoltError, BoltResult};
pub use pool::{AcquireContext, ConnectionFactory, Pool, PooledConnection};
pub use result_stream::{ConnectionHolder, RecordConsumer, ResultStream};
pub use routing::{AccessMode, RoutingDriver, RoutingTable};
