pub mod api;
pub mod channel;
pub mod dispatcher;
pub mod transport;

pub use api::{ChatApi, HttpChatApi};
pub use channel::{ConnectionState, TransportChannel};
pub use dispatcher::{EventDispatcher, EventHandler};
pub use transport::{
    Transport, TransportEvent, TransportFactory, TungsteniteTransportFactory, socket_endpoint,
};
