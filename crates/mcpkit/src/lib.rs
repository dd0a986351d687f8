#![doc = include_str!("../README.md")]

mod error;
pub use error::ErrorData;

/// Basic data types of the protocol.
pub mod model;
pub mod service;
pub use service::{
    ClientInitializeError, IncomingMessage, Middleware, Next, OutgoingMessage, Peer, QuitReason,
    RequestContext, RoleClient, RoleServer, RunningSession, Service, ServiceError,
};

pub mod client;
pub mod logging;
pub mod server;
pub mod transport;

pub use client::{Client, ClientOptions, ClientSession};
pub use logging::McpLoggingLayer;
pub use server::{Server, ServerOptions, ServerSession, file_resource_handler};

// re-export for typed tool registration
pub use schemars;
