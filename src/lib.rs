//! Lifecycle core for a concurrent HTTP server.
//!
//! This crate owns the *supervisor*: the state-machine-driven component
//! that binds no sockets itself but accepts connections on already-bound
//! listeners, enforces global and per-peer admission caps, sweeps idle
//! connections off a coarse shared clock, and orchestrates the ordered
//! start/stop of pluggable observer subsystems. HTTP/1.x and HTTP/2 wire
//! parsing, application request handling, and TLS context construction
//! are all out of scope — they are supplied by a [`driver::HttpDriverFactory`],
//! a [`driver::Responder`], and the caller that bound the listeners,
//! respectively.
//!
//! The entry point is [`Supervisor`]: construct it over a set of
//! [`listener::BoundListener`]s and an [`options::Options`] bundle,
//! attach any [`observer::Observer`]s and set a driver factory /
//! responder / error handler while it is `Stopped`, then call
//! [`Supervisor::start`] and later [`Supervisor::stop`].

pub mod admission;
pub mod client;
pub mod driver;
pub mod error;
pub mod listener;
pub mod logger;
pub mod observer;
pub mod options;
pub mod registry;
pub mod supervisor;
pub mod time_reference;
pub mod timeout_cache;

pub use admission::{AdmissionController, AdmissionRejection};
pub use client::{ClientHandle, ClientId, ClientMeta};
pub use driver::{
    Connection, DefaultDriverFactory, DefaultErrorHandler, Driver, ErrorHandler, HttpDriverFactory, HttpRequest,
    HttpResponse, Responder, SharedDriverFactory, SharedErrorHandler, SharedResponder,
};
pub use error::SupervisorError;
pub use listener::BoundListener;
pub use logger::Logger;
pub use observer::{Observer, ObserverRegistry};
pub use options::{Options, OptionsBuilder};
pub use registry::ClientRegistry;
pub use supervisor::{ServerState, Supervisor, SupervisorHandle};
pub use time_reference::TimeReference;
pub use timeout_cache::TimeoutCache;
