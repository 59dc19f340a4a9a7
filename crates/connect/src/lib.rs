//! Connection broker for external providers.
//!
//! Authorizes the application against a fixed set of providers at
//! organization or user scope through a detached-window handshake, and folds
//! every provider's status endpoint into one [`ConnectionStatus`] model.

pub mod backend;
pub mod broker;
pub mod cache;
pub mod callback;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod normalizer;
pub mod registry;
pub mod relay;
pub mod session;
pub mod signal;
pub mod status;
pub mod store;
pub mod window;

pub use {
    broker::{Broker, BrokerBuilder, HandshakeOutcome, OutcomeSource},
    cache::ConnectionCache,
    error::{Error, Result},
    handshake::{Handshake, HandshakeChannel},
    registry::{AuthMethod, AuthorityScope, ProviderDefinition, ProviderId, Registry},
    session::{ScopeContext, SessionSource, StaticSession},
    signal::{IncomingMessage, SIGNAL_TYPE, Signal, SignalBus, SignalReply, SignalStatus},
    status::{ConnectionState, ConnectionStatus},
    store::{ConnectionStore, MemoryConnectionStore, StoreKey},
    window::{ScreenGeometry, SystemBrowser, WindowFeatures, WindowHandle, WindowHost},
};
