//! OAuth2 authorization-code lifecycle of a connection.
//!
//! States bridge the two browser legs, [`OAuth2Connection`] builds authorization URLs and talks to
//! the token and revocation endpoints, and refreshes rotate the per-connection token chain under
//! the distributed refresh lock.

pub mod connection;
pub mod refresh;
pub mod routes;
pub mod state;
pub mod strategy;
pub mod token;

mod exchange;
mod flow;
mod revoke;

pub use connection::*;
pub use refresh::*;
pub use routes::*;
pub use state::*;
pub use strategy::*;
pub use token::*;
