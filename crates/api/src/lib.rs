//! HTTP boundary of the identity core: sessions, token validation and
//! token administration.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
