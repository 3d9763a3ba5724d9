pub mod auth;
pub mod config;
pub mod error;
pub mod local;
pub mod registry;
pub mod source;
pub mod store;

pub use auth::{Authenticator, Backend, BackendFactory, Profile};
pub use config::Config;
pub use error::{Error, Result};
pub use local::LocalSources;
pub use registry::Registry;
pub use source::{AuthSource, LoginType, Origin, SourceConfig};
pub use store::{SourceStore, User, UserStore};
