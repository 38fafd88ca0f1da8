//! Authentication and authorization module

pub mod actor;
pub mod firewall;
pub mod password;
pub mod permission;
pub mod registry;
pub mod session;

pub use actor::{Actor, ActorResolver, RequestContext};
pub use password::PasswordHasher;
pub use registry::{PermissionRegistry, RegistryError};
pub use session::{MemorySessionStore, RemoteSessionStore, SessionStore};
