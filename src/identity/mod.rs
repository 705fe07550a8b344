//! Session bootstrap and role resolution for filmoteca.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod authorizer;
mod profile;
mod provider;
mod session;
mod retry;
pub mod machine;
mod bootstrap;
mod admin;
pub mod memory;

pub use principal::Identity;
pub use authorizer::{Role, RouteAccess, RouteDecision, guard, shows_admin_link, AUTH_PATH, HOME_PATH};
pub use profile::{Profile, ProfileStore, SetOptions};
pub use provider::{IdentityListener, LoginRequest, SessionStore, Subscription};
pub use session::{SessionState, SessionView};
pub use retry::{BackoffPolicy, Clock, ManualClock, RetryPolicy, SystemClock};
pub use bootstrap::{Attachment, Resolution, SessionBootstrapper, Ticket};
pub use admin::{UserAdmin, UserStats};
pub use memory::{MemoryProfileStore, MemorySessionStore};
