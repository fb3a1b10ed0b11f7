pub mod callback;
pub mod state;

pub use callback::{default_listener_factory, CallbackListener, CallbackServer, ListenerFactory};
pub use state::generate_state;
