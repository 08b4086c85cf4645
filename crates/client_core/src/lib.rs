//! Client-side synchronization layer for the companion chat: keeps a
//! transcript, a connection indicator and an emotion gauge in step with a
//! backend that pushes events and may drop the connection at any time.

pub mod api;
pub mod error;
pub mod markup;
pub mod session;
pub mod transcript;
pub mod transport;
pub mod view;

pub use api::{CompanionApi, HttpCompanionApi};
pub use error::TransportError;
pub use markup::{escape_html, render_message, RenderedMessage};
pub use session::{SessionConfig, SessionController, UserAction};
pub use transcript::Transcript;
pub use transport::{websocket_url, Transport, TransportEvent, WebSocketTransport};
pub use view::View;
