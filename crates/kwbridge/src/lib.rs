//! Local bridge between browser password extensions and the credential
//! application.
//!
//! Extensions reach the application through a per-user local socket (a
//! named pipe on Windows). Messages are length-prefixed JSON; each
//! connection opens with a handshake naming its origin and browser process.
//!
//! # Crate Structure
//!
//! - [`transport`]: Per-user socket naming, UDS and named pipe listeners
//! - [`frame`]: Length-prefixed JSON framing
//! - [`broker`]: Handshake, request ordering, registry and event fan-out (behind `broker` feature)

/// Re-export transport types.
pub mod transport {
    pub use kwbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use kwbridge_frame::*;
}

/// Re-export broker types (requires `broker` feature).
#[cfg(feature = "broker")]
pub mod broker {
    pub use kwbridge_broker::*;
}
