//! The HTTP surface.
//!
//! | Path | Method | Behavior |
//! |---|---|---|
//! | `/scan` | any | Validate, queue, answer `202` |
//! | `/` or empty | any | `200`, empty body |
//! | anything else | any | `404` with `errorMessage` |

mod dispatcher;
mod server;

pub use dispatcher::{dispatch, router, AppState, RequestKind, MAX_BODY_BYTES};
pub use server::{serve, shutdown_signal, ServeError};
