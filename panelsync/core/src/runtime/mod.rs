//! Client Runtimes
//!
//! Event loops that connect the primary and remotes to the relay:
//!
//! - `primary`: [`PrimaryRuntime`] owns the state authority
//! - `remote`: [`RemoteRuntime`] mirrors it into a [`RemoteView`](crate::view::RemoteView)
//! - `console`: stdin line commands for the bundled binaries

pub mod console;
mod primary;
mod remote;

pub use primary::{dispatch_local, LocalCommand, PrimaryHandle, PrimaryRuntime};
pub use remote::{RemoteHandle, RemoteRuntime};
