// Tend Together - background job core
//
// Runs slow AI work (feelings processing, conflict summaries, discussion
// points, partnership context) off the request path with bounded retries,
// crash recovery through the job store, and live progress events over SSE.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
