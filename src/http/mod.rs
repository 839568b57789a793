//! HTTP API for recording control and timestamp playback
//!
//! - GET /health - Health check
//! - GET /cameras - Configured cameras
//! - GET /recordings - Stats of every recording session
//! - GET /recordings/:camera - Stats of one camera's sessions
//! - POST /recordings/:camera/start?stream= - Start (or restart) a session
//! - POST /recordings/:camera/stop?stream= - Stop a session
//! - GET /cameras/:camera/segments?stream= - Recorded segments
//! - GET /cameras/:camera/playback?stream=&timestamp=&duration= - Resolve only
//! - POST /cameras/:camera/playback?stream=&timestamp=&duration= - Start playback
//! - GET /playback - All playbacks
//! - GET /playback/:id, DELETE /playback/:id - Playback status / stop

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
