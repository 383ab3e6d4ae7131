pub mod connection;
pub mod control;
pub mod error;
pub mod fd_channel;
pub mod renderer;
pub mod resource;
pub mod submit;
pub mod sync;
pub mod wait;

pub use connection::{terminate, Connection};
pub use error::RendererError;
pub use renderer::{Renderer, RendererInfo, SyncHandle, VtestRenderer};
pub use resource::Resource;
pub use sync::TimelineSync;
