//! Routing: deciding which backend a WebSocket request is bridged to.

pub mod resolver;

pub use resolver::{
    resolve, ParseQueryTargetModeError, QueryTargetMode, ResolutionError, TargetResolver,
};
