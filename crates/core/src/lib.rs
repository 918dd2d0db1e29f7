pub mod config;
pub mod detect;
pub mod error;
pub mod inflect;
pub mod rules;
pub mod source;
pub mod state;

pub use config::Config;
pub use error::*;
pub use rules::RouteRules;
pub use source::SourceLocation;
pub use state::StoreState;
