mod actor;
pub use actor::{ChainWatcherActor, ChainWatcherArguments, ChainWatcherMessage};
