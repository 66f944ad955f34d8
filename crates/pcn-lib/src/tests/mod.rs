pub mod test_utils;

mod connection;
mod events;
mod lock_manager;
mod store;
