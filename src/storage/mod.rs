pub mod local_registry;
pub mod note_cache;
pub mod session_store;
