//! ensim-store — in-memory registry of running nodes.
//!
//! # Architecture
//!
//! ```text
//! Store<N>
//!   ├── RwLock<HashMap<uuid, Arc<N>>>   add / remove / get / list
//!   └── Watchers<N>
//!         ├── watcher 1 ──(mpsc)──▶ consumer
//!         └── watcher 2 ──(mpsc)──▶ consumer
//! ```
//!
//! Every add and remove emits exactly one event to the watchers registered
//! at that moment. Delivery happens on a spawned task, so the store lock is
//! never held while a slow consumer drains its channel.

pub mod error;
pub mod store;
pub mod watch;

pub use error::{StoreError, StoreResult};
pub use store::{Store, StoreEntry};
pub use watch::{Event, EventType, WatchOptions, Watchers, WATCH_CHANNEL_SIZE};
