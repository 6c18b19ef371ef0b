//! facedeck-core: Data model and presentation logic for the recognition dashboard.
//!
//! Everything here is I/O free: the types mirror the appliance API's JSON,
//! the feed module holds the bounded live history, and the render module
//! turns records into the rows and cards a front end prints.

pub mod feed;
pub mod render;
pub mod sequence;
pub mod types;

pub use feed::{FeedHistory, FeedState, DEFAULT_HISTORY_CAPACITY};
pub use sequence::{RequestSequencer, Ticket};
pub use types::{
    Camera, EventHandler, Health, NewCamera, NewEventHandler, NewPerson, Person, PersonInfo,
    RecognitionQuery, RecognitionResult, TokenInfo, WebsocketInfo,
};
