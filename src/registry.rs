pub mod descriptor;
pub mod relations;
pub mod store;

pub use descriptor::{
    DatabaseDescriptor, DependencyKind, DurableFlags, Flag, KafkaDescriptor, OpensearchDescriptor,
    StateSnapshot,
};
pub use relations::{apply_relation_event, RelationError, RelationEvent};
pub use store::{FileStateStore, StateStore, StateStoreError};
