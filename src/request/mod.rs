//! Request model: stored items, bodies, headers and the collection merge.

pub mod body;
pub mod collection;
pub mod headers;
pub mod item;
pub mod prepared;

pub use body::{MaterializedBody, MultipartField, MultipartValue, RequestBody, WsMessageSpec};
pub use collection::{
    merge_collection_settings, CollectionProxy, CollectionSettings, FolderSettings, ProxyMode,
};
pub use headers::HeaderList;
pub use item::{KeyValue, PathParam, RequestItem};
pub use prepared::{LiftedVars, PreparedRequest};
